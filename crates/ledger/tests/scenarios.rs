//! End-to-end lifecycle scenarios over fully wired light components.

use anyhow::Context;
use bus::{LocalBus, Payload};
use futures::FutureExt;
use ledger::{
    DropStorage, Error, IndexEntry, LightComponents, Lifeline, RandomSplitPolicy, RecordStorage,
    SplitPolicy, DEFAULT_INDEX_TTL,
};
use models::{
    Config, Id, JetId, Material, Node, NodeRef, NodeRole, Pulse, PulseNumber, Request,
    ResultRecord, Virtual, ENTROPY_SIZE, HASH_SIZE,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn pulse(n: u32) -> Pulse {
    Pulse {
        number: PulseNumber(n),
        entropy: [n as u8; ENTROPY_SIZE],
        next: PulseNumber(n + 1),
        prev: PulseNumber(n - 1),
        signs: Vec::new(),
    }
}

fn light_node(fill: u8) -> Node {
    Node::new(NodeRef([fill; 32]), NodeRole::LightMaterial)
}

fn components(
    dir: &std::path::Path,
    bus: &LocalBus,
    origin: Node,
    split: Arc<dyn SplitPolicy>,
) -> LightComponents {
    let config = Config {
        data_directory: dir.join(format!("node-{}", origin.reference)),
        heavy_sync_enabled: false,
        ..Default::default()
    };
    LightComponents::new(&config, origin, vec![origin], bus, split).unwrap()
}

fn object(fill: u8) -> Id {
    Id::new(PulseNumber(65538), [fill; HASH_SIZE])
}

fn stored_request(comps: &LightComponents, pn: u32, object: Id) -> Id {
    let record = Virtual::Request(Request {
        object,
        method: "call".to_string(),
        arguments: Vec::new(),
    });
    let id = record.id(PulseNumber(pn));
    comps
        .records
        .set(id, &Material::new(record, JetId::EMPTY))
        .unwrap();
    id
}

fn stored_result(comps: &LightComponents, pn: u32, object: Id, request: Id) -> (Id, ResultRecord) {
    let result = ResultRecord {
        object,
        request,
        payload: Vec::new(),
    };
    let record = Virtual::Result(result.clone());
    let id = record.id(PulseNumber(pn));
    comps
        .records
        .set(id, &Material::new(record, JetId::EMPTY))
        .unwrap();
    (id, result)
}

// A request opens the object's pending state; its result closes it again,
// all within one pulse.
#[tokio::test]
async fn request_then_result_within_one_pulse() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let comps = components(dir.path(), &bus, light_node(1), Arc::new(RandomSplitPolicy::new(0)));

    let pn = PulseNumber(65538);
    let obj = object(9);
    comps
        .indexes
        .set_lifeline(pn, obj, JetId::EMPTY, Lifeline::default())
        .unwrap();

    let req_id = stored_request(&comps, 65538, obj);
    comps
        .filaments
        .set_request(pn, obj, JetId::EMPTY, req_id)
        .await
        .unwrap();

    let lifeline = comps.indexes.lifeline(pn, obj).unwrap();
    assert_eq!(lifeline.earliest_open_request, Some(pn));
    assert!(lifeline.pending_pointer.is_some());
    assert_eq!(
        comps
            .filaments
            .open_requests_for(pn, obj, 10)
            .await
            .unwrap()
            .len(),
        1
    );

    let (res_id, result) = stored_result(&comps, 65538, obj, req_id);
    comps
        .filaments
        .set_result(pn, obj, JetId::EMPTY, res_id, &result)
        .await
        .unwrap();

    let lifeline = comps.indexes.lifeline(pn, obj).unwrap();
    assert_eq!(lifeline.earliest_open_request, None);
    assert!(comps
        .filaments
        .open_requests_for(pn, obj, 10)
        .await
        .unwrap()
        .is_empty());
}

// A request left open for two pulses triggers exactly one abandoned
// notification.
#[tokio::test]
async fn abandoned_requests_notify_after_two_pulses() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let origin = light_node(1);
    let comps = components(dir.path(), &bus, origin, Arc::new(RandomSplitPolicy::new(0)));

    let notifications = Arc::new(AtomicUsize::new(0));
    {
        let handler = comps.handler.clone();
        let notifications = notifications.clone();
        bus.register(origin.reference, move |payload| {
            if matches!(payload, Payload::AbandonedRequestsNotification { .. }) {
                notifications.fetch_add(1, Ordering::SeqCst);
            }
            let handler = handler.clone();
            async move { Ok(handler.handle(payload).await) }.boxed()
        });
    }

    for n in [65538, 65539, 65540] {
        comps.pulses.append(pulse(n)).unwrap();
    }

    let obj = object(3);
    let p1 = PulseNumber(65538);
    comps
        .indexes
        .set_lifeline(p1, obj, JetId::EMPTY, Lifeline::default())
        .unwrap();
    let req_id = stored_request(&comps, 65538, obj);
    comps
        .filaments
        .set_request(p1, obj, JetId::EMPTY, req_id)
        .await
        .unwrap();

    // One pulse later the request is too young to notify about.
    comps
        .indexes
        .carry_over(p1, PulseNumber(65539), JetId::EMPTY, JetId::EMPTY);
    comps
        .filaments
        .send_abandoned_notification(PulseNumber(65539), obj)
        .await
        .unwrap();
    assert_eq!(notifications.load(Ordering::SeqCst), 0);

    // Two pulses later it is abandoned.
    comps
        .indexes
        .carry_over(p1, PulseNumber(65540), JetId::EMPTY, JetId::EMPTY);
    comps
        .filaments
        .send_abandoned_notification(PulseNumber(65540), obj)
        .await
        .unwrap();
    assert_eq!(notifications.load(Ordering::SeqCst), 1);
}

// A request older than the pending chain's tail is rejected.
#[tokio::test]
async fn request_from_the_past_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let comps = components(dir.path(), &bus, light_node(1), Arc::new(RandomSplitPolicy::new(0)));

    let pn = PulseNumber(65540);
    let obj = object(5);
    comps
        .indexes
        .set_lifeline(pn, obj, JetId::EMPTY, Lifeline::default())
        .unwrap();

    let fresh = stored_request(&comps, 65540, obj);
    comps
        .filaments
        .set_request(pn, obj, JetId::EMPTY, fresh)
        .await
        .unwrap();

    // The pending pointer now sits at pulse 65540; a request claiming pulse
    // 65539 is history rewritten.
    let stale = stored_request(&comps, 65539, obj);
    assert!(matches!(
        comps
            .filaments
            .set_request(pn, obj, JetId::EMPTY, stale)
            .await,
        Err(Error::RequestFromThePast)
    ));
}

struct SplitEmptyJet;

impl SplitPolicy for SplitEmptyJet {
    fn pick(&self, owned: &[JetId]) -> Option<JetId> {
        owned.iter().find(|jet| **jet == JetId::EMPTY).copied()
    }
}

// A split hands hot data to both children when this node keeps them, and
// unlocks exactly their waiters on the following tick.
#[tokio::test]
async fn jet_split_keeps_hot_data_on_both_children() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let comps = components(dir.path(), &bus, light_node(1), Arc::new(SplitEmptyJet));

    let genesis = comps.bootstrap().unwrap();
    comps.manager.start().await.unwrap();

    // First real tick splits the empty jet on the new pulse.
    comps.manager.set(pulse(65538), true).await.unwrap();
    let (left, right) = JetId::EMPTY.split();
    assert_eq!(comps.jets.all(PulseNumber(65538)), vec![left, right]);

    // Hot state followed the split to both children.
    let entry = comps.indexes.entry(PulseNumber(65538), genesis.object).unwrap();
    assert!(entry.jet == left || entry.jet == right);

    // The next tick re-confirms ownership of both children and releases
    // exactly their hot-data waiters.
    comps.manager.set(pulse(65539), true).await.unwrap();
    comps.hot_waiter.wait(left).await.unwrap();
    comps.hot_waiter.wait(right).await.unwrap();
}

// Drops of consecutive pulses chain through their hashes.
#[tokio::test]
async fn drop_chain_links_hashes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let bus = LocalBus::new();
    let comps = components(dir.path(), &bus, light_node(1), Arc::new(RandomSplitPolicy::new(0)));

    comps.bootstrap()?;
    comps.manager.start().await?;

    for n in [65538, 65539, 65540, 65541] {
        // Give the closing pulse a distinct message so hashes differ.
        comps.messages.set_message(
            PulseNumber(n - 1),
            &Payload::Error {
                text: format!("activity {n}"),
            },
        )?;
        comps.manager.set(pulse(n), true).await?;
    }

    let jet = JetId::EMPTY;
    let genesis_drop = comps
        .drops
        .for_pulse(jet, PulseNumber(65537))
        .context("bootstrap sealed no genesis drop")?;
    let d1 = comps
        .drops
        .for_pulse(jet, PulseNumber(65538))
        .context("pulse 65538 was not sealed")?;
    let d2 = comps
        .drops
        .for_pulse(jet, PulseNumber(65539))
        .context("pulse 65539 was not sealed")?;
    let d3 = comps
        .drops
        .for_pulse(jet, PulseNumber(65540))
        .context("pulse 65540 was not sealed")?;

    assert_eq!(d1.prev_hash, genesis_drop.hash);
    assert_eq!(d2.prev_hash, d1.hash);
    assert_eq!(d3.prev_hash, d2.hash);
    assert_ne!(d1.hash, d2.hash);
    assert_ne!(d2.hash, d3.hash);
    Ok(())
}

// A new executor backfills an object's filament from the previous one and
// arrives at the same open-request state.
#[tokio::test]
async fn filament_backfill_across_executors() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let node_a = light_node(1);
    let node_b = light_node(2);
    let a = components(dir.path(), &bus, node_a, Arc::new(RandomSplitPolicy::new(0)));
    let b = components(dir.path(), &bus, node_b, Arc::new(RandomSplitPolicy::new(0)));

    // Shared history: node A executed pulse 65538, node B executes 65539.
    for comps in [&a, &b] {
        comps.pulses.append(pulse(65538)).unwrap();
        comps.pulses.append(pulse(65539)).unwrap();
        comps
            .nodes
            .set(PulseNumber(65538), vec![node_a])
            .unwrap();
        comps
            .nodes
            .set(PulseNumber(65539), vec![node_b])
            .unwrap();
    }

    // Count filament reads served by A.
    let served = Arc::new(AtomicUsize::new(0));
    {
        let handler = a.handler.clone();
        let served = served.clone();
        bus.register(node_a.reference, move |payload| {
            if matches!(payload, Payload::GetPendingFilament { .. }) {
                served.fetch_add(1, Ordering::SeqCst);
            }
            let handler = handler.clone();
            async move { Ok(handler.handle(payload).await) }.boxed()
        });
    }

    // The object lives on A during pulse 65538 and receives a request.
    let obj = object(7);
    let p1 = PulseNumber(65538);
    a.indexes
        .set_lifeline(p1, obj, JetId::EMPTY, Lifeline::default())
        .unwrap();
    let req_id = stored_request(&a, 65538, obj);
    a.filaments
        .set_request(p1, obj, JetId::EMPTY, req_id)
        .await
        .unwrap();
    let a_lifeline = a.indexes.lifeline(p1, obj).unwrap();

    // B takes over for pulse 65539, starting from the handed-over lifeline
    // alone (no chain records yet).
    let p2 = PulseNumber(65539);
    b.indexes
        .set_entry(
            p2,
            obj,
            IndexEntry {
                lifeline: a_lifeline.clone(),
                pending_records: Vec::new(),
                jet: JetId::EMPTY,
                ttl: DEFAULT_INDEX_TTL,
            },
        )
        .unwrap();

    b.filaments.gather(p2, obj).await.unwrap();

    // B reconstructed A's state: same earliest open request, records held
    // locally, the request visible as open.
    let b_lifeline = b.indexes.lifeline(p2, obj).unwrap();
    assert_eq!(
        b_lifeline.earliest_open_request,
        a_lifeline.earliest_open_request
    );
    assert!(b.records.for_id(req_id).is_ok());
    let open = b.filaments.open_requests_for(p2, obj, 10).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].object, obj);
    assert_eq!(served.load(Ordering::SeqCst), 1);

    // The assembled state is latched: a second gather reads nothing.
    b.filaments.gather(p2, obj).await.unwrap();
    assert_eq!(served.load(Ordering::SeqCst), 1);
}

// A stopped manager refuses further ticks.
#[tokio::test]
async fn stopped_manager_rejects_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let bus = LocalBus::new();
    let comps = components(dir.path(), &bus, light_node(1), Arc::new(RandomSplitPolicy::new(0)));

    comps.bootstrap().unwrap();
    comps.manager.start().await.unwrap();
    comps.manager.set(pulse(65538), true).await.unwrap();

    comps.manager.stop().await;
    assert!(matches!(
        comps.manager.set(pulse(65539), true).await,
        Err(Error::Stopped)
    ));
}
