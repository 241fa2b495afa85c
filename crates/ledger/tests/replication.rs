//! Heavy replication: a light node streams a sealed pulse to the heavy node
//! and only then deletes its local replicas.

use anyhow::Context;
use bus::LocalBus;
use ledger::{Lifeline, LightComponents, RandomSplitPolicy, RecordStorage};
use models::{
    Code, Config, Id, JetId, Material, Node, NodeRef, NodeRole, Pulse, PulseNumber, Virtual,
    ENTROPY_SIZE,
};
use std::collections::HashMap;
use std::sync::Arc;

fn pulse(n: u32) -> Pulse {
    Pulse {
        number: PulseNumber(n),
        entropy: [n as u8; ENTROPY_SIZE],
        next: PulseNumber(n + 1),
        prev: PulseNumber(n - 1),
        signs: Vec::new(),
    }
}

fn components(dir: &std::path::Path, bus: &LocalBus, origin: Node) -> LightComponents {
    let config = Config {
        data_directory: dir.join(format!("node-{}", origin.reference)),
        ..Default::default()
    };
    LightComponents::new(
        &config,
        origin,
        vec![origin],
        bus,
        Arc::new(RandomSplitPolicy::new(0)),
    )
    .unwrap()
}

#[tokio::test]
async fn sealed_pulse_replicates_before_cleanup() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let bus = LocalBus::new();

    let light = Node::new(NodeRef([1; 32]), NodeRole::LightMaterial);
    let heavy = Node::new(NodeRef([2; 32]), NodeRole::HeavyMaterial);
    let a = components(dir.path(), &bus, light);
    let h = components(dir.path(), &bus, heavy);

    let pn = PulseNumber(65538);
    a.pulses.append(pulse(65538))?;
    a.nodes.set(pn, vec![light, heavy])?;

    // A record and its lifeline live on the light during the pulse.
    let record = Virtual::Code(Code {
        request: Id::new(pn, [7; models::HASH_SIZE]),
        code: b"blob".to_vec(),
    });
    let record_id = record.id(pn);
    let material = Material::new(record, JetId::EMPTY);
    a.records.set(record_id, &material)?;
    a.indexes
        .set_lifeline(pn, record_id, JetId::EMPTY, Lifeline::default())?;

    a.sync_pool.add_pulses_to_sync_client(JetId::EMPTY, pn);
    a.sync_pool.light_cleanup(pn, &HashMap::new()).await?;

    // The heavy holds the record now; the light no longer does.
    let replicated = h
        .records
        .for_id(record_id)
        .context("record never reached the heavy")?;
    assert_eq!(replicated, material);
    assert!(h.indexes.entry(pn, record_id).is_some());
    assert!(a.records.for_id(record_id).is_err());

    a.sync_pool.stop().await;
    Ok(())
}
