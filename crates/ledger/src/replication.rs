use crate::drops::DropStorage;
use crate::{Error, IndexStorage, JetCoordinator, MessageStore};
use bus::{Payload, ReplicaEntry, Sender};
use models::{Id, JetId, PulseNumber};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store::{Scope, Store};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const SEND_ATTEMPTS: usize = 3;
const BACKOFF_START: Duration = Duration::from_millis(50);

struct SyncDeps {
    bus: Arc<dyn Sender>,
    coordinator: Arc<JetCoordinator>,
    store: Arc<Store>,
    indexes: Arc<IndexStorage>,
    drops: Arc<dyn DropStorage>,
    messages: Arc<MessageStore>,
}

struct SyncClient {
    queue: mpsc::UnboundedSender<PulseNumber>,
    synced: watch::Receiver<PulseNumber>,
    enqueued_high: PulseNumber,
    worker: JoinHandle<()>,
}

/// Per-jet single-flight replication to the heavy node.
///
/// Each jet gets one worker draining a pulse queue in bounded batches; a
/// worker's watermark only advances once the heavy node acknowledged the
/// pulse, so `light_cleanup` cannot outrun replication.
pub struct SyncPool {
    deps: Arc<SyncDeps>,
    clients: Mutex<HashMap<JetId, SyncClient>>,
    message_limit: usize,
}

impl SyncPool {
    pub fn new(
        bus: Arc<dyn Sender>,
        coordinator: Arc<JetCoordinator>,
        store: Arc<Store>,
        indexes: Arc<IndexStorage>,
        drops: Arc<dyn DropStorage>,
        messages: Arc<MessageStore>,
        message_limit: usize,
    ) -> SyncPool {
        SyncPool {
            deps: Arc::new(SyncDeps {
                bus,
                coordinator,
                store,
                indexes,
                drops,
                messages,
            }),
            clients: Mutex::new(HashMap::new()),
            message_limit: message_limit.max(1),
        }
    }

    /// Enqueue a sealed pulse on `jet`'s worker, spawning it on first use.
    pub fn add_pulses_to_sync_client(&self, jet: JetId, pn: PulseNumber) {
        let mut clients = self.clients.lock().unwrap();
        let client = clients.entry(jet).or_insert_with(|| {
            let (queue, rx) = mpsc::unbounded_channel();
            let (synced_tx, synced) = watch::channel(PulseNumber(0));
            let deps = self.deps.clone();
            let limit = self.message_limit;
            let worker = tokio::spawn(run_worker(jet, rx, synced_tx, deps, limit));
            SyncClient {
                queue,
                synced,
                enqueued_high: PulseNumber(0),
                worker,
            }
        });

        client.enqueued_high = client.enqueued_high.max(pn);
        if client.queue.send(pn).is_err() {
            tracing::error!(%jet, %pn, "sync worker is gone, pulse not enqueued");
        }
    }

    /// Wait until every worker holding work for pulses up to `pn` has
    /// replicated past it, then delete the on-light replicas at or before
    /// `pn` (records, messages, drops, and the evicted lifelines).
    pub async fn light_cleanup(
        &self,
        pn: PulseNumber,
        evicted: &HashMap<JetId, Vec<Id>>,
    ) -> Result<(), Error> {
        let watched: Vec<(JetId, watch::Receiver<PulseNumber>)> = {
            let clients = self.clients.lock().unwrap();
            clients
                .iter()
                .filter(|(_, client)| client.enqueued_high >= pn)
                .map(|(jet, client)| (*jet, client.synced.clone()))
                .collect()
        };

        for (jet, mut synced) in watched {
            while *synced.borrow_and_update() < pn {
                if synced.changed().await.is_err() {
                    tracing::error!(%jet, "sync worker is gone while waiting for cleanup");
                    break;
                }
            }
        }

        self.delete_replicas(pn)?;
        for objects in evicted.values() {
            self.deps.indexes.delete_persisted(objects)?;
        }
        Ok(())
    }

    /// Drain every worker and stop.
    pub async fn stop(&self) {
        let clients: Vec<SyncClient> = {
            let mut clients = self.clients.lock().unwrap();
            clients.drain().map(|(_, client)| client).collect()
        };
        for client in clients {
            drop(client.queue);
            if let Err(err) = client.worker.await {
                tracing::error!(?err, "sync worker exited abnormally");
            }
        }
    }

    fn delete_replicas(&self, pn: PulseNumber) -> Result<(), Error> {
        let mut stale = Vec::new();
        for kv in self.deps.store.prefix_scan(&[Scope::Record as u8]) {
            let (key, _) = kv.map_err(Error::from)?;
            let mut pulse = [0; 4];
            pulse.copy_from_slice(&key[1..5]);
            if PulseNumber::from_bytes(pulse) > pn {
                break;
            }
            stale.push(key);
        }
        for key in stale {
            self.deps.store.delete(&key)?;
        }

        self.deps.messages.delete_up_to(pn)?;
        self.deps.drops.delete(pn)?;
        Ok(())
    }
}

async fn run_worker(
    jet: JetId,
    mut queue: mpsc::UnboundedReceiver<PulseNumber>,
    synced: watch::Sender<PulseNumber>,
    deps: Arc<SyncDeps>,
    limit: usize,
) {
    while let Some(first) = queue.recv().await {
        let mut batch = vec![first];
        while batch.len() < limit {
            match queue.try_recv() {
                Ok(pn) => batch.push(pn),
                Err(_) => break,
            }
        }

        for pn in batch {
            match sync_pulse(&deps, jet, pn).await {
                Ok(()) => {
                    if *synced.borrow() < pn {
                        synced.send_replace(pn);
                    }
                }
                Err(err) => {
                    // The watermark stays put: cleanup stalls rather than
                    // deleting data the heavy never received.
                    tracing::error!(%jet, %pn, ?err, "heavy sync failed");
                }
            }
        }
    }
}

async fn sync_pulse(deps: &SyncDeps, jet: JetId, pn: PulseNumber) -> Result<(), Error> {
    let payload = build_replication(deps, jet, pn)?;
    let target = deps.coordinator.heavy(pn)?;

    let mut backoff = BACKOFF_START;
    let mut last = None;
    for attempt in 0..SEND_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
        match deps.bus.send_to(target, payload.clone()).await {
            Ok(reply) => match bus::expect_ok(reply) {
                Ok(()) => {
                    tracing::info!(%jet, %pn, "pulse replicated to heavy");
                    return Ok(());
                }
                Err(err) => last = Some(err),
            },
            Err(err) => last = Some(err),
        }
    }
    Err(Error::Bus(last.expect("at least one attempt ran")))
}

fn build_replication(deps: &SyncDeps, jet: JetId, pn: PulseNumber) -> Result<Payload, Error> {
    let mut records = Vec::new();
    let prefix = store::prefix_key(Scope::Record, &pn.to_bytes());
    for kv in deps.store.prefix_scan(&prefix) {
        let (key, value) = kv.map_err(Error::from)?;
        let mut id_bytes = [0; Id::SIZE];
        id_bytes.copy_from_slice(&key[1..]);
        let id = Id::from_bytes(id_bytes);
        if jet.contains(id.hash()) {
            records.push(ReplicaEntry {
                id,
                bytes: value.into_vec(),
            });
        }
    }

    let indexes = deps
        .indexes
        .for_jet(pn, jet)
        .into_iter()
        .map(|(object, entry)| ReplicaEntry {
            id: object,
            bytes: entry.lifeline.encode(),
        })
        .collect();

    let drop = match deps.drops.for_pulse(jet, pn) {
        Ok(drop) => drop.to_vec(),
        // A pulse with no activity on this jet seals no drop.
        Err(Error::NotFound) => Vec::new(),
        Err(err) => return Err(err),
    };

    Ok(Payload::Replication {
        jet_id: jet,
        pulse_number: pn,
        records,
        indexes,
        drop,
    })
}
