use crate::drops::DropStorage;
use crate::record::RecordStorage;
use crate::{Error, FilamentCache, HotDataWaiter, IndexEntry, IndexStorage, JetStorage, Lifeline};
use bus::Payload;
use models::{JetDrop, Material};
use std::sync::Arc;

/// Serves the bus payloads a material node answers: filament reads from
/// peers backfilling their chains, hot-data handoff at a pulse boundary,
/// abandoned-request notifications, and replication batches on a heavy.
pub struct MessageHandler {
    jets: Arc<JetStorage>,
    indexes: Arc<IndexStorage>,
    filaments: Arc<FilamentCache>,
    records: Arc<dyn RecordStorage>,
    drops: Arc<dyn DropStorage>,
    hot_waiter: Arc<HotDataWaiter>,
}

impl MessageHandler {
    pub fn new(
        jets: Arc<JetStorage>,
        indexes: Arc<IndexStorage>,
        filaments: Arc<FilamentCache>,
        records: Arc<dyn RecordStorage>,
        drops: Arc<dyn DropStorage>,
        hot_waiter: Arc<HotDataWaiter>,
    ) -> MessageHandler {
        MessageHandler {
            jets,
            indexes,
            filaments,
            records,
            drops,
            hot_waiter,
        }
    }

    /// Answer one payload. Failures become `Error` payloads, never a dead
    /// peer.
    pub async fn handle(&self, payload: Payload) -> Payload {
        let kind = payload.kind();
        match self.dispatch(payload).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(kind, ?err, "message handling failed");
                Payload::Error {
                    text: err.to_string(),
                }
            }
        }
    }

    async fn dispatch(&self, payload: Payload) -> Result<Payload, Error> {
        match payload {
            Payload::GetPendingFilament {
                object_id,
                start_from,
                ..
            } => {
                let records = self.filaments.records(start_from, object_id)?;
                Ok(Payload::PendingFilament { object_id, records })
            }
            Payload::HotData {
                drop,
                drop_jet,
                pulse_number,
                recent_objects,
                pending_requests,
            } => {
                // The sealed drop of the handed-off jet.
                match self.drops.set(&drop) {
                    Ok(()) | Err(Error::Override) => {}
                    Err(err) => return Err(err),
                }
                self.jets.update(pulse_number, true, &[drop_jet]);

                for hot in recent_objects {
                    let lifeline = Lifeline::decode(&hot.index)?;
                    self.indexes.set_entry(
                        pulse_number,
                        hot.object_id,
                        IndexEntry {
                            lifeline,
                            pending_records: Vec::new(),
                            jet: drop_jet,
                            ttl: hot.ttl,
                        },
                    )?;
                }
                for pending in pending_requests {
                    self.filaments
                        .install_pending(pulse_number, pending.object_id, &pending.requests)
                        .await;
                }

                match self.hot_waiter.unlock(drop_jet) {
                    Ok(()) => {}
                    Err(Error::WaiterNotLocked(jet)) => {
                        tracing::debug!(%jet, "hot data arrived for an already released jet")
                    }
                    Err(err) => return Err(err),
                }
                Ok(Payload::Ok)
            }
            Payload::AbandonedRequestsNotification { object_id } => {
                // Scheduling the re-execution is the virtual node's concern;
                // the material node just acknowledges.
                tracing::info!(object = %object_id, "object has abandoned requests");
                Ok(Payload::Ok)
            }
            Payload::Replication {
                jet_id,
                pulse_number,
                records,
                indexes,
                drop,
            } => {
                for entry in records {
                    let material = Material::decode(&entry.bytes)?;
                    match self.records.set(entry.id, &material) {
                        Ok(()) | Err(Error::Override) => {}
                        Err(err) => return Err(err),
                    }
                }
                for entry in indexes {
                    let lifeline = Lifeline::decode(&entry.bytes)?;
                    self.indexes.set_entry(
                        pulse_number,
                        entry.id,
                        IndexEntry {
                            lifeline,
                            pending_records: Vec::new(),
                            jet: jet_id,
                            ttl: crate::DEFAULT_INDEX_TTL,
                        },
                    )?;
                }
                if !drop.is_empty() {
                    let drop = JetDrop::from_slice(&drop)
                        .map_err(|_| models::wire::Error::BadMessage)?;
                    match self.drops.set(&drop) {
                        Ok(()) | Err(Error::Override) => {}
                        Err(err) => return Err(err),
                    }
                }
                Ok(Payload::Ok)
            }
            other => Ok(Payload::Error {
                text: format!("unexpected payload {}", other.kind()),
            }),
        }
    }
}
