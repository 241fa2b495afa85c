use crate::record::RecordStorage;
use crate::{Error, IndexStorage, JetCoordinator, PulseStorage};
use bus::{Payload, Sender};
use models::{
    CompositeFilamentRecord, Id, JetId, Material, PendingFilament, PulseNumber, Request,
    ResultRecord, Virtual,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use store::IdLocker;
use tokio::sync::RwLock;

/// One pulse's worth of an object's filament: the meta-record IDs observed
/// at that pulse.
struct ChainLink {
    pn: PulseNumber,
    meta_records: Vec<Id>,
}

/// Pending-request state of one object at one pulse.
///
/// `full_filament` holds the chain grouped by pulse, lowest first. The two
/// `not_closed` views exist so `set_request`/`set_result` never rescan the
/// whole chain. `is_state_calculated` latches once a `gather` has replayed
/// the chain; later gathers are no-ops.
#[derive(Default)]
struct PendingMeta {
    is_state_calculated: bool,
    full_filament: Vec<ChainLink>,
    not_closed_requests: Vec<Id>,
    not_closed_index: HashMap<PulseNumber, HashSet<Id>>,
}

impl PendingMeta {
    fn add_to_filament(&mut self, pn: PulseNumber, meta_id: Id) {
        for link in self.full_filament.iter_mut() {
            if link.pn == pn {
                link.meta_records.push(meta_id);
                return;
            }
        }
        self.full_filament.push(ChainLink {
            pn,
            meta_records: vec![meta_id],
        });
        self.full_filament.sort_by_key(|link| link.pn);
    }
}

type Bucket = Arc<RwLock<PendingMeta>>;

/// The per-object open-request oracle.
///
/// For every (pulse, object) the cache maintains the pulse-ordered chain of
/// pending meta-records and answers "which requests are still open?". When
/// the chain reaches back to pulses another light executed, `gather`
/// backfills it over the bus before replaying.
///
/// Lock order is always the object's lifeline lock first, then the bucket.
pub struct FilamentCache {
    indexes: Arc<IndexStorage>,
    records: Arc<dyn RecordStorage>,
    coordinator: Arc<JetCoordinator>,
    pulses: Arc<PulseStorage>,
    bus: Arc<dyn Sender>,
    locker: Arc<IdLocker>,
    buckets: Mutex<HashMap<PulseNumber, HashMap<Id, Bucket>>>,
}

impl FilamentCache {
    pub fn new(
        indexes: Arc<IndexStorage>,
        records: Arc<dyn RecordStorage>,
        coordinator: Arc<JetCoordinator>,
        pulses: Arc<PulseStorage>,
        bus: Arc<dyn Sender>,
        locker: Arc<IdLocker>,
    ) -> FilamentCache {
        FilamentCache {
            indexes,
            records,
            coordinator,
            pulses,
            bus,
            locker,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Register an open request for the object.
    pub async fn set_request(
        &self,
        pn: PulseNumber,
        object: Id,
        jet: JetId,
        request_id: Id,
    ) -> Result<(), Error> {
        let _object_lock = self.locker.lock(object).await;
        let bucket = self.bucket(pn, object);
        let mut pb = bucket.write().await;

        let mut lifeline = self.indexes.lifeline(pn, object)?;
        if let Some(pointer) = lifeline.pending_pointer {
            if request_id.pulse() < pointer.pulse() {
                return Err(Error::RequestFromThePast);
            }
        }

        let meta = Virtual::PendingFilament(PendingFilament {
            record_id: request_id,
            previous_record: lifeline.pending_pointer,
        });
        let meta_id = meta.id(pn);
        self.records.set(meta_id, &Material::new(meta, jet))?;

        if lifeline.earliest_open_request.is_none() {
            lifeline.earliest_open_request = Some(pn);
        }
        lifeline.pending_pointer = Some(meta_id);
        self.indexes.modify(pn, object, |entry| {
            entry.pending_records.push(meta_id);
            entry.lifeline = lifeline;
        })?;

        pb.add_to_filament(pn, meta_id);
        pb.not_closed_index.entry(pn).or_default().insert(request_id);
        pb.not_closed_requests.push(request_id);

        tracing::debug!(%object, open = pb.not_closed_requests.len(), "registered pending request");
        Ok(())
    }

    /// Register a result, closing its request.
    pub async fn set_result(
        &self,
        pn: PulseNumber,
        object: Id,
        jet: JetId,
        result_id: Id,
        result: &ResultRecord,
    ) -> Result<(), Error> {
        let _object_lock = self.locker.lock(object).await;
        let bucket = self.bucket(pn, object);
        let mut pb = bucket.write().await;

        let request_pulse = result.request.pulse();
        if !pb.not_closed_index.contains_key(&request_pulse) {
            return Err(Error::ResultForUnknownRequest);
        }

        let mut lifeline = self.indexes.lifeline(pn, object)?;
        let meta = Virtual::PendingFilament(PendingFilament {
            record_id: result_id,
            previous_record: lifeline.pending_pointer,
        });
        let meta_id = meta.id(pn);
        self.records.set(meta_id, &Material::new(meta, jet))?;

        pb.add_to_filament(pn, meta_id);
        if let Some(open) = pb.not_closed_index.get_mut(&request_pulse) {
            open.remove(&result.request);
        }
        pb.not_closed_requests.retain(|id| *id != result.request);

        lifeline.pending_pointer = Some(meta_id);
        if pb.not_closed_requests.is_empty() {
            tracing::debug!(%object, "no open requests left");
            lifeline.earliest_open_request = None;
        }
        self.indexes.modify(pn, object, |entry| {
            entry.pending_records.push(meta_id);
            entry.lifeline = lifeline;
        })?;
        Ok(())
    }

    /// Lazily assemble the object's filament, backfilling pulses another
    /// light executed, then replay it. Latched: the second call is a no-op.
    pub async fn gather(&self, pn: PulseNumber, object: Id) -> Result<(), Error> {
        let _object_lock = self.locker.lock(object).await;
        let bucket = self.bucket(pn, object);
        let mut pb = bucket.write().await;

        let lifeline = self.indexes.lifeline(pn, object)?;
        if pb.is_state_calculated {
            return Ok(());
        }
        // No pendings at all.
        let Some(pending_pointer) = lifeline.pending_pointer else {
            return Ok(());
        };
        // No open pendings.
        let Some(earliest) = lifeline.earliest_open_request else {
            return Ok(());
        };
        // The earliest open request is of the current pulse: fully local.
        if earliest == pn {
            return Ok(());
        }

        let first = self.first_pending(&pb)?;
        let dest = match first.as_ref().and_then(|pf| pf.previous_record) {
            Some(previous) => previous.pulse(),
            None => pending_pointer.pulse(),
        };
        let pending_records = self
            .indexes
            .entry(pn, object)
            .map(|entry| entry.pending_records)
            .unwrap_or_default();

        self.fill_pending_filament(object, dest, earliest, &pending_records, &mut pb)
            .await?;
        self.refresh(pn, object, &mut pb)
    }

    /// Broadcast a notification when the object has had a request open for
    /// two pulses or more.
    pub async fn send_abandoned_notification(
        &self,
        current_pn: PulseNumber,
        object: Id,
    ) -> Result<(), Error> {
        let _object_lock = self.locker.read_lock(object).await;

        let lifeline = self.indexes.lifeline(current_pn, object)?;
        let Some(earliest) = lifeline.earliest_open_request else {
            return Ok(());
        };
        let notify_point = match self.pulses.backwards(current_pn, 2) {
            Ok(entry) => entry,
            Err(Error::NotFound) => return Ok(()),
            Err(err) => return Err(err),
        };
        if notify_point.pulse.number < earliest {
            return Ok(());
        }

        let reply = self
            .bus
            .send(Payload::AbandonedRequestsNotification { object_id: object })
            .await
            .map_err(|err| {
                tracing::error!(%object, "failed to notify about pending requests");
                Error::Bus(err)
            })?;
        bus::expect_ok(reply).map_err(|err| {
            tracing::error!(%object, "unexpected reply to pending notification");
            Error::Bus(err)
        })
    }

    /// Up to `count` of the object's open requests, decoded.
    pub async fn open_requests_for(
        &self,
        pn: PulseNumber,
        object: Id,
        count: usize,
    ) -> Result<Vec<Request>, Error> {
        let bucket = self
            .existing_bucket(pn, object)
            .ok_or(Error::LifelineNotFound(object))?;
        let pb = bucket.read().await;

        let mut requests = Vec::new();
        for id in pb.not_closed_requests.iter().take(count) {
            let material = self.records.for_id(*id)?;
            match material.record {
                Virtual::Request(request) => requests.push(request),
                _ => panic!("filament is totally broken"),
            }
        }
        Ok(requests)
    }

    /// The object's full composite chain, as served to backfilling peers and
    /// to replication.
    pub fn records(&self, pn: PulseNumber, object: Id) -> Result<Vec<CompositeFilamentRecord>, Error> {
        let entry = self
            .indexes
            .entry(pn, object)
            .ok_or(Error::LifelineNotFound(object))?;
        self.composites_for(&entry.pending_records)
    }

    /// Open request IDs per object for one jet, packaged into hot data.
    pub async fn pending_for_jet(
        &self,
        pn: PulseNumber,
        jet: JetId,
    ) -> Vec<bus::PendingRequests> {
        let buckets: Vec<(Id, Bucket)> = {
            let map = self.buckets.lock().unwrap();
            map.get(&pn)
                .map(|objects| {
                    objects
                        .iter()
                        .filter(|(object, _)| jet.contains(object.hash()))
                        .map(|(object, bucket)| (*object, bucket.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut pending = Vec::new();
        for (object, bucket) in buckets {
            let pb = bucket.read().await;
            if !pb.not_closed_requests.is_empty() {
                pending.push(bus::PendingRequests {
                    object_id: object,
                    requests: pb.not_closed_requests.clone(),
                });
            }
        }
        pending
    }

    /// Install open requests received in hot data.
    pub async fn install_pending(&self, pn: PulseNumber, object: Id, requests: &[Id]) {
        let bucket = self.bucket(pn, object);
        let mut pb = bucket.write().await;
        for request in requests {
            if !pb.not_closed_requests.contains(request) {
                pb.not_closed_requests.push(*request);
                pb.not_closed_index
                    .entry(request.pulse())
                    .or_default()
                    .insert(*request);
            }
        }
    }

    /// Drop the whole bucket map of `pn`.
    pub fn delete_for_pn(&self, pn: PulseNumber) {
        self.buckets.lock().unwrap().remove(&pn);
    }

    /// Drop `pn`'s buckets for objects routed to `jet`: the pending state of
    /// a jet handed off to another executor.
    pub fn delete_for_jet(&self, pn: PulseNumber, jet: JetId) {
        let mut buckets = self.buckets.lock().unwrap();
        if let Some(objects) = buckets.get_mut(&pn) {
            objects.retain(|object, _| !jet.contains(object.hash()));
        }
    }

    fn bucket(&self, pn: PulseNumber, object: Id) -> Bucket {
        let mut buckets = self.buckets.lock().unwrap();
        buckets
            .entry(pn)
            .or_default()
            .entry(object)
            .or_default()
            .clone()
    }

    fn existing_bucket(&self, pn: PulseNumber, object: Id) -> Option<Bucket> {
        let buckets = self.buckets.lock().unwrap();
        buckets.get(&pn).and_then(|objects| objects.get(&object)).cloned()
    }

    fn first_pending(&self, pb: &PendingMeta) -> Result<Option<PendingFilament>, Error> {
        let Some(link) = pb.full_filament.first() else {
            return Ok(None);
        };
        let Some(meta_id) = link.meta_records.first() else {
            return Ok(None);
        };
        let material = self.records.for_id(*meta_id)?;
        match material.record {
            Virtual::PendingFilament(pf) => Ok(Some(pf)),
            _ => panic!("filament meta {meta_id} is not a pending filament"),
        }
    }

    fn composites_for(&self, meta_ids: &[Id]) -> Result<Vec<CompositeFilamentRecord>, Error> {
        let mut composites = Vec::with_capacity(meta_ids.len());
        for meta_id in meta_ids {
            let meta = self.records.for_id(*meta_id)?;
            let record_id = match &meta.record {
                Virtual::PendingFilament(pf) => pf.record_id,
                _ => panic!("filament meta {meta_id} is not a pending filament"),
            };
            let record = self.records.for_id(record_id)?;
            composites.push(CompositeFilamentRecord {
                meta_id: *meta_id,
                meta,
                record_id,
                record,
            });
        }
        Ok(composites)
    }

    /// Walk the chain backward from `dest_pn`, asking whichever node owned
    /// the object at each hop, until the chain head or the earliest open
    /// request is reached. Received records are stored idempotently.
    async fn fill_pending_filament(
        &self,
        object: Id,
        mut dest_pn: PulseNumber,
        earliest: PulseNumber,
        pending_records: &[Id],
        pb: &mut PendingMeta,
    ) -> Result<(), Error> {
        loop {
            let node = self.coordinator.node_for_object(object, dest_pn)?;

            let payload = if node == self.coordinator.me() {
                // This node can be a previous executor for the object;
                // serve the span locally.
                let records = self.composites_for(pending_records)?;
                tracing::debug!(%object, records = records.len(), "local filament span");
                Payload::PendingFilament {
                    object_id: object,
                    records,
                }
            } else {
                self.bus
                    .send_to(
                        node,
                        Payload::GetPendingFilament {
                            object_id: object,
                            start_from: dest_pn,
                            read_until: earliest,
                        },
                    )
                    .await?
            };

            match payload {
                Payload::PendingFilament { records, .. } => {
                    let Some(first) = records.first() else {
                        return Err(Error::BrokenFilament("empty filament segment"));
                    };
                    let first_meta = match &first.meta.record {
                        Virtual::PendingFilament(pf) => pf.clone(),
                        _ => return Err(Error::BrokenFilament("segment meta is not a pending filament")),
                    };
                    self.set_filament(pb, dest_pn, &records)?;

                    match first_meta.previous_record {
                        // Chain head reached.
                        None => return Ok(()),
                        // More history remains within the open window.
                        Some(previous) if previous.pulse() > earliest => {
                            dest_pn = previous.pulse();
                        }
                        Some(_) => return Ok(()),
                    }
                }
                Payload::Error { text } => return Err(Error::Bus(bus::Error::Remote(text))),
                other => return Err(Error::Bus(bus::Error::UnexpectedReply(other.kind()))),
            }
        }
    }

    /// Store a received span and insert it into the chain, pulse-ordered.
    fn set_filament(
        &self,
        pb: &mut PendingMeta,
        fil_pn: PulseNumber,
        records: &[CompositeFilamentRecord],
    ) -> Result<(), Error> {
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(record.meta_id);
            for (id, material) in [(record.meta_id, &record.meta), (record.record_id, &record.record)]
            {
                match self.records.set(id, material) {
                    // Backfill re-delivers records this node already holds.
                    Ok(()) | Err(Error::Override) => {}
                    Err(err) => return Err(err),
                }
            }
        }

        pb.full_filament.push(ChainLink {
            pn: fil_pn,
            meta_records: ids,
        });
        pb.full_filament.sort_by_key(|link| link.pn);
        Ok(())
    }

    /// Replay the assembled chain: recompute the open-request views and the
    /// lifeline's earliest open request, then latch.
    fn refresh(&self, pn: PulseNumber, object: Id, pb: &mut PendingMeta) -> Result<(), Error> {
        if pb.is_state_calculated {
            return Ok(());
        }

        for link in &pb.full_filament {
            for meta_id in &link.meta_records {
                let meta = self.records.for_id(*meta_id)?;
                let pf = match meta.record {
                    Virtual::PendingFilament(pf) => pf,
                    _ => panic!("filament meta {meta_id} is not a pending filament"),
                };
                let material = self.records.for_id(pf.record_id)?;
                match material.record {
                    Virtual::Request(_) => {
                        pb.not_closed_index
                            .entry(link.pn)
                            .or_default()
                            .insert(pf.record_id);
                    }
                    Virtual::Result(result) => {
                        if let Some(open) = pb.not_closed_index.get_mut(&result.request.pulse()) {
                            open.remove(&result.request);
                        }
                    }
                    _ => panic!("filament is totally broken"),
                }
            }
        }

        let mut earliest = None;
        pb.not_closed_requests.clear();
        for link in &pb.full_filament {
            if let Some(open) = pb.not_closed_index.get(&link.pn) {
                if !open.is_empty() {
                    earliest.get_or_insert(link.pn);
                    let mut open: Vec<Id> = open.iter().copied().collect();
                    open.sort();
                    pb.not_closed_requests.extend(open);
                }
            }
        }
        pb.is_state_calculated = true;

        let open = !pb.not_closed_requests.is_empty();
        self.indexes.modify(pn, object, |entry| {
            entry.lifeline.earliest_open_request = if open { earliest } else { None };
        })?;
        tracing::debug!(%object, open = pb.not_closed_requests.len(), "filament state refreshed");
        Ok(())
    }
}
