use crate::Error;
use models::{wire, Id, JetId, PulseNumber, Reference};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use store::{record_key, Scope, Store};

/// Pulses an untouched lifeline stays hot before eviction.
pub const DEFAULT_INDEX_TTL: u32 = 10;

/// Per-object metadata: the object's latest state pointers plus the tail of
/// its pending-filament chain.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Lifeline {
    pub latest_state: Option<Id>,
    pub latest_state_approved: Option<Id>,
    pub parent: Option<Reference>,
    /// Tail of the pending-filament chain; names a `PendingFilament` record.
    pub pending_pointer: Option<Id>,
    /// Pulse of the earliest request still lacking a result.
    pub earliest_open_request: Option<PulseNumber>,
}

impl Lifeline {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        Id::put_opt(&mut buf, &self.latest_state);
        Id::put_opt(&mut buf, &self.latest_state_approved);
        match &self.parent {
            Some(parent) => {
                wire::put_u8(&mut buf, 1);
                Id::put(&mut buf, &parent.object);
                Id::put(&mut buf, &parent.state);
            }
            None => wire::put_u8(&mut buf, 0),
        }
        Id::put_opt(&mut buf, &self.pending_pointer);
        match self.earliest_open_request {
            Some(pn) => {
                wire::put_u8(&mut buf, 1);
                wire::put_u32(&mut buf, pn.0);
            }
            None => wire::put_u8(&mut buf, 0),
        }
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Lifeline, wire::Error> {
        let buf = &mut buf;
        let latest_state = Id::get_opt(buf)?;
        let latest_state_approved = Id::get_opt(buf)?;
        let parent = match wire::get_u8(buf)? {
            0 => None,
            _ => Some(Reference::new(Id::get(buf)?, Id::get(buf)?)),
        };
        let pending_pointer = Id::get_opt(buf)?;
        let earliest_open_request = match wire::get_u8(buf)? {
            0 => None,
            _ => Some(PulseNumber(wire::get_u32(buf)?)),
        };
        wire::expect_eof(buf)?;

        Ok(Lifeline {
            latest_state,
            latest_state_approved,
            parent,
            pending_pointer,
            earliest_open_request,
        })
    }
}

/// One hot object: its lifeline, the meta-record IDs of its pending chain,
/// the owning jet, and the recency TTL.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct IndexEntry {
    pub lifeline: Lifeline,
    pub pending_records: Vec<Id>,
    pub jet: JetId,
    pub ttl: u32,
}

/// Per-pulse map from object ID to its hot index entry.
///
/// The map is the in-memory authority; lifelines are mirrored to the store
/// under `Scope::Lifeline` for replication reads and restart recovery. Any
/// write while holding the object's lifeline lock re-arms the TTL.
pub struct IndexStorage {
    store: Arc<Store>,
    buckets: Mutex<HashMap<PulseNumber, HashMap<Id, IndexEntry>>>,
}

impl IndexStorage {
    pub fn new(store: Arc<Store>) -> IndexStorage {
        IndexStorage {
            store,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn entry(&self, pn: PulseNumber, object: Id) -> Option<IndexEntry> {
        let buckets = self.buckets.lock().unwrap();
        buckets.get(&pn).and_then(|bucket| bucket.get(&object)).cloned()
    }

    pub fn lifeline(&self, pn: PulseNumber, object: Id) -> Result<Lifeline, Error> {
        self.entry(pn, object)
            .map(|entry| entry.lifeline)
            .ok_or(Error::LifelineNotFound(object))
    }

    /// Create or replace the object's entry, re-arming its TTL and
    /// mirroring the lifeline to the store.
    pub fn set_lifeline(
        &self,
        pn: PulseNumber,
        object: Id,
        jet: JetId,
        lifeline: Lifeline,
    ) -> Result<(), Error> {
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(pn).or_default();
        let entry = bucket.entry(object).or_insert_with(|| IndexEntry {
            lifeline: Lifeline::default(),
            pending_records: Vec::new(),
            jet,
            ttl: DEFAULT_INDEX_TTL,
        });
        entry.lifeline = lifeline.clone();
        entry.jet = jet;
        entry.ttl = DEFAULT_INDEX_TTL;
        drop(buckets);

        self.store
            .set(&record_key(Scope::Lifeline, &object), &lifeline.encode())?;
        Ok(())
    }

    /// Install a complete entry, as received in hot data.
    pub fn set_entry(&self, pn: PulseNumber, object: Id, entry: IndexEntry) -> Result<(), Error> {
        let lifeline = entry.lifeline.clone();
        let mut buckets = self.buckets.lock().unwrap();
        buckets.entry(pn).or_default().insert(object, entry);
        drop(buckets);

        self.store
            .set(&record_key(Scope::Lifeline, &object), &lifeline.encode())?;
        Ok(())
    }

    /// Mutate the object's entry in place. Fails with `LifelineNotFound` for
    /// an unknown object. The caller holds the object's lifeline lock.
    pub fn modify(
        &self,
        pn: PulseNumber,
        object: Id,
        f: impl FnOnce(&mut IndexEntry),
    ) -> Result<(), Error> {
        let mut buckets = self.buckets.lock().unwrap();
        let entry = buckets
            .get_mut(&pn)
            .and_then(|bucket| bucket.get_mut(&object))
            .ok_or(Error::LifelineNotFound(object))?;
        f(entry);
        entry.ttl = DEFAULT_INDEX_TTL;
        let lifeline = entry.lifeline.clone();
        drop(buckets);

        self.store
            .set(&record_key(Scope::Lifeline, &object), &lifeline.encode())?;
        Ok(())
    }

    /// Entries of `pn` owned by `jet`, for hot-data packaging and
    /// replication.
    pub fn for_jet(&self, pn: PulseNumber, jet: JetId) -> Vec<(Id, IndexEntry)> {
        let buckets = self.buckets.lock().unwrap();
        let Some(bucket) = buckets.get(&pn) else {
            return Vec::new();
        };
        bucket
            .iter()
            .filter(|(_, entry)| entry.jet == jet)
            .map(|(object, entry)| (*object, entry.clone()))
            .collect()
    }

    /// Decrement every entry's TTL, evicting those that reach zero.
    /// Returns the evicted object IDs grouped by owning jet, for replication
    /// before local removal.
    pub fn decrease_ttl(&self) -> HashMap<JetId, Vec<Id>> {
        let mut buckets = self.buckets.lock().unwrap();
        let mut evicted: HashMap<JetId, Vec<Id>> = HashMap::new();

        for bucket in buckets.values_mut() {
            bucket.retain(|object, entry| {
                entry.ttl = entry.ttl.saturating_sub(1);
                if entry.ttl == 0 {
                    evicted.entry(entry.jet).or_default().push(*object);
                    return false;
                }
                true
            });
        }
        evicted
    }

    /// Copy `from_jet`'s entries of the closing pulse into the next pulse's
    /// bucket under `to_jet`: the hot handoff for a kept or freshly split
    /// jet.
    pub fn carry_over(&self, from_pn: PulseNumber, to_pn: PulseNumber, from_jet: JetId, to_jet: JetId) {
        let mut buckets = self.buckets.lock().unwrap();
        let moved: Vec<(Id, IndexEntry)> = buckets
            .get(&from_pn)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|(_, entry)| entry.jet == from_jet)
                    .map(|(object, entry)| {
                        let mut entry = entry.clone();
                        entry.jet = to_jet;
                        (*object, entry)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let bucket = buckets.entry(to_pn).or_default();
        for (object, entry) in moved {
            bucket.insert(object, entry);
        }
    }

    /// Drop the whole bucket of `pn`.
    pub fn delete_for_pn(&self, pn: PulseNumber) {
        self.buckets.lock().unwrap().remove(&pn);
    }

    /// Remove the persisted lifelines of evicted objects.
    pub fn delete_persisted(&self, objects: &[Id]) -> Result<(), Error> {
        for object in objects {
            self.store.delete(&record_key(Scope::Lifeline, object))?;
        }
        Ok(())
    }

    /// Re-create entries for objects whose lifelines were persisted at the
    /// genesis pulse. Used at node start.
    pub fn restore_genesis(&self, jet: JetId) -> Result<(), Error> {
        let mut restored = Vec::new();
        for kv in self.store.prefix_scan(&[Scope::Lifeline as u8]) {
            let (key, value) = kv.map_err(Error::from)?;
            let mut id_bytes = [0; Id::SIZE];
            id_bytes.copy_from_slice(&key[1..]);
            let object = Id::from_bytes(id_bytes);
            if object.pulse() == PulseNumber::GENESIS {
                restored.push((object, Lifeline::decode(&value)?));
            }
        }
        for (object, lifeline) in restored {
            self.set_lifeline(PulseNumber::GENESIS, object, jet, lifeline)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::HASH_SIZE;

    const PN: PulseNumber = PulseNumber(65537);

    fn object(fill: u8) -> Id {
        Id::new(PulseNumber::GENESIS, [fill; HASH_SIZE])
    }

    fn storage() -> (tempfile::TempDir, IndexStorage) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), 3).unwrap());
        (dir, IndexStorage::new(store))
    }

    #[test]
    fn lifeline_encoding_round_trips() {
        let lifelines = [
            Lifeline::default(),
            Lifeline {
                latest_state: Some(object(1)),
                latest_state_approved: Some(object(2)),
                parent: Some(Reference::new(object(3), object(4))),
                pending_pointer: Some(object(5)),
                earliest_open_request: Some(PN),
            },
        ];
        for lifeline in lifelines {
            assert_eq!(Lifeline::decode(&lifeline.encode()).unwrap(), lifeline);
        }
    }

    #[test]
    fn set_then_get_returns_the_same_state() {
        let (_dir, indexes) = storage();
        let lifeline = Lifeline {
            latest_state: Some(object(9)),
            ..Default::default()
        };
        indexes
            .set_lifeline(PN, object(1), JetId::EMPTY, lifeline.clone())
            .unwrap();
        assert_eq!(indexes.lifeline(PN, object(1)).unwrap(), lifeline);

        assert!(matches!(
            indexes.lifeline(PN, object(2)),
            Err(Error::LifelineNotFound(_))
        ));
    }

    #[test]
    fn ttl_decrements_and_evicts_at_one() {
        let (_dir, indexes) = storage();
        indexes
            .set_lifeline(PN, object(1), JetId::EMPTY, Lifeline::default())
            .unwrap();

        // Age the entry to TTL 1, then one more decrement evicts it.
        for _ in 0..DEFAULT_INDEX_TTL - 1 {
            assert!(indexes.decrease_ttl().is_empty());
        }
        let evicted = indexes.decrease_ttl();
        assert_eq!(evicted[&JetId::EMPTY], vec![object(1)]);
        assert!(indexes.entry(PN, object(1)).is_none());
    }

    #[test]
    fn writes_rearm_the_ttl() {
        let (_dir, indexes) = storage();
        indexes
            .set_lifeline(PN, object(1), JetId::EMPTY, Lifeline::default())
            .unwrap();
        for _ in 0..DEFAULT_INDEX_TTL - 1 {
            indexes.decrease_ttl();
        }
        indexes.modify(PN, object(1), |_| {}).unwrap();
        assert!(indexes.decrease_ttl().is_empty());
    }

    #[test]
    fn carry_over_retags_the_jet() {
        let (_dir, indexes) = storage();
        let (left, right) = JetId::EMPTY.split();
        indexes
            .set_lifeline(PN, object(1), JetId::EMPTY, Lifeline::default())
            .unwrap();

        let next = PulseNumber(65538);
        indexes.carry_over(PN, next, JetId::EMPTY, right);
        let entry = indexes.entry(next, object(1)).unwrap();
        assert_eq!(entry.jet, right);
        assert_eq!(indexes.for_jet(next, right).len(), 1);
        assert!(indexes.for_jet(next, left).is_empty());
    }

    #[test]
    fn restore_genesis_rebuilds_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), 3).unwrap());

        let indexes = IndexStorage::new(store.clone());
        indexes
            .set_lifeline(PulseNumber::GENESIS, object(1), JetId::EMPTY, Lifeline::default())
            .unwrap();

        let reopened = IndexStorage::new(store);
        reopened.restore_genesis(JetId::EMPTY).unwrap();
        assert!(reopened.entry(PulseNumber::GENESIS, object(1)).is_some());
    }
}
