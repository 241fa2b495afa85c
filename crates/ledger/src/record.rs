use crate::Error;
use models::{Id, Material};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use store::{record_key, Scope, Store};

/// Content-addressed record storage.
///
/// The key is the record ID, the value the canonical `Material` encoding.
/// `set` of identical bytes is an idempotent no-op (filament backfill writes
/// records it may already hold); different bytes under one ID are an
/// `Override`.
pub trait RecordStorage: Send + Sync {
    fn set(&self, id: Id, material: &Material) -> Result<(), Error>;
    fn for_id(&self, id: Id) -> Result<Material, Error>;
}

/// In-memory record store.
#[derive(Default)]
pub struct RecordMemory {
    records: RwLock<HashMap<Id, Vec<u8>>>,
}

impl RecordMemory {
    pub fn new() -> RecordMemory {
        RecordMemory::default()
    }
}

impl RecordStorage for RecordMemory {
    fn set(&self, id: Id, material: &Material) -> Result<(), Error> {
        let encoded = material.encode();
        let mut records = self.records.write().unwrap();
        match records.get(&id) {
            Some(existing) if *existing == encoded => Ok(()),
            Some(_) => Err(Error::Override),
            None => {
                records.insert(id, encoded);
                Ok(())
            }
        }
    }

    fn for_id(&self, id: Id) -> Result<Material, Error> {
        let records = self.records.read().unwrap();
        let bytes = records.get(&id).ok_or(Error::NotFound)?;
        Ok(Material::decode(bytes)?)
    }
}

/// Store-backed record store under `Scope::Record`. Keys embed the record's
/// pulse, so one pulse's records are contiguous for replication scans.
pub struct RecordDb {
    store: Arc<Store>,
}

impl RecordDb {
    pub fn new(store: Arc<Store>) -> RecordDb {
        RecordDb { store }
    }
}

impl RecordStorage for RecordDb {
    fn set(&self, id: Id, material: &Material) -> Result<(), Error> {
        self.store
            .set_once(&record_key(Scope::Record, &id), &material.encode())?;
        Ok(())
    }

    fn for_id(&self, id: Id) -> Result<Material, Error> {
        let bytes = self.store.get(&record_key(Scope::Record, &id))?;
        Ok(Material::decode(&bytes)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::{Genesis, JetId, PulseNumber, Virtual};

    fn material(fill: u8) -> (Id, Material) {
        let record = Virtual::Code(models::Code {
            request: Id::new(PulseNumber(65537), [fill; models::HASH_SIZE]),
            code: vec![fill],
        });
        let id = record.id(PulseNumber(65538));
        (id, Material::new(record, JetId::EMPTY))
    }

    fn stores() -> (tempfile::TempDir, Vec<Box<dyn RecordStorage>>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), 3).unwrap());
        (
            dir,
            vec![
                Box::new(RecordMemory::new()),
                Box::new(RecordDb::new(store)),
            ],
        )
    }

    #[test]
    fn set_then_for_id_round_trips() {
        let (_dir, stores) = stores();
        for records in stores {
            let (id, material) = material(1);
            records.set(id, &material).unwrap();
            assert_eq!(records.for_id(id).unwrap(), material);
            assert!(matches!(
                records.for_id(material.record.id(PulseNumber(70000))),
                Err(Error::NotFound)
            ));
        }
    }

    #[test]
    fn set_is_idempotent_for_equal_bytes_only() {
        let (_dir, stores) = stores();
        for records in stores {
            let (id, material) = material(2);
            records.set(id, &material).unwrap();
            records.set(id, &material).unwrap();

            let other = Material::new(Virtual::Genesis(Genesis), JetId::EMPTY);
            assert!(matches!(records.set(id, &other), Err(Error::Override)));
        }
    }
}
