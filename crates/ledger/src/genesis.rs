use crate::drops::DropStorage;
use crate::record::RecordStorage;
use crate::{Error, IndexStorage, Lifeline, PulseStorage};
use models::{Genesis, Id, JetDrop, JetId, Material, Pulse, PulseNumber, Reference, Virtual, HASH_SIZE};
use store::{prefix_key, Scope, Store, SystemKey};

/// Create the initial records of an empty store: the genesis pulse, the
/// zero drop of the empty jet, the genesis record, and its lifeline.
///
/// Idempotent: a store that already holds a genesis reference is left
/// untouched, and a bootstrap interrupted partway converges on re-run
/// (every step tolerates its own prior success).
pub fn bootstrap(
    store: &Store,
    pulses: &PulseStorage,
    drops: &dyn DropStorage,
    records: &dyn RecordStorage,
    indexes: &IndexStorage,
) -> Result<Reference, Error> {
    let genesis_key = prefix_key(Scope::System, &[SystemKey::Genesis as u8]);

    if let Ok(bytes) = store.get(&genesis_key) {
        let mut id_bytes = [0; Id::SIZE];
        id_bytes.copy_from_slice(&bytes);
        let id = Id::from_bytes(id_bytes);
        return Ok(Reference::new(id, id));
    }
    tracing::debug!("starting storage bootstrap");

    match pulses.append(Pulse::genesis()) {
        Ok(()) | Err(Error::BadPulse(_)) => {}
        Err(err) => return Err(err),
    }

    let mut zero_drop = JetDrop {
        prev_hash: vec![0; HASH_SIZE],
        hash: models::hash_of(&[&[0; HASH_SIZE]]).to_vec(),
        ..Default::default()
    };
    zero_drop.set_pulse_number(PulseNumber::GENESIS);
    zero_drop.set_jet(JetId::EMPTY);
    match drops.set(&zero_drop) {
        Ok(()) | Err(Error::Override) => {}
        Err(err) => return Err(err),
    }

    let genesis = Virtual::Genesis(Genesis);
    let id = genesis.id(PulseNumber::GENESIS);
    records.set(id, &Material::new(genesis, JetId::EMPTY))?;

    indexes.set_lifeline(
        PulseNumber::GENESIS,
        id,
        JetId::EMPTY,
        Lifeline {
            latest_state: Some(id),
            latest_state_approved: Some(id),
            ..Default::default()
        },
    )?;

    store.set_once(&genesis_key, &id.to_bytes())?;
    Ok(Reference::new(id, id))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::record::RecordMemory;
    use crate::{DropMemory, PulseStorage};
    use std::sync::Arc;

    #[test]
    fn bootstrap_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), 3).unwrap());
        let pulses = PulseStorage::new(store.clone());
        let drops = DropMemory::new();
        let records = RecordMemory::new();
        let indexes = Arc::new(IndexStorage::new(store.clone()));

        let first = bootstrap(&store, &pulses, &drops, &records, &indexes).unwrap();
        let second = bootstrap(&store, &pulses, &drops, &records, &indexes).unwrap();
        assert_eq!(first, second);

        // The genesis object is fully addressable.
        use crate::record::RecordStorage as _;
        let material = records.for_id(first.object).unwrap();
        assert_eq!(material.record, Virtual::Genesis(Genesis));
        assert!(indexes
            .lifeline(PulseNumber::GENESIS, first.object)
            .is_ok());
        assert_eq!(pulses.latest().unwrap().pulse.number, PulseNumber::GENESIS);
    }
}
