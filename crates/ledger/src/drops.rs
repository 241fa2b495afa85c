use crate::Error;
use models::{JetDrop, JetId, PulseNumber};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use store::{prefix_key, Scope, Store};

/// Sealed per-(jet, pulse) block storage. A drop is created exactly once;
/// any second `set` for the same coordinates is an `Override`.
pub trait DropStorage: Send + Sync {
    fn set(&self, drop: &JetDrop) -> Result<(), Error>;
    fn for_pulse(&self, jet: JetId, pn: PulseNumber) -> Result<JetDrop, Error>;
    /// Forget every drop sealed at or before `pn`. Idempotent.
    fn delete(&self, pn: PulseNumber) -> Result<(), Error>;
}

/// In-memory drop store.
#[derive(Default)]
pub struct DropMemory {
    drops: RwLock<HashMap<(PulseNumber, JetId), JetDrop>>,
}

impl DropMemory {
    pub fn new() -> DropMemory {
        DropMemory::default()
    }
}

impl DropStorage for DropMemory {
    fn set(&self, drop: &JetDrop) -> Result<(), Error> {
        let key = (drop.pulse_number(), drop.jet());
        let mut drops = self.drops.write().unwrap();
        if drops.contains_key(&key) {
            return Err(Error::Override);
        }
        drops.insert(key, drop.clone());
        Ok(())
    }

    fn for_pulse(&self, jet: JetId, pn: PulseNumber) -> Result<JetDrop, Error> {
        let drops = self.drops.read().unwrap();
        drops.get(&(pn, jet)).cloned().ok_or(Error::NotFound)
    }

    fn delete(&self, pn: PulseNumber) -> Result<(), Error> {
        let mut drops = self.drops.write().unwrap();
        drops.retain(|(drop_pn, _), _| *drop_pn > pn);
        Ok(())
    }
}

/// Store-backed drop store under `Scope::JetDrop`. Keys are
/// `depth || prefix || pulse`, so one jet's drops are contiguous and
/// pulse-ordered.
pub struct DropDb {
    store: Arc<Store>,
}

impl DropDb {
    pub fn new(store: Arc<Store>) -> DropDb {
        DropDb { store }
    }

    fn key(jet: JetId, pn: PulseNumber) -> Vec<u8> {
        let mut payload = Vec::with_capacity(JetId::SIZE + 4);
        payload.extend_from_slice(&jet.to_bytes());
        payload.extend_from_slice(&pn.to_bytes());
        prefix_key(Scope::JetDrop, &payload)
    }
}

impl DropStorage for DropDb {
    fn set(&self, drop: &JetDrop) -> Result<(), Error> {
        let key = Self::key(drop.jet(), drop.pulse_number());
        self.store.update(|txn| match txn.get(&key) {
            Ok(_) => Err(store::Error::Override),
            Err(store::Error::NotFound) => txn.set(&key, &drop.to_vec()),
            Err(err) => Err(err),
        })?;
        Ok(())
    }

    fn for_pulse(&self, jet: JetId, pn: PulseNumber) -> Result<JetDrop, Error> {
        let bytes = self.store.get(&Self::key(jet, pn))?;
        JetDrop::from_slice(&bytes).map_err(|_| models::wire::Error::BadMessage.into())
    }

    fn delete(&self, pn: PulseNumber) -> Result<(), Error> {
        // The key layout is jet-major, so eviction by pulse scans the scope.
        // Cleanup runs once per tick; the scan is off the hot path.
        let mut stale = Vec::new();
        for kv in self.store.prefix_scan(&[Scope::JetDrop as u8]) {
            let (key, _) = kv.map_err(Error::from)?;
            let mut pulse = [0; 4];
            pulse.copy_from_slice(&key[1 + JetId::SIZE..]);
            if PulseNumber::from_bytes(pulse) <= pn {
                stale.push(key);
            }
        }
        for key in stale {
            self.store.delete(&key)?;
        }
        Ok(())
    }
}
