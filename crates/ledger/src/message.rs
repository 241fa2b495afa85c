use crate::Error;
use bus::Payload;
use models::{hash_of, PulseNumber};
use std::sync::Arc;
use store::{message_key, prefix_key, Scope, Store};

/// Per-pulse persistence of bus messages under `Scope::Message`.
///
/// Keys are `pulse || hash(bytes)`, so a pulse's messages are contiguous and
/// their scan order is stable. The ordered fold over them seeds the pulse's
/// drop hash.
pub struct MessageStore {
    store: Arc<Store>,
}

impl MessageStore {
    pub fn new(store: Arc<Store>) -> MessageStore {
        MessageStore { store }
    }

    pub fn set_message(&self, pn: PulseNumber, payload: &Payload) -> Result<(), Error> {
        let bytes = payload.encode();
        let key = message_key(pn, &hash_of(&[&bytes]));
        // Equal bytes map to an equal key, so a re-write is naturally
        // idempotent.
        self.store.set(&key, &bytes)?;
        Ok(())
    }

    /// All message bytes of `pn`, in key order.
    pub fn for_pulse(&self, pn: PulseNumber) -> Result<Vec<Vec<u8>>, Error> {
        let prefix = prefix_key(Scope::Message, &pn.to_bytes());
        let mut messages = Vec::new();
        for kv in self.store.prefix_scan(&prefix) {
            let (_key, value) = kv.map_err(Error::from)?;
            messages.push(value.into_vec());
        }
        Ok(messages)
    }

    /// Forget every message at or before `pn`. Idempotent.
    pub fn delete_up_to(&self, pn: PulseNumber) -> Result<(), Error> {
        let mut stale = Vec::new();
        for kv in self.store.prefix_scan(&[Scope::Message as u8]) {
            let (key, _) = kv.map_err(Error::from)?;
            let mut pulse = [0; 4];
            pulse.copy_from_slice(&key[1..5]);
            if PulseNumber::from_bytes(pulse) > pn {
                break;
            }
            stale.push(key);
        }
        for key in stale {
            self.store.delete(&key)?;
        }
        Ok(())
    }
}
