use crate::Error;
use models::{wire, Pulse, PulseNumber};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use store::{prefix_key, pulse_key, Scope, Store, SystemKey};
use tokio::sync::watch;

/// One tracked pulse, linked by value to its neighbours.
#[derive(Clone, PartialEq, Debug)]
pub struct PulseEntry {
    pub pulse: Pulse,
    pub prev: Option<PulseNumber>,
    pub next: Option<PulseNumber>,
}

impl PulseEntry {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        wire::put_bytes(&mut buf, &self.pulse.encode());
        for link in [self.prev, self.next] {
            match link {
                Some(pn) => {
                    wire::put_u8(&mut buf, 1);
                    wire::put_u32(&mut buf, pn.0);
                }
                None => wire::put_u8(&mut buf, 0),
            }
        }
        buf
    }

    fn decode(mut buf: &[u8]) -> Result<PulseEntry, wire::Error> {
        let buf = &mut buf;
        let pulse = Pulse::decode(&wire::get_bytes(buf)?)?;
        let mut links = [None, None];
        for link in links.iter_mut() {
            if wire::get_u8(buf)? != 0 {
                *link = Some(PulseNumber(wire::get_u32(buf)?));
            }
        }
        wire::expect_eof(buf)?;
        let [prev, next] = links;

        Ok(PulseEntry { pulse, prev, next })
    }
}

/// Authoritative map of recent pulses, doubly linked by value and mirrored
/// to the store under `Scope::Pulse`. Appends are monotonic; subscribers
/// observe each appended pulse through a watch channel.
pub struct PulseStorage {
    store: Arc<Store>,
    entries: Mutex<BTreeMap<PulseNumber, PulseEntry>>,
    broadcast: watch::Sender<Option<Pulse>>,
}

impl PulseStorage {
    pub fn new(store: Arc<Store>) -> PulseStorage {
        let (broadcast, _) = watch::channel(None);
        PulseStorage {
            store,
            entries: Mutex::new(BTreeMap::new()),
            broadcast,
        }
    }

    /// Reload the in-memory chain from the store.
    pub fn restore(&self) -> Result<(), Error> {
        let mut restored = BTreeMap::new();
        for kv in self.store.prefix_scan(&[Scope::Pulse as u8]) {
            let (_key, value) = kv.map_err(Error::from)?;
            let entry = PulseEntry::decode(&value)?;
            restored.insert(entry.pulse.number, entry);
        }

        let mut entries = self.entries.lock().unwrap();
        *entries = restored;
        Ok(())
    }

    /// Append a new latest pulse. Fails with `BadPulse` unless the number is
    /// strictly ahead of the current latest.
    pub fn append(&self, pulse: Pulse) -> Result<(), Error> {
        let mut entries = self.entries.lock().unwrap();

        let latest = entries.keys().next_back().copied();
        if matches!(latest, Some(latest) if pulse.number <= latest) {
            return Err(Error::BadPulse(pulse.number));
        }

        let entry = PulseEntry {
            pulse: pulse.clone(),
            prev: latest,
            next: None,
        };
        let patched_prev = latest.map(|prev| {
            let mut prev_entry = entries[&prev].clone();
            prev_entry.next = Some(pulse.number);
            prev_entry
        });

        self.store.update(|txn| {
            txn.set(&pulse_key(pulse.number), &entry.encode())?;
            if let Some(prev_entry) = &patched_prev {
                txn.set(&pulse_key(prev_entry.pulse.number), &prev_entry.encode())?;
            }
            txn.set(
                &prefix_key(Scope::System, &[SystemKey::LatestPulse as u8]),
                &pulse.number.to_bytes(),
            )
        })?;

        if let Some(prev_entry) = patched_prev {
            entries.insert(prev_entry.pulse.number, prev_entry);
        }
        entries.insert(pulse.number, entry);
        drop(entries);

        self.broadcast.send_replace(Some(pulse));
        Ok(())
    }

    pub fn latest(&self) -> Result<PulseEntry, Error> {
        let entries = self.entries.lock().unwrap();
        entries
            .values()
            .next_back()
            .cloned()
            .ok_or(Error::NotFound)
    }

    pub fn get(&self, pn: PulseNumber) -> Result<PulseEntry, Error> {
        let entries = self.entries.lock().unwrap();
        entries.get(&pn).cloned().ok_or(Error::NotFound)
    }

    /// Walk `steps` predecessors back from `from` along the value links.
    pub fn backwards(&self, from: PulseNumber, steps: u32) -> Result<PulseEntry, Error> {
        let entries = self.entries.lock().unwrap();
        let mut entry = entries.get(&from).ok_or(Error::NotFound)?;
        for _ in 0..steps {
            let prev = entry.prev.ok_or(Error::NotFound)?;
            entry = entries.get(&prev).ok_or(Error::NotFound)?;
        }
        Ok(entry.clone())
    }

    /// Forget a pulse. Deleting an untracked pulse is a no-op, so cleanup
    /// replays converge.
    pub fn delete(&self, pn: PulseNumber) -> Result<(), Error> {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(&pn);
        self.store.delete(&pulse_key(pn))?;
        Ok(())
    }

    /// Subscribe to appended pulses.
    pub fn subscribe(&self) -> watch::Receiver<Option<Pulse>> {
        self.broadcast.subscribe()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::ENTROPY_SIZE;

    fn pulse(n: u32) -> Pulse {
        Pulse {
            number: PulseNumber(n),
            entropy: [n as u8; ENTROPY_SIZE],
            next: PulseNumber(n + 1),
            prev: PulseNumber(n.saturating_sub(1)),
            signs: Vec::new(),
        }
    }

    fn storage() -> (tempfile::TempDir, PulseStorage) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), 3).unwrap());
        (dir, PulseStorage::new(store))
    }

    #[test]
    fn append_links_and_tracks_latest() {
        let (_dir, pulses) = storage();
        for n in [65537, 65539, 65544] {
            pulses.append(pulse(n)).unwrap();
            assert_eq!(pulses.latest().unwrap().pulse.number, PulseNumber(n));
        }

        let mid = pulses.get(PulseNumber(65539)).unwrap();
        assert_eq!(mid.prev, Some(PulseNumber(65537)));
        assert_eq!(mid.next, Some(PulseNumber(65544)));
    }

    #[test]
    fn append_rejects_non_monotonic_numbers() {
        let (_dir, pulses) = storage();
        pulses.append(pulse(65540)).unwrap();

        for stale in [65540, 65538] {
            match pulses.append(pulse(stale)) {
                Err(Error::BadPulse(pn)) => assert_eq!(pn, PulseNumber(stale)),
                other => panic!("expected BadPulse, got {other:?}"),
            }
        }
    }

    #[test]
    fn backwards_walks_the_chain() {
        let (_dir, pulses) = storage();
        for n in [65537, 65538, 65539, 65540] {
            pulses.append(pulse(n)).unwrap();
        }

        let entry = pulses.backwards(PulseNumber(65540), 2).unwrap();
        assert_eq!(entry.pulse.number, PulseNumber(65538));
        assert!(matches!(
            pulses.backwards(PulseNumber(65540), 9),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn restore_rebuilds_from_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), 3).unwrap());

        let pulses = PulseStorage::new(store.clone());
        pulses.append(pulse(65537)).unwrap();
        pulses.append(pulse(65538)).unwrap();

        let reopened = PulseStorage::new(store);
        reopened.restore().unwrap();
        assert_eq!(reopened.latest().unwrap().pulse.number, PulseNumber(65538));
        assert_eq!(
            reopened
                .backwards(PulseNumber(65538), 1)
                .unwrap()
                .pulse
                .number,
            PulseNumber(65537)
        );
    }

    #[test]
    fn subscribers_observe_appends() {
        let (_dir, pulses) = storage();
        let rx = pulses.subscribe();
        pulses.append(pulse(65537)).unwrap();
        assert_eq!(
            rx.borrow().as_ref().map(|p| p.number),
            Some(PulseNumber(65537))
        );
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, pulses) = storage();
        pulses.append(pulse(65537)).unwrap();
        pulses.delete(PulseNumber(65537)).unwrap();
        pulses.delete(PulseNumber(65537)).unwrap();
        assert!(matches!(pulses.latest(), Err(Error::NotFound)));
    }
}
