use crate::Error;
use rocksdb::{Direction, IteratorMode, OptimisticTransactionDB, Options};
use std::path::Path;

/// The embedded ordered key/value store backing all persisted state.
///
/// Writes go through optimistic transactions: `update` re-runs its closure
/// when the commit loses a race, up to the configured retry bound. Reads
/// through `view` observe a consistent snapshot. Durability is delegated to
/// the engine's write-ahead log: once `update` returns, the write survives a
/// crash, and an interrupted transaction leaves no partial state.
pub struct Store {
    db: OptimisticTransactionDB,
    tx_retries: usize,
}

impl Store {
    /// Open (creating if missing) the store under `dir`.
    pub fn open(dir: &Path, tx_retries: usize) -> Result<Store, Error> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = OptimisticTransactionDB::open(&opts, dir)?;

        Ok(Store { db, tx_retries })
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        self.db.get(key)?.ok_or(Error::NotFound)
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.update(|txn| txn.set(key, value))
    }

    /// Write-once `set`: fails with `Override` when `key` already holds
    /// different bytes. Re-writing equal bytes is an idempotent no-op.
    pub fn set_once(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.update(|txn| txn.set_once(key, value))
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), Error> {
        self.update(|txn| txn.delete(key))
    }

    /// Ordered scan of every `(key, value)` under `prefix`.
    pub fn prefix_scan<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = Result<(Box<[u8]>, Box<[u8]>), Error>> + 'a {
        self.db
            .iterator(IteratorMode::From(prefix, Direction::Forward))
            .take_while(move |item| match item {
                Ok((key, _)) => key.starts_with(prefix),
                Err(_) => true,
            })
            .map(|item| item.map_err(Error::from))
    }

    /// Run a read-only closure against a consistent snapshot.
    pub fn view<T>(&self, f: impl FnOnce(&View<'_>) -> Result<T, Error>) -> Result<T, Error> {
        let view = View {
            snapshot: self.db.snapshot(),
        };
        f(&view)
    }

    /// Run a transactional closure and commit it, re-running on conflict up
    /// to the configured bound. The closure sees its own writes and must be
    /// safe to re-run from scratch.
    pub fn update<T>(&self, mut f: impl FnMut(&Txn<'_>) -> Result<T, Error>) -> Result<T, Error> {
        let mut tries = self.tx_retries;
        loop {
            let txn = Txn {
                inner: self.db.transaction(),
            };
            let out = f(&txn)?;

            match txn.inner.commit() {
                Ok(()) => return Ok(out),
                Err(err) if !is_conflict(&err) => return Err(err.into()),
                Err(_) if tries >= 1 => tries -= 1,
                Err(_) if self.tx_retries > 0 => return Err(Error::ConflictRetriesOver),
                Err(_) => {
                    tracing::info!("local storage transaction conflict");
                    return Err(Error::Conflict);
                }
            }
        }
    }
}

fn is_conflict(err: &rocksdb::Error) -> bool {
    matches!(
        err.kind(),
        rocksdb::ErrorKind::Busy | rocksdb::ErrorKind::TryAgain
    )
}

/// Handle passed to `update` closures.
pub struct Txn<'db> {
    inner: rocksdb::Transaction<'db, OptimisticTransactionDB>,
}

impl Txn<'_> {
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        self.inner.get(key)?.ok_or(Error::NotFound)
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.inner.put(key, value)?;
        Ok(())
    }

    pub fn set_once(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        match self.inner.get(key)? {
            Some(existing) if existing == value => Ok(()),
            Some(_) => Err(Error::Override),
            None => self.set(key, value),
        }
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), Error> {
        self.inner.delete(key)?;
        Ok(())
    }
}

/// Handle passed to `view` closures.
pub struct View<'db> {
    snapshot: rocksdb::SnapshotWithThreadMode<'db, OptimisticTransactionDB>,
}

impl View<'_> {
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        self.snapshot.get(key)?.ok_or(Error::NotFound)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{prefix_key, Scope};
    use std::sync::Arc;

    fn open() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 50).unwrap();
        (dir, store)
    }

    #[test]
    fn get_of_absent_key_is_not_found() {
        let (_dir, store) = open();
        assert!(matches!(store.get(b"nope"), Err(Error::NotFound)));
    }

    #[test]
    fn set_then_get_round_trips() {
        let (_dir, store) = open();
        store.set(b"k", b"v1").unwrap();
        assert_eq!(store.get(b"k").unwrap(), b"v1");
        store.set(b"k", b"v2").unwrap();
        assert_eq!(store.get(b"k").unwrap(), b"v2");
    }

    #[test]
    fn set_once_rejects_different_bytes_only() {
        let (_dir, store) = open();
        store.set_once(b"w", b"once").unwrap();
        store.set_once(b"w", b"once").unwrap(); // Idempotent.
        assert!(matches!(store.set_once(b"w", b"other"), Err(Error::Override)));
        assert_eq!(store.get(b"w").unwrap(), b"once");
    }

    #[test]
    fn prefix_scan_is_ordered_and_bounded() {
        let (_dir, store) = open();
        for (i, pulse) in [3u32, 1, 2].iter().enumerate() {
            store
                .set(&prefix_key(Scope::Pulse, &pulse.to_be_bytes()), &[i as u8])
                .unwrap();
        }
        store.set(&prefix_key(Scope::System, &[1]), b"x").unwrap();

        let keys: Vec<_> = store
            .prefix_scan(&[Scope::Pulse as u8])
            .map(|kv| kv.unwrap().0)
            .collect();

        assert_eq!(keys.len(), 3);
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn concurrent_updates_serialize() {
        let (_dir, store) = open();
        let store = Arc::new(store);
        store.set(b"counter", &0u64.to_be_bytes()).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..25 {
                    store
                        .update(|txn| {
                            let mut buf = [0; 8];
                            buf.copy_from_slice(&txn.get(b"counter")?);
                            let next = u64::from_be_bytes(buf) + 1;
                            txn.set(b"counter", &next.to_be_bytes())
                        })
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut buf = [0; 8];
        buf.copy_from_slice(&store.get(b"counter").unwrap());
        assert_eq!(u64::from_be_bytes(buf), 200);
    }

    #[test]
    fn view_reads_a_snapshot() {
        let (_dir, store) = open();
        store.set(b"k", b"v").unwrap();
        store
            .view(|view| {
                assert_eq!(view.get(b"k").unwrap(), b"v");
                assert!(matches!(view.get(b"absent"), Err(Error::NotFound)));
                Ok(())
            })
            .unwrap();
    }
}
