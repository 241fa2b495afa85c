use models::Id;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Per-ID read/write lock registry.
///
/// `lock`/`read_lock` lazily create the ID's entry, bump its refcount, and
/// acquire the underlying lock; dropping the returned guard releases it and
/// removes the entry once the count reaches zero. Locks are async-aware
/// because holders suspend on bus reads while locked.
///
/// Releasing an ID that has no registry entry means unlock was called twice
/// for one lock: a programmer error, and fatal.
#[derive(Default)]
pub struct IdLocker {
    entries: Arc<Mutex<HashMap<Id, Entry>>>,
}

struct Entry {
    lock: Arc<RwLock<()>>,
    refs: usize,
}

impl IdLocker {
    pub fn new() -> IdLocker {
        IdLocker::default()
    }

    pub async fn lock(&self, id: Id) -> IdWriteGuard {
        let lock = self.acquire_entry(id);
        IdWriteGuard {
            guard: Some(lock.write_owned().await),
            entries: self.entries.clone(),
            id,
        }
    }

    pub async fn read_lock(&self, id: Id) -> IdReadGuard {
        let lock = self.acquire_entry(id);
        IdReadGuard {
            guard: Some(lock.read_owned().await),
            entries: self.entries.clone(),
            id,
        }
    }

    /// Number of live entries. Zero at quiescence.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn acquire_entry(&self, id: Id) -> Arc<RwLock<()>> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(id).or_insert_with(|| Entry {
            lock: Arc::new(RwLock::new(())),
            refs: 0,
        });
        entry.refs += 1;
        entry.lock.clone()
    }
}

fn release(entries: &Mutex<HashMap<Id, Entry>>, id: &Id) {
    let mut entries = entries.lock().unwrap();
    let entry = entries
        .get_mut(id)
        .unwrap_or_else(|| panic!("unlock of untracked id {id}"));
    entry.refs -= 1;
    if entry.refs == 0 {
        entries.remove(id);
    }
}

pub struct IdWriteGuard {
    guard: Option<OwnedRwLockWriteGuard<()>>,
    entries: Arc<Mutex<HashMap<Id, Entry>>>,
    id: Id,
}

impl Drop for IdWriteGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        release(&self.entries, &self.id);
    }
}

pub struct IdReadGuard {
    guard: Option<OwnedRwLockReadGuard<()>>,
    entries: Arc<Mutex<HashMap<Id, Entry>>>,
    id: Id,
}

impl Drop for IdReadGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        release(&self.entries, &self.id);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::{PulseNumber, HASH_SIZE};

    fn id(fill: u8) -> Id {
        Id::new(PulseNumber(65537), [fill; HASH_SIZE])
    }

    #[tokio::test]
    async fn balanced_lock_unlock_leaves_no_entries() {
        let locker = IdLocker::new();
        {
            let _a = locker.lock(id(1)).await;
            let _b = locker.read_lock(id(2)).await;
            assert_eq!(locker.len(), 2);
        }
        assert!(locker.is_empty());
    }

    #[tokio::test]
    async fn writers_exclude_each_other_per_id() {
        let locker = Arc::new(IdLocker::new());
        let guard = locker.lock(id(1)).await;

        let contender = {
            let locker = locker.clone();
            tokio::spawn(async move {
                let _guard = locker.lock(id(1)).await;
            })
        };
        // The contender cannot finish while the guard is held.
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert!(locker.is_empty());
    }

    #[tokio::test]
    async fn distinct_ids_do_not_contend() {
        let locker = IdLocker::new();
        let _a = locker.lock(id(1)).await;
        let _b = locker.lock(id(2)).await; // Completes immediately.
    }

    #[tokio::test]
    async fn readers_share() {
        let locker = IdLocker::new();
        let _a = locker.read_lock(id(1)).await;
        let _b = locker.read_lock(id(1)).await;
        assert_eq!(locker.len(), 1);
    }
}
