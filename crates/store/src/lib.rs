mod db;
mod key;
mod lock;

pub use db::{Store, Txn, View};
pub use key::{message_key, prefix_key, pulse_key, record_key, Scope, SystemKey};
pub use lock::{IdLocker, IdReadGuard, IdWriteGuard};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key absent. Often non-fatal: callers branch on absence.
    #[error("key not found")]
    NotFound,
    /// A write-once key already holds different bytes.
    #[error("override of immutable value")]
    Override,
    /// A transaction lost a race and retries were not configured.
    #[error("transaction conflict")]
    Conflict,
    /// A transaction lost a race after every configured retry.
    #[error("transaction conflict retries exhausted")]
    ConflictRetriesOver,
    #[error("storage error: {0}")]
    Rocks(#[from] rocksdb::Error),
}
