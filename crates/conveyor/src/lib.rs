//! Synchronisation primitives of the cooperative state-machine runtime:
//! intrusive slot queues and the conditional counting gate. A scheduler
//! shard owns one `SlotPool` and drives it single-threaded, so the API is
//! `&mut` and lock-free.

mod queue;
mod sync_conditional;

pub use queue::{QueueId, QueueKind, SlotId, SlotPool};
pub use sync_conditional::{Conditional, StepLink};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// The slot already belongs to a queue.
    #[error("slot is already queued")]
    AlreadyQueued,
    /// A dequeue observed a queue of a different kind than the caller
    /// expected.
    #[error("expected a {expected:?} queue, found {actual:?}")]
    WrongQueueKind {
        expected: QueueKind,
        actual: QueueKind,
    },
}
