//! The per-pulse lifecycle of a light material node: authoritative pulse,
//! jet, and roster state, sealed drops, the record and lifeline stores, the
//! filament cache, replication to heavy storage, and the pulse manager
//! driving a tick end to end.

mod components;
mod coordinator;
mod drops;
mod filament;
mod genesis;
mod handler;
mod hot;
mod index;
mod jet;
mod message;
mod node;
mod pulse;
mod pulse_manager;
mod record;
mod replication;

pub use components::LightComponents;
pub use coordinator::JetCoordinator;
pub use drops::{DropDb, DropMemory, DropStorage};
pub use filament::FilamentCache;
pub use genesis::bootstrap;
pub use handler::MessageHandler;
pub use hot::HotDataWaiter;
pub use index::{IndexEntry, IndexStorage, Lifeline, DEFAULT_INDEX_TTL};
pub use jet::JetStorage;
pub use message::MessageStore;
pub use node::NodeStorage;
pub use pulse::{PulseEntry, PulseStorage};
pub use pulse_manager::{
    ActiveListSwapper, JetInfo, NodeNetwork, NoopSwapper, PulseManager, PulseManagerDeps,
    PulseManagerOptions, RandomSplitPolicy, SplitPolicy, StaticNetwork,
};
pub use record::{RecordDb, RecordMemory, RecordStorage};
pub use replication::SyncPool;

use models::{Id, JetId, PulseNumber};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key, record, pulse, or drop absent. Often non-fatal.
    #[error("not found")]
    NotFound,
    /// A write-once value already holds different content.
    #[error("override of immutable value")]
    Override,
    /// Appended pulse is not ahead of the latest pulse.
    #[error("pulse {0} is not ahead of the latest pulse")]
    BadPulse(PulseNumber),
    /// The roster has no node fitting the requested role.
    #[error("no nodes for pulse {0}")]
    NoNodes(PulseNumber),
    /// The jet is not a leaf of the pulse's prefix tree.
    #[error("jet {0} not found at pulse {1}")]
    JetNotFound(JetId, PulseNumber),
    /// The object is unknown to this light node.
    #[error("lifeline not found for object {0}")]
    LifelineNotFound(Id),
    /// The request predates the tail of the pending chain.
    #[error("request from the past")]
    RequestFromThePast,
    /// The result references a request pulse with no open requests.
    #[error("result for unknown request")]
    ResultForUnknownRequest,
    /// A filament segment received from a peer is unusable.
    #[error("broken filament chain: {0}")]
    BrokenFilament(&'static str),
    /// Hot-data unlock of a jet nobody is set to wait on.
    #[error("hot data waiter is not locked for jet {0}")]
    WaiterNotLocked(JetId),
    /// Hot data never arrived for the jet before the pulse moved on.
    #[error("hot data timed out for jet {0}")]
    WaiterTimeout(JetId),
    /// Operation after `stop`.
    #[error("pulse manager is stopped")]
    Stopped,
    #[error(transparent)]
    Storage(store::Error),
    #[error(transparent)]
    Bus(#[from] bus::Error),
    #[error(transparent)]
    Wire(#[from] models::wire::Error),
}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Error {
        match err {
            store::Error::NotFound => Error::NotFound,
            store::Error::Override => Error::Override,
            other => Error::Storage(other),
        }
    }
}
