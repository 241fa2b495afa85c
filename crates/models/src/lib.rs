mod config;
mod id;
mod jet;
mod jet_drop;
mod node;
mod payload;
mod pulse;
mod record;
pub mod wire;

pub use config::Config;
pub use id::{Id, Reference, HASH_SIZE};
pub use jet::{JetId, PREFIX_SIZE};
pub use jet_drop::JetDrop;
pub use node::{Node, NodeRef, NodeRole};
pub use payload::PayloadType;
pub use pulse::{Entropy, Pulse, PulseNumber, ENTROPY_SIZE};
pub use record::{
    Activate, Amend, Code, CompositeFilamentRecord, Deactivate, Genesis, Material, PendingFilament,
    Request, ResultRecord, Virtual,
};

/// Hash the canonical encoding of arbitrary bytes into a 28-byte digest.
/// This is the single content-addressing function of the ledger: record IDs,
/// drop content hashes, and coordinator weights all go through it.
pub fn hash_of(parts: &[&[u8]]) -> [u8; HASH_SIZE] {
    use sha2::{Digest, Sha224};

    let mut hasher = Sha224::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
