mod local;
mod payload;

pub use local::LocalBus;
pub use payload::{HotIndex, Payload, PendingRequests, ReplicaEntry};

use models::{NodeRef, Pulse};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The peer answered with a payload type the caller cannot accept.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(&'static str),
    /// The peer answered with an `Error` payload.
    #[error("remote error: {0}")]
    Remote(String),
    /// No node is listening at the requested target.
    #[error("no route to {0}")]
    NoRoute(NodeRef),
    /// The transport gave up before a reply arrived.
    #[error("no reply")]
    NoReply,
}

/// The message bus the ledger core sends through. The gossip transport
/// behind it is out of scope; implementations route a payload to a node and
/// block the caller until the reply or a transport-level error.
#[async_trait::async_trait]
pub trait Sender: Send + Sync {
    /// Send to every listening node, returning the first non-`Ok` reply or
    /// `Ok`. Used for notifications that any interested node may consume.
    async fn send(&self, payload: Payload) -> Result<Payload, Error>;

    /// Send to one node and await its reply.
    async fn send_to(&self, target: NodeRef, payload: Payload) -> Result<Payload, Error>;

    /// Observe a pulse rotation. Transports re-route in-flight traffic here;
    /// the default does nothing.
    async fn on_pulse(&self, pulse: Pulse) -> Result<(), Error> {
        let _ = pulse;
        Ok(())
    }
}

/// Reduce a reply to success or failure: `Ok` passes, `Error` carries the
/// peer's text, anything else is an unexpected reply.
pub fn expect_ok(reply: Payload) -> Result<(), Error> {
    match reply {
        Payload::Ok => Ok(()),
        Payload::Error { text } => Err(Error::Remote(text)),
        other => Err(Error::UnexpectedReply(other.kind())),
    }
}
