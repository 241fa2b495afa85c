use crate::{Error, Payload, Sender};
use futures::future::BoxFuture;
use models::NodeRef;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Handler = Arc<dyn Fn(Payload) -> BoxFuture<'static, Result<Payload, Error>> + Send + Sync>;

/// In-process bus: routes payloads to handlers registered per node.
///
/// Used by tests and single-process deployments. `send` delivers to every
/// registered node in registration order and reports the first failure;
/// `send_to` requires the target to be registered.
#[derive(Clone, Default)]
pub struct LocalBus {
    handlers: Arc<Mutex<Vec<(NodeRef, Handler)>>>,
}

impl LocalBus {
    pub fn new() -> LocalBus {
        LocalBus::default()
    }

    /// Register (or replace) the handler receiving payloads for `node`.
    pub fn register<F>(&self, node: NodeRef, handler: F)
    where
        F: Fn(Payload) -> BoxFuture<'static, Result<Payload, Error>> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.lock().unwrap();
        handlers.retain(|(existing, _)| *existing != node);
        handlers.push((node, Arc::new(handler)));
    }

    fn handler(&self, node: &NodeRef) -> Option<Handler> {
        let handlers = self.handlers.lock().unwrap();
        handlers
            .iter()
            .find(|(existing, _)| existing == node)
            .map(|(_, handler)| handler.clone())
    }

    fn all(&self) -> Vec<Handler> {
        let handlers = self.handlers.lock().unwrap();
        handlers.iter().map(|(_, h)| h.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Sender for LocalBus {
    async fn send(&self, payload: Payload) -> Result<Payload, Error> {
        let handlers = self.all();
        if handlers.is_empty() {
            return Err(Error::NoReply);
        }

        let mut reply = Payload::Ok;
        for handler in handlers {
            reply = handler(payload.clone()).await?;
            if !matches!(reply, Payload::Ok) {
                return Ok(reply);
            }
        }
        Ok(reply)
    }

    async fn send_to(&self, target: NodeRef, payload: Payload) -> Result<Payload, Error> {
        let handler = self.handler(&target).ok_or(Error::NoRoute(target))?;
        handler(payload).await
    }
}
