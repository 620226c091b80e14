//! Request id → response handler mapping for one connection.

use retouch_common::error::TransportError;
use retouch_common::protocol::ResponseEnvelope;
use std::collections::HashMap;

/// What a registered handler gets told about its request.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    /// An envelope carrying this request's id. A terminal status is the last one delivered.
    Update(ResponseEnvelope),
    /// The request will never get a terminal envelope.
    Failed(TransportError),
}

pub type ResponseHandler = Box<dyn FnMut(ResponseEvent) + Send>;

/// Handlers live here between `send` and their terminal envelope.
///
/// A handler is removed before it sees a terminal status, so it runs at most
/// once for `complete`/`error` and a late duplicate finds nothing.
#[derive(Default)]
pub struct PendingRequests {
    handlers: HashMap<u64, ResponseHandler>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handler previously registered under `id`, if any.
    pub fn register(&mut self, id: u64, handler: ResponseHandler) -> Option<ResponseHandler> {
        self.handlers.insert(id, handler)
    }

    pub fn remove(&mut self, id: u64) -> bool {
        self.handlers.remove(&id).is_some()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.handlers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Routes `envelope` to its handler.
    pub fn dispatch(&mut self, envelope: ResponseEnvelope) -> Result<(), TransportError> {
        let id = envelope.id;
        let mut handler = self
            .handlers
            .remove(&id)
            .ok_or(TransportError::UnknownRequest(id))?;

        let terminal = envelope.status.is_terminal();
        handler(ResponseEvent::Update(envelope));
        if !terminal {
            self.handlers.insert(id, handler);
        }
        Ok(())
    }

    /// Fails every outstanding request with `err` and empties the map.
    pub fn fail_all(&mut self, err: TransportError) -> usize {
        let count = self.handlers.len();
        for (_, mut handler) in self.handlers.drain() {
            handler(ResponseEvent::Failed(err.clone()));
        }
        count
    }
}
