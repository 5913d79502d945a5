//! Correlation of outbound requests with their responses.
//!
//! Every in-flight call owns one entry keyed by its message id. `create` and
//! the returned [`PendingResponse`] own the key; `fulfill` and `abort_all`
//! only ever take entries out, so a response is delivered at most once and
//! an aborted caller wakes with [`RpcError::MessageAwaitingCancelled`].

use crate::error::{Result, RpcError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tandem_protocol::{MessageId, Response};
use tandem_transport::ClientContext;
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Default)]
struct AwaiterState {
    pending: HashMap<MessageId, oneshot::Sender<Response>>,
    closed: bool,
}

/// Pending calls of one connection.
#[derive(Default)]
pub struct AwaiterRegistry {
    state: Mutex<AwaiterState>,
}

impl AwaiterRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register interest in the response to `id`.
    pub fn create(self: &Arc<Self>, id: MessageId) -> Result<PendingResponse> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(RpcError::MessageAwaitingCancelled);
            }
            if state.pending.contains_key(&id) {
                return Err(RpcError::DuplicateMessageId(id));
            }
            state.pending.insert(id, tx);
        }
        Ok(PendingResponse {
            id,
            rx,
            registry: Arc::downgrade(self),
        })
    }

    /// Hand `response` to its caller. Returns false when nobody awaits it.
    pub fn fulfill(&self, response: Response) -> bool {
        let Some(tx) = self.state.lock().pending.remove(&response.message_id) else {
            return false;
        };
        // The caller may have given up between removal and send.
        tx.send(response).is_ok()
    }

    /// Wake every pending caller with a cancellation. Returns how many there were.
    pub fn abort_all(&self) -> usize {
        let aborted = std::mem::take(&mut self.state.lock().pending);
        if !aborted.is_empty() {
            debug!(count = aborted.len(), "aborting pending calls");
        }
        aborted.len()
    }

    /// Abort everything and refuse new entries.
    pub fn close(&self) -> usize {
        self.state.lock().closed = true;
        self.abort_all()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn remove(&self, id: &MessageId) {
        self.state.lock().pending.remove(id);
    }
}

/// Handle to one in-flight call. Dropping it unregisters the call.
pub struct PendingResponse {
    id: MessageId,
    rx: oneshot::Receiver<Response>,
    registry: Weak<AwaiterRegistry>,
}

impl PendingResponse {
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Wait until the response arrives or the registry is aborted.
    pub async fn await_response(mut self) -> Result<Response> {
        (&mut self.rx)
            .await
            .map_err(|_| RpcError::MessageAwaitingCancelled)
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id);
        }
    }
}

/// The local partition plus one partition per connected client.
#[derive(Default)]
pub(crate) struct AwaiterRoot {
    local: Arc<AwaiterRegistry>,
    clients: DashMap<ClientContext, Arc<AwaiterRegistry>>,
}

impl AwaiterRoot {
    pub(crate) fn local(&self) -> &Arc<AwaiterRegistry> {
        &self.local
    }

    pub(crate) fn register_client(&self, context: &ClientContext) {
        self.clients.insert(context.clone(), AwaiterRegistry::new());
    }

    /// Close and forget the partition of `context`.
    pub(crate) fn remove_client(&self, context: &ClientContext) -> usize {
        match self.clients.remove(context) {
            Some((_, registry)) => registry.close(),
            None => 0,
        }
    }

    pub(crate) fn for_client(&self, context: &ClientContext) -> Result<Arc<AwaiterRegistry>> {
        self.clients
            .get(context)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RpcError::UnknownClientContext(context.clone()))
    }

    /// Close every client partition and abort local calls.
    pub(crate) fn abort_everything(&self) -> usize {
        let contexts: Vec<ClientContext> =
            self.clients.iter().map(|entry| entry.key().clone()).collect();
        let from_clients: usize = contexts.iter().map(|c| self.remove_client(c)).sum();
        from_clients + self.local.abort_all()
    }
}
