//! Callback seams between a transport and the layer above it.
//!
//! Each transport has exactly one handler, installed with `set_handler`
//! before `connect`/`start`. The transport keeps only a weak reference, so
//! the handler may own the transport without forming a cycle.
//!
//! Responses are delivered from the connection's reader task; requests are
//! delivered one at a time, in arrival order, from a separate dispatch task.
//! Keep-alive frames never reach a handler.

use crate::context::ClientContext;
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use tandem_protocol::RpcMessage;

#[async_trait]
pub trait ClientEventHandler: Send + Sync + 'static {
    /// The connection is open; called before any message is delivered.
    async fn on_connected(&self) {}

    async fn on_message(&self, message: RpcMessage);

    /// Called exactly once per connection, after the socket is released.
    async fn on_disconnected(&self) {}

    /// A transport failure that tore the connection down.
    fn on_error(&self, _error: &TransportError) {}
}

#[async_trait]
pub trait ServerEventHandler: Send + Sync + 'static {
    /// A socket was accepted; called before any of its messages is delivered.
    async fn on_client_connected(&self, _context: &ClientContext) {}

    async fn on_message(&self, message: RpcMessage, context: &ClientContext);

    /// Called exactly once per client, after its socket is released.
    async fn on_client_disconnected(&self, _context: &ClientContext) {}

    /// The listener is closed and every client has been disconnected.
    async fn on_shutdown(&self) {}

    /// A failure isolated to one client, or to the accept loop when `None`.
    fn on_error(&self, _error: &TransportError, _context: Option<&ClientContext>) {}
}

/// Outbound half of a transport, as seen by a dispatcher.
///
/// The client transport ignores `context`; the server transport requires it
/// and answers `SocketOffline` for a missing or unknown context.
#[async_trait]
pub trait OutboundLink: Send + Sync + 'static {
    async fn send_to(&self, message: RpcMessage, context: Option<&ClientContext>) -> Result<()>;
}
