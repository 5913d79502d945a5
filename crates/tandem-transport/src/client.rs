//! Client side: one outbound connection at a time.

use crate::config::TransportConfig;
use crate::connection::{run_reader, spawn_keep_alive, Connection, Inbound};
use crate::context::ClientContext;
use crate::error::{Result, TransportError};
use crate::handler::{ClientEventHandler, OutboundLink};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tandem_protocol::RpcMessage;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

enum ClientState {
    Idle,
    Connecting,
    Connected(Connection),
    Disconnecting,
}

/// Outbound TCP transport.
///
/// Cloning yields another handle to the same transport.
#[derive(Clone)]
pub struct ClientTransport {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: TransportConfig,
    handler: RwLock<Option<Weak<dyn ClientEventHandler>>>,
    state: Mutex<ClientState>,
    // Serializes connect/disconnect/teardown against each other.
    lifecycle: tokio::sync::Mutex<()>,
}

impl ClientTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                handler: RwLock::new(None),
                state: Mutex::new(ClientState::Idle),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Install the event handler. Only a weak reference is kept.
    pub fn set_handler<H: ClientEventHandler>(&self, handler: &Arc<H>) {
        let weak: Weak<H> = Arc::downgrade(handler);
        let weak: Weak<dyn ClientEventHandler> = weak;
        *self.inner.handler.write() = Some(weak);
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.inner.state.lock(), ClientState::Connected(_))
    }

    /// Open a connection and start its reader and keep-alive tasks.
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let handler = self.inner.handler().ok_or(TransportError::HandlerNotSet)?;
        {
            let mut state = self.inner.state.lock();
            if !matches!(*state, ClientState::Idle) {
                return Err(TransportError::AlreadyConnected);
            }
            *state = ClientState::Connecting;
        }

        let addr = format!("{host}:{port}");
        let stream = match self.open(&addr).await {
            Ok(stream) => stream,
            Err(e) => {
                *self.inner.state.lock() = ClientState::Idle;
                return Err(e);
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let connection = Connection::new(writer, self.inner.config.max_frame_len);
        *self.inner.state.lock() = ClientState::Connected(connection.clone());
        info!(addr = %addr, connection = connection.id(), "connected");

        handler.on_connected().await;
        spawn_keep_alive(connection.clone(), self.inner.config.keep_alive_interval());

        let inbound: Arc<dyn Inbound> = Arc::new(ClientInbound {
            handler: Arc::downgrade(&handler),
        });
        let weak = Arc::downgrade(&self.inner);
        let config = self.inner.config.clone();
        tokio::spawn(async move {
            let result = run_reader(reader, &config, connection.cancel_token().clone(), inbound).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(()) => debug!(connection = connection.id(), "reader finished"),
                Err(e) if connection.is_closed() => {
                    debug!(connection = connection.id(), error = %e, "error after disconnect suppressed");
                }
                Err(e) => {
                    warn!(connection = connection.id(), error = %e, "connection failed");
                    if let Some(handler) = inner.handler() {
                        handler.on_error(&e);
                    }
                }
            }
            let _lifecycle = inner.lifecycle.lock().await;
            inner.close_connection(Some(connection.id())).await;
        });

        Ok(())
    }

    async fn open(&self, addr: &str) -> Result<TcpStream> {
        let timeout = self.inner.config.connect_timeout();
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(TransportError::Connect {
                addr: addr.to_string(),
                source,
            }),
            Err(_) => Err(TransportError::ConnectTimeout {
                addr: addr.to_string(),
                timeout,
            }),
        }
    }

    /// Write one frame to the server.
    pub async fn send(&self, message: RpcMessage) -> Result<()> {
        let connection = match &*self.inner.state.lock() {
            ClientState::Connected(connection) => connection.clone(),
            _ => return Err(TransportError::SocketOffline),
        };
        connection.send(&message).await
    }

    /// Close the connection. A no-op when not connected.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.close_connection(None).await;
    }
}

impl ClientInner {
    fn handler(&self) -> Option<Arc<dyn ClientEventHandler>> {
        self.handler.read().as_ref().and_then(Weak::upgrade)
    }

    /// Tear down the current connection, or only connection `expected`.
    async fn close_connection(&self, expected: Option<u64>) {
        let connection = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, ClientState::Disconnecting) {
                ClientState::Connected(connection)
                    if expected.map_or(true, |id| id == connection.id()) =>
                {
                    connection
                }
                other => {
                    *state = other;
                    return;
                }
            }
        };

        connection.close().await;
        *self.state.lock() = ClientState::Idle;
        info!(connection = connection.id(), "disconnected");

        if let Some(handler) = self.handler() {
            handler.on_disconnected().await;
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let ClientState::Connected(connection) = self.state.get_mut() {
            connection.cancel_token().cancel();
        }
    }
}

#[async_trait]
impl OutboundLink for ClientTransport {
    async fn send_to(&self, message: RpcMessage, _context: Option<&ClientContext>) -> Result<()> {
        self.send(message).await
    }
}

struct ClientInbound {
    handler: Weak<dyn ClientEventHandler>,
}

#[async_trait]
impl Inbound for ClientInbound {
    async fn deliver(&self, message: RpcMessage) {
        if let Some(handler) = self.handler.upgrade() {
            handler.on_message(message).await;
        }
    }
}
