//! Server side: a listener plus one connection per accepted client.

use crate::config::TransportConfig;
use crate::connection::{run_reader, spawn_keep_alive, Connection, Inbound};
use crate::context::ClientContext;
use crate::error::{Result, TransportError};
use crate::handler::{OutboundLink, ServerEventHandler};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tandem_protocol::RpcMessage;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

enum ServerState {
    Idle,
    Listening {
        local_addr: SocketAddr,
        cancel: CancellationToken,
        accept_task: JoinHandle<()>,
    },
    Stopping,
}

/// Listening TCP transport.
///
/// Cloning yields another handle to the same transport.
#[derive(Clone)]
pub struct ServerTransport {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: TransportConfig,
    handler: RwLock<Option<Weak<dyn ServerEventHandler>>>,
    state: Mutex<ServerState>,
    // Serializes start/stop against each other.
    lifecycle: tokio::sync::Mutex<()>,
    stopping: AtomicBool,
    clients: DashMap<ClientContext, Connection>,
}

impl ServerTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config,
                handler: RwLock::new(None),
                state: Mutex::new(ServerState::Idle),
                lifecycle: tokio::sync::Mutex::new(()),
                stopping: AtomicBool::new(false),
                clients: DashMap::new(),
            }),
        }
    }

    /// Install the event handler. Only a weak reference is kept.
    pub fn set_handler<H: ServerEventHandler>(&self, handler: &Arc<H>) {
        let weak: Weak<H> = Arc::downgrade(handler);
        let weak: Weak<dyn ServerEventHandler> = weak;
        *self.inner.handler.write() = Some(weak);
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn is_listening(&self) -> bool {
        matches!(*self.inner.state.lock(), ServerState::Listening { .. })
    }

    /// Bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.inner.state.lock() {
            ServerState::Listening { local_addr, .. } => Some(*local_addr),
            _ => None,
        }
    }

    pub fn connected_clients(&self) -> Vec<ClientContext> {
        self.inner
            .clients
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Bind and start accepting clients. Returns the bound address, which
    /// differs from the requested one when `port` is 0.
    pub async fn start(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let handler = self.inner.handler().ok_or(TransportError::HandlerNotSet)?;
        let idle = matches!(*self.inner.state.lock(), ServerState::Idle);
        if !idle {
            return Err(TransportError::AlreadyInUse);
        }

        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            Arc::downgrade(&self.inner),
            Arc::downgrade(&handler),
            listener,
            cancel.clone(),
        ));
        *self.inner.state.lock() = ServerState::Listening {
            local_addr,
            cancel,
            accept_task,
        };

        info!("Server listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Write one frame to `context`'s socket.
    pub async fn send(&self, message: RpcMessage, context: &ClientContext) -> Result<()> {
        let connection = self
            .inner
            .clients
            .get(context)
            .map(|entry| entry.value().clone())
            .ok_or(TransportError::SocketOffline)?;
        connection.send(&message).await
    }

    /// Close one client's socket. Returns false if it was not connected.
    pub async fn disconnect_client(&self, context: &ClientContext) -> bool {
        self.inner.disconnect_client(context).await
    }

    /// Stop accepting, disconnect every client, and release the listener.
    /// A no-op when not listening or when another stop is in progress.
    pub async fn stop(&self) {
        if self.inner.stopping.swap(true, Ordering::AcqRel) {
            debug!("stop already in progress");
            return;
        }
        let _lifecycle = self.inner.lifecycle.lock().await;

        let listening = {
            let mut state = self.inner.state.lock();
            match std::mem::replace(&mut *state, ServerState::Stopping) {
                ServerState::Listening {
                    local_addr,
                    cancel,
                    accept_task,
                } => Some((local_addr, cancel, accept_task)),
                other => {
                    *state = other;
                    None
                }
            }
        };
        let Some((local_addr, cancel, accept_task)) = listening else {
            self.inner.stopping.store(false, Ordering::Release);
            return;
        };

        cancel.cancel();
        if let Err(e) = accept_task.await {
            warn!(error = %e, "accept loop ended abnormally");
        }

        for context in self.connected_clients() {
            self.inner.disconnect_client(&context).await;
        }

        *self.inner.state.lock() = ServerState::Idle;
        info!("Server on {} stopped", local_addr);

        if let Some(handler) = self.inner.handler() {
            handler.on_shutdown().await;
        }
        self.inner.stopping.store(false, Ordering::Release);
    }
}

impl ServerInner {
    fn handler(&self) -> Option<Arc<dyn ServerEventHandler>> {
        self.handler.read().as_ref().and_then(Weak::upgrade)
    }

    async fn admit(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let Some(handler) = self.handler() else {
            debug!(%peer, "no handler, dropping connection");
            return;
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }

        let context = ClientContext::new();
        let (reader, writer) = stream.into_split();
        let connection = Connection::new(writer, self.config.max_frame_len);
        self.clients.insert(context.clone(), connection.clone());
        info!(client = %context, %peer, "client connected");

        handler.on_client_connected(&context).await;
        spawn_keep_alive(connection.clone(), self.config.keep_alive_interval());

        let inbound: Arc<dyn Inbound> = Arc::new(ServerInbound {
            handler: Arc::downgrade(&handler),
            context: context.clone(),
        });
        let weak = Arc::downgrade(self);
        let config = self.config.clone();
        tokio::spawn(async move {
            let result = run_reader(reader, &config, connection.cancel_token().clone(), inbound).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(()) => debug!(client = %context, "client reader finished"),
                Err(e) if connection.is_closed() => {
                    debug!(client = %context, error = %e, "error after disconnect suppressed");
                }
                Err(e) => {
                    warn!(client = %context, error = %e, "client connection failed");
                    if let Some(handler) = inner.handler() {
                        handler.on_error(&e, Some(&context));
                    }
                }
            }
            inner.disconnect_client(&context).await;
        });
    }

    async fn disconnect_client(&self, context: &ClientContext) -> bool {
        // Removal is the single point of ownership transfer; whoever takes
        // the entry performs the teardown.
        let Some((context, connection)) = self.clients.remove(context) else {
            return false;
        };
        connection.close().await;
        info!(client = %context, "client disconnected");

        if let Some(handler) = self.handler() {
            handler.on_client_disconnected(&context).await;
        }
        true
    }
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        if let ServerState::Listening { cancel, .. } = self.state.get_mut() {
            cancel.cancel();
        }
        for entry in self.clients.iter() {
            entry.value().cancel_token().cancel();
        }
    }
}

async fn accept_loop(
    weak: Weak<ServerInner>,
    handler: Weak<dyn ServerEventHandler>,
    listener: TcpListener,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let Some(inner) = weak.upgrade() else {
            break;
        };
        match accepted {
            Ok((stream, peer)) => inner.admit(stream, peer).await,
            Err(e) => {
                error!(error = %e, "accept failed");
                if let Some(handler) = handler.upgrade() {
                    handler.on_error(&TransportError::Io(e), None);
                }
            }
        }
    }
    debug!("accept loop stopped");
}

#[async_trait]
impl OutboundLink for ServerTransport {
    async fn send_to(&self, message: RpcMessage, context: Option<&ClientContext>) -> Result<()> {
        match context {
            Some(context) => self.send(message, context).await,
            None => Err(TransportError::SocketOffline),
        }
    }
}

struct ServerInbound {
    handler: Weak<dyn ServerEventHandler>,
    context: ClientContext,
}

#[async_trait]
impl Inbound for ServerInbound {
    async fn deliver(&self, message: RpcMessage) {
        if let Some(handler) = self.handler.upgrade() {
            handler.on_message(message, &self.context).await;
        }
    }
}
