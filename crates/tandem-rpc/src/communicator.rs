//! Client and server endpoints: a transport wired to a mediator.

use crate::caller::{Proxy, ServiceCaller};
use crate::error::{Result, RpcError};
use crate::events::{CommunicationError, ConnectionEvent};
use crate::mediator::{Mediator, Side};
use crate::registry::{Binding, ServiceRegistry};
use crate::serializer::{JsonSerializer, Serializer};
use crate::service::ServiceInterface;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tandem_transport::{ClientContext, ClientTransport, OutboundLink, ServerTransport, TransportConfig};
use tokio::sync::broadcast;
use tracing::info;

/// Connects to one server and exchanges calls with it.
pub struct ClientCommunicator<S: Serializer = JsonSerializer> {
    transport: ClientTransport,
    mediator: Arc<Mediator<S>>,
}

impl<S: Serializer> ClientCommunicator<S> {
    pub(crate) fn new(
        serializer: S,
        config: TransportConfig,
        bindings: HashMap<&'static str, Binding<S>>,
    ) -> Self {
        let transport = ClientTransport::new(config);
        let link: Arc<dyn OutboundLink> = Arc::new(transport.clone());
        let mediator = Arc::new(Mediator::new(
            Side::Client,
            Arc::new(serializer),
            ServiceRegistry::for_client(bindings),
            link,
        ));
        transport.set_handler(&mediator);
        Self {
            transport,
            mediator,
        }
    }

    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        self.transport.connect(host, port).await?;
        info!(host, port, "client communicator connected");
        Ok(())
    }

    /// Close the connection. Pending calls fail with
    /// [`RpcError::MessageAwaitingCancelled`].
    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Typed stub for a service registered with `register_proxy`.
    pub fn proxy<P: Proxy<S>>(&self) -> Result<P> {
        self.mediator.check_proxy::<P::Interface>()?;
        Ok(P::from_caller(ServiceCaller::new(
            self.mediator.clone(),
            <P::Interface as ServiceInterface>::NAME,
            None,
        )))
    }

    /// The local instance answering calls to `I`.
    pub fn listener<I: ServiceInterface + ?Sized>(&self) -> Result<Arc<I>> {
        self.mediator.listener::<I>(None)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.mediator.subscribe_events()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<CommunicationError> {
        self.mediator.subscribe_errors()
    }

    pub fn mediator(&self) -> &Arc<Mediator<S>> {
        &self.mediator
    }
}

/// Accepts clients and exchanges calls with each of them.
pub struct ServerCommunicator<S: Serializer = JsonSerializer> {
    transport: ServerTransport,
    mediator: Arc<Mediator<S>>,
}

impl<S: Serializer> ServerCommunicator<S> {
    pub(crate) fn new(
        serializer: S,
        config: TransportConfig,
        bindings: HashMap<&'static str, Binding<S>>,
    ) -> Self {
        let transport = ServerTransport::new(config);
        let link: Arc<dyn OutboundLink> = Arc::new(transport.clone());
        let mediator = Arc::new(Mediator::new(
            Side::Server,
            Arc::new(serializer),
            ServiceRegistry::for_server(bindings),
            link,
        ));
        transport.set_handler(&mediator);
        Self {
            transport,
            mediator,
        }
    }

    /// Start listening. Port 0 picks a free port; the bound address is returned.
    pub async fn start(&self, host: &str, port: u16) -> Result<SocketAddr> {
        Ok(self.transport.start(host, port).await?)
    }

    /// Disconnect every client and stop listening.
    pub async fn stop(&self) {
        self.transport.stop().await;
    }

    pub fn is_listening(&self) -> bool {
        self.transport.is_listening()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn connected_clients(&self) -> Vec<ClientContext> {
        self.transport.connected_clients()
    }

    pub async fn disconnect_client(&self, context: &ClientContext) -> bool {
        self.transport.disconnect_client(context).await
    }

    /// Typed stub calling back into the client `context`.
    pub fn proxy<P: Proxy<S>>(&self, context: &ClientContext) -> Result<P> {
        self.mediator.check_proxy::<P::Interface>()?;
        if !self.connected_clients().contains(context) {
            return Err(RpcError::UnknownClientContext(context.clone()));
        }
        Ok(P::from_caller(ServiceCaller::new(
            self.mediator.clone(),
            <P::Interface as ServiceInterface>::NAME,
            Some(context.clone()),
        )))
    }

    /// The instance answering `I` calls from `context`.
    pub fn listener<I: ServiceInterface + ?Sized>(&self, context: &ClientContext) -> Result<Arc<I>> {
        self.mediator.listener::<I>(Some(context))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.mediator.subscribe_events()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<CommunicationError> {
        self.mediator.subscribe_errors()
    }

    pub fn mediator(&self) -> &Arc<Mediator<S>> {
        &self.mediator
    }
}
