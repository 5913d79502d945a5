//! The mediator turns calls into request frames and request frames into
//! calls.
//!
//! One mediator sits between a transport and the service registry. Outbound,
//! [`Mediator::execute`] encodes the arguments, registers an awaiter and
//! waits for the correlated response. Inbound, it is the transport's event
//! handler: requests are dispatched to listener instances and answered with
//! the same message id, responses fulfil awaiters, and connection events
//! maintain the per-client awaiter partitions and listener containers.

use crate::awaiter::{AwaiterRegistry, AwaiterRoot};
use crate::error::{Result, RpcError};
use crate::events::{CommunicationError, ConnectionEvent};
use crate::registry::ServiceRegistry;
use crate::serializer::{SerializationError, Serializer};
use crate::service::{Args, ServiceInterface, ServiceRole};
use async_trait::async_trait;
use futures::FutureExt;
use serde::de::value::UnitDeserializer;
use serde::de::{DeserializeOwned, IntoDeserializer};
use serde::Deserialize;
use std::any::{type_name, Any};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tandem_protocol::{MessageId, Request, Response, RpcMessage};
use tandem_transport::{
    ClientContext, ClientEventHandler, OutboundLink, ServerEventHandler, TransportError,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};

const EVENT_CAPACITY: usize = 64;

/// Which end of the connection a mediator serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

pub struct Mediator<S: Serializer> {
    side: Side,
    serializer: Arc<S>,
    registry: ServiceRegistry<S>,
    awaiters: AwaiterRoot,
    link: Arc<dyn OutboundLink>,
    events: broadcast::Sender<ConnectionEvent>,
    errors: broadcast::Sender<CommunicationError>,
}

impl<S: Serializer> Mediator<S> {
    pub(crate) fn new(
        side: Side,
        serializer: Arc<S>,
        registry: ServiceRegistry<S>,
        link: Arc<dyn OutboundLink>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (errors, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            side,
            serializer,
            registry,
            awaiters: AwaiterRoot::default(),
            link,
            events,
            errors,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Call `service.method` on the peer and wait for its result.
    ///
    /// On the server `context` selects the client to call; on the client it
    /// is ignored. Fails with [`RpcError::Remote`] when the callee faulted and
    /// with [`RpcError::MessageAwaitingCancelled`] when the connection closed
    /// first. No timeout is applied.
    pub async fn execute<A, R>(
        &self,
        context: Option<&ClientContext>,
        service: &str,
        method: &str,
        args: A,
    ) -> Result<R>
    where
        A: Args,
        R: DeserializeOwned,
    {
        let binding = self.registry.binding(service, ServiceRole::Proxy)?;
        let entry = binding.method(method)?;
        if entry.signature.arity() != A::ARITY {
            return Err(RpcError::ArgumentCountMismatch {
                service: service.to_string(),
                method: method.to_string(),
                expected: entry.signature.arity(),
                actual: A::ARITY,
            });
        }
        if entry.signature.returns != type_name::<R>() {
            return Err(RpcError::ReturnTypeMismatch {
                service: service.to_string(),
                method: method.to_string(),
                expected: entry.signature.returns.to_string(),
                actual: type_name::<R>().to_string(),
            });
        }
        let buffers = args.encode(&*self.serializer)?;

        let awaiters = self.awaiters_for(context)?;
        let message_id = MessageId::new();
        let pending = awaiters.create(message_id)?;
        let request = Request::new(service, method, message_id, buffers);

        debug!(service, method, message_id = %message_id, "sending request");
        self.link.send_to(request.into(), context).await?;
        let response = pending.await_response().await?;

        if let Some(fault) = response.fault {
            debug!(service, method, message_id = %message_id, fault = %fault, "call faulted");
            return Err(RpcError::Remote(fault));
        }
        self.decode_return(response.payload)
    }

    fn awaiters_for(&self, context: Option<&ClientContext>) -> Result<Arc<AwaiterRegistry>> {
        match (self.side, context) {
            (Side::Client, _) => Ok(self.awaiters.local().clone()),
            (Side::Server, None) => Err(RpcError::ContextRequired),
            (Side::Server, Some(context)) => self.awaiters.for_client(context),
        }
    }

    fn decode_return<R: DeserializeOwned>(&self, payload: Option<Vec<u8>>) -> Result<R> {
        match payload {
            Some(bytes) => Ok(self.serializer.deserialize(&bytes, type_name::<R>())?),
            None => {
                let absent: UnitDeserializer<serde::de::value::Error> = ().into_deserializer();
                <R as Deserialize>::deserialize(absent)
                    .map_err(|e| SerializationError::deserialize(type_name::<R>(), e).into())
            }
        }
    }

    /// Listener instance of `I` serving `context` (`None` on the client).
    pub fn listener<I: ServiceInterface + ?Sized>(
        &self,
        context: Option<&ClientContext>,
    ) -> Result<Arc<I>> {
        self.registry.listener::<I>(context)
    }

    /// Fails unless `I` is registered as a proxy.
    pub(crate) fn check_proxy<I: ServiceInterface + ?Sized>(&self) -> Result<()> {
        self.registry.typed_binding::<I>(ServiceRole::Proxy).map(|_| ())
    }

    /// Calls still waiting for a response from `context`, or locally.
    pub fn pending_calls(&self, context: Option<&ClientContext>) -> usize {
        self.awaiters_for(context)
            .map(|awaiters| awaiters.pending_count())
            .unwrap_or(0)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<CommunicationError> {
        self.errors.subscribe()
    }

    fn publish(&self, event: ConnectionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn report(&self, error: CommunicationError) {
        let _ = self.errors.send(error);
    }

    async fn handle_request(&self, mut request: Request, context: Option<&ClientContext>) {
        let args = std::mem::take(&mut request.args);
        let response = match self.invoke(&request, args, context).await {
            Ok(payload) => Response::success(&request, payload),
            Err(text) => Response::fault(&request, text),
        };

        match self.link.send_to(response.into(), context).await {
            Ok(()) => {}
            Err(TransportError::SocketOffline) => {
                debug!(
                    service = %request.service_name,
                    method = %request.method_name,
                    message_id = %request.message_id,
                    "peer gone, response discarded"
                );
            }
            Err(e) => {
                warn!(message_id = %request.message_id, error = %e, "failed to send response");
                self.report(CommunicationError::from_transport(&e, context));
            }
        }
    }

    /// Run the listener method named by `request`. Every failure becomes
    /// fault text for the caller.
    async fn invoke(
        &self,
        request: &Request,
        args: Vec<Vec<u8>>,
        context: Option<&ClientContext>,
    ) -> std::result::Result<Option<Vec<u8>>, String> {
        let resolved = self
            .registry
            .binding(&request.service_name, ServiceRole::Listener)
            .and_then(|binding| {
                let entry = binding.method(&request.method_name)?;
                if entry.signature.arity() != args.len() {
                    return Err(RpcError::ArgumentCountMismatch {
                        service: request.service_name.clone(),
                        method: request.method_name.clone(),
                        expected: entry.signature.arity(),
                        actual: args.len(),
                    });
                }
                let instance = self.registry.instance(binding.name(), context)?;
                Ok((entry.invoker.clone(), instance))
            });
        let (invoker, instance) = resolved.map_err(|e| {
            warn!(
                service = %request.service_name,
                method = %request.method_name,
                error = %e,
                "cannot dispatch request"
            );
            e.to_string()
        })?;

        let call = invoker(instance, args, self.serializer.clone());
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let text = panic_message(panic.as_ref());
                warn!(
                    service = %request.service_name,
                    method = %request.method_name,
                    panic = %text,
                    "listener panicked"
                );
                Err(text)
            }
        }
    }

    fn handle_response(&self, awaiters: &AwaiterRegistry, response: Response) {
        let message_id = response.message_id;
        if !awaiters.fulfill(response) {
            warn!(message_id = %message_id, "response matches no pending call, dropped");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "listener panicked".to_string()
    }
}

#[async_trait]
impl<S: Serializer> ClientEventHandler for Mediator<S> {
    async fn on_connected(&self) {
        self.publish(ConnectionEvent::Connected);
    }

    async fn on_message(&self, message: RpcMessage) {
        match message {
            RpcMessage::Request(request) => self.handle_request(request, None).await,
            RpcMessage::Response(response) => self.handle_response(self.awaiters.local(), response),
            RpcMessage::KeepAlive => {}
        }
    }

    async fn on_disconnected(&self) {
        self.awaiters.local().abort_all();
        self.publish(ConnectionEvent::Disconnected);
    }

    fn on_error(&self, error: &TransportError) {
        self.report(CommunicationError::from_transport(error, None));
    }
}

#[async_trait]
impl<S: Serializer> ServerEventHandler for Mediator<S> {
    async fn on_client_connected(&self, context: &ClientContext) {
        self.awaiters.register_client(context);
        self.registry.attach_client(context);
        self.publish(ConnectionEvent::ClientConnected(context.clone()));
    }

    async fn on_message(&self, message: RpcMessage, context: &ClientContext) {
        match message {
            RpcMessage::Request(request) => self.handle_request(request, Some(context)).await,
            RpcMessage::Response(response) => match self.awaiters.for_client(context) {
                Ok(awaiters) => self.handle_response(&awaiters, response),
                Err(_) => debug!(client = %context, "response after disconnect dropped"),
            },
            RpcMessage::KeepAlive => {}
        }
    }

    async fn on_client_disconnected(&self, context: &ClientContext) {
        self.awaiters.remove_client(context);
        self.registry.detach_client(context);
        self.publish(ConnectionEvent::ClientDisconnected(context.clone()));
    }

    async fn on_shutdown(&self) {
        self.awaiters.abort_everything();
        self.publish(ConnectionEvent::ServerStopped);
    }

    fn on_error(&self, error: &TransportError, context: Option<&ClientContext>) {
        self.report(CommunicationError::from_transport(error, context));
    }
}
