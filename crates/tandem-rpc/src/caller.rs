//! Outbound stubs.

use crate::error::Result;
use crate::mediator::Mediator;
use crate::serializer::Serializer;
use crate::service::{Args, ServiceInterface};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tandem_transport::ClientContext;

/// Invoke-by-name entry point bound to one proxied service and, on the
/// server, to the client it targets.
pub struct ServiceCaller<S: Serializer> {
    mediator: Arc<Mediator<S>>,
    service: &'static str,
    context: Option<ClientContext>,
}

impl<S: Serializer> Clone for ServiceCaller<S> {
    fn clone(&self) -> Self {
        Self {
            mediator: self.mediator.clone(),
            service: self.service,
            context: self.context.clone(),
        }
    }
}

impl<S: Serializer> ServiceCaller<S> {
    pub(crate) fn new(
        mediator: Arc<Mediator<S>>,
        service: &'static str,
        context: Option<ClientContext>,
    ) -> Self {
        Self {
            mediator,
            service,
            context,
        }
    }

    pub async fn call<A, R>(&self, method: &str, args: A) -> Result<R>
    where
        A: Args,
        R: DeserializeOwned,
    {
        self.mediator
            .execute(self.context.as_ref(), self.service, method, args)
            .await
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    /// The client this caller targets, on the server.
    pub fn context(&self) -> Option<&ClientContext> {
        self.context.as_ref()
    }
}

/// A typed stub for interface `Interface`, usually generated by
/// [`service!`](crate::service).
pub trait Proxy<S: Serializer>: Sized {
    type Interface: ServiceInterface + ?Sized;

    fn from_caller(caller: ServiceCaller<S>) -> Self;
}
