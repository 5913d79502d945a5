//! Registration step producing a client or server communicator.
//!
//! ```rust,ignore
//! let server = CommunicatorBuilder::new()
//!     .with_config(config)
//!     .register_listener::<dyn Calculator, _>(SharedInstance::new(calculator))?
//!     .register_proxy::<dyn Notifier>()?
//!     .build_server();
//! let addr = server.start("127.0.0.1", 0).await?;
//! ```

use crate::communicator::{ClientCommunicator, ServerCommunicator};
use crate::error::{Result, RpcError};
use crate::registry::Binding;
use crate::serializer::{JsonSerializer, Serializer};
use crate::service::{DependencyResolver, ServiceInterface};
use std::collections::HashMap;
use tandem_transport::TransportConfig;

pub struct CommunicatorBuilder<S: Serializer = JsonSerializer> {
    serializer: S,
    config: TransportConfig,
    bindings: HashMap<&'static str, Binding<S>>,
}

impl CommunicatorBuilder<JsonSerializer> {
    pub fn new() -> Self {
        Self::with_serializer(JsonSerializer)
    }
}

impl Default for CommunicatorBuilder<JsonSerializer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Serializer> CommunicatorBuilder<S> {
    pub fn with_serializer(serializer: S) -> Self {
        Self {
            serializer,
            config: TransportConfig::default(),
            bindings: HashMap::new(),
        }
    }

    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Interface implemented by the peer and called from here.
    pub fn register_proxy<I: ServiceInterface + ?Sized>(self) -> Result<Self> {
        self.register(Binding::proxy::<I>())
    }

    /// Interface implemented here. `resolver` supplies the instance, once on
    /// the client and once per connected client on the server.
    pub fn register_listener<I, R>(self, resolver: R) -> Result<Self>
    where
        I: ServiceInterface + ?Sized,
        R: DependencyResolver<I>,
    {
        self.register(Binding::listener::<I, R>(resolver))
    }

    fn register(mut self, binding: Binding<S>) -> Result<Self> {
        let name = binding.name();
        if self.bindings.contains_key(name) {
            return Err(RpcError::DuplicateService(name.to_string()));
        }
        self.bindings.insert(name, binding);
        Ok(self)
    }

    pub fn build_client(self) -> ClientCommunicator<S> {
        ClientCommunicator::new(self.serializer, self.config, self.bindings)
    }

    pub fn build_server(self) -> ServerCommunicator<S> {
        ServerCommunicator::new(self.serializer, self.config, self.bindings)
    }
}
