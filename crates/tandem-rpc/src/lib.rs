//! Bidirectional typed RPC over one persistent TCP connection.
//!
//! Both ends of a connection can call each other. An interface is declared
//! once with [`service!`]; one side registers it as a listener (the
//! implementation) and the other as a proxy (the typed caller). Calls are
//! correlated by message id, so many may be in flight at once, and a callee
//! failure comes back as [`RpcError::Remote`] carrying only its error text.
//!
//! ```rust,ignore
//! tandem_rpc::service! {
//!     pub trait Calculator as "Calculator" {
//!         fn sum(&self, number1: i32, number2: i32) -> i32 as "Sum";
//!     }
//!     pub proxy CalculatorProxy;
//! }
//!
//! let server = CommunicatorBuilder::new()
//!     .register_listener::<dyn Calculator, _>(SharedInstance::new(calculator))?
//!     .build_server();
//! let addr = server.start("127.0.0.1", 0).await?;
//!
//! let client = CommunicatorBuilder::new()
//!     .register_proxy::<dyn Calculator>()?
//!     .build_client();
//! client.connect("127.0.0.1", addr.port()).await?;
//! let sum = client.proxy::<CalculatorProxy>()?.sum(123, 321).await?;
//! ```
//!
//! Requests from one peer are handled one at a time, in arrival order.
//! Calls have no timeout; wrap them in `tokio::time::timeout` if needed.

mod awaiter;
mod builder;
mod caller;
mod communicator;
mod error;
mod events;
mod macros;
mod mediator;
mod registry;
mod serializer;
mod service;

pub use awaiter::{AwaiterRegistry, PendingResponse};
pub use builder::CommunicatorBuilder;
pub use caller::{Proxy, ServiceCaller};
pub use communicator::{ClientCommunicator, ServerCommunicator};
pub use error::{Result, RpcError};
pub use events::{CommunicationError, ConnectionEvent};
pub use mediator::{Mediator, Side};
pub use serializer::{JsonSerializer, SerializationError, Serializer};
pub use service::{
    Args, DependencyResolver, MethodSignature, MethodTable, ServiceFault, ServiceInterface,
    ServiceRole, SharedInstance,
};

pub use tandem_protocol::{MessageId, RemoteFault};
pub use tandem_transport::{ClientContext, TransportConfig, TransportError};
