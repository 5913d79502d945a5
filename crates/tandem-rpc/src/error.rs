use crate::serializer::SerializationError;
use tandem_protocol::{MessageId, RemoteFault};
use tandem_transport::{ClientContext, TransportError};

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("method {service}.{method} not found")]
    MethodNotFound { service: String, method: String },

    #[error("service {0} is not registered")]
    ServiceNotFound(String),

    /// The service exists but was requested in a role it was not registered
    /// for, or as a different interface type.
    #[error("service {name} is not registered as {expected}")]
    InvalidServiceType { name: String, expected: String },

    #[error("{service}.{method} takes {expected} arguments, got {actual}")]
    ArgumentCountMismatch {
        service: String,
        method: String,
        expected: usize,
        actual: usize,
    },

    /// The caller expects a different return type than the method declares.
    #[error("{service}.{method} returns {expected}, not {actual}")]
    ReturnTypeMismatch {
        service: String,
        method: String,
        expected: String,
        actual: String,
    },

    /// The callee failed; only its error text crossed the wire.
    #[error("remote call failed: {0}")]
    Remote(RemoteFault),

    /// The connection went away while the call was waiting for its response.
    #[error("awaiting the response was cancelled")]
    MessageAwaitingCancelled,

    #[error("message id {0} is already being awaited")]
    DuplicateMessageId(MessageId),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// Server-side calls must name the client they target.
    #[error("a client context is required for server-side calls")]
    ContextRequired,

    #[error("client {0} is not connected")]
    UnknownClientContext(ClientContext),

    #[error("service {0} is already registered")]
    DuplicateService(String),
}

impl RpcError {
    /// The remote error text, if the callee failed.
    pub fn remote_fault(&self) -> Option<&RemoteFault> {
        match self {
            RpcError::Remote(fault) => Some(fault),
            _ => None,
        }
    }
}
