use std::time::Duration;
use tandem_protocol::FramingError;

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Transport layer errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// `connect` called while a connection is open or in progress.
    #[error("client transport is already connected")]
    AlreadyConnected,

    /// `start` called on a server that is already listening.
    #[error("server transport is already in use")]
    AlreadyInUse,

    /// The connection is gone, or the client context is not registered.
    #[error("socket is offline")]
    SocketOffline,

    /// `connect`/`start` called before `set_handler`, or the handler was dropped.
    #[error("no event handler installed")]
    HandlerNotSet,

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connecting to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// Nothing arrived from the peer within the dead-peer window.
    #[error("peer sent nothing for {0:?}")]
    PeerTimedOut(Duration),

    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
}
