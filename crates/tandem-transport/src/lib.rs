//! TCP transports for tandem RPC.
//!
//! [`ClientTransport`] owns one outbound connection; [`ServerTransport`] owns
//! a listener and a socket per accepted client, keyed by [`ClientContext`].
//! Both frame messages with `tandem-protocol`, send keep-alives while
//! connected, tear a connection down after a configurable silence, and report
//! lifecycle events to a single handler.

mod client;
mod config;
mod connection;
mod context;
mod error;
mod handler;
mod server;

pub use client::ClientTransport;
pub use config::{ConfigError, TransportConfig};
pub use context::ClientContext;
pub use error::{Result, TransportError};
pub use handler::{ClientEventHandler, OutboundLink, ServerEventHandler};
pub use server::ServerTransport;
