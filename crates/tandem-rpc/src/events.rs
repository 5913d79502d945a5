//! Observational events published by the communicators.

use std::fmt;
use tandem_transport::{ClientContext, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The client connected to its server.
    Connected,
    /// The client's connection closed, for whatever reason.
    Disconnected,
    ClientConnected(ClientContext),
    ClientDisconnected(ClientContext),
    ServerStopped,
}

/// A failure that did not surface to any caller, such as a dead peer or a
/// response that could not be sent.
#[derive(Debug, Clone)]
pub struct CommunicationError {
    pub message: String,
    pub detail: String,
    /// The client it concerns, on the server.
    pub client: Option<ClientContext>,
}

impl CommunicationError {
    pub(crate) fn from_transport(error: &TransportError, client: Option<&ClientContext>) -> Self {
        Self {
            message: error.to_string(),
            detail: format!("{error:?}"),
            client: client.cloned(),
        }
    }
}

impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.client {
            Some(client) => write!(f, "client {client}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_client() {
        let client = ClientContext::new();
        let error = CommunicationError::from_transport(&TransportError::SocketOffline, Some(&client));
        let text = error.to_string();
        assert!(text.starts_with(&format!("client {client}: ")));
        assert!(error.detail.contains("SocketOffline"));

        let local = CommunicationError::from_transport(&TransportError::SocketOffline, None);
        assert_eq!(local.to_string(), TransportError::SocketOffline.to_string());
    }
}
