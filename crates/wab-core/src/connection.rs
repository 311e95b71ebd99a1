//! Connection Manager contract: typed session events plus the connector port that
//! creates one live connection per call.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    messaging::{port::MessagingPort, types::MessageBatch},
    session::{Credentials, CredentialsUpdate},
    Result,
};

/// Why the backend closed the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    LoggedOut,
    Forbidden,
    TimedOut,
    MultideviceMismatch,
    ConnectionClosed,
    ConnectionReplaced,
    ConnectionLost,
    BadSession,
    Unavailable,
    RestartRequired,
    Other(u16),
}

impl DisconnectReason {
    /// Map a backend status code; `None` means the transport dropped without one.
    pub fn from_status_code(code: Option<u16>) -> Self {
        match code {
            None => Self::ConnectionLost,
            Some(401) => Self::LoggedOut,
            Some(403) => Self::Forbidden,
            Some(408) => Self::TimedOut,
            Some(411) => Self::MultideviceMismatch,
            Some(428) => Self::ConnectionClosed,
            Some(440) => Self::ConnectionReplaced,
            Some(500) => Self::BadSession,
            Some(503) => Self::Unavailable,
            Some(515) => Self::RestartRequired,
            Some(other) => Self::Other(other),
        }
    }

    /// Only an explicit logout ends the session for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed(DisconnectReason),
}

/// A `connection.update` event. Either field may be absent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionUpdate {
    pub state: Option<ConnectionState>,
    /// Raw pairing payload to be rendered as a QR code.
    pub qr: Option<String>,
}

/// Everything a live connection can tell the runner.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Connection(ConnectionUpdate),
    Credentials(CredentialsUpdate),
    Messages(MessageBatch),
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection.update",
            Self::Credentials(_) => "creds.update",
            Self::Messages(_) => "messages.upsert",
        }
    }
}

/// One live Connection Manager instance: its event stream and its send primitive.
///
/// Dropping the connection tears down the underlying transport.
pub struct Connection {
    pub events: mpsc::Receiver<SessionEvent>,
    pub messenger: Arc<dyn MessagingPort>,
}

/// Creates Connection Manager instances from persisted credentials.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, credentials: Credentials) -> Result<Connection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_reasons() {
        assert_eq!(
            DisconnectReason::from_status_code(Some(401)),
            DisconnectReason::LoggedOut
        );
        assert_eq!(
            DisconnectReason::from_status_code(Some(515)),
            DisconnectReason::RestartRequired
        );
        assert_eq!(
            DisconnectReason::from_status_code(Some(499)),
            DisconnectReason::Other(499)
        );
        assert_eq!(
            DisconnectReason::from_status_code(None),
            DisconnectReason::ConnectionLost
        );
    }

    #[test]
    fn only_logout_is_terminal() {
        assert!(DisconnectReason::LoggedOut.is_terminal());
        for r in [
            DisconnectReason::ConnectionLost,
            DisconnectReason::ConnectionReplaced,
            DisconnectReason::BadSession,
            DisconnectReason::Other(1),
        ] {
            assert!(!r.is_terminal(), "{r:?}");
        }
    }
}
