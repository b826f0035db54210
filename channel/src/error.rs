//! Error types for the `channel` crate.
//!
//! Follows the same pattern as domain::error with a root Error struct and error kind enums.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for the push channel.
/// Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ChannelErrorKind,
}

/// Major categories of errors in the push channel.
#[derive(Debug, PartialEq)]
pub enum ChannelErrorKind {
    /// Connection-level failures, recovered by the reconnection supervisor.
    Transport(TransportErrorKind),
    /// Malformed or unexpected frames. Dropped and logged, never fatal.
    Protocol(ProtocolErrorKind),
}

#[derive(Debug, PartialEq)]
pub enum TransportErrorKind {
    ConnectFailed,
    ConnectTimeout,
    SendFailed,
    ReceiveFailed,
}

#[derive(Debug, PartialEq)]
pub enum ProtocolErrorKind {
    /// The frame is not valid JSON or its `type` is unknown.
    Malformed,
    /// The frame type exists but does not belong to the topic's kind.
    UnexpectedForTopic,
    /// Binary payload that is not valid UTF-8.
    InvalidEncoding,
}

impl Error {
    pub fn is_transport(&self) -> bool {
        matches!(self.error_kind, ChannelErrorKind::Transport(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self.error_kind, ChannelErrorKind::Protocol(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ChannelErrorKind::Transport(kind) => write!(f, "Transport error: {:?}", kind)?,
            ChannelErrorKind::Protocol(kind) => write!(f, "Protocol error: {:?}", kind)?,
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        let error_kind = match &err {
            WsError::Utf8 { .. } => ChannelErrorKind::Protocol(ProtocolErrorKind::InvalidEncoding),
            WsError::Io(_) | WsError::ConnectionClosed | WsError::AlreadyClosed => {
                ChannelErrorKind::Transport(TransportErrorKind::ReceiveFailed)
            }
            _ => ChannelErrorKind::Transport(TransportErrorKind::ConnectFailed),
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ChannelErrorKind::Protocol(ProtocolErrorKind::Malformed),
        }
    }
}

/// Helper function to create transport errors.
pub fn transport_error(kind: TransportErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ChannelErrorKind::Transport(kind),
    }
}

/// Helper function to create protocol errors.
pub fn protocol_error(kind: ProtocolErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ChannelErrorKind::Protocol(kind),
    }
}
