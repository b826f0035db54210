//! Error types for the `domain` layer.
use std::error::Error as StdError;
use std::fmt;

/// Top-level domain error type.
/// Errors in the domain layer are modeled as a tree with `domain::error::Error`
/// as the root, holding a tree of `error_kind` enums for the failures that can
/// happen here or in lower layers. The `source` field keeps the original error.
/// Lower layers (`channel`, `reqwest`) are translated at this boundary so that
/// the binary only ever depends on domain error kinds.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: DomainErrorKind,
}

/// Enum representing the major categories of errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum DomainErrorKind {
    /// A refresh of the tracked ticket failed. The last good snapshot is kept.
    Pull(PullErrorKind),
    /// Push channel failure that surfaced outside the reconnection supervisor.
    Channel,
    Internal(InternalErrorKind),
}

#[derive(Debug, PartialEq)]
pub enum PullErrorKind {
    /// The request never produced a response (DNS, refused, timeout).
    Network,
    /// The server answered with a non-success status.
    Status(u16),
    /// The response body did not match the ticket contract.
    Decode,
}

#[derive(Debug, PartialEq)]
pub enum InternalErrorKind {
    Config,
    /// The tracker or monitor task is no longer running.
    TaskStopped,
    Other(String),
}

impl Error {
    pub fn is_pull(&self) -> bool {
        matches!(self.error_kind, DomainErrorKind::Pull(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Domain Error: {:?}", self.error_kind)?;
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

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // Errors that result from issues building the reqwest::Client instance. This
        // type of error will occur prior to any network calls being made.
        let error_kind = if err.is_builder() {
            DomainErrorKind::Internal(InternalErrorKind::Other(
                "Failed to build reqwest client".to_string(),
            ))
        } else if err.is_decode() {
            DomainErrorKind::Pull(PullErrorKind::Decode)
        } else if let Some(status) = err.status() {
            DomainErrorKind::Pull(PullErrorKind::Status(status.as_u16()))
        } else {
            DomainErrorKind::Pull(PullErrorKind::Network)
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
            error_kind: DomainErrorKind::Pull(PullErrorKind::Decode),
        }
    }
}

// Channel errors that reach the domain layer are never retried here; the
// supervisor already owns recovery for them.
impl From<channel::Error> for Error {
    fn from(err: channel::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::Channel,
        }
    }
}
