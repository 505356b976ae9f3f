//! Error types for the `pubsub` crate.
//!
//! Follows the same pattern as the rest of the platform: a root Error struct
//! holding an error kind tree and an optional source for error chaining.
//! Callers match on `error_kind` to distinguish lifecycle errors (operation
//! on a closed backend) from transport errors (broker unreachable): a topic
//! with no listeners is never an error and never appears here.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for pub/sub operations.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors surfaced by a pub/sub backend.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// Operation attempted after the backend was shut down.
    Closed,
    /// The broker connection could not be established at construction time.
    Connection,
    Subscribe(SubscribeErrorKind),
    Publish(PublishErrorKind),
}

/// Errors from establishing a subscription.
#[derive(Debug, PartialEq)]
pub enum SubscribeErrorKind {
    /// The broker-level channel subscription could not be established.
    Broker,
}

/// Errors from publishing a message.
#[derive(Debug, PartialEq)]
pub enum PublishErrorKind {
    /// The broker rejected or never received the publish.
    Broker,
    /// The outbound envelope could not be serialized.
    Serialization,
}

impl Error {
    /// True when the operation failed because the backend was already closed.
    pub fn is_closed(&self) -> bool {
        self.error_kind == ErrorKind::Closed
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Closed => write!(f, "pub/sub backend is closed"),
            ErrorKind::Connection => write!(f, "broker connection error"),
            ErrorKind::Subscribe(kind) => write!(f, "subscribe error: {:?}", kind),
            ErrorKind::Publish(kind) => write!(f, "publish error: {:?}", kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

/// Helper function to create closed-backend errors.
pub fn closed_error() -> Error {
    Error {
        source: None,
        error_kind: ErrorKind::Closed,
    }
}

/// Helper function to create construction-time connection errors.
pub fn connection_error(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Error {
    Error {
        source: Some(source.into()),
        error_kind: ErrorKind::Connection,
    }
}

/// Helper function to create subscribe errors.
pub fn subscribe_error(
    kind: SubscribeErrorKind,
    source: impl Into<Box<dyn StdError + Send + Sync>>,
) -> Error {
    Error {
        source: Some(source.into()),
        error_kind: ErrorKind::Subscribe(kind),
    }
}

/// Helper function to create publish errors.
pub fn publish_error(
    kind: PublishErrorKind,
    source: impl Into<Box<dyn StdError + Send + Sync>>,
) -> Error {
    Error {
        source: Some(source.into()),
        error_kind: ErrorKind::Publish(kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_closed_distinguishes_lifecycle_errors() {
        assert!(closed_error().is_closed());

        let transport = publish_error(PublishErrorKind::Broker, "connection reset");
        assert!(!transport.is_closed());
    }

    #[test]
    fn test_errors_preserve_their_source() {
        let err = subscribe_error(SubscribeErrorKind::Broker, "NOAUTH");
        assert!(err.source().is_some());
        assert_eq!(
            err.error_kind,
            ErrorKind::Subscribe(SubscribeErrorKind::Broker)
        );
    }
}
