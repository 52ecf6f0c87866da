//! Error types for the remote client, durable queue, local store and synchronizer

use crate::models::InvalidDataPoint;
use crate::remote::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed set of failure kinds a caller can act on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No network connectivity
    Unreachable,
    /// HTTP 502 from the remote service
    BadGateway,
    /// HTTP 500 from the remote service
    ServerError,
    /// Token rejected (HTTP 401)
    InvalidAuthToken,
    /// Point is not a JSON object, or was rejected with HTTP 400
    InvalidDataPoint,
    /// Point already exists remotely (HTTP 409)
    DataPointConflict,
    /// Response missing or not shaped as expected
    MalformedResponse,
    /// Transport produced neither a response nor an error
    Unknown,
    /// Unclassified underlying failure
    Other,
    /// Queue or store I/O failure
    Persistence,
}

impl ErrorKind {
    /// Stable label, used in metrics and API responses
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unreachable => "unreachable",
            ErrorKind::BadGateway => "bad_gateway",
            ErrorKind::ServerError => "server_error",
            ErrorKind::InvalidAuthToken => "invalid_auth_token",
            ErrorKind::InvalidDataPoint => "invalid_data_point",
            ErrorKind::DataPointConflict => "data_point_conflict",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Unknown => "unknown",
            ErrorKind::Other => "other",
            ErrorKind::Persistence => "persistence",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure returned by [`crate::remote::RemoteClient`]
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("remote service unreachable: {0}")]
    Unreachable(#[source] TransportError),

    #[error("bad gateway")]
    BadGateway,

    #[error("remote server error")]
    ServerError,

    #[error("auth token rejected")]
    InvalidAuthToken,

    #[error("invalid data point")]
    InvalidDataPoint,

    #[error("data point already exists")]
    DataPointConflict,

    #[error("malformed response{}", body_suffix(.body))]
    MalformedResponse { body: Option<String> },

    #[error("no response and no transport error")]
    Unknown,

    #[error(transparent)]
    Other(TransportError),

    #[error("invalid request url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

fn body_suffix(body: &Option<String>) -> String {
    body.as_deref()
        .map(|b| format!(": {}", b))
        .unwrap_or_default()
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Unreachable(_) => ErrorKind::Unreachable,
            ClientError::BadGateway => ErrorKind::BadGateway,
            ClientError::ServerError => ErrorKind::ServerError,
            ClientError::InvalidAuthToken => ErrorKind::InvalidAuthToken,
            ClientError::InvalidDataPoint => ErrorKind::InvalidDataPoint,
            ClientError::DataPointConflict => ErrorKind::DataPointConflict,
            ClientError::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            ClientError::Unknown => ErrorKind::Unknown,
            ClientError::Other(_) | ClientError::InvalidUrl(_) => ErrorKind::Other,
        }
    }

    /// True when the same request may succeed later without changes
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Unreachable | ErrorKind::BadGateway | ErrorKind::ServerError | ErrorKind::Other
        )
    }
}

/// Failure of a [`crate::queue::DurableQueue`] operation
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("queue record encoding error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt queue record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("queue is already open elsewhere (lock {path})")]
    Locked { path: std::path::PathBuf },

    #[error(transparent)]
    InvalidDataPoint(#[from] InvalidDataPoint),
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::InvalidDataPoint(_) => ErrorKind::InvalidDataPoint,
            _ => ErrorKind::Persistence,
        }
    }
}

/// Failure opening or writing the local store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database schema version {found} is newer than supported version {expected}")]
    SchemaMismatch { found: i64, expected: i64 },

    #[error("unsupported store option: {0}")]
    Unsupported(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Persistence
    }
}

/// Failure of a sync pass or a synchronizer request
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("synchronizer has stopped")]
    Stopped,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Queue(e) => e.kind(),
            SyncError::Store(e) => e.kind(),
            SyncError::Stopped => ErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels_are_snake_case() {
        assert_eq!(ErrorKind::DataPointConflict.as_str(), "data_point_conflict");
        assert_eq!(
            serde_json::to_string(&ErrorKind::InvalidAuthToken).unwrap(),
            "\"invalid_auth_token\""
        );
        assert_eq!(ErrorKind::Persistence.to_string(), "persistence");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ClientError::Unreachable(TransportError::NoConnectivity("offline".into()))
            .is_retryable());
        assert!(ClientError::BadGateway.is_retryable());
        assert!(ClientError::ServerError.is_retryable());

        assert!(!ClientError::InvalidAuthToken.is_retryable());
        assert!(!ClientError::InvalidDataPoint.is_retryable());
        assert!(!ClientError::DataPointConflict.is_retryable());
        assert!(!ClientError::MalformedResponse { body: None }.is_retryable());
    }

    #[test]
    fn test_malformed_response_display() {
        let err = ClientError::MalformedResponse {
            body: Some("{}".to_string()),
        };
        assert_eq!(err.to_string(), "malformed response: {}");
        assert_eq!(
            ClientError::MalformedResponse { body: None }.to_string(),
            "malformed response"
        );
    }

    #[test]
    fn test_persistence_kinds() {
        let io = QueueError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert_eq!(io.kind(), ErrorKind::Persistence);

        let invalid = QueueError::from(InvalidDataPoint { found: "array" });
        assert_eq!(invalid.kind(), ErrorKind::InvalidDataPoint);

        let locked = QueueError::Locked {
            path: "/tmp/pending.lock".into(),
        };
        assert_eq!(locked.kind(), ErrorKind::Persistence);

        let store = SyncError::from(StoreError::SchemaMismatch {
            found: 3,
            expected: 1,
        });
        assert_eq!(store.kind(), ErrorKind::Persistence);
        assert_eq!(SyncError::Stopped.kind(), ErrorKind::Other);
    }
}
