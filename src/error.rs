//! Error types for the offline layer.
//!
//! None of these cross the subsystem boundary under normal operation. Storage
//! failures are logged and turned into safe defaults, apply failures feed the
//! retry policy of the sync coordinator.

use thiserror::Error;

use crate::queue::MutationKind;

/// Failure talking to the persistent key/value primitive.
#[derive(Error, Debug)]
pub enum StorageError {
  #[error("storage backend error: {0}")]
  Backend(String),

  #[error("storage is unavailable")]
  Unavailable,

  #[error("failed to encode or decode stored value: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("storage task failed: {0}")]
  Task(String),
}

impl From<rusqlite::Error> for StorageError {
  fn from(e: rusqlite::Error) -> Self {
    StorageError::Backend(e.to_string())
  }
}

impl From<tokio::task::JoinError> for StorageError {
  fn from(e: tokio::task::JoinError) -> Self {
    StorageError::Task(e.to_string())
  }
}

/// Failure replaying a mutation against a remote service.
///
/// Every variant consumes the same retry budget today. They are kept apart so
/// permanent rejections can be routed differently without a data model change.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
  /// Connectivity problem or timeout; the remote side never answered.
  #[error("transport failure: {0}")]
  Transport(String),

  /// The remote side answered and refused the mutation.
  #[error("rejected by remote: {0}")]
  Rejected(String),

  #[error("no handler registered for {0} mutations")]
  MissingHandler(MutationKind),
}

impl ApplyError {
  /// Whether a later attempt could plausibly succeed.
  pub fn is_transient(&self) -> bool {
    matches!(self, ApplyError::Transport(_))
  }
}

/// Failure reading connectivity from the platform.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
  #[error("connectivity probe failed: {0}")]
  Probe(String),

  #[error("connectivity source closed")]
  Closed,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_error_messages() {
    let err = StorageError::Backend("disk full".to_string());
    assert_eq!(err.to_string(), "storage backend error: disk full");

    let err = ApplyError::Rejected("invalid rating".to_string());
    assert_eq!(err.to_string(), "rejected by remote: invalid rating");

    let err = ApplyError::MissingHandler(MutationKind::Schedule);
    assert_eq!(err.to_string(), "no handler registered for schedule mutations");
  }

  #[test]
  fn test_only_transport_is_transient() {
    assert!(ApplyError::Transport("timeout".into()).is_transient());
    assert!(!ApplyError::Rejected("bad".into()).is_transient());
    assert!(!ApplyError::MissingHandler(MutationKind::Weather).is_transient());
  }
}
