//! Error taxonomy for the store contract and the sync layer.
//!
//! `StoreError` is what a [`DocumentStore`](crate::store::DocumentStore)
//! reports. `SyncError` is what controllers and services hand back to the
//! UI layer; every variant is recoverable.

use meowgram_core::{DocumentError, EmptyId};

/// Failures reported by a document store implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("store closed")]
    Closed,
}

impl From<DocumentError> for StoreError {
    fn from(e: DocumentError) -> Self {
        StoreError::InvalidPath(e.to_string())
    }
}

/// Errors surfaced by the sync layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("no signed-in user")]
    Unauthenticated,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote write failed: {0}")]
    RemoteWriteFailed(String),
    #[error("subscription error: {0}")]
    SubscriptionError(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("view cache error: {0}")]
    Cache(String),
}

impl SyncError {
    /// Message suitable for a dismissible banner, or `None` when the
    /// failure should only revert state silently.
    pub fn user_message(&self) -> Option<String> {
        match self {
            SyncError::NotFound(_) => None,
            SyncError::Unauthenticated => Some("Sign in to do that.".to_string()),
            SyncError::RemoteWriteFailed(_) => {
                Some("Couldn't save your change. Please try again.".to_string())
            }
            SyncError::SubscriptionError(_) => {
                Some("Live updates paused. Showing last known data.".to_string())
            }
            SyncError::InvalidArgument(msg)
            | SyncError::InvalidTarget(msg)
            | SyncError::PermissionDenied(msg) => Some(msg.clone()),
            SyncError::Cache(_) => None,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(path) => SyncError::NotFound(path),
            StoreError::PermissionDenied(msg) => SyncError::RemoteWriteFailed(format!("permission denied: {msg}")),
            StoreError::InvalidPath(msg) => SyncError::InvalidTarget(msg),
            other => SyncError::RemoteWriteFailed(other.to_string()),
        }
    }
}

impl From<DocumentError> for SyncError {
    fn from(e: DocumentError) -> Self {
        SyncError::InvalidTarget(e.to_string())
    }
}

impl From<EmptyId> for SyncError {
    fn from(e: EmptyId) -> Self {
        SyncError::InvalidArgument(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        assert_eq!(
            SyncError::from(StoreError::NotFound("posts/p1".into())),
            SyncError::NotFound("posts/p1".into())
        );
        assert!(matches!(
            SyncError::from(StoreError::Unavailable("offline".into())),
            SyncError::RemoteWriteFailed(_)
        ));
        assert!(matches!(
            SyncError::from(StoreError::PermissionDenied("rules".into())),
            SyncError::RemoteWriteFailed(_)
        ));
    }

    #[test]
    fn test_not_found_reverts_silently() {
        assert!(SyncError::NotFound("x".into()).user_message().is_none());
        assert!(SyncError::RemoteWriteFailed("x".into()).user_message().is_some());
    }
}
