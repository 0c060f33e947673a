use std::time::Duration;

use canvas_core::{ApplyError, ArtboardId, ObjectId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::presence::SessionId;
use crate::storage::StoreError;

/// Wire-level error classification sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Client is outside the transformable window and must resync.
    StaleVersion,
    InvalidTarget,
    CycleDetected,
    DuplicateObject,
    InvalidPayload,
    /// No coordinator reply in time. Retrying the same op id is safe.
    Timeout,
    /// Session timed out; rejoin required.
    SessionExpired,
    NotJoined,
    UnknownVersion,
    /// Frame could not be decoded.
    Malformed,
    ArtboardClosed,
    Storage,
}

impl ErrorCode {
    /// The operation may not have been applied; the client keeps it and
    /// resends it with the same op id after a resync.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCode::StaleVersion | ErrorCode::Timeout | ErrorCode::ArtboardClosed)
    }
}

/// Engine errors. All of them are local to one request.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("base version {base} is outside the retained window {floor}..={current}; resync required")]
    StaleVersion { base: u64, current: u64, floor: u64 },

    #[error("object {0} does not exist on this artboard")]
    InvalidTarget(ObjectId),

    #[error("moving {target} under {parent} would create a parent cycle")]
    CycleDetected { target: ObjectId, parent: ObjectId },

    #[error("object id {0} is already in use")]
    DuplicateObject(ObjectId),

    #[error("invalid operation payload: {0}")]
    InvalidPayload(String),

    #[error("no reply from the artboard coordinator within {0:?}")]
    Timeout(Duration),

    #[error("session {0} has expired")]
    SessionExpired(SessionId),

    #[error("connection has not joined an artboard")]
    NotJoined,

    #[error("no saved version {0}")]
    UnknownVersion(Uuid),

    #[error("coordinator for artboard {0} is not running")]
    ArtboardClosed(ArtboardId),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl SyncError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::StaleVersion { .. } => ErrorCode::StaleVersion,
            SyncError::InvalidTarget(_) => ErrorCode::InvalidTarget,
            SyncError::CycleDetected { .. } => ErrorCode::CycleDetected,
            SyncError::DuplicateObject(_) => ErrorCode::DuplicateObject,
            SyncError::InvalidPayload(_) => ErrorCode::InvalidPayload,
            SyncError::Timeout(_) => ErrorCode::Timeout,
            SyncError::SessionExpired(_) => ErrorCode::SessionExpired,
            SyncError::NotJoined => ErrorCode::NotJoined,
            SyncError::UnknownVersion(_) => ErrorCode::UnknownVersion,
            SyncError::ArtboardClosed(_) => ErrorCode::ArtboardClosed,
            SyncError::Storage(_) => ErrorCode::Storage,
        }
    }
}

impl From<ApplyError> for SyncError {
    fn from(e: ApplyError) -> Self {
        match e {
            ApplyError::InvalidTarget(id) => SyncError::InvalidTarget(id),
            ApplyError::CycleDetected { target, parent } => SyncError::CycleDetected { target, parent },
            ApplyError::DuplicateObject(id) => SyncError::DuplicateObject(id),
            ApplyError::InvalidPayload(reason) => SyncError::InvalidPayload(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_errors_keep_their_code() {
        let id = Uuid::new_v4();
        let err: SyncError = ApplyError::InvalidTarget(id).into();
        assert_eq!(err.code(), ErrorCode::InvalidTarget);

        let err: SyncError = ApplyError::CycleDetected { target: id, parent: id }.into();
        assert_eq!(err.code(), ErrorCode::CycleDetected);
    }

    #[test]
    fn test_retryable_codes() {
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::ArtboardClosed.is_retryable());
        assert!(ErrorCode::StaleVersion.is_retryable());
        assert!(!ErrorCode::InvalidTarget.is_retryable());
        assert!(!ErrorCode::Storage.is_retryable());
    }

    #[test]
    fn test_stale_version_message() {
        let err = SyncError::StaleVersion { base: 3, current: 900, floor: 400 };
        assert_eq!(err.code(), ErrorCode::StaleVersion);
        assert!(err.to_string().contains("resync"));
    }
}
