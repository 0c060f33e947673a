use thiserror::Error;

use crate::object::ObjectId;

/// Why an operation could not be applied to an artboard.
///
/// These are per-operation failures: the artboard is left untouched and
/// keeps serving later operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// The operation (or a reference inside it) names an object that is not
    /// on the artboard.
    #[error("object {0} does not exist on this artboard")]
    InvalidTarget(ObjectId),

    /// A reparent would make an object its own ancestor.
    #[error("moving {target} under {parent} would create a parent cycle")]
    CycleDetected { target: ObjectId, parent: ObjectId },

    /// An insert reused a live or retired object id.
    #[error("object id {0} is already in use")]
    DuplicateObject(ObjectId),

    /// The payload is malformed or out of range.
    #[error("invalid operation payload: {0}")]
    InvalidPayload(String),
}

impl ApplyError {
    pub(crate) fn payload(reason: impl Into<String>) -> Self {
        ApplyError::InvalidPayload(reason.into())
    }
}
