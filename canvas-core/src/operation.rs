//! Canvas mutation operations.
//!
//! An [`Operation`] is immutable once created by a client. The coordinator
//! may derive a *transformed* copy (see [`crate::transform`]) but never edits
//! the original.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApplyError;
use crate::object::{CanvasObject, Field, FieldValue, ObjectId};

/// Identity of an artboard (one editable canvas document).
pub type ArtboardId = Uuid;

/// Identity of one client connection.
pub type ClientId = Uuid;

/// Client-chosen operation id, unique per artboard. Compared
/// lexicographically when breaking ties.
pub type OpId = String;

/// What an operation does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    /// Add `object` at z-order position `index` (clamped to the list length).
    Insert { object: CanvasObject, index: usize },
    /// Remove the target and every object grouped under it.
    Delete,
    /// Set one field of the target.
    Update { field: Field, value: FieldValue },
    /// Move the target to `new_index` in the z-order, resolved at apply time.
    Reorder { new_index: usize },
    /// Several steps applied atomically under one version.
    Group(Vec<Step>),
    /// Replace the whole object list with a snapshot's contents.
    Restore {
        snapshot_version: u64,
        objects: Vec<CanvasObject>,
    },
    /// Result of a transform that left nothing to do.
    Noop,
}

/// One member of a [`OpKind::Group`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub target: ObjectId,
    pub kind: OpKind,
}

impl Step {
    pub fn new(target: ObjectId, kind: OpKind) -> Self {
        Self { target, kind }
    }

    pub fn insert(object: CanvasObject, index: usize) -> Self {
        Self::new(object.id, OpKind::Insert { object, index })
    }

    pub fn delete(target: ObjectId) -> Self {
        Self::new(target, OpKind::Delete)
    }

    pub fn update(target: ObjectId, field: Field, value: FieldValue) -> Self {
        Self::new(target, OpKind::Update { field, value })
    }

    pub fn reorder(target: ObjectId, new_index: usize) -> Self {
        Self::new(target, OpKind::Reorder { new_index })
    }

    fn validate(&self) -> Result<(), ApplyError> {
        match &self.kind {
            OpKind::Insert { object, .. } => {
                if object.id != self.target {
                    return Err(ApplyError::payload("insert target must equal the object id"));
                }
                if !object.is_valid() {
                    return Err(ApplyError::payload("inserted object has invalid attributes"));
                }
            }
            OpKind::Update { field, value } => {
                if !field.accepts(value) {
                    return Err(ApplyError::payload(format!(
                        "value {value:?} is not valid for field {field:?}"
                    )));
                }
                if *field == Field::Parent && *value == FieldValue::Object(Some(self.target)) {
                    return Err(ApplyError::CycleDetected {
                        target: self.target,
                        parent: self.target,
                    });
                }
            }
            OpKind::Delete | OpKind::Reorder { .. } => {}
            OpKind::Group(_) | OpKind::Restore { .. } | OpKind::Noop => {
                return Err(ApplyError::payload("groups may only contain primitive steps"));
            }
        }
        if self.target.is_nil() {
            return Err(ApplyError::payload("nil target"));
        }
        Ok(())
    }
}

/// A canvas mutation submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub op_id: OpId,
    pub artboard_id: ArtboardId,
    /// Last artboard version the client had seen when it created this op.
    pub base_version: u64,
    pub client_id: ClientId,
    /// Object the operation acts on. `None` for groups and restores.
    pub target: Option<ObjectId>,
    pub kind: OpKind,
    /// Client wall clock, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Operation {
    /// Create an operation stamped with the current wall clock.
    pub fn new(
        op_id: impl Into<OpId>,
        artboard_id: ArtboardId,
        client_id: ClientId,
        base_version: u64,
        target: Option<ObjectId>,
        kind: OpKind,
    ) -> Self {
        Self {
            op_id: op_id.into(),
            artboard_id,
            base_version,
            client_id,
            target,
            kind,
            timestamp: now_millis(),
        }
    }

    pub fn insert(
        op_id: impl Into<OpId>,
        artboard_id: ArtboardId,
        client_id: ClientId,
        base_version: u64,
        object: CanvasObject,
        index: usize,
    ) -> Self {
        let target = Some(object.id);
        Self::new(op_id, artboard_id, client_id, base_version, target, OpKind::Insert { object, index })
    }

    pub fn delete(
        op_id: impl Into<OpId>,
        artboard_id: ArtboardId,
        client_id: ClientId,
        base_version: u64,
        target: ObjectId,
    ) -> Self {
        Self::new(op_id, artboard_id, client_id, base_version, Some(target), OpKind::Delete)
    }

    pub fn update(
        op_id: impl Into<OpId>,
        artboard_id: ArtboardId,
        client_id: ClientId,
        base_version: u64,
        target: ObjectId,
        field: Field,
        value: FieldValue,
    ) -> Self {
        Self::new(
            op_id,
            artboard_id,
            client_id,
            base_version,
            Some(target),
            OpKind::Update { field, value },
        )
    }

    pub fn reorder(
        op_id: impl Into<OpId>,
        artboard_id: ArtboardId,
        client_id: ClientId,
        base_version: u64,
        target: ObjectId,
        new_index: usize,
    ) -> Self {
        Self::new(
            op_id,
            artboard_id,
            client_id,
            base_version,
            Some(target),
            OpKind::Reorder { new_index },
        )
    }

    pub fn group(
        op_id: impl Into<OpId>,
        artboard_id: ArtboardId,
        client_id: ClientId,
        base_version: u64,
        steps: Vec<Step>,
    ) -> Self {
        Self::new(op_id, artboard_id, client_id, base_version, None, OpKind::Group(steps))
    }

    /// Builder: override the timestamp.
    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.kind, OpKind::Noop)
    }

    pub fn is_restore(&self) -> bool {
        matches!(self.kind, OpKind::Restore { .. })
    }

    /// The primitive steps this operation performs, in order.
    ///
    /// Restores and no-ops have no primitive steps.
    pub fn steps(&self) -> Vec<Step> {
        match (&self.kind, self.target) {
            (OpKind::Group(steps), _) => steps.clone(),
            (OpKind::Restore { .. } | OpKind::Noop, _) => Vec::new(),
            (kind, Some(target)) => vec![Step::new(target, kind.clone())],
            (_, None) => Vec::new(),
        }
    }

    /// Copy of this operation with `kind`/`target` rebuilt from `steps`.
    ///
    /// A single step stays single unless the operation was a group; more
    /// than one step always becomes a group. An empty result is a no-op.
    pub fn with_steps(&self, mut steps: Vec<Step>) -> Self {
        let mut next = self.clone();
        match (&self.kind, steps.len()) {
            (_, 0) => {
                next.kind = OpKind::Noop;
            }
            (OpKind::Group(_), _) | (_, 2..) => {
                next.target = None;
                next.kind = OpKind::Group(steps);
            }
            _ => {
                let step = steps.remove(0);
                next.target = Some(step.target);
                next.kind = step.kind;
            }
        }
        next
    }

    /// Ordering key for last-writer-wins: later timestamp wins, then client id,
    /// then op id.
    pub fn lww_key(&self) -> (u64, ClientId, &str) {
        (self.timestamp, self.client_id, self.op_id.as_str())
    }

    /// Ordering key for concurrent inserts at the same index: smaller first.
    pub fn insert_key(&self) -> (ClientId, &str) {
        (self.client_id, self.op_id.as_str())
    }

    /// Boundary validation. Anything that fails here must never reach the
    /// coordinator or the applied-order log.
    pub fn validate(&self) -> Result<(), ApplyError> {
        if self.op_id.is_empty() {
            return Err(ApplyError::payload("empty op id"));
        }
        if self.client_id.is_nil() {
            return Err(ApplyError::payload("nil client id"));
        }
        match &self.kind {
            OpKind::Group(steps) => {
                if steps.is_empty() {
                    return Err(ApplyError::payload("empty group"));
                }
                if self.target.is_some() {
                    return Err(ApplyError::payload("groups carry no top-level target"));
                }
                steps.iter().try_for_each(Step::validate)
            }
            OpKind::Restore { .. } => Err(ApplyError::payload("restores are issued by the server")),
            OpKind::Noop => Err(ApplyError::payload("no-op operations cannot be submitted")),
            kind => {
                let target = self
                    .target
                    .ok_or_else(|| ApplyError::payload("missing target"))?;
                Step::new(target, kind.clone()).validate()
            }
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
