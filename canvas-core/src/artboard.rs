//! Authoritative in-memory state of one artboard.
//!
//! The object list is ordered bottom-to-top (z-order). `version` starts at
//! 0 and grows by exactly one per applied operation. Only the owning
//! coordinator calls [`Artboard::apply`].

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::ApplyError;
use crate::object::{CanvasObject, Field, FieldValue, ObjectId};
use crate::operation::{ArtboardId, OpKind, Operation, Step};

/// Positional change made to the object list by one applied step.
///
/// Later transforms use these to shift insert indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Inserted(usize),
    Removed(usize),
    Moved { from: usize, to: usize },
    /// The whole list was replaced (restore).
    Reset,
}

/// A parent change made by one applied step.
///
/// Ancestor chains are nearest first and taken at apply time, so a later
/// delete can tell whether the object entered or left its subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reparented {
    pub object: ObjectId,
    pub previous: Option<ObjectId>,
    pub old_ancestors: Vec<ObjectId>,
    pub new_ancestors: Vec<ObjectId>,
}

impl Reparented {
    /// Whether the object crossed the boundary of `root`'s subtree.
    pub fn crossed(&self, root: ObjectId) -> bool {
        self.old_ancestors.contains(&root) != self.new_ancestors.contains(&root)
    }
}

/// An operation as it was applied, with the version it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedOp {
    pub version: u64,
    pub op: Operation,
    pub effects: Vec<Effect>,
    /// Every object id that left the artboard (cascaded deletes included).
    pub removed: Vec<ObjectId>,
    pub reparented: Vec<Reparented>,
}

#[derive(Debug, Default)]
struct Changes {
    effects: Vec<Effect>,
    removed: Vec<ObjectId>,
    reparented: Vec<Reparented>,
}

pub const DEFAULT_ARTBOARD_NAME: &str = "Artboard";

/// One editable canvas document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artboard {
    id: ArtboardId,
    name: String,
    width: f64,
    height: f64,
    objects: Vec<CanvasObject>,
    version: u64,
    /// Ids of deleted objects. They are never accepted again.
    retired: BTreeSet<ObjectId>,
}

impl Artboard {
    /// Create an empty artboard at version 0.
    pub fn new(id: ArtboardId, width: f64, height: f64) -> Self {
        Self::from_parts(id, width, height, 0, Vec::new())
    }

    /// Builder: set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Rebuild from persisted state (cold start).
    pub fn from_parts(
        id: ArtboardId,
        width: f64,
        height: f64,
        version: u64,
        objects: Vec<CanvasObject>,
    ) -> Self {
        Self {
            id,
            name: DEFAULT_ARTBOARD_NAME.to_string(),
            width,
            height,
            objects,
            version,
            retired: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> ArtboardId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `id` belonged to an object that has been deleted.
    pub fn is_retired(&self, id: ObjectId) -> bool {
        self.retired.contains(&id)
    }

    pub fn dimensions(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn objects(&self) -> &[CanvasObject] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn object(&self, id: ObjectId) -> Option<&CanvasObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.index_of(id).is_some()
    }

    pub fn index_of(&self, id: ObjectId) -> Option<usize> {
        index_in(&self.objects, id)
    }

    /// Direct children of `id`, in z-order.
    pub fn children(&self, id: ObjectId) -> Vec<ObjectId> {
        self.objects
            .iter()
            .filter(|o| o.parent == Some(id))
            .map(|o| o.id)
            .collect()
    }

    pub fn object_ids(&self) -> HashSet<ObjectId> {
        self.objects.iter().map(|o| o.id).collect()
    }

    /// Drop updates and deletes aimed at objects that no longer exist, and
    /// inserts or reparents into groups that were deleted.
    ///
    /// Objects inserted by earlier steps of the same operation count as
    /// existing. Returns a no-op when nothing is left.
    pub fn without_missing_targets(&self, op: &Operation) -> Operation {
        if op.is_restore() || op.is_noop() {
            return op.clone();
        }
        let mut present = self.object_ids();
        let into_deleted = |parent: Option<ObjectId>, present: &HashSet<ObjectId>| {
            parent.is_some_and(|p| !present.contains(&p) && self.retired.contains(&p))
        };
        let steps = op.steps();
        let before = steps.len();
        let kept: Vec<Step> = steps
            .into_iter()
            .filter(|step| match &step.kind {
                OpKind::Insert { object, .. } => {
                    if into_deleted(object.parent, &present) {
                        return false;
                    }
                    present.insert(object.id);
                    true
                }
                OpKind::Update {
                    field: Field::Parent,
                    value: FieldValue::Object(parent),
                } => present.contains(&step.target) && !into_deleted(*parent, &present),
                OpKind::Update { .. } | OpKind::Delete => present.contains(&step.target),
                _ => true,
            })
            .collect();
        if kept.len() == before {
            op.clone()
        } else {
            log::debug!(
                "Operation {} lost {} step(s) to missing targets",
                op.op_id,
                before - kept.len()
            );
            op.with_steps(kept)
        }
    }

    /// Apply an already-transformed operation, advancing the version by one.
    ///
    /// On error nothing changes. Groups are all-or-nothing.
    pub fn apply(&mut self, op: &Operation) -> Result<AppliedOp, ApplyError> {
        let changes = match &op.kind {
            OpKind::Noop => {
                return Err(ApplyError::payload("no-op operations are not applied"));
            }
            OpKind::Restore { objects, .. } => self.restore(objects)?,
            OpKind::Group(steps) => {
                let mut objects = self.objects.clone();
                let mut retired = self.retired.clone();
                let mut changes = Changes::default();
                for step in steps {
                    apply_step(&mut objects, &mut retired, step, &mut changes)?;
                }
                self.objects = objects;
                self.retired = retired;
                changes
            }
            kind => {
                let target = op
                    .target
                    .ok_or_else(|| ApplyError::payload("missing target"))?;
                let step = Step::new(target, kind.clone());
                let mut changes = Changes::default();
                apply_step(&mut self.objects, &mut self.retired, &step, &mut changes)?;
                changes
            }
        };

        self.version += 1;
        Ok(AppliedOp {
            version: self.version,
            op: op.clone(),
            effects: changes.effects,
            removed: changes.removed,
            reparented: changes.reparented,
        })
    }

    fn restore(&mut self, objects: &[CanvasObject]) -> Result<Changes, ApplyError> {
        check_tree(objects)?;
        let kept: HashSet<ObjectId> = objects.iter().map(|o| o.id).collect();
        let removed: Vec<ObjectId> = self
            .objects
            .iter()
            .map(|o| o.id)
            .filter(|id| !kept.contains(id))
            .collect();
        self.retired.extend(removed.iter().copied());
        for id in &kept {
            self.retired.remove(id);
        }
        self.objects = objects.to_vec();
        Ok(Changes {
            effects: vec![Effect::Reset],
            removed,
            reparented: Vec::new(),
        })
    }

    /// Verify unique ids and a resolvable, acyclic parent tree.
    pub fn check_invariants(&self) -> Result<(), ApplyError> {
        check_tree(&self.objects)
    }

    /// Encode the full state (bincode), retired ids included. Two artboards
    /// that went through the same history encode to identical bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ApplyError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ApplyError::payload(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ApplyError> {
        let (board, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ApplyError::payload(e.to_string()))?;
        Ok(board)
    }
}

fn index_in(objects: &[CanvasObject], id: ObjectId) -> Option<usize> {
    objects.iter().position(|o| o.id == id)
}

/// Whether `ancestor` is `node` or one of its ancestors.
fn is_ancestor_or_self(objects: &[CanvasObject], ancestor: ObjectId, node: ObjectId) -> bool {
    let mut current = Some(node);
    // Bounded walk: a well-formed tree has depth < len.
    for _ in 0..=objects.len() {
        match current {
            Some(id) if id == ancestor => return true,
            Some(id) => current = objects.iter().find(|o| o.id == id).and_then(|o| o.parent),
            None => return false,
        }
    }
    true
}

/// Ancestors of `parent` starting with `parent` itself.
fn ancestors(objects: &[CanvasObject], parent: Option<ObjectId>) -> Vec<ObjectId> {
    let mut chain = Vec::new();
    let mut current = parent;
    while let Some(id) = current {
        if chain.contains(&id) || chain.len() > objects.len() {
            break;
        }
        chain.push(id);
        current = objects.iter().find(|o| o.id == id).and_then(|o| o.parent);
    }
    chain
}

/// `root` plus everything grouped under it.
fn subtree(objects: &[CanvasObject], root: ObjectId) -> HashSet<ObjectId> {
    let mut ids = HashSet::from([root]);
    loop {
        let before = ids.len();
        for obj in objects {
            if let Some(parent) = obj.parent {
                if ids.contains(&parent) {
                    ids.insert(obj.id);
                }
            }
        }
        if ids.len() == before {
            return ids;
        }
    }
}

fn check_tree(objects: &[CanvasObject]) -> Result<(), ApplyError> {
    let mut seen = HashSet::with_capacity(objects.len());
    for obj in objects {
        if !seen.insert(obj.id) {
            return Err(ApplyError::DuplicateObject(obj.id));
        }
    }
    for obj in objects {
        if let Some(parent) = obj.parent {
            if !seen.contains(&parent) {
                return Err(ApplyError::InvalidTarget(parent));
            }
            if is_ancestor_or_self(objects, obj.id, parent) {
                return Err(ApplyError::CycleDetected { target: obj.id, parent });
            }
        }
    }
    Ok(())
}

fn apply_step(
    objects: &mut Vec<CanvasObject>,
    retired: &mut BTreeSet<ObjectId>,
    step: &Step,
    changes: &mut Changes,
) -> Result<(), ApplyError> {
    let target = step.target;
    match &step.kind {
        OpKind::Insert { object, index } => {
            if object.id != target {
                return Err(ApplyError::payload("insert target must equal the object id"));
            }
            if retired.contains(&target) || index_in(objects, target).is_some() {
                return Err(ApplyError::DuplicateObject(target));
            }
            if let Some(parent) = object.parent {
                if index_in(objects, parent).is_none() {
                    return Err(ApplyError::InvalidTarget(parent));
                }
            }
            let at = (*index).min(objects.len());
            objects.insert(at, object.clone());
            changes.effects.push(Effect::Inserted(at));
        }
        OpKind::Delete => {
            if index_in(objects, target).is_none() {
                return Err(ApplyError::InvalidTarget(target));
            }
            let doomed = subtree(objects, target);
            // Highest index first so each recorded index is valid at removal time.
            for at in (0..objects.len()).rev() {
                if doomed.contains(&objects[at].id) {
                    let gone = objects.remove(at);
                    changes.effects.push(Effect::Removed(at));
                    retired.insert(gone.id);
                    changes.removed.push(gone.id);
                }
            }
        }
        OpKind::Update { field, value } => {
            let at = index_in(objects, target).ok_or(ApplyError::InvalidTarget(target))?;
            if let (Field::Parent, FieldValue::Object(Some(parent))) = (field, value) {
                if index_in(objects, *parent).is_none() {
                    return Err(ApplyError::InvalidTarget(*parent));
                }
                if is_ancestor_or_self(objects, target, *parent) {
                    return Err(ApplyError::CycleDetected { target, parent: *parent });
                }
            }
            let previous = objects[at].parent;
            if !field.write(&mut objects[at], value.clone()) {
                return Err(ApplyError::payload(format!("value {value:?} is not valid for field {field:?}")));
            }
            if *field == Field::Parent && objects[at].parent != previous {
                let new_parent = objects[at].parent;
                changes.reparented.push(Reparented {
                    object: target,
                    previous,
                    old_ancestors: ancestors(objects, previous),
                    new_ancestors: ancestors(objects, new_parent),
                });
            }
        }
        OpKind::Reorder { new_index } => {
            let from = index_in(objects, target).ok_or(ApplyError::InvalidTarget(target))?;
            let obj = objects.remove(from);
            let to = (*new_index).min(objects.len());
            objects.insert(to, obj);
            changes.effects.push(Effect::Moved { from, to });
        }
        OpKind::Group(_) | OpKind::Restore { .. } | OpKind::Noop => {
            return Err(ApplyError::payload("groups may only contain primitive steps"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Color;
    use uuid::Uuid;

    fn board() -> Artboard {
        Artboard::new(Uuid::new_v4(), 800.0, 600.0)
    }

    fn insert(board: &Artboard, obj: CanvasObject, index: usize) -> Operation {
        Operation::insert(
            Uuid::new_v4().to_string(),
            board.id(),
            Uuid::new_v4(),
            board.version(),
            obj,
            index,
        )
    }

    #[test]
    fn test_new_artboard_is_empty() {
        let b = board();
        assert_eq!(b.version(), 0);
        assert!(b.is_empty());
        assert_eq!(b.dimensions(), (800.0, 600.0));
    }

    #[test]
    fn test_insert_increments_version() {
        let mut b = board();
        let obj = CanvasObject::rectangle(0.0, 0.0, 10.0, 10.0);
        let id = obj.id;
        let applied = b.apply(&insert(&b, obj, 0)).unwrap();
        assert_eq!(applied.version, 1);
        assert_eq!(applied.effects, vec![Effect::Inserted(0)]);
        assert_eq!(b.version(), 1);
        assert!(b.contains(id));
    }

    #[test]
    fn test_insert_index_clamped() {
        let mut b = board();
        let obj = CanvasObject::rectangle(0.0, 0.0, 10.0, 10.0);
        let applied = b.apply(&insert(&b, obj, 99)).unwrap();
        assert_eq!(applied.effects, vec![Effect::Inserted(0)]);
    }

    #[test]
    fn test_duplicate_and_retired_ids_rejected() {
        let mut b = board();
        let obj = CanvasObject::rectangle(0.0, 0.0, 10.0, 10.0);
        let id = obj.id;
        b.apply(&insert(&b, obj.clone(), 0)).unwrap();
        assert_eq!(b.apply(&insert(&b, obj.clone(), 0)), Err(ApplyError::DuplicateObject(id)));

        let del = Operation::delete("d", b.id(), Uuid::new_v4(), b.version(), id);
        b.apply(&del).unwrap();
        assert_eq!(b.apply(&insert(&b, obj, 0)), Err(ApplyError::DuplicateObject(id)));
        assert_eq!(b.version(), 2);
    }

    #[test]
    fn test_update_missing_target() {
        let mut b = board();
        let ghost = Uuid::new_v4();
        let op = Operation::update("u", b.id(), Uuid::new_v4(), 0, ghost, Field::X, FieldValue::Number(1.0));
        assert_eq!(b.apply(&op), Err(ApplyError::InvalidTarget(ghost)));
        assert_eq!(b.version(), 0);
    }

    #[test]
    fn test_update_field() {
        let mut b = board();
        let obj = CanvasObject::rectangle(0.0, 0.0, 10.0, 10.0);
        let id = obj.id;
        b.apply(&insert(&b, obj, 0)).unwrap();
        let op = Operation::update("u", b.id(), Uuid::new_v4(), 1, id, Field::Fill, FieldValue::Color(Some(Color::RED)));
        b.apply(&op).unwrap();
        assert_eq!(b.object(id).unwrap().style.fill, Some(Color::RED));
    }

    #[test]
    fn test_delete_cascades_to_children() {
        let mut b = board();
        let group = CanvasObject::group();
        let gid = group.id;
        let child = CanvasObject::rectangle(0.0, 0.0, 1.0, 1.0).in_group(gid);
        let cid = child.id;
        let other = CanvasObject::ellipse(0.0, 0.0, 1.0, 1.0);
        b.apply(&insert(&b, group, 0)).unwrap();
        b.apply(&insert(&b, child, 1)).unwrap();
        b.apply(&insert(&b, other, 2)).unwrap();

        let applied = b
            .apply(&Operation::delete("d", b.id(), Uuid::new_v4(), 3, gid))
            .unwrap();
        assert_eq!(applied.removed.len(), 2);
        assert!(applied.removed.contains(&gid));
        assert!(applied.removed.contains(&cid));
        assert_eq!(applied.effects, vec![Effect::Removed(1), Effect::Removed(0)]);
        assert_eq!(b.len(), 1);
        assert!(b.check_invariants().is_ok());
    }

    #[test]
    fn test_reparent_cycle_detected() {
        let mut b = board();
        let outer = CanvasObject::group();
        let oid = outer.id;
        let inner = CanvasObject::group().in_group(oid);
        let iid = inner.id;
        b.apply(&insert(&b, outer, 0)).unwrap();
        b.apply(&insert(&b, inner, 1)).unwrap();

        let op = Operation::update("p", b.id(), Uuid::new_v4(), 2, oid, Field::Parent, FieldValue::Object(Some(iid)));
        assert_eq!(
            b.apply(&op),
            Err(ApplyError::CycleDetected { target: oid, parent: iid })
        );
        assert_eq!(b.version(), 2);
        assert!(b.check_invariants().is_ok());
    }

    #[test]
    fn test_insert_with_missing_parent() {
        let mut b = board();
        let ghost = Uuid::new_v4();
        let obj = CanvasObject::rectangle(0.0, 0.0, 1.0, 1.0).in_group(ghost);
        assert_eq!(b.apply(&insert(&b, obj, 0)), Err(ApplyError::InvalidTarget(ghost)));
    }

    #[test]
    fn test_reorder_moves_object() {
        let mut b = board();
        let objs: Vec<_> = (0..3).map(|i| CanvasObject::rectangle(i as f64, 0.0, 1.0, 1.0)).collect();
        let ids: Vec<_> = objs.iter().map(|o| o.id).collect();
        for (i, obj) in objs.into_iter().enumerate() {
            b.apply(&insert(&b, obj, i)).unwrap();
        }
        let op = Operation::reorder("r", b.id(), Uuid::new_v4(), 3, ids[0], 10);
        let applied = b.apply(&op).unwrap();
        assert_eq!(applied.effects, vec![Effect::Moved { from: 0, to: 2 }]);
        assert_eq!(b.index_of(ids[0]), Some(2));
        assert_eq!(b.index_of(ids[1]), Some(0));
    }

    #[test]
    fn test_group_is_atomic() {
        let mut b = board();
        let obj = CanvasObject::rectangle(0.0, 0.0, 1.0, 1.0);
        let id = obj.id;
        b.apply(&insert(&b, obj, 0)).unwrap();

        let op = Operation::group(
            "g",
            b.id(),
            Uuid::new_v4(),
            1,
            vec![
                Step::update(id, Field::X, FieldValue::Number(50.0)),
                Step::delete(Uuid::new_v4()),
            ],
        );
        assert!(matches!(b.apply(&op), Err(ApplyError::InvalidTarget(_))));
        assert_eq!(b.object(id).unwrap().geometry.x, 0.0);
        assert_eq!(b.version(), 1);
    }

    #[test]
    fn test_restore_replaces_objects() {
        let mut b = board();
        let keep = CanvasObject::rectangle(0.0, 0.0, 1.0, 1.0);
        let drop = CanvasObject::rectangle(1.0, 0.0, 1.0, 1.0);
        let keep_id = keep.id;
        let drop_id = drop.id;
        b.apply(&insert(&b, keep.clone(), 0)).unwrap();
        b.apply(&insert(&b, drop, 1)).unwrap();

        let restore = Operation::new(
            "restore",
            b.id(),
            Uuid::new_v4(),
            2,
            None,
            OpKind::Restore { snapshot_version: 1, objects: vec![keep] },
        );
        let applied = b.apply(&restore).unwrap();
        assert_eq!(applied.version, 3);
        assert_eq!(applied.removed, vec![drop_id]);
        assert!(b.contains(keep_id));
        assert!(!b.contains(drop_id));
    }

    #[test]
    fn test_without_missing_targets() {
        let mut b = board();
        let kept = CanvasObject::rectangle(0.0, 0.0, 1.0, 1.0);
        let kept_id = kept.id;
        b.apply(&insert(&b, kept, 0)).unwrap();
        let ghost = Uuid::new_v4();
        let fresh = CanvasObject::ellipse(0.0, 0.0, 2.0, 2.0);
        let fresh_id = fresh.id;

        let op = Operation::group(
            "g",
            b.id(),
            Uuid::new_v4(),
            b.version(),
            vec![
                Step::delete(ghost),
                Step::insert(fresh, 0),
                Step::update(fresh_id, Field::X, FieldValue::Number(4.0)),
                Step::update(kept_id, Field::Y, FieldValue::Number(2.0)),
            ],
        );
        let pruned = b.without_missing_targets(&op);
        assert_eq!(pruned.steps().len(), 3);

        let lone = Operation::delete("d", b.id(), Uuid::new_v4(), b.version(), ghost);
        assert!(b.without_missing_targets(&lone).is_noop());
    }

    #[test]
    fn test_encode_decode_state() {
        let mut b = board().with_name("Landing page");
        let mut hidden = CanvasObject::text(5.0, 5.0, "hello");
        hidden.visible = false;
        hidden.locked = true;
        b.apply(&insert(&b, hidden, 0)).unwrap();
        let bytes = b.encode().unwrap();
        let decoded = Artboard::decode(&bytes).unwrap();
        assert_eq!(decoded.version(), 1);
        assert_eq!(decoded.name(), "Landing page");
        assert_eq!(decoded.objects(), b.objects());
        assert!(!decoded.objects()[0].visible);
        assert!(decoded.objects()[0].locked);
    }

    #[test]
    fn test_retired_ids_survive_encoding() {
        let mut b = board();
        let obj = CanvasObject::rectangle(0.0, 0.0, 1.0, 1.0);
        let id = obj.id;
        b.apply(&insert(&b, obj.clone(), 0)).unwrap();
        b.apply(&Operation::delete("d", b.id(), Uuid::new_v4(), 1, id)).unwrap();

        let mut restarted = Artboard::decode(&b.encode().unwrap()).unwrap();
        assert!(restarted.is_retired(id));
        assert_eq!(restarted.apply(&insert(&restarted, obj, 0)), Err(ApplyError::DuplicateObject(id)));
        assert_eq!(restarted, b);
    }

    #[test]
    fn test_reparent_records_ancestors() {
        let mut b = board();
        let outer = CanvasObject::group();
        let oid = outer.id;
        let inner = CanvasObject::group().in_group(oid);
        let iid = inner.id;
        let rect = CanvasObject::rectangle(0.0, 0.0, 1.0, 1.0);
        let rid = rect.id;
        for obj in [outer, inner, rect] {
            b.apply(&insert(&b, obj, b.len())).unwrap();
        }

        let op = Operation::update("p", b.id(), Uuid::new_v4(), 3, rid, Field::Parent, FieldValue::Object(Some(iid)));
        let applied = b.apply(&op).unwrap();
        assert_eq!(
            applied.reparented,
            vec![Reparented {
                object: rid,
                previous: None,
                old_ancestors: Vec::new(),
                new_ancestors: vec![iid, oid],
            }]
        );
        assert!(applied.reparented[0].crossed(oid));

        // Setting the same parent again moves nothing.
        let again = Operation::update("p2", b.id(), Uuid::new_v4(), 4, rid, Field::Parent, FieldValue::Object(Some(iid)));
        assert!(b.apply(&again).unwrap().reparented.is_empty());
    }

    #[test]
    fn test_without_missing_targets_drops_moves_into_deleted_groups() {
        let mut b = board();
        let group = CanvasObject::group();
        let gid = group.id;
        let rect = CanvasObject::rectangle(0.0, 0.0, 1.0, 1.0);
        let rid = rect.id;
        b.apply(&insert(&b, group, 0)).unwrap();
        b.apply(&insert(&b, rect, 1)).unwrap();
        b.apply(&Operation::delete("d", b.id(), Uuid::new_v4(), 2, gid)).unwrap();

        let reparent = Operation::update("p", b.id(), Uuid::new_v4(), 3, rid, Field::Parent, FieldValue::Object(Some(gid)));
        assert!(b.without_missing_targets(&reparent).is_noop());

        let child = CanvasObject::ellipse(0.0, 0.0, 1.0, 1.0).in_group(gid);
        assert!(b.without_missing_targets(&insert(&b, child, 0)).is_noop());

        // A parent that never existed is still the client's error.
        let ghost = Uuid::new_v4();
        let bogus = Operation::update("q", b.id(), Uuid::new_v4(), 3, rid, Field::Parent, FieldValue::Object(Some(ghost)));
        assert_eq!(b.without_missing_targets(&bogus), bogus);
        assert_eq!(b.apply(&bogus), Err(ApplyError::InvalidTarget(ghost)));
    }
}
