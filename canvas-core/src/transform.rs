//! Operational transform for canvas operations.
//!
//! `transform(op, applied)` takes an operation `op` and an operation that
//! was already applied from the same base version, and produces the copy
//! of `op` that should be applied next while preserving its intent.
//!
//! | `op` step  | applied step            | result                                      |
//! |------------|-------------------------|---------------------------------------------|
//! | Insert     | Insert / Delete / Reorder | index shifted; exact ties by `(client, opId)`, smaller first |
//! | Insert     | Delete of its parent    | dropped                                     |
//! | Update f   | Update f, same target   | last writer wins on `(timestamp, client, opId)`; loser dropped |
//! | Update     | Delete of target        | dropped                                     |
//! | Update parent | Delete of new parent | dropped                                     |
//! | Delete     | Delete of target        | dropped (idempotent)                        |
//! | Delete     | reparent across its subtree | reparent undone first, then deleted     |
//! | Reorder    | Delete of target        | dropped                                     |
//! | Reorder    | anything else           | unchanged; index resolved at apply time     |
//! | any        | Restore                 | unchanged; resolved at apply time           |
//! | Restore    | any                     | unchanged                                   |
//!
//! Deletes cascade to descendants, so "Delete of target" means the target is
//! in the applied op's `removed` list.
//!
//! A delete removes the subtree as it stood at the delete's base version.
//! An object moved into that subtree concurrently survives at its old
//! parent; one moved out of it is deleted with the rest.
//!
//! Reorders keep their absolute index, so a reorder racing an insert lands
//! in a different slot depending on which one the coordinator applies
//! first. Every replica follows the coordinator's order, so they still
//! agree.

use std::collections::HashSet;

use crate::artboard::{AppliedOp, Effect};
use crate::object::{Field, FieldValue, ObjectId};
use crate::operation::{OpKind, Operation, Step};

/// Rewrite `op` so it can be applied after `applied`.
///
/// The result's `base_version` is `applied.version`. Steps that lose their
/// conflicts are dropped; an operation with no surviving steps becomes
/// [`OpKind::Noop`].
pub fn transform(op: &Operation, applied: &AppliedOp) -> Operation {
    let mut next = if op.is_noop() || op.is_restore() {
        op.clone()
    } else {
        let removed: HashSet<ObjectId> = applied.removed.iter().copied().collect();
        let against = applied.op.steps();
        let steps = op
            .steps()
            .into_iter()
            .flat_map(|step| transform_step(step, op, &against, applied, &removed))
            .collect();
        op.with_steps(steps)
    };
    next.base_version = applied.version;
    next
}

/// Transform `op` sequentially against every applied operation in `history`
/// (in applied order).
pub fn transform_all<'a, I>(op: &Operation, history: I) -> Operation
where
    I: IntoIterator<Item = &'a AppliedOp>,
{
    let mut current = op.clone();
    for applied in history {
        if current.is_noop() {
            break;
        }
        current = transform(&current, applied);
    }
    current
}

fn transform_step(
    step: Step,
    op: &Operation,
    against: &[Step],
    applied: &AppliedOp,
    removed: &HashSet<ObjectId>,
) -> Vec<Step> {
    match step.kind {
        OpKind::Insert { object, index } => {
            if object.parent.is_some_and(|p| removed.contains(&p)) {
                log::debug!("op {}: insert into deleted group dropped", op.op_id);
                return Vec::new();
            }
            let index = shift_insert(index, op, applied);
            vec![Step::new(step.target, OpKind::Insert { object, index })]
        }
        OpKind::Update { field, value } => {
            if removed.contains(&step.target) {
                log::debug!("op {}: update of deleted {} dropped", op.op_id, step.target);
                return Vec::new();
            }
            if let FieldValue::Object(Some(parent)) = &value {
                if field == Field::Parent && removed.contains(parent) {
                    log::debug!("op {}: move of {} into deleted {parent} dropped", op.op_id, step.target);
                    return Vec::new();
                }
            }
            let overwritten = against.iter().any(|other| {
                other.target == step.target
                    && matches!(&other.kind, OpKind::Update { field: f, .. } if *f == field)
            });
            if overwritten && op.lww_key() < applied.op.lww_key() {
                log::debug!(
                    "op {}: {:?} on {} lost to op {}",
                    op.op_id,
                    field,
                    step.target,
                    applied.op.op_id
                );
                return Vec::new();
            }
            vec![Step::new(step.target, OpKind::Update { field, value })]
        }
        OpKind::Delete => {
            if removed.contains(&step.target) {
                return Vec::new();
            }
            let mut steps = undo_crossings(step.target, applied);
            steps.push(step);
            steps
        }
        OpKind::Reorder { .. } => {
            if removed.contains(&step.target) {
                return Vec::new();
            }
            vec![step]
        }
        OpKind::Group(_) | OpKind::Restore { .. } | OpKind::Noop => vec![step],
    }
}

/// Parent resets that put objects moved across `root`'s subtree boundary
/// back where they were at the delete's base.
fn undo_crossings(root: ObjectId, applied: &AppliedOp) -> Vec<Step> {
    let mut undone: Vec<ObjectId> = Vec::new();
    let mut steps = Vec::new();
    for moved in applied.reparented.iter().filter(|r| r.crossed(root)) {
        if undone.contains(&moved.object) || applied.removed.contains(&moved.object) {
            continue;
        }
        undone.push(moved.object);
        steps.push(Step::update(moved.object, Field::Parent, FieldValue::Object(moved.previous)));
    }
    steps
}

/// Shift an insert position past the positional effects of `applied`.
fn shift_insert(mut index: usize, op: &Operation, applied: &AppliedOp) -> usize {
    let theirs_first = applied.op.insert_key() < op.insert_key();
    for effect in &applied.effects {
        match *effect {
            Effect::Inserted(at) => {
                if at < index || (at == index && theirs_first) {
                    index += 1;
                }
            }
            Effect::Removed(at) => {
                if at < index {
                    index -= 1;
                }
            }
            Effect::Moved { from, to } => {
                if from < index {
                    index -= 1;
                }
                if to < index || (to == index && theirs_first) {
                    index += 1;
                }
            }
            Effect::Reset => {}
        }
    }
    index
}
