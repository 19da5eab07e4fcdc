#![forbid(unsafe_code)]

use super::{BuildError, batch_update_plan, check_no_cycle, finish, insert_at};
use crate::command::{Command, CommandPayload};
use crate::edit::EditSet;
use crate::forest::Forest;
use crate::ids::{NodeId, ParentRef};

/// Cuts the instance of `node` under `from` and places it under `to` at
/// `position` (`None` appends). With `from == to` this is a reorder.
pub fn move_instance(
    forest: &Forest,
    node: &NodeId,
    from: &ParentRef,
    to: &ParentRef,
    position: Option<u32>,
) -> Result<Command, BuildError> {
    let record = forest
        .node(node)
        .ok_or_else(|| BuildError::NodeNotFound(node.clone()))?;
    if !record.has_parent(from) {
        return Err(BuildError::InstanceNotFound {
            node: node.clone(),
            parent: from.clone(),
        });
    }
    if !forest.parent_exists(to) {
        return Err(BuildError::ParentNotFound(to.clone()));
    }

    let mut edits = EditSet::new(forest);
    if from != to {
        if record.has_parent(to) {
            return Err(BuildError::AlreadyLinked {
                node: node.clone(),
                parent: to.clone(),
            });
        }
        check_no_cycle(&edits, node, to)?;
        if let Some(moving) = edits.node_mut(node) {
            if let Some(index) = moving.parent_index(from) {
                moving.parent_ids[index] = to.clone();
                moving.order[index] = u32::MAX;
            }
        }
        edits.resequence(from)?;
    }

    let mut list = edits.siblings(to);
    list.retain(|id| id != node);
    let position = insert_at(&mut list, node.clone(), position);
    edits.place(to, &list)?;

    let payload = CommandPayload::Move {
        node_id: node.clone(),
        from: from.clone(),
        to: to.clone(),
        position,
    };
    finish(edits, payload, batch_update_plan)
}
