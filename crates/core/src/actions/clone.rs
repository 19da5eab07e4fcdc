#![forbid(unsafe_code)]

use super::{BuildError, changed_updates, check_no_cycle, finish, insert_at};
use crate::command::{Command, CommandPayload, StoreOp};
use crate::edit::EditSet;
use crate::forest::Forest;
use crate::ids::{NodeId, ParentRef};
use std::collections::BTreeSet;

/// Adds a further parent reference to an existing node. Existing references
/// are left alone.
pub fn paste_as_clone(
    forest: &Forest,
    node: &NodeId,
    parent: &ParentRef,
    position: Option<u32>,
) -> Result<Command, BuildError> {
    let record = forest
        .node(node)
        .ok_or_else(|| BuildError::NodeNotFound(node.clone()))?;
    if !forest.parent_exists(parent) {
        return Err(BuildError::ParentNotFound(parent.clone()));
    }
    if record.has_parent(parent) {
        return Err(BuildError::AlreadyLinked {
            node: node.clone(),
            parent: parent.clone(),
        });
    }

    let mut edits = EditSet::new(forest);
    check_no_cycle(&edits, node, parent)?;
    if let Some(cloned) = edits.node_mut(node) {
        cloned.parent_ids.push(parent.clone());
        cloned.order.push(u32::MAX);
    }
    let mut list = edits.siblings(parent);
    list.retain(|id| id != node);
    let position = insert_at(&mut list, node.clone(), position);
    edits.place(parent, &list)?;
    let order = edits
        .node(node)
        .and_then(|record| record.order_under(parent))
        .unwrap_or(position);

    let payload = CommandPayload::PasteAsClone {
        node_id: node.clone(),
        parent: parent.clone(),
        position,
    };
    let node = node.clone();
    let parent = parent.clone();
    finish(edits, payload, move |before, after| {
        let skip = BTreeSet::from([node.clone()]);
        let mut writes = vec![StoreOp::AddParent {
            node,
            parent,
            order,
        }];
        let shifted = changed_updates(before, after, &skip);
        if !shifted.is_empty() {
            writes.push(StoreOp::UpdateNodes(shifted));
        }
        writes
    })
}
