#![forbid(unsafe_code)]

//! Action builders.
//!
//! Each builder validates against the current forest, computes its parent and
//! order deltas on an [`EditSet`](crate::edit::EditSet) and packages them as a
//! [`Command`]. A failed precondition returns an error and no command.

mod add;
mod batch;
mod clone;
mod delete;
mod move_node;
mod rename;
mod resequence;
mod starred;
mod update;

pub use add::{NewNode, add_nodes};
pub use batch::{batch_retemplate, batch_update_data};
pub use clone::paste_as_clone;
pub use delete::delete_instances;
pub use move_node::move_instance;
pub use rename::propagate_template_names;
pub use resequence::resequence_parent;
pub use starred::toggle_starred;
pub use update::{NodeChanges, update_node};

use crate::command::{Command, CommandPayload, StoreOp};
use crate::edit::EditSet;
use crate::forest::NodeImage;
use crate::ids::{NodeId, ParentRef, TemplateId};
use crate::order::{OrderError, rank_u32};
use crate::persist::NodeUpdate;
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),
    #[error("node {node} has no instance under {parent}")]
    InstanceNotFound { node: NodeId, parent: ParentRef },
    #[error("parent not found: {0}")]
    ParentNotFound(ParentRef),
    #[error("node already exists: {0}")]
    NodeExists(NodeId),
    #[error("placing {node} under {parent} would create a cycle")]
    WouldCycle { node: NodeId, parent: ParentRef },
    #[error("node {node} is already a child of {parent}")]
    AlreadyLinked { node: NodeId, parent: ParentRef },
    #[error("no target nodes given")]
    EmptyTargets,
    #[error("template not found: {0}")]
    TemplateNotFound(TemplateId),
    #[error("edit would not change anything")]
    NoChanges,
    #[error(transparent)]
    Order(#[from] OrderError),
}

/// Inserts `id` at `position` (clamped, `None` appends). Returns the index used.
pub(crate) fn insert_at(list: &mut Vec<NodeId>, id: NodeId, position: Option<u32>) -> u32 {
    let index = position
        .map(|p| usize::try_from(p).unwrap_or(usize::MAX))
        .unwrap_or(list.len())
        .min(list.len());
    list.insert(index, id);
    rank_u32(index)
}

/// Rejects placing `node` under `parent` when that parent is the node itself
/// or one of its descendants.
pub(crate) fn check_no_cycle(
    edits: &EditSet<'_>,
    node: &NodeId,
    parent: &ParentRef,
) -> Result<(), BuildError> {
    let ParentRef::Node(target) = parent else {
        return Ok(());
    };
    if target == node || edits.base().is_ancestor(node, target) {
        return Err(BuildError::WouldCycle {
            node: node.clone(),
            parent: parent.clone(),
        });
    }
    Ok(())
}

/// Field diffs of every record that exists on both sides, minus `skip`.
pub(crate) fn changed_updates(
    before: &[NodeImage],
    after: &[NodeImage],
    skip: &BTreeSet<NodeId>,
) -> Vec<NodeUpdate> {
    before
        .iter()
        .zip(after)
        .filter(|(_, image)| !skip.contains(&image.id))
        .filter_map(|(old, new)| match (&old.node, &new.node) {
            (Some(old), Some(new)) => Some(NodeUpdate::diff(old, new)),
            _ => None,
        })
        .filter(|update| !update.is_empty())
        .collect()
}

/// Packages the overlay as a command; `plan` builds the forward writes from
/// the final images.
pub(crate) fn finish(
    edits: EditSet<'_>,
    payload: CommandPayload,
    plan: impl FnOnce(&[NodeImage], &[NodeImage]) -> Vec<StoreOp>,
) -> Result<Command, BuildError> {
    let tree_id = edits.base().tree_id().clone();
    let (before, after) = edits.into_images();
    if after.is_empty() {
        return Err(BuildError::NoChanges);
    }
    let writes = plan(&before, &after);
    Ok(Command::new(payload, tree_id, before, after, writes))
}

/// Same-update batch for every changed record.
pub(crate) fn batch_update_plan(before: &[NodeImage], after: &[NodeImage]) -> Vec<StoreOp> {
    let updates = changed_updates(before, after, &BTreeSet::new());
    if updates.is_empty() {
        Vec::new()
    } else {
        vec![StoreOp::UpdateNodes(updates)]
    }
}

#[cfg(test)]
mod tests;
