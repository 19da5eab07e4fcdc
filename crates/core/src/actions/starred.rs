#![forbid(unsafe_code)]

use super::{BuildError, batch_update_plan, finish};
use crate::command::{Command, CommandPayload};
use crate::edit::EditSet;
use crate::forest::Forest;
use crate::ids::NodeId;

/// Unstars every target when all of them are starred, otherwise stars all.
pub fn toggle_starred(forest: &Forest, ids: &[NodeId]) -> Result<Command, BuildError> {
    if ids.is_empty() {
        return Err(BuildError::EmptyTargets);
    }
    let mut all_starred = true;
    for id in ids {
        let node = forest
            .node(id)
            .ok_or_else(|| BuildError::NodeNotFound(id.clone()))?;
        all_starred &= node.starred;
    }
    let starred = !all_starred;

    let mut edits = EditSet::new(forest);
    for id in ids {
        if let Some(node) = edits.node_mut(id) {
            node.starred = starred;
        }
    }
    let payload = CommandPayload::ToggleStarred {
        node_ids: ids.to_vec(),
        starred,
    };
    finish(edits, payload, batch_update_plan)
}
