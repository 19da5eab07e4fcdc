#![forbid(unsafe_code)]

use super::{BuildError, finish};
use crate::command::{Command, CommandPayload, StoreOp};
use crate::edit::EditSet;
use crate::forest::Forest;
use crate::ids::ParentRef;

/// Rewrites the children of `parent` to contiguous `0..n-1`, keeping their
/// current relative order. Repairs sibling sets loaded with gaps or ties.
pub fn resequence_parent(forest: &Forest, parent: &ParentRef) -> Result<Command, BuildError> {
    if !forest.parent_exists(parent) {
        return Err(BuildError::ParentNotFound(parent.clone()));
    }
    let mut edits = EditSet::new(forest);
    edits.resequence(parent)?;
    let payload = CommandPayload::Resequence {
        parent: parent.clone(),
    };
    let parent = parent.clone();
    finish(edits, payload, move |_, _| vec![StoreOp::Resequence { parent }])
}
