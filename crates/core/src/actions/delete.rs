#![forbid(unsafe_code)]

use super::{BuildError, changed_updates, finish};
use crate::command::{Command, CommandPayload, InstanceRef, StoreOp};
use crate::edit::EditSet;
use crate::forest::Forest;
use crate::ids::{NodeId, ParentRef};
use crate::persist::DeleteTarget;
use std::collections::BTreeSet;

/// Deletes each target instance. A clone only loses that parent reference;
/// a node losing its last reference is removed together with every
/// descendant that was reachable only through it.
pub fn delete_instances(forest: &Forest, targets: &[InstanceRef]) -> Result<Command, BuildError> {
    if targets.is_empty() {
        return Err(BuildError::EmptyTargets);
    }
    for target in targets {
        if !forest.contains(&target.node) {
            return Err(BuildError::NodeNotFound(target.node.clone()));
        }
        if forest.instance(&target.node, &target.parent).is_none() {
            return Err(BuildError::InstanceNotFound {
                node: target.node.clone(),
                parent: target.parent.clone(),
            });
        }
    }

    let mut edits = EditSet::new(forest);
    let mut touched = BTreeSet::new();
    let mut sent = Vec::new();
    for target in targets {
        // An earlier target's cascade may already have taken this one.
        let live = edits
            .node(&target.node)
            .is_some_and(|node| node.has_parent(&target.parent));
        if !live {
            continue;
        }
        sent.push(DeleteTarget {
            node_id: target.node.clone(),
            parent_to_unlink: Some(target.parent.clone()),
        });
        detach(&mut edits, &target.node, &target.parent, &mut touched);
    }
    for parent in &touched {
        edits.resequence(parent)?;
    }

    let payload = CommandPayload::Delete {
        targets: targets.to_vec(),
    };
    finish(edits, payload, move |before, after| {
        let mut writes = vec![StoreOp::DeleteNodes(sent)];
        let survivors = changed_updates(before, after, &BTreeSet::new());
        if !survivors.is_empty() {
            writes.push(StoreOp::UpdateNodes(survivors));
        }
        writes
    })
}

fn detach(
    edits: &mut EditSet<'_>,
    node: &NodeId,
    parent: &ParentRef,
    touched: &mut BTreeSet<ParentRef>,
) {
    let mut pending = vec![(node.clone(), parent.clone())];
    while let Some((id, parent)) = pending.pop() {
        let Some(record) = edits.node_mut(&id) else {
            continue;
        };
        if record.remove_parent_slot(&parent).is_none() {
            continue;
        }
        let orphaned = record.parent_ids.is_empty();
        touched.insert(parent);
        if !orphaned {
            continue;
        }
        edits.remove_node(&id);
        let as_parent = ParentRef::Node(id);
        for child in edits.siblings(&as_parent) {
            pending.push((child, as_parent.clone()));
        }
    }
}
