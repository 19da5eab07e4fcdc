#![forbid(unsafe_code)]

use super::{BuildError, changed_updates, finish};
use crate::command::{Command, CommandPayload, StoreOp};
use crate::edit::EditSet;
use crate::forest::Forest;
use crate::ids::{NodeId, TemplateId};
use crate::node::NodeData;
use std::collections::BTreeSet;

/// Field-level changes for one node. `fields` is merged into the payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeChanges {
    pub name: Option<String>,
    pub template_id: Option<TemplateId>,
    pub fields: NodeData,
    pub remove_fields: Vec<String>,
    pub starred: Option<bool>,
}

impl NodeChanges {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

pub fn update_node(
    forest: &Forest,
    id: &NodeId,
    changes: NodeChanges,
) -> Result<Command, BuildError> {
    let mut edits = EditSet::new(forest);
    let node = edits
        .node_mut(id)
        .ok_or_else(|| BuildError::NodeNotFound(id.clone()))?;
    if let Some(name) = changes.name {
        node.name = name;
    }
    if let Some(template_id) = changes.template_id {
        node.template_id = template_id;
    }
    for key in &changes.remove_fields {
        node.data.remove(key);
    }
    node.data.extend(changes.fields);
    if let Some(starred) = changes.starred {
        node.starred = starred;
    }

    let payload = CommandPayload::Update { node_id: id.clone() };
    finish(edits, payload, |before, after| {
        changed_updates(before, after, &BTreeSet::new())
            .into_iter()
            .map(StoreOp::UpdateNode)
            .collect()
    })
}
