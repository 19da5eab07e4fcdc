#![forbid(unsafe_code)]

use super::{BuildError, finish};
use crate::command::{Command, CommandPayload, StoreOp};
use crate::edit::EditSet;
use crate::forest::Forest;
use crate::ids::{NodeId, ParentRef, TemplateId};
use crate::node::{Node, NodeData};
use crate::order::rank_u32;
use crate::persist::NodeUpdate;
use std::collections::BTreeSet;

/// A node to be created. Parent and order are assigned by [`add_nodes`].
#[derive(Clone, Debug, PartialEq)]
pub struct NewNode {
    pub id: NodeId,
    pub template_id: TemplateId,
    pub name: String,
    pub data: NodeData,
    pub starred: bool,
}

impl NewNode {
    pub fn new(template_id: TemplateId, name: impl Into<String>) -> Self {
        Self::with_id(NodeId::generate(), template_id, name)
    }

    pub fn with_id(id: NodeId, template_id: TemplateId, name: impl Into<String>) -> Self {
        Self {
            id,
            template_id,
            name: name.into(),
            data: NodeData::new(),
            starred: false,
        }
    }

    pub fn with_data(mut self, data: NodeData) -> Self {
        self.data = data;
        self
    }
}

/// Inserts `nodes` consecutively under `parent` at `position` (`None`
/// appends). Siblings at or after the insertion point shift up.
pub fn add_nodes(
    forest: &Forest,
    parent: &ParentRef,
    nodes: Vec<NewNode>,
    position: Option<u32>,
) -> Result<Command, BuildError> {
    if nodes.is_empty() {
        return Err(BuildError::EmptyTargets);
    }
    if !forest.parent_exists(parent) {
        return Err(BuildError::ParentNotFound(parent.clone()));
    }
    let mut seen = BTreeSet::new();
    for new in &nodes {
        if forest.contains(&new.id) || !seen.insert(new.id.clone()) {
            return Err(BuildError::NodeExists(new.id.clone()));
        }
    }

    let mut edits = EditSet::new(forest);
    let existing = edits.siblings(parent);
    let index = position
        .map(|p| usize::try_from(p).unwrap_or(usize::MAX))
        .unwrap_or(existing.len())
        .min(existing.len());
    let count = nodes.len();

    let mut list = existing.clone();
    let mut node_ids = Vec::with_capacity(count);
    for (offset, new) in nodes.into_iter().enumerate() {
        list.insert(index + offset, new.id.clone());
        node_ids.push(new.id.clone());
        edits.insert_node(Node {
            id: new.id,
            template_id: new.template_id,
            name: new.name,
            data: new.data,
            parent_ids: vec![parent.clone()],
            order: vec![u32::MAX],
            starred: new.starred,
        });
    }
    edits.place(parent, &list)?;

    // The store shifts siblings from the order value currently held at the
    // insertion point; any sibling whose final order differs from that
    // prediction gets an explicit structural update.
    let shift_from = existing
        .get(index)
        .and_then(|id| forest.node(id))
        .and_then(|node| node.order_under(parent));
    let mut writes = Vec::new();
    if let Some(from) = shift_from {
        for offset in 0..count {
            writes.push(StoreOp::ReorderForAdd {
                parent: parent.clone(),
                from_order: from.saturating_add(rank_u32(offset)),
            });
        }
    }
    let mut corrections = Vec::new();
    for id in &existing {
        let base = forest.node(id).and_then(|node| node.order_under(parent));
        let Some(record) = edits.node(id) else {
            continue;
        };
        let predicted = match (base, shift_from) {
            (Some(order), Some(from)) if order >= from => {
                Some(order.saturating_add(rank_u32(count)))
            }
            (base, _) => base,
        };
        if record.order_under(parent) != predicted {
            corrections.push(NodeUpdate::structure(record));
        }
    }

    let payload = CommandPayload::Add {
        parent: parent.clone(),
        node_ids: node_ids.clone(),
        position: rank_u32(index),
    };
    finish(edits, payload, move |_, after| {
        let created = after
            .iter()
            .filter(|image| node_ids.contains(&image.id))
            .filter_map(|image| image.node.clone())
            .collect();
        writes.push(StoreOp::CreateNodes(created));
        if !corrections.is_empty() {
            writes.push(StoreOp::UpdateNodes(corrections));
        }
        writes
    })
}
