#![forbid(unsafe_code)]

use crate::ids::{NodeId, ParentRef, TemplateId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub type NodeData = BTreeMap<String, Value>;

/// A logical record. `order[i]` is its position among the siblings under
/// `parent_ids[i]`; one instance exists per parent reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub template_id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub data: NodeData,
    #[serde(default)]
    pub parent_ids: Vec<ParentRef>,
    #[serde(default)]
    pub order: Vec<u32>,
    #[serde(default)]
    pub starred: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("node {0}: parent_ids and order differ in length")]
    LengthMismatch(NodeId),
    #[error("node {0}: no parent reference")]
    NoParents(NodeId),
    #[error("node {node}: parent {parent} referenced twice")]
    DuplicateParent { node: NodeId, parent: ParentRef },
    #[error("node {0}: references itself as parent")]
    SelfParent(NodeId),
}

impl Node {
    pub fn new(id: NodeId, template_id: TemplateId, name: impl Into<String>) -> Self {
        Self {
            id,
            template_id,
            name: name.into(),
            data: NodeData::new(),
            parent_ids: Vec::new(),
            order: Vec::new(),
            starred: false,
        }
    }

    pub fn with_parent(mut self, parent: ParentRef, order: u32) -> Self {
        self.parent_ids.push(parent);
        self.order.push(order);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn parent_index(&self, parent: &ParentRef) -> Option<usize> {
        self.parent_ids.iter().position(|p| p == parent)
    }

    pub fn has_parent(&self, parent: &ParentRef) -> bool {
        self.parent_index(parent).is_some()
    }

    pub fn order_under(&self, parent: &ParentRef) -> Option<u32> {
        self.parent_index(parent)
            .and_then(|index| self.order.get(index).copied())
    }

    pub fn is_clone(&self) -> bool {
        self.parent_ids.len() > 1
    }

    /// Records without parents predate multi-parent support and live at the top level.
    pub fn normalize_parents(&mut self) {
        if self.parent_ids.is_empty() {
            self.parent_ids.push(ParentRef::Root);
            self.order.clear();
            self.order.push(0);
        }
    }

    /// Drops repeated references to the same parent, keeping the first slot.
    /// Returns the parents that were removed.
    pub fn dedup_parents(&mut self) -> Vec<ParentRef> {
        let mut seen = BTreeSet::new();
        let mut removed = Vec::new();
        let mut index = 0;
        while index < self.parent_ids.len() {
            if seen.insert(self.parent_ids[index].clone()) {
                index += 1;
                continue;
            }
            removed.push(self.parent_ids.remove(index));
            if index < self.order.len() {
                self.order.remove(index);
            }
        }
        removed
    }

    pub(crate) fn remove_parent_slot(&mut self, parent: &ParentRef) -> Option<u32> {
        let index = self.parent_index(parent)?;
        self.parent_ids.remove(index);
        if index < self.order.len() {
            Some(self.order.remove(index))
        } else {
            None
        }
    }

    pub fn check_shape(&self) -> Result<(), ShapeError> {
        if self.parent_ids.len() != self.order.len() {
            return Err(ShapeError::LengthMismatch(self.id.clone()));
        }
        if self.parent_ids.is_empty() {
            return Err(ShapeError::NoParents(self.id.clone()));
        }
        let mut seen = BTreeSet::new();
        for parent in &self.parent_ids {
            if parent.node_id() == Some(&self.id) {
                return Err(ShapeError::SelfParent(self.id.clone()));
            }
            if !seen.insert(parent) {
                return Err(ShapeError::DuplicateParent {
                    node: self.id.clone(),
                    parent: parent.clone(),
                });
            }
        }
        Ok(())
    }
}
