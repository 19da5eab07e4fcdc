#![forbid(unsafe_code)]

//! Boundary to the backing store.
//!
//! The engine only ever talks to storage through [`NodeStore`]. Every
//! mutating call takes an optional timestamp so that the writes of one
//! command phase share a single logical moment.

mod memory;

pub use memory::{MemoryStore, StoreCall};

use crate::ids::{NodeId, ParentRef, TemplateId, TreeId};
use crate::node::{Node, NodeData};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PersistError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("node not found: {0}")]
    NotFound(NodeId),
    #[error("node already exists: {0}")]
    Conflict(NodeId),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Partial field set for one node. `None` leaves the stored field alone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpdate {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<TemplateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<NodeData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ids: Option<Vec<ParentRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starred: Option<bool>,
}

impl NodeUpdate {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            name: None,
            template_id: None,
            data: None,
            parent_ids: None,
            order: None,
            starred: None,
        }
    }

    /// Fields that differ between `before` and `after`. Parent references and
    /// order always travel together.
    pub fn diff(before: &Node, after: &Node) -> Self {
        let mut update = Self::new(after.id.clone());
        if before.name != after.name {
            update.name = Some(after.name.clone());
        }
        if before.template_id != after.template_id {
            update.template_id = Some(after.template_id.clone());
        }
        if before.data != after.data {
            update.data = Some(after.data.clone());
        }
        if before.parent_ids != after.parent_ids || before.order != after.order {
            update.parent_ids = Some(after.parent_ids.clone());
            update.order = Some(after.order.clone());
        }
        if before.starred != after.starred {
            update.starred = Some(after.starred);
        }
        update
    }

    /// Parent references and order of `node`, nothing else.
    pub fn structure(node: &Node) -> Self {
        let mut update = Self::new(node.id.clone());
        update.parent_ids = Some(node.parent_ids.clone());
        update.order = Some(node.order.clone());
        update
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.template_id.is_none()
            && self.data.is_none()
            && self.parent_ids.is_none()
            && self.order.is_none()
            && self.starred.is_none()
    }

    pub fn apply_to(&self, node: &mut Node) {
        if let Some(name) = &self.name {
            node.name = name.clone();
        }
        if let Some(template_id) = &self.template_id {
            node.template_id = template_id.clone();
        }
        if let Some(data) = &self.data {
            node.data = data.clone();
        }
        if let Some(parent_ids) = &self.parent_ids {
            node.parent_ids = parent_ids.clone();
        }
        if let Some(order) = &self.order {
            node.order = order.clone();
        }
        if let Some(starred) = self.starred {
            node.starred = starred;
        }
    }
}

/// One entry of a batch delete. With `parent_to_unlink` set, a node that has
/// other parents only loses that reference; otherwise it is removed along
/// with every descendant reachable only through it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTarget {
    pub node_id: NodeId,
    pub parent_to_unlink: Option<ParentRef>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedNode {
    pub node: Node,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchCreated {
    pub created: Vec<Node>,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleted {
    pub deleted_ids: Vec<NodeId>,
    pub timestamp: i64,
}

/// Persistence collaborator. Implementations are moved onto the executor's
/// worker thread, hence `Send`.
pub trait NodeStore: Send {
    fn fetch_nodes(&mut self, tree: &TreeId) -> Result<Vec<Node>, PersistError>;

    fn create_node(&mut self, tree: &TreeId, node: &Node) -> Result<PersistedNode, PersistError>;

    fn batch_create_nodes(
        &mut self,
        tree: &TreeId,
        nodes: &[Node],
        timestamp: Option<i64>,
    ) -> Result<BatchCreated, PersistError>;

    fn update_node(
        &mut self,
        tree: &TreeId,
        update: &NodeUpdate,
        timestamp: Option<i64>,
    ) -> Result<i64, PersistError>;

    fn batch_update_nodes(
        &mut self,
        tree: &TreeId,
        updates: &[NodeUpdate],
        timestamp: Option<i64>,
    ) -> Result<i64, PersistError>;

    fn batch_delete_nodes(
        &mut self,
        tree: &TreeId,
        targets: &[DeleteTarget],
        timestamp: Option<i64>,
    ) -> Result<BatchDeleted, PersistError>;

    fn add_parent_to_node(
        &mut self,
        tree: &TreeId,
        node: &NodeId,
        parent: &ParentRef,
        order: u32,
        timestamp: Option<i64>,
    ) -> Result<i64, PersistError>;

    fn remove_parent_from_node(
        &mut self,
        tree: &TreeId,
        node: &NodeId,
        parent: &ParentRef,
        timestamp: Option<i64>,
    ) -> Result<i64, PersistError>;

    /// Shifts every child of `parent` with order `>= from_order` up by one.
    fn reorder_siblings_for_add(
        &mut self,
        tree: &TreeId,
        parent: &ParentRef,
        from_order: u32,
        timestamp: Option<i64>,
    ) -> Result<(), PersistError>;

    /// Rewrites the children of `parent` to contiguous `0..n-1`.
    fn resequence_siblings(&mut self, tree: &TreeId, parent: &ParentRef)
    -> Result<(), PersistError>;
}

pub fn now_ms() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
