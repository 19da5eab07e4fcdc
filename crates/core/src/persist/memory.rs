#![forbid(unsafe_code)]

use super::{
    BatchCreated, BatchDeleted, DeleteTarget, NodeStore, NodeUpdate, PersistError, PersistedNode,
    now_ms,
};
use crate::ids::{NodeId, ParentRef, TreeId};
use crate::node::Node;
use crate::order::rank_u32;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One recorded store call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreCall {
    pub op: &'static str,
    pub nodes: Vec<NodeId>,
    pub parent: Option<ParentRef>,
    pub timestamp: Option<i64>,
}

#[derive(Default)]
struct MemoryState {
    trees: BTreeMap<TreeId, BTreeMap<NodeId, Node>>,
    calls: Vec<StoreCall>,
    offline: bool,
}

impl MemoryState {
    fn begin(
        &mut self,
        op: &'static str,
        nodes: Vec<NodeId>,
        parent: Option<ParentRef>,
        timestamp: Option<i64>,
    ) -> Result<(), PersistError> {
        self.calls.push(StoreCall {
            op,
            nodes,
            parent,
            timestamp,
        });
        if self.offline {
            return Err(PersistError::Unavailable(format!("{op}: store is offline")));
        }
        Ok(())
    }

    fn tree(&mut self, tree: &TreeId) -> &mut BTreeMap<NodeId, Node> {
        self.trees.entry(tree.clone()).or_default()
    }
}

/// In-process store. Clones share state, so a test can keep a handle while
/// the executor owns another.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(tree: &TreeId, nodes: impl IntoIterator<Item = Node>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock();
            let records = state.tree(tree);
            for node in nodes {
                records.insert(node.id.clone(), node);
            }
        }
        store
    }

    /// While offline every call fails with [`PersistError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn nodes(&self, tree: &TreeId) -> Vec<Node> {
        self.state
            .lock()
            .trees
            .get(tree)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Removes `id` and every node that loses its last parent as a consequence.
pub(crate) fn cascade_delete(records: &mut BTreeMap<NodeId, Node>, id: &NodeId) -> Vec<NodeId> {
    let mut deleted = Vec::new();
    let mut pending = vec![id.clone()];
    while let Some(current) = pending.pop() {
        if records.remove(&current).is_none() {
            continue;
        }
        let as_parent = ParentRef::Node(current.clone());
        deleted.push(current);
        for node in records.values_mut() {
            if node.remove_parent_slot(&as_parent).is_some() && node.parent_ids.is_empty() {
                pending.push(node.id.clone());
            }
        }
    }
    deleted
}

impl NodeStore for MemoryStore {
    fn fetch_nodes(&mut self, tree: &TreeId) -> Result<Vec<Node>, PersistError> {
        let mut state = self.state.lock();
        state.begin("fetch_nodes", Vec::new(), None, None)?;
        Ok(state.tree(tree).values().cloned().collect())
    }

    fn create_node(&mut self, tree: &TreeId, node: &Node) -> Result<PersistedNode, PersistError> {
        let created = self.batch_create_nodes(tree, std::slice::from_ref(node), None)?;
        Ok(PersistedNode {
            node: node.clone(),
            timestamp: created.timestamp,
        })
    }

    fn batch_create_nodes(
        &mut self,
        tree: &TreeId,
        nodes: &[Node],
        timestamp: Option<i64>,
    ) -> Result<BatchCreated, PersistError> {
        let mut state = self.state.lock();
        let ids = nodes.iter().map(|node| node.id.clone()).collect();
        state.begin("batch_create_nodes", ids, None, timestamp)?;
        let records = state.tree(tree);
        if let Some(existing) = nodes.iter().find(|node| records.contains_key(&node.id)) {
            return Err(PersistError::Conflict(existing.id.clone()));
        }
        for node in nodes {
            records.insert(node.id.clone(), node.clone());
        }
        Ok(BatchCreated {
            created: nodes.to_vec(),
            timestamp: timestamp.unwrap_or_else(now_ms),
        })
    }

    fn update_node(
        &mut self,
        tree: &TreeId,
        update: &NodeUpdate,
        timestamp: Option<i64>,
    ) -> Result<i64, PersistError> {
        let mut state = self.state.lock();
        state.begin("update_node", vec![update.id.clone()], None, timestamp)?;
        let node = state
            .tree(tree)
            .get_mut(&update.id)
            .ok_or_else(|| PersistError::NotFound(update.id.clone()))?;
        update.apply_to(node);
        Ok(timestamp.unwrap_or_else(now_ms))
    }

    fn batch_update_nodes(
        &mut self,
        tree: &TreeId,
        updates: &[NodeUpdate],
        timestamp: Option<i64>,
    ) -> Result<i64, PersistError> {
        let mut state = self.state.lock();
        let ids = updates.iter().map(|update| update.id.clone()).collect();
        state.begin("batch_update_nodes", ids, None, timestamp)?;
        let records = state.tree(tree);
        if let Some(missing) = updates.iter().find(|update| !records.contains_key(&update.id)) {
            return Err(PersistError::NotFound(missing.id.clone()));
        }
        for update in updates {
            if let Some(node) = records.get_mut(&update.id) {
                update.apply_to(node);
            }
        }
        Ok(timestamp.unwrap_or_else(now_ms))
    }

    fn batch_delete_nodes(
        &mut self,
        tree: &TreeId,
        targets: &[DeleteTarget],
        timestamp: Option<i64>,
    ) -> Result<BatchDeleted, PersistError> {
        let mut state = self.state.lock();
        let ids = targets.iter().map(|target| target.node_id.clone()).collect();
        state.begin("batch_delete_nodes", ids, None, timestamp)?;
        let records = state.tree(tree);
        let mut deleted_ids = Vec::new();
        for target in targets {
            let Some(node) = records.get_mut(&target.node_id) else {
                continue;
            };
            if let Some(parent) = &target.parent_to_unlink {
                if !node.has_parent(parent) {
                    continue;
                }
                if node.parent_ids.len() > 1 {
                    node.remove_parent_slot(parent);
                    continue;
                }
            }
            deleted_ids.extend(cascade_delete(records, &target.node_id));
        }
        Ok(BatchDeleted {
            deleted_ids,
            timestamp: timestamp.unwrap_or_else(now_ms),
        })
    }

    fn add_parent_to_node(
        &mut self,
        tree: &TreeId,
        node: &NodeId,
        parent: &ParentRef,
        order: u32,
        timestamp: Option<i64>,
    ) -> Result<i64, PersistError> {
        let mut state = self.state.lock();
        state.begin(
            "add_parent_to_node",
            vec![node.clone()],
            Some(parent.clone()),
            timestamp,
        )?;
        let record = state
            .tree(tree)
            .get_mut(node)
            .ok_or_else(|| PersistError::NotFound(node.clone()))?;
        if record.has_parent(parent) {
            return Err(PersistError::InvalidInput(format!(
                "{node} is already a child of {parent}"
            )));
        }
        record.parent_ids.push(parent.clone());
        record.order.push(order);
        Ok(timestamp.unwrap_or_else(now_ms))
    }

    fn remove_parent_from_node(
        &mut self,
        tree: &TreeId,
        node: &NodeId,
        parent: &ParentRef,
        timestamp: Option<i64>,
    ) -> Result<i64, PersistError> {
        let mut state = self.state.lock();
        state.begin(
            "remove_parent_from_node",
            vec![node.clone()],
            Some(parent.clone()),
            timestamp,
        )?;
        let record = state
            .tree(tree)
            .get_mut(node)
            .ok_or_else(|| PersistError::NotFound(node.clone()))?;
        if record.parent_ids.len() <= 1 {
            return Err(PersistError::InvalidInput(format!(
                "{node} has no other parent"
            )));
        }
        record.remove_parent_slot(parent);
        Ok(timestamp.unwrap_or_else(now_ms))
    }

    fn reorder_siblings_for_add(
        &mut self,
        tree: &TreeId,
        parent: &ParentRef,
        from_order: u32,
        timestamp: Option<i64>,
    ) -> Result<(), PersistError> {
        let mut state = self.state.lock();
        state.begin(
            "reorder_siblings_for_add",
            Vec::new(),
            Some(parent.clone()),
            timestamp,
        )?;
        for node in state.tree(tree).values_mut() {
            let Some(index) = node.parent_index(parent) else {
                continue;
            };
            if let Some(order) = node.order.get_mut(index) {
                if *order >= from_order {
                    *order = order.saturating_add(1);
                }
            }
        }
        Ok(())
    }

    fn resequence_siblings(
        &mut self,
        tree: &TreeId,
        parent: &ParentRef,
    ) -> Result<(), PersistError> {
        let mut state = self.state.lock();
        state.begin("resequence_siblings", Vec::new(), Some(parent.clone()), None)?;
        let records = state.tree(tree);
        let mut children: Vec<(u32, NodeId)> = records
            .values()
            .filter_map(|node| Some((node.order_under(parent)?, node.id.clone())))
            .collect();
        children.sort();
        for (rank, (_, id)) in children.iter().enumerate() {
            if let Some(node) = records.get_mut(id) {
                if let Some(order) = node
                    .parent_index(parent)
                    .and_then(|index| node.order.get_mut(index))
                {
                    *order = rank_u32(rank);
                }
            }
        }
        Ok(())
    }
}
