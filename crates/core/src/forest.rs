#![forbid(unsafe_code)]

//! Arena representation of the hierarchy.
//!
//! One record per logical node plus a child index with one entry per
//! instance. Clone payloads are shared because there is only one record.

use crate::ids::{NodeId, ParentRef, TreeId};
use crate::node::{Node, ShapeError};
use crate::order::{self, OrderError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

pub const MAX_TREE_DEPTH: usize = 512;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ForestError {
    #[error("duplicate node id {0}")]
    DuplicateNode(NodeId),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error("node {node} references missing parent {parent}")]
    DanglingParent { node: NodeId, parent: ParentRef },
    #[error("removing {removed} would leave {child} without its parent")]
    OrphanedChild { removed: NodeId, child: NodeId },
    #[error("node {0} does not match the state this change was computed from")]
    Stale(NodeId),
    #[error("parent cycle through {0}")]
    Cycle(NodeId),
    #[error("tree deeper than {0} levels")]
    DepthExceeded(usize),
    #[error("forest invariant violated: {0}")]
    Invariant(String),
}

/// Full record of one node on one side of a change; `None` means absent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeImage {
    pub id: NodeId,
    pub node: Option<Node>,
}

/// One node as it appears under one parent.
#[derive(Clone, Copy, Debug)]
pub struct Instance<'a> {
    pub node: &'a Node,
    pub parent: &'a ParentRef,
    pub order: u32,
    pub children: &'a [NodeId],
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TreeInstance {
    pub id: NodeId,
    pub parent: ParentRef,
    pub order: u32,
    pub children: Vec<TreeInstance>,
}

/// What reconstruction had to repair in the flat input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconstructReport {
    pub normalized: Vec<NodeId>,
    pub duplicate_refs: Vec<(NodeId, ParentRef)>,
    pub dropped_refs: Vec<(NodeId, ParentRef)>,
    pub excised: Vec<NodeId>,
}

impl ReconstructReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_refs.is_empty() && self.dropped_refs.is_empty() && self.excised.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Forest {
    tree_id: TreeId,
    nodes: BTreeMap<NodeId, Node>,
    children: BTreeMap<ParentRef, Vec<NodeId>>,
}

impl Forest {
    pub fn empty(tree_id: TreeId) -> Self {
        Self {
            tree_id,
            nodes: BTreeMap::new(),
            children: BTreeMap::new(),
        }
    }

    pub fn reconstruct(
        tree_id: TreeId,
        flat: impl IntoIterator<Item = Node>,
    ) -> Result<Self, ForestError> {
        Self::reconstruct_with_report(tree_id, flat).map(|(forest, _)| forest)
    }

    pub fn reconstruct_with_report(
        tree_id: TreeId,
        flat: impl IntoIterator<Item = Node>,
    ) -> Result<(Self, ReconstructReport), ForestError> {
        let mut report = ReconstructReport::default();
        let mut nodes = BTreeMap::new();

        for mut node in flat {
            if node.parent_ids.is_empty() {
                node.normalize_parents();
                report.normalized.push(node.id.clone());
            }
            if node.parent_ids.len() != node.order.len() {
                return Err(ShapeError::LengthMismatch(node.id.clone()).into());
            }
            for parent in node.dedup_parents() {
                report.duplicate_refs.push((node.id.clone(), parent));
            }
            let id = node.id.clone();
            if nodes.insert(id.clone(), node).is_some() {
                return Err(ForestError::DuplicateNode(id));
            }
        }

        // References to unknown parents are dropped; a node left with none is
        // excised, which can in turn strand its own children.
        loop {
            let mut changed = false;
            let mut excise = Vec::new();
            let ids: Vec<NodeId> = nodes.keys().cloned().collect();
            for id in &ids {
                let Some(node) = nodes.get(id) else {
                    continue;
                };
                let dangling: Vec<ParentRef> = node
                    .parent_ids
                    .iter()
                    .filter(|parent| match parent {
                        ParentRef::Root => false,
                        ParentRef::Node(pid) => pid == id || !nodes.contains_key(pid),
                    })
                    .cloned()
                    .collect();
                if dangling.is_empty() {
                    continue;
                }
                let Some(node) = nodes.get_mut(id) else {
                    continue;
                };
                for parent in dangling {
                    node.remove_parent_slot(&parent);
                    report.dropped_refs.push((id.clone(), parent));
                }
                if node.parent_ids.is_empty() {
                    excise.push(id.clone());
                }
                changed = true;
            }
            for id in excise {
                nodes.remove(&id);
                report.excised.push(id);
            }
            if !changed {
                break;
            }
        }

        if !report.is_clean() {
            tracing::warn!(
                tree = %tree_id,
                duplicate_refs = report.duplicate_refs.len(),
                dropped_refs = report.dropped_refs.len(),
                excised = report.excised.len(),
                "reconstruct repaired flat input"
            );
        }

        let mut forest = Self {
            tree_id,
            nodes,
            children: BTreeMap::new(),
        };
        for node in forest.nodes.values() {
            for parent in &node.parent_ids {
                forest
                    .children
                    .entry(parent.clone())
                    .or_default()
                    .push(node.id.clone());
            }
        }
        let parents: Vec<ParentRef> = forest.children.keys().cloned().collect();
        for parent in &parents {
            forest.sort_children(parent);
        }
        Ok((forest, report))
    }

    pub fn tree_id(&self) -> &TreeId {
        &self.tree_id
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn instance_count(&self) -> usize {
        self.children.values().map(Vec::len).sum()
    }

    /// Instances directly under `parent`, in contextual order.
    pub fn children_of(&self, parent: &ParentRef) -> &[NodeId] {
        self.children.get(parent).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn roots(&self) -> &[NodeId] {
        self.children_of(&ParentRef::Root)
    }

    /// Parent contexts that currently have at least one child.
    pub fn parent_contexts(&self) -> impl Iterator<Item = &ParentRef> {
        self.children.keys()
    }

    /// Whether `parent` can hold children: the root, or an existing node.
    pub fn parent_exists(&self, parent: &ParentRef) -> bool {
        match parent {
            ParentRef::Root => true,
            ParentRef::Node(id) => self.nodes.contains_key(id),
        }
    }

    pub fn instance<'a>(&'a self, id: &NodeId, parent: &'a ParentRef) -> Option<Instance<'a>> {
        let node = self.nodes.get(id)?;
        let order = node.order_under(parent)?;
        Some(Instance {
            node,
            parent,
            order,
            children: self.children_of(&ParentRef::Node(id.clone())),
        })
    }

    /// The node and its first parent reference.
    pub fn find_node_and_parent(&self, id: &NodeId) -> Option<(&Node, &ParentRef)> {
        let node = self.nodes.get(id)?;
        let parent = node.parent_ids.first()?;
        Some((node, parent))
    }

    /// The node and the given parent, if that instance exists.
    pub fn find_node_and_contextual_parent<'a>(
        &'a self,
        id: &NodeId,
        parent: &ParentRef,
    ) -> Option<(&'a Node, &'a ParentRef)> {
        let node = self.nodes.get(id)?;
        let index = node.parent_index(parent)?;
        Some((node, &node.parent_ids[index]))
    }

    /// True when `ancestor` is reachable from `node` by following parent
    /// references. Terminates on cyclic input.
    pub fn is_ancestor(&self, ancestor: &NodeId, node: &NodeId) -> bool {
        let mut stack = vec![node.clone()];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let Some(record) = self.nodes.get(&current) else {
                continue;
            };
            for parent in &record.parent_ids {
                if let ParentRef::Node(pid) = parent {
                    if pid == ancestor {
                        return true;
                    }
                    stack.push(pid.clone());
                }
            }
        }
        false
    }

    pub fn flatten(&self) -> Vec<Node> {
        self.nodes.values().cloned().collect()
    }

    /// SHA-256 over the canonical flattened records.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.tree_id.as_str().as_bytes());
        for node in self.nodes.values() {
            hasher.update(b"\n");
            if let Ok(bytes) = serde_json::to_vec(node) {
                hasher.update(&bytes);
            }
        }
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }

    /// The instance hierarchy, or an empty list when the input contains a
    /// parent cycle reachable from the root.
    pub fn tree(&self) -> Vec<TreeInstance> {
        match self.try_tree() {
            Ok(tree) => tree,
            Err(err) => {
                tracing::warn!(tree = %self.tree_id, error = %err, "tree view unavailable");
                Vec::new()
            }
        }
    }

    pub fn try_tree(&self) -> Result<Vec<TreeInstance>, ForestError> {
        let mut path = Vec::new();
        self.build_level(&ParentRef::Root, &mut path)
    }

    pub fn try_subtree(
        &self,
        id: &NodeId,
        parent: &ParentRef,
    ) -> Result<Option<TreeInstance>, ForestError> {
        let Some(instance) = self.instance(id, parent) else {
            return Ok(None);
        };
        let mut path = vec![id.clone()];
        let children = self.build_level(&ParentRef::Node(id.clone()), &mut path)?;
        Ok(Some(TreeInstance {
            id: id.clone(),
            parent: parent.clone(),
            order: instance.order,
            children,
        }))
    }

    fn build_level(
        &self,
        parent: &ParentRef,
        path: &mut Vec<NodeId>,
    ) -> Result<Vec<TreeInstance>, ForestError> {
        if path.len() >= MAX_TREE_DEPTH {
            return Err(ForestError::DepthExceeded(MAX_TREE_DEPTH));
        }
        let mut out = Vec::new();
        for id in self.children_of(parent) {
            if path.contains(id) {
                return Err(ForestError::Cycle(id.clone()));
            }
            let order = self
                .nodes
                .get(id)
                .and_then(|node| node.order_under(parent))
                .unwrap_or_default();
            path.push(id.clone());
            let children = self.build_level(&ParentRef::Node(id.clone()), path)?;
            path.pop();
            out.push(TreeInstance {
                id: id.clone(),
                parent: parent.clone(),
                order,
                children,
            });
        }
        Ok(out)
    }

    /// Full consistency check: record shapes, index agreement and contiguous
    /// `0..n-1` order values under every parent.
    pub fn check_invariants(&self) -> Result<(), ForestError> {
        let mut expected_instances = 0;
        for node in self.nodes.values() {
            node.check_shape()?;
            for parent in &node.parent_ids {
                if !self.parent_exists(parent) {
                    return Err(ForestError::DanglingParent {
                        node: node.id.clone(),
                        parent: parent.clone(),
                    });
                }
            }
            expected_instances += node.parent_ids.len();
        }
        if expected_instances != self.instance_count() {
            return Err(ForestError::Invariant(format!(
                "{expected_instances} parent references but {} indexed instances",
                self.instance_count()
            )));
        }
        for (parent, ids) in &self.children {
            let mut orders = Vec::with_capacity(ids.len());
            for id in ids {
                let node = self.nodes.get(id).ok_or_else(|| {
                    ForestError::Invariant(format!("index lists unknown node {id}"))
                })?;
                orders.push(order::contextual_order(node, parent)?);
            }
            if orders.windows(2).any(|pair| pair[0] > pair[1]) {
                return Err(ForestError::Invariant(format!(
                    "children of {parent} are not sorted"
                )));
            }
            if !order::is_contiguous(&orders) {
                return Err(ForestError::Invariant(format!(
                    "children of {parent} have order {orders:?}"
                )));
            }
        }
        Ok(())
    }

    /// Replaces the records named in `images`, provided the current records
    /// equal `expected`. Validation runs before anything is touched, so an
    /// error leaves the forest unchanged.
    pub fn apply_images(
        &mut self,
        expected: &[NodeImage],
        images: &[NodeImage],
    ) -> Result<(), ForestError> {
        self.validate_images(expected, images)?;

        let mut touched = BTreeSet::new();
        for image in images {
            if let Some(old) = self.nodes.remove(&image.id) {
                for parent in &old.parent_ids {
                    if let Some(list) = self.children.get_mut(parent) {
                        list.retain(|id| id != &image.id);
                    }
                    touched.insert(parent.clone());
                }
            }
        }
        for image in images {
            let Some(node) = &image.node else {
                continue;
            };
            for parent in &node.parent_ids {
                self.children
                    .entry(parent.clone())
                    .or_default()
                    .push(node.id.clone());
                touched.insert(parent.clone());
            }
            self.nodes.insert(node.id.clone(), node.clone());
        }
        for parent in &touched {
            self.sort_children(parent);
        }
        Ok(())
    }

    pub(crate) fn validate_images(
        &self,
        expected: &[NodeImage],
        images: &[NodeImage],
    ) -> Result<(), ForestError> {
        for image in expected {
            if self.nodes.get(&image.id) != image.node.as_ref() {
                return Err(ForestError::Stale(image.id.clone()));
            }
        }

        let incoming: BTreeMap<&NodeId, Option<&Node>> = images
            .iter()
            .map(|image| (&image.id, image.node.as_ref()))
            .collect();
        let exists_after = |id: &NodeId| match incoming.get(id) {
            Some(node) => node.is_some(),
            None => self.nodes.contains_key(id),
        };

        for image in images {
            match &image.node {
                Some(node) => {
                    if node.id != image.id {
                        return Err(ForestError::Invariant(format!(
                            "image for {} carries node {}",
                            image.id, node.id
                        )));
                    }
                    node.check_shape()?;
                    for parent in &node.parent_ids {
                        if let ParentRef::Node(pid) = parent {
                            if !exists_after(pid) {
                                return Err(ForestError::DanglingParent {
                                    node: node.id.clone(),
                                    parent: parent.clone(),
                                });
                            }
                        }
                    }
                }
                None => {
                    let as_parent = ParentRef::Node(image.id.clone());
                    for child in self.children_of(&as_parent) {
                        let released = match incoming.get(child) {
                            Some(Some(after)) => !after.has_parent(&as_parent),
                            Some(None) => true,
                            None => false,
                        };
                        if !released {
                            return Err(ForestError::OrphanedChild {
                                removed: image.id.clone(),
                                child: child.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn sort_children(&mut self, parent: &ParentRef) {
        let nodes = &self.nodes;
        let Some(list) = self.children.get_mut(parent) else {
            return;
        };
        if list.is_empty() {
            self.children.remove(parent);
            return;
        }
        list.sort_by_cached_key(|id| {
            (
                nodes
                    .get(id)
                    .and_then(|node| node.order_under(parent))
                    .unwrap_or(u32::MAX),
                id.clone(),
            )
        });
    }
}

#[cfg(test)]
mod tests;
