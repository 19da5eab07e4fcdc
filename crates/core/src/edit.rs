#![forbid(unsafe_code)]

//! Copy-on-touch overlay that builders compute their deltas against.

use crate::forest::{Forest, NodeImage};
use crate::ids::{NodeId, ParentRef};
use crate::node::Node;
use crate::order::{OrderError, rank_u32};
use std::collections::{BTreeMap, BTreeSet};

/// Pending changes on top of a borrowed forest. The base is never written;
/// `into_images` yields the before/after records of everything that changed.
pub struct EditSet<'a> {
    base: &'a Forest,
    touched: BTreeMap<NodeId, Option<Node>>,
}

impl<'a> EditSet<'a> {
    pub fn new(base: &'a Forest) -> Self {
        Self {
            base,
            touched: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> &'a Forest {
        self.base
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        match self.touched.get(id) {
            Some(node) => node.as_ref(),
            None => self.base.node(id),
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        if !self.touched.contains_key(id) {
            let node = self.base.node(id)?.clone();
            self.touched.insert(id.clone(), Some(node));
        }
        self.touched.get_mut(id)?.as_mut()
    }

    pub fn insert_node(&mut self, node: Node) {
        self.touched.insert(node.id.clone(), Some(node));
    }

    pub fn remove_node(&mut self, id: &NodeId) -> Option<Node> {
        let current = self.node(id).cloned();
        self.touched.insert(id.clone(), None);
        current
    }

    pub fn parent_exists(&self, parent: &ParentRef) -> bool {
        match parent {
            ParentRef::Root => true,
            ParentRef::Node(id) => self.contains(id),
        }
    }

    /// Current children of `parent` with the overlay applied, sorted by
    /// `(contextual order, id)`.
    pub fn siblings(&self, parent: &ParentRef) -> Vec<NodeId> {
        let mut ids: BTreeSet<NodeId> = self.base.children_of(parent).iter().cloned().collect();
        for (id, node) in &self.touched {
            match node {
                Some(node) if node.has_parent(parent) => {
                    ids.insert(id.clone());
                }
                _ => {
                    ids.remove(id);
                }
            }
        }
        let mut list: Vec<NodeId> = ids.into_iter().collect();
        list.sort_by_cached_key(|id| {
            (
                self.node(id)
                    .and_then(|node| node.order_under(parent))
                    .unwrap_or(u32::MAX),
                id.clone(),
            )
        });
        list
    }

    /// Gives `ids` the ranks `0..n-1` under `parent`, in list order. Only
    /// slots whose value changes are touched.
    pub fn place(&mut self, parent: &ParentRef, ids: &[NodeId]) -> Result<(), OrderError> {
        for (rank, id) in ids.iter().enumerate() {
            let rank = rank_u32(rank);
            let current = self.node(id).map(|node| node.order_under(parent));
            match current {
                Some(Some(order)) if order == rank => {}
                Some(Some(_)) => {
                    if let Some(node) = self.node_mut(id) {
                        if let Some(index) = node.parent_index(parent) {
                            node.order[index] = rank;
                        }
                    }
                }
                _ => {
                    return Err(OrderError::MissingParentRef {
                        node: id.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Resequences the current children of `parent` without changing their
    /// relative order.
    pub fn resequence(&mut self, parent: &ParentRef) -> Result<(), OrderError> {
        if !self.parent_exists(parent) {
            return Ok(());
        }
        let ids = self.siblings(parent);
        self.place(parent, &ids)
    }

    /// Before and after images of every record that ended up different.
    pub fn into_images(self) -> (Vec<NodeImage>, Vec<NodeImage>) {
        let mut before = Vec::new();
        let mut after = Vec::new();
        for (id, node) in self.touched {
            let original = self.base.node(&id).cloned();
            if original == node {
                continue;
            }
            before.push(NodeImage {
                id: id.clone(),
                node: original,
            });
            after.push(NodeImage { id, node });
        }
        (before, after)
    }
}
