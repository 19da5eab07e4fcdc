#![forbid(unsafe_code)]

//! Sibling ordering under one parent context.
//!
//! A node carries one order value per parent reference, so every question
//! about position has to name the parent it is asked under.

use crate::ids::{NodeId, ParentRef};
use crate::node::Node;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("node {node} has no reference to parent {parent}")]
    MissingParentRef { node: NodeId, parent: ParentRef },
    #[error("node {0}: parent_ids and order differ in length")]
    LengthMismatch(NodeId),
}

/// The order value stored for `parent` in `node`.
pub fn contextual_order(node: &Node, parent: &ParentRef) -> Result<u32, OrderError> {
    let index = node
        .parent_index(parent)
        .ok_or_else(|| OrderError::MissingParentRef {
            node: node.id.clone(),
            parent: parent.clone(),
        })?;
    node.order
        .get(index)
        .copied()
        .ok_or_else(|| OrderError::LengthMismatch(node.id.clone()))
}

/// Sorts by contextual order; equal values fall back to the id so the result
/// never depends on input order.
pub fn sort_siblings(siblings: &mut [&Node], parent: &ParentRef) -> Result<(), OrderError> {
    for node in siblings.iter() {
        contextual_order(node, parent)?;
    }
    siblings.sort_by_cached_key(|node| {
        (
            node.order_under(parent).unwrap_or(u32::MAX),
            node.id.clone(),
        )
    });
    Ok(())
}

/// One slot rewrite produced by [`resequence_siblings`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rewrite {
    pub node: NodeId,
    pub from: u32,
    pub to: u32,
}

/// Sorts `siblings` and rewrites their `parent` slot to `0..n-1`.
pub fn resequence_siblings(
    siblings: &mut [Node],
    parent: &ParentRef,
) -> Result<Vec<Rewrite>, OrderError> {
    for node in siblings.iter() {
        contextual_order(node, parent)?;
    }
    siblings.sort_by_cached_key(|node| {
        (
            node.order_under(parent).unwrap_or(u32::MAX),
            node.id.clone(),
        )
    });

    let mut rewrites = Vec::new();
    for (rank, node) in siblings.iter_mut().enumerate() {
        let rank = rank_u32(rank);
        let Some(index) = node.parent_index(parent) else {
            continue;
        };
        let from = node.order[index];
        if from != rank {
            node.order[index] = rank;
            rewrites.push(Rewrite {
                node: node.id.clone(),
                from,
                to: rank,
            });
        }
    }
    Ok(rewrites)
}

/// Order for a node appended after `siblings`.
pub fn insertion_order(siblings: &[&Node], parent: &ParentRef) -> Result<u32, OrderError> {
    let mut max = None;
    for node in siblings {
        let order = contextual_order(node, parent)?;
        max = Some(max.map_or(order, |m: u32| m.max(order)));
    }
    Ok(max.map_or(0, |m| m.saturating_add(1)))
}

pub fn is_contiguous(orders: &[u32]) -> bool {
    let mut sorted = orders.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .enumerate()
        .all(|(rank, order)| *order == rank_u32(rank))
}

pub(crate) fn rank_u32(rank: usize) -> u32 {
    u32::try_from(rank).unwrap_or(u32::MAX)
}
