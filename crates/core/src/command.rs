#![forbid(unsafe_code)]

//! Reversible units of work.
//!
//! A command carries the full before and after records of every node it
//! touches, so the in-memory side of undo and redo is an exact swap of
//! images. The forward persistence plan is kept separately because the store
//! needs the specific calls (shift siblings, then insert) rather than a
//! generic overwrite.

use crate::forest::{Forest, ForestError, NodeImage};
use crate::ids::{NodeId, ParentRef, TemplateId, TreeId};
use crate::node::Node;
use crate::persist::{DeleteTarget, NodeStore, NodeUpdate, PersistError, now_ms};
use serde::{Deserialize, Serialize};

/// A node as it appears under one parent.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceRef {
    pub node: NodeId,
    pub parent: ParentRef,
}

impl InstanceRef {
    pub fn new(node: NodeId, parent: ParentRef) -> Self {
        Self { node, parent }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Add,
    Update,
    Delete,
    Move,
    PasteAsClone,
    BatchUpdateData,
    BatchRetemplate,
    ToggleStarred,
    PropagateNames,
    Resequence,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Move => "move",
            Self::PasteAsClone => "paste_as_clone",
            Self::BatchUpdateData => "batch_update_data",
            Self::BatchRetemplate => "batch_retemplate",
            Self::ToggleStarred => "toggle_starred",
            Self::PropagateNames => "propagate_names",
            Self::Resequence => "resequence",
        }
    }
}

/// What the caller asked for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandPayload {
    Add {
        parent: ParentRef,
        node_ids: Vec<NodeId>,
        position: u32,
    },
    Update {
        node_id: NodeId,
    },
    Delete {
        targets: Vec<InstanceRef>,
    },
    Move {
        node_id: NodeId,
        from: ParentRef,
        to: ParentRef,
        position: u32,
    },
    PasteAsClone {
        node_id: NodeId,
        parent: ParentRef,
        position: u32,
    },
    BatchUpdateData {
        node_ids: Vec<NodeId>,
        fields: Vec<String>,
    },
    BatchRetemplate {
        node_ids: Vec<NodeId>,
        template_id: TemplateId,
    },
    ToggleStarred {
        node_ids: Vec<NodeId>,
        starred: bool,
    },
    PropagateNames {
        template_id: TemplateId,
        node_ids: Vec<NodeId>,
    },
    Resequence {
        parent: ParentRef,
    },
}

impl CommandPayload {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Add { .. } => CommandKind::Add,
            Self::Update { .. } => CommandKind::Update,
            Self::Delete { .. } => CommandKind::Delete,
            Self::Move { .. } => CommandKind::Move,
            Self::PasteAsClone { .. } => CommandKind::PasteAsClone,
            Self::BatchUpdateData { .. } => CommandKind::BatchUpdateData,
            Self::BatchRetemplate { .. } => CommandKind::BatchRetemplate,
            Self::ToggleStarred { .. } => CommandKind::ToggleStarred,
            Self::PropagateNames { .. } => CommandKind::PropagateNames,
            Self::Resequence { .. } => CommandKind::Resequence,
        }
    }
}

/// One call against the store, in forward direction.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreOp {
    ReorderForAdd { parent: ParentRef, from_order: u32 },
    CreateNodes(Vec<Node>),
    UpdateNode(NodeUpdate),
    UpdateNodes(Vec<NodeUpdate>),
    DeleteNodes(Vec<DeleteTarget>),
    AddParent {
        node: NodeId,
        parent: ParentRef,
        order: u32,
    },
    RemoveParent { node: NodeId, parent: ParentRef },
    Resequence { parent: ParentRef },
}

impl StoreOp {
    fn run(&self, store: &mut dyn NodeStore, tree: &TreeId, ts: i64) -> Result<(), PersistError> {
        let ts = Some(ts);
        match self {
            Self::ReorderForAdd { parent, from_order } => {
                store.reorder_siblings_for_add(tree, parent, *from_order, ts)
            }
            Self::CreateNodes(nodes) => store.batch_create_nodes(tree, nodes, ts).map(drop),
            Self::UpdateNode(update) => store.update_node(tree, update, ts).map(drop),
            Self::UpdateNodes(updates) => store.batch_update_nodes(tree, updates, ts).map(drop),
            Self::DeleteNodes(targets) => store.batch_delete_nodes(tree, targets, ts).map(drop),
            Self::AddParent {
                node,
                parent,
                order,
            } => store
                .add_parent_to_node(tree, node, parent, *order, ts)
                .map(drop),
            Self::RemoveParent { node, parent } => store
                .remove_parent_from_node(tree, node, parent, ts)
                .map(drop),
            Self::Resequence { parent } => store.resequence_siblings(tree, parent),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    payload: CommandPayload,
    tree_id: TreeId,
    before: Vec<NodeImage>,
    after: Vec<NodeImage>,
    writes: Vec<StoreOp>,
}

impl Command {
    pub(crate) fn new(
        payload: CommandPayload,
        tree_id: TreeId,
        before: Vec<NodeImage>,
        after: Vec<NodeImage>,
        writes: Vec<StoreOp>,
    ) -> Self {
        Self {
            payload,
            tree_id,
            before,
            after,
            writes,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &CommandPayload {
        &self.payload
    }

    pub fn tree_id(&self) -> &TreeId {
        &self.tree_id
    }

    /// Every record this command overwrites or destroys, as it was before.
    pub fn original_state(&self) -> &[NodeImage] {
        &self.before
    }

    pub fn result_state(&self) -> &[NodeImage] {
        &self.after
    }

    pub fn writes(&self) -> &[StoreOp] {
        &self.writes
    }

    pub fn execute(&self, forest: &mut Forest) -> Result<(), ForestError> {
        self.check_tree(forest)?;
        forest.apply_images(&self.before, &self.after)
    }

    pub fn undo_state(&self, forest: &mut Forest) -> Result<(), ForestError> {
        self.check_tree(forest)?;
        forest.apply_images(&self.after, &self.before)
    }

    /// Checks that `execute` would succeed on `forest` without changing it.
    pub fn validate(&self, forest: &Forest) -> Result<(), ForestError> {
        self.check_tree(forest)?;
        forest.validate_images(&self.before, &self.after)
    }

    /// Checks that `undo_state` would succeed on `forest`.
    pub fn validate_undo(&self, forest: &Forest) -> Result<(), ForestError> {
        self.check_tree(forest)?;
        forest.validate_images(&self.after, &self.before)
    }

    /// Mirrors the mutation into the store. Returns the timestamp stamped on
    /// every write.
    pub fn post(&self, store: &mut dyn NodeStore, timestamp: Option<i64>) -> Result<i64, PersistError> {
        let ts = timestamp.unwrap_or_else(now_ms);
        for op in &self.writes {
            op.run(store, &self.tree_id, ts)?;
        }
        Ok(ts)
    }

    pub fn undo(&self, store: &mut dyn NodeStore, timestamp: Option<i64>) -> Result<i64, PersistError> {
        write_images(store, &self.tree_id, &self.after, &self.before, timestamp)
    }

    pub fn redo(&self, store: &mut dyn NodeStore, timestamp: Option<i64>) -> Result<i64, PersistError> {
        write_images(store, &self.tree_id, &self.before, &self.after, timestamp)
    }

    fn check_tree(&self, forest: &Forest) -> Result<(), ForestError> {
        if forest.tree_id() != &self.tree_id {
            return Err(ForestError::Invariant(format!(
                "command for tree {} applied to tree {}",
                self.tree_id,
                forest.tree_id()
            )));
        }
        Ok(())
    }
}

/// Moves stored records from `from` to `to`: creates first so new parents
/// exist, then updates, then deletes once nothing references the removed
/// nodes any more.
fn write_images(
    store: &mut dyn NodeStore,
    tree: &TreeId,
    from: &[NodeImage],
    to: &[NodeImage],
    timestamp: Option<i64>,
) -> Result<i64, PersistError> {
    let ts = timestamp.unwrap_or_else(now_ms);
    let mut creates = Vec::new();
    let mut updates = Vec::new();
    let mut deletes = Vec::new();
    for (source, target) in from.iter().zip(to) {
        match (&source.node, &target.node) {
            (None, Some(node)) => creates.push(node.clone()),
            (Some(old), Some(new)) => {
                let update = NodeUpdate::diff(old, new);
                if !update.is_empty() {
                    updates.push(update);
                }
            }
            (Some(old), None) => deletes.push(DeleteTarget {
                node_id: old.id.clone(),
                parent_to_unlink: None,
            }),
            (None, None) => {}
        }
    }
    if !creates.is_empty() {
        store.batch_create_nodes(tree, &creates, Some(ts))?;
    }
    if !updates.is_empty() {
        store.batch_update_nodes(tree, &updates, Some(ts))?;
    }
    if !deletes.is_empty() {
        store.batch_delete_nodes(tree, &deletes, Some(ts))?;
    }
    Ok(ts)
}
