#![forbid(unsafe_code)]

mod error;
mod schema;

pub use error::StoreError;

use cf_core::persist::{
    BatchCreated, BatchDeleted, DeleteTarget, NodeStore, NodeUpdate, PersistError, PersistedNode,
    now_ms,
};
use cf_core::{Node, NodeData, NodeId, ParentRef, Template, TemplateId, TreeId};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DB_FILE: &str = "cloneforest.db";

#[derive(Debug)]
pub struct SqliteNodeStore {
    conn: Connection,
    storage_dir: PathBuf,
}

impl SqliteNodeStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let conn = Connection::open(storage_dir.join(DB_FILE))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        schema::install_schema(&conn)?;

        tracing::info!(dir = %storage_dir.display(), "node store opened");
        Ok(Self { conn, storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn schema_version(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key=?1",
                params!["schema_version"],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn load_nodes(&self, tree: &TreeId) -> Result<Vec<Node>, StoreError> {
        load_nodes(&self.conn, tree)
    }

    pub fn put_template(&mut self, tree: &TreeId, template: &Template) -> Result<(), StoreError> {
        let body = serde_json::to_string(template)?;
        self.conn.execute(
            "INSERT INTO templates(tree, id, body_json, updated_at_ms) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(tree, id) DO UPDATE SET body_json=excluded.body_json, updated_at_ms=excluded.updated_at_ms",
            params![tree.as_str(), template.id.as_str(), body, now_ms()],
        )?;
        Ok(())
    }

    pub fn fetch_templates(&self, tree: &TreeId) -> Result<Vec<Template>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT body_json FROM templates WHERE tree=?1 ORDER BY id ASC")?;
        let bodies = stmt
            .query_map(params![tree.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = Vec::with_capacity(bodies.len());
        for body in bodies {
            out.push(serde_json::from_str(&body)?);
        }
        Ok(out)
    }

    pub fn template(&self, tree: &TreeId, id: &TemplateId) -> Result<Option<Template>, StoreError> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body_json FROM templates WHERE tree=?1 AND id=?2",
                params![tree.as_str(), id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|body| serde_json::from_str(&body).map_err(StoreError::from))
            .transpose()
    }

    fn in_tx<T>(
        &mut self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let tx = self.conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

impl NodeStore for SqliteNodeStore {
    fn fetch_nodes(&mut self, tree: &TreeId) -> Result<Vec<Node>, PersistError> {
        Ok(load_nodes(&self.conn, tree)?)
    }

    fn create_node(&mut self, tree: &TreeId, node: &Node) -> Result<PersistedNode, PersistError> {
        let ts = now_ms();
        self.in_tx(|tx| insert_node(tx, tree, node, ts))?;
        Ok(PersistedNode {
            node: node.clone(),
            timestamp: ts,
        })
    }

    fn batch_create_nodes(
        &mut self,
        tree: &TreeId,
        nodes: &[Node],
        timestamp: Option<i64>,
    ) -> Result<BatchCreated, PersistError> {
        let ts = timestamp.unwrap_or_else(now_ms);
        self.in_tx(|tx| {
            for node in nodes {
                insert_node(tx, tree, node, ts)?;
            }
            Ok(())
        })?;
        Ok(BatchCreated {
            created: nodes.to_vec(),
            timestamp: ts,
        })
    }

    fn update_node(
        &mut self,
        tree: &TreeId,
        update: &NodeUpdate,
        timestamp: Option<i64>,
    ) -> Result<i64, PersistError> {
        let ts = timestamp.unwrap_or_else(now_ms);
        self.in_tx(|tx| apply_update(tx, tree, update, ts))?;
        Ok(ts)
    }

    fn batch_update_nodes(
        &mut self,
        tree: &TreeId,
        updates: &[NodeUpdate],
        timestamp: Option<i64>,
    ) -> Result<i64, PersistError> {
        let ts = timestamp.unwrap_or_else(now_ms);
        self.in_tx(|tx| {
            for update in updates {
                apply_update(tx, tree, update, ts)?;
            }
            Ok(())
        })?;
        Ok(ts)
    }

    fn batch_delete_nodes(
        &mut self,
        tree: &TreeId,
        targets: &[DeleteTarget],
        timestamp: Option<i64>,
    ) -> Result<BatchDeleted, PersistError> {
        let ts = timestamp.unwrap_or_else(now_ms);
        let deleted_ids = self.in_tx(|tx| delete_targets(tx, tree, targets, ts))?;
        tracing::debug!(tree = %tree, deleted = deleted_ids.len(), "batch delete");
        Ok(BatchDeleted {
            deleted_ids,
            timestamp: ts,
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
        let ts = timestamp.unwrap_or_else(now_ms);
        self.in_tx(|tx| {
            let record = read_node(tx, tree, node)?.ok_or_else(|| StoreError::UnknownId(node.clone()))?;
            if record.has_parent(parent) {
                return Err(StoreError::InvalidInput(format!(
                    "{node} is already a child of {parent}"
                )));
            }
            if parent.node_id() == Some(node) {
                return Err(StoreError::InvalidInput(format!("{node} cannot parent itself")));
            }
            let slot: i64 = tx.query_row(
                "SELECT COALESCE(MAX(slot), -1) + 1 FROM node_parents WHERE tree=?1 AND node_id=?2",
                params![tree.as_str(), node.as_str()],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO node_parents(tree, node_id, slot, parent, ord) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![tree.as_str(), node.as_str(), slot, parent.as_str(), i64::from(order)],
            )?;
            touch(tx, tree, node, ts)
        })?;
        Ok(ts)
    }

    fn remove_parent_from_node(
        &mut self,
        tree: &TreeId,
        node: &NodeId,
        parent: &ParentRef,
        timestamp: Option<i64>,
    ) -> Result<i64, PersistError> {
        let ts = timestamp.unwrap_or_else(now_ms);
        self.in_tx(|tx| {
            let record = read_node(tx, tree, node)?.ok_or_else(|| StoreError::UnknownId(node.clone()))?;
            if !record.has_parent(parent) {
                return Err(StoreError::InvalidInput(format!(
                    "{node} is not a child of {parent}"
                )));
            }
            if record.parent_ids.len() <= 1 {
                return Err(StoreError::InvalidInput(format!("{node} has no other parent")));
            }
            tx.execute(
                "DELETE FROM node_parents WHERE tree=?1 AND node_id=?2 AND parent=?3",
                params![tree.as_str(), node.as_str(), parent.as_str()],
            )?;
            touch(tx, tree, node, ts)
        })?;
        Ok(ts)
    }

    fn reorder_siblings_for_add(
        &mut self,
        tree: &TreeId,
        parent: &ParentRef,
        from_order: u32,
        timestamp: Option<i64>,
    ) -> Result<(), PersistError> {
        let ts = timestamp.unwrap_or_else(now_ms);
        self.in_tx(|tx| {
            tx.execute(
                "UPDATE nodes SET updated_at_ms=?3 WHERE tree=?1 AND id IN \
                 (SELECT node_id FROM node_parents WHERE tree=?1 AND parent=?2 AND ord>=?4)",
                params![tree.as_str(), parent.as_str(), ts, i64::from(from_order)],
            )?;
            tx.execute(
                "UPDATE node_parents SET ord = ord + 1 WHERE tree=?1 AND parent=?2 AND ord>=?3",
                params![tree.as_str(), parent.as_str(), i64::from(from_order)],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    fn resequence_siblings(
        &mut self,
        tree: &TreeId,
        parent: &ParentRef,
    ) -> Result<(), PersistError> {
        let rewritten = self.in_tx(|tx| resequence(tx, tree, parent))?;
        tracing::debug!(tree = %tree, parent = %parent, rewritten, "resequenced siblings");
        Ok(())
    }
}

fn parse_node_id(value: &str) -> Result<NodeId, StoreError> {
    NodeId::try_new(value).map_err(|err| StoreError::InvalidRow(format!("node id {value:?}: {err}")))
}

fn parse_parent(value: &str) -> Result<ParentRef, StoreError> {
    ParentRef::parse(value).map_err(|err| StoreError::InvalidRow(format!("parent {value:?}: {err}")))
}

fn to_order(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::InvalidRow(format!("order {value} out of range")))
}

struct NodeRow {
    id: String,
    template_id: String,
    name: String,
    data_json: String,
    starred: bool,
}

impl NodeRow {
    fn into_node(self, slots: Vec<(ParentRef, u32)>) -> Result<Node, StoreError> {
        let id = parse_node_id(&self.id)?;
        let template_id = TemplateId::try_new(self.template_id.as_str()).map_err(|err| {
            StoreError::InvalidRow(format!("template id {:?}: {err}", self.template_id))
        })?;
        let data: NodeData = serde_json::from_str(&self.data_json)?;
        let (parent_ids, order) = slots.into_iter().unzip();
        Ok(Node {
            id,
            template_id,
            name: self.name,
            data,
            parent_ids,
            order,
            starred: self.starred,
        })
    }
}

const NODE_COLUMNS: &str = "id, template_id, name, data_json, starred";

fn node_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRow> {
    Ok(NodeRow {
        id: row.get(0)?,
        template_id: row.get(1)?,
        name: row.get(2)?,
        data_json: row.get(3)?,
        starred: row.get::<_, i64>(4)? != 0,
    })
}

fn load_nodes(conn: &Connection, tree: &TreeId) -> Result<Vec<Node>, StoreError> {
    let mut slots: BTreeMap<String, Vec<(ParentRef, u32)>> = BTreeMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT node_id, parent, ord FROM node_parents WHERE tree=?1 ORDER BY node_id ASC, slot ASC",
        )?;
        let mut rows = stmt.query(params![tree.as_str()])?;
        while let Some(row) = rows.next()? {
            let node_id: String = row.get(0)?;
            let parent = parse_parent(&row.get::<_, String>(1)?)?;
            let ord = to_order(row.get(2)?)?;
            slots.entry(node_id).or_default().push((parent, ord));
        }
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes WHERE tree=?1 ORDER BY id ASC"
    ))?;
    let rows = stmt
        .query_map(params![tree.as_str()], node_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let node_slots = slots.remove(&row.id).unwrap_or_default();
        out.push(row.into_node(node_slots)?);
    }
    Ok(out)
}

fn read_node(conn: &Connection, tree: &TreeId, id: &NodeId) -> Result<Option<Node>, StoreError> {
    let row = conn
        .query_row(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE tree=?1 AND id=?2"),
            params![tree.as_str(), id.as_str()],
            node_row,
        )
        .optional()?;
    let Some(row) = row else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT parent, ord FROM node_parents WHERE tree=?1 AND node_id=?2 ORDER BY slot ASC",
    )?;
    let raw = stmt
        .query_map(params![tree.as_str(), id.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut slots = Vec::with_capacity(raw.len());
    for (parent, ord) in raw {
        slots.push((parse_parent(&parent)?, to_order(ord)?));
    }
    row.into_node(slots).map(Some)
}

fn write_parents(conn: &Connection, tree: &TreeId, node: &Node) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM node_parents WHERE tree=?1 AND node_id=?2",
        params![tree.as_str(), node.id.as_str()],
    )?;
    for (slot, (parent, order)) in node.parent_ids.iter().zip(&node.order).enumerate() {
        let slot = i64::try_from(slot).unwrap_or(i64::MAX);
        conn.execute(
            "INSERT INTO node_parents(tree, node_id, slot, parent, ord) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                tree.as_str(),
                node.id.as_str(),
                slot,
                parent.as_str(),
                i64::from(*order)
            ],
        )?;
    }
    Ok(())
}

fn insert_node(conn: &Connection, tree: &TreeId, node: &Node, ts: i64) -> Result<(), StoreError> {
    node.check_shape()
        .map_err(|err| StoreError::InvalidInput(err.to_string()))?;
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM nodes WHERE tree=?1 AND id=?2",
            params![tree.as_str(), node.id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_some() {
        return Err(StoreError::AlreadyExists(node.id.clone()));
    }
    conn.execute(
        "INSERT INTO nodes(tree, id, template_id, name, data_json, starred, updated_at_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            tree.as_str(),
            node.id.as_str(),
            node.template_id.as_str(),
            node.name,
            serde_json::to_string(&node.data)?,
            i64::from(node.starred),
            ts
        ],
    )?;
    write_parents(conn, tree, node)
}

fn apply_update(
    conn: &Connection,
    tree: &TreeId,
    update: &NodeUpdate,
    ts: i64,
) -> Result<(), StoreError> {
    let mut node =
        read_node(conn, tree, &update.id)?.ok_or_else(|| StoreError::UnknownId(update.id.clone()))?;
    update.apply_to(&mut node);
    node.check_shape()
        .map_err(|err| StoreError::InvalidInput(err.to_string()))?;
    conn.execute(
        "UPDATE nodes SET template_id=?3, name=?4, data_json=?5, starred=?6, updated_at_ms=?7 \
         WHERE tree=?1 AND id=?2",
        params![
            tree.as_str(),
            node.id.as_str(),
            node.template_id.as_str(),
            node.name,
            serde_json::to_string(&node.data)?,
            i64::from(node.starred),
            ts
        ],
    )?;
    if update.parent_ids.is_some() || update.order.is_some() {
        write_parents(conn, tree, &node)?;
    }
    Ok(())
}

fn touch(conn: &Connection, tree: &TreeId, id: &NodeId, ts: i64) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE nodes SET updated_at_ms=?3 WHERE tree=?1 AND id=?2",
        params![tree.as_str(), id.as_str(), ts],
    )?;
    Ok(())
}

fn delete_targets(
    conn: &Connection,
    tree: &TreeId,
    targets: &[DeleteTarget],
    ts: i64,
) -> Result<Vec<NodeId>, StoreError> {
    let mut deleted = Vec::new();
    for target in targets {
        let Some(node) = read_node(conn, tree, &target.node_id)? else {
            continue;
        };
        if let Some(parent) = &target.parent_to_unlink {
            if !node.has_parent(parent) {
                continue;
            }
            if node.parent_ids.len() > 1 {
                conn.execute(
                    "DELETE FROM node_parents WHERE tree=?1 AND node_id=?2 AND parent=?3",
                    params![tree.as_str(), node.id.as_str(), parent.as_str()],
                )?;
                touch(conn, tree, &node.id, ts)?;
                continue;
            }
        }
        deleted.extend(delete_cascade(conn, tree, &node.id, ts)?);
    }
    Ok(deleted)
}

/// Deletes `id` and every node left without a parent as a result. Nodes that
/// keep another parent only lose the reference.
fn delete_cascade(
    conn: &Connection,
    tree: &TreeId,
    id: &NodeId,
    ts: i64,
) -> Result<Vec<NodeId>, StoreError> {
    let mut deleted = Vec::new();
    let mut pending = vec![id.clone()];
    while let Some(current) = pending.pop() {
        conn.execute(
            "DELETE FROM node_parents WHERE tree=?1 AND node_id=?2",
            params![tree.as_str(), current.as_str()],
        )?;
        let removed = conn.execute(
            "DELETE FROM nodes WHERE tree=?1 AND id=?2",
            params![tree.as_str(), current.as_str()],
        )?;
        if removed == 0 {
            continue;
        }

        let children = {
            let mut stmt = conn
                .prepare("SELECT node_id FROM node_parents WHERE tree=?1 AND parent=?2")?;
            stmt.query_map(params![tree.as_str(), current.as_str()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?
        };
        conn.execute(
            "DELETE FROM node_parents WHERE tree=?1 AND parent=?2",
            params![tree.as_str(), current.as_str()],
        )?;
        for child in children {
            let child = parse_node_id(&child)?;
            let remaining: i64 = conn.query_row(
                "SELECT COUNT(*) FROM node_parents WHERE tree=?1 AND node_id=?2",
                params![tree.as_str(), child.as_str()],
                |row| row.get(0),
            )?;
            if remaining == 0 {
                pending.push(child);
            } else {
                touch(conn, tree, &child, ts)?;
            }
        }
        deleted.push(current);
    }
    Ok(deleted)
}

/// Same `(order, id)` tie-break as the in-memory resequencing.
fn resequence(conn: &Connection, tree: &TreeId, parent: &ParentRef) -> Result<usize, StoreError> {
    let children = {
        let mut stmt = conn.prepare(
            "SELECT node_id, ord FROM node_parents WHERE tree=?1 AND parent=?2 ORDER BY ord ASC, node_id ASC",
        )?;
        stmt.query_map(params![tree.as_str(), parent.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?
    };
    let mut rewritten = 0;
    for (rank, (node_id, ord)) in children.iter().enumerate() {
        let rank = i64::try_from(rank).unwrap_or(i64::MAX);
        if *ord == rank {
            continue;
        }
        conn.execute(
            "UPDATE node_parents SET ord=?4 WHERE tree=?1 AND node_id=?2 AND parent=?3",
            params![tree.as_str(), node_id, parent.as_str(), rank],
        )?;
        rewritten += 1;
    }
    Ok(rewritten)
}
