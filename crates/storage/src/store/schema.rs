#![forbid(unsafe_code)]

use super::StoreError;
use rusqlite::{Connection, params};

pub(super) const SCHEMA_VERSION: &str = "v1";

const PRAGMAS: &str = r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
"#;

const CORE: &str = r#"

        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS nodes (
          tree TEXT NOT NULL,
          id TEXT NOT NULL,
          template_id TEXT NOT NULL,
          name TEXT NOT NULL,
          data_json TEXT NOT NULL,
          starred INTEGER NOT NULL DEFAULT 0,
          updated_at_ms INTEGER NOT NULL,
          PRIMARY KEY (tree, id)
        );

        -- One row per parent reference. `slot` keeps the position of the
        -- reference inside the node's parent list; `ord` is the node's
        -- position among the children of `parent`.
        CREATE TABLE IF NOT EXISTS node_parents (
          tree TEXT NOT NULL,
          node_id TEXT NOT NULL,
          slot INTEGER NOT NULL,
          parent TEXT NOT NULL,
          ord INTEGER NOT NULL,
          PRIMARY KEY (tree, node_id, parent),
          FOREIGN KEY (tree, node_id) REFERENCES nodes(tree, id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS templates (
          tree TEXT NOT NULL,
          id TEXT NOT NULL,
          body_json TEXT NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          PRIMARY KEY (tree, id)
        );
"#;

const INDEXES: &str = r#"

        CREATE INDEX IF NOT EXISTS idx_node_parents_children ON node_parents(tree, parent, ord, node_id);
"#;

pub(super) fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    let mut sql = String::new();
    sql.push_str(PRAGMAS);
    sql.push_str(CORE);
    sql.push_str(INDEXES);
    conn.execute_batch(&sql)?;

    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params!["schema_version", SCHEMA_VERSION],
    )?;
    Ok(())
}
