//! Per-project embedded store — a thin façade over SQLite.
//!
//! One database file per project holds `projects`, `nodes`, `edges`, and
//! `file_hashes`. Writes are serialized through a connection mutex; batch
//! writers fragment below SQLite's bound-variable limit (999), which is a
//! correctness requirement, not an optimization.

use rusqlite::{params, params_from_iter, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::types::*;

/// Node insert chunk: 8 columns per row.
const NODE_BATCH: usize = 120;
/// Edge insert chunk: 5 columns per row.
const EDGE_BATCH: usize = 150;
/// File-hash insert chunk: 3 columns per row.
const HASH_BATCH: usize = 200;

// Every batch shape must stay under the bound-variable limit.
const _: () = assert!(NODE_BATCH * 8 < SQLITE_VAR_LIMIT);
const _: () = assert!(EDGE_BATCH * 5 < SQLITE_VAR_LIMIT);
const _: () = assert!(HASH_BATCH * 3 < SQLITE_VAR_LIMIT);

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    name        TEXT PRIMARY KEY,
    root_path   TEXT NOT NULL,
    indexed_at  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS nodes (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    project         TEXT NOT NULL REFERENCES projects(name) ON DELETE CASCADE,
    label           TEXT NOT NULL,
    name            TEXT NOT NULL,
    qualified_name  TEXT NOT NULL,
    file_path       TEXT NOT NULL DEFAULT '',
    start_line      INTEGER NOT NULL DEFAULT 0,
    end_line        INTEGER NOT NULL DEFAULT 0,
    properties      TEXT NOT NULL DEFAULT '{}',
    UNIQUE (project, qualified_name)
);
CREATE INDEX IF NOT EXISTS idx_nodes_label ON nodes(project, label);
CREATE INDEX IF NOT EXISTS idx_nodes_name  ON nodes(project, name);
CREATE INDEX IF NOT EXISTS idx_nodes_file  ON nodes(project, file_path);

CREATE TABLE IF NOT EXISTS edges (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    project     TEXT NOT NULL REFERENCES projects(name) ON DELETE CASCADE,
    source_id   INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    target_id   INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    type        TEXT NOT NULL,
    properties  TEXT NOT NULL DEFAULT '{}',
    url_path_gen TEXT GENERATED ALWAYS AS (json_extract(properties, '$.url_path')) STORED,
    UNIQUE (source_id, target_id, type)
);
CREATE INDEX IF NOT EXISTS idx_edges_source  ON edges(source_id);
CREATE INDEX IF NOT EXISTS idx_edges_target  ON edges(target_id);
CREATE INDEX IF NOT EXISTS idx_edges_type    ON edges(project, type);
CREATE INDEX IF NOT EXISTS idx_edges_urlpath ON edges(url_path_gen);

CREATE TABLE IF NOT EXISTS file_hashes (
    project   TEXT NOT NULL REFERENCES projects(name) ON DELETE CASCADE,
    rel_path  TEXT NOT NULL,
    sha256    TEXT NOT NULL,
    PRIMARY KEY (project, rel_path)
);
"#;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to one project's database. Reads and writes go through the same
/// connection; the mutex serializes writers while keeping the API `Sync`.
#[derive(Debug)]
pub struct Store {
    conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Transaction-scoped store surface handed to `with_transaction` callbacks.
/// All writes inside the callback commit or roll back atomically.
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl Store {
    /// Open (or create) a project database and apply the schema.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        init_connection(&conn)?;
        Ok(Store { conn: Mutex::new(conn), db_path: db_path.to_path_buf() })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_connection(&conn)?;
        Ok(Store { conn: Mutex::new(conn), db_path: PathBuf::from(":memory:") })
    }

    /// Run `f` against a transaction-scoped surface; commit on Ok, roll back
    /// on Err. Concurrent readers of the base store remain valid.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&StoreTx) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock().unwrap();
        let tx = guard.transaction()?;
        let result = f(&StoreTx { conn: &tx });
        match result {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => Err(e), // tx dropped here = rollback
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().unwrap();
        f(&guard)
    }

    // -- projects ----------------------------------------------------------

    pub fn upsert_project(&self, name: &str, root_path: &str, indexed_at: i64) -> Result<()> {
        self.with_conn(|c| {
            c.execute(
                "INSERT INTO projects (name, root_path, indexed_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET root_path = excluded.root_path,
                                                 indexed_at = excluded.indexed_at",
                params![name, root_path, indexed_at],
            )?;
            Ok(())
        })
    }

    pub fn get_project(&self, name: &str) -> Result<Option<ProjectRow>> {
        self.with_conn(|c| {
            let mut stmt =
                c.prepare("SELECT name, root_path, indexed_at FROM projects WHERE name = ?1")?;
            let mut rows = stmt.query_map(params![name], |row| {
                Ok(ProjectRow { name: row.get(0)?, root_path: row.get(1)?, indexed_at: row.get(2)? })
            })?;
            match rows.next() {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
    }

    /// Delete a project row; cascades to nodes, edges, and file hashes.
    pub fn delete_project(&self, name: &str) -> Result<bool> {
        self.with_conn(|c| {
            let n = c.execute("DELETE FROM projects WHERE name = ?1", params![name])?;
            Ok(n > 0)
        })
    }

    // -- single-record upserts (write path outside bulk loads) -------------

    pub fn upsert_node(&self, node: &Node) -> Result<i64> {
        self.with_conn(|c| upsert_node_conn(c, node))
    }

    pub fn upsert_edge(&self, edge: &Edge) -> Result<i64> {
        self.with_conn(|c| upsert_edge_conn(c, edge))
    }

    // -- reads --------------------------------------------------------------

    pub fn get_node(&self, id: i64) -> Result<Option<Node>> {
        self.with_conn(|c| get_node_conn(c, id))
    }

    pub fn get_nodes_by_ids(&self, ids: &[i64]) -> Result<Vec<Node>> {
        self.with_conn(|c| {
            let mut out = Vec::with_capacity(ids.len());
            for chunk in ids.chunks(DEGREE_CHUNK) {
                let placeholders = placeholders(chunk.len());
                let sql = format!(
                    "SELECT {NODE_COLS} FROM nodes WHERE id IN ({placeholders}) ORDER BY id"
                );
                let mut stmt = c.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), node_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
            Ok(out)
        })
    }

    pub fn get_node_by_qualified_name(&self, project: &str, qname: &str) -> Result<Option<Node>> {
        self.with_conn(|c| {
            query_nodes(
                c,
                "project = ?1 AND qualified_name = ?2",
                params![project, qname],
                Some(1),
            )
            .map(|mut v| v.pop())
        })
    }

    /// All nodes with an exact simple name, ordered by qualified name.
    pub fn find_nodes_by_name(&self, project: &str, name: &str) -> Result<Vec<Node>> {
        self.with_conn(|c| {
            query_nodes(c, "project = ?1 AND name = ?2", params![project, name], None)
        })
    }

    pub fn nodes_in_file(&self, project: &str, file_path: &str) -> Result<Vec<Node>> {
        self.with_conn(|c| {
            query_nodes(
                c,
                "project = ?1 AND file_path = ?2",
                params![project, file_path],
                None,
            )
        })
    }

    /// Nodes in a file whose line range intersects `[start, end]`.
    pub fn nodes_overlapping(
        &self,
        project: &str,
        file_path: &str,
        start: u32,
        end: u32,
    ) -> Result<Vec<Node>> {
        self.with_conn(|c| {
            query_nodes(
                c,
                "project = ?1 AND file_path = ?2 AND start_line <= ?4 AND end_line >= ?3
                 AND start_line > 0",
                params![project, file_path, start, end],
                None,
            )
        })
    }

    /// Label-free scan with a row cap (Cypher's unlabeled ScanNodes).
    pub fn all_nodes_capped(&self, project: &str, limit: usize) -> Result<Vec<Node>> {
        self.with_conn(|c| query_nodes(c, "project = ?1", params![project], Some(limit)))
    }

    pub fn nodes_by_label(&self, project: &str, label: NodeLabel, limit: usize) -> Result<Vec<Node>> {
        self.with_conn(|c| {
            query_nodes(
                c,
                "project = ?1 AND label = ?2",
                params![project, label.as_str()],
                Some(limit),
            )
        })
    }

    /// Raw filtered node scan for the search engine. `where_sql` references
    /// only node columns; parameters are caller-bound.
    pub fn query_nodes_where(
        &self,
        where_sql: &str,
        params: &[Box<dyn rusqlite::types::ToSql>],
        limit: usize,
    ) -> Result<Vec<Node>> {
        self.with_conn(|c| {
            let sql = format!(
                "SELECT {NODE_COLS} FROM nodes WHERE {where_sql} ORDER BY id LIMIT {limit}"
            );
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(params.iter().map(|p| p.as_ref())),
                node_from_row,
            )?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    pub fn count_nodes(&self, project: &str) -> Result<i64> {
        self.with_conn(|c| {
            Ok(c.query_row(
                "SELECT COUNT(*) FROM nodes WHERE project = ?1",
                params![project],
                |r| r.get(0),
            )?)
        })
    }

    pub fn count_edges(&self, project: &str) -> Result<i64> {
        self.with_conn(|c| {
            Ok(c.query_row(
                "SELECT COUNT(*) FROM edges WHERE project = ?1",
                params![project],
                |r| r.get(0),
            )?)
        })
    }

    // -- adjacency (BFS, Cypher expansion) ----------------------------------

    /// Edges incident to `node_id` in the given direction, optionally
    /// restricted to a type list. Ordered by edge id for determinism.
    pub fn adjacent_edges(
        &self,
        node_id: i64,
        direction: Direction,
        edge_types: &[EdgeType],
    ) -> Result<Vec<Edge>> {
        self.with_conn(|c| {
            let mut clauses = Vec::new();
            match direction {
                Direction::Outbound => clauses.push("source_id = ?1".to_string()),
                Direction::Inbound => clauses.push("target_id = ?1".to_string()),
                Direction::Any => clauses.push("(source_id = ?1 OR target_id = ?1)".to_string()),
            }
            if !edge_types.is_empty() {
                let list = edge_types
                    .iter()
                    .map(|t| format!("'{}'", t.as_str()))
                    .collect::<Vec<_>>()
                    .join(", ");
                clauses.push(format!("type IN ({list})"));
            }
            let sql = format!(
                "SELECT id, project, source_id, target_id, type, properties
                 FROM edges WHERE {} ORDER BY id",
                clauses.join(" AND ")
            );
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt.query_map(params![node_id], edge_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// All edges of the given types in a project (Cypher scans, impact flags).
    pub fn edges_by_types(&self, project: &str, edge_types: &[EdgeType]) -> Result<Vec<Edge>> {
        self.with_conn(|c| {
            let type_clause = if edge_types.is_empty() {
                String::new()
            } else {
                let list = edge_types
                    .iter()
                    .map(|t| format!("'{}'", t.as_str()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(" AND type IN ({list})")
            };
            let sql = format!(
                "SELECT id, project, source_id, target_id, type, properties
                 FROM edges WHERE project = ?1{type_clause} ORDER BY id"
            );
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt.query_map(params![project], edge_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    // -- degree counting -----------------------------------------------------

    /// Batched degree counts for a set of node ids: one query per direction,
    /// IN-lists chunked at 998 ids, optional relationship filter.
    pub fn degree_counts(
        &self,
        ids: &[i64],
        relationship: Option<EdgeType>,
    ) -> Result<HashMap<i64, (u32, u32)>> {
        self.with_conn(|c| {
            let mut degrees: HashMap<i64, (u32, u32)> = HashMap::new();
            for id in ids {
                degrees.insert(*id, (0, 0));
            }
            let type_clause = match relationship {
                Some(t) => format!(" AND type = '{}'", t.as_str()),
                None => String::new(),
            };
            for chunk in ids.chunks(DEGREE_CHUNK) {
                let ph = placeholders(chunk.len());
                // inbound
                let sql = format!(
                    "SELECT target_id, COUNT(*) FROM edges
                     WHERE target_id IN ({ph}){type_clause} GROUP BY target_id"
                );
                let mut stmt = c.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), |r| {
                    Ok((r.get::<_, i64>(0)?, r.get::<_, u32>(1)?))
                })?;
                for row in rows {
                    let (id, n) = row?;
                    degrees.entry(id).or_default().0 = n;
                }
                // outbound
                let sql = format!(
                    "SELECT source_id, COUNT(*) FROM edges
                     WHERE source_id IN ({ph}){type_clause} GROUP BY source_id"
                );
                let mut stmt = c.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), |r| {
                    Ok((r.get::<_, i64>(0)?, r.get::<_, u32>(1)?))
                })?;
                for row in rows {
                    let (id, n) = row?;
                    degrees.entry(id).or_default().1 = n;
                }
            }
            Ok(degrees)
        })
    }

    // -- schema stats --------------------------------------------------------

    /// Label counts, edge-type counts, top 25 `(src, type, tgt)` patterns, and
    /// sample names. Pattern counting builds an in-memory id → label map (one
    /// nodes scan) and one edges scan instead of a triple join.
    pub fn get_schema(&self, project: &str) -> Result<SchemaStats> {
        self.with_conn(|c| {
            let mut label_counts: Vec<(String, i64)> = Vec::new();
            let mut stmt = c.prepare(
                "SELECT label, COUNT(*) FROM nodes WHERE project = ?1
                 GROUP BY label ORDER BY COUNT(*) DESC",
            )?;
            let rows = stmt.query_map(params![project], |r| Ok((r.get(0)?, r.get(1)?)))?;
            for row in rows {
                label_counts.push(row?);
            }

            let mut edge_counts: Vec<(String, i64)> = Vec::new();
            let mut stmt = c.prepare(
                "SELECT type, COUNT(*) FROM edges WHERE project = ?1
                 GROUP BY type ORDER BY COUNT(*) DESC",
            )?;
            let rows = stmt.query_map(params![project], |r| Ok((r.get(0)?, r.get(1)?)))?;
            for row in rows {
                edge_counts.push(row?);
            }

            // id → label map, one scan
            let mut id_label: HashMap<i64, String> = HashMap::new();
            let mut stmt = c.prepare("SELECT id, label FROM nodes WHERE project = ?1")?;
            let rows = stmt.query_map(params![project], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, label) = row?;
                id_label.insert(id, label);
            }

            // one edges scan
            let mut pattern_counts: HashMap<(String, String, String), i64> = HashMap::new();
            let mut stmt =
                c.prepare("SELECT source_id, target_id, type FROM edges WHERE project = ?1")?;
            let rows = stmt.query_map(params![project], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?, r.get::<_, String>(2)?))
            })?;
            for row in rows {
                let (src, tgt, ty) = row?;
                let (Some(src_label), Some(tgt_label)) = (id_label.get(&src), id_label.get(&tgt))
                else {
                    warn!(edge_source = src, edge_target = tgt, "edge references missing node");
                    continue;
                };
                *pattern_counts
                    .entry((src_label.clone(), ty, tgt_label.clone()))
                    .or_default() += 1;
            }
            let mut patterns: Vec<(String, String, String, i64)> = pattern_counts
                .into_iter()
                .map(|((s, t, g), n)| (s, t, g, n))
                .collect();
            patterns.sort_by(|a, b| b.3.cmp(&a.3).then_with(|| a.0.cmp(&b.0)).then_with(|| a.1.cmp(&b.1)));
            patterns.truncate(25);

            let sample = |label: &str, col: &str| -> Result<Vec<String>> {
                let sql = format!(
                    "SELECT {col} FROM nodes WHERE project = ?1 AND label = ?2
                     ORDER BY id LIMIT 10"
                );
                let mut stmt = c.prepare(&sql)?;
                let rows = stmt.query_map(params![project, label], |r| r.get::<_, String>(0))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            };

            Ok(SchemaStats {
                label_counts,
                edge_counts,
                patterns,
                sample_function_names: sample("Function", "name")?,
                sample_class_names: sample("Class", "name")?,
                sample_qualified_names: sample("Function", "qualified_name")?,
            })
        })
    }

    // -- incremental bookkeeping --------------------------------------------

    /// Copy one project's rows (ids preserved) from a legacy database file
    /// into this store. ATTACH cannot run inside a transaction, so this
    /// manages its own BEGIN/COMMIT around the inserts.
    pub fn copy_project_from(&self, legacy_path: &Path, project: &str) -> Result<()> {
        self.with_conn(|c| {
            c.execute(
                "ATTACH DATABASE ?1 AS legacy",
                params![legacy_path.display().to_string()],
            )?;
            let copy = (|| -> Result<()> {
                c.execute_batch("BEGIN")?;
                c.execute(
                    "INSERT INTO projects (name, root_path, indexed_at)
                     SELECT name, root_path, indexed_at FROM legacy.projects WHERE name = ?1",
                    params![project],
                )?;
                c.execute(
                    "INSERT INTO nodes (id, project, label, name, qualified_name, file_path,
                                        start_line, end_line, properties)
                     SELECT id, project, label, name, qualified_name, file_path,
                            start_line, end_line, properties
                     FROM legacy.nodes WHERE project = ?1",
                    params![project],
                )?;
                c.execute(
                    "INSERT INTO edges (id, project, source_id, target_id, type, properties)
                     SELECT id, project, source_id, target_id, type, properties
                     FROM legacy.edges WHERE project = ?1",
                    params![project],
                )?;
                c.execute(
                    "INSERT INTO file_hashes (project, rel_path, sha256)
                     SELECT project, rel_path, sha256 FROM legacy.file_hashes WHERE project = ?1",
                    params![project],
                )?;
                c.execute_batch("COMMIT")?;
                Ok(())
            })();
            if copy.is_err() {
                let _ = c.execute_batch("ROLLBACK");
            }
            c.execute("DETACH DATABASE legacy", [])?;
            copy
        })
    }

    /// Stored content hashes: rel_path → sha256.
    pub fn list_files_for_project(&self, project: &str) -> Result<HashMap<String, String>> {
        self.with_conn(|c| {
            let mut stmt =
                c.prepare("SELECT rel_path, sha256 FROM file_hashes WHERE project = ?1")?;
            let rows =
                stmt.query_map(params![project], |r| Ok((r.get(0)?, r.get(1)?)))?;
            let mut out = HashMap::new();
            for row in rows {
                let (path, hash): (String, String) = row?;
                out.insert(path, hash);
            }
            Ok(out)
        })
    }
}

// Write operations shared by Store (autocommit) and StoreTx (transactional).
impl StoreTx<'_> {
    pub fn upsert_project(&self, name: &str, root_path: &str, indexed_at: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO projects (name, root_path, indexed_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET root_path = excluded.root_path,
                                             indexed_at = excluded.indexed_at",
            params![name, root_path, indexed_at],
        )?;
        Ok(())
    }

    pub fn upsert_node(&self, node: &Node) -> Result<i64> {
        upsert_node_conn(self.conn, node)
    }

    pub fn upsert_edge(&self, edge: &Edge) -> Result<i64> {
        upsert_edge_conn(self.conn, edge)
    }

    /// Bulk node upsert, fragmented at 120 rows (8 columns each). Existing
    /// rows keep their ids; all other fields are overwritten.
    pub fn upsert_node_batch(&self, nodes: &[Node]) -> Result<()> {
        for chunk in nodes.chunks(NODE_BATCH) {
            let rows = vec!["(?, ?, ?, ?, ?, ?, ?, ?)"; chunk.len()].join(", ");
            let sql = format!(
                "INSERT INTO nodes (project, label, name, qualified_name, file_path,
                                    start_line, end_line, properties)
                 VALUES {rows}
                 ON CONFLICT(project, qualified_name) DO UPDATE SET
                     label = excluded.label,
                     name = excluded.name,
                     file_path = excluded.file_path,
                     start_line = excluded.start_line,
                     end_line = excluded.end_line,
                     properties = excluded.properties"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut values: Vec<Box<dyn rusqlite::types::ToSql>> =
                Vec::with_capacity(chunk.len() * 8);
            for node in chunk {
                values.push(Box::new(node.project.clone()));
                values.push(Box::new(node.label.as_str()));
                values.push(Box::new(node.name.clone()));
                values.push(Box::new(node.qualified_name.clone()));
                values.push(Box::new(node.file_path.clone()));
                values.push(Box::new(node.start_line));
                values.push(Box::new(node.end_line));
                values.push(Box::new(encode_props(&node.properties)));
            }
            stmt.execute(params_from_iter(values.iter().map(|v| v.as_ref())))?;
        }
        Ok(())
    }

    /// Bulk edge upsert, fragmented at 150 rows (5 columns each). On conflict
    /// the properties are overwritten.
    pub fn upsert_edge_batch(&self, edges: &[Edge]) -> Result<()> {
        for chunk in edges.chunks(EDGE_BATCH) {
            let rows = vec!["(?, ?, ?, ?, ?)"; chunk.len()].join(", ");
            let sql = format!(
                "INSERT INTO edges (project, source_id, target_id, type, properties)
                 VALUES {rows}
                 ON CONFLICT(source_id, target_id, type) DO UPDATE SET
                     properties = excluded.properties"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut values: Vec<Box<dyn rusqlite::types::ToSql>> =
                Vec::with_capacity(chunk.len() * 5);
            for edge in chunk {
                values.push(Box::new(edge.project.clone()));
                values.push(Box::new(edge.source_id));
                values.push(Box::new(edge.target_id));
                values.push(Box::new(edge.edge_type.as_str()));
                values.push(Box::new(encode_props(&edge.properties)));
            }
            stmt.execute(params_from_iter(values.iter().map(|v| v.as_ref())))?;
        }
        Ok(())
    }

    /// Bulk file-hash upsert, fragmented at 200 rows (3 columns each).
    pub fn upsert_file_hash_batch(&self, hashes: &[FileHash]) -> Result<()> {
        for chunk in hashes.chunks(HASH_BATCH) {
            let rows = vec!["(?, ?, ?)"; chunk.len()].join(", ");
            let sql = format!(
                "INSERT INTO file_hashes (project, rel_path, sha256) VALUES {rows}
                 ON CONFLICT(project, rel_path) DO UPDATE SET sha256 = excluded.sha256"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut values: Vec<Box<dyn rusqlite::types::ToSql>> =
                Vec::with_capacity(chunk.len() * 3);
            for hash in chunk {
                values.push(Box::new(hash.project.clone()));
                values.push(Box::new(hash.rel_path.clone()));
                values.push(Box::new(hash.sha256.clone()));
            }
            stmt.execute(params_from_iter(values.iter().map(|v| v.as_ref())))?;
        }
        Ok(())
    }

    /// Expunge a removed or changed file: its nodes (edges cascade) and hash.
    pub fn delete_nodes_by_file(&self, project: &str, rel_path: &str) -> Result<usize> {
        let n = self.conn.execute(
            "DELETE FROM nodes WHERE project = ?1 AND file_path = ?2",
            params![project, rel_path],
        )?;
        self.conn.execute(
            "DELETE FROM file_hashes WHERE project = ?1 AND rel_path = ?2",
            params![project, rel_path],
        )?;
        Ok(n)
    }

    /// Delete edges of one type whose source node lives in any of the given
    /// files. Used to expunge stale CALLS edges before re-resolution.
    pub fn delete_edges_by_source_file(
        &self,
        project: &str,
        edge_type: EdgeType,
        rel_paths: &[String],
    ) -> Result<usize> {
        let mut deleted = 0usize;
        // 2 fixed params + path chunk
        for chunk in rel_paths.chunks(DEGREE_CHUNK - 2) {
            let ph = placeholders(chunk.len());
            let sql = format!(
                "DELETE FROM edges WHERE type = ?1 AND source_id IN (
                     SELECT id FROM nodes WHERE project = ?2 AND file_path IN ({ph})
                 )"
            );
            let mut values: Vec<Box<dyn rusqlite::types::ToSql>> =
                Vec::with_capacity(chunk.len() + 2);
            values.push(Box::new(edge_type.as_str()));
            values.push(Box::new(project.to_string()));
            for path in chunk {
                values.push(Box::new(path.clone()));
            }
            deleted += self
                .conn
                .execute(&sql, params_from_iter(values.iter().map(|v| v.as_ref())))?;
        }
        Ok(deleted)
    }

    /// Delete every edge of a type in the project (bulk recompute passes).
    pub fn delete_edges_by_type(&self, project: &str, edge_type: EdgeType) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM edges WHERE project = ?1 AND type = ?2",
            params![project, edge_type.as_str()],
        )?)
    }

    pub fn get_node_by_qualified_name(&self, project: &str, qname: &str) -> Result<Option<Node>> {
        query_nodes(
            self.conn,
            "project = ?1 AND qualified_name = ?2",
            params![project, qname],
            Some(1),
        )
        .map(|mut v| v.pop())
    }

    pub fn nodes_in_file(&self, project: &str, file_path: &str) -> Result<Vec<Node>> {
        query_nodes(
            self.conn,
            "project = ?1 AND file_path = ?2",
            params![project, file_path],
            None,
        )
    }

    /// Every node in the project. The pipeline's symbol table is built from
    /// one of these scans inside the indexing transaction.
    pub fn all_nodes(&self, project: &str) -> Result<Vec<Node>> {
        query_nodes(self.conn, "project = ?1", params![project], None)
    }

    pub fn delete_nodes_by_ids(&self, ids: &[i64]) -> Result<usize> {
        let mut deleted = 0usize;
        for chunk in ids.chunks(DEGREE_CHUNK) {
            let ph = placeholders(chunk.len());
            let sql = format!("DELETE FROM nodes WHERE id IN ({ph})");
            deleted += self.conn.execute(&sql, params_from_iter(chunk.iter()))?;
        }
        Ok(deleted)
    }

    /// Set a boolean property on a node in place (entry-point marking).
    pub fn set_node_flag(&self, id: i64, key: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE nodes SET properties = json_set(properties, '$.' || ?2, json('true'))
             WHERE id = ?1",
            params![id, key],
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Schema stats result
// ---------------------------------------------------------------------------

/// Aggregate shape returned by `get_schema`.
#[derive(Debug)]
pub struct SchemaStats {
    pub label_counts: Vec<(String, i64)>,
    pub edge_counts: Vec<(String, i64)>,
    /// `(src_label, edge_type, tgt_label, count)`, top 25 by count.
    pub patterns: Vec<(String, String, String, i64)>,
    pub sample_function_names: Vec<String>,
    pub sample_class_names: Vec<String>,
    pub sample_qualified_names: Vec<String>,
}

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

const NODE_COLS: &str =
    "id, project, label, name, qualified_name, file_path, start_line, end_line, properties";

fn init_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn encode_props(props: &Properties) -> String {
    serde_json::to_string(props).unwrap_or_else(|_| "{}".to_string())
}

fn decode_props(raw: &str) -> Properties {
    serde_json::from_str(raw).unwrap_or_default()
}

fn node_from_row(row: &rusqlite::Row) -> rusqlite::Result<Node> {
    let label_raw: String = row.get(2)?;
    let label = NodeLabel::parse(&label_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown node label: {label_raw}").into(),
        )
    })?;
    let props_raw: String = row.get(8)?;
    Ok(Node {
        id: row.get(0)?,
        project: row.get(1)?,
        label,
        name: row.get(3)?,
        qualified_name: row.get(4)?,
        file_path: row.get(5)?,
        start_line: row.get(6)?,
        end_line: row.get(7)?,
        properties: decode_props(&props_raw),
    })
}

fn edge_from_row(row: &rusqlite::Row) -> rusqlite::Result<Edge> {
    let type_raw: String = row.get(4)?;
    let edge_type = EdgeType::parse(&type_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown edge type: {type_raw}").into(),
        )
    })?;
    let props_raw: String = row.get(5)?;
    Ok(Edge {
        id: row.get(0)?,
        project: row.get(1)?,
        source_id: row.get(2)?,
        target_id: row.get(3)?,
        edge_type,
        properties: decode_props(&props_raw),
    })
}

fn query_nodes(
    conn: &Connection,
    where_sql: &str,
    params: impl rusqlite::Params,
    limit: Option<usize>,
) -> Result<Vec<Node>> {
    let limit_clause = limit.map(|n| format!(" LIMIT {n}")).unwrap_or_default();
    let sql = format!(
        "SELECT {NODE_COLS} FROM nodes WHERE {where_sql} ORDER BY qualified_name{limit_clause}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, node_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn upsert_node_conn(conn: &Connection, node: &Node) -> Result<i64> {
    let id = conn.query_row(
        "INSERT INTO nodes (project, label, name, qualified_name, file_path,
                            start_line, end_line, properties)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(project, qualified_name) DO UPDATE SET
             label = excluded.label,
             name = excluded.name,
             file_path = excluded.file_path,
             start_line = excluded.start_line,
             end_line = excluded.end_line,
             properties = excluded.properties
         RETURNING id",
        params![
            node.project,
            node.label.as_str(),
            node.name,
            node.qualified_name,
            node.file_path,
            node.start_line,
            node.end_line,
            encode_props(&node.properties),
        ],
        |r| r.get(0),
    )?;
    Ok(id)
}

fn upsert_edge_conn(conn: &Connection, edge: &Edge) -> Result<i64> {
    let id = conn.query_row(
        "INSERT INTO edges (project, source_id, target_id, type, properties)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(source_id, target_id, type) DO UPDATE SET
             properties = excluded.properties
         RETURNING id",
        params![
            edge.project,
            edge.source_id,
            edge.target_id,
            edge.edge_type.as_str(),
            encode_props(&edge.properties),
        ],
        |r| r.get(0),
    )?;
    Ok(id)
}

fn get_node_conn(conn: &Connection, id: i64) -> Result<Option<Node>> {
    let mut stmt = conn.prepare(&format!("SELECT {NODE_COLS} FROM nodes WHERE id = ?1"))?;
    let mut rows = stmt.query_map(params![id], node_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_project(name: &str) -> Store {
        let store = Store::open_in_memory().unwrap();
        store.upsert_project(name, "/tmp/proj", 0).unwrap();
        store
    }

    fn add_fn(store: &Store, project: &str, name: &str) -> i64 {
        let node = Node::new(
            project,
            NodeLabel::Function,
            name,
            &format!("{project}.main.{name}"),
            "main.go",
        );
        store.upsert_node(&node).unwrap()
    }

    #[test]
    fn test_upsert_node_dedup_by_qualified_name() {
        let store = store_with_project("p");
        let id1 = add_fn(&store, "p", "hello");
        // Same qualified name, different line info: same id, fields updated
        let node = Node::new("p", NodeLabel::Function, "hello", "p.main.hello", "main.go")
            .with_lines(3, 9);
        let id2 = store.upsert_node(&node).unwrap();
        assert_eq!(id1, id2);
        let fetched = store.get_node(id1).unwrap().unwrap();
        assert_eq!(fetched.start_line, 3);
        assert_eq!(fetched.end_line, 9);
        assert_eq!(store.count_nodes("p").unwrap(), 1);
    }

    #[test]
    fn test_upsert_edge_dedup() {
        let store = store_with_project("p");
        let a = add_fn(&store, "p", "a");
        let b = add_fn(&store, "p", "b");
        let e1 = store.upsert_edge(&Edge::new("p", a, b, EdgeType::Calls)).unwrap();
        let mut edge = Edge::new("p", a, b, EdgeType::Calls);
        edge.properties.insert("call_line".into(), serde_json::json!(12));
        let e2 = store.upsert_edge(&edge).unwrap();
        assert_eq!(e1, e2);
        assert_eq!(store.count_edges("p").unwrap(), 1);
        let edges = store.adjacent_edges(a, Direction::Outbound, &[]).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].properties.get("call_line"), Some(&serde_json::json!(12)));
    }

    #[test]
    fn test_project_delete_cascades() {
        let store = store_with_project("p");
        let a = add_fn(&store, "p", "a");
        let b = add_fn(&store, "p", "b");
        store.upsert_edge(&Edge::new("p", a, b, EdgeType::Calls)).unwrap();
        store
            .with_transaction(|tx| {
                tx.upsert_file_hash_batch(&[FileHash {
                    project: "p".into(),
                    rel_path: "main.go".into(),
                    sha256: "abc".into(),
                }])
            })
            .unwrap();

        assert!(store.delete_project("p").unwrap());
        assert_eq!(store.count_nodes("p").unwrap(), 0);
        assert_eq!(store.count_edges("p").unwrap(), 0);
        assert!(store.list_files_for_project("p").unwrap().is_empty());
    }

    #[test]
    fn test_node_delete_cascades_to_edges() {
        let store = store_with_project("p");
        let a = add_fn(&store, "p", "a");
        let b = add_fn(&store, "p", "b");
        store.upsert_edge(&Edge::new("p", a, b, EdgeType::Calls)).unwrap();
        store
            .with_transaction(|tx| {
                tx.delete_nodes_by_file("p", "main.go")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.count_edges("p").unwrap(), 0);
    }

    #[test]
    fn test_batch_inserts_fragment() {
        let store = store_with_project("p");
        // More nodes than one chunk to exercise fragmentation
        let nodes: Vec<Node> = (0..301)
            .map(|i| {
                Node::new(
                    "p",
                    NodeLabel::Function,
                    &format!("f{i}"),
                    &format!("p.mod.f{i}"),
                    "mod.py",
                )
            })
            .collect();
        store.with_transaction(|tx| tx.upsert_node_batch(&nodes)).unwrap();
        assert_eq!(store.count_nodes("p").unwrap(), 301);

        let ids: Vec<i64> = store
            .query_nodes_where("project = ?1", &[Box::new("p".to_string())], 1000)
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();
        let edges: Vec<Edge> = ids
            .windows(2)
            .map(|w| Edge::new("p", w[0], w[1], EdgeType::Calls))
            .collect();
        store.with_transaction(|tx| tx.upsert_edge_batch(&edges)).unwrap();
        assert_eq!(store.count_edges("p").unwrap(), 300);
    }

    #[test]
    fn test_transaction_rollback() {
        let store = store_with_project("p");
        let result: Result<()> = store.with_transaction(|tx| {
            tx.upsert_node(&Node::new("p", NodeLabel::Function, "f", "p.f", "f.go"))?;
            Err(GraphError::Internal("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.count_nodes("p").unwrap(), 0);
    }

    #[test]
    fn test_delete_edges_by_source_file() {
        let store = store_with_project("p");
        let a = store
            .upsert_node(&Node::new("p", NodeLabel::Function, "a", "p.one.a", "one.go"))
            .unwrap();
        let b = store
            .upsert_node(&Node::new("p", NodeLabel::Function, "b", "p.two.b", "two.go"))
            .unwrap();
        store.upsert_edge(&Edge::new("p", a, b, EdgeType::Calls)).unwrap();
        store.upsert_edge(&Edge::new("p", b, a, EdgeType::Calls)).unwrap();

        store
            .with_transaction(|tx| {
                tx.delete_edges_by_source_file("p", EdgeType::Calls, &["one.go".to_string()])
            })
            .unwrap();
        // Only the edge sourced in one.go is gone
        assert_eq!(store.count_edges("p").unwrap(), 1);
        assert_eq!(store.adjacent_edges(b, Direction::Outbound, &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_degree_counts() {
        let store = store_with_project("p");
        let a = add_fn(&store, "p", "a");
        let b = add_fn(&store, "p", "b");
        let c = add_fn(&store, "p", "c");
        store.upsert_edge(&Edge::new("p", a, c, EdgeType::Calls)).unwrap();
        store.upsert_edge(&Edge::new("p", b, c, EdgeType::Calls)).unwrap();
        store.upsert_edge(&Edge::new("p", c, a, EdgeType::Usage)).unwrap();

        let degrees = store.degree_counts(&[a, b, c], None).unwrap();
        assert_eq!(degrees[&c], (2, 1));
        assert_eq!(degrees[&a], (1, 1));
        assert_eq!(degrees[&b], (0, 1));

        let calls_only = store.degree_counts(&[c], Some(EdgeType::Calls)).unwrap();
        assert_eq!(calls_only[&c], (2, 0));
    }

    #[test]
    fn test_schema_stats() {
        let store = store_with_project("p");
        let a = add_fn(&store, "p", "a");
        let b = add_fn(&store, "p", "b");
        let cls = store
            .upsert_node(&Node::new("p", NodeLabel::Class, "Svc", "p.main.Svc", "main.go"))
            .unwrap();
        store.upsert_edge(&Edge::new("p", a, b, EdgeType::Calls)).unwrap();
        store.upsert_edge(&Edge::new("p", cls, a, EdgeType::DefinesMethod)).unwrap();

        let schema = store.get_schema("p").unwrap();
        assert!(schema.label_counts.iter().any(|(l, n)| l == "Function" && *n == 2));
        assert!(schema.edge_counts.iter().any(|(t, n)| t == "CALLS" && *n == 1));
        assert!(schema
            .patterns
            .iter()
            .any(|(s, t, g, n)| s == "Function" && t == "CALLS" && g == "Function" && *n == 1));
        assert!(schema.sample_function_names.contains(&"a".to_string()));
        assert!(schema.sample_class_names.contains(&"Svc".to_string()));
    }

    #[test]
    fn test_url_path_generated_column() {
        let store = store_with_project("p");
        let a = add_fn(&store, "p", "client");
        let b = add_fn(&store, "p", "handler");
        let mut edge = Edge::new("p", a, b, EdgeType::HttpCalls);
        edge.properties.insert("url_path".into(), serde_json::json!("/api/orders/{id}"));
        set_confidence(&mut edge.properties, 0.8);
        store.upsert_edge(&edge).unwrap();

        let found: i64 = store
            .with_conn(|c| {
                Ok(c.query_row(
                    "SELECT COUNT(*) FROM edges WHERE url_path_gen LIKE '%orders%'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(found, 1);
    }

    #[test]
    fn test_nodes_overlapping() {
        let store = store_with_project("p");
        let node = Node::new("p", NodeLabel::Function, "f", "p.h.f", "h.go").with_lines(40, 55);
        store.upsert_node(&node).unwrap();
        let other = Node::new("p", NodeLabel::Function, "g", "p.h.g", "h.go").with_lines(60, 80);
        store.upsert_node(&other).unwrap();

        let hits = store.nodes_overlapping("p", "h.go", 50, 58).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "f");
        let all = store.nodes_overlapping("p", "h.go", 0, u32::MAX).unwrap();
        assert_eq!(all.len(), 2);
    }
}
