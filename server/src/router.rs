//! Project router — maps project names to per-project stores.
//!
//! Owns the cache directory (one `<project>.db` per indexed project), opens
//! stores lazily, migrates any legacy single-database layout on startup, and
//! enumerates databases on disk for `list_projects`.

use dashmap::DashMap;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::store::Store;
use crate::types::{GraphError, ProjectRow, Result};

/// Basename of the pre-split single-database layout.
const LEGACY_DB: &str = "codegraph.db";

// ---------------------------------------------------------------------------
// Cache directory
// ---------------------------------------------------------------------------

/// Default cache directory: `$XDG_CACHE_HOME/codegraph` or `~/.cache/codegraph`.
pub fn default_cache_dir() -> PathBuf {
    let base = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache")))
        .unwrap_or_else(|| PathBuf::from(".cache"));
    base.join("codegraph")
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct Router {
    cache_dir: PathBuf,
    stores: DashMap<String, Arc<Store>>,
}

impl Router {
    /// Create a router over `cache_dir` (or the default), running the legacy
    /// migration if a pre-split database is present.
    pub fn new(cache_dir: Option<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.unwrap_or_else(default_cache_dir);
        std::fs::create_dir_all(&cache_dir)?;
        let router = Router { cache_dir, stores: DashMap::new() };
        router.migrate_legacy()?;
        Ok(router)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn db_path(&self, project: &str) -> PathBuf {
        self.cache_dir.join(format!("{project}.db"))
    }

    /// Get or lazily open the store for a project. Stores are never closed
    /// while the router lives; callers clone the Arc.
    pub fn store(&self, project: &str) -> Result<Arc<Store>> {
        if let Some(store) = self.stores.get(project) {
            return Ok(store.clone());
        }
        let store = Arc::new(Store::open(&self.db_path(project))?);
        let entry = self.stores.entry(project.to_string()).or_insert(store);
        Ok(entry.clone())
    }

    /// Store for a project that must already exist on disk.
    pub fn existing_store(&self, project: &str) -> Result<Arc<Store>> {
        if let Some(store) = self.stores.get(project) {
            return Ok(store.clone());
        }
        if !self.db_path(project).exists() {
            return Err(GraphError::not_found(format!(
                "project not indexed: {project} (call list_projects to see available projects)"
            )));
        }
        self.store(project)
    }

    /// Project names with a database on disk, cheapest-possible enumeration
    /// (no store is opened). Safe to call while a store transaction is held.
    pub fn project_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("db") {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Every project with a database on disk, with row counts.
    pub fn list_projects(&self) -> Result<Vec<ProjectInfo>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("db") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            let store = match self.store(&name) {
                Ok(s) => s,
                Err(e) => {
                    warn!("skipping unreadable database {}: {e}", path.display());
                    continue;
                }
            };
            let Some(project) = store.get_project(&name)? else {
                continue;
            };
            out.push(ProjectInfo {
                nodes: store.count_nodes(&name)?,
                edges: store.count_edges(&name)?,
                db_path: path.display().to_string(),
                project,
            });
        }
        out.sort_by(|a, b| a.project.name.cmp(&b.project.name));
        Ok(out)
    }

    /// Drop a project: evict the open store and remove its database files.
    pub fn delete_project(&self, project: &str) -> Result<bool> {
        if let Some((_, store)) = self.stores.remove(project) {
            store.delete_project(project)?;
            drop(store);
        }
        let db_path = self.db_path(project);
        if !db_path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&db_path)?;
        for suffix in ["-wal", "-shm"] {
            let side = PathBuf::from(format!("{}{suffix}", db_path.display()));
            let _ = std::fs::remove_file(side);
        }
        Ok(true)
    }

    // -- legacy migration ----------------------------------------------------

    /// Split a legacy single-database layout into per-project databases,
    /// preserving row ids via attach-and-insert. The legacy file is kept under
    /// a `.migrated` suffix; write-ahead logs are removed. Idempotent.
    fn migrate_legacy(&self) -> Result<()> {
        let legacy_path = self.cache_dir.join(LEGACY_DB);
        if !legacy_path.exists() {
            return Ok(());
        }

        let legacy = Connection::open(&legacy_path)?;
        let mut projects: Vec<String> = Vec::new();
        {
            let mut stmt = match legacy.prepare("SELECT name FROM projects") {
                Ok(stmt) => stmt,
                Err(_) => {
                    // Not our schema; leave the file alone.
                    warn!("legacy database has no projects table, skipping migration");
                    return Ok(());
                }
            };
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            for row in rows {
                projects.push(row?);
            }
        }
        drop(legacy);

        for project in &projects {
            let target = self.db_path(project);
            if target.exists() {
                continue; // already split out
            }
            let store = Store::open(&target)?;
            store.copy_project_from(&legacy_path, project)?;
            info!(project = project.as_str(), "migrated project from legacy database");
        }

        let migrated = PathBuf::from(format!("{}.migrated", legacy_path.display()));
        std::fs::rename(&legacy_path, &migrated)?;
        for suffix in ["-wal", "-shm"] {
            let side = PathBuf::from(format!("{}{suffix}", legacy_path.display()));
            let _ = std::fs::remove_file(side);
        }
        info!(
            "legacy database renamed to {} ({} projects migrated)",
            migrated.display(),
            projects.len()
        );
        Ok(())
    }
}

/// Project listing entry.
#[derive(Debug)]
pub struct ProjectInfo {
    pub project: ProjectRow,
    pub nodes: i64,
    pub edges: i64,
    pub db_path: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
