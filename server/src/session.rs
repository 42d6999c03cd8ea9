//! Session state: active-project resolution and index serialization.
//!
//! The session root is detected once, from the first source that works:
//! an explicit root override, the process working directory, or a solitary
//! indexed project. The first hit wins and is never re-detected. Explicit
//! index passes take the process-wide index lock unconditionally; the
//! watcher try-acquires it and skips a tick when it loses. The index lock
//! sits at the top of the lock hierarchy (see [`INDEX_LOCK`]).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::pipeline::{index_repository, project_name_for_root, IndexStats};
use crate::router::Router;
use crate::types::*;

/// Serializes index/re-index passes against the watcher's callback.
///
/// Lock hierarchy: this is the outermost lock in the process. A pass holds
/// it for its whole duration and acquires the router map and per-store
/// connection mutexes beneath it; those finer locks are always released
/// before anything blocks on this one, so the order
/// `index lock → router map → store connection` is acyclic.
pub static INDEX_LOCK: Mutex<()> = Mutex::new(());

pub struct Session {
    router: Arc<Router>,
    root_override: Option<PathBuf>,
    resolved: OnceLock<Option<(String, PathBuf)>>,
    indexing: AtomicBool,
    last_index: Mutex<Option<IndexStats>>,
}

impl Session {
    pub fn new(router: Arc<Router>, root_override: Option<PathBuf>) -> Arc<Self> {
        Arc::new(Session {
            router,
            root_override,
            resolved: OnceLock::new(),
            indexing: AtomicBool::new(false),
            last_index: Mutex::new(None),
        })
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// True while an index pass is in flight (surfaced in tool responses).
    pub fn is_indexing(&self) -> bool {
        self.indexing.load(Ordering::Relaxed)
    }

    pub fn last_index(&self) -> Option<IndexStats> {
        self.last_index.lock().unwrap().clone()
    }

    // -- indexing ------------------------------------------------------------

    /// Explicit index call: waits for the lock. A poisoned lock (a panicking
    /// pass) is recovered rather than propagated.
    pub fn index(&self, root: &Path, cancel: &CancelToken) -> Result<IndexStats> {
        let _guard = INDEX_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.run_index(root, cancel)
    }

    /// Index pass for a caller that already holds `INDEX_LOCK` (the watcher).
    pub fn reindex_locked(&self, root: &Path) -> Result<IndexStats> {
        self.run_index(root, &CancelToken::new())
    }

    fn run_index(&self, root: &Path, cancel: &CancelToken) -> Result<IndexStats> {
        self.indexing.store(true, Ordering::Relaxed);
        let result = index_repository(&self.router, root, cancel);
        self.indexing.store(false, Ordering::Relaxed);
        if let Ok(stats) = &result {
            *self.last_index.lock().unwrap() = Some(stats.clone());
        }
        result
    }

    // -- project resolution --------------------------------------------------

    /// The session's active project, detected once. Sources in order: the
    /// root override, the working directory (if its project is indexed), a
    /// solitary indexed project.
    pub fn session_project(&self) -> Option<(String, PathBuf)> {
        self.resolved
            .get_or_init(|| {
                if let Some(root) = &self.root_override {
                    return Some((project_name_for_root(root), root.clone()));
                }
                if let Ok(cwd) = std::env::current_dir() {
                    let name = project_name_for_root(&cwd);
                    if self.router.db_path(&name).exists() {
                        return Some((name, cwd));
                    }
                }
                match self.router.list_projects() {
                    Ok(projects) if projects.len() == 1 => {
                        let info = &projects[0];
                        Some((info.project.name.clone(), PathBuf::from(&info.project.root_path)))
                    }
                    _ => None,
                }
            })
            .clone()
    }

    /// Resolve the project a tool call targets: explicit argument first,
    /// otherwise the session project.
    pub fn resolve_project(&self, explicit: Option<&str>) -> Result<String> {
        if let Some(name) = explicit {
            return Ok(name.to_string());
        }
        self.session_project()
            .map(|(name, _)| name)
            .ok_or_else(|| {
                GraphError::not_found(
                    "no session project; pass a project name or call list_projects",
                )
            })
    }

    /// Repository root for a project: the session root when it matches,
    /// otherwise the stored root path.
    pub fn root_for_project(&self, project: &str) -> Result<PathBuf> {
        if let Some((name, root)) = self.session_project() {
            if name == project {
                return Ok(root);
            }
        }
        let store = self.router.existing_store(project)?;
        let row = store
            .get_project(project)?
            .ok_or_else(|| GraphError::not_found(format!("project not indexed: {project}")))?;
        Ok(PathBuf::from(row.root_path))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
