//! Snapshot-polling watcher for automatic re-indexing.
//!
//! Each known project keeps a `rel_path → (mtime, size)` snapshot and a
//! next-poll deadline. A 1-second ticker drives the loop; a project's actual
//! poll interval scales with its file count so large repositories poll less
//! often. The first poll only establishes the baseline. The re-index callback
//! runs under a non-blocking try-acquire of the process-wide index lock, so
//! an in-flight explicit index pass makes the watcher skip a tick.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::router::Router;
use crate::scan::{discover, ScanConfig};
use crate::session::{Session, INDEX_LOCK};
use crate::types::CancelToken;

/// Base ticker period.
pub const TICK: Duration = Duration::from_secs(1);
/// Poll interval ceiling (also the backoff for missing roots).
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// `1s + (file_count / 500) * 1s`, capped at 60s.
pub fn poll_interval(file_count: usize) -> Duration {
    let secs = 1 + (file_count / 500) as u64;
    Duration::from_secs(secs).min(MAX_POLL_INTERVAL)
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

type Snapshot = HashMap<String, (i64, u64)>;

/// Capture `rel_path → (mtime, size)` using the same discovery rules as
/// indexing. None when the root is missing.
fn capture_snapshot(root: &Path) -> Option<Snapshot> {
    if !root.exists() {
        return None;
    }
    let config = ScanConfig::load(root);
    let files = discover(&config, &CancelToken::new()).ok()?;
    let mut snapshot = Snapshot::with_capacity(files.len());
    for file in files {
        let Ok(meta) = std::fs::metadata(&file.abs_path) else {
            continue;
        };
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        snapshot.insert(file.rel_path, (mtime, meta.len()));
    }
    Some(snapshot)
}

// ---------------------------------------------------------------------------
// Watcher state machine
// ---------------------------------------------------------------------------

struct ProjectWatch {
    root: PathBuf,
    snapshot: Option<Snapshot>,
    next_poll_at: Instant,
}

/// Poll scheduling and change detection for every known project. The
/// re-index side effect is injected so ticks are testable.
pub struct Watcher {
    states: HashMap<String, ProjectWatch>,
}

impl Default for Watcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Watcher {
    pub fn new() -> Self {
        Watcher { states: HashMap::new() }
    }

    /// One tick: poll every project whose deadline has elapsed. `reindex`
    /// returns false when the pass failed or was skipped, in which case the
    /// old snapshot is retained so the next tick retries.
    pub fn poll_all(
        &mut self,
        projects: &[(String, PathBuf)],
        now: Instant,
        reindex: &mut dyn FnMut(&str, &Path) -> bool,
    ) {
        // Track new projects; drop deleted ones.
        for (name, root) in projects {
            self.states.entry(name.clone()).or_insert_with(|| ProjectWatch {
                root: root.clone(),
                snapshot: None,
                next_poll_at: now,
            });
        }
        self.states.retain(|name, _| projects.iter().any(|(n, _)| n == name));

        for (name, state) in &mut self.states {
            if state.next_poll_at > now {
                continue;
            }

            let Some(current) = capture_snapshot(&state.root) else {
                debug!(project = name.as_str(), "watch root missing, backing off");
                state.next_poll_at = now + MAX_POLL_INTERVAL;
                continue;
            };
            let interval = poll_interval(current.len());

            match &state.snapshot {
                // First poll is always the baseline, never a trigger.
                None => {
                    state.snapshot = Some(current);
                    state.next_poll_at = now + interval;
                }
                Some(previous) if *previous == current => {
                    state.next_poll_at = now + interval;
                }
                Some(_) => {
                    debug!(project = name.as_str(), files = current.len(), "snapshot changed");
                    if reindex(name, &state.root) {
                        state.snapshot = Some(current);
                    }
                    // On failure the old snapshot stays: retry next tick.
                    state.next_poll_at = now + interval;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Thread driver
// ---------------------------------------------------------------------------

/// Run the watcher loop on its own thread until the token is cancelled.
pub fn run_watcher(session: Arc<Session>, cancel: CancelToken) {
    let mut watcher = Watcher::new();
    while !cancel.is_cancelled() {
        std::thread::sleep(TICK);
        let projects = known_projects(session.router());
        watcher.poll_all(&projects, Instant::now(), &mut |name, root| {
            // Non-blocking: an in-flight explicit index wins the lock.
            let Ok(_guard) = INDEX_LOCK.try_lock() else {
                debug!(project = name, "index lock held, skipping watch tick");
                return false;
            };
            match session.reindex_locked(root) {
                Ok(stats) => {
                    debug!(
                        project = name,
                        nodes = stats.nodes,
                        edges = stats.edges,
                        "watch re-index complete"
                    );
                    true
                }
                Err(e) => {
                    warn!(project = name, "watch re-index failed: {e}");
                    false
                }
            }
        });
    }
}

fn known_projects(router: &Router) -> Vec<(String, PathBuf)> {
    match router.list_projects() {
        Ok(projects) => projects
            .into_iter()
            .map(|info| (info.project.name, PathBuf::from(info.project.root_path)))
            .collect(),
        Err(e) => {
            warn!("watcher could not list projects: {e}");
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_poll_interval_scaling() {
        assert_eq!(poll_interval(0), Duration::from_secs(1));
        assert_eq!(poll_interval(499), Duration::from_secs(1));
        assert_eq!(poll_interval(500), Duration::from_secs(2));
        assert_eq!(poll_interval(5000), Duration::from_secs(11));
        assert_eq!(poll_interval(1_000_000), Duration::from_secs(60));
    }

    #[test]
    fn test_first_poll_is_baseline() {
        let repo = tempfile::tempdir().unwrap();
        fs::write(repo.path().join("main.go"), "package main\n").unwrap();

        let mut watcher = Watcher::new();
        let projects = vec![("p".to_string(), repo.path().to_path_buf())];
        let mut calls = 0;
        watcher.poll_all(&projects, Instant::now(), &mut |_, _| {
            calls += 1;
            true
        });
        assert_eq!(calls, 0, "baseline poll must not trigger re-index");
    }

    #[test]
    fn test_change_triggers_exactly_once() {
        let repo = tempfile::tempdir().unwrap();
        fs::write(repo.path().join("main.go"), "package main\n").unwrap();

        let mut watcher = Watcher::new();
        let projects = vec![("p".to_string(), repo.path().to_path_buf())];
        let mut calls = 0;
        let t0 = Instant::now();
        watcher.poll_all(&projects, t0, &mut |_, _| {
            calls += 1;
            true
        });

        // Grow the file so size (and content) definitely differ.
        fs::write(repo.path().join("main.go"), "package main\n\nfunc main() {}\n").unwrap();

        let t1 = t0 + Duration::from_secs(2);
        watcher.poll_all(&projects, t1, &mut |_, _| {
            calls += 1;
            true
        });
        assert_eq!(calls, 1);

        // Stable snapshot: no further triggers.
        let t2 = t1 + Duration::from_secs(2);
        watcher.poll_all(&projects, t2, &mut |_, _| {
            calls += 1;
            true
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_failed_reindex_retries() {
        let repo = tempfile::tempdir().unwrap();
        fs::write(repo.path().join("main.go"), "package main\n").unwrap();

        let mut watcher = Watcher::new();
        let projects = vec![("p".to_string(), repo.path().to_path_buf())];
        let t0 = Instant::now();
        watcher.poll_all(&projects, t0, &mut |_, _| true); // baseline

        fs::write(repo.path().join("main.go"), "package main\n// changed\n").unwrap();

        // First attempt fails: old snapshot retained
        let t1 = t0 + Duration::from_secs(2);
        let mut attempts = 0;
        watcher.poll_all(&projects, t1, &mut |_, _| {
            attempts += 1;
            false
        });
        assert_eq!(attempts, 1);

        // Next tick retries because the snapshot still differs
        let t2 = t1 + Duration::from_secs(2);
        watcher.poll_all(&projects, t2, &mut |_, _| {
            attempts += 1;
            true
        });
        assert_eq!(attempts, 2);

        // Adopted snapshot: quiet now
        let t3 = t2 + Duration::from_secs(2);
        watcher.poll_all(&projects, t3, &mut |_, _| {
            attempts += 1;
            true
        });
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_deadline_respected() {
        let repo = tempfile::tempdir().unwrap();
        fs::write(repo.path().join("main.go"), "package main\n").unwrap();

        let mut watcher = Watcher::new();
        let projects = vec![("p".to_string(), repo.path().to_path_buf())];
        let t0 = Instant::now();
        watcher.poll_all(&projects, t0, &mut |_, _| true); // baseline

        fs::write(repo.path().join("main.go"), "package main\n// changed\n").unwrap();

        // Before the deadline nothing happens, even though the file changed.
        let mut calls = 0;
        watcher.poll_all(&projects, t0 + Duration::from_millis(100), &mut |_, _| {
            calls += 1;
            true
        });
        assert_eq!(calls, 0);
    }
}
