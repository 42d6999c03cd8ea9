//! Repository discovery — walk a project root and yield indexable files.
//!
//! Applies the fixed ignore defaults, optional `.cgrignore` globs, and the
//! language registry's extension map. Discovery is the single source of truth
//! for "what counts as part of the project": indexing, the watcher's
//! snapshots, and `search_code` all go through it.

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::lang::registry;
use crate::types::{CancelToken, Result};

// ---------------------------------------------------------------------------
// Ignore defaults
// ---------------------------------------------------------------------------

/// Directory basenames that are always skipped.
const SKIP_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "vendor",
    "dist",
    "target",
    "build",
    "out",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
    ".next",
    ".cache",
];

/// File suffixes that are always skipped.
const SKIP_SUFFIXES: &[&str] = &[
    ".tmp", "~", ".pyc", ".o", ".a", ".so", ".dll", ".class", ".min.js", ".map", ".lock",
];

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Scan configuration for one project root. Loaded from `.codegraph.toml`
/// plus the fixed defaults; `.cgrignore` globs are layered on top.
#[derive(Clone)]
pub struct ScanConfig {
    pub root: PathBuf,
    pub skip_dirs: HashSet<String>,
    /// Compiled `.cgrignore` globs, matched against directory basenames and
    /// repo-relative paths. None when the file is absent or empty.
    ignore_globs: Option<std::sync::Arc<GlobSet>>,
    /// Optional cache-directory override from `[cache] dir`.
    pub cache_dir_override: Option<PathBuf>,
}

impl ScanConfig {
    /// Build a config for `root`: defaults + `.codegraph.toml` + `.cgrignore`.
    pub fn load(root: &Path) -> Self {
        let mut skip_dirs: HashSet<String> = SKIP_DIRS.iter().map(|s| s.to_string()).collect();
        let mut cache_dir_override = None;

        // Optional project config: [scan] extra_skip_dirs, [cache] dir
        let config_path = root.join(".codegraph.toml");
        if let Ok(content) = fs::read_to_string(&config_path) {
            match content.parse::<toml::Table>() {
                Ok(table) => {
                    if let Some(extra) = table
                        .get("scan")
                        .and_then(|s| s.get("extra_skip_dirs"))
                        .and_then(|v| v.as_array())
                    {
                        for dir in extra.iter().filter_map(|v| v.as_str()) {
                            skip_dirs.insert(dir.to_string());
                        }
                    }
                    if let Some(dir) = table
                        .get("cache")
                        .and_then(|c| c.get("dir"))
                        .and_then(|v| v.as_str())
                    {
                        cache_dir_override = Some(PathBuf::from(dir));
                    }
                }
                Err(e) => warn!("invalid .codegraph.toml at {}: {e}", config_path.display()),
            }
        }

        ScanConfig {
            root: root.to_path_buf(),
            skip_dirs,
            ignore_globs: load_cgrignore(root).map(std::sync::Arc::new),
            cache_dir_override,
        }
    }

    fn is_ignored_dir(&self, basename: &str) -> bool {
        if self.skip_dirs.contains(basename) {
            return true;
        }
        self.ignore_globs
            .as_ref()
            .is_some_and(|globs| globs.is_match(basename))
    }

    fn is_ignored_file(&self, rel_path: &str) -> bool {
        let basename = rel_path.rsplit('/').next().unwrap_or(rel_path);
        if SKIP_SUFFIXES.iter().any(|suf| basename.ends_with(suf)) {
            return true;
        }
        self.ignore_globs
            .as_ref()
            .is_some_and(|globs| globs.is_match(rel_path) || globs.is_match(basename))
    }
}

/// Parse `.cgrignore`: UTF-8, line-oriented, `#` comments and blanks skipped,
/// each remaining line a glob applied to basenames or relative paths.
fn load_cgrignore(root: &Path) -> Option<GlobSet> {
    let content = fs::read_to_string(root.join(".cgrignore")).ok()?;
    let mut builder = GlobSetBuilder::new();
    let mut count = 0usize;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Glob::new(line) {
            Ok(glob) => {
                builder.add(glob);
                count += 1;
            }
            Err(e) => warn!("invalid .cgrignore pattern '{line}': {e}"),
        }
    }
    if count == 0 {
        return None;
    }
    builder.build().ok()
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// A discovered file with its resolved language (json is the pseudo-language
/// that yields only a File node downstream).
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub abs_path: PathBuf,
    pub rel_path: String,
    pub language: &'static str,
}

/// Walk the project root and collect every indexable file. Checks the
/// cancellation token before starting and on every walk callback.
pub fn discover(config: &ScanConfig, cancel: &CancelToken) -> Result<Vec<DiscoveredFile>> {
    cancel.check()?;

    let results: Mutex<Vec<DiscoveredFile>> = Mutex::new(Vec::new());
    let root = config.root.clone();
    let cfg = config.clone();
    let token = cancel.clone();

    WalkBuilder::new(&root)
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .threads(rayon::current_num_threads().min(12))
        .filter_entry({
            let cfg = cfg.clone();
            move |entry| {
                if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                    let name = entry.file_name().to_string_lossy();
                    return !cfg.is_ignored_dir(name.as_ref());
                }
                true
            }
        })
        .build_parallel()
        .run(|| {
            let cfg = cfg.clone();
            let root = root.clone();
            let token = token.clone();
            let results = &results;
            Box::new(move |entry| {
                if token.is_cancelled() {
                    return ignore::WalkState::Quit;
                }
                let entry = match entry {
                    Ok(e) => e,
                    Err(_) => return ignore::WalkState::Continue,
                };
                if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                    return ignore::WalkState::Continue;
                }

                let abs_path = entry.path().to_path_buf();
                let rel_path = abs_path
                    .strip_prefix(&root)
                    .unwrap_or(&abs_path)
                    .to_string_lossy()
                    .replace('\\', "/");

                if cfg.is_ignored_file(&rel_path) {
                    return ignore::WalkState::Continue;
                }

                let ext = abs_path.extension().and_then(|e| e.to_str()).unwrap_or("");
                let language = match registry().language_for_ext(ext) {
                    Some(lang) => lang,
                    None => return ignore::WalkState::Continue,
                };

                results.lock().unwrap().push(DiscoveredFile { abs_path, rel_path, language });
                ignore::WalkState::Continue
            })
        });

    cancel.check()?;

    let mut files = results.into_inner().unwrap();
    // Stable ordering keeps downstream output deterministic.
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
