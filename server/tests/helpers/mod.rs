//! Test harness for graph tool integration tests.
//!
//! Builds a `Session` over a temp cache directory, copies fixture files into
//! a temp repo with `git init` + an initial commit, and dispatches tool calls
//! directly (no subprocess, no transport).

use codegraph_server::session::Session;
use codegraph_server::tools::dispatch_tool;
use codegraph_server::Router;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestHarness {
    pub session: Arc<Session>,
    pub repo_root: PathBuf,
    _cache_dir: TempDir,
    _repo_dir: TempDir,
}

impl TestHarness {
    /// Create a harness from a named fixture directory: copy to a temp dir,
    /// `git init` + initial commit, index it.
    pub fn from_fixture(name: &str) -> Self {
        let fixture_src =
            Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
        assert!(fixture_src.exists(), "Fixture '{name}' not found at {}", fixture_src.display());

        let repo_dir = TempDir::new().expect("Failed to create repo dir");
        seed_fixture(&fixture_src, repo_dir.path());
        git_init_commit(repo_dir.path());

        let harness = Self::over_repo(repo_dir);
        let indexed = harness.call("index_repository", serde_json::json!({}));
        assert!(
            indexed.get("error").map(|e| e.is_null()).unwrap_or(true),
            "initial index failed: {indexed}"
        );
        harness
    }

    /// Create a harness over an empty temp repo (tests write their own files).
    pub fn empty() -> Self {
        let repo_dir = TempDir::new().expect("Failed to create repo dir");
        git_init_commit(repo_dir.path());
        Self::over_repo(repo_dir)
    }

    fn over_repo(repo_dir: TempDir) -> Self {
        let cache_dir = TempDir::new().expect("Failed to create cache dir");
        let router = Arc::new(
            Router::new(Some(cache_dir.path().to_path_buf())).expect("Failed to open cache"),
        );
        let repo_root = repo_dir.path().to_path_buf();
        let session = Session::new(router, Some(repo_root.clone()));
        TestHarness { session, repo_root, _cache_dir: cache_dir, _repo_dir: repo_dir }
    }

    pub fn call(&self, tool: &str, args: Value) -> Value {
        dispatch_tool(&self.session, tool, &args)
    }

    /// Write a file under the repo root (creating parents).
    pub fn write(&self, rel: &str, content: &str) {
        let path = self.repo_root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    /// Stage and commit everything in the repo.
    pub fn commit_all(&self, message: &str) {
        git(&self.repo_root, &["add", "-A"]);
        git(&self.repo_root, &["commit", "-m", message]);
    }

    /// Index a second repository into the same cache.
    pub fn index_other(&self, root: &Path) -> Value {
        self.call(
            "index_repository",
            serde_json::json!({ "repo_path": root.display().to_string() }),
        )
    }
}

/// Seed a fixture tree into the temp repo. Iterative so deep fixtures don't
/// grow the stack; contents only, no metadata.
fn seed_fixture(fixture: &Path, repo: &Path) {
    let mut pending = vec![(fixture.to_path_buf(), repo.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        std::fs::create_dir_all(&to).unwrap_or_else(|e| panic!("mkdir {}: {e}", to.display()));
        let entries = std::fs::read_dir(&from)
            .unwrap_or_else(|e| panic!("read fixture dir {}: {e}", from.display()));
        for entry in entries {
            let entry = entry.expect("fixture dir entry");
            let target = to.join(entry.file_name());
            if entry.path().is_dir() {
                pending.push((entry.path(), target));
            } else {
                std::fs::copy(entry.path(), &target)
                    .unwrap_or_else(|e| panic!("seed {}: {e}", target.display()));
            }
        }
    }
}

pub fn git(root: &Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .args(args)
        .current_dir(root)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@test.com")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@test.com")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .expect("git failed to run");
    assert!(status.success(), "git {args:?} failed");
}

fn git_init_commit(root: &Path) {
    git(root, &["init", "-b", "main"]);
    git(root, &["add", "-A"]);
    // An empty repo has nothing to commit; allow that for `empty()`.
    let _ = std::process::Command::new("git")
        .args([
            "-c",
            "user.email=test@test.com",
            "-c",
            "user.name=Test",
            "commit",
            "-m",
            "Initial commit",
            "--allow-empty",
        ])
        .current_dir(root)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .expect("git commit failed");
}
