//! Git diff parsing and change-impact tracing.
//!
//! Maps changed hunks to the symbols whose line ranges they overlap, then
//! runs inbound BFS over call-like edges to find everything that transitively
//! depends on the change, deduplicated to the minimum hop per symbol.

use git2::{Delta, DiffOptions, Repository};
use std::collections::HashMap;
use std::path::Path;

use crate::store::Store;
use crate::traverse::{self, hop_to_risk, ImpactSummary, RiskLevel};
use crate::types::*;

/// Result cap for each changed symbol's inbound walk.
const IMPACT_RESULT_CAP: usize = 200;

// ---------------------------------------------------------------------------
// Scopes and diff records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffScope {
    /// Working tree vs index.
    Unstaged,
    /// Index vs HEAD.
    Staged,
    /// Working tree vs HEAD (default).
    All,
    /// Working tree vs a named base branch.
    Branch,
}

impl DiffScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unstaged" => Some(DiffScope::Unstaged),
            "staged" => Some(DiffScope::Staged),
            "all" => Some(DiffScope::All),
            "branch" => Some(DiffScope::Branch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ChangedFile {
    /// A / M / D / R.
    pub status: char,
    pub path: String,
    pub old_path: Option<String>,
}

/// A changed line range on new-file coordinates.
#[derive(Debug, Clone)]
pub struct ChangedHunk {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
}

// ---------------------------------------------------------------------------
// Diff collection
// ---------------------------------------------------------------------------

fn status_char(delta: Delta) -> Option<char> {
    match delta {
        Delta::Added => Some('A'),
        Delta::Modified => Some('M'),
        Delta::Deleted => Some('D'),
        Delta::Renamed => Some('R'),
        Delta::Copied => Some('A'),
        Delta::Typechange => Some('M'),
        _ => None,
    }
}

/// Collect changed files and hunks for one scope.
pub fn collect_diff(
    repo_root: &Path,
    scope: DiffScope,
    base_branch: &str,
) -> Result<(Vec<ChangedFile>, Vec<ChangedHunk>)> {
    let repo = Repository::open(repo_root)?;
    let mut opts = DiffOptions::new();
    opts.include_untracked(true).recurse_untracked_dirs(true);

    let head_tree = repo.head().ok().and_then(|h| h.peel_to_tree().ok());

    let mut diff = match scope {
        DiffScope::Unstaged => repo.diff_index_to_workdir(None, Some(&mut opts))?,
        DiffScope::Staged => {
            repo.diff_tree_to_index(head_tree.as_ref(), None, Some(&mut opts))?
        }
        DiffScope::All => {
            repo.diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut opts))?
        }
        DiffScope::Branch => {
            let reference = repo
                .find_branch(base_branch, git2::BranchType::Local)
                .map_err(|_| {
                    GraphError::not_found(format!("base branch not found: {base_branch}"))
                })?;
            let base_tree = reference.get().peel_to_tree()?;
            repo.diff_tree_to_workdir_with_index(Some(&base_tree), Some(&mut opts))?
        }
    };
    diff.find_similar(None)?; // rename detection

    let mut files = Vec::new();
    for delta in diff.deltas() {
        let Some(status) = status_char(delta.status()) else {
            continue;
        };
        let path = delta
            .new_file()
            .path()
            .or_else(|| delta.old_file().path())
            .and_then(|p| p.to_str())
            .map(|p| p.replace('\\', "/"));
        let Some(path) = path else { continue };
        let old_path = if status == 'R' {
            delta
                .old_file()
                .path()
                .and_then(|p| p.to_str())
                .map(|p| p.replace('\\', "/"))
        } else {
            None
        };
        files.push(ChangedFile { status, path, old_path });
    }

    let mut hunks = Vec::new();
    diff.foreach(
        &mut |_, _| true,
        None,
        Some(&mut |delta, hunk| {
            if let Some(path) = delta.new_file().path().and_then(|p| p.to_str()) {
                let start = hunk.new_start();
                let lines = hunk.new_lines();
                if lines > 0 {
                    hunks.push(ChangedHunk {
                        path: path.replace('\\', "/"),
                        start_line: start,
                        end_line: start + lines - 1,
                    });
                }
            }
            true
        }),
        None,
    )?;

    Ok((files, hunks))
}

// ---------------------------------------------------------------------------
// Hunk → symbol mapping
// ---------------------------------------------------------------------------

/// Symbol labels that participate in impact tracing.
const SYMBOL_LABELS: &[NodeLabel] = &[
    NodeLabel::Function,
    NodeLabel::Method,
    NodeLabel::Class,
    NodeLabel::Interface,
];

/// The deduplicated set of symbols whose ranges overlap the changed hunks.
pub fn changed_symbols(
    store: &Store,
    project: &str,
    files: &[ChangedFile],
    hunks: &[ChangedHunk],
) -> Result<Vec<Node>> {
    let mut hunks_by_file: HashMap<&str, Vec<&ChangedHunk>> = HashMap::new();
    for hunk in hunks {
        hunks_by_file.entry(hunk.path.as_str()).or_default().push(hunk);
    }

    let mut seen_ids = std::collections::HashSet::new();
    let mut symbols = Vec::new();
    for file in files {
        if file.status == 'D' {
            continue;
        }
        let file_symbols = match hunks_by_file.get(file.path.as_str()) {
            Some(file_hunks) => {
                let mut overlapping = Vec::new();
                for hunk in file_hunks {
                    overlapping.extend(store.nodes_overlapping(
                        project,
                        &file.path,
                        hunk.start_line,
                        hunk.end_line,
                    )?);
                }
                overlapping
            }
            // No hunk data (e.g. untracked file): every symbol in the file.
            None => store.nodes_in_file(project, &file.path)?,
        };
        for node in file_symbols {
            if SYMBOL_LABELS.contains(&node.label) && seen_ids.insert(node.id) {
                symbols.push(node);
            }
        }
    }
    symbols.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
    Ok(symbols)
}

// ---------------------------------------------------------------------------
// Impact tracing
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ImpactedSymbol {
    pub node: Node,
    pub hop: u32,
    pub risk: RiskLevel,
    /// Name of the earliest changed-symbol ancestor that reaches this node.
    pub changed_by: String,
}

#[derive(Debug)]
pub struct ChangeReport {
    pub changed_files: Vec<ChangedFile>,
    pub changed_symbols: Vec<Node>,
    pub impacted: Vec<ImpactedSymbol>,
    pub summary: ImpactSummary,
}

/// Full change-detection pass: diff → symbols → inbound impact.
pub fn detect_changes(
    store: &Store,
    project: &str,
    repo_root: &Path,
    scope: DiffScope,
    base_branch: &str,
    depth: u32,
    cancel: &CancelToken,
) -> Result<ChangeReport> {
    let depth = depth.clamp(1, 5);
    let (files, hunks) = collect_diff(repo_root, scope, base_branch)?;
    let changed = changed_symbols(store, project, &files, &hunks)?;
    let changed_ids: std::collections::HashSet<i64> = changed.iter().map(|n| n.id).collect();

    // id -> (node, min hop, changed_by) across every changed symbol's walk
    let mut best: HashMap<i64, (Node, u32, String)> = HashMap::new();
    let mut any_cross_service = false;

    for origin in &changed {
        cancel.check()?;
        let walk = traverse::bfs(
            store,
            origin.id,
            Direction::Inbound,
            EdgeType::call_like(),
            depth,
            IMPACT_RESULT_CAP,
            cancel,
        )?;
        any_cross_service |= walk
            .edges
            .iter()
            .any(|e| matches!(e.edge_type, EdgeType::HttpCalls | EdgeType::AsyncCalls));
        for reached in walk.visited {
            if changed_ids.contains(&reached.node.id) {
                continue; // already changed directly
            }
            let replace = match best.get(&reached.node.id) {
                Some((_, hop, _)) => reached.hop < *hop,
                None => true,
            };
            if replace {
                best.insert(reached.node.id, (reached.node, reached.hop, origin.name.clone()));
            }
        }
    }

    let mut impacted: Vec<ImpactedSymbol> = best
        .into_values()
        .map(|(node, hop, changed_by)| ImpactedSymbol {
            risk: hop_to_risk(hop),
            node,
            hop,
            changed_by,
        })
        .collect();
    impacted.sort_by(|a, b| a.hop.cmp(&b.hop).then_with(|| a.node.name.cmp(&b.node.name)));

    let mut summary = ImpactSummary::default();
    for symbol in &impacted {
        match symbol.risk {
            RiskLevel::Critical => summary.critical += 1,
            RiskLevel::High => summary.high += 1,
            RiskLevel::Medium => summary.medium += 1,
            RiskLevel::Low => summary.low += 1,
        }
        summary.total += 1;
    }
    summary.has_cross_service = any_cross_service;

    Ok(ChangeReport { changed_files: files, changed_symbols: changed, impacted, summary })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
