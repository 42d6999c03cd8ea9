//! Index orchestration: discovery → parallel extraction → one transaction.
//!
//! A pass either loads a project from scratch (initial) or re-indexes only
//! the files whose SHA-256 changed (incremental). All database writes for a
//! pass land in a single transaction, so concurrent readers observe either
//! the old graph or the new one, never a half-indexed state.

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::extract::{extract_file, CallSite, FileExtraction, SiteKind};
use crate::infer;
use crate::infer::{InferredTarget, LocalRoute, RemoteRoute, RemoteTask};
use crate::resolve;
use crate::resolve::SymbolTable;
use crate::router::Router;
use crate::scan::{discover, DiscoveredFile, ScanConfig};
use crate::store::StoreTx;
use crate::types::*;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of one `index_repository` pass.
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub project: String,
    pub nodes: i64,
    pub edges: i64,
    pub indexed_at: i64,
    /// "initial" or "incremental".
    pub index_type: &'static str,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub duration_ms: u64,
}

/// Project name = basename of the repository root.
pub fn project_name_for_root(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string())
}

fn epoch_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Index (or incrementally re-index) the repository at `root`.
pub fn index_repository(router: &Router, root: &Path, cancel: &CancelToken) -> Result<IndexStats> {
    let start = Instant::now();
    let root = root
        .canonicalize()
        .map_err(|_| GraphError::not_found(format!("repository root: {}", root.display())))?;
    let project = project_name_for_root(&root);
    let store = router.store(&project)?;

    let config = ScanConfig::load(&root);
    let files = discover(&config, cancel)?;
    let stored_hashes = store.list_files_for_project(&project)?;
    let index_type: &'static str =
        if stored_hashes.is_empty() { "initial" } else { "incremental" };

    // Hash every discovered file; keep only the changed ones for extraction.
    let hashed: Vec<(DiscoveredFile, String)> = files
        .par_iter()
        .filter_map(|file| {
            let bytes = std::fs::read(&file.abs_path).ok()?;
            let sha = hex::encode(Sha256::digest(&bytes));
            Some((file.clone(), sha))
        })
        .collect();
    cancel.check()?;

    let discovered_paths: HashSet<&str> =
        hashed.iter().map(|(f, _)| f.rel_path.as_str()).collect();
    let removed: Vec<String> = stored_hashes
        .keys()
        .filter(|path| !discovered_paths.contains(path.as_str()))
        .cloned()
        .collect();
    let changed: Vec<&(DiscoveredFile, String)> = hashed
        .iter()
        .filter(|(f, sha)| stored_hashes.get(&f.rel_path) != Some(sha))
        .collect();
    let files_skipped = hashed.len() - changed.len();

    debug!(
        project = project.as_str(),
        discovered = hashed.len(),
        changed = changed.len(),
        removed = removed.len(),
        index_type,
        "discovery complete"
    );

    // Per-file extraction is soft-fail: a broken file is skipped with a WARN
    // and the rest of the project still indexes.
    let extractions: Vec<FileExtraction> = changed
        .par_iter()
        .filter_map(|(file, sha)| {
            if cancel.is_cancelled() {
                return None;
            }
            let bytes = match std::fs::read(&file.abs_path) {
                Ok(b) => b,
                Err(e) => {
                    warn!(file = file.rel_path.as_str(), "read failed: {e}");
                    return None;
                }
            };
            match extract_file(&project, file, &bytes, sha.clone()) {
                Ok(extraction) => Some(extraction),
                Err(GraphError::Cancelled) => None,
                Err(e) => {
                    warn!(file = file.rel_path.as_str(), "extraction failed: {e}");
                    None
                }
            }
        })
        .collect();
    cancel.check()?;

    let indexed_at = epoch_now();
    let all_paths: Vec<String> = hashed.iter().map(|(f, _)| f.rel_path.clone()).collect();

    store.with_transaction(|tx| {
        commit_pass(
            tx,
            router,
            &project,
            &root,
            indexed_at,
            index_type,
            &extractions,
            &removed,
            &all_paths,
        )
    })?;

    let stats = IndexStats {
        nodes: store.count_nodes(&project)?,
        edges: store.count_edges(&project)?,
        project: project.clone(),
        indexed_at,
        index_type,
        files_indexed: extractions.len(),
        files_skipped,
        duration_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        project = stats.project.as_str(),
        nodes = stats.nodes,
        edges = stats.edges,
        files = stats.files_indexed,
        skipped = stats.files_skipped,
        time_ms = stats.duration_ms,
        index_type,
        "index pass complete"
    );
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Transactional commit of one pass
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn commit_pass(
    tx: &StoreTx,
    router: &Router,
    project: &str,
    root: &Path,
    indexed_at: i64,
    index_type: &'static str,
    extractions: &[FileExtraction],
    removed: &[String],
    all_paths: &[String],
) -> Result<()> {
    tx.upsert_project(project, &root.display().to_string(), indexed_at)?;

    // Expunge removed files entirely (their hashes go with them).
    for path in removed {
        tx.delete_nodes_by_file(project, path)?;
    }

    let changed_paths: Vec<String> = extractions.iter().map(|e| e.rel_path.clone()).collect();

    // Stale call/usage edges sourced in changed files are recreated below.
    tx.delete_edges_by_source_file(project, EdgeType::Calls, &changed_paths)?;
    tx.delete_edges_by_source_file(project, EdgeType::Usage, &changed_paths)?;

    // Symbols that vanished from a changed file are deleted by id, so nodes
    // in untouched files keep their rows bit-identical.
    for extraction in extractions {
        let new_qnames: HashSet<&str> =
            extraction.nodes.iter().map(|n| n.qualified_name.as_str()).collect();
        let stale: Vec<i64> = tx
            .nodes_in_file(project, &extraction.rel_path)?
            .into_iter()
            .filter(|n| !new_qnames.contains(n.qualified_name.as_str()))
            .map(|n| n.id)
            .collect();
        if !stale.is_empty() {
            tx.delete_nodes_by_ids(&stale)?;
        }
    }

    let new_nodes: Vec<Node> =
        extractions.iter().flat_map(|e| e.nodes.iter().cloned()).collect();
    tx.upsert_node_batch(&new_nodes)?;

    containment_pass(tx, project, root, all_paths)?;

    // One scan builds the symbol table over the whole project, changed and
    // unchanged files alike.
    let all_nodes = tx.all_nodes(project)?;
    let symbols = SymbolTable::from_nodes(all_nodes.iter());

    // Module id per file (import edges connect modules).
    let module_ids: HashMap<String, i64> = all_nodes
        .iter()
        .filter(|n| n.label == NodeLabel::Module)
        .map(|n| (n.file_path.clone(), n.id))
        .collect();

    let (imported_files, import_edges) =
        resolve::resolve_imports(project, extractions, all_paths, &module_ids);
    tx.upsert_edge_batch(&import_edges)?;

    let defines: Vec<_> = extractions.iter().flat_map(|e| e.defines.iter().cloned()).collect();
    tx.upsert_edge_batch(&resolve::containment_edges(project, &defines, &symbols))?;

    let calls: Vec<_> = extractions.iter().flat_map(|e| e.calls.iter().cloned()).collect();
    tx.upsert_edge_batch(&resolve::resolve_calls(project, &calls, &symbols, &imported_files))?;

    let (handles_edges, handler_qnames) =
        resolve::resolve_handlers(project, extractions, &symbols);
    tx.upsert_edge_batch(&handles_edges)?;
    for qname in &handler_qnames {
        if let Some(id) = symbols.id_of(qname) {
            tx.set_node_flag(id, "is_entry_point")?;
        }
    }

    let impls: Vec<_> = extractions.iter().flat_map(|e| e.impls.iter().cloned()).collect();
    tx.upsert_edge_batch(&resolve::resolve_implements(project, &impls, &defines, &symbols))?;

    // Pass 3: cross-service edges for this pass's call sites.
    let sites: Vec<CallSite> =
        extractions.iter().flat_map(|e| e.call_sites.iter().cloned()).collect();
    if !sites.is_empty() {
        cross_service_pass(tx, router, project, &sites, &all_nodes, &symbols)?;
    }

    // Change coupling is recomputed in bulk on full indexes only.
    if index_type == "initial" {
        let file_ids: HashMap<String, i64> = all_nodes
            .iter()
            .filter(|n| n.label == NodeLabel::File)
            .map(|n| (n.file_path.clone(), n.id))
            .collect();
        tx.delete_edges_by_type(project, EdgeType::FileChangesWith)?;
        tx.upsert_edge_batch(&infer::change_coupling_edges(project, root, &file_ids)?)?;
    }

    let hashes: Vec<FileHash> = extractions
        .iter()
        .map(|e| FileHash {
            project: project.to_string(),
            rel_path: e.rel_path.clone(),
            sha256: e.sha256.clone(),
        })
        .collect();
    tx.upsert_file_hash_batch(&hashes)?;
    Ok(())
}

/// Filesystem containment: one Project root node, Folder nodes for every
/// directory, Package nodes for directories carrying a package indicator
/// (Cargo.toml, go.mod, package.json, ...), and the CONTAINS_* edges wiring
/// them to each other and to the File nodes. The Project node is the only
/// node with an empty qualified name.
fn containment_pass(
    tx: &StoreTx,
    project: &str,
    root: &Path,
    all_paths: &[String],
) -> Result<()> {
    let project_id =
        tx.upsert_node(&Node::new(project, NodeLabel::Project, project, "", ""))?;

    let indicators: HashSet<&str> = crate::lang::registry()
        .all_specs()
        .iter()
        .flat_map(|spec| spec.package_indicators.iter().copied())
        .collect();

    // Every ancestor directory of a discovered file.
    let mut dirs: Vec<String> = Vec::new();
    for path in all_paths {
        let mut parent = path.as_str();
        while let Some((dir, _)) = parent.rsplit_once('/') {
            if !dirs.iter().any(|d| d == dir) {
                dirs.push(dir.to_string());
            }
            parent = dir;
        }
    }
    dirs.sort();

    // Package indicators (go.mod, Cargo.toml, ...) mostly fall outside the
    // language extension map, so probe the filesystem per directory.
    let mut package_dirs: Vec<String> = Vec::new();
    for dir in std::iter::once(String::new()).chain(dirs.iter().cloned()) {
        let abs = if dir.is_empty() { root.to_path_buf() } else { root.join(&dir) };
        if indicators.iter().any(|marker| abs.join(marker).exists()) {
            package_dirs.push(dir);
        }
    }

    let folder_qname = |dir: &str| format!("{project}.folder.{}", dir.replace('/', "."));
    let mut folder_ids: HashMap<String, i64> = HashMap::new();
    let mut edges: Vec<Edge> = Vec::new();

    for dir in &dirs {
        let name = dir.rsplit('/').next().unwrap_or(dir);
        let node =
            Node::new(project, NodeLabel::Folder, name, &folder_qname(dir), dir);
        let id = tx.upsert_node(&node)?;
        folder_ids.insert(dir.clone(), id);
    }
    for dir in &dirs {
        let child = folder_ids[dir];
        let parent = match dir.rsplit_once('/') {
            Some((parent_dir, _)) => folder_ids[parent_dir],
            None => project_id,
        };
        edges.push(Edge::new(project, parent, child, EdgeType::ContainsFolder));
    }

    for dir in &package_dirs {
        let name = if dir.is_empty() {
            project
        } else {
            dir.rsplit('/').next().unwrap_or(dir)
        };
        let qname = format!("{project}.package.{}", dir.replace('/', "."));
        let node = Node::new(project, NodeLabel::Package, name, &qname, dir);
        let id = tx.upsert_node(&node)?;
        edges.push(Edge::new(project, project_id, id, EdgeType::ContainsPackage));
    }

    // CONTAINS_FILE from the owning folder (or the project root) to each file.
    for path in all_paths {
        let Some(file_node) = tx.get_node_by_qualified_name(
            project,
            &crate::qname::file_qname(project, path),
        )?
        else {
            continue;
        };
        let parent = match path.rsplit_once('/') {
            Some((dir, _)) => folder_ids.get(dir).copied().unwrap_or(project_id),
            None => project_id,
        };
        edges.push(Edge::new(project, parent, file_node.id, EdgeType::ContainsFile));
    }

    tx.upsert_edge_batch(&edges)
}

/// Match HTTP/async call sites against this project's route table and every
/// other project under the same cache; mirror remote endpoints locally.
fn cross_service_pass(
    tx: &StoreTx,
    router: &Router,
    project: &str,
    sites: &[CallSite],
    all_nodes: &[Node],
    symbols: &SymbolTable,
) -> Result<()> {
    let prop_str = |node: &Node, key: &str| -> String {
        node.properties
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let local_routes: Vec<LocalRoute> = all_nodes
        .iter()
        .filter(|n| n.label == NodeLabel::Route)
        .map(|n| LocalRoute {
            node_id: n.id,
            method: prop_str(n, "method"),
            url_path: prop_str(n, "url_path"),
            service_dir: n.file_path.split('/').next().unwrap_or("").to_string(),
        })
        .collect();

    // Remote tables come from the other projects under the same cache.
    let mut remote_routes: Vec<RemoteRoute> = Vec::new();
    let mut remote_tasks: Vec<RemoteTask> = Vec::new();
    let async_targets: HashSet<&str> = sites
        .iter()
        .filter(|s| s.kind == SiteKind::Async)
        .filter_map(|s| s.target_name.as_deref())
        .collect();
    // project_names (not list_projects): the current project's store holds
    // an open transaction, and re-entering it would deadlock.
    for other in router.project_names()? {
        if other == project {
            continue;
        }
        let other_store = router.store(&other)?;
        for node in other_store.nodes_by_label(&other, NodeLabel::Route, 10_000)? {
            remote_routes.push(RemoteRoute {
                method: prop_str(&node, "method"),
                url_path: prop_str(&node, "url_path"),
                project: other.clone(),
                node,
            });
        }
        for target in &async_targets {
            for node in other_store.find_nodes_by_name(&other, target)? {
                if matches!(node.label, NodeLabel::Function | NodeLabel::Method) {
                    remote_tasks.push(RemoteTask { project: other.clone(), node });
                }
            }
        }
    }

    let site_source_ids: HashMap<String, i64> = sites
        .iter()
        .filter_map(|s| symbols.id_of(&s.caller_qname).map(|id| (s.caller_qname.clone(), id)))
        .collect();
    let caller_files: HashMap<String, String> = all_nodes
        .iter()
        .filter(|n| site_source_ids.contains_key(&n.qualified_name))
        .map(|n| (n.qualified_name.clone(), n.file_path.clone()))
        .collect();

    let inferred = infer::infer_cross_service(
        sites,
        &site_source_ids,
        &caller_files,
        &local_routes,
        &remote_routes,
        &remote_tasks,
    );

    let mut edges = Vec::with_capacity(inferred.len());
    for item in inferred {
        let target_id = match item.target {
            InferredTarget::Local(id) => id,
            InferredTarget::Mirror(mut node) => {
                node.project = project.to_string();
                tx.upsert_node(&node)?
            }
        };
        let mut edge = Edge::new(project, item.source_id, target_id, item.edge_type);
        edge.properties = item.properties;
        edges.push(edge);
    }
    tx.upsert_edge_batch(&edges)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn test_router() -> (tempfile::TempDir, Router) {
        let cache = tempfile::tempdir().unwrap();
        let router = Router::new(Some(cache.path().to_path_buf())).unwrap();
        (cache, router)
    }

    #[test]
    fn test_minimal_go_index() {
        let (_cache, router) = test_router();
        let repo = tempfile::tempdir().unwrap();
        write(
            repo.path(),
            "main.go",
            "package main\n\nfunc Hello() string {\n\treturn \"hi\"\n}\n\nfunc main() {\n\tHello()\n}\n",
        );
        write(repo.path(), "util.go", "package main\n\nfunc Unused() {}\n");

        let stats = index_repository(&router, repo.path(), &CancelToken::new()).unwrap();
        assert_eq!(stats.index_type, "initial");
        assert_eq!(stats.files_indexed, 2);

        let project = stats.project.clone();
        let store = router.existing_store(&project).unwrap();

        let functions = store.nodes_by_label(&project, NodeLabel::Function, 100).unwrap();
        let names: Vec<&str> = functions.iter().map(|n| n.name.as_str()).collect();
        assert!(names.contains(&"Hello"));
        assert!(names.contains(&"main"));
        assert!(names.contains(&"Unused"));

        // main -> Hello CALLS edge, nothing into Unused
        let hello = store
            .find_nodes_by_name(&project, "Hello")
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        let inbound = store.adjacent_edges(hello.id, Direction::Inbound, &[EdgeType::Calls]).unwrap();
        assert_eq!(inbound.len(), 1);
        let unused = store
            .find_nodes_by_name(&project, "Unused")
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        assert!(store.adjacent_edges(unused.id, Direction::Inbound, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_containment_hierarchy() {
        let (_cache, router) = test_router();
        let repo = tempfile::tempdir().unwrap();
        write(repo.path(), "go.mod", "module example.com/app\n");
        write(repo.path(), "api/server.go", "package api\n\nfunc Serve() {}\n");

        let stats = index_repository(&router, repo.path(), &CancelToken::new()).unwrap();
        let project = stats.project.clone();
        let store = router.existing_store(&project).unwrap();

        let roots = store.nodes_by_label(&project, NodeLabel::Project, 10).unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].qualified_name, "");

        let folders = store.nodes_by_label(&project, NodeLabel::Folder, 10).unwrap();
        assert!(folders.iter().any(|f| f.name == "api"));

        // go.mod marks the root as a package
        let packages = store.nodes_by_label(&project, NodeLabel::Package, 10).unwrap();
        assert_eq!(packages.len(), 1);

        let contains = store
            .adjacent_edges(roots[0].id, Direction::Outbound, &[])
            .unwrap();
        assert!(contains.iter().any(|e| e.edge_type == EdgeType::ContainsFolder));
        assert!(contains.iter().any(|e| e.edge_type == EdgeType::ContainsPackage));

        let api_folder = folders.iter().find(|f| f.name == "api").unwrap();
        let files = store
            .adjacent_edges(api_folder.id, Direction::Outbound, &[EdgeType::ContainsFile])
            .unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_incremental_skips_unchanged() {
        let (_cache, router) = test_router();
        let repo = tempfile::tempdir().unwrap();
        write(repo.path(), "a.py", "def alpha():\n    pass\n");
        write(repo.path(), "b.py", "def beta():\n    alpha()\n");

        let first = index_repository(&router, repo.path(), &CancelToken::new()).unwrap();
        assert_eq!(first.files_indexed, 2);

        // No changes: everything skips
        let second = index_repository(&router, repo.path(), &CancelToken::new()).unwrap();
        assert_eq!(second.index_type, "incremental");
        assert_eq!(second.files_indexed, 0);
        assert_eq!(second.files_skipped, 2);

        // Touch one file: only it re-indexes, other nodes survive untouched
        let project = first.project.clone();
        let store = router.existing_store(&project).unwrap();
        let before: Vec<(i64, String)> = store
            .nodes_in_file(&project, "a.py")
            .unwrap()
            .iter()
            .map(|n| (n.id, n.qualified_name.clone()))
            .collect();

        write(repo.path(), "b.py", "def beta():\n    alpha()\n\ndef gamma():\n    beta()\n");
        let third = index_repository(&router, repo.path(), &CancelToken::new()).unwrap();
        assert_eq!(third.files_indexed, 1);

        let after: Vec<(i64, String)> = store
            .nodes_in_file(&project, "a.py")
            .unwrap()
            .iter()
            .map(|n| (n.id, n.qualified_name.clone()))
            .collect();
        assert_eq!(before, after);
        assert!(store
            .find_nodes_by_name(&project, "gamma")
            .unwrap()
            .first()
            .is_some());
    }

    #[test]
    fn test_removed_file_expunged() {
        let (_cache, router) = test_router();
        let repo = tempfile::tempdir().unwrap();
        write(repo.path(), "keep.py", "def keep():\n    pass\n");
        write(repo.path(), "gone.py", "def gone():\n    pass\n");

        let stats = index_repository(&router, repo.path(), &CancelToken::new()).unwrap();
        let project = stats.project.clone();
        let store = router.existing_store(&project).unwrap();
        assert_eq!(store.find_nodes_by_name(&project, "gone").unwrap().len(), 1);

        fs::remove_file(repo.path().join("gone.py")).unwrap();
        index_repository(&router, repo.path(), &CancelToken::new()).unwrap();
        assert!(store.find_nodes_by_name(&project, "gone").unwrap().is_empty());
        assert!(store.nodes_in_file(&project, "gone.py").unwrap().is_empty());
        assert!(!store
            .list_files_for_project(&project)
            .unwrap()
            .contains_key("gone.py"));
    }

    #[test]
    fn test_route_handler_marked_entry_point() {
        let (_cache, router) = test_router();
        let repo = tempfile::tempdir().unwrap();
        write(
            repo.path(),
            "api.py",
            "@app.get(\"/api/orders/{order_id}\")\ndef get_order(order_id):\n    return None\n",
        );

        let stats = index_repository(&router, repo.path(), &CancelToken::new()).unwrap();
        let project = stats.project.clone();
        let store = router.existing_store(&project).unwrap();

        let handler = store
            .find_nodes_by_name(&project, "get_order")
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        assert!(handler.is_entry_point());

        let routes = store.nodes_by_label(&project, NodeLabel::Route, 10).unwrap();
        assert_eq!(routes.len(), 1);
        let handles = store
            .adjacent_edges(routes[0].id, Direction::Outbound, &[EdgeType::Handles])
            .unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].target_id, handler.id);
    }

    #[test]
    fn test_cross_project_http_edge() {
        let (_cache, router) = test_router();

        // orders service: exposes the route
        let orders_repo = tempfile::tempdir().unwrap();
        let orders_dir = orders_repo.path().join("orders");
        fs::create_dir_all(&orders_dir).unwrap();
        write(
            &orders_dir,
            "api.py",
            "@app.get(\"/api/orders/{order_id}\")\ndef get_order(order_id):\n    return None\n",
        );
        index_repository(&router, &orders_dir, &CancelToken::new()).unwrap();

        // web service: calls it
        let web_repo = tempfile::tempdir().unwrap();
        let web_dir = web_repo.path().join("web");
        fs::create_dir_all(&web_dir).unwrap();
        write(
            &web_dir,
            "client.py",
            "def fetch_order(order_id):\n    return requests.get(f\"http://orders/api/orders/{order_id}\")\n",
        );
        let stats = index_repository(&router, &web_dir, &CancelToken::new()).unwrap();

        let store = router.existing_store(&stats.project).unwrap();
        let edges = store.edges_by_types(&stats.project, &[EdgeType::HttpCalls]).unwrap();
        assert_eq!(edges.len(), 1);
        let edge = &edges[0];
        assert_eq!(
            edge.properties.get("confidence_band"),
            Some(&serde_json::json!("high"))
        );
        // Target is the mirrored remote route
        let target = store.get_node(edge.target_id).unwrap().unwrap();
        assert_eq!(target.label, NodeLabel::Route);
        assert_eq!(target.properties.get("service"), Some(&serde_json::json!("orders")));
    }
}
