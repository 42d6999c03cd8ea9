//! Pass 3 — cross-service inference and git change coupling.
//!
//! Matches outbound HTTP/async call sites against route tables by
//! path-template alignment (literal segments exact, parameter segments
//! wildcarded) and scores each match into a confidence band. Matches against
//! another project's routes mirror the remote endpoint into the caller's
//! store so every edge stays inside one project database. Also computes
//! FILE_CHANGES_WITH edges from git history on full re-index.

use git2::{Repository, Sort};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::extract::{CallSite, SiteKind};
use crate::types::*;

/// Commits examined for change coupling.
const COUPLING_COMMIT_LIMIT: usize = 200;
/// Commits touching more files than this are bulk moves, not signal.
const COUPLING_MAX_FILES: usize = 50;
/// Minimum co-change count for a FILE_CHANGES_WITH edge.
const COUPLING_MIN_CO_CHANGES: i64 = 3;
/// Minimum coupling score for a FILE_CHANGES_WITH edge.
const COUPLING_MIN_SCORE: f64 = 0.3;

// ---------------------------------------------------------------------------
// Route tables
// ---------------------------------------------------------------------------

/// A route in the caller's own project.
#[derive(Debug, Clone)]
pub struct LocalRoute {
    pub node_id: i64,
    pub method: String,
    pub url_path: String,
    /// Top-level directory = the service boundary inside one repository.
    pub service_dir: String,
}

/// A route in another indexed project under the same cache.
#[derive(Debug, Clone)]
pub struct RemoteRoute {
    pub project: String,
    /// Full route node as stored in the remote project (for mirroring).
    pub node: Node,
    pub method: String,
    pub url_path: String,
}

/// A function in another project reachable by async dispatch.
#[derive(Debug, Clone)]
pub struct RemoteTask {
    pub project: String,
    pub node: Node,
}

/// Where an inferred edge lands: an existing local node or a remote endpoint
/// that must be mirrored into the caller's store first.
#[derive(Debug)]
pub enum InferredTarget {
    Local(i64),
    Mirror(Node),
}

/// An edge awaiting target-id assignment by the pipeline.
#[derive(Debug)]
pub struct InferredEdge {
    pub source_id: i64,
    pub edge_type: EdgeType,
    pub target: InferredTarget,
    pub properties: Properties,
}

// ---------------------------------------------------------------------------
// Path-template matching
// ---------------------------------------------------------------------------

fn is_param_segment(seg: &str) -> bool {
    seg.contains('{')
        || seg.starts_with(':')
        || (seg.starts_with('<') && seg.ends_with('>'))
        || seg == "*"
}

/// Normalize for matching: lowercase, trailing slash stripped. The original
/// casing stays in the stored `url_path` property.
fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_lowercase()
    }
}

/// Align two path templates segment by segment. Returns the number of
/// wildcarded positions on a match, None when the templates cannot align.
pub fn match_templates(client: &str, route: &str) -> Option<u32> {
    let client = normalize(client);
    let route = normalize(route);
    let client_segs: Vec<&str> = client.split('/').filter(|s| !s.is_empty()).collect();
    let route_segs: Vec<&str> = route.split('/').filter(|s| !s.is_empty()).collect();
    if client_segs.len() != route_segs.len() {
        return None;
    }
    let mut wildcards = 0u32;
    for (c, r) in client_segs.iter().zip(route_segs.iter()) {
        match (is_param_segment(c), is_param_segment(r)) {
            // param-to-param is exact template alignment, not a wildcard
            (true, true) => {}
            (true, false) | (false, true) => wildcards += 1,
            (false, false) if c != r => return None,
            (false, false) => {}
        }
    }
    Some(wildcards)
}

/// Confidence from match quality: exact literal alignment 0.8, one wildcard
/// 0.6, anything looser 0.35.
fn confidence_for_wildcards(wildcards: u32) -> f64 {
    match wildcards {
        0 => 0.8,
        1 => 0.6,
        _ => 0.35,
    }
}

fn top_dir(path: &str) -> &str {
    path.split('/').next().unwrap_or("")
}

// ---------------------------------------------------------------------------
// Cross-service inference
// ---------------------------------------------------------------------------

/// Match one project's call sites against local and remote route tables.
/// `site_source_ids` maps each site's caller qname to its node id.
pub fn infer_cross_service(
    sites: &[CallSite],
    site_source_ids: &HashMap<String, i64>,
    caller_files: &HashMap<String, String>, // caller qname -> file path
    local_routes: &[LocalRoute],
    remote_routes: &[RemoteRoute],
    remote_tasks: &[RemoteTask],
) -> Vec<InferredEdge> {
    let mut out = Vec::new();

    for site in sites {
        let Some(&source_id) = site_source_ids.get(&site.caller_qname) else {
            continue;
        };
        match site.kind {
            SiteKind::Http => {
                let Some(template) = site.url_template.as_deref() else {
                    continue;
                };
                infer_http_site(site, source_id, template, caller_files, local_routes, remote_routes, &mut out);
            }
            SiteKind::Async => {
                let Some(target_name) = site.target_name.as_deref() else {
                    continue;
                };
                infer_async_site(site, source_id, target_name, remote_tasks, &mut out);
            }
        }
    }
    out
}

fn http_props(site: &CallSite, url_path: &str, confidence: f64) -> Properties {
    let mut props = Properties::new();
    props.insert("url_path".into(), serde_json::json!(url_path));
    if let Some(method) = &site.method {
        props.insert("method".into(), serde_json::json!(method));
    }
    set_confidence(&mut props, confidence);
    props
}

fn infer_http_site(
    site: &CallSite,
    source_id: i64,
    template: &str,
    caller_files: &HashMap<String, String>,
    local_routes: &[LocalRoute],
    remote_routes: &[RemoteRoute],
    out: &mut Vec<InferredEdge>,
) {
    let caller_dir = caller_files
        .get(&site.caller_qname)
        .map(|f| top_dir(f))
        .unwrap_or("");

    let method_matches = |route_method: &str| {
        site.method.is_none() || site.method.as_deref() == Some(route_method)
    };

    // Best local match outside the caller's own service directory.
    let mut best: Option<(u32, InferredTarget, String)> = None;
    for route in local_routes {
        if route.service_dir == caller_dir || !method_matches(&route.method) {
            continue;
        }
        if let Some(wildcards) = match_templates(template, &route.url_path) {
            if best.as_ref().is_none_or(|(w, _, _)| wildcards < *w) {
                best = Some((wildcards, InferredTarget::Local(route.node_id), route.url_path.clone()));
            }
        }
    }
    for route in remote_routes {
        if !method_matches(&route.method) {
            continue;
        }
        if let Some(wildcards) = match_templates(template, &route.url_path) {
            if best.as_ref().is_none_or(|(w, _, _)| wildcards < *w) {
                let mut mirror = route.node.clone();
                mirror.id = 0;
                mirror
                    .properties
                    .insert("service".into(), serde_json::json!(route.project.clone()));
                best = Some((wildcards, InferredTarget::Mirror(mirror), route.url_path.clone()));
            }
        }
    }

    if let Some((wildcards, target, url_path)) = best {
        let confidence = confidence_for_wildcards(wildcards);
        if confidence < CONFIDENCE_FLOOR {
            return;
        }
        out.push(InferredEdge {
            source_id,
            edge_type: EdgeType::HttpCalls,
            target,
            properties: http_props(site, &url_path, confidence),
        });
    }
}

fn infer_async_site(
    site: &CallSite,
    source_id: i64,
    target_name: &str,
    remote_tasks: &[RemoteTask],
    out: &mut Vec<InferredEdge>,
) {
    // Pure heuristic name match across projects.
    for task in remote_tasks {
        if task.node.name != target_name {
            continue;
        }
        let confidence = 0.35;
        let mut mirror = task.node.clone();
        mirror.id = 0;
        mirror
            .properties
            .insert("service".into(), serde_json::json!(task.project.clone()));
        let mut props = Properties::new();
        props.insert("task".into(), serde_json::json!(target_name));
        props.insert("call_line".into(), serde_json::json!(site.line));
        set_confidence(&mut props, confidence);
        out.push(InferredEdge {
            source_id,
            edge_type: EdgeType::AsyncCalls,
            target: InferredTarget::Mirror(mirror),
            properties: props,
        });
        return; // first name match wins
    }
}

// ---------------------------------------------------------------------------
// Change coupling
// ---------------------------------------------------------------------------

/// FILE_CHANGES_WITH edges from recent git history: files that repeatedly
/// change in the same commits. Recomputed in bulk on full re-index only.
pub fn change_coupling_edges(
    project: &str,
    repo_root: &Path,
    file_node_ids: &HashMap<String, i64>,
) -> Result<Vec<Edge>> {
    let repo = match Repository::open(repo_root) {
        Ok(repo) => repo,
        Err(_) => return Ok(Vec::new()), // not a git repo: no coupling signal
    };

    let mut revwalk = repo.revwalk()?;
    revwalk.set_sorting(Sort::TIME)?;
    if revwalk.push_head().is_err() {
        return Ok(Vec::new()); // empty repository
    }

    let mut file_commits: HashMap<String, i64> = HashMap::new();
    let mut pair_counts: HashMap<(String, String), i64> = HashMap::new();
    let mut walked = 0usize;

    for oid in revwalk {
        if walked >= COUPLING_COMMIT_LIMIT {
            break;
        }
        let oid = oid?;
        let commit = repo.find_commit(oid)?;
        if commit.parent_count() != 1 {
            continue; // skip merges and the root commit
        }
        walked += 1;

        let parent_tree = commit.parent(0)?.tree()?;
        let tree = commit.tree()?;
        let diff = repo.diff_tree_to_tree(Some(&parent_tree), Some(&tree), None)?;

        let mut changed: Vec<String> = Vec::new();
        for delta in diff.deltas() {
            if let Some(path) = delta.new_file().path().and_then(|p| p.to_str()) {
                let path = path.replace('\\', "/");
                if file_node_ids.contains_key(&path) && !changed.contains(&path) {
                    changed.push(path);
                }
            }
        }
        if changed.len() > COUPLING_MAX_FILES {
            continue;
        }

        changed.sort();
        for file in &changed {
            *file_commits.entry(file.clone()).or_default() += 1;
        }
        for i in 0..changed.len() {
            for j in (i + 1)..changed.len() {
                *pair_counts
                    .entry((changed[i].clone(), changed[j].clone()))
                    .or_default() += 1;
            }
        }
    }

    let mut edges = Vec::new();
    for ((a, b), co_changes) in pair_counts {
        if co_changes < COUPLING_MIN_CO_CHANGES {
            continue;
        }
        let commits_a = file_commits.get(&a).copied().unwrap_or(co_changes);
        let commits_b = file_commits.get(&b).copied().unwrap_or(co_changes);
        let score = co_changes as f64 / commits_a.min(commits_b).max(1) as f64;
        if score < COUPLING_MIN_SCORE {
            continue;
        }
        let (Some(&src), Some(&tgt)) = (file_node_ids.get(&a), file_node_ids.get(&b)) else {
            continue;
        };
        let mut edge = Edge::new(project, src, tgt, EdgeType::FileChangesWith);
        edge.properties
            .insert("coupling_score".into(), serde_json::json!((score * 100.0).round() / 100.0));
        edge.properties
            .insert("co_change_count".into(), serde_json::json!(co_changes));
        edges.push(edge);
    }

    debug!(
        project,
        commits = walked,
        edges = edges.len(),
        "change coupling computed"
    );
    Ok(edges)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_matching() {
        assert_eq!(match_templates("/api/orders", "/api/orders"), Some(0));
        assert_eq!(match_templates("/api/orders/", "/api/orders"), Some(0));
        assert_eq!(match_templates("/API/Orders", "/api/orders"), Some(0));
        assert_eq!(match_templates("/api/orders/{param}", "/api/orders/{id}"), Some(0));
        assert_eq!(match_templates("/api/orders/123", "/api/orders/{id}"), Some(1));
        assert_eq!(match_templates("/api/orders/:id", "/api/orders/{id}"), Some(1));
        assert_eq!(match_templates("/api/orders", "/api/users"), None);
        assert_eq!(match_templates("/api/orders/1/items", "/api/orders/{id}"), None);
    }

    #[test]
    fn test_confidence_tiers() {
        assert_eq!(confidence_for_wildcards(0), 0.8);
        assert_eq!(confidence_for_wildcards(1), 0.6);
        assert_eq!(confidence_for_wildcards(2), 0.35);
    }

    fn http_site(caller: &str, method: &str, template: &str) -> CallSite {
        CallSite {
            caller_qname: caller.to_string(),
            kind: SiteKind::Http,
            method: Some(method.to_string()),
            url_template: Some(template.to_string()),
            target_name: None,
            line: 5,
        }
    }

    #[test]
    fn test_remote_route_mirrored_with_high_band() {
        let sites = vec![http_site("web.client.fetch_order", "GET", "/api/orders/{param}")];
        let mut source_ids = HashMap::new();
        source_ids.insert("web.client.fetch_order".to_string(), 7i64);
        let mut caller_files = HashMap::new();
        caller_files.insert("web.client.fetch_order".to_string(), "client.py".to_string());

        let remote_node = Node::new(
            "orders",
            NodeLabel::Route,
            "GET /api/orders/{id}",
            "orders.api.route.get_api_orders_id",
            "api.py",
        );
        let remote = vec![RemoteRoute {
            project: "orders".into(),
            node: remote_node,
            method: "GET".into(),
            url_path: "/api/orders/{id}".into(),
        }];

        let edges = infer_cross_service(&sites, &source_ids, &caller_files, &[], &remote, &[]);
        assert_eq!(edges.len(), 1);
        let edge = &edges[0];
        assert_eq!(edge.edge_type, EdgeType::HttpCalls);
        assert!(matches!(edge.target, InferredTarget::Mirror(_)));
        // template-to-template alignment is exact → 0.8, high band
        assert_eq!(edge.properties.get("confidence"), Some(&serde_json::json!(0.8)));
        assert_eq!(
            edge.properties.get("confidence_band"),
            Some(&serde_json::json!("high"))
        );
        if let InferredTarget::Mirror(node) = &edge.target {
            assert_eq!(node.properties.get("service"), Some(&serde_json::json!("orders")));
        }
    }

    #[test]
    fn test_local_route_same_service_skipped() {
        let sites = vec![http_site("p.web.client.call", "GET", "/health")];
        let mut source_ids = HashMap::new();
        source_ids.insert("p.web.client.call".to_string(), 1i64);
        let mut caller_files = HashMap::new();
        caller_files.insert("p.web.client.call".to_string(), "web/client.go".to_string());

        let local = vec![
            LocalRoute {
                node_id: 2,
                method: "GET".into(),
                url_path: "/health".into(),
                service_dir: "web".into(), // same service: must not match
            },
            LocalRoute {
                node_id: 3,
                method: "GET".into(),
                url_path: "/health".into(),
                service_dir: "orders".into(),
            },
        ];
        let edges = infer_cross_service(&sites, &source_ids, &caller_files, &local, &[], &[]);
        assert_eq!(edges.len(), 1);
        assert!(matches!(edges[0].target, InferredTarget::Local(3)));
        assert_eq!(edges[0].properties.get("confidence"), Some(&serde_json::json!(0.8)));
        assert_eq!(
            edges[0].properties.get("confidence_band"),
            Some(&serde_json::json!("high"))
        );
    }

    #[test]
    fn test_async_name_match_speculative() {
        let sites = vec![CallSite {
            caller_qname: "web.tasks.enqueue".into(),
            kind: SiteKind::Async,
            method: None,
            url_template: None,
            target_name: Some("process_order".into()),
            line: 3,
        }];
        let mut source_ids = HashMap::new();
        source_ids.insert("web.tasks.enqueue".to_string(), 9i64);

        let task_node = Node::new(
            "worker",
            NodeLabel::Function,
            "process_order",
            "worker.jobs.process_order",
            "jobs.py",
        );
        let tasks = vec![RemoteTask { project: "worker".into(), node: task_node }];

        let edges =
            infer_cross_service(&sites, &source_ids, &HashMap::new(), &[], &[], &tasks);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].edge_type, EdgeType::AsyncCalls);
        assert_eq!(
            edges[0].properties.get("confidence_band"),
            Some(&serde_json::json!("speculative"))
        );
    }
}
