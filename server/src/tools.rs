//! The JSON tool surface.
//!
//! Every tool takes a JSON argument object and returns a JSON result;
//! user-visible failures come back as `{"error": "..."}`. The transport that
//! carries these calls lives elsewhere; this module is the complete dispatch
//! layer, which also makes it the natural seam for integration tests.

use globset::Glob;
use rayon::prelude::*;
use regex::RegexBuilder;
use serde_json::{json, Value};
use std::path::PathBuf;
// Tool handlers speak String errors, not the engine's Result alias.
use std::result::Result;

use crate::cypher;
use crate::diff::{self, DiffScope};
use crate::scan::{discover, ScanConfig};
use crate::search::{self, SearchParams, SortBy};
use crate::session::Session;
use crate::store::Store;
use crate::traverse::{self, hop_to_risk, impact_summary};
use crate::types::*;

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Tool names, as exposed to the transport.
pub const TOOL_NAMES: &[&str] = &[
    "index_repository",
    "index_status",
    "list_projects",
    "delete_project",
    "search_graph",
    "search_code",
    "trace_call_path",
    "detect_changes",
    "query_graph",
    "get_graph_schema",
    "get_code_snippet",
    "read_file",
    "list_directory",
];

/// Dispatch one tool call. Always returns a JSON object; failures use the
/// `{"error": ...}` shape (plus `suggestions` for near-miss traces).
pub fn dispatch_tool(session: &Session, name: &str, args: &Value) -> Value {
    let result = match name {
        "index_repository" => tool_index_repository(session, args),
        "index_status" => tool_index_status(session, args),
        "list_projects" => tool_list_projects(session),
        "delete_project" => tool_delete_project(session, args),
        "search_graph" => tool_search_graph(session, args),
        "search_code" => tool_search_code(session, args),
        "trace_call_path" => tool_trace_call_path(session, args),
        "detect_changes" => tool_detect_changes(session, args),
        "query_graph" => tool_query_graph(session, args),
        "get_graph_schema" => tool_get_graph_schema(session, args),
        "get_code_snippet" => tool_get_code_snippet(session, args),
        "read_file" => tool_read_file(session, args),
        "list_directory" => tool_list_directory(session, args),
        other => Err(format!("unknown tool: {other}")),
    };
    match result {
        Ok(mut value) => {
            // Callers can see a pass in flight and decide to re-query.
            if session.is_indexing() {
                if let Some(map) = value.as_object_mut() {
                    map.insert("index_status".into(), json!("indexing"));
                }
            }
            value
        }
        Err(message) => json!({ "error": message }),
    }
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn arg_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(|v| v.as_u64())
}

fn arg_bool(args: &Value, key: &str) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn required_str(args: &Value, key: &str) -> Result<String, String> {
    arg_str(args, key)
        .map(|s| s.to_string())
        .ok_or_else(|| format!("missing required field: {key}"))
}

fn resolve_project(session: &Session, args: &Value) -> Result<String, String> {
    session
        .resolve_project(arg_str(args, "project"))
        .map_err(|e| e.to_string())
}

fn project_store(session: &Session, project: &str) -> Result<std::sync::Arc<Store>, String> {
    session.router().existing_store(project).map_err(|e| e.to_string())
}

fn node_json(node: &Node) -> Value {
    json!({
        "name": node.name,
        "qualified_name": node.qualified_name,
        "label": node.label.as_str(),
        "file_path": node.file_path,
        "start_line": node.start_line,
        "end_line": node.end_line,
        "properties": node.properties,
    })
}

// ---------------------------------------------------------------------------
// Project lifecycle tools
// ---------------------------------------------------------------------------

fn tool_index_repository(session: &Session, args: &Value) -> Result<Value, String> {
    let root = match arg_str(args, "repo_path") {
        Some(path) => PathBuf::from(path),
        None => {
            session
                .session_project()
                .map(|(_, root)| root)
                .ok_or("no session project; pass repo_path")?
        }
    };
    let stats = session.index(&root, &CancelToken::new()).map_err(|e| e.to_string())?;
    Ok(json!({
        "project": stats.project,
        "nodes": stats.nodes,
        "edges": stats.edges,
        "indexed_at": stats.indexed_at,
    }))
}

fn tool_index_status(session: &Session, args: &Value) -> Result<Value, String> {
    let explicit = arg_str(args, "project");
    let project = match session.resolve_project(explicit) {
        Ok(project) => project,
        Err(_) => {
            return Ok(json!({
                "status": "no_session",
                "nodes": 0,
                "edges": 0,
                "indexed_at": 0,
                "index_type": "none",
                "is_session_project": false,
            }))
        }
    };

    let is_session_project = session
        .session_project()
        .map(|(name, _)| name == project)
        .unwrap_or(false);

    if !session.router().db_path(&project).exists() {
        return Ok(json!({
            "status": "not_indexed",
            "nodes": 0,
            "edges": 0,
            "indexed_at": 0,
            "index_type": "none",
            "is_session_project": is_session_project,
        }));
    }

    let store = project_store(session, &project)?;
    let row = store.get_project(&project).map_err(|e| e.to_string())?;
    let nodes = store.count_nodes(&project).map_err(|e| e.to_string())?;
    let edges = store.count_edges(&project).map_err(|e| e.to_string())?;

    let status = if session.is_indexing() {
        "indexing"
    } else {
        match &row {
            Some(row) if row.indexed_at > 0 => "ready",
            Some(_) => "partial",
            None => "not_indexed",
        }
    };
    let index_type = session
        .last_index()
        .filter(|stats| stats.project == project)
        .map(|stats| stats.index_type)
        .unwrap_or("none");

    Ok(json!({
        "status": status,
        "nodes": nodes,
        "edges": edges,
        "indexed_at": row.map(|r| r.indexed_at).unwrap_or(0),
        "index_type": index_type,
        "is_session_project": is_session_project,
    }))
}

fn tool_list_projects(session: &Session) -> Result<Value, String> {
    let session_name = session.session_project().map(|(name, _)| name);
    let projects = session.router().list_projects().map_err(|e| e.to_string())?;
    let list: Vec<Value> = projects
        .iter()
        .map(|info| {
            json!({
                "name": info.project.name,
                "root_path": info.project.root_path,
                "indexed_at": info.project.indexed_at,
                "nodes": info.nodes,
                "edges": info.edges,
                "db_path": info.db_path,
                "is_session_project": Some(&info.project.name) == session_name.as_ref(),
            })
        })
        .collect();
    Ok(json!(list))
}

fn tool_delete_project(session: &Session, args: &Value) -> Result<Value, String> {
    let name = required_str(args, "project_name")?;
    let deleted = session.router().delete_project(&name).map_err(|e| e.to_string())?;
    Ok(json!({
        "deleted": deleted,
        "status": if deleted { "deleted" } else { "not_found" },
    }))
}

// ---------------------------------------------------------------------------
// search_graph
// ---------------------------------------------------------------------------

fn tool_search_graph(session: &Session, args: &Value) -> Result<Value, String> {
    let project = resolve_project(session, args)?;
    let store = project_store(session, &project)?;

    let mut params = SearchParams::new(&project);
    if let Some(label) = arg_str(args, "label") {
        params.label =
            Some(NodeLabel::parse(label).ok_or_else(|| format!("unknown label: {label}"))?);
    }
    params.name_pattern = arg_str(args, "name_pattern").map(String::from);
    params.qn_pattern = arg_str(args, "qn_pattern").map(String::from);
    params.file_pattern = arg_str(args, "file_pattern").map(String::from);
    if let Some(excluded) = args.get("exclude_labels").and_then(|v| v.as_array()) {
        for entry in excluded {
            let label = entry.as_str().ok_or("exclude_labels must be strings")?;
            params.exclude_labels.push(
                NodeLabel::parse(label).ok_or_else(|| format!("unknown label: {label}"))?,
            );
        }
    }
    if let Some(rel) = arg_str(args, "relationship") {
        params.relationship =
            Some(EdgeType::parse(rel).ok_or_else(|| format!("unknown relationship: {rel}"))?);
    }
    if let Some(direction) = arg_str(args, "direction") {
        params.direction = Direction::parse(direction)
            .ok_or_else(|| format!("unknown direction: {direction}"))?;
    }
    params.min_degree = arg_u64(args, "min_degree").map(|n| n as u32);
    params.max_degree = arg_u64(args, "max_degree").map(|n| n as u32);
    params.exclude_entry_points = arg_bool(args, "exclude_entry_points");
    params.include_connected = arg_bool(args, "include_connected");
    params.limit = arg_u64(args, "limit").map(|n| n as usize).unwrap_or(20);
    params.offset = arg_u64(args, "offset").map(|n| n as usize).unwrap_or(0);
    if let Some(sort) = arg_str(args, "sort_by") {
        params.sort_by =
            SortBy::parse(sort).ok_or_else(|| format!("unknown sort_by: {sort}"))?;
    }

    let response = search::search(&store, &params).map_err(|e| e.to_string())?;
    let results: Vec<Value> = response
        .results
        .iter()
        .map(|hit| {
            let mut value = node_json(&hit.node);
            let map = value.as_object_mut().unwrap();
            map.insert("in_degree".into(), json!(hit.in_degree));
            map.insert("out_degree".into(), json!(hit.out_degree));
            if !hit.connections.is_empty() {
                map.insert("connections".into(), json!(hit.connections));
            }
            value
        })
        .collect();
    Ok(json!({
        "total": response.total,
        "limit": response.limit,
        "offset": response.offset,
        "has_more": response.has_more,
        "results": results,
    }))
}

// ---------------------------------------------------------------------------
// search_code
// ---------------------------------------------------------------------------

fn tool_search_code(session: &Session, args: &Value) -> Result<Value, String> {
    let pattern = required_str(args, "pattern")?;
    let project = resolve_project(session, args)?;
    let root = session.root_for_project(&project).map_err(|e| e.to_string())?;

    let use_regex = arg_bool(args, "regex");
    let limit = arg_u64(args, "max_results").map(|n| n as usize).unwrap_or(50);
    let offset = arg_u64(args, "offset").map(|n| n as usize).unwrap_or(0);

    let matcher = if use_regex {
        Some(
            RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| format!("bad pattern: {e}"))?,
        )
    } else {
        None
    };
    let needle = pattern.to_lowercase();

    let file_glob = arg_str(args, "file_pattern")
        .map(|g| Glob::new(g).map(|g| g.compile_matcher()))
        .transpose()
        .map_err(|e| format!("bad file_pattern: {e}"))?;

    let config = ScanConfig::load(&root);
    let files = discover(&config, &CancelToken::new()).map_err(|e| e.to_string())?;

    let mut matches: Vec<(String, usize, String)> = files
        .par_iter()
        .filter(|f| file_glob.as_ref().is_none_or(|g| g.is_match(&f.rel_path)))
        .filter_map(|f| {
            let meta = std::fs::metadata(&f.abs_path).ok()?;
            if meta.len() as usize > MAX_FILE_READ {
                return None;
            }
            let content = std::fs::read_to_string(&f.abs_path).ok()?;
            let mut file_matches = Vec::new();
            for (idx, line) in content.lines().enumerate() {
                let hit = match &matcher {
                    Some(re) => re.is_match(line),
                    None => line.to_lowercase().contains(&needle),
                };
                if hit {
                    file_matches.push((f.rel_path.clone(), idx + 1, truncate_line(line)));
                }
            }
            if file_matches.is_empty() {
                None
            } else {
                Some(file_matches)
            }
        })
        .flatten()
        .collect();
    matches.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let total = matches.len();
    let files_count = {
        let mut files: Vec<&str> = matches.iter().map(|(f, _, _)| f.as_str()).collect();
        files.dedup();
        files.len()
    };
    let page: Vec<Value> = matches
        .iter()
        .skip(offset)
        .take(limit)
        .map(|(file, line, content)| json!({ "file": file, "line": line, "content": content }))
        .collect();

    Ok(json!({
        "pattern": pattern,
        "total": total,
        "limit": limit,
        "offset": offset,
        "has_more": offset + limit < total,
        "matches": page,
        "files_count": files_count,
    }))
}

/// Long lines are silently truncated at 500 characters.
fn truncate_line(line: &str) -> String {
    if line.len() <= MAX_LINE_LEN {
        line.to_string()
    } else {
        let mut end = MAX_LINE_LEN;
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        line[..end].to_string()
    }
}

// ---------------------------------------------------------------------------
// trace_call_path
// ---------------------------------------------------------------------------

fn tool_trace_call_path(session: &Session, args: &Value) -> Result<Value, String> {
    let function_name = required_str(args, "function_name")?;
    let project = resolve_project(session, args)?;
    let store = project_store(session, &project)?;

    let direction = match arg_str(args, "direction").unwrap_or("inbound") {
        "inbound" => Direction::Inbound,
        "outbound" => Direction::Outbound,
        "both" => Direction::Any,
        other => return Err(format!("unknown direction: {other}")),
    };
    let depth = arg_u64(args, "depth").unwrap_or(3).clamp(1, 5) as u32;
    let risk_labels = arg_bool(args, "risk_labels");

    let candidates: Vec<Node> = store
        .find_nodes_by_name(&project, &function_name)
        .map_err(|e| e.to_string())?
        .into_iter()
        .filter(|n| matches!(n.label, NodeLabel::Function | NodeLabel::Method))
        .collect();

    let Some(root) = candidates.into_iter().next() else {
        // Exact-name miss: suggest near matches so the caller can retry.
        let like = format!("%{function_name}%");
        let suggestions = store
            .query_nodes_where(
                "project = ? AND label IN ('Function', 'Method') AND name LIKE ?",
                &[Box::new(project.clone()), Box::new(like)],
                5,
            )
            .map_err(|e| e.to_string())?;
        let suggestions: Vec<Value> = suggestions
            .iter()
            .map(|n| {
                json!({
                    "name": n.name,
                    "qualified_name": n.qualified_name,
                    "label": n.label.as_str(),
                })
            })
            .collect();
        return Ok(json!({
            "error": format!("function not found: {function_name}"),
            "suggestions": suggestions,
        }));
    };

    let walk = traverse::bfs(
        &store,
        root.id,
        direction,
        EdgeType::call_like(),
        depth,
        200,
        &CancelToken::new(),
    )
    .map_err(|e| e.to_string())?;

    // Group visited nodes by hop.
    let max_hop = walk.visited.iter().map(|v| v.hop).max().unwrap_or(0);
    let mut hops = Vec::new();
    for hop in 1..=max_hop {
        let nodes: Vec<Value> = walk
            .visited
            .iter()
            .filter(|v| v.hop == hop)
            .map(|v| {
                let mut value = node_json(&v.node);
                if risk_labels {
                    value
                        .as_object_mut()
                        .unwrap()
                        .insert("risk".into(), json!(hop_to_risk(hop).as_str()));
                }
                value
            })
            .collect();
        if !nodes.is_empty() {
            hops.push(json!({ "hop": hop, "nodes": nodes }));
        }
    }

    let module = root
        .qualified_name
        .rsplit_once('.')
        .map(|(module, _)| module.to_string())
        .unwrap_or_default();
    let indexed_at = store
        .get_project(&project)
        .map_err(|e| e.to_string())?
        .map(|r| r.indexed_at)
        .unwrap_or(0);

    let mut result = json!({
        "root": node_json(&root),
        "module": module,
        "hops": hops,
        "edges": walk.edges,
        "indexed_at": indexed_at,
        "total_results": walk.visited.len(),
    });
    if risk_labels {
        let summary = impact_summary(&walk.visited, &walk.edges);
        result
            .as_object_mut()
            .unwrap()
            .insert("impact_summary".into(), serde_json::to_value(&summary).unwrap());
    }
    if walk.truncated {
        result.as_object_mut().unwrap().insert("truncated".into(), json!(true));
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// detect_changes
// ---------------------------------------------------------------------------

fn tool_detect_changes(session: &Session, args: &Value) -> Result<Value, String> {
    let project = resolve_project(session, args)?;
    let store = project_store(session, &project)?;
    let root = session.root_for_project(&project).map_err(|e| e.to_string())?;

    let scope = match arg_str(args, "scope") {
        Some(scope) => DiffScope::parse(scope).ok_or_else(|| format!("unknown scope: {scope}"))?,
        None => DiffScope::All,
    };
    let base_branch = arg_str(args, "base_branch").unwrap_or("main");
    let depth = arg_u64(args, "depth").unwrap_or(2).clamp(1, 5) as u32;

    let report = diff::detect_changes(
        &store,
        &project,
        &root,
        scope,
        base_branch,
        depth,
        &CancelToken::new(),
    )
    .map_err(|e| e.to_string())?;

    let changed_symbols: Vec<Value> = report.changed_symbols.iter().map(node_json).collect();
    let impacted: Vec<Value> = report
        .impacted
        .iter()
        .map(|symbol| {
            json!({
                "name": symbol.node.name,
                "qualified_name": symbol.node.qualified_name,
                "file_path": symbol.node.file_path,
                "hop": symbol.hop,
                "risk": symbol.risk.as_str(),
                "changed_by": symbol.changed_by,
            })
        })
        .collect();

    Ok(json!({
        "changed_files": report.changed_files,
        "changed_symbols": changed_symbols,
        "impacted_symbols": impacted,
        "summary": serde_json::to_value(&report.summary).unwrap(),
    }))
}

// ---------------------------------------------------------------------------
// query_graph / get_graph_schema
// ---------------------------------------------------------------------------

fn tool_query_graph(session: &Session, args: &Value) -> Result<Value, String> {
    let query = required_str(args, "query")?;
    let project = resolve_project(session, args)?;
    let store = project_store(session, &project)?;

    let result = cypher::execute_query(&store, &project, &query, &CancelToken::new())
        .map_err(|e| e.to_string())?;
    Ok(json!({
        "columns": result.columns,
        "rows": result.rows,
        "total": result.total,
    }))
}

fn tool_get_graph_schema(session: &Session, args: &Value) -> Result<Value, String> {
    let project = resolve_project(session, args)?;
    let store = project_store(session, &project)?;
    let schema = store.get_schema(&project).map_err(|e| e.to_string())?;

    let node_labels: Vec<Value> = schema
        .label_counts
        .iter()
        .map(|(label, count)| json!({ "label": label, "count": count }))
        .collect();
    let relationship_types: Vec<Value> = schema
        .edge_counts
        .iter()
        .map(|(edge_type, count)| json!({ "type": edge_type, "count": count }))
        .collect();
    let relationship_patterns: Vec<Value> = schema
        .patterns
        .iter()
        .map(|(source, edge_type, target, count)| {
            json!({ "source": source, "type": edge_type, "target": target, "count": count })
        })
        .collect();

    Ok(json!({
        "projects": [{
            "project": project,
            "schema": {
                "node_labels": node_labels,
                "relationship_types": relationship_types,
                "relationship_patterns": relationship_patterns,
                "sample_function_names": schema.sample_function_names,
                "sample_class_names": schema.sample_class_names,
                "sample_qualified_names": schema.sample_qualified_names,
            },
        }],
    }))
}

// ---------------------------------------------------------------------------
// File access tools
// ---------------------------------------------------------------------------

fn tool_get_code_snippet(session: &Session, args: &Value) -> Result<Value, String> {
    let qname = required_str(args, "qualified_name")?;
    let project = resolve_project(session, args)?;
    let store = project_store(session, &project)?;

    let node = store
        .get_node_by_qualified_name(&project, &qname)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| {
            format!("symbol not found: {qname} (use search_graph to find the exact name)")
        })?;

    let root = session.root_for_project(&project).map_err(|e| e.to_string())?;
    let path = validate_path(&root, &node.file_path).map_err(|e| e.to_string())?;
    let content = read_capped(&path)?;

    let source = if node.start_line > 0 && node.end_line >= node.start_line {
        content
            .lines()
            .skip(node.start_line as usize - 1)
            .take((node.end_line - node.start_line + 1) as usize)
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        content
    };

    Ok(json!({
        "qualified_name": node.qualified_name,
        "name": node.name,
        "label": node.label.as_str(),
        "file_path": node.file_path,
        "start_line": node.start_line,
        "end_line": node.end_line,
        "source": source,
    }))
}

fn tool_read_file(session: &Session, args: &Value) -> Result<Value, String> {
    let rel_path = required_str(args, "path")?;
    let project = resolve_project(session, args)?;
    let root = session.root_for_project(&project).map_err(|e| e.to_string())?;
    let path = validate_path(&root, &rel_path).map_err(|e| e.to_string())?;
    let content = read_capped(&path)?;

    let lines: Vec<&str> = content.lines().collect();
    let total_lines = lines.len();

    let start = arg_u64(args, "start_line").map(|n| n as usize);
    let end = arg_u64(args, "end_line").map(|n| n as usize);
    let (slice, range) = match (start, end) {
        (None, None) => (lines.as_slice(), None),
        (start, end) => {
            let from = start.unwrap_or(1).max(1);
            let to = end.unwrap_or(total_lines).min(total_lines);
            if from > to {
                return Err(format!("invalid range: {from}..{to}"));
            }
            (&lines[from - 1..to], Some(json!({ "start": from, "end": to })))
        }
    };

    let content: String = slice
        .iter()
        .map(|line| truncate_line(line))
        .collect::<Vec<_>>()
        .join("\n");

    let mut result = json!({
        "path": rel_path,
        "total_lines": total_lines,
        "content": content,
    });
    if let Some(range) = range {
        result.as_object_mut().unwrap().insert("range".into(), range);
    }
    Ok(result)
}

fn read_capped(path: &std::path::Path) -> Result<String, String> {
    let meta = std::fs::metadata(path).map_err(|e| format!("cannot stat file: {e}"))?;
    if meta.len() as usize > MAX_FILE_READ {
        return Err(format!(
            "file too large: {} bytes (limit {})",
            meta.len(),
            MAX_FILE_READ
        ));
    }
    std::fs::read_to_string(path).map_err(|e| format!("cannot read file: {e}"))
}

fn tool_list_directory(session: &Session, args: &Value) -> Result<Value, String> {
    let project = resolve_project(session, args)?;
    let root = session.root_for_project(&project).map_err(|e| e.to_string())?;
    let rel = arg_str(args, "path").unwrap_or(".");
    let dir = if rel == "." || rel.is_empty() {
        root.clone()
    } else {
        validate_path(&root, rel).map_err(|e| e.to_string())?
    };

    let name_glob = arg_str(args, "pattern")
        .map(|g| Glob::new(g).map(|g| g.compile_matcher()))
        .transpose()
        .map_err(|e| format!("bad pattern: {e}"))?;

    let mut entries = Vec::new();
    let read_dir = std::fs::read_dir(&dir).map_err(|e| format!("cannot read directory: {e}"))?;
    for entry in read_dir.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(glob) = &name_glob {
            if !glob.is_match(&name) {
                continue;
            }
        }
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let rel_path = entry
            .path()
            .strip_prefix(&root)
            .unwrap_or(&entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let mut item = json!({ "name": name, "path": rel_path, "is_dir": is_dir });
        if !is_dir {
            if let Ok(meta) = entry.metadata() {
                item.as_object_mut().unwrap().insert("size".into(), json!(meta.len()));
            }
        }
        entries.push(item);
    }
    entries.sort_by(|a, b| {
        a["name"].as_str().unwrap_or("").cmp(b["name"].as_str().unwrap_or(""))
    });

    Ok(json!({
        "directory": rel,
        "count": entries.len(),
        "entries": entries,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
