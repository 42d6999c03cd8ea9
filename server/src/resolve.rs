//! Pass 2 — intra-service resolution.
//!
//! Turns pass 1's unresolved records into edges against the persisted node
//! ids: CALLS/USAGE from call records, IMPORTS between modules, HANDLES from
//! routes to their handlers, IMPLEMENTS/OVERRIDE from heritage links.
//! Resolution priority is scope-ordered: same file, then same directory,
//! then imported files, then anywhere in the project.

use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::extract::{DefineRecord, FileExtraction, ImplementsRecord, UnresolvedCall};
use crate::types::*;

// ---------------------------------------------------------------------------
// Symbol table
// ---------------------------------------------------------------------------

/// Slim view of a persisted node for name-based resolution.
#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub id: i64,
    pub name: String,
    pub qname: String,
    pub file_path: String,
    pub label: NodeLabel,
}

/// Name → candidate index over a project's persisted nodes.
pub struct SymbolTable {
    by_name: HashMap<String, Vec<SymbolEntry>>,
    qname_to_id: HashMap<String, i64>,
}

impl SymbolTable {
    pub fn from_nodes<'a>(nodes: impl Iterator<Item = &'a Node>) -> Self {
        let mut by_name: HashMap<String, Vec<SymbolEntry>> = HashMap::new();
        let mut qname_to_id = HashMap::new();
        for node in nodes {
            qname_to_id.insert(node.qualified_name.clone(), node.id);
            by_name.entry(node.name.clone()).or_default().push(SymbolEntry {
                id: node.id,
                name: node.name.clone(),
                qname: node.qualified_name.clone(),
                file_path: node.file_path.clone(),
                label: node.label,
            });
        }
        SymbolTable { by_name, qname_to_id }
    }

    pub fn id_of(&self, qname: &str) -> Option<i64> {
        self.qname_to_id.get(qname).copied()
    }

    pub fn candidates(&self, name: &str) -> &[SymbolEntry] {
        self.by_name.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The entry at `container.member`, if present.
    pub fn member(&self, container_qname: &str, member_name: &str) -> Option<&SymbolEntry> {
        let qname = format!("{container_qname}.{member_name}");
        let id = self.qname_to_id.get(&qname)?;
        self.by_name
            .get(member_name)?
            .iter()
            .find(|e| e.id == *id)
    }
}

fn dir_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(d, _)| d).unwrap_or("")
}

// ---------------------------------------------------------------------------
// Import resolution
// ---------------------------------------------------------------------------

/// Resolve each file's raw import strings to project files by filename stem,
/// the way include/import directives actually land in polyglot repos.
/// Returns `file → imported files` and the IMPORTS edges between modules.
pub fn resolve_imports(
    project: &str,
    extractions: &[FileExtraction],
    all_files: &[String],
    module_ids: &HashMap<String, i64>, // file rel_path -> module node id
) -> (HashMap<String, Vec<String>>, Vec<Edge>) {
    // filename stem -> rel paths
    let mut stem_to_paths: HashMap<&str, Vec<&str>> = HashMap::new();
    for path in all_files {
        let filename = path.rsplit('/').next().unwrap_or(path);
        let stem = filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(filename);
        stem_to_paths.entry(stem).or_default().push(path);
    }

    let resolve_one = |import_str: &str, from: &str| -> Option<String> {
        let last = import_str
            .trim_end_matches('/')
            .rsplit(['.', '/', ':'])
            .find(|seg| !seg.is_empty())?;
        let candidates = stem_to_paths.get(last)?;
        if candidates.len() == 1 {
            return Some(candidates[0].to_string());
        }
        // Prefer the candidate sharing the longest directory prefix.
        let from_dir = dir_of(from);
        candidates
            .iter()
            .max_by_key(|c| {
                dir_of(c)
                    .chars()
                    .zip(from_dir.chars())
                    .take_while(|(a, b)| a == b)
                    .count()
            })
            .map(|c| c.to_string())
    };

    let mut imported: HashMap<String, Vec<String>> = HashMap::new();
    let mut edges = Vec::new();
    for ex in extractions {
        let mut resolved: Vec<String> = ex
            .imports
            .iter()
            .filter_map(|imp| resolve_one(imp, &ex.rel_path))
            .filter(|target| target != &ex.rel_path)
            .collect();
        resolved.sort();
        resolved.dedup();

        if let Some(&src_id) = module_ids.get(&ex.rel_path) {
            for target in &resolved {
                if let Some(&tgt_id) = module_ids.get(target) {
                    edges.push(Edge::new(project, src_id, tgt_id, EdgeType::Imports));
                }
            }
        }
        imported.insert(ex.rel_path.clone(), resolved);
    }
    (imported, edges)
}

// ---------------------------------------------------------------------------
// Call resolution
// ---------------------------------------------------------------------------

const CALLABLE: &[NodeLabel] = &[NodeLabel::Function, NodeLabel::Method];

/// Resolve unresolved call records into CALLS/USAGE edges. Scope order: same
/// file, same directory, imported files, whole project. A unique survivor
/// yields one clean edge; ambiguity yields one edge per candidate with
/// confidence 1/n; no survivor drops the record.
pub fn resolve_calls(
    project: &str,
    calls: &[UnresolvedCall],
    symbols: &SymbolTable,
    imported_files: &HashMap<String, Vec<String>>,
) -> Vec<Edge> {
    let mut edges = Vec::new();
    let mut seen: HashSet<(i64, i64, bool)> = HashSet::new();

    for call in calls {
        let Some(caller_id) = symbols.id_of(&call.caller_qname) else {
            warn!(caller = call.caller_qname.as_str(), "call record references unknown caller");
            continue;
        };

        let all: Vec<&SymbolEntry> = symbols
            .candidates(&call.callee_name)
            .iter()
            .filter(|e| call.is_usage || CALLABLE.contains(&e.label))
            .filter(|e| e.qname != call.caller_qname)
            .collect();
        if all.is_empty() {
            continue;
        }

        let caller_dir = dir_of(&call.file_path);
        let imports = imported_files
            .get(&call.file_path)
            .map(|v| v.as_slice())
            .unwrap_or(&[]);

        let same_file: Vec<&&SymbolEntry> =
            all.iter().filter(|e| e.file_path == call.file_path).collect();
        let pool: Vec<&SymbolEntry> = if !same_file.is_empty() {
            same_file.into_iter().copied().collect()
        } else {
            let same_dir: Vec<&&SymbolEntry> =
                all.iter().filter(|e| dir_of(&e.file_path) == caller_dir).collect();
            if !same_dir.is_empty() {
                same_dir.into_iter().copied().collect()
            } else {
                let imported: Vec<&&SymbolEntry> = all
                    .iter()
                    .filter(|e| imports.iter().any(|i| i == &e.file_path))
                    .collect();
                if !imported.is_empty() {
                    imported.into_iter().copied().collect()
                } else {
                    all
                }
            }
        };

        let ambiguity = pool.len();
        for entry in pool {
            if !seen.insert((caller_id, entry.id, call.is_usage)) {
                continue;
            }
            let edge_type = if call.is_usage { EdgeType::Usage } else { EdgeType::Calls };
            let mut edge = Edge::new(project, caller_id, entry.id, edge_type)
                .with_prop("call_line", serde_json::json!(call.call_line));
            if ambiguity > 1 {
                edge.properties.insert(
                    "confidence".into(),
                    serde_json::json!(1.0 / ambiguity as f64),
                );
            }
            edges.push(edge);
        }
    }
    edges
}

// ---------------------------------------------------------------------------
// Containment edges
// ---------------------------------------------------------------------------

/// DEFINES (module → symbol) and DEFINES_METHOD (class → method) edges.
pub fn containment_edges(
    project: &str,
    defines: &[DefineRecord],
    symbols: &SymbolTable,
) -> Vec<Edge> {
    let mut edges = Vec::new();
    for define in defines {
        let (Some(src), Some(tgt)) = (
            symbols.id_of(&define.container_qname),
            symbols.id_of(&define.member_qname),
        ) else {
            continue;
        };
        let edge_type = if define.is_method { EdgeType::DefinesMethod } else { EdgeType::Defines };
        edges.push(Edge::new(project, src, tgt, edge_type));
    }
    edges
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// HANDLES edges from Route nodes to statically resolvable handlers. Returns
/// the edges plus the handler qnames (entry-point evidence for the post-pass).
pub fn resolve_handlers(
    project: &str,
    extractions: &[FileExtraction],
    symbols: &SymbolTable,
) -> (Vec<Edge>, Vec<String>) {
    let mut edges = Vec::new();
    let mut handler_qnames = Vec::new();
    for ex in extractions {
        for route in &ex.routes {
            let Some(route_id) = symbols.id_of(&route.qname) else {
                continue;
            };
            let candidates: Vec<&SymbolEntry> = symbols
                .candidates(&route.handler)
                .iter()
                .filter(|e| CALLABLE.contains(&e.label))
                .collect();
            // Same file first, then anywhere in the project; ambiguity means
            // the handler is not statically resolvable.
            let local: Vec<&&SymbolEntry> =
                candidates.iter().filter(|e| e.file_path == ex.rel_path).collect();
            let target = match (local.len(), candidates.len()) {
                (1, _) => Some(*local[0]),
                (0, 1) => Some(candidates[0]),
                _ => None,
            };
            if let Some(handler) = target {
                edges.push(Edge::new(project, route_id, handler.id, EdgeType::Handles));
                handler_qnames.push(handler.qname.clone());
            }
        }
    }
    (edges, handler_qnames)
}

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

/// IMPLEMENTS (type → interface) and OVERRIDE (concrete method → interface
/// method) edges. Both are emitted together when applicable.
pub fn resolve_implements(
    project: &str,
    impls: &[ImplementsRecord],
    defines: &[DefineRecord],
    symbols: &SymbolTable,
) -> Vec<Edge> {
    // type qname -> its method member qnames
    let mut methods_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for d in defines.iter().filter(|d| d.is_method) {
        methods_of
            .entry(d.container_qname.as_str())
            .or_default()
            .push(d.member_qname.as_str());
    }

    let mut edges = Vec::new();
    for link in impls {
        let Some(type_id) = symbols.id_of(&link.type_qname) else {
            continue;
        };
        let type_file = symbols
            .candidates(link.type_qname.rsplit('.').next().unwrap_or(""))
            .iter()
            .find(|e| e.qname == link.type_qname)
            .map(|e| e.file_path.clone())
            .unwrap_or_default();

        let ifaces: Vec<&SymbolEntry> = symbols
            .candidates(&link.interface_name)
            .iter()
            .filter(|e| e.label == NodeLabel::Interface)
            .collect();
        let iface = ifaces
            .iter()
            .find(|e| e.file_path == type_file)
            .or_else(|| ifaces.first());
        let Some(iface) = iface else {
            continue;
        };

        edges.push(Edge::new(project, type_id, iface.id, EdgeType::Implements));

        // Concrete methods overriding same-named interface methods
        for member_qname in methods_of.get(link.type_qname.as_str()).into_iter().flatten() {
            let method_name = member_qname.rsplit('.').next().unwrap_or(member_qname);
            let (Some(concrete_id), Some(iface_method)) = (
                symbols.id_of(member_qname),
                symbols.member(&iface.qname, method_name),
            ) else {
                continue;
            };
            edges.push(Edge::new(project, concrete_id, iface_method.id, EdgeType::Override));
        }
    }
    edges
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, name: &str, qname: &str, file: &str, label: NodeLabel) -> Node {
        let mut node = Node::new("p", label, name, qname, file);
        node.id = id;
        node
    }

    fn table(nodes: &[Node]) -> SymbolTable {
        SymbolTable::from_nodes(nodes.iter())
    }

    fn call(caller: &str, callee: &str, file: &str) -> UnresolvedCall {
        UnresolvedCall {
            caller_qname: caller.to_string(),
            callee_name: callee.to_string(),
            call_line: 10,
            language: "go",
            file_path: file.to_string(),
            is_usage: false,
        }
    }

    #[test]
    fn test_unique_resolution_same_file() {
        let nodes = vec![
            entry(1, "main", "p.main.main", "main.go", NodeLabel::Function),
            entry(2, "Hello", "p.main.Hello", "main.go", NodeLabel::Function),
        ];
        let symbols = table(&nodes);
        let edges = resolve_calls(
            "p",
            &[call("p.main.main", "Hello", "main.go")],
            &symbols,
            &HashMap::new(),
        );
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source_id, 1);
        assert_eq!(edges[0].target_id, 2);
        assert_eq!(edges[0].edge_type, EdgeType::Calls);
        assert!(edges[0].properties.get("confidence").is_none());
    }

    #[test]
    fn test_same_file_beats_other_files() {
        let nodes = vec![
            entry(1, "caller", "p.a.caller", "a.go", NodeLabel::Function),
            entry(2, "helper", "p.a.helper", "a.go", NodeLabel::Function),
            entry(3, "helper", "p.b.helper", "b.go", NodeLabel::Function),
        ];
        let symbols = table(&nodes);
        let edges =
            resolve_calls("p", &[call("p.a.caller", "helper", "a.go")], &symbols, &HashMap::new());
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_id, 2);
    }

    #[test]
    fn test_import_scope_beats_project() {
        let nodes = vec![
            entry(1, "caller", "p.app.caller", "app/main.go", NodeLabel::Function),
            entry(2, "run", "p.lib.run", "lib/run.go", NodeLabel::Function),
            entry(3, "run", "p.other.run", "other/run.go", NodeLabel::Function),
        ];
        let symbols = table(&nodes);
        let mut imports = HashMap::new();
        imports.insert("app/main.go".to_string(), vec!["lib/run.go".to_string()]);
        let edges =
            resolve_calls("p", &[call("p.app.caller", "run", "app/main.go")], &symbols, &imports);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_id, 2);
    }

    #[test]
    fn test_ambiguous_emits_per_candidate_with_confidence() {
        let nodes = vec![
            entry(1, "caller", "p.app.caller", "app/main.go", NodeLabel::Function),
            entry(2, "run", "p.x.run", "x/run.go", NodeLabel::Function),
            entry(3, "run", "p.y.run", "y/run.go", NodeLabel::Function),
        ];
        let symbols = table(&nodes);
        let edges =
            resolve_calls("p", &[call("p.app.caller", "run", "app/main.go")], &symbols, &HashMap::new());
        assert_eq!(edges.len(), 2);
        for edge in &edges {
            assert_eq!(
                edge.properties.get("confidence"),
                Some(&serde_json::json!(0.5))
            );
        }
    }

    #[test]
    fn test_unresolved_dropped() {
        let nodes = vec![entry(1, "caller", "p.a.caller", "a.go", NodeLabel::Function)];
        let symbols = table(&nodes);
        let edges =
            resolve_calls("p", &[call("p.a.caller", "missing", "a.go")], &symbols, &HashMap::new());
        assert!(edges.is_empty());
    }

    #[test]
    fn test_usage_edges() {
        let nodes = vec![
            entry(1, "main", "p.m.main", "m.go", NodeLabel::Function),
            entry(2, "handler", "p.m.handler", "m.go", NodeLabel::Function),
        ];
        let symbols = table(&nodes);
        let mut usage = call("p.m.main", "handler", "m.go");
        usage.is_usage = true;
        let edges = resolve_calls("p", &[usage], &symbols, &HashMap::new());
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].edge_type, EdgeType::Usage);
    }

    #[test]
    fn test_implements_and_override_coexist() {
        let nodes = vec![
            entry(1, "Greeter", "p.g.Greeter", "g.rs", NodeLabel::Interface),
            entry(2, "greet", "p.g.Greeter.greet", "g.rs", NodeLabel::Method),
            entry(3, "English", "p.g.English", "g.rs", NodeLabel::Class),
            entry(4, "greet", "p.g.English.greet", "g.rs", NodeLabel::Method),
        ];
        let symbols = table(&nodes);
        let impls = vec![ImplementsRecord {
            type_qname: "p.g.English".into(),
            interface_name: "Greeter".into(),
        }];
        let defines = vec![
            DefineRecord {
                container_qname: "p.g.Greeter".into(),
                member_qname: "p.g.Greeter.greet".into(),
                is_method: true,
            },
            DefineRecord {
                container_qname: "p.g.English".into(),
                member_qname: "p.g.English.greet".into(),
                is_method: true,
            },
        ];
        let edges = resolve_implements("p", &impls, &defines, &symbols);
        assert!(edges
            .iter()
            .any(|e| e.edge_type == EdgeType::Implements && e.source_id == 3 && e.target_id == 1));
        assert!(edges
            .iter()
            .any(|e| e.edge_type == EdgeType::Override && e.source_id == 4 && e.target_id == 2));
    }

    #[test]
    fn test_import_edge_resolution() {
        use crate::extract::FileExtraction;
        let mut ex = FileExtraction {
            rel_path: "app/main.py".into(),
            language: "python",
            ..Default::default()
        };
        ex.imports.push("lib.orders".into());

        let all_files = vec!["app/main.py".to_string(), "lib/orders.py".to_string()];
        let mut module_ids = HashMap::new();
        module_ids.insert("app/main.py".to_string(), 10i64);
        module_ids.insert("lib/orders.py".to_string(), 20i64);

        let (imported, edges) = resolve_imports("p", &[ex], &all_files, &module_ids);
        assert_eq!(imported["app/main.py"], vec!["lib/orders.py".to_string()]);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source_id, 10);
        assert_eq!(edges[0].target_id, 20);
        assert_eq!(edges[0].edge_type, EdgeType::Imports);
    }
}
