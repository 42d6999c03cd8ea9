use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum file size (in bytes) that will be read into memory.
pub const MAX_FILE_READ: usize = 512 * 1024;

/// Lines longer than this are truncated on read (grep results, file reads).
pub const MAX_LINE_LEN: usize = 500;

/// Hard row cap applied to Cypher results after aggregation.
pub const CYPHER_ROW_CAP: usize = 200;

/// Scan ceiling for the search SQL stage when in-memory filtering will run.
pub const SEARCH_SCAN_CEILING: usize = 200_000;

/// SQLite bound-variable ceiling; batch writers fragment below this.
pub const SQLITE_VAR_LIMIT: usize = 999;

/// IN-list chunk size for batched degree counting (one variable reserved).
pub const DEGREE_CHUNK: usize = 998;

/// Confidence band thresholds for inferred cross-service edges.
pub const CONFIDENCE_HIGH: f64 = 0.7;
pub const CONFIDENCE_MEDIUM: f64 = 0.45;
pub const CONFIDENCE_FLOOR: f64 = 0.25;

// ---------------------------------------------------------------------------
// Node labels
// ---------------------------------------------------------------------------

/// High-level structural category of a graph vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum NodeLabel {
    Project,
    Package,
    Folder,
    File,
    Module,
    Class,
    Function,
    Method,
    Interface,
    Enum,
    Type,
    Route,
    Community,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Project => "Project",
            NodeLabel::Package => "Package",
            NodeLabel::Folder => "Folder",
            NodeLabel::File => "File",
            NodeLabel::Module => "Module",
            NodeLabel::Class => "Class",
            NodeLabel::Function => "Function",
            NodeLabel::Method => "Method",
            NodeLabel::Interface => "Interface",
            NodeLabel::Enum => "Enum",
            NodeLabel::Type => "Type",
            NodeLabel::Route => "Route",
            NodeLabel::Community => "Community",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Project" => Some(NodeLabel::Project),
            "Package" => Some(NodeLabel::Package),
            "Folder" => Some(NodeLabel::Folder),
            "File" => Some(NodeLabel::File),
            "Module" => Some(NodeLabel::Module),
            "Class" => Some(NodeLabel::Class),
            "Function" => Some(NodeLabel::Function),
            "Method" => Some(NodeLabel::Method),
            "Interface" => Some(NodeLabel::Interface),
            "Enum" => Some(NodeLabel::Enum),
            "Type" => Some(NodeLabel::Type),
            "Route" => Some(NodeLabel::Route),
            "Community" => Some(NodeLabel::Community),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Edge types
// ---------------------------------------------------------------------------

/// Relationship kind between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    Calls,
    HttpCalls,
    AsyncCalls,
    Imports,
    Defines,
    DefinesMethod,
    Handles,
    Implements,
    Override,
    Usage,
    FileChangesWith,
    ContainsFile,
    ContainsFolder,
    ContainsPackage,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Calls => "CALLS",
            EdgeType::HttpCalls => "HTTP_CALLS",
            EdgeType::AsyncCalls => "ASYNC_CALLS",
            EdgeType::Imports => "IMPORTS",
            EdgeType::Defines => "DEFINES",
            EdgeType::DefinesMethod => "DEFINES_METHOD",
            EdgeType::Handles => "HANDLES",
            EdgeType::Implements => "IMPLEMENTS",
            EdgeType::Override => "OVERRIDE",
            EdgeType::Usage => "USAGE",
            EdgeType::FileChangesWith => "FILE_CHANGES_WITH",
            EdgeType::ContainsFile => "CONTAINS_FILE",
            EdgeType::ContainsFolder => "CONTAINS_FOLDER",
            EdgeType::ContainsPackage => "CONTAINS_PACKAGE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CALLS" => Some(EdgeType::Calls),
            "HTTP_CALLS" => Some(EdgeType::HttpCalls),
            "ASYNC_CALLS" => Some(EdgeType::AsyncCalls),
            "IMPORTS" => Some(EdgeType::Imports),
            "DEFINES" => Some(EdgeType::Defines),
            "DEFINES_METHOD" => Some(EdgeType::DefinesMethod),
            "HANDLES" => Some(EdgeType::Handles),
            "IMPLEMENTS" => Some(EdgeType::Implements),
            "OVERRIDE" => Some(EdgeType::Override),
            "USAGE" => Some(EdgeType::Usage),
            "FILE_CHANGES_WITH" => Some(EdgeType::FileChangesWith),
            "CONTAINS_FILE" => Some(EdgeType::ContainsFile),
            "CONTAINS_FOLDER" => Some(EdgeType::ContainsFolder),
            "CONTAINS_PACKAGE" => Some(EdgeType::ContainsPackage),
            _ => None,
        }
    }

    /// Edge types considered for call-path tracing and impact analysis.
    pub fn call_like() -> &'static [EdgeType] {
        &[EdgeType::Calls, EdgeType::HttpCalls, EdgeType::AsyncCalls]
    }
}

// ---------------------------------------------------------------------------
// Core records
// ---------------------------------------------------------------------------

/// Open key-value property map, JSON-encoded at rest.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// A graph vertex. `id` is store-assigned; 0 means not yet persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: i64,
    pub project: String,
    pub label: NodeLabel,
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    /// 1-based inclusive line range; 0 = unknown.
    pub start_line: u32,
    pub end_line: u32,
    pub properties: Properties,
}

impl Node {
    pub fn new(
        project: &str,
        label: NodeLabel,
        name: &str,
        qualified_name: &str,
        file_path: &str,
    ) -> Self {
        Node {
            id: 0,
            project: project.to_string(),
            label,
            name: name.to_string(),
            qualified_name: qualified_name.to_string(),
            file_path: file_path.to_string(),
            start_line: 0,
            end_line: 0,
            properties: Properties::new(),
        }
    }

    pub fn with_lines(mut self, start: u32, end: u32) -> Self {
        self.start_line = start;
        self.end_line = end;
        self
    }

    pub fn with_prop(mut self, key: &str, value: serde_json::Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    pub fn is_entry_point(&self) -> bool {
        self.properties
            .get("is_entry_point")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// A directed graph arc between two persisted nodes.
#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    pub id: i64,
    pub project: String,
    pub source_id: i64,
    pub target_id: i64,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub properties: Properties,
}

impl Edge {
    pub fn new(project: &str, source_id: i64, target_id: i64, edge_type: EdgeType) -> Self {
        Edge {
            id: 0,
            project: project.to_string(),
            source_id,
            target_id,
            edge_type,
            properties: Properties::new(),
        }
    }

    pub fn with_prop(mut self, key: &str, value: serde_json::Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }
}

/// Content hash bookkeeping row for incremental re-indexing.
#[derive(Debug, Clone)]
pub struct FileHash {
    pub project: String,
    pub rel_path: String,
    pub sha256: String,
}

/// A registered project: one embedded database per project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectRow {
    pub name: String,
    pub root_path: String,
    /// Unix epoch seconds of the last completed index pass; 0 = never.
    pub indexed_at: i64,
}

// ---------------------------------------------------------------------------
// Confidence bands
// ---------------------------------------------------------------------------

/// Bucketize a confidence float into the band stored on inferred edges.
pub fn confidence_band(confidence: f64) -> &'static str {
    if confidence >= CONFIDENCE_HIGH {
        "high"
    } else if confidence >= CONFIDENCE_MEDIUM {
        "medium"
    } else {
        "speculative"
    }
}

/// Attach `confidence` + `confidence_band` to an edge property map.
pub fn set_confidence(props: &mut Properties, confidence: f64) {
    props.insert("confidence".to_string(), serde_json::json!(confidence));
    props.insert(
        "confidence_band".to_string(),
        serde_json::json!(confidence_band(confidence)),
    );
}

// ---------------------------------------------------------------------------
// Traversal direction
// ---------------------------------------------------------------------------

/// Edge-following direction for search degree filters and BFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
    Any,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Direction::Inbound),
            "outbound" => Some(Direction::Outbound),
            "any" | "both" => Some(Direction::Any),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Core error taxonomy. `Cancelled` is a sentinel distinct from I/O failure
/// and is never logged as an error.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("resource limit: {0}")]
    ResourceLimit(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, GraphError>;

impl GraphError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        GraphError::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        GraphError::NotFound(msg.into())
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation token. Cloned freely; checked at loop boundaries
/// in discovery, indexing, and BFS frontier expansion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns `Err(GraphError::Cancelled)` once the token has been tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(GraphError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Path validation
// ---------------------------------------------------------------------------

/// Resolve a repo-relative path against the project root. Absolute paths and
/// parent-directory components are invalid arguments; a path that resolves
/// outside the root once symlinks are followed is rejected the same way.
pub fn validate_path(project_root: &Path, rel_path: &str) -> Result<PathBuf> {
    if rel_path.is_empty() {
        return Err(GraphError::invalid("path must not be empty"));
    }
    let candidate = Path::new(rel_path);
    let escapes = candidate.is_absolute()
        || candidate
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
    if escapes {
        return Err(GraphError::invalid(format!(
            "path escapes the project root: {rel_path}"
        )));
    }
    let root = project_root.canonicalize().map_err(|_| {
        GraphError::not_found(format!("project root missing: {}", project_root.display()))
    })?;
    let resolved = root
        .join(candidate)
        .canonicalize()
        .map_err(|_| GraphError::not_found(format!("no such file in project: {rel_path}")))?;
    // Symlinks inside the tree can still point elsewhere.
    if !resolved.starts_with(&root) {
        return Err(GraphError::invalid(format!(
            "path escapes the project root: {rel_path}"
        )));
    }
    Ok(resolved)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_type_round_trip() {
        for t in [
            EdgeType::Calls,
            EdgeType::HttpCalls,
            EdgeType::AsyncCalls,
            EdgeType::Imports,
            EdgeType::Defines,
            EdgeType::DefinesMethod,
            EdgeType::Handles,
            EdgeType::Implements,
            EdgeType::Override,
            EdgeType::Usage,
            EdgeType::FileChangesWith,
            EdgeType::ContainsFile,
            EdgeType::ContainsFolder,
            EdgeType::ContainsPackage,
        ] {
            assert_eq!(EdgeType::parse(t.as_str()), Some(t));
        }
        assert_eq!(EdgeType::parse("NOPE"), None);
    }

    #[test]
    fn test_node_label_round_trip() {
        for l in [
            NodeLabel::Project,
            NodeLabel::Function,
            NodeLabel::Route,
            NodeLabel::Community,
        ] {
            assert_eq!(NodeLabel::parse(l.as_str()), Some(l));
        }
        assert_eq!(NodeLabel::parse("function"), None);
    }

    #[test]
    fn test_confidence_bands() {
        assert_eq!(confidence_band(0.9), "high");
        assert_eq!(confidence_band(0.7), "high");
        assert_eq!(confidence_band(0.6), "medium");
        assert_eq!(confidence_band(0.45), "medium");
        assert_eq!(confidence_band(0.3), "speculative");
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(matches!(token.check(), Err(GraphError::Cancelled)));
        // Clones observe the same flag
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_validate_path_rejects_traversal() {
        let root = std::env::temp_dir();
        assert!(matches!(
            validate_path(&root, "../etc/passwd"),
            Err(GraphError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_path(&root, "/etc/passwd"),
            Err(GraphError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_path(&root, "a/../../b"),
            Err(GraphError::InvalidArgument(_))
        ));
        assert!(matches!(validate_path(&root, ""), Err(GraphError::InvalidArgument(_))));
        assert!(matches!(
            validate_path(&root, "definitely-not-a-real-file.txt"),
            Err(GraphError::NotFound(_))
        ));
    }
}
