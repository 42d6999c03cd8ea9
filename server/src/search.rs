//! Structured graph search with SQL pushdown.
//!
//! The SQL stage narrows by label, file glob, and literal hints extracted from
//! the name regex; the full regex, degree filters, and ranking then run in
//! memory. The hint pushdown is correctness-preserving: a string matched by
//! the regex always contains every extracted hint, so the AND-joined LIKE
//! clauses can only over-include, never under-include.

use regex::RegexBuilder;
use rusqlite::types::ToSql;

use crate::store::Store;
use crate::types::*;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    #[default]
    Relevance,
    Name,
    Degree,
}

impl SortBy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "relevance" => Some(SortBy::Relevance),
            "name" => Some(SortBy::Name),
            "degree" => Some(SortBy::Degree),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub project: String,
    pub label: Option<NodeLabel>,
    pub name_pattern: Option<String>,
    pub qn_pattern: Option<String>,
    pub file_pattern: Option<String>,
    pub exclude_labels: Vec<NodeLabel>,
    pub relationship: Option<EdgeType>,
    pub direction: Direction,
    pub min_degree: Option<u32>,
    pub max_degree: Option<u32>,
    pub exclude_entry_points: bool,
    pub include_connected: bool,
    pub limit: usize,
    pub offset: usize,
    pub sort_by: SortBy,
}

impl SearchParams {
    pub fn new(project: &str) -> Self {
        SearchParams {
            project: project.to_string(),
            label: None,
            name_pattern: None,
            qn_pattern: None,
            file_pattern: None,
            exclude_labels: Vec::new(),
            relationship: None,
            direction: Direction::Any,
            min_degree: None,
            max_degree: None,
            exclude_entry_points: false,
            include_connected: false,
            limit: 20,
            offset: 0,
            sort_by: SortBy::Relevance,
        }
    }
}

/// One scored search hit with its degree counts.
#[derive(Debug)]
pub struct SearchHit {
    pub node: Node,
    pub in_degree: u32,
    pub out_degree: u32,
    /// Names of directly connected nodes when `include_connected` is set.
    pub connections: Vec<String>,
}

#[derive(Debug)]
pub struct SearchResponse {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
    pub results: Vec<SearchHit>,
}

// ---------------------------------------------------------------------------
// Glob → LIKE
// ---------------------------------------------------------------------------

/// Convert a file glob into a SQL LIKE pattern:
/// `**/dir/**` → `%dir%`, `*.go` → `%.go`, `src/**` → `src%`,
/// `file?.txt` → `file_.txt`.
pub fn glob_to_like(glob: &str) -> String {
    let mut like = glob.to_string();
    like = like.replace("**/", "%");
    like = like.replace("/**", "%");
    like = like.replace("**", "%");
    like = like.replace('*', "%");
    like = like.replace('?', "_");
    while like.contains("%%") {
        like = like.replace("%%", "%");
    }
    like
}

// ---------------------------------------------------------------------------
// Literal hint extraction
// ---------------------------------------------------------------------------

/// Literal substrings (≥ 3 chars) guaranteed to appear in every string the
/// regex matches. Alternation defeats the guarantee, so `|` disables hints.
/// A char followed by `?`, `*`, or `{` may repeat zero times and is dropped
/// from its run; a group followed by a quantifier drops the whole group hint.
pub fn extract_literal_hints(pattern: &str) -> Vec<String> {
    if pattern.contains('|') {
        return Vec::new();
    }

    let mut hints: Vec<String> = Vec::new();
    let mut run = String::new();
    let mut group_hint_end: Option<usize> = None; // hints.len() before a ')' finalized

    let mut finalize = |run: &mut String, hints: &mut Vec<String>| {
        if run.len() >= 3 {
            hints.push(std::mem::take(run));
        } else {
            run.clear();
        }
    };

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                // Escape class (\d, \w, ...): not a literal, breaks the run.
                chars.next();
                finalize(&mut run, &mut hints);
                group_hint_end = None;
            }
            '?' | '*' | '{' => {
                if run.is_empty() {
                    // Quantifier over a whole group: its hint is optional too.
                    if let Some(mark) = group_hint_end.take() {
                        hints.truncate(mark);
                    }
                } else {
                    run.pop();
                    finalize(&mut run, &mut hints);
                }
                group_hint_end = None;
                // Skip a {m,n} body
                if c == '{' {
                    for next in chars.by_ref() {
                        if next == '}' {
                            break;
                        }
                    }
                }
            }
            ')' => {
                let before = hints.len();
                finalize(&mut run, &mut hints);
                group_hint_end = Some(before);
            }
            '.' | '+' | '(' | '[' | ']' | '}' | '^' | '$' => {
                finalize(&mut run, &mut hints);
                group_hint_end = None;
                // Skip a [...] class body
                if c == '[' {
                    for next in chars.by_ref() {
                        if next == ']' {
                            break;
                        }
                    }
                }
            }
            _ => {
                run.push(c);
            }
        }
    }
    finalize(&mut run, &mut hints);
    hints
}

/// The pattern with regex metacharacters stripped, used for relevance tiers.
fn literal_payload(pattern: &str) -> String {
    pattern
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

pub fn search(store: &Store, params: &SearchParams) -> Result<SearchResponse> {
    // Compile regexes up front so bad patterns fail fast.
    let name_re = params
        .name_pattern
        .as_deref()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| GraphError::invalid(format!("bad name_pattern: {e}")))
        })
        .transpose()?;
    let qn_re = params
        .qn_pattern
        .as_deref()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| GraphError::invalid(format!("bad qn_pattern: {e}")))
        })
        .transpose()?;

    // -- SQL stage -----------------------------------------------------------
    let mut clauses: Vec<String> = vec!["project = ?".to_string()];
    let mut bound: Vec<Box<dyn ToSql>> = vec![Box::new(params.project.clone())];

    if let Some(label) = params.label {
        clauses.push("label = ?".to_string());
        bound.push(Box::new(label.as_str()));
    }
    if !params.exclude_labels.is_empty() {
        let list = params
            .exclude_labels
            .iter()
            .map(|l| format!("'{}'", l.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        clauses.push(format!("label NOT IN ({list})"));
    }
    if let Some(glob) = params.file_pattern.as_deref() {
        clauses.push("file_path LIKE ?".to_string());
        bound.push(Box::new(glob_to_like(glob)));
    }
    if let Some(pattern) = params.name_pattern.as_deref() {
        for hint in extract_literal_hints(pattern) {
            clauses.push("(name LIKE ? OR qualified_name LIKE ?)".to_string());
            let like = format!("%{hint}%");
            bound.push(Box::new(like.clone()));
            bound.push(Box::new(like));
        }
    }

    // Scan ceiling: full ceiling when in-memory filtering will run, otherwise
    // just enough rows to make has_more correct for the requested page.
    let memory_filtering = name_re.is_some()
        || qn_re.is_some()
        || params.min_degree.is_some()
        || params.max_degree.is_some()
        || params.exclude_entry_points;
    let ceiling = if memory_filtering {
        SEARCH_SCAN_CEILING
    } else {
        (params.offset + params.limit + 1000).min(SEARCH_SCAN_CEILING)
    };

    let where_sql = clauses.join(" AND ");
    let mut nodes = store.query_nodes_where(&where_sql, &bound, ceiling)?;

    // -- in-memory regex stage ----------------------------------------------
    if let Some(re) = &name_re {
        nodes.retain(|n| re.is_match(&n.name) || re.is_match(&n.qualified_name));
    }
    if let Some(re) = &qn_re {
        nodes.retain(|n| re.is_match(&n.qualified_name));
    }
    if params.exclude_entry_points {
        nodes.retain(|n| !n.is_entry_point());
    }

    // -- degree stage --------------------------------------------------------
    let ids: Vec<i64> = nodes.iter().map(|n| n.id).collect();
    let degrees = store.degree_counts(&ids, params.relationship)?;

    let mut hits: Vec<SearchHit> = nodes
        .into_iter()
        .map(|node| {
            let (in_degree, out_degree) = degrees.get(&node.id).copied().unwrap_or((0, 0));
            SearchHit { node, in_degree, out_degree, connections: Vec::new() }
        })
        .collect();

    if params.min_degree.is_some() || params.max_degree.is_some() {
        hits.retain(|hit| {
            let degree = match params.direction {
                Direction::Inbound => hit.in_degree,
                Direction::Outbound => hit.out_degree,
                Direction::Any => hit.in_degree + hit.out_degree,
            };
            params.min_degree.map_or(true, |min| degree >= min)
                && params.max_degree.map_or(true, |max| degree <= max)
        });
    }

    // -- ranking -------------------------------------------------------------
    match params.sort_by {
        SortBy::Name => {
            hits.sort_by(|a, b| {
                a.node.name.cmp(&b.node.name).then_with(|| {
                    a.node.qualified_name.cmp(&b.node.qualified_name)
                })
            });
        }
        SortBy::Degree => {
            hits.sort_by(|a, b| {
                let da = a.in_degree + a.out_degree;
                let db = b.in_degree + b.out_degree;
                db.cmp(&da).then_with(|| a.node.name.cmp(&b.node.name))
            });
        }
        SortBy::Relevance => {
            let payload = params
                .name_pattern
                .as_deref()
                .map(literal_payload)
                .unwrap_or_default()
                .to_lowercase();
            hits.sort_by(|a, b| {
                let tier = |hit: &SearchHit| -> u8 {
                    if payload.is_empty() {
                        return 2;
                    }
                    let name = hit.node.name.to_lowercase();
                    if name == payload {
                        0
                    } else if name.starts_with(&payload) {
                        1
                    } else {
                        2
                    }
                };
                tier(a)
                    .cmp(&tier(b))
                    .then_with(|| {
                        let da = a.in_degree + a.out_degree;
                        let db = b.in_degree + b.out_degree;
                        db.cmp(&da)
                    })
                    .then_with(|| a.node.name.cmp(&b.node.name))
            });
        }
    }

    // -- pagination ----------------------------------------------------------
    let total = hits.len();
    let has_more = params.offset + params.limit < total;
    let mut page: Vec<SearchHit> = hits
        .into_iter()
        .skip(params.offset)
        .take(params.limit)
        .collect();

    if params.include_connected {
        for hit in &mut page {
            let edges = store.adjacent_edges(hit.node.id, Direction::Any, &[])?;
            let mut neighbor_ids: Vec<i64> = edges
                .iter()
                .map(|e| if e.source_id == hit.node.id { e.target_id } else { e.source_id })
                .collect();
            neighbor_ids.dedup();
            neighbor_ids.truncate(10);
            hit.connections = store
                .get_nodes_by_ids(&neighbor_ids)?
                .into_iter()
                .map(|n| n.name)
                .collect();
        }
    }

    Ok(SearchResponse { total, limit: params.limit, offset: params.offset, has_more, results: page })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
