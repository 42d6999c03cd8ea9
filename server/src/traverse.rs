//! Single-source BFS over typed edges, with hop tagging and risk levels.
//!
//! The walk is an in-process frontier expansion (not a recursive CTE) so the
//! result order is deterministic: adjacency reads are ordered by edge id and
//! frontiers are processed in insertion order.

use serde::Serialize;
use std::collections::HashMap;

use crate::store::Store;
use crate::types::*;

// ---------------------------------------------------------------------------
// Risk levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "CRITICAL",
            RiskLevel::High => "HIGH",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::Low => "LOW",
        }
    }
}

/// Hop depth → risk: direct callers are critical, attenuation per hop.
pub fn hop_to_risk(hop: u32) -> RiskLevel {
    match hop {
        0 | 1 => RiskLevel::Critical,
        2 => RiskLevel::High,
        3 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

/// Keep the minimum hop per node id (highest risk wins).
pub fn deduplicate_hops(entries: Vec<(i64, u32)>) -> Vec<(i64, u32)> {
    let mut min_hops: HashMap<i64, u32> = HashMap::new();
    let mut order: Vec<i64> = Vec::new();
    for (id, hop) in entries {
        match min_hops.get_mut(&id) {
            Some(existing) => {
                if hop < *existing {
                    *existing = hop;
                }
            }
            None => {
                min_hops.insert(id, hop);
                order.push(id);
            }
        }
    }
    order.into_iter().map(|id| (id, min_hops[&id])).collect()
}

// ---------------------------------------------------------------------------
// BFS
// ---------------------------------------------------------------------------

/// A visited node with the hop at which it was first reached.
#[derive(Debug, Clone)]
pub struct BfsNode {
    pub node: Node,
    pub hop: u32,
}

/// An edge discovered during traversal, with endpoint names for display.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeInfo {
    pub source_id: i64,
    pub target_id: i64,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub source_name: String,
    pub target_name: String,
    pub properties: Properties,
}

#[derive(Debug)]
pub struct BfsResult {
    /// Visited nodes excluding the start node, in discovery order.
    pub visited: Vec<BfsNode>,
    pub edges: Vec<EdgeInfo>,
    /// True when the result cap cut the walk short.
    pub truncated: bool,
}

/// Breadth-first walk from `start_id`. Each frontier expansion checks the
/// cancellation token; `max_results` bounds the visited set.
pub fn bfs(
    store: &Store,
    start_id: i64,
    direction: Direction,
    edge_types: &[EdgeType],
    max_depth: u32,
    max_results: usize,
    cancel: &CancelToken,
) -> Result<BfsResult> {
    let mut visited_hops: HashMap<i64, u32> = HashMap::new();
    visited_hops.insert(start_id, 0);

    let mut order: Vec<(i64, u32)> = Vec::new();
    let mut raw_edges: Vec<Edge> = Vec::new();
    let mut frontier: Vec<i64> = vec![start_id];
    let mut truncated = false;

    'walk: for hop in 1..=max_depth {
        cancel.check()?;
        let mut next: Vec<i64> = Vec::new();
        for &node_id in &frontier {
            for edge in store.adjacent_edges(node_id, direction, edge_types)? {
                let neighbor = if edge.source_id == node_id {
                    edge.target_id
                } else {
                    edge.source_id
                };
                // In Any direction an edge can come back to its own source.
                if neighbor == node_id {
                    continue;
                }
                raw_edges.push(edge);
                if visited_hops.contains_key(&neighbor) {
                    continue;
                }
                visited_hops.insert(neighbor, hop);
                order.push((neighbor, hop));
                next.push(neighbor);
                if order.len() >= max_results {
                    truncated = true;
                    break 'walk;
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    // Hydrate nodes and name the edge endpoints.
    let ids: Vec<i64> = order.iter().map(|(id, _)| *id).collect();
    let mut nodes_by_id: HashMap<i64, Node> = store
        .get_nodes_by_ids(&ids)?
        .into_iter()
        .map(|n| (n.id, n))
        .collect();
    if let Some(start) = store.get_node(start_id)? {
        nodes_by_id.insert(start_id, start);
    }

    // Edges may point at ids beyond the cap; fetch those names too.
    let missing: Vec<i64> = raw_edges
        .iter()
        .flat_map(|e| [e.source_id, e.target_id])
        .filter(|id| !nodes_by_id.contains_key(id))
        .collect();
    for node in store.get_nodes_by_ids(&missing)? {
        nodes_by_id.insert(node.id, node);
    }

    let visited: Vec<BfsNode> = order
        .iter()
        .filter_map(|(id, hop)| {
            nodes_by_id.get(id).map(|n| BfsNode { node: n.clone(), hop: *hop })
        })
        .collect();

    let mut seen_edges = std::collections::HashSet::new();
    let edges: Vec<EdgeInfo> = raw_edges
        .into_iter()
        .filter(|e| seen_edges.insert(e.id))
        .map(|e| EdgeInfo {
            source_name: nodes_by_id
                .get(&e.source_id)
                .map(|n| n.name.clone())
                .unwrap_or_default(),
            target_name: nodes_by_id
                .get(&e.target_id)
                .map(|n| n.name.clone())
                .unwrap_or_default(),
            source_id: e.source_id,
            target_id: e.target_id,
            edge_type: e.edge_type,
            properties: e.properties,
        })
        .collect();

    Ok(BfsResult { visited, edges, truncated })
}

// ---------------------------------------------------------------------------
// Impact summary
// ---------------------------------------------------------------------------

/// Risk histogram over a set of visited nodes plus the cross-service flag.
#[derive(Debug, Default, Serialize)]
pub struct ImpactSummary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub total: usize,
    pub has_cross_service: bool,
}

pub fn impact_summary(visited: &[BfsNode], edges: &[EdgeInfo]) -> ImpactSummary {
    let mut summary = ImpactSummary::default();
    for entry in visited {
        match hop_to_risk(entry.hop) {
            RiskLevel::Critical => summary.critical += 1,
            RiskLevel::High => summary.high += 1,
            RiskLevel::Medium => summary.medium += 1,
            RiskLevel::Low => summary.low += 1,
        }
        summary.total += 1;
    }
    summary.has_cross_service = edges
        .iter()
        .any(|e| matches!(e.edge_type, EdgeType::HttpCalls | EdgeType::AsyncCalls));
    summary
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_to_risk() {
        assert_eq!(hop_to_risk(1), RiskLevel::Critical);
        assert_eq!(hop_to_risk(2), RiskLevel::High);
        assert_eq!(hop_to_risk(3), RiskLevel::Medium);
        assert_eq!(hop_to_risk(4), RiskLevel::Low);
        assert_eq!(hop_to_risk(9), RiskLevel::Low);
    }

    #[test]
    fn test_deduplicate_hops_keeps_minimum() {
        let deduped = deduplicate_hops(vec![(1, 3), (2, 2), (1, 1), (2, 4), (3, 2)]);
        assert_eq!(deduped.len(), 3);
        assert!(deduped.contains(&(1, 1)));
        assert!(deduped.contains(&(2, 2)));
        assert!(deduped.contains(&(3, 2)));
    }

    fn chain_store(n: usize) -> (Store, Vec<i64>) {
        // f0 -> f1 -> f2 -> ... -> f(n-1)
        let store = Store::open_in_memory().unwrap();
        store.upsert_project("p", "/tmp/p", 0).unwrap();
        let ids: Vec<i64> = (0..n)
            .map(|i| {
                store
                    .upsert_node(&Node::new(
                        "p",
                        NodeLabel::Function,
                        &format!("f{i}"),
                        &format!("p.m.f{i}"),
                        "m.go",
                    ))
                    .unwrap()
            })
            .collect();
        for pair in ids.windows(2) {
            store.upsert_edge(&Edge::new("p", pair[0], pair[1], EdgeType::Calls)).unwrap();
        }
        (store, ids)
    }

    #[test]
    fn test_bfs_inbound_chain() {
        let (store, ids) = chain_store(5);
        // Inbound from the last node walks the chain backwards
        let result = bfs(
            &store,
            ids[4],
            Direction::Inbound,
            &[EdgeType::Calls],
            5,
            200,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(result.visited.len(), 4);
        let hops: Vec<(String, u32)> = result
            .visited
            .iter()
            .map(|v| (v.node.name.clone(), v.hop))
            .collect();
        assert_eq!(
            hops,
            vec![
                ("f3".to_string(), 1),
                ("f2".to_string(), 2),
                ("f1".to_string(), 3),
                ("f0".to_string(), 4),
            ]
        );
        assert_eq!(result.edges.len(), 4);
        assert!(!result.truncated);
    }

    #[test]
    fn test_bfs_depth_cap() {
        let (store, ids) = chain_store(5);
        let result = bfs(
            &store,
            ids[4],
            Direction::Inbound,
            &[EdgeType::Calls],
            2,
            200,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(result.visited.len(), 2);
    }

    #[test]
    fn test_bfs_result_cap_truncates() {
        let (store, ids) = chain_store(5);
        let result = bfs(
            &store,
            ids[4],
            Direction::Inbound,
            &[EdgeType::Calls],
            5,
            2,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(result.visited.len(), 2);
        assert!(result.truncated);
    }

    #[test]
    fn test_bfs_cancellation() {
        let (store, ids) = chain_store(3);
        let token = CancelToken::new();
        token.cancel();
        let result = bfs(&store, ids[2], Direction::Inbound, &[], 3, 200, &token);
        assert!(matches!(result, Err(GraphError::Cancelled)));
    }

    #[test]
    fn test_bfs_cycle_terminates() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_project("p", "/tmp/p", 0).unwrap();
        let a = store
            .upsert_node(&Node::new("p", NodeLabel::Function, "a", "p.a", "a.go"))
            .unwrap();
        let b = store
            .upsert_node(&Node::new("p", NodeLabel::Function, "b", "p.b", "b.go"))
            .unwrap();
        store.upsert_edge(&Edge::new("p", a, b, EdgeType::Calls)).unwrap();
        store.upsert_edge(&Edge::new("p", b, a, EdgeType::Calls)).unwrap();

        let result =
            bfs(&store, a, Direction::Outbound, &[], 10, 200, &CancelToken::new()).unwrap();
        assert_eq!(result.visited.len(), 1);
        assert_eq!(result.visited[0].node.name, "b");
    }

    #[test]
    fn test_impact_summary_histogram() {
        let (store, ids) = chain_store(5);
        let result = bfs(
            &store,
            ids[4],
            Direction::Inbound,
            &[EdgeType::Calls],
            5,
            200,
            &CancelToken::new(),
        )
        .unwrap();
        let summary = impact_summary(&result.visited, &result.edges);
        assert_eq!(summary.critical, 1);
        assert_eq!(summary.high, 1);
        assert_eq!(summary.medium, 1);
        assert_eq!(summary.low, 1);
        assert_eq!(summary.total, 4);
        assert!(!summary.has_cross_service);
    }
}
