//! Integration tests for the graph tool surface via dispatch_tool().
//!
//! Each test builds a Session from a fixture (or writes its own repo),
//! indexes it, and validates tool responses end to end.

mod helpers;

use helpers::TestHarness;
use serde_json::json;

// ---------------------------------------------------------------------------
// Indexing & lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_minimal_index_shape() {
    let h = TestHarness::from_fixture("basic");

    let status = h.call("index_status", json!({}));
    assert_eq!(status["status"], json!("ready"));
    assert_eq!(status["index_type"], json!("initial"));
    assert!(status["nodes"].as_i64().unwrap() >= 4); // files + module + functions
    assert!(status["edges"].as_i64().unwrap() >= 1);

    let projects = h.call("list_projects", json!({}));
    let list = projects.as_array().expect("list_projects returns an array");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["is_session_project"], json!(true));
    assert!(list[0]["db_path"].as_str().unwrap().ends_with(".db"));
}

#[test]
fn test_reindex_is_incremental() {
    let h = TestHarness::from_fixture("basic");
    let again = h.call("index_repository", json!({}));
    assert!(again["error"].is_null());

    let status = h.call("index_status", json!({}));
    assert_eq!(status["index_type"], json!("incremental"));
}

#[test]
fn test_delete_project() {
    let h = TestHarness::from_fixture("basic");
    let project = h.call("index_status", json!({}));
    assert_eq!(project["status"], json!("ready"));

    let projects = h.call("list_projects", json!({}));
    let name = projects[0]["name"].as_str().unwrap().to_string();

    let deleted = h.call("delete_project", json!({ "project_name": name }));
    assert_eq!(deleted["deleted"], json!(true));
    assert_eq!(deleted["status"], json!("deleted"));

    let projects = h.call("list_projects", json!({}));
    assert!(projects.as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// S1 — minimal graph content and dead-code search
// ---------------------------------------------------------------------------

#[test]
fn test_call_edge_and_dead_code_search() {
    let h = TestHarness::from_fixture("basic");

    // Exactly one CALLS edge: main -> Hello
    let calls = h.call(
        "query_graph",
        json!({ "query": "MATCH (a:Function)-[:CALLS]->(b:Function) RETURN a.name, b.name" }),
    );
    let rows = calls["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0], json!(["main", "Hello"]));

    // Dead-code query returns exactly Unused
    let dead = h.call(
        "search_graph",
        json!({
            "label": "Function",
            "relationship": "CALLS",
            "direction": "inbound",
            "max_degree": 0,
            "exclude_entry_points": true,
        }),
    );
    assert_eq!(dead["total"], json!(1));
    assert_eq!(dead["results"][0]["name"], json!("Unused"));
}

// ---------------------------------------------------------------------------
// S2 — trace with suggestions
// ---------------------------------------------------------------------------

#[test]
fn test_trace_suggestions_on_exact_miss() {
    let h = TestHarness::from_fixture("basic");
    let result = h.call("trace_call_path", json!({ "function_name": "Helo" }));
    assert_eq!(result["error"], json!("function not found: Helo"));
    let suggestions = result["suggestions"].as_array().unwrap();
    assert!(
        suggestions.iter().any(|s| s["name"] == json!("Hello")),
        "expected Hello in suggestions: {suggestions:?}"
    );
}

// ---------------------------------------------------------------------------
// S3 — risk classification over a call chain
// ---------------------------------------------------------------------------

#[test]
fn test_trace_risk_classification() {
    let h = TestHarness::empty();
    h.write(
        "chain.py",
        r#"def e():
    pass

def d():
    e()

def c():
    d()

def b():
    c()

def a():
    b()
"#,
    );
    h.call("index_repository", json!({}));

    let trace = h.call(
        "trace_call_path",
        json!({ "function_name": "e", "direction": "inbound", "depth": 5, "risk_labels": true }),
    );
    assert!(trace["error"].is_null(), "trace failed: {trace}");
    assert_eq!(trace["total_results"], json!(4));

    let hops = trace["hops"].as_array().unwrap();
    assert_eq!(hops.len(), 4);
    assert_eq!(hops[0]["nodes"][0]["name"], json!("d"));
    assert_eq!(hops[0]["nodes"][0]["risk"], json!("CRITICAL"));
    assert_eq!(hops[3]["nodes"][0]["name"], json!("a"));
    assert_eq!(hops[3]["nodes"][0]["risk"], json!("LOW"));

    let summary = &trace["impact_summary"];
    assert_eq!(summary["critical"], json!(1));
    assert_eq!(summary["high"], json!(1));
    assert_eq!(summary["medium"], json!(1));
    assert_eq!(summary["low"], json!(1));
    assert_eq!(summary["total"], json!(4));
    assert_eq!(summary["has_cross_service"], json!(false));
}

// ---------------------------------------------------------------------------
// S4 — Cypher aggregate
// ---------------------------------------------------------------------------

#[test]
fn test_cypher_aggregate_top_callees() {
    let h = TestHarness::empty();
    let mut source = String::new();
    for i in 0..10 {
        source.push_str(&format!("def target_{i}():\n    pass\n\n"));
        for j in 0..2 {
            source.push_str(&format!("def caller_{i}_{j}():\n    target_{i}()\n\n"));
        }
    }
    h.write("calls.py", &source);
    h.call("index_repository", json!({}));

    let result = h.call(
        "query_graph",
        json!({
            "query": "MATCH (f:Function)-[:CALLS]->(g:Function) \
                      RETURN g.name, COUNT(f) AS calls ORDER BY calls DESC LIMIT 3"
        }),
    );
    assert!(result["error"].is_null(), "query failed: {result}");
    assert_eq!(result["columns"], json!(["g.name", "calls"]));
    let rows = result["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    for row in rows {
        assert_eq!(row[1], json!(2), "every callee has two callers: {row}");
    }
}

// ---------------------------------------------------------------------------
// S5 — cross-service HTTP edge
// ---------------------------------------------------------------------------

#[test]
fn test_cross_service_http_edge() {
    let h = TestHarness::empty();

    // orders service (separate repo, same cache)
    let orders = tempfile::tempdir().unwrap();
    let orders_root = orders.path().join("orders");
    std::fs::create_dir_all(&orders_root).unwrap();
    std::fs::write(
        orders_root.join("api.py"),
        "@app.get(\"/api/orders/{order_id}\")\ndef get_order(order_id):\n    return None\n",
    )
    .unwrap();
    let indexed = h.index_other(&orders_root);
    assert!(indexed["error"].is_null(), "orders index failed: {indexed}");

    // web service = the session repo
    h.write(
        "client.py",
        "def fetch_order(order_id):\n    return requests.get(f\"http://orders/api/orders/{order_id}\")\n",
    );
    h.call("index_repository", json!({}));

    let result = h.call(
        "query_graph",
        json!({
            "query": "MATCH (a)-[r:HTTP_CALLS]->(b) WHERE r.url_path CONTAINS 'orders' \
                      RETURN a.name, b.name, r.confidence, r.confidence_band"
        }),
    );
    assert!(result["error"].is_null(), "query failed: {result}");
    let rows = result["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1, "expected one HTTP_CALLS row: {rows:?}");
    assert_eq!(rows[0][0], json!("fetch_order"));
    assert_eq!(rows[0][3], json!("high"));
}

// ---------------------------------------------------------------------------
// S6 — detect changes
// ---------------------------------------------------------------------------

#[test]
fn test_detect_changes_impact() {
    let h = TestHarness::empty();
    h.write(
        "handler.py",
        r#"def process_order(payload):
    return validate(payload)

def validate(payload):
    return payload
"#,
    );
    h.write(
        "svc.py",
        r#"def submit(payload):
    return process_order(payload)

def retry(payload):
    return submit(payload)
"#,
    );
    h.commit_all("baseline");
    h.call("index_repository", json!({}));

    // Modify process_order in the working tree only.
    h.write(
        "handler.py",
        r#"def process_order(payload):
    audit(payload)
    return validate(payload)

def validate(payload):
    return payload
"#,
    );

    let report = h.call("detect_changes", json!({ "scope": "unstaged", "depth": 2 }));
    assert!(report["error"].is_null(), "detect_changes failed: {report}");

    let changed_files = report["changed_files"].as_array().unwrap();
    assert!(changed_files
        .iter()
        .any(|f| f["path"] == json!("handler.py") && f["status"] == json!("M")));

    let changed_names: Vec<&str> = report["changed_symbols"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["name"].as_str().unwrap())
        .collect();
    assert!(changed_names.contains(&"process_order"), "changed: {changed_names:?}");

    let impacted = report["impacted_symbols"].as_array().unwrap();
    let submit = impacted
        .iter()
        .find(|s| s["name"] == json!("submit"))
        .expect("submit is a direct caller");
    assert_eq!(submit["risk"], json!("CRITICAL"));
    assert_eq!(submit["changed_by"], json!("process_order"));
    let retry = impacted
        .iter()
        .find(|s| s["name"] == json!("retry"))
        .expect("retry is a second-level caller");
    assert_eq!(retry["risk"], json!("HIGH"));
}

// ---------------------------------------------------------------------------
// Schema, snippets, files
// ---------------------------------------------------------------------------

#[test]
fn test_graph_schema_shape() {
    let h = TestHarness::from_fixture("basic");
    let schema = h.call("get_graph_schema", json!({}));
    let entry = &schema["projects"][0]["schema"];
    assert!(entry["node_labels"]
        .as_array()
        .unwrap()
        .iter()
        .any(|l| l["label"] == json!("Function")));
    assert!(entry["relationship_types"]
        .as_array()
        .unwrap()
        .iter()
        .any(|t| t["type"] == json!("CALLS")));
    assert!(entry["sample_function_names"]
        .as_array()
        .unwrap()
        .iter()
        .any(|n| n == &json!("Hello")));
}

#[test]
fn test_get_code_snippet() {
    let h = TestHarness::from_fixture("basic");
    let search = h.call(
        "search_graph",
        json!({ "label": "Function", "name_pattern": "^Hello$" }),
    );
    let qname = search["results"][0]["qualified_name"].as_str().unwrap();

    let snippet = h.call("get_code_snippet", json!({ "qualified_name": qname }));
    assert_eq!(snippet["name"], json!("Hello"));
    assert!(snippet["source"].as_str().unwrap().contains("func Hello() string"));

    let miss = h.call("get_code_snippet", json!({ "qualified_name": "no.such.symbol" }));
    assert!(miss["error"].as_str().unwrap().contains("symbol not found"));
}

#[test]
fn test_read_file_and_range() {
    let h = TestHarness::from_fixture("basic");
    let full = h.call("read_file", json!({ "path": "main.go" }));
    assert!(full["content"].as_str().unwrap().contains("func main()"));
    assert!(full["total_lines"].as_i64().unwrap() >= 8);

    let range = h.call("read_file", json!({ "path": "main.go", "start_line": 3, "end_line": 5 }));
    assert_eq!(range["range"], json!({ "start": 3, "end": 5 }));
    assert_eq!(range["content"].as_str().unwrap().lines().count(), 3);
}

#[test]
fn test_list_directory() {
    let h = TestHarness::from_fixture("basic");
    let listing = h.call("list_directory", json!({}));
    let names: Vec<&str> = listing["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"main.go"));
    assert!(names.contains(&"util.go"));

    let filtered = h.call("list_directory", json!({ "pattern": "util*" }));
    assert_eq!(filtered["count"], json!(1));
}

#[test]
fn test_search_code_pagination() {
    let h = TestHarness::from_fixture("basic");
    let result = h.call(
        "search_code",
        json!({ "pattern": "func", "max_results": 2, "offset": 0 }),
    );
    assert!(result["total"].as_i64().unwrap() >= 3);
    assert_eq!(result["matches"].as_array().unwrap().len(), 2);
    assert_eq!(result["has_more"], json!(true));
    assert!(result["files_count"].as_i64().unwrap() >= 2);
}

#[test]
fn test_malformed_cypher_is_surfaced() {
    let h = TestHarness::from_fixture("basic");
    let result = h.call("query_graph", json!({ "query": "DELETE EVERYTHING" }));
    assert!(result["error"].as_str().unwrap().contains("MATCH"));
}

#[test]
fn test_unknown_project_hint() {
    let h = TestHarness::from_fixture("basic");
    let result = h.call("search_graph", json!({ "project": "ghost" }));
    let message = result["error"].as_str().unwrap();
    assert!(message.contains("not indexed"), "unexpected error: {message}");
}
