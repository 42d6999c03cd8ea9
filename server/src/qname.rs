//! Qualified-name builder — canonical dotted identifiers for every symbol.
//!
//! Shape: `<project>.<path elements>.<name>`, derived from the repo-relative
//! path with the extension stripped. Package-init elements (`__init__`) and
//! index files (`index`) are elided so `api/orders/__init__.py` and
//! `api/orders.py` name the same module.

/// Path elements that vanish from qualified names.
const ELIDED_STEMS: &[&str] = &["__init__", "index"];

/// Strip the extension from the final path element.
fn stem(element: &str) -> &str {
    element.rsplit_once('.').map(|(s, _)| s).unwrap_or(element)
}

/// Dotted path elements for a repo-relative file path, elisions applied.
fn path_elements(rel_path: &str) -> Vec<&str> {
    let mut elements: Vec<&str> = rel_path.split('/').filter(|p| !p.is_empty()).collect();
    if let Some(last) = elements.pop() {
        let last = stem(last);
        if !ELIDED_STEMS.contains(&last) && !last.is_empty() {
            elements.push(last);
        }
    }
    elements
}

/// Qualified name of the module represented by a file.
pub fn module_qname(project: &str, rel_path: &str) -> String {
    let mut parts = vec![project];
    parts.extend(path_elements(rel_path));
    parts.join(".")
}

/// Module qualified name with an explicit module name replacing the file
/// stem. Used for languages with a package clause (go, java), where every
/// file of a package shares one module.
pub fn module_qname_named(project: &str, rel_path: &str, module_name: &str) -> String {
    let mut elements = path_elements(rel_path);
    elements.pop();
    let mut parts = vec![project];
    parts.extend(elements);
    parts.push(module_name);
    parts.join(".")
}

/// Qualified name of a symbol in a file, optionally nested in a container
/// (class or interface) name.
pub fn symbol_qname(project: &str, rel_path: &str, container: Option<&str>, name: &str) -> String {
    let mut parts = vec![project.to_string()];
    parts.extend(path_elements(rel_path).iter().map(|s| s.to_string()));
    if let Some(container) = container {
        parts.push(container.to_string());
    }
    parts.push(name.to_string());
    parts.join(".")
}

/// Qualified name of a File node (keeps the extension so files and modules
/// never collide).
pub fn file_qname(project: &str, rel_path: &str) -> String {
    format!("{project}.{}", rel_path.replace('/', "."))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
