//! Pass 1 — per-file structural extraction.
//!
//! Walks a file's AST driven entirely by its `LanguageSpec` and emits graph
//! nodes (Module, Class/Interface/Enum/Type, Function/Method, Route, File)
//! plus the raw material later passes resolve: unresolved call records,
//! import strings, route registrations, and outbound HTTP/async call sites.
//! Nothing here touches the store.

use regex::Regex;
use std::sync::OnceLock;
use tree_sitter::Node as TsNode;

use crate::lang::{registry, LanguageSpec, JSON_LANGUAGE};
use crate::parse::pool;
use crate::qname::{file_qname, module_qname, symbol_qname};
use crate::scan::DiscoveredFile;
use crate::types::*;

// ---------------------------------------------------------------------------
// Extraction output
// ---------------------------------------------------------------------------

/// A call (or read reference) whose target is not yet known.
#[derive(Debug, Clone)]
pub struct UnresolvedCall {
    pub caller_qname: String,
    pub callee_name: String,
    pub call_line: u32,
    pub language: &'static str,
    pub file_path: String,
    /// Identifier in a value position without invocation.
    pub is_usage: bool,
}

/// A server-side route registration found in this file.
#[derive(Debug, Clone)]
pub struct RouteRecord {
    /// Qualified name of the emitted Route node.
    pub qname: String,
    pub method: String,
    pub url_path: String,
    /// Simple name of the inferred handler.
    pub handler: String,
}

/// What kind of outbound dispatch a call site is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteKind {
    Http,
    Async,
}

/// A client-side call site with an extractable target.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub caller_qname: String,
    pub kind: SiteKind,
    /// HTTP verb when known.
    pub method: Option<String>,
    /// URL template for HTTP sites, parameter segments as `{param}`.
    pub url_template: Option<String>,
    /// Task/topic name for async sites.
    pub target_name: Option<String>,
    pub line: u32,
}

/// `implements` link awaiting interface resolution in pass 2.
#[derive(Debug, Clone)]
pub struct ImplementsRecord {
    pub type_qname: String,
    pub interface_name: String,
}

/// Member containment link (module → symbol, class → method).
#[derive(Debug, Clone)]
pub struct DefineRecord {
    pub container_qname: String,
    pub member_qname: String,
    pub is_method: bool,
}

/// Everything pass 1 produces for a single file.
#[derive(Debug, Default)]
pub struct FileExtraction {
    pub rel_path: String,
    pub language: &'static str,
    pub sha256: String,
    pub nodes: Vec<Node>,
    pub defines: Vec<DefineRecord>,
    pub calls: Vec<UnresolvedCall>,
    /// Raw import strings (module paths, include targets).
    pub imports: Vec<String>,
    pub routes: Vec<RouteRecord>,
    pub call_sites: Vec<CallSite>,
    pub impls: Vec<ImplementsRecord>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Extract one file. The JSON pseudo-language yields only a File node.
pub fn extract_file(
    project: &str,
    file: &DiscoveredFile,
    source: &[u8],
    sha256: String,
) -> Result<FileExtraction> {
    let mut out = FileExtraction {
        rel_path: file.rel_path.clone(),
        language: file.language,
        sha256,
        ..Default::default()
    };

    let line_count = source.iter().filter(|b| **b == b'\n').count() as u32 + 1;
    let file_node = Node::new(
        project,
        NodeLabel::File,
        file.rel_path.rsplit('/').next().unwrap_or(&file.rel_path),
        &file_qname(project, &file.rel_path),
        &file.rel_path,
    )
    .with_lines(1, line_count);
    out.nodes.push(file_node);

    if file.language == JSON_LANGUAGE {
        return Ok(out);
    }
    let Some(spec) = registry().spec(file.language) else {
        return Ok(out);
    };

    let tree = pool().parse(file.language, source)?;
    let root = tree.root_node();

    // Files carrying a package clause (go, java) share one module per
    // package; everything else gets a file-level module.
    let module_qn = match package_clause_name(root, source) {
        Some(package) => crate::qname::module_qname_named(project, &file.rel_path, &package),
        None => module_qname(project, &file.rel_path),
    };

    let mut walker = Walker {
        project,
        rel_path: &file.rel_path,
        spec,
        source,
        module_qname: module_qn,
        out: &mut out,
        constants: Vec::new(),
        env_vars: Vec::new(),
    };

    // Module node first so it is the containment root for the file.
    let module_name = walker
        .module_qname
        .rsplit('.')
        .next()
        .unwrap_or(&walker.module_qname)
        .to_string();
    let module_qn = walker.module_qname.clone();
    walker.out.nodes.push(
        Node::new(project, NodeLabel::Module, &module_name, &module_qn, &file.rel_path)
            .with_lines(1, line_count),
    );

    walker.walk(root, &mut Vec::new(), None);
    walker.finish_module(&module_qn);
    Ok(out)
}

// ---------------------------------------------------------------------------
// AST walker
// ---------------------------------------------------------------------------

/// One class-like container on the walk stack.
struct Container {
    qname: String,
    name: String,
}

struct Walker<'a> {
    project: &'a str,
    rel_path: &'a str,
    spec: &'static LanguageSpec,
    source: &'a [u8],
    module_qname: String,
    out: &'a mut FileExtraction,
    constants: Vec<String>,
    env_vars: Vec<String>,
}

impl<'a> Walker<'a> {
    fn text(&self, node: TsNode) -> &str {
        node.utf8_text(self.source).unwrap_or("")
    }

    fn line(&self, node: TsNode) -> u32 {
        node.start_position().row as u32 + 1
    }

    /// Attach collected module-level facts to the Module node.
    fn finish_module(&mut self, module_qn: &str) {
        let Some(module) = self.out.nodes.iter_mut().find(|n| n.qualified_name == module_qn)
        else {
            return;
        };
        if !self.constants.is_empty() {
            module
                .properties
                .insert("constants".into(), serde_json::json!(self.constants));
        }
        if !self.env_vars.is_empty() {
            self.env_vars.sort();
            self.env_vars.dedup();
            module
                .properties
                .insert("env_vars".into(), serde_json::json!(self.env_vars));
        }
    }

    fn walk(
        &mut self,
        node: TsNode,
        containers: &mut Vec<Container>,
        current_fn: Option<&str>,
    ) {
        let kind = node.kind();

        if self.spec.is_class_kind(kind) {
            self.visit_class(node, containers, current_fn);
            return;
        }
        if self.spec.is_function_kind(kind) {
            self.visit_function(node, containers);
            return;
        }
        if self.spec.is_import_kind(kind) {
            self.collect_import(node);
            // fall through: some import nodes nest call expressions (require)
        }
        if self.spec.is_call_kind(kind) {
            self.visit_call(node, current_fn);
            // descend for nested calls in arguments
        }
        if containers.is_empty()
            && current_fn.is_none()
            && self.spec.variable_node_kinds.contains(&kind)
        {
            self.collect_module_constant(node);
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child, containers, current_fn);
        }
    }

    // -- classes -------------------------------------------------------------

    fn visit_class(
        &mut self,
        node: TsNode,
        containers: &mut Vec<Container>,
        current_fn: Option<&str>,
    ) {
        let label = self.class_label(node);
        let Some(name) = self.class_name(node) else {
            // Anonymous or unnamed container: keep walking its body.
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                self.walk(child, containers, current_fn);
            }
            return;
        };

        let container_name = containers.last().map(|c| c.name.clone());
        let qname = symbol_qname(self.project, self.rel_path, container_name.as_deref(), &name);

        // Rust impl blocks reopen an existing type: reuse the type's qname and
        // skip emitting a second node.
        let is_reopen = node.kind() == "impl_item"
            && self.out.nodes.iter().any(|n| n.qualified_name == qname);
        if !is_reopen {
            let mut class_node = Node::new(
                self.project,
                label,
                &name,
                &qname,
                self.rel_path,
            )
            .with_lines(self.line(node), node.end_position().row as u32 + 1);
            let fields = self.collect_fields(node);
            if !fields.is_empty() {
                class_node.properties.insert("fields".into(), serde_json::json!(fields));
            }
            self.out.nodes.push(class_node);
            self.out.defines.push(DefineRecord {
                container_qname: self.module_qname.clone(),
                member_qname: qname.clone(),
                is_method: false,
            });
        }

        for interface in self.collect_implements(node) {
            self.out.impls.push(ImplementsRecord {
                type_qname: qname.clone(),
                interface_name: interface,
            });
        }

        containers.push(Container { qname: qname.clone(), name });
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child, containers, current_fn);
        }
        containers.pop();
    }

    /// Label for a class-kind node. Go hides struct vs interface inside the
    /// type_spec, so type_declaration is classified by its underlying type.
    fn class_label(&self, node: TsNode) -> NodeLabel {
        if node.kind() == "type_declaration" {
            let mut found = NodeLabel::Type;
            collect_kinds(node, &["struct_type", "interface_type"], &mut |inner| {
                found = if inner.kind() == "interface_type" {
                    NodeLabel::Interface
                } else {
                    NodeLabel::Class
                };
            });
            return found;
        }
        class_label_for_kind(node.kind())
    }

    fn class_name(&self, node: TsNode) -> Option<String> {
        for field in ["name", "type"] {
            if let Some(name_node) = node.child_by_field_name(field) {
                let text = self.text(name_node).trim();
                if !text.is_empty() {
                    // impl blocks can name generic types; keep the base name
                    let base = text.split('<').next().unwrap_or(text).trim();
                    return Some(base.to_string());
                }
            }
        }
        // Rust trait impls: `impl Trait for Type` — the "type" field covers it;
        // Go type_declaration wraps type_spec children.
        if node.kind() == "type_declaration" {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if child.kind() == "type_spec" {
                    if let Some(name_node) = child.child_by_field_name("name") {
                        return Some(self.text(name_node).trim().to_string());
                    }
                }
            }
        }
        None
    }

    /// Field names declared directly in this class body.
    fn collect_fields(&self, node: TsNode) -> Vec<String> {
        let mut fields = Vec::new();
        collect_kinds(node, self.spec.field_node_kinds, &mut |field_node| {
            let name = field_node
                .child_by_field_name("name")
                .or_else(|| field_node.named_child(0))
                .map(|n| n.utf8_text(self.source).unwrap_or("").trim().to_string())
                .unwrap_or_default();
            if !name.is_empty() && !fields.contains(&name) {
                fields.push(name);
            }
        });
        fields
    }

    /// Interface names this class declares it implements.
    fn collect_implements(&self, node: TsNode) -> Vec<String> {
        let mut out = Vec::new();
        // Rust: impl Trait for Type
        if node.kind() == "impl_item" {
            if let Some(trait_node) = node.child_by_field_name("trait") {
                let t = self.text(trait_node).trim();
                let base = t.split('<').next().unwrap_or(t).trim();
                if !base.is_empty() {
                    out.push(base.to_string());
                }
            }
            return out;
        }
        // TS/Java: heritage clauses
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            let ck = child.kind();
            if ck == "class_heritage" || ck == "implements_clause" || ck == "super_interfaces" {
                collect_kinds(child, &["type_identifier", "identifier"], &mut |id_node| {
                    let t = id_node.utf8_text(self.source).unwrap_or("").trim().to_string();
                    if !t.is_empty() && !out.contains(&t) {
                        out.push(t);
                    }
                });
            }
        }
        out
    }

    // -- functions -----------------------------------------------------------

    fn visit_function(&mut self, node: TsNode, containers: &mut Vec<Container>) {
        let Some(name) = self.function_name(node) else {
            return;
        };

        // Go methods name their receiver type; other languages nest in a class.
        let receiver = self.receiver_type(node);
        let container_name = receiver
            .clone()
            .or_else(|| containers.last().map(|c| c.name.clone()));
        let is_method = container_name.is_some();
        let label = if is_method { NodeLabel::Method } else { NodeLabel::Function };

        let qname =
            symbol_qname(self.project, self.rel_path, container_name.as_deref(), &name);
        let start = self.line(node);
        let end = node.end_position().row as u32 + 1;

        let mut fn_node = Node::new(self.project, label, &name, &qname, self.rel_path)
            .with_lines(start, end)
            .with_prop("signature", serde_json::json!(self.signature(node)));
        if let Some(ret) = self.return_type(node) {
            fn_node.properties.insert("return_type".into(), serde_json::json!(ret));
        }
        let complexity = self.complexity(node);
        if complexity > 1 {
            fn_node.properties.insert("complexity".into(), serde_json::json!(complexity));
        }
        let throws = self.collect_throws(node);
        if !throws.is_empty() {
            fn_node.properties.insert("throws".into(), serde_json::json!(throws));
        }
        let decorators = self.collect_decorators(node);
        if !decorators.is_empty() {
            fn_node
                .properties
                .insert("decorators".into(), serde_json::json!(decorators));
        }
        if name == "main" {
            fn_node.properties.insert("is_entry_point".into(), serde_json::json!(true));
        }
        self.out.nodes.push(fn_node);

        // Containment edge record. Go methods hang off their receiver type,
        // which may live in another file of the package (resolution skips the
        // edge when the type is unknown).
        match (containers.last(), &receiver) {
            (Some(container), None) => self.out.defines.push(DefineRecord {
                container_qname: container.qname.clone(),
                member_qname: qname.clone(),
                is_method: true,
            }),
            (_, Some(recv)) => self.out.defines.push(DefineRecord {
                container_qname: symbol_qname(self.project, self.rel_path, None, recv),
                member_qname: qname.clone(),
                is_method: true,
            }),
            (None, None) => self.out.defines.push(DefineRecord {
                container_qname: self.module_qname.clone(),
                member_qname: qname.clone(),
                is_method: false,
            }),
        }

        // Route decorators register this function as a handler.
        for decorator in &decorators {
            if let Some((method, path)) = parse_route_decorator(decorator) {
                self.push_route(method, path, name.clone());
            }
        }

        // Walk the body with this function as the call context.
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child, containers, Some(&qname));
        }
    }

    fn function_name(&self, node: TsNode) -> Option<String> {
        if let Some(name_node) = node.child_by_field_name("name") {
            let text = self.text(name_node).trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
        // C/C++: function_definition -> declarator -> identifier
        if let Some(decl) = node.child_by_field_name("declarator") {
            if let Some(inner) = decl.child_by_field_name("declarator") {
                return Some(self.text(inner).trim().to_string());
            }
            let text = self.text(decl).trim();
            if let Some(paren) = text.find('(') {
                return Some(text[..paren].trim().to_string());
            }
        }
        // Arrow functions bound to a variable: name comes from the declarator.
        if node.kind() == "arrow_function" || node.kind() == "function_expression" {
            if let Some(parent) = node.parent() {
                if parent.kind() == "variable_declarator" {
                    if let Some(name_node) = parent.child_by_field_name("name") {
                        return Some(self.text(name_node).trim().to_string());
                    }
                }
            }
            return None; // anonymous callback, not a symbol
        }
        None
    }

    /// Go receiver type, e.g. `func (s *Server) Run()` → `Server`.
    fn receiver_type(&self, node: TsNode) -> Option<String> {
        let receiver = node.child_by_field_name("receiver")?;
        let text = self.text(receiver);
        let cleaned = text.trim_matches(|c| c == '(' || c == ')');
        let type_part = cleaned.split_whitespace().last()?;
        let base = type_part.trim_start_matches('*');
        if base.is_empty() {
            None
        } else {
            Some(base.to_string())
        }
    }

    /// One-line display signature, body stripped.
    fn signature(&self, node: TsNode) -> String {
        let text = self.text(node);
        let first_line = text.lines().next().unwrap_or("").trim();
        let sig = if self.spec.language == "python" {
            first_line
                .find(':')
                .map(|colon| &first_line[..=colon])
                .unwrap_or(first_line)
        } else if let Some(brace) = first_line.find('{') {
            first_line[..brace].trim_end()
        } else {
            first_line
        };
        if sig.len() > 200 {
            let mut end = 200;
            while !sig.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &sig[..end])
        } else {
            sig.to_string()
        }
    }

    fn return_type(&self, node: TsNode) -> Option<String> {
        for field in ["return_type", "result"] {
            if let Some(ret) = node.child_by_field_name(field) {
                let text = self.text(ret).trim().trim_start_matches("->").trim();
                let text = text.trim_start_matches(':').trim();
                if !text.is_empty() {
                    return Some(text.to_string());
                }
            }
        }
        None
    }

    /// 1 + number of branching constructs in the body.
    fn complexity(&self, node: TsNode) -> u32 {
        let mut count = 1u32;
        collect_kinds(node, self.spec.branching_node_kinds, &mut |_| count += 1);
        count
    }

    fn collect_throws(&self, node: TsNode) -> Vec<String> {
        let mut throws = Vec::new();
        if let Some(field) = self.spec.throws_clause_field {
            if let Some(clause) = node.child_by_field_name(field) {
                collect_kinds(clause, &["type_identifier", "identifier", "scoped_type_identifier"], &mut |id| {
                    let t = id.utf8_text(self.source).unwrap_or("").trim().to_string();
                    if !t.is_empty() && !throws.contains(&t) {
                        throws.push(t);
                    }
                });
            }
        }
        collect_kinds(node, self.spec.throw_node_kinds, &mut |throw_node| {
            // First identifier-ish token after the keyword
            let text = throw_node.utf8_text(self.source).unwrap_or("");
            if let Some(name) = first_identifier(text) {
                if !throws.contains(&name) {
                    throws.push(name);
                }
            }
        });
        throws
    }

    /// Decorator/annotation text attached to this definition.
    fn collect_decorators(&self, node: TsNode) -> Vec<String> {
        let mut out = Vec::new();
        if self.spec.decorator_node_kinds.is_empty() {
            return out;
        }
        // Wrapping parent (python decorated_definition) or preceding siblings
        // (rust attribute_item, java modifiers).
        let mut seen = |n: TsNode, out: &mut Vec<String>| {
            if self.spec.is_decorator_kind(n.kind()) {
                let text = self.text(n).trim().to_string();
                if !text.is_empty() {
                    out.push(text);
                }
            }
        };
        if let Some(parent) = node.parent() {
            if parent.kind() == "decorated_definition" {
                let mut cursor = parent.walk();
                for child in parent.children(&mut cursor) {
                    seen(child, &mut out);
                }
                return out;
            }
            // Java puts annotations inside a modifiers child of the declaration.
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if child.kind() == "modifiers" {
                    let mut inner = child.walk();
                    for grandchild in child.children(&mut inner) {
                        seen(grandchild, &mut out);
                    }
                }
            }
            // Preceding siblings (rust attributes).
            let mut sibling = node.prev_sibling();
            while let Some(s) = sibling {
                if self.spec.is_decorator_kind(s.kind()) {
                    out.insert(0, self.text(s).trim().to_string());
                    sibling = s.prev_sibling();
                } else {
                    break;
                }
            }
        }
        out
    }

    // -- imports -------------------------------------------------------------

    /// Pull the imported module path out of an import directive. String-form
    /// imports (go, c includes, js) take the literal; keyword forms (python,
    /// java, rust use) take the dotted path.
    fn collect_import(&mut self, node: TsNode) {
        let text = self.text(node);
        if let Some(literal) = first_string_literal(text) {
            self.out.imports.push(literal);
            return;
        }
        static KEYWORD_RE: OnceLock<Regex> = OnceLock::new();
        let re = KEYWORD_RE.get_or_init(|| {
            Regex::new(r"(?:from\s+([\w.]+)\s+import|^\s*import\s+([\w.]+)|use\s+([\w:]+))")
                .unwrap()
        });
        if let Some(cap) = re.captures(text) {
            let path = cap
                .get(1)
                .or_else(|| cap.get(2))
                .or_else(|| cap.get(3))
                .map(|m| m.as_str().trim_matches(|c| c == ';' || c == '*').to_string());
            if let Some(path) = path {
                if !path.is_empty() {
                    self.out.imports.push(path);
                }
            }
        }
    }

    // -- calls ---------------------------------------------------------------

    fn visit_call(&mut self, node: TsNode, current_fn: Option<&str>) {
        let call_text = self.text(node).to_string();
        let call_text = call_text.as_str();
        let line = self.line(node);

        // Env access shows up on the module regardless of call context.
        self.collect_env_access(call_text);

        // Route registration by call (HandleFunc, app.get('/x', handler), ...).
        // Express-style registrations sit at module level, so this runs before
        // the caller check.
        if let Some((method, path, handler)) = parse_route_call(call_text) {
            self.push_route(method, path, handler.clone());
            if let Some(caller) = current_fn {
                // The handler reference is a read, not a call.
                self.out.calls.push(UnresolvedCall {
                    caller_qname: caller.to_string(),
                    callee_name: handler,
                    call_line: line,
                    language: self.spec.language,
                    file_path: self.rel_path.to_string(),
                    is_usage: true,
                });
            }
            return;
        }

        let Some(caller) = current_fn else {
            return; // module-level call, no caller symbol
        };

        // Outbound HTTP client call
        if let Some((method, url)) = parse_http_call(call_text) {
            self.out.call_sites.push(CallSite {
                caller_qname: caller.to_string(),
                kind: SiteKind::Http,
                method,
                url_template: Some(url),
                target_name: None,
                line,
            });
            return;
        }

        // Async dispatch (task queues, pub/sub)
        if let Some(target) = parse_async_dispatch(call_text) {
            self.out.call_sites.push(CallSite {
                caller_qname: caller.to_string(),
                kind: SiteKind::Async,
                method: None,
                url_template: None,
                target_name: Some(target),
                line,
            });
            return;
        }

        // Plain call: record for pass 2 resolution.
        if let Some(callee) = self.callee_name(node) {
            self.out.calls.push(UnresolvedCall {
                caller_qname: caller.to_string(),
                callee_name: callee,
                call_line: line,
                language: self.spec.language,
                file_path: self.rel_path.to_string(),
                is_usage: false,
            });
        }
    }

    /// Simple callee name: last segment of the function expression.
    fn callee_name(&self, node: TsNode) -> Option<String> {
        let func_node = node
            .child_by_field_name("function")
            .or_else(|| node.child_by_field_name("name"))
            .or_else(|| node.child_by_field_name("method"))
            .or_else(|| node.named_child(0))?;
        let text = self.text(func_node).trim();
        let name = text
            .rsplit_once("::")
            .map(|(_, n)| n)
            .or_else(|| text.rsplit_once('.').map(|(_, n)| n))
            .unwrap_or(text);
        let name = name.trim_end_matches('!'); // rust macros
        if name.is_empty()
            || !name.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
            || !name.chars().all(|c| c.is_alphanumeric() || c == '_')
        {
            return None;
        }
        Some(name.to_string())
    }

    fn collect_env_access(&mut self, call_text: &str) {
        let matched = self
            .spec
            .env_access_member_patterns
            .iter()
            .any(|p| call_text.contains(p))
            || self.spec.env_access_functions.iter().any(|f| {
                call_text
                    .split(|c: char| !c.is_alphanumeric() && c != '_')
                    .any(|tok| tok == *f)
            });
        if matched {
            if let Some(var) = first_string_literal(call_text) {
                self.env_vars.push(var);
            }
        }
    }

    // -- module constants ----------------------------------------------------

    fn collect_module_constant(&mut self, node: TsNode) {
        let text = self.text(node);
        let Some(name) = first_identifier(text) else {
            return;
        };
        let is_const = name.len() > 1
            && name.chars().all(|c| c.is_uppercase() || c.is_numeric() || c == '_');
        if is_const && !self.constants.contains(&name) {
            self.constants.push(name);
        }
    }

    // -- routes --------------------------------------------------------------

    fn push_route(&mut self, method: String, url_path: String, handler: String) {
        let slug: String = url_path
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        let qname = format!(
            "{}.route.{}_{}",
            self.module_qname,
            method.to_lowercase(),
            slug.trim_matches('_')
        );
        if self.out.routes.iter().any(|r| r.qname == qname) {
            return;
        }
        let node = Node::new(
            self.project,
            NodeLabel::Route,
            &format!("{method} {url_path}"),
            &qname,
            self.rel_path,
        )
        .with_prop("url_path", serde_json::json!(url_path.clone()))
        .with_prop("method", serde_json::json!(method.clone()))
        .with_prop("handler", serde_json::json!(handler.clone()));
        self.out.nodes.push(node);
        self.out.routes.push(RouteRecord { qname, method, url_path, handler });
    }
}

/// Package name from a top-level package clause, when the grammar has one.
/// Dotted java packages keep their last segment.
fn package_clause_name(root: TsNode, source: &[u8]) -> Option<String> {
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if child.kind() == "package_clause" || child.kind() == "package_declaration" {
            let text = child.utf8_text(source).unwrap_or("");
            let name = text
                .trim()
                .trim_start_matches("package")
                .trim()
                .trim_end_matches(';')
                .trim();
            let last = name.rsplit('.').next().unwrap_or(name);
            if !last.is_empty() && last.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Some(last.to_string());
            }
        }
    }
    None
}

/// Map a class-kind node string onto the node label taxonomy.
fn class_label_for_kind(kind: &str) -> NodeLabel {
    match kind {
        "interface_declaration" | "trait_item" | "annotation_type_declaration" => {
            NodeLabel::Interface
        }
        "enum_item" | "enum_declaration" | "enum_specifier" => NodeLabel::Enum,
        "type_item" | "type_alias_declaration" | "type_definition" | "alias_declaration" => {
            NodeLabel::Type
        }
        _ => NodeLabel::Class,
    }
}

/// Depth-first visit of every descendant whose kind is in `kinds`.
fn collect_kinds<'t>(node: TsNode<'t>, kinds: &[&str], visit: &mut impl FnMut(TsNode<'t>)) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if kinds.contains(&child.kind()) {
            visit(child);
        }
        collect_kinds(child, kinds, visit);
    }
}

fn first_identifier(text: &str) -> Option<String> {
    let mut start = None;
    for (i, c) in text.char_indices() {
        match start {
            None if c.is_alphabetic() || c == '_' => start = Some(i),
            Some(s) if !(c.is_alphanumeric() || c == '_') => {
                let word = &text[s..i];
                if is_keyword(word) {
                    start = None;
                    continue;
                }
                return Some(word.to_string());
            }
            _ => {}
        }
    }
    start.map(|s| text[s..].to_string()).filter(|w| !is_keyword(w))
}

fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        "let" | "const" | "static" | "var" | "pub" | "mut" | "new" | "raise" | "throw" | "final"
    )
}

fn first_string_literal(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#"["']([^"']+)["']"#).unwrap());
    re.captures(text).map(|c| c[1].to_string())
}

// ---------------------------------------------------------------------------
// Framework pattern tables
// ---------------------------------------------------------------------------

/// Route decorators: `@app.get("/x")`, `@router.route("/x", methods=["POST"])`,
/// Java `@GetMapping("/x")`, Rust `#[get("/x")]`.
fn parse_route_decorator(decorator: &str) -> Option<(String, String)> {
    static VERB_RE: OnceLock<Regex> = OnceLock::new();
    static ROUTE_RE: OnceLock<Regex> = OnceLock::new();
    static MAPPING_RE: OnceLock<Regex> = OnceLock::new();
    static ATTR_RE: OnceLock<Regex> = OnceLock::new();

    let verb_re = VERB_RE.get_or_init(|| {
        Regex::new(r#"@\w+\.(get|post|put|delete|patch|head|options)\(\s*[rf]?["']([^"']+)["']"#)
            .unwrap()
    });
    if let Some(cap) = verb_re.captures(decorator) {
        return Some((cap[1].to_uppercase(), cap[2].to_string()));
    }

    let route_re = ROUTE_RE.get_or_init(|| {
        Regex::new(r#"@\w+\.route\(\s*[rf]?["']([^"']+)["'](?:.*methods\s*=\s*\[["'](\w+)["'])?"#)
            .unwrap()
    });
    if let Some(cap) = route_re.captures(decorator) {
        let method = cap.get(2).map(|m| m.as_str().to_uppercase()).unwrap_or("GET".into());
        return Some((method, cap[1].to_string()));
    }

    let mapping_re = MAPPING_RE.get_or_init(|| {
        Regex::new(r#"@(Get|Post|Put|Delete|Patch|Request)Mapping\(\s*(?:value\s*=\s*)?["']([^"']+)["']"#)
            .unwrap()
    });
    if let Some(cap) = mapping_re.captures(decorator) {
        let verb = &cap[1];
        let method = if verb == "Request" { "GET".to_string() } else { verb.to_uppercase() };
        return Some((method, cap[2].to_string()));
    }

    let attr_re = ATTR_RE.get_or_init(|| {
        Regex::new(r##"#\[(get|post|put|delete|patch)\(\s*"([^"]+)""##).unwrap()
    });
    if let Some(cap) = attr_re.captures(decorator) {
        return Some((cap[1].to_uppercase(), cap[2].to_string()));
    }

    None
}

/// Route registration calls: `http.HandleFunc("/x", handler)`,
/// `router.GET("/x", handler)`, `app.get('/x', handler)`.
fn parse_route_call(call_text: &str) -> Option<(String, String, String)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r#"(?s)^\s*[\w.]*\.(HandleFunc|Handle|GET|POST|PUT|DELETE|PATCH|get|post|put|delete|patch)\(\s*["'`]([^"'`]+)["'`]\s*,\s*([\w.]+)"#,
        )
        .unwrap()
    });
    let cap = re.captures(call_text)?;
    let raw_method = &cap[1];
    let path = cap[2].to_string();
    if !path.starts_with('/') {
        return None; // e.g. client.get("http://...") is not a registration
    }
    let handler_expr = cap[3].to_string();
    let handler = handler_expr.rsplit('.').next().unwrap_or(&handler_expr).to_string();
    let method = match raw_method {
        "HandleFunc" | "Handle" => "GET".to_string(),
        other => other.to_uppercase(),
    };
    Some((method, path, handler))
}

/// Outbound HTTP client calls with an extractable URL template. Template
/// parameters (`${id}`, f-string `{id}`, `%s`) become `{param}` wildcards.
fn parse_http_call(call_text: &str) -> Option<(Option<String>, String)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r#"(?sx)
              (?:^|\W)
              (?: (?:requests|httpx|axios|http|client|reqwest|session) \.\s*
                  (get|post|put|delete|patch|Get|Post|Put|Delete|Patch) \(
                | (fetch) \(
              )
              \s* [rf]? ["'`] ([^"'`]+) ["'`]"#,
        )
        .unwrap()
    });
    let cap = re.captures(call_text)?;
    let url = cap.get(3)?.as_str();
    if !url.contains('/') {
        return None;
    }
    let method = cap.get(1).map(|m| m.as_str().to_uppercase());
    Some((method, normalize_url_template(url)))
}

/// Async dispatch primitives: celery `task.delay(...)` / `apply_async`,
/// `queue.publish("topic", ...)`, `producer.send("topic", ...)`.
fn parse_async_dispatch(call_text: &str) -> Option<String> {
    static DELAY_RE: OnceLock<Regex> = OnceLock::new();
    static TOPIC_RE: OnceLock<Regex> = OnceLock::new();

    let delay_re = DELAY_RE
        .get_or_init(|| Regex::new(r#"^\s*([\w.]+)\.(?:delay|apply_async)\("#).unwrap());
    if let Some(cap) = delay_re.captures(call_text) {
        let target = cap[1].rsplit('.').next().unwrap_or(&cap[1]).to_string();
        return Some(target);
    }

    let topic_re = TOPIC_RE.get_or_init(|| {
        Regex::new(
            r#"(?:^|\W)(?:\w+)\.(?:publish|send_task|send_message|emit|send)\(\s*[rf]?["'`]([^"'`]+)["'`]"#,
        )
        .unwrap()
    });
    if let Some(cap) = topic_re.captures(call_text) {
        return Some(cap[1].to_string());
    }
    None
}

/// Turn interpolation markers into `{param}` wildcards and strip the origin.
fn normalize_url_template(url: &str) -> String {
    static INTERP_RE: OnceLock<Regex> = OnceLock::new();
    let re = INTERP_RE
        .get_or_init(|| Regex::new(r"\$\{[^}]*\}|\{[^}]*\}|%[sd]|<[^>]*>").unwrap());
    let replaced = re.replace_all(url, "{param}").to_string();
    // Drop scheme+host: match on the path part only.
    if let Some(idx) = replaced.find("://") {
        let rest = &replaced[idx + 3..];
        if let Some(slash) = rest.find('/') {
            return rest[slash..].to_string();
        }
        return "/".to_string();
    }
    replaced
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
