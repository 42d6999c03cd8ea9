//! Language registry — per-language AST descriptors as static data.
//!
//! Each `LanguageSpec` is a flat, mechanical description of which tree-sitter
//! node kinds denote functions, classes, calls, imports, and so on for one
//! language. The extraction pipeline is language-agnostic and is driven
//! entirely by these descriptors; adding a language means adding a constant
//! and a grammar, not code.

use std::collections::HashMap;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Spec descriptor
// ---------------------------------------------------------------------------

/// Pure data descriptor for one language. All slices are node-kind strings
/// from the language's tree-sitter grammar.
#[derive(Debug)]
pub struct LanguageSpec {
    pub language: &'static str,
    pub file_extensions: &'static [&'static str],
    pub function_node_kinds: &'static [&'static str],
    pub class_node_kinds: &'static [&'static str],
    pub field_node_kinds: &'static [&'static str],
    pub module_node_kinds: &'static [&'static str],
    pub call_node_kinds: &'static [&'static str],
    pub import_node_kinds: &'static [&'static str],
    /// Marker files whose presence makes a directory a package root.
    pub package_indicators: &'static [&'static str],
    pub branching_node_kinds: &'static [&'static str],
    pub variable_node_kinds: &'static [&'static str],
    pub assignment_node_kinds: &'static [&'static str],
    pub throw_node_kinds: &'static [&'static str],
    /// Field name of a declared-throws clause, when the grammar has one.
    pub throws_clause_field: Option<&'static str>,
    pub decorator_node_kinds: &'static [&'static str],
    /// Bare function names that read environment variables.
    pub env_access_functions: &'static [&'static str],
    /// Dotted member patterns that read environment variables.
    pub env_access_member_patterns: &'static [&'static str],
}

impl LanguageSpec {
    pub fn is_function_kind(&self, kind: &str) -> bool {
        self.function_node_kinds.contains(&kind)
    }
    pub fn is_class_kind(&self, kind: &str) -> bool {
        self.class_node_kinds.contains(&kind)
    }
    pub fn is_call_kind(&self, kind: &str) -> bool {
        self.call_node_kinds.contains(&kind)
    }
    pub fn is_import_kind(&self, kind: &str) -> bool {
        self.import_node_kinds.contains(&kind)
    }
    pub fn is_field_kind(&self, kind: &str) -> bool {
        self.field_node_kinds.contains(&kind)
    }
    pub fn is_decorator_kind(&self, kind: &str) -> bool {
        self.decorator_node_kinds.contains(&kind)
    }
    pub fn is_throw_kind(&self, kind: &str) -> bool {
        self.throw_node_kinds.contains(&kind)
    }
}

// ---------------------------------------------------------------------------
// Per-language constants
// ---------------------------------------------------------------------------

pub static RUST: LanguageSpec = LanguageSpec {
    language: "rust",
    file_extensions: &["rs"],
    function_node_kinds: &["function_item", "function_signature_item"],
    class_node_kinds: &["struct_item", "enum_item", "trait_item", "impl_item", "type_item", "union_item"],
    field_node_kinds: &["field_declaration"],
    module_node_kinds: &["source_file"],
    call_node_kinds: &["call_expression", "macro_invocation"],
    import_node_kinds: &["use_declaration"],
    package_indicators: &["Cargo.toml"],
    branching_node_kinds: &["if_expression", "match_expression", "while_expression", "for_expression", "loop_expression"],
    variable_node_kinds: &["let_declaration", "const_item", "static_item"],
    assignment_node_kinds: &["assignment_expression", "compound_assignment_expr"],
    throw_node_kinds: &[],
    throws_clause_field: None,
    decorator_node_kinds: &["attribute_item"],
    env_access_functions: &["var", "var_os"],
    env_access_member_patterns: &["env::var", "std::env::var"],
};

pub static PYTHON: LanguageSpec = LanguageSpec {
    language: "python",
    file_extensions: &["py", "pyi"],
    function_node_kinds: &["function_definition"],
    class_node_kinds: &["class_definition"],
    field_node_kinds: &[],
    module_node_kinds: &["module"],
    call_node_kinds: &["call"],
    import_node_kinds: &["import_statement", "import_from_statement"],
    package_indicators: &["__init__.py", "pyproject.toml", "setup.py"],
    branching_node_kinds: &["if_statement", "for_statement", "while_statement", "try_statement", "match_statement"],
    variable_node_kinds: &["assignment"],
    assignment_node_kinds: &["assignment", "augmented_assignment"],
    throw_node_kinds: &["raise_statement"],
    throws_clause_field: None,
    decorator_node_kinds: &["decorator"],
    env_access_functions: &["getenv"],
    env_access_member_patterns: &["os.environ", "os.getenv", "environ.get"],
};

pub static JAVASCRIPT: LanguageSpec = LanguageSpec {
    language: "javascript",
    file_extensions: &["js", "jsx", "mjs", "cjs"],
    function_node_kinds: &["function_declaration", "function_expression", "arrow_function", "method_definition", "generator_function_declaration"],
    class_node_kinds: &["class_declaration"],
    field_node_kinds: &["field_definition"],
    module_node_kinds: &["program"],
    call_node_kinds: &["call_expression", "new_expression"],
    import_node_kinds: &["import_statement"],
    package_indicators: &["package.json"],
    branching_node_kinds: &["if_statement", "switch_statement", "for_statement", "for_in_statement", "while_statement", "try_statement"],
    variable_node_kinds: &["variable_declaration", "lexical_declaration"],
    assignment_node_kinds: &["assignment_expression", "augmented_assignment_expression"],
    throw_node_kinds: &["throw_statement"],
    throws_clause_field: None,
    decorator_node_kinds: &["decorator"],
    env_access_functions: &[],
    env_access_member_patterns: &["process.env"],
};

pub static TYPESCRIPT: LanguageSpec = LanguageSpec {
    language: "typescript",
    file_extensions: &["ts", "tsx"],
    function_node_kinds: &["function_declaration", "function_expression", "arrow_function", "method_definition", "function_signature", "method_signature"],
    class_node_kinds: &["class_declaration", "abstract_class_declaration", "interface_declaration", "enum_declaration", "type_alias_declaration"],
    field_node_kinds: &["public_field_definition", "property_signature"],
    module_node_kinds: &["program"],
    call_node_kinds: &["call_expression", "new_expression"],
    import_node_kinds: &["import_statement"],
    package_indicators: &["package.json", "tsconfig.json"],
    branching_node_kinds: &["if_statement", "switch_statement", "for_statement", "for_in_statement", "while_statement", "try_statement"],
    variable_node_kinds: &["variable_declaration", "lexical_declaration"],
    assignment_node_kinds: &["assignment_expression", "augmented_assignment_expression"],
    throw_node_kinds: &["throw_statement"],
    throws_clause_field: None,
    decorator_node_kinds: &["decorator"],
    env_access_functions: &[],
    env_access_member_patterns: &["process.env"],
};

pub static GO: LanguageSpec = LanguageSpec {
    language: "go",
    file_extensions: &["go"],
    function_node_kinds: &["function_declaration", "method_declaration"],
    class_node_kinds: &["type_declaration"],
    field_node_kinds: &["field_declaration"],
    module_node_kinds: &["source_file"],
    call_node_kinds: &["call_expression"],
    import_node_kinds: &["import_declaration"],
    package_indicators: &["go.mod"],
    branching_node_kinds: &["if_statement", "for_statement", "expression_switch_statement", "type_switch_statement", "select_statement"],
    variable_node_kinds: &["var_declaration", "short_var_declaration", "const_declaration"],
    assignment_node_kinds: &["assignment_statement"],
    throw_node_kinds: &[],
    throws_clause_field: None,
    decorator_node_kinds: &[],
    env_access_functions: &["Getenv", "LookupEnv"],
    env_access_member_patterns: &["os.Getenv", "os.LookupEnv"],
};

pub static JAVA: LanguageSpec = LanguageSpec {
    language: "java",
    file_extensions: &["java"],
    function_node_kinds: &["method_declaration", "constructor_declaration"],
    class_node_kinds: &["class_declaration", "interface_declaration", "enum_declaration", "record_declaration", "annotation_type_declaration"],
    field_node_kinds: &["field_declaration"],
    module_node_kinds: &["program"],
    call_node_kinds: &["method_invocation", "object_creation_expression"],
    import_node_kinds: &["import_declaration"],
    package_indicators: &["pom.xml", "build.gradle", "build.gradle.kts"],
    branching_node_kinds: &["if_statement", "switch_expression", "for_statement", "enhanced_for_statement", "while_statement", "try_statement"],
    variable_node_kinds: &["local_variable_declaration"],
    assignment_node_kinds: &["assignment_expression"],
    throw_node_kinds: &["throw_statement"],
    throws_clause_field: Some("throws"),
    decorator_node_kinds: &["annotation", "marker_annotation"],
    env_access_functions: &["getenv"],
    env_access_member_patterns: &["System.getenv"],
};

pub static C: LanguageSpec = LanguageSpec {
    language: "c",
    file_extensions: &["c", "h"],
    function_node_kinds: &["function_definition"],
    class_node_kinds: &["struct_specifier", "enum_specifier", "union_specifier", "type_definition"],
    field_node_kinds: &["field_declaration"],
    module_node_kinds: &["translation_unit"],
    call_node_kinds: &["call_expression"],
    import_node_kinds: &["preproc_include"],
    package_indicators: &["Makefile", "CMakeLists.txt"],
    branching_node_kinds: &["if_statement", "switch_statement", "for_statement", "while_statement"],
    variable_node_kinds: &["declaration"],
    assignment_node_kinds: &["assignment_expression"],
    throw_node_kinds: &[],
    throws_clause_field: None,
    decorator_node_kinds: &[],
    env_access_functions: &["getenv"],
    env_access_member_patterns: &[],
};

pub static CPP: LanguageSpec = LanguageSpec {
    language: "cpp",
    file_extensions: &["cpp", "cc", "cxx", "hpp", "hh", "hxx"],
    function_node_kinds: &["function_definition"],
    class_node_kinds: &["class_specifier", "struct_specifier", "enum_specifier", "union_specifier", "type_definition", "alias_declaration"],
    field_node_kinds: &["field_declaration"],
    module_node_kinds: &["translation_unit"],
    call_node_kinds: &["call_expression"],
    import_node_kinds: &["preproc_include"],
    package_indicators: &["CMakeLists.txt"],
    branching_node_kinds: &["if_statement", "switch_statement", "for_statement", "for_range_loop", "while_statement", "try_statement"],
    variable_node_kinds: &["declaration"],
    assignment_node_kinds: &["assignment_expression"],
    throw_node_kinds: &["throw_statement"],
    throws_clause_field: None,
    decorator_node_kinds: &[],
    env_access_functions: &["getenv"],
    env_access_member_patterns: &["std::getenv"],
};

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The JSON pseudo-language: accepted by discovery (a File node is emitted)
/// but carries no spec and contributes no symbols.
pub const JSON_LANGUAGE: &str = "json";

/// Extension → language resolution plus spec lookup. Built once at first use.
pub struct Registry {
    specs: Vec<&'static LanguageSpec>,
    by_language: HashMap<&'static str, &'static LanguageSpec>,
    by_extension: HashMap<&'static str, &'static str>,
}

impl Registry {
    fn new() -> Self {
        let mut reg = Registry {
            specs: Vec::new(),
            by_language: HashMap::new(),
            by_extension: HashMap::new(),
        };
        for spec in [&RUST, &TYPESCRIPT, &JAVASCRIPT, &PYTHON, &GO, &JAVA, &C, &CPP] {
            reg.register(spec);
        }
        reg
    }

    /// Register a spec. Re-registering the same language name is last-wins.
    fn register(&mut self, spec: &'static LanguageSpec) {
        if let Some(pos) = self.specs.iter().position(|s| s.language == spec.language) {
            self.specs[pos] = spec;
        } else {
            self.specs.push(spec);
        }
        self.by_language.insert(spec.language, spec);
        for ext in spec.file_extensions {
            self.by_extension.insert(ext, spec.language);
        }
    }

    pub fn spec(&self, language: &str) -> Option<&'static LanguageSpec> {
        self.by_language.get(language).copied()
    }

    /// Resolve a file extension to a language name. JSON resolves to the
    /// pseudo-language; everything else unknown returns None.
    pub fn language_for_ext(&self, ext: &str) -> Option<&'static str> {
        if ext == "json" {
            return Some(JSON_LANGUAGE);
        }
        self.by_extension.get(ext).copied()
    }

    pub fn all_specs(&self) -> &[&'static LanguageSpec] {
        &self.specs
    }
}

/// Global registry, initialized on first access.
pub fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::new)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
