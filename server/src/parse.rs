//! Pooled tree-sitter parsers, one pool per language.
//!
//! Parsers are not cheap to construct and are not Sync, so each language keeps
//! a small free-list behind a mutex. A checkout is exclusive to one thread;
//! the parser returns to the pool when the call completes. Trees are released
//! by dropping them.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use tree_sitter::{Language, Parser, Tree};

use crate::types::{GraphError, Result};

// ---------------------------------------------------------------------------
// Grammar resolution
// ---------------------------------------------------------------------------

/// Map a registry language name to its tree-sitter grammar.
pub fn ts_language(language: &str) -> Option<Language> {
    match language {
        "rust" => Some(tree_sitter_rust::LANGUAGE.into()),
        "typescript" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "javascript" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "python" => Some(tree_sitter_python::LANGUAGE.into()),
        "go" => Some(tree_sitter_go::LANGUAGE.into()),
        "java" => Some(tree_sitter_java::LANGUAGE.into()),
        "c" => Some(tree_sitter_c::LANGUAGE.into()),
        "cpp" => Some(tree_sitter_cpp::LANGUAGE.into()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Per-language free-lists of configured parsers.
pub struct ParserPool {
    pools: Mutex<HashMap<String, Vec<Parser>>>,
}

impl ParserPool {
    fn new() -> Self {
        ParserPool { pools: Mutex::new(HashMap::new()) }
    }

    /// Check out a parser for `language`, creating one if the free-list is
    /// empty. Returns None for languages without a grammar (e.g. json).
    fn checkout(&self, language: &str) -> Option<Parser> {
        if let Some(parser) = self
            .pools
            .lock()
            .unwrap()
            .get_mut(language)
            .and_then(|list| list.pop())
        {
            return Some(parser);
        }
        let grammar = ts_language(language)?;
        let mut parser = Parser::new();
        parser.set_language(&grammar).ok()?;
        Some(parser)
    }

    fn release(&self, language: &str, parser: Parser) {
        self.pools
            .lock()
            .unwrap()
            .entry(language.to_string())
            .or_default()
            .push(parser);
    }

    /// Parse source bytes for the given language. The returned tree provides
    /// depth-first traversal, node-kind strings, byte ranges, and named-field
    /// lookup through the tree-sitter API.
    pub fn parse(&self, language: &str, source: &[u8]) -> Result<Tree> {
        let mut parser = self
            .checkout(language)
            .ok_or_else(|| GraphError::Parse(format!("no grammar for language: {language}")))?;
        let result = parser.parse(source, None);
        self.release(language, parser);
        result.ok_or_else(|| GraphError::Parse(format!("parse failed for language: {language}")))
    }
}

/// Process-wide parser pool.
pub fn pool() -> &'static ParserPool {
    static POOL: OnceLock<ParserPool> = OnceLock::new();
    POOL.get_or_init(ParserPool::new)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rust() {
        let tree = pool().parse("rust", b"fn main() {}\n").unwrap();
        assert_eq!(tree.root_node().kind(), "source_file");
    }

    #[test]
    fn test_parse_go() {
        let tree = pool()
            .parse("go", b"package main\nfunc main() {}\n")
            .unwrap();
        assert_eq!(tree.root_node().kind(), "source_file");
    }

    #[test]
    fn test_unknown_language_errors() {
        assert!(pool().parse("json", b"{}").is_err());
        assert!(pool().parse("cobol", b"x").is_err());
    }

    #[test]
    fn test_pool_reuse() {
        // Two sequential parses exercise the checkout/release path.
        for _ in 0..2 {
            let tree = pool().parse("python", b"def f():\n    pass\n").unwrap();
            assert_eq!(tree.root_node().kind(), "module");
        }
    }
}
