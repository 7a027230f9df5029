//! C# source code parser for efcheck.
//!
//! This module provides a thin wrapper around tree-sitter and the C# grammar,
//! standardizing error handling for use throughout efcheck.

use tree_sitter::{Parser, Tree};

/// Parse error wrapper for tree-sitter failures.
#[derive(Debug)]
pub struct ParseError(pub String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParseError {}

/// Parse a C# source file into a concrete syntax tree.
///
/// tree-sitter recovers from syntax errors, so a file with errors still
/// yields a tree (containing `ERROR` nodes) and is analyzed on a best-effort
/// basis. A `ParseError` is only returned when the grammar cannot be loaded
/// or the parser gives up entirely.
///
/// # Memory Usage
///
/// The tree is held in memory for the duration of the analysis. Files larger
/// than [`crate::discovery::MAX_FILE_SIZE`] are skipped before parsing.
///
/// # Example
///
/// ```ignore
/// use efcheck::engine::parser::parse_source;
///
/// let tree = parse_source("class A { }").expect("valid C#");
/// assert_eq!(tree.root_node().kind(), "compilation_unit");
/// ```
pub fn parse_source(source: &str) -> Result<Tree, ParseError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_c_sharp::LANGUAGE.into())
        .map_err(|e| ParseError(format!("failed to load C# grammar: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| ParseError("parser returned no tree".to_string()))?;

    if tree.root_node().has_error() {
        tracing::debug!("source contains syntax errors; analyzing recovered tree");
    }

    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_compilation_unit() {
        let tree = parse_source("using System; class A { void M() { } }").unwrap();
        assert_eq!(tree.root_node().kind(), "compilation_unit");
        assert!(!tree.root_node().has_error());
    }

    #[test]
    fn test_recovers_from_syntax_errors() {
        let tree = parse_source("class A { void M( { }").unwrap();
        assert!(tree.root_node().has_error());
    }
}
