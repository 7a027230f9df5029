use crate::rules::visitor;
use crate::rules::{Diagnostic, Severity};
use crate::semantics::symbols::SymbolTable;
use crate::semantics::syntax;
use crate::Config;
use std::path::Path;
use tree_sitter::{Node, Tree};

/// Context passed to rules during analysis
pub struct AnalysisContext<'a> {
    pub file_path: &'a Path,
    pub source: &'a str,
    pub tree: &'a Tree,
    pub config: &'a Config,
    pub symbols: SymbolTable<'a>,
    invocations: Vec<Node<'a>>,
}

impl<'a> AnalysisContext<'a> {
    pub fn new(file_path: &'a Path, source: &'a str, tree: &'a Tree, config: &'a Config) -> Self {
        let root = tree.root_node();
        let symbols = SymbolTable::build(root, source, config);
        let invocations = visitor::descendants_of_kind(root, "invocation_expression");
        Self {
            file_path,
            source,
            tree,
            config,
            symbols,
            invocations,
        }
    }

    /// Root node of the parsed file.
    pub fn root(&self) -> Node<'a> {
        self.tree.root_node()
    }

    /// Every `invocation_expression` in the file, in source order.
    pub fn invocations(&self) -> &[Node<'a>] {
        &self.invocations
    }

    /// Source text of `node`.
    pub fn text(&self, node: Node<'_>) -> &'a str {
        syntax::text(node, self.source)
    }

    /// Get 1-indexed line and column for a byte offset
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let mut line = 1;
        let mut col = 1;
        for (i, c) in self.source.char_indices() {
            if i >= offset {
                break;
            }
            if c == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        (line, col)
    }

    /// Get the source line at the given line number (1-indexed)
    pub fn get_line(&self, line_num: usize) -> Option<&'a str> {
        self.source.lines().nth(line_num.saturating_sub(1))
    }

    /// Build a diagnostic spanning `node`.
    pub fn diagnostic(
        &self,
        rule_id: &'static str,
        severity: Severity,
        node: Node<'_>,
        message: impl Into<String>,
    ) -> Diagnostic {
        let start = node.start_position();
        let end = node.end_position();
        Diagnostic {
            rule_id,
            severity,
            message: message.into(),
            file_path: self.file_path.to_path_buf(),
            line: start.row + 1,
            column: start.column + 1,
            end_line: Some(end.row + 1),
            end_column: Some(end.column + 1),
            suggestion: None,
            fix: None,
        }
    }
}
