//! Inline suppression support for efcheck diagnostics.
//!
//! Supports suppressing warnings with:
//! - `// efcheck-ignore: rule-id` - suppress rules on the next line
//! - `#pragma warning disable rule-id` / `restore` - suppress over a region
//! - `[SuppressMessage("efcheck", "rule-id")]` - suppress over a member

use crate::rules::visitor;
use crate::semantics::syntax;
use std::collections::{HashMap, HashSet};
use tree_sitter::{Node, Tree};

const IGNORE_MARKER: &str = "efcheck-ignore";
const SUPPRESS_CATEGORY: &str = "efcheck";

/// Member declarations a `SuppressMessage` attribute can cover.
const SUPPRESSIBLE_MEMBERS: &[&str] = &[
    "class_declaration",
    "struct_declaration",
    "record_declaration",
    "interface_declaration",
    "method_declaration",
    "constructor_declaration",
    "property_declaration",
    "local_function_statement",
];

/// A suppressed line range. `rule` of `None` covers every rule.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Region {
    rule: Option<String>,
    start: usize,
    end: usize,
}

impl Region {
    fn covers(&self, rule_id: &str, line: usize) -> bool {
        (self.start..=self.end).contains(&line)
            && self.rule.as_deref().is_none_or(|r| r == rule_id)
    }
}

/// Extracts all efcheck suppressions from a file.
pub struct SuppressionExtractor {
    /// Suppressions by line number: (line, set of suppressed rule IDs)
    /// A set containing "all" suppresses every rule
    pub line_suppressions: HashMap<usize, HashSet<String>>,
    regions: Vec<Region>,
}

impl SuppressionExtractor {
    /// Extract suppressions from source code and its syntax tree.
    pub fn new(source: &str, tree: &Tree) -> Self {
        let mut extractor = Self {
            line_suppressions: HashMap::new(),
            regions: Vec::new(),
        };

        extractor.extract_comment_suppressions(tree.root_node(), source);
        extractor.extract_pragma_regions(source);
        extractor.extract_attribute_suppressions(tree.root_node(), source);

        extractor
    }

    /// Check if a diagnostic at the given line should be suppressed.
    pub fn is_suppressed(&self, rule_id: &str, line: usize) -> bool {
        if let Some(suppressions) = self.line_suppressions.get(&line) {
            if suppressions.contains("all") || suppressions.contains(rule_id) {
                return true;
            }
        }

        self.regions.iter().any(|r| r.covers(rule_id, line))
    }

    /// Extract `// efcheck-ignore: rule-id` comments.
    ///
    /// Only real comment nodes count, so `//` inside a string literal is
    /// not a marker.
    fn extract_comment_suppressions(&mut self, root: Node<'_>, source: &str) {
        for comment in visitor::descendants_of_kind(root, "comment") {
            let Some(rest) = ignore_directive(syntax::text(comment, source)) else {
                continue;
            };

            let suppressions = self
                .line_suppressions
                .entry(comment.start_position().row + 2) // Suppress the *next* line
                .or_default();

            if rest.is_empty() || rest == "all" {
                suppressions.insert("all".to_string());
            } else {
                suppressions.extend(split_rule_ids(rest));
            }
        }
    }

    /// Extract `#pragma warning disable` / `restore` regions.
    fn extract_pragma_regions(&mut self, source: &str) {
        // Open regions keyed by rule; `None` is a bare `disable`.
        let mut open: HashMap<Option<String>, usize> = HashMap::new();

        for (line_num, line) in source.lines().enumerate() {
            let line_num = line_num + 1;
            let Some(directive) = line.trim_start().strip_prefix("#pragma") else {
                continue;
            };
            let Some(directive) = directive.trim_start().strip_prefix("warning") else {
                continue;
            };
            let directive = directive.split("//").next().unwrap_or_default().trim();

            if let Some(ids) = directive.strip_prefix("disable") {
                let ids: Vec<String> = split_rule_ids(ids).collect();
                if ids.is_empty() {
                    open.entry(None).or_insert(line_num);
                }
                for id in ids {
                    open.entry(Some(id)).or_insert(line_num);
                }
            } else if let Some(ids) = directive.strip_prefix("restore") {
                let ids: Vec<String> = split_rule_ids(ids).collect();
                let closing: Vec<Option<String>> = if ids.is_empty() {
                    open.keys().cloned().collect()
                } else {
                    ids.into_iter().map(Some).collect()
                };
                for rule in closing {
                    if let Some(start) = open.remove(&rule) {
                        self.regions.push(Region {
                            rule,
                            start,
                            end: line_num,
                        });
                    }
                }
            }
        }

        // Unclosed regions run to the end of the file.
        for (rule, start) in open {
            self.regions.push(Region {
                rule,
                start,
                end: usize::MAX,
            });
        }
    }

    /// Extract `[SuppressMessage("efcheck", "rule-id")]` on members.
    fn extract_attribute_suppressions(&mut self, root: Node<'_>, source: &str) {
        for attribute in visitor::descendants_of_kind(root, "attribute") {
            let Some(name) = attribute.child_by_field_name("name") else {
                continue;
            };
            let name = syntax::text(name, source);
            let simple = name.rsplit('.').next().unwrap_or(name);
            if !matches!(simple, "SuppressMessage" | "SuppressMessageAttribute") {
                continue;
            }

            let strings = attribute_strings(attribute, source);
            let [category, check_id, ..] = strings.as_slice() else {
                continue;
            };
            if !category.eq_ignore_ascii_case(SUPPRESS_CATEGORY) {
                continue;
            }
            // `"rule-id:Justification"` is accepted as well.
            let rule = check_id.split(':').next().unwrap_or_default().trim();
            if rule.is_empty() {
                continue;
            }

            let Some(member) = visitor::ancestors(attribute)
                .find(|n| SUPPRESSIBLE_MEMBERS.contains(&n.kind()))
            else {
                continue;
            };
            self.regions.push(Region {
                rule: (rule != "all").then(|| rule.to_string()),
                start: member.start_position().row + 1,
                end: member.end_position().row + 1,
            });
        }
    }
}

/// The rule list of a `// efcheck-ignore[: ids]` line comment.
///
/// The marker must end at a word boundary: `efcheck-ignored` is not one.
fn ignore_directive(comment: &str) -> Option<&str> {
    let body = comment.strip_prefix("//")?.trim_start();
    let rest = body.strip_prefix(IGNORE_MARKER)?;
    if rest
        .chars()
        .next()
        .is_some_and(|c| c != ':' && !c.is_whitespace())
    {
        return None;
    }
    Some(rest.trim_start_matches(':').trim())
}

/// Positional string arguments of an attribute, unquoted.
fn attribute_strings(attribute: Node<'_>, source: &str) -> Vec<String> {
    let mut strings = Vec::new();
    let mut cursor = attribute.walk();
    let Some(args) = attribute
        .named_children(&mut cursor)
        .find(|c| c.kind() == "attribute_argument_list")
    else {
        return strings;
    };

    let mut cursor = args.walk();
    for arg in args.named_children(&mut cursor) {
        if arg.kind() != "attribute_argument" {
            continue;
        }
        let Some(expr) = arg.named_child(arg.named_child_count().saturating_sub(1)) else {
            continue;
        };
        let text = syntax::text(expr, source);
        match expr.kind() {
            "string_literal" => strings.push(text.trim_matches('"').to_string()),
            "verbatim_string_literal" => {
                strings.push(text.trim_start_matches('@').trim_matches('"').to_string())
            }
            _ => {}
        }
    }
    strings
}

fn split_rule_ids(list: &str) -> impl Iterator<Item = String> + '_ {
    list.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::parser::parse_source;

    fn extract(source: &str) -> SuppressionExtractor {
        let tree = parse_source(source).unwrap();
        SuppressionExtractor::new(source, &tree)
    }

    #[test]
    fn test_comment_suppression() {
        let source = r#"
class A {
    void M() {
        // efcheck-ignore: n-plus-one-query
        var x = db.Users.ToList();
    }
}
"#;
        let extractor = extract(source);

        assert!(extractor.is_suppressed("n-plus-one-query", 5));
        assert!(!extractor.is_suppressed("n-plus-one-query", 6));
        assert!(!extractor.is_suppressed("sync-over-async", 5));
    }

    #[test]
    fn test_comment_suppression_all() {
        let source = r#"
class A {
    void M() {
        // efcheck-ignore
        var x = db.Users.ToList();
    }
}
"#;
        let extractor = extract(source);

        assert!(extractor.is_suppressed("n-plus-one-query", 5));
        assert!(extractor.is_suppressed("any-rule", 5));
    }

    #[test]
    fn test_comment_suppression_list() {
        let source = "class A {\n    // efcheck-ignore: sync-over-async, missing-as-no-tracking\n    int x;\n}\n";
        let extractor = extract(source);

        assert!(extractor.is_suppressed("sync-over-async", 3));
        assert!(extractor.is_suppressed("missing-as-no-tracking", 3));
        assert!(!extractor.is_suppressed("raw-sql-injection", 3));
    }

    #[test]
    fn test_marker_inside_string_is_ignored() {
        let source = r#"
class A {
    void M() {
        var url = "http://host/ // efcheck-ignore";
        var x = db.Users.ToList();
    }
}
"#;
        let extractor = extract(source);
        assert!(!extractor.is_suppressed("n-plus-one-query", 5));
    }

    #[test]
    fn test_marker_needs_word_boundary() {
        let source = "class A {\n    // efcheck-ignorefoo\n    int x;\n    // efcheck-ignored: all\n    int y;\n}\n";
        let extractor = extract(source);
        assert!(!extractor.is_suppressed("any-rule", 3));
        assert!(!extractor.is_suppressed("any-rule", 5));
    }

    #[test]
    fn test_trailing_comment_suppresses_next_line() {
        let source = "class A {\n    int x; // efcheck-ignore: raw-sql-injection\n    int y;\n}\n";
        let extractor = extract(source);
        assert!(extractor.is_suppressed("raw-sql-injection", 3));
        assert!(!extractor.is_suppressed("raw-sql-injection", 2));
    }

    #[test]
    fn test_ignore_directive_forms() {
        assert_eq!(ignore_directive("// efcheck-ignore"), Some(""));
        assert_eq!(ignore_directive("//efcheck-ignore: a, b"), Some("a, b"));
        assert_eq!(ignore_directive("// efcheck-ignore all"), Some("all"));
        assert_eq!(ignore_directive("// efcheck-ignorefoo"), None);
        assert_eq!(ignore_directive("/* efcheck-ignore */"), None);
    }

    #[test]
    fn test_pragma_region() {
        let source = r#"class A {
#pragma warning disable sync-over-async
    void M() { db.SaveChanges(); }
#pragma warning restore sync-over-async
    void N() { db.SaveChanges(); }
}
"#;
        let extractor = extract(source);

        assert!(extractor.is_suppressed("sync-over-async", 3));
        assert!(!extractor.is_suppressed("sync-over-async", 5));
        assert!(!extractor.is_suppressed("n-plus-one-query", 3));
    }

    #[test]
    fn test_bare_pragma_runs_to_end_of_file() {
        let source = "class A {\n#pragma warning disable\n    int x;\n\n    int y;\n}\n";
        let extractor = extract(source);

        assert!(!extractor.is_suppressed("any-rule", 1));
        assert!(extractor.is_suppressed("any-rule", 3));
        assert!(extractor.is_suppressed("other-rule", 5));
    }

    #[test]
    fn test_attribute_suppression() {
        let source = r#"
class Repo {
    [SuppressMessage("efcheck", "missing-as-no-tracking", Justification = "entities are updated")]
    public List<User> Load(AppDbContext db) {
        return db.Users.ToList();
    }

    public List<User> Other(AppDbContext db) {
        return db.Users.ToList();
    }
}
"#;
        let extractor = extract(source);

        assert!(extractor.is_suppressed("missing-as-no-tracking", 5));
        assert!(!extractor.is_suppressed("missing-as-no-tracking", 9));
        assert!(!extractor.is_suppressed("n-plus-one-query", 5));
    }

    #[test]
    fn test_foreign_suppress_message_is_ignored() {
        let source = r#"
class Repo {
    [SuppressMessage("Performance", "CA1822")]
    public void Load() { }
}
"#;
        let extractor = extract(source);
        assert!(!extractor.is_suppressed("CA1822", 4));
    }

    #[test]
    fn test_no_suppression() {
        let source = "class A {\n    void M() { db.Users.ToList(); }\n}\n";
        let extractor = extract(source);

        assert!(!extractor.is_suppressed("n-plus-one-query", 2));
    }
}
