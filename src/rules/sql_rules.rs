//! Raw SQL rules.

use super::{Diagnostic, Fix, Rule, Severity};
use crate::engine::AnalysisContext;
use crate::fix::rewrite;
use crate::semantics::symbols::DeclarationKind;
use crate::semantics::syntax;
use tree_sitter::Node;

/// Raw-SQL methods and their parameterizing counterparts.
const RAW_SQL_METHODS: &[(&str, &str)] = &[
    ("FromSqlRaw", "FromSqlInterpolated"),
    ("ExecuteSqlRaw", "ExecuteSqlInterpolated"),
    ("ExecuteSqlRawAsync", "ExecuteSqlInterpolatedAsync"),
    ("SqlQueryRaw", "SqlQuery"),
];

/// How many locals are followed back to the string they hold.
const MAX_LOCAL_DEPTH: usize = 3;

const STRING_LITERAL_KINDS: &[&str] = &[
    "string_literal",
    "verbatim_string_literal",
    "raw_string_literal",
];

/// How a SQL string was assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlShape {
    Interpolated,
    Concatenated,
    Formatted,
}

impl SqlShape {
    fn describe(self) -> &'static str {
        match self {
            SqlShape::Interpolated => "an interpolated string",
            SqlShape::Concatenated => "a concatenated string",
            SqlShape::Formatted => "a string.Format result",
        }
    }
}

/// Detects raw-SQL APIs given SQL text built from values.
///
/// Values interpolated or concatenated into the SQL string bypass
/// parameterization and allow SQL injection.
///
/// # Example
/// ```csharp
/// // Bad: name is spliced into the SQL text
/// db.Users.FromSqlRaw($"SELECT * FROM Users WHERE Name = '{name}'");
///
/// // Good: name becomes a DbParameter
/// db.Users.FromSqlInterpolated($"SELECT * FROM Users WHERE Name = {name}");
/// ```
pub struct RawSqlInjectionRule;

impl Rule for RawSqlInjectionRule {
    fn id(&self) -> &'static str {
        "raw-sql-injection"
    }

    fn name(&self) -> &'static str {
        "SQL Injection via Raw SQL"
    }

    fn description(&self) -> &'static str {
        "Detects FromSqlRaw/ExecuteSqlRaw/SqlQueryRaw given interpolated, concatenated or formatted SQL"
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn check(&self, ctx: &AnalysisContext) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for &node in ctx.invocations() {
            let Some(call) = syntax::as_call(node, ctx.source) else {
                continue;
            };
            let Some(&(_, safe_name)) = RAW_SQL_METHODS.iter().find(|(raw, _)| *raw == call.name) else {
                continue;
            };
            let Some(&sql) = call.args.first() else {
                continue;
            };
            let Some(shape) = sql_shape(ctx, sql, 0) else {
                continue;
            };

            // Only an interpolated string written in place converts safely.
            let direct_interpolation =
                shape == SqlShape::Interpolated && is_interpolated_with_holes(syntax::unwrap(sql));
            let fix = (direct_interpolation && call.args.len() == 1).then(|| Fix {
                description: format!("Use `{safe_name}`"),
                replacements: vec![rewrite::rename_method(ctx, &call, safe_name)],
            });

            diagnostics.push(
                ctx.diagnostic(
                    self.id(),
                    self.default_severity(),
                    node,
                    format!(
                        "`{}` is given {}; values become part of the SQL text",
                        call.name,
                        shape.describe()
                    ),
                )
                .with_suggestion(format!(
                    "Use `{safe_name}` with an interpolated string, or pass values as parameters"
                ))
                .with_fix(fix),
            );
        }

        diagnostics
    }
}

/// Classify a SQL argument; `None` when it is a constant or unknown.
fn sql_shape(ctx: &AnalysisContext<'_>, expr: Node<'_>, depth: usize) -> Option<SqlShape> {
    let expr = syntax::unwrap(expr);
    match expr.kind() {
        "interpolated_string_expression" => {
            is_interpolated_with_holes(expr).then_some(SqlShape::Interpolated)
        }
        "binary_expression" => {
            let op = expr.child_by_field_name("operator").map(|op| ctx.text(op));
            if op != Some("+") {
                return None;
            }
            let mut operands = Vec::new();
            flatten_concatenation(ctx, expr, &mut operands);
            let dynamic = operands.iter().any(|operand| {
                let operand = syntax::unwrap(*operand);
                !STRING_LITERAL_KINDS.contains(&operand.kind())
                    && !(operand.kind() == "interpolated_string_expression"
                        && !is_interpolated_with_holes(operand))
            });
            dynamic.then_some(SqlShape::Concatenated)
        }
        "invocation_expression" => {
            let call = syntax::as_call(expr, ctx.source)?;
            let host = call.receiver.map(|r| ctx.text(r));
            (call.name == "Format" && matches!(host, Some("string" | "String" | "System.String")))
                .then_some(SqlShape::Formatted)
        }
        "identifier" if depth < MAX_LOCAL_DEPTH => {
            let decl = ctx.symbols.lookup(ctx.text(expr), expr.start_byte())?;
            if decl.kind != DeclarationKind::Local {
                return None;
            }
            sql_shape(ctx, decl.initializer?, depth + 1)
        }
        _ => None,
    }
}

fn flatten_concatenation<'t>(ctx: &AnalysisContext<'_>, expr: Node<'t>, out: &mut Vec<Node<'t>>) {
    let expr = syntax::unwrap(expr);
    let is_plus = expr.kind() == "binary_expression"
        && expr.child_by_field_name("operator").map(|op| ctx.text(op)) == Some("+");
    if !is_plus {
        out.push(expr);
        return;
    }
    if let Some(left) = expr.child_by_field_name("left") {
        flatten_concatenation(ctx, left, out);
    }
    if let Some(right) = expr.child_by_field_name("right") {
        flatten_concatenation(ctx, right, out);
    }
}

fn is_interpolated_with_holes(expr: Node<'_>) -> bool {
    if expr.kind() != "interpolated_string_expression" {
        return false;
    }
    let mut cursor = expr.walk();
    let found = expr
        .named_children(&mut cursor)
        .any(|c| c.kind() == "interpolation");
    found
}
