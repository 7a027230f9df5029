//! Rules for expressions inside query lambdas that SQL translation handles
//! badly: functions applied to columns, and calls EF Core cannot translate.

use super::{Diagnostic, Fix, Rule, Severity};
use crate::engine::AnalysisContext;
use crate::fix::rewrite;
use crate::rules::visitor;
use crate::semantics::methods::{self, FILTER_OPERATORS};
use crate::semantics::scope::{self, QueryLambda};
use crate::semantics::syntax::{self, Call};
use std::collections::HashSet;
use tree_sitter::Node;

/// String functions that wrap a column and defeat an index on it.
const COLUMN_FUNCTIONS: &[&str] = &[
    "ToLower",
    "ToUpper",
    "ToLowerInvariant",
    "ToUpperInvariant",
    "Trim",
    "TrimStart",
    "TrimEnd",
];

/// Operators whose lambdas are excluded: EF Core evaluates the top-level
/// projection on the client.
const PROJECTION_OPERATORS: &[&str] = &["Select", "SelectMany"];

/// Detects functions applied to a column inside a query filter.
///
/// `WHERE LOWER(Email) = @p` cannot use an index on `Email`; the database
/// scans the table instead.
///
/// # Example
/// ```csharp
/// // Bad
/// db.Users.Where(u => u.Email.ToLower() == email.ToLower());
///
/// // Good: rely on a case-insensitive collation
/// db.Users.Where(u => u.Email == email);
/// ```
pub struct NonSargablePredicateRule;

impl Rule for NonSargablePredicateRule {
    fn id(&self) -> &'static str {
        "non-sargable-predicate"
    }

    fn name(&self) -> &'static str {
        "Non-Sargable Predicate"
    }

    fn description(&self) -> &'static str {
        "Detects ToLower/ToUpper/Trim applied to a column inside a query filter, which prevents index use"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, ctx: &AnalysisContext) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for &node in ctx.invocations() {
            let Some(call) = syntax::as_call(node, ctx.source) else {
                continue;
            };
            if !call.is_any(COLUMN_FUNCTIONS) {
                continue;
            }
            let Some(column) = call.receiver else {
                continue;
            };
            let Some(query) = scope::enclosing_query_lambda(ctx, node) else {
                continue;
            };
            if !methods::is_in(FILTER_OPERATORS, query.operator.name) {
                continue;
            }
            let rooted_in_row = syntax::unwrap(column).kind() == "member_access_expression"
                && syntax::root_identifier(column, ctx.source)
                    .is_some_and(|root| query.params.contains(&root));
            if !rooted_in_row {
                continue;
            }

            diagnostics.push(
                ctx.diagnostic(
                    self.id(),
                    self.default_severity(),
                    node,
                    format!(
                        "`{}()` on column `{}` inside `{}` prevents index use",
                        call.name,
                        ctx.text(column),
                        query.operator.name
                    ),
                )
                .with_suggestion(
                    "Compare the column directly and use a case-insensitive collation or normalize the stored value",
                ),
            );
        }

        diagnostics
    }
}

/// Detects local or instance method calls, and `StringComparison`
/// overloads, inside a query lambda.
///
/// EF Core cannot translate arbitrary methods; depending on the version it
/// throws or evaluates the whole predicate on the client.
///
/// # Example
/// ```csharp
/// // Bad
/// db.Orders.Where(o => o.CreatedAt > ComputeCutoff());
///
/// // Good: evaluated once, sent as a parameter
/// var computeCutoffValue = ComputeCutoff();
/// db.Orders.Where(o => o.CreatedAt > computeCutoffValue);
/// ```
pub struct UntranslatableMethodInQueryRule;

impl Rule for UntranslatableMethodInQueryRule {
    fn id(&self) -> &'static str {
        "untranslatable-method-in-query"
    }

    fn name(&self) -> &'static str {
        "Untranslatable Method in Query"
    }

    fn description(&self) -> &'static str {
        "Detects local/instance method calls and StringComparison overloads inside LINQ-to-Entities lambdas"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, ctx: &AnalysisContext) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let mut taken_names = HashSet::new();

        for &node in ctx.invocations() {
            let Some(call) = syntax::as_call(node, ctx.source) else {
                continue;
            };
            let Some(reason) = untranslatable_reason(ctx, &call) else {
                continue;
            };
            let Some(query) = scope::enclosing_query_lambda(ctx, node) else {
                continue;
            };
            if methods::is_in(PROJECTION_OPERATORS, query.operator.name) {
                continue;
            }
            if nested_in_untranslatable_call(ctx, node, query.lambda) {
                continue;
            }

            let fix = hoist_fix(ctx, &call, &query, &mut taken_names);
            diagnostics.push(
                ctx.diagnostic(
                    self.id(),
                    self.default_severity(),
                    node,
                    format!(
                        "{reason} inside `{}` cannot be translated to SQL",
                        query.operator.name
                    ),
                )
                .with_suggestion(if fix.is_some() {
                    "Evaluate the call once before the query and pass the result".to_string()
                } else {
                    "Rewrite the expression with translatable members or move it after materialization"
                        .to_string()
                })
                .with_fix(fix),
            );
        }

        diagnostics
    }
}

/// Why `call` cannot be translated, if it cannot.
fn untranslatable_reason(ctx: &AnalysisContext<'_>, call: &Call<'_>) -> Option<String> {
    let receiver = call.receiver.map(syntax::unwrap);
    match receiver {
        None if call.name != "nameof" => return Some(format!("Method `{}`", call.name)),
        Some(r) if r.kind() == "this_expression" => {
            return Some(format!("Instance method `{}`", call.name))
        }
        _ => {}
    }
    call.args
        .iter()
        .any(|arg| is_string_comparison(ctx, *arg))
        .then(|| format!("`{}` with a StringComparison argument", call.name))
}

fn is_string_comparison(ctx: &AnalysisContext<'_>, arg: Node<'_>) -> bool {
    let arg = syntax::unwrap(arg);
    arg.kind() == "member_access_expression"
        && arg
            .child_by_field_name("expression")
            .is_some_and(|e| syntax::type_base_name(ctx.text(e)) == "StringComparison")
}

/// Whether an enclosing call between `node` and `lambda` is reported too.
fn nested_in_untranslatable_call(ctx: &AnalysisContext<'_>, node: Node<'_>, lambda: Node<'_>) -> bool {
    visitor::ancestors(node)
        .take_while(|a| *a != lambda)
        .filter_map(|a| syntax::as_call(a, ctx.source))
        .any(|outer| untranslatable_reason(ctx, &outer).is_some())
}

/// Hoist a row-independent call into a local before the statement.
///
/// The call must not reference anything declared inside that statement:
/// the row parameters, an outer lambda's parameters, or loop and pattern
/// variables, none of which are in scope before it.
fn hoist_fix(
    ctx: &AnalysisContext<'_>,
    call: &Call<'_>,
    query: &QueryLambda<'_>,
    taken_names: &mut HashSet<String>,
) -> Option<Fix> {
    if syntax::references_any(call.node, ctx.source, &query.params) {
        return None;
    }
    let body = syntax::function_body(query.lambda)?;
    if body.kind() == "block" {
        return None;
    }
    let statement = scope::enclosing_statement(query.lambda)?;
    let bound_inside = syntax::declared_names(statement, ctx.source);
    if syntax::references_any(call.node, ctx.source, &bound_inside) {
        return None;
    }

    let base = format!("{}Value", syntax::lower_camel(call.name));
    let name = rewrite::unique_local_name(ctx, &base, taken_names);
    taken_names.insert(name.clone());

    Some(Fix {
        description: format!("Hoist `{}` into `{name}`", call.name),
        replacements: vec![
            rewrite::insert_local_before_statement(ctx, statement, &name, ctx.text(call.node)),
            rewrite::replace_node(ctx, call.node, name.as_str()),
        ],
    })
}
