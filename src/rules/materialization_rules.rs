//! Materialization rules.
//!
//! Detects queries pulled into memory too early: operators evaluated on the
//! client after `ToList`/`AsEnumerable`, double materialization, counting
//! through a list, and `Count()` used as an existence test.

use super::{Diagnostic, Fix, Rule, Severity};
use crate::engine::AnalysisContext;
use crate::fix::rewrite;
use crate::rules::visitor;
use crate::semantics::chain::{walk_chain, QueryChain};
use crate::semantics::methods::{self, IN_MEMORY_SWITCHES, MATERIALIZING, ROW_PRESERVING};
use crate::semantics::syntax::{self, Call};
use tree_sitter::Node;

/// Operators reported when applied right after an in-memory switch.
///
/// `Count`, `LongCount` and `Any` belong to `materialize-to-count`;
/// materializers belong to `redundant-materialization`.
const CLIENT_OPERATORS: &[&str] = &[
    "Where",
    "Select",
    "SelectMany",
    "OrderBy",
    "OrderByDescending",
    "GroupBy",
    "Join",
    "GroupJoin",
    "Skip",
    "Take",
    "SkipWhile",
    "TakeWhile",
    "Distinct",
    "DistinctBy",
    "First",
    "FirstOrDefault",
    "Single",
    "SingleOrDefault",
    "Last",
    "LastOrDefault",
    "ElementAt",
    "ElementAtOrDefault",
    "All",
    "Sum",
    "Min",
    "Max",
    "Average",
    "Contains",
];

/// The link right before the last one, when it switches a server-side
/// query into memory.
fn in_memory_switch<'c, 't>(chain: &'c QueryChain<'t>) -> Option<&'c Call<'t>> {
    let last = chain.last_index();
    if last == 0 {
        return None;
    }
    let switch = &chain.links[last - 1];
    (methods::is_in(IN_MEMORY_SWITCHES, switch.name) && chain.is_server_side_before(last - 1))
        .then_some(switch)
}

/// Detects LINQ operators evaluated in memory after the query was
/// materialized.
///
/// # Example
/// ```csharp
/// // Bad: loads every user, filters in memory
/// var admins = db.Users.ToList().Where(u => u.IsAdmin);
///
/// // Good: filter runs in SQL
/// var admins = db.Users.Where(u => u.IsAdmin).ToList();
/// ```
pub struct ClientSideEvaluationRule;

impl Rule for ClientSideEvaluationRule {
    fn id(&self) -> &'static str {
        "client-side-evaluation"
    }

    fn name(&self) -> &'static str {
        "Client-Side Evaluation"
    }

    fn description(&self) -> &'static str {
        "Detects LINQ operators applied after ToList/AsEnumerable that could run in the database"
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
            if !methods::is_in(CLIENT_OPERATORS, call.name) {
                continue;
            }
            let chain = walk_chain(ctx, node);
            let Some(switch) = in_memory_switch(&chain) else {
                continue;
            };

            diagnostics.push(
                ctx.diagnostic(
                    self.id(),
                    self.default_severity(),
                    node,
                    format!(
                        "`{}` runs in memory because the query was materialized by `{}`",
                        call.name, switch.name
                    ),
                )
                .with_suggestion(format!(
                    "Apply `{}` before `{}` so it is translated to SQL",
                    call.name, switch.name
                )),
            );
        }

        diagnostics
    }
}

/// Detects a materializing call on an already materialized query.
///
/// # Example
/// ```csharp
/// // Bad: copies the list twice
/// var ids = db.Users.ToList().ToArray();
///
/// // Good
/// var ids = db.Users.ToArray();
/// ```
pub struct RedundantMaterializationRule;

impl Rule for RedundantMaterializationRule {
    fn id(&self) -> &'static str {
        "redundant-materialization"
    }

    fn name(&self) -> &'static str {
        "Redundant Materialization"
    }

    fn description(&self) -> &'static str {
        "Detects ToList/ToArray/... applied to a query that was already materialized"
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
            if !methods::is_in(MATERIALIZING, call.name) {
                continue;
            }
            let chain = walk_chain(ctx, node);
            let Some(inner) = in_memory_switch(&chain) else {
                continue;
            };
            if !methods::is_in(MATERIALIZING, inner.name) {
                continue;
            }

            // Only sequence-preserving inner calls chained directly can go.
            let removable = matches!(inner.name, "ToList" | "ToArray")
                && call.member_access.is_some()
                && inner.node.parent() == call.member_access;
            let fix = removable.then(|| Fix {
                description: format!("Remove the inner `{}`", inner.name),
                replacements: rewrite::remove_call(ctx, inner).into_iter().collect(),
            });

            diagnostics.push(
                ctx.diagnostic(
                    self.id(),
                    self.default_severity(),
                    node,
                    format!(
                        "`{}` is applied to a query already materialized by `{}`",
                        call.name, inner.name
                    ),
                )
                .with_suggestion(format!("Remove the inner `{}`", inner.name))
                .with_fix(fix),
            );
        }

        diagnostics
    }
}

/// Detects counting or existence checks done on a materialized list.
///
/// # Example
/// ```csharp
/// // Bad: loads every order just to count them
/// var n = db.Orders.ToList().Count;
///
/// // Good: SELECT COUNT(*)
/// var n = db.Orders.Count();
/// ```
pub struct MaterializeToCountRule;

impl Rule for MaterializeToCountRule {
    fn id(&self) -> &'static str {
        "materialize-to-count"
    }

    fn name(&self) -> &'static str {
        "Materialize to Count"
    }

    fn description(&self) -> &'static str {
        "Detects .ToList().Count, .Count() or .Any() that load all rows instead of counting in the database"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, ctx: &AnalysisContext) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        // `.Count` / `.Length` properties
        visitor::walk(ctx.root(), |node| {
            if node.kind() != "member_access_expression" {
                return;
            }
            let Some(member) = node.child_by_field_name("name").map(|n| ctx.text(n)) else {
                return;
            };
            if member != "Count" && member != "Length" {
                return;
            }
            if node
                .parent()
                .is_some_and(|p| p.kind() == "invocation_expression" && p.child_by_field_name("function") == Some(node))
            {
                return;
            }
            let Some(target) = node.child_by_field_name("expression") else {
                return;
            };
            let Some(inner) = materialized_call(ctx, target) else {
                return;
            };

            let fix = count_rewrite(ctx, node, &inner, "Count", "()");
            diagnostics.push(self.report(
                ctx,
                node,
                &inner,
                &format!("{}().{member}", inner.name),
                "Count()",
                fix,
            ));
        });

        // `.Count()` / `.LongCount()` / `.Any()` calls
        for &node in ctx.invocations() {
            let Some(call) = syntax::as_call(node, ctx.source) else {
                continue;
            };
            if !call.is_any(&["Count", "LongCount", "Any"]) {
                continue;
            }
            let Some(receiver) = call.receiver else {
                continue;
            };
            let Some(inner) = materialized_call(ctx, receiver) else {
                continue;
            };

            let args = call
                .args
                .iter()
                .map(|a| ctx.text(*a))
                .collect::<Vec<_>>()
                .join(", ");
            let fix = count_rewrite(ctx, node, &inner, call.name, &format!("({args})"));
            diagnostics.push(self.report(
                ctx,
                node,
                &inner,
                &format!("{}().{}()", inner.name, call.name),
                &format!("{}()", call.name),
                fix,
            ));
        }

        diagnostics
    }
}

impl MaterializeToCountRule {
    fn report(
        &self,
        ctx: &AnalysisContext<'_>,
        node: Node<'_>,
        inner: &Call<'_>,
        pattern: &str,
        replacement: &str,
        fix: Option<Fix>,
    ) -> Diagnostic {
        // Sets, dictionaries and lookups count distinct keys or groups.
        let suggestion = if methods::is_in(ROW_PRESERVING, inner.name) {
            format!("Call `{replacement}` on the query so it runs in the database")
        } else {
            format!(
                "`{}` counts keys or groups; express the count in the query (for example with `Distinct()` or `GroupBy`)",
                inner.name
            )
        };
        ctx.diagnostic(
            self.id(),
            self.default_severity(),
            node,
            format!("`{pattern}` loads every row to count them in memory"),
        )
        .with_suggestion(suggestion)
        .with_fix(fix)
    }
}

/// A materializing call on a server-side query at `expr`, looking through
/// parentheses and `await` (`(await q.ToListAsync()).Count`).
fn materialized_call<'t>(ctx: &AnalysisContext<'t>, expr: Node<'t>) -> Option<Call<'t>> {
    let mut expr = syntax::unwrap(expr);
    if let Some(operand) = syntax::await_operand(expr) {
        expr = syntax::unwrap(operand);
    }
    let call = syntax::as_call(expr, ctx.source)?;
    if !methods::is_in(IN_MEMORY_SWITCHES, call.name) {
        return None;
    }
    walk_chain(ctx, expr).is_server_side_call().then_some(call)
}

/// Replace `outer` with `{query}.{operator}{args}`, awaiting the async
/// operator when the materializer was awaited.
///
/// Only row-preserving materializers can be dropped: after `ToHashSet`,
/// `ToDictionary` or `ToLookup` the count and any predicate range over
/// distinct elements, pairs or groups.
fn count_rewrite(
    ctx: &AnalysisContext<'_>,
    outer: Node<'_>,
    inner: &Call<'_>,
    operator: &str,
    args: &str,
) -> Option<Fix> {
    if !methods::is_in(ROW_PRESERVING, inner.name) {
        return None;
    }
    let query = ctx.text(inner.receiver?);
    let new_text = if inner.name.ends_with("Async") {
        let awaited = format!("await {query}.{operator}Async{args}");
        if rewrite::needs_parentheses(outer) {
            format!("({awaited})")
        } else {
            awaited
        }
    } else {
        format!("{query}.{operator}{args}")
    };
    Some(Fix {
        description: format!("Use `{operator}()` on the query"),
        replacements: vec![rewrite::replace_node(ctx, outer, new_text)],
    })
}

/// Detects `Count()` compared with 0 or 1 to test whether rows exist.
///
/// # Example
/// ```csharp
/// // Bad: counts every matching row
/// if (db.Orders.Count(o => o.Open) > 0) { }
///
/// // Good: stops at the first row
/// if (db.Orders.Any(o => o.Open)) { }
/// ```
pub struct CountForExistenceRule;

impl Rule for CountForExistenceRule {
    fn id(&self) -> &'static str {
        "count-for-existence"
    }

    fn name(&self) -> &'static str {
        "Count Used for Existence Check"
    }

    fn description(&self) -> &'static str {
        "Detects Count() compared against 0 or 1 where Any() would stop at the first row"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, ctx: &AnalysisContext) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        visitor::walk(ctx.root(), |node| {
            if node.kind() != "binary_expression" {
                return;
            }
            let (Some(left), Some(op), Some(right)) = (
                node.child_by_field_name("left"),
                node.child_by_field_name("operator"),
                node.child_by_field_name("right"),
            ) else {
                return;
            };
            let op = ctx.text(op);

            let (count_side, literal, mirrored) = match (count_call(ctx, left), count_call(ctx, right)) {
                (Some(count), None) => (count, right, false),
                (None, Some(count)) => (count, left, true),
                _ => return,
            };
            let Some(negated) = existence_test(op, ctx.text(syntax::unwrap(literal)), mirrored) else {
                return;
            };
            let (call, awaited) = count_side;
            let Some(query) = call.receiver.map(|r| ctx.text(r)) else {
                return;
            };

            let args = call
                .args
                .iter()
                .map(|a| ctx.text(*a))
                .collect::<Vec<_>>()
                .join(", ");
            let bang = if negated { "!" } else { "" };
            let new_text = if awaited {
                format!("{bang}await {query}.AnyAsync({args})")
            } else {
                format!("{bang}{query}.Any({args})")
            };

            diagnostics.push(
                ctx.diagnostic(
                    self.id(),
                    self.default_severity(),
                    node,
                    format!(
                        "`{}` counts every matching row to test for existence",
                        ctx.text(node)
                    ),
                )
                .with_suggestion(format!("Use `{new_text}`"))
                .with_fix(Some(Fix {
                    description: "Use Any()".to_string(),
                    replacements: vec![rewrite::replace_node(ctx, node, new_text)],
                })),
            );
        });

        diagnostics
    }
}

/// A `Count()`/`LongCount()` call on a server-side query, or an awaited
/// `CountAsync()`; the flag tells whether it was awaited.
fn count_call<'t>(ctx: &AnalysisContext<'t>, expr: Node<'t>) -> Option<(Call<'t>, bool)> {
    let expr = syntax::unwrap(expr);
    let (invocation, awaited) = match syntax::await_operand(expr) {
        Some(operand) => (syntax::unwrap(operand), true),
        None => (expr, false),
    };
    let call = syntax::as_call(invocation, ctx.source)?;
    let expected: &[&str] = if awaited {
        &["CountAsync", "LongCountAsync"]
    } else {
        &["Count", "LongCount"]
    };
    if !call.is_any(expected) {
        return None;
    }
    walk_chain(ctx, invocation)
        .is_server_side_call()
        .then_some((call, awaited))
}

/// Whether `count {op} {literal}` (or `{literal} {op} count` when
/// `mirrored`) tests existence; `Some(true)` when it tests absence.
fn existence_test(op: &str, literal: &str, mirrored: bool) -> Option<bool> {
    let op = if mirrored {
        match op {
            "<" => ">",
            ">" => "<",
            "<=" => ">=",
            ">=" => "<=",
            other => other,
        }
    } else {
        op
    };
    match (op, literal) {
        (">", "0") | ("!=", "0") | (">=", "1") => Some(false),
        ("==", "0") | ("<", "1") | ("<=", "0") => Some(true),
        _ => None,
    }
}
