//! Round-trip rules.
//!
//! Detects queries and saves that run once per iteration of a loop or
//! per-item callback instead of once for the whole batch.

use super::{Diagnostic, Rule, Severity};
use crate::engine::AnalysisContext;
use crate::semantics::chain::{walk_chain, Origin};
use crate::semantics::methods;
use crate::semantics::scope;
use crate::semantics::syntax;

/// Detects N+1 query patterns - database queries executed inside loops.
///
/// Instead of fetching related rows in one query, the code runs one query
/// per element of an outer collection.
///
/// # Example
/// ```csharp
/// // Bad: one query per order
/// foreach (var order in orders)
/// {
///     var customer = db.Customers.Find(order.CustomerId);
/// }
///
/// // Good: one query for all orders
/// var ids = orders.Select(o => o.CustomerId).ToList();
/// var customers = db.Customers.Where(c => ids.Contains(c.Id)).ToDictionary(c => c.Id);
/// ```
pub struct NPlusOneQueryRule;

impl Rule for NPlusOneQueryRule {
    fn id(&self) -> &'static str {
        "n-plus-one-query"
    }

    fn name(&self) -> &'static str {
        "N+1 Query Detection"
    }

    fn description(&self) -> &'static str {
        "Detects database queries inside loops that could be batched into a single query"
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
            let executes = methods::is_executing(call.name) || methods::base_name(call.name) == "Find";
            if !executes {
                continue;
            }
            let chain = walk_chain(ctx, node);
            if !chain.is_server_side_call() {
                continue;
            }
            let Some(repetition) = scope::enclosing_repetition(ctx, node) else {
                continue;
            };

            diagnostics.push(
                ctx.diagnostic(
                    self.id(),
                    self.default_severity(),
                    node,
                    format!(
                        "Database query `{}` executed inside {} (N+1 query pattern)",
                        call.name,
                        repetition.describe()
                    ),
                )
                .with_suggestion(
                    "Load the rows for all items with one query before the loop \
                     (e.g. `Where(x => ids.Contains(x.Id))` or `Include`) and look them up in memory",
                ),
            );
        }

        diagnostics
    }
}

/// Detects `SaveChanges` called once per loop iteration.
///
/// Each call opens a transaction and flushes pending changes in its own
/// round trip; batching the whole loop into one call is usually intended.
pub struct SaveChangesInLoopRule;

impl Rule for SaveChangesInLoopRule {
    fn id(&self) -> &'static str {
        "save-changes-in-loop"
    }

    fn name(&self) -> &'static str {
        "SaveChanges Inside Loop"
    }

    fn description(&self) -> &'static str {
        "Detects SaveChanges/SaveChangesAsync calls inside loops that could be issued once after the loop"
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
            if methods::base_name(call.name) != "SaveChanges" || !is_context_call(ctx, &call) {
                continue;
            }
            let Some(repetition) = scope::enclosing_repetition(ctx, node) else {
                continue;
            };

            diagnostics.push(
                ctx.diagnostic(
                    self.id(),
                    self.default_severity(),
                    node,
                    format!("`{}` called inside {}", call.name, repetition.describe()),
                )
                .with_suggestion("Stage all changes in the loop and call SaveChanges once after it"),
            );
        }

        diagnostics
    }
}

/// `ctx.SaveChanges()`, or a bare `SaveChanges()` inside a context class.
fn is_context_call(ctx: &AnalysisContext<'_>, call: &syntax::Call<'_>) -> bool {
    if call.receiver.is_none() {
        return scope::enclosing_type(call.node)
            .and_then(|t| t.child_by_field_name("name"))
            .is_some_and(|name| ctx.symbols.is_context_class(ctx.text(name)));
    }
    walk_chain(ctx, call.node).origin == Origin::Context
}
