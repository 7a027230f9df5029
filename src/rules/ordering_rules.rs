//! Rules for operators whose result depends on row order.

use super::{Diagnostic, Rule, Severity};
use crate::engine::AnalysisContext;
use crate::semantics::chain::walk_chain;
use crate::semantics::methods;
use crate::semantics::syntax;

const PAGING: &[&str] = &["Skip", "Take"];

/// Detects `Skip`/`Take` on a query with no `OrderBy`.
///
/// Without an ordering the database may return rows in any order, so
/// pages can overlap or miss rows.
pub struct UnorderedPaginationRule;

impl Rule for UnorderedPaginationRule {
    fn id(&self) -> &'static str {
        "unordered-pagination"
    }

    fn name(&self) -> &'static str {
        "Unordered Pagination"
    }

    fn description(&self) -> &'static str {
        "Detects Skip/Take on a query without OrderBy, which makes pages nondeterministic"
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
            if !call.is_any(PAGING) {
                continue;
            }
            let chain = walk_chain(ctx, node);
            let index = chain.last_index();
            if !chain.is_server_side_before(index) || chain.has_ordering_before(index) {
                continue;
            }
            // Report a `Skip(..).Take(..)` pair once.
            if chain.has_before(index, PAGING) {
                continue;
            }

            diagnostics.push(
                ctx.diagnostic(
                    self.id(),
                    self.default_severity(),
                    node,
                    format!("`{}` on a query without `OrderBy` returns rows in an undefined order", call.name),
                )
                .with_suggestion(format!("Add `OrderBy(...)` before `{}`", call.name)),
            );
        }

        diagnostics
    }
}

/// Detects `Last`/`LastOrDefault` on a query with no `OrderBy`.
///
/// EF Core cannot translate `Last` without an ordering and throws at
/// runtime.
pub struct LastWithoutOrderByRule;

impl Rule for LastWithoutOrderByRule {
    fn id(&self) -> &'static str {
        "last-without-order-by"
    }

    fn name(&self) -> &'static str {
        "Last Without OrderBy"
    }

    fn description(&self) -> &'static str {
        "Detects Last/LastOrDefault on a query without OrderBy, which EF Core rejects at runtime"
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
            if !matches!(methods::base_name(call.name), "Last" | "LastOrDefault") {
                continue;
            }
            let chain = walk_chain(ctx, node);
            let index = chain.last_index();
            if !chain.is_server_side_before(index) || chain.has_ordering_before(index) {
                continue;
            }

            diagnostics.push(
                ctx.diagnostic(
                    self.id(),
                    self.default_severity(),
                    node,
                    format!("`{}` requires an `OrderBy` and throws when translated without one", call.name),
                )
                .with_suggestion("Order the query, or use `OrderByDescending(...).First()`"),
            );
        }

        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::check_source;

    #[test]
    fn test_skip_take_without_order() {
        let source = r#"
class S {
    List<User> Page(AppDbContext db, int page) {
        return db.Users.Where(u => u.Active).Skip(page * 20).Take(20).ToList();
    }
}"#;
        let diagnostics = check_source(&UnorderedPaginationRule, source);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("`Skip`"));
    }

    #[test]
    fn test_ordered_pagination_is_fine() {
        let source = r#"
class S {
    void M(AppDbContext db, IOrderedQueryable<User> sorted, List<User> list) {
        var a = db.Users.OrderBy(u => u.Id).Skip(20).Take(20).ToList();
        var b = sorted.Skip(20).ToList();
        var c = list.Take(5).ToList();
        var d = db.Users.ToList().Take(5);
    }
}"#;
        assert!(check_source(&UnorderedPaginationRule, source).is_empty());
    }

    #[test]
    fn test_ordering_through_local() {
        let source = r#"
class S {
    void M(AppDbContext db) {
        var ordered = db.Users.OrderByDescending(u => u.CreatedAt);
        var top = ordered.Take(10).ToList();
    }
}"#;
        assert!(check_source(&UnorderedPaginationRule, source).is_empty());
    }

    #[test]
    fn test_last_without_order() {
        let source = r#"
class S {
    async Task M(AppDbContext db) {
        var newest = await db.Orders.LastOrDefaultAsync(o => o.Open);
        var last = db.Orders.OrderBy(o => o.Id).Last();
    }
}"#;
        let diagnostics = check_source(&LastWithoutOrderByRule, source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Error);
        assert!(diagnostics[0].message.contains("LastOrDefaultAsync"));
    }

    #[test]
    fn test_last_on_list_is_fine() {
        let source = "class S { void M(List<int> values) { var x = values.Last(); } }";
        assert!(check_source(&LastWithoutOrderByRule, source).is_empty());
    }
}
