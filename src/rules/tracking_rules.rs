//! Change-tracking and loading-strategy rules.

use super::{visitor, Diagnostic, Fix, Rule, Severity};
use crate::engine::AnalysisContext;
use crate::fix::rewrite;
use crate::semantics::chain::{walk_chain, Origin};
use crate::semantics::methods::{self, ENTITY_RETURNING, PROJECTIONS, TRACKING_MARKERS, WRITE_CALLS};
use crate::semantics::syntax::{self, FUNCTION_KINDS, LAMBDA_KINDS};
use tree_sitter::Node;

const EF_NAMESPACE: &str = "Microsoft.EntityFrameworkCore";

/// Detects read-only entity queries that are tracked by the change tracker.
///
/// When a method never writes through the context, tracking the loaded
/// entities only costs memory and snapshot time.
///
/// # Example
/// ```csharp
/// // Bad
/// public List<Product> Catalog() => db.Products.Where(p => p.Listed).ToList();
///
/// // Good
/// public List<Product> Catalog() => db.Products.AsNoTracking().Where(p => p.Listed).ToList();
/// ```
pub struct MissingAsNoTrackingRule;

impl Rule for MissingAsNoTrackingRule {
    fn id(&self) -> &'static str {
        "missing-as-no-tracking"
    }

    fn name(&self) -> &'static str {
        "Missing AsNoTracking"
    }

    fn description(&self) -> &'static str {
        "Detects read-only entity queries in methods that never save, where AsNoTracking avoids change-tracking overhead"
    }

    fn default_severity(&self) -> Severity {
        Severity::Info
    }

    fn check(&self, ctx: &AnalysisContext) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for &node in ctx.invocations() {
            let Some(call) = syntax::as_call(node, ctx.source) else {
                continue;
            };
            if !methods::is_in(ENTITY_RETURNING, call.name) {
                continue;
            }
            let chain = walk_chain(ctx, node);
            if chain.origin != Origin::DbSet || !chain.is_server_side_call() {
                continue;
            }
            if chain.has_any(PROJECTIONS) || chain.has_any(TRACKING_MARKERS) {
                continue;
            }
            let Some(set) = chain.origin_node else {
                continue;
            };
            if writes_through_context(ctx, node) {
                continue;
            }

            let mut replacements = vec![rewrite::insert_after(ctx, set, ".AsNoTracking()")];
            replacements.extend(rewrite::ensure_using(ctx, EF_NAMESPACE));

            diagnostics.push(
                ctx.diagnostic(
                    self.id(),
                    self.default_severity(),
                    node,
                    format!(
                        "Read-only query on `{}` tracks every loaded entity",
                        ctx.text(set)
                    ),
                )
                .with_suggestion("Add `.AsNoTracking()` when the entities are not modified")
                .with_fix(Some(Fix {
                    description: "Insert `.AsNoTracking()`".to_string(),
                    replacements,
                })),
            );
        }

        diagnostics
    }
}

/// Whether the method containing `node` calls `SaveChanges`, `Add`,
/// `Update`, `Remove`, `Attach` or `Entry` on anything.
fn writes_through_context(ctx: &AnalysisContext<'_>, node: Node<'_>) -> bool {
    let Some(method) = visitor::ancestors(node)
        .find(|a| FUNCTION_KINDS.contains(&a.kind()) && !LAMBDA_KINDS.contains(&a.kind()))
    else {
        return false;
    };
    let mut writes = false;
    visitor::walk(method, |n| {
        if writes || n.kind() != "invocation_expression" {
            return;
        }
        if let Some(call) = syntax::as_call(n, ctx.source) {
            writes = methods::is_in(WRITE_CALLS, call.name);
        }
    });
    writes
}

/// Detects queries eagerly loading two or more collections in one SQL
/// statement.
///
/// Each additional `Include` joins another table; the row count becomes the
/// product of the collection sizes.
///
/// # Example
/// ```csharp
/// // Bad: Orders x Addresses rows per customer
/// db.Customers.Include(c => c.Orders).Include(c => c.Addresses).ToList();
///
/// // Good
/// db.Customers.Include(c => c.Orders).Include(c => c.Addresses).AsSplitQuery().ToList();
/// ```
pub struct CartesianExplosionRule;

impl Rule for CartesianExplosionRule {
    fn id(&self) -> &'static str {
        "cartesian-explosion"
    }

    fn name(&self) -> &'static str {
        "Cartesian Explosion"
    }

    fn description(&self) -> &'static str {
        "Detects queries with multiple Include calls and no AsSplitQuery/AsSingleQuery"
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
            if !methods::is_executing(call.name) {
                continue;
            }
            let chain = walk_chain(ctx, node);
            if !chain.is_server_side_call() {
                continue;
            }
            let includes = chain.count_before(chain.last_index(), "Include");
            if includes < 2 || chain.has_any(&["AsSplitQuery", "AsSingleQuery"]) {
                continue;
            }

            let fix = chain.origin_node.map(|set| {
                let mut replacements = vec![rewrite::insert_after(ctx, set, ".AsSplitQuery()")];
                replacements.extend(rewrite::ensure_using(ctx, EF_NAMESPACE));
                Fix {
                    description: "Insert `.AsSplitQuery()`".to_string(),
                    replacements,
                }
            });

            diagnostics.push(
                ctx.diagnostic(
                    self.id(),
                    self.default_severity(),
                    node,
                    format!("Query loads {includes} related collections with a single SQL statement"),
                )
                .with_suggestion("Add `.AsSplitQuery()` or configure split queries globally")
                .with_fix(fix),
            );
        }

        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::{apply_all, check_source};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_read_only_query_gets_no_tracking() {
        let source = r#"using System.Linq;
class Catalog {
    private readonly ShopDbContext _db;
    public List<Product> Listed() {
        return _db.Products.Where(p => p.Listed).ToList();
    }
}"#;
        let diagnostics = check_source(&MissingAsNoTrackingRule, source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Info);
        assert_eq!(
            apply_all(source, &diagnostics),
            r#"using System.Linq;
using Microsoft.EntityFrameworkCore;
class Catalog {
    private readonly ShopDbContext _db;
    public List<Product> Listed() {
        return _db.Products.AsNoTracking().Where(p => p.Listed).ToList();
    }
}"#
        );
    }

    #[test]
    fn test_method_that_saves_is_ignored() {
        let source = r#"
class S {
    async Task Rename(AppDbContext db, int id, string name) {
        var user = await db.Users.FirstAsync(u => u.Id == id);
        user.Name = name;
        await db.SaveChangesAsync();
    }
}"#;
        assert!(check_source(&MissingAsNoTrackingRule, source).is_empty());
    }

    #[test]
    fn test_projection_and_explicit_tracking_are_ignored() {
        let source = r#"
class S {
    void M(AppDbContext db) {
        var names = db.Users.Select(u => u.Name).ToList();
        var tracked = db.Users.AsTracking().ToList();
        var count = db.Users.Count();
    }
}"#;
        assert!(check_source(&MissingAsNoTrackingRule, source).is_empty());
    }

    #[test]
    fn test_shared_query_fix_applies_once() {
        let source = r#"using Microsoft.EntityFrameworkCore;
class S {
    void M(AppDbContext db) {
        var open = db.Orders.Where(o => o.Open);
        var first = open.First();
        var all = open.ToList();
    }
}"#;
        let diagnostics = check_source(&MissingAsNoTrackingRule, source);
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(
            apply_all(source, &diagnostics),
            r#"using Microsoft.EntityFrameworkCore;
class S {
    void M(AppDbContext db) {
        var open = db.Orders.AsNoTracking().Where(o => o.Open);
        var first = open.First();
        var all = open.ToList();
    }
}"#
        );
    }

    #[test]
    fn test_two_includes_without_split_query() {
        let source = r#"using Microsoft.EntityFrameworkCore;
class S {
    List<Customer> M(AppDbContext db) {
        return db.Customers.Include(c => c.Orders).Include(c => c.Addresses).ToList();
    }
}"#;
        let diagnostics = check_source(&CartesianExplosionRule, source);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("2 related collections"));
        assert_eq!(
            apply_all(source, &diagnostics),
            r#"using Microsoft.EntityFrameworkCore;
class S {
    List<Customer> M(AppDbContext db) {
        return db.Customers.AsSplitQuery().Include(c => c.Orders).Include(c => c.Addresses).ToList();
    }
}"#
        );
    }

    #[test]
    fn test_split_or_single_query_is_respected() {
        let source = r#"
class S {
    void M(AppDbContext db) {
        var a = db.Customers.Include(c => c.Orders).Include(c => c.Addresses).AsSplitQuery().ToList();
        var b = db.Customers.Include(c => c.Orders).Include(c => c.Addresses).AsSingleQuery().ToList();
        var d = db.Customers.Include(c => c.Orders).ThenInclude(o => o.Lines).ToList();
    }
}"#;
        assert!(check_source(&CartesianExplosionRule, source).is_empty());
    }
}
