//! Dependency-injection lifetime rules.

use super::{visitor, Diagnostic, Fix, Rule, Severity};
use crate::engine::AnalysisContext;
use crate::fix::rewrite;
use crate::semantics::syntax;
use tree_sitter::Node;

const SINGLETON_REGISTRATIONS: &[&str] = &["AddSingleton", "TryAddSingleton"];

/// Detects a `DbContext` registered as a singleton.
///
/// A context is not thread-safe and accumulates tracked entities; one
/// instance shared by every request corrupts state under concurrency.
///
/// # Example
/// ```csharp
/// // Bad
/// services.AddSingleton<ShopDbContext>();
///
/// // Good: scoped per request
/// services.AddDbContext<ShopDbContext>();
/// ```
pub struct DbContextSingletonLifetimeRule;

impl Rule for DbContextSingletonLifetimeRule {
    fn id(&self) -> &'static str {
        "dbcontext-singleton-lifetime"
    }

    fn name(&self) -> &'static str {
        "DbContext Registered as Singleton"
    }

    fn description(&self) -> &'static str {
        "Detects DbContext types registered with a singleton lifetime in dependency injection"
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
            if !call.is_any(SINGLETON_REGISTRATIONS) {
                continue;
            }

            let type_args = call.type_arguments();
            let context_type = type_args
                .iter()
                .map(|t| ctx.text(*t))
                .find(|t| ctx.symbols.is_context_type(t))
                .or_else(|| call.args.iter().find_map(|arg| context_in_argument(ctx, *arg)));
            let Some(context_type) = context_type else {
                continue;
            };

            let fix = (call.name == "AddSingleton" && type_args.len() == 1 && call.args.is_empty())
                .then(|| Fix {
                    description: "Register with `AddDbContext`".to_string(),
                    replacements: vec![rewrite::rename_method(ctx, &call, "AddDbContext")],
                });

            diagnostics.push(
                ctx.diagnostic(
                    self.id(),
                    self.default_severity(),
                    node,
                    format!("`{context_type}` is registered as a singleton; a DbContext must not be shared"),
                )
                .with_suggestion("Register the context with `AddDbContext` (scoped) or use `AddDbContextFactory`")
                .with_fix(fix),
            );
        }

        diagnostics
    }
}

/// A context type named by `typeof(...)` or `new ...(...)` inside `arg`.
fn context_in_argument<'t>(ctx: &AnalysisContext<'t>, arg: Node<'t>) -> Option<&'t str> {
    let mut found = None;
    visitor::walk(arg, |node| {
        if found.is_some() {
            return;
        }
        if matches!(node.kind(), "typeof_expression" | "object_creation_expression") {
            if let Some(ty) = node.child_by_field_name("type") {
                let name = ctx.text(ty);
                if ctx.symbols.is_context_type(name) {
                    found = Some(name);
                }
            }
        }
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::{apply_all, check_source, check_source_with_config};
    use crate::Config;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_generic_singleton_registration_is_fixed() {
        let source = r#"
class Startup {
    void ConfigureServices(IServiceCollection services) {
        services.AddSingleton<ShopDbContext>();
    }
}"#;
        let diagnostics = check_source(&DbContextSingletonLifetimeRule, source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Error);
        assert_eq!(
            apply_all(source, &diagnostics),
            r#"
class Startup {
    void ConfigureServices(IServiceCollection services) {
        services.AddDbContext<ShopDbContext>();
    }
}"#
        );
    }

    #[test]
    fn test_typeof_and_instance_registrations() {
        let source = r#"
class Inventory : DbContext { }
class Startup {
    void ConfigureServices(IServiceCollection services) {
        services.AddSingleton(typeof(Inventory));
        services.AddSingleton<IInventory>(sp => new Inventory());
        services.TryAddSingleton<IInventory, Inventory>();
    }
}"#;
        let diagnostics = check_source(&DbContextSingletonLifetimeRule, source);
        assert_eq!(diagnostics.len(), 3);
        assert!(diagnostics.iter().all(|d| d.fix.is_none()));
    }

    #[test]
    fn test_configured_context_type() {
        let source = "class P { void M(IServiceCollection s) { s.AddSingleton<LegacyStore>(); } }";
        let mut config = Config::default();
        config.database.context_types.push("LegacyStore".to_string());
        assert_eq!(
            check_source_with_config(&DbContextSingletonLifetimeRule, source, &config).len(),
            1
        );
    }

    #[test]
    fn test_other_registrations_are_fine() {
        let source = r#"
class Startup {
    void ConfigureServices(IServiceCollection services) {
        services.AddSingleton<IClock, SystemClock>();
        services.AddScoped<ShopDbContext>();
        services.AddDbContext<ShopDbContext>();
    }
}"#;
        assert!(check_source(&DbContextSingletonLifetimeRule, source).is_empty());
    }
}
