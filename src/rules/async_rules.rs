//! Async usage rules: synchronous EF calls in async code, blocking on EF
//! tasks, and needless `AddAsync`.

use super::{visitor, Diagnostic, Fix, Rule, Severity};
use crate::engine::AnalysisContext;
use crate::fix::rewrite;
use crate::semantics::chain::{walk_chain, Origin};
use crate::semantics::methods;
use crate::semantics::scope;
use crate::semantics::syntax::{self, Call};
use tree_sitter::Node;

const EF_NAMESPACE: &str = "Microsoft.EntityFrameworkCore";

/// Query operators with an `...Async` counterpart in EF Core.
const QUERY_CALLS_WITH_ASYNC: &[&str] = &[
    "ToList",
    "ToArray",
    "ToDictionary",
    "ToHashSet",
    "First",
    "FirstOrDefault",
    "Single",
    "SingleOrDefault",
    "Last",
    "LastOrDefault",
    "ElementAt",
    "ElementAtOrDefault",
    "Count",
    "LongCount",
    "Any",
    "All",
    "Sum",
    "Min",
    "Max",
    "Average",
    "Contains",
    "Load",
    "ForEach",
    "ExecuteUpdate",
    "ExecuteDelete",
    "Find",
];

/// Context instance methods with an async counterpart.
const CONTEXT_CALLS_WITH_ASYNC: &[&str] = &["SaveChanges", "Find"];

/// `ctx.Database` methods with an async counterpart.
const DATABASE_CALLS_WITH_ASYNC: &[&str] = &[
    "ExecuteSqlRaw",
    "ExecuteSqlInterpolated",
    "ExecuteSql",
    "BeginTransaction",
    "EnsureCreated",
    "EnsureDeleted",
    "Migrate",
    "CanConnect",
];

/// Detects synchronous EF Core execution calls inside async functions.
///
/// The synchronous API blocks a thread-pool thread for the whole round
/// trip; async code should await the `...Async` overload instead.
///
/// # Example
/// ```csharp
/// // Bad
/// public async Task<List<User>> Active() => db.Users.Where(u => u.Active).ToList();
///
/// // Good
/// public async Task<List<User>> Active() => await db.Users.Where(u => u.Active).ToListAsync();
/// ```
pub struct SyncOverAsyncRule;

impl Rule for SyncOverAsyncRule {
    fn id(&self) -> &'static str {
        "sync-over-async"
    }

    fn name(&self) -> &'static str {
        "Synchronous EF Call in Async Code"
    }

    fn description(&self) -> &'static str {
        "Detects synchronous EF Core query or save calls inside async methods that should await the Async overload"
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
            if call.name.ends_with("Async") {
                continue;
            }
            let Some(needs_using) = sync_call_kind(ctx, &call) else {
                continue;
            };
            if !scope::in_async_context(ctx, node) {
                continue;
            }

            let async_name = format!("{}Async", call.name);
            let mut replacements = rewrite::wrap_await(ctx, node);
            replacements.push(rewrite::rename_method(ctx, &call, &async_name));
            if needs_using {
                replacements.extend(rewrite::ensure_using(ctx, EF_NAMESPACE));
            }

            diagnostics.push(
                ctx.diagnostic(
                    self.id(),
                    self.default_severity(),
                    node,
                    format!(
                        "Synchronous `{}` blocks a thread inside an async method",
                        call.name
                    ),
                )
                .with_suggestion(format!("Use `await ...{async_name}()`"))
                .with_fix(Some(Fix {
                    description: format!("Await `{async_name}`"),
                    replacements,
                })),
            );
        }

        diagnostics
    }
}

/// Whether `call` is a synchronous EF execution call; `Some(true)` when
/// its async form is an extension method needing the EF namespace.
fn sync_call_kind(ctx: &AnalysisContext<'_>, call: &Call<'_>) -> Option<bool> {
    let is_query_call = call.is_any(QUERY_CALLS_WITH_ASYNC);
    let is_context_call = call.is_any(CONTEXT_CALLS_WITH_ASYNC);
    let is_database_call = call.is_any(DATABASE_CALLS_WITH_ASYNC);
    if !is_query_call && !is_context_call && !is_database_call {
        return None;
    }
    if call.node.parent().is_some_and(|p| p.kind() == "await_expression") {
        return None;
    }

    let chain = walk_chain(ctx, call.node);
    match chain.origin {
        Origin::Database if is_database_call && chain.links.len() == 1 => Some(true),
        Origin::Context if is_context_call && chain.is_direct_context_call() => Some(false),
        Origin::DbSet if call.name == "Find" && chain.links.len() == 1 => Some(false),
        Origin::DbSet | Origin::Queryable { .. }
            if is_query_call && call.name != "Find" && chain.is_server_side_call() =>
        {
            Some(true)
        }
        _ => None,
    }
}

/// Detects blocking waits on EF Core tasks: `.Result`, `.Wait()` and
/// `.GetAwaiter().GetResult()`.
///
/// Blocking on an async EF call ties up a thread and can deadlock under a
/// synchronization context.
pub struct BlockingAsyncCallRule;

impl Rule for BlockingAsyncCallRule {
    fn id(&self) -> &'static str {
        "blocking-async-call"
    }

    fn name(&self) -> &'static str {
        "Blocking Wait on EF Task"
    }

    fn description(&self) -> &'static str {
        "Detects .Result, .Wait() and .GetAwaiter().GetResult() on EF Core async calls"
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn check(&self, ctx: &AnalysisContext) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        visitor::walk(ctx.root(), |node| {
            let Some((blocking, task, pattern)) = blocking_wait(ctx, node) else {
                return;
            };
            let Some(task_call) = syntax::as_call(task, ctx.source) else {
                return;
            };
            if !is_ef_async_call(ctx, &task_call) {
                return;
            }

            let in_async = scope::in_async_context(ctx, blocking);
            let fix = in_async.then(|| Fix {
                description: format!("Await `{}`", task_call.name),
                replacements: vec![rewrite::replace_with_await(ctx, blocking, task)],
            });
            let suggestion = if in_async {
                format!("Use `await` on `{}` instead", task_call.name)
            } else {
                format!(
                    "Make the caller async and await `{}`, or use the synchronous API",
                    task_call.name
                )
            };

            diagnostics.push(
                ctx.diagnostic(
                    self.id(),
                    self.default_severity(),
                    blocking,
                    format!("`{pattern}` blocks on `{}`", task_call.name),
                )
                .with_suggestion(suggestion)
                .with_fix(fix),
            );
        });

        diagnostics
    }
}

/// Match a blocking wait: returns the whole blocking expression, the task
/// expression and the pattern name.
fn blocking_wait<'t>(ctx: &AnalysisContext<'t>, node: Node<'t>) -> Option<(Node<'t>, Node<'t>, &'static str)> {
    match node.kind() {
        "member_access_expression" => {
            let name = node.child_by_field_name("name")?;
            if ctx.text(name) != "Result" {
                return None;
            }
            // `x.Result()` is a method call, not the task property
            if node
                .parent()
                .is_some_and(|p| p.kind() == "invocation_expression" && p.child_by_field_name("function") == Some(node))
            {
                return None;
            }
            let task = syntax::unwrap(node.child_by_field_name("expression")?);
            Some((node, task, ".Result"))
        }
        "invocation_expression" => {
            let call = syntax::as_call(node, ctx.source)?;
            if !call.args.is_empty() {
                return None;
            }
            let receiver = syntax::unwrap(call.receiver?);
            match call.name {
                "Wait" => Some((node, receiver, ".Wait()")),
                "GetResult" => {
                    let awaiter = syntax::as_call(receiver, ctx.source)?;
                    if awaiter.name != "GetAwaiter" {
                        return None;
                    }
                    let task = syntax::unwrap(awaiter.receiver?);
                    Some((node, task, ".GetAwaiter().GetResult()"))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn is_ef_async_call(ctx: &AnalysisContext<'_>, call: &Call<'_>) -> bool {
    if !call.name.ends_with("Async") {
        return false;
    }
    let chain = walk_chain(ctx, call.node);
    match chain.origin {
        Origin::Context | Origin::Database => chain.links.len() == 1,
        Origin::DbSet | Origin::Queryable { .. } => chain.is_server_side_call(),
        Origin::Other => false,
    }
}

/// Detects `await AddAsync(...)` whose result is discarded.
///
/// `AddAsync` only exists for value generators that hit the database; for
/// ordinary entities the synchronous `Add` does the same work without a
/// state machine.
pub struct PreferAddOverAddAsyncRule;

impl Rule for PreferAddOverAddAsyncRule {
    fn id(&self) -> &'static str {
        "prefer-add-over-add-async"
    }

    fn name(&self) -> &'static str {
        "Prefer Add over AddAsync"
    }

    fn description(&self) -> &'static str {
        "Detects awaited AddAsync/AddRangeAsync calls whose result is discarded; Add/AddRange is sufficient"
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
            if !call.is_any(&["AddAsync", "AddRangeAsync"]) {
                continue;
            }
            let chain = walk_chain(ctx, node);
            let on_set_or_context = chain.links.len() == 1
                && matches!(chain.origin, Origin::DbSet | Origin::Context);
            if !on_set_or_context {
                continue;
            }
            let Some(awaited) = discarded_await(ctx, node) else {
                continue;
            };

            let sync_name = methods::base_name(call.name);
            let fix = (awaited.named_child(0) == Some(node) && call.args.len() == 1).then(|| Fix {
                description: format!("Use `{sync_name}`"),
                replacements: vec![
                    rewrite::replace_range(ctx, awaited.start_byte(), node.start_byte(), ""),
                    rewrite::rename_method(ctx, &call, sync_name),
                ],
            });

            diagnostics.push(
                ctx.diagnostic(
                    self.id(),
                    self.default_severity(),
                    node,
                    format!("`{}` result is discarded; `{sync_name}` is sufficient", call.name),
                )
                .with_suggestion(format!(
                    "Use `{sync_name}`; `{}` is only needed for value generators that access the database",
                    call.name
                ))
                .with_fix(fix),
            );
        }

        diagnostics
    }
}

/// The `await` expression around `call` (optionally via `ConfigureAwait`)
/// when it is a statement on its own.
fn discarded_await<'t>(ctx: &AnalysisContext<'t>, call: Node<'t>) -> Option<Node<'t>> {
    let mut awaited = call;
    if let Some(member) = call.parent().filter(|p| p.kind() == "member_access_expression") {
        let invocation = member.parent()?;
        if syntax::as_call(invocation, ctx.source)?.name != "ConfigureAwait" {
            return None;
        }
        awaited = invocation;
    }
    let await_expr = awaited.parent().filter(|p| p.kind() == "await_expression")?;
    await_expr
        .parent()
        .is_some_and(|p| p.kind() == "expression_statement")
        .then_some(await_expr)
}
