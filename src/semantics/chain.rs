//! Upstream chain walker.
//!
//! Starting from a call site, follows the receiver chain backwards until it
//! reaches the chain's origin, collecting every call on the way. The origin
//! is classified by its declared type (or, failing that, by convention) so
//! rules can tell a database query from an in-memory sequence.

use super::methods::{self, ORDERING};
use super::symbols::{DeclarationKind, TypeKind};
use super::syntax::{self, Call};
use crate::engine::AnalysisContext;
use crate::rules::visitor;
use tree_sitter::Node;

/// How many `var` locals the walker follows back to their initializers.
const MAX_RESOLUTION_DEPTH: usize = 8;

/// Upper bound on the number of links collected for one chain.
const MAX_CHAIN_LENGTH: usize = 256;

/// Upper bound on nested member accesses inspected while classifying an origin.
const MAX_ORIGIN_DEPTH: usize = 8;

/// What a call chain starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// An entity set (`ctx.Users`, `ctx.Set<User>()`).
    DbSet,
    /// A value typed `IQueryable<T>`.
    Queryable { ordered: bool },
    /// A context instance (`ctx.SaveChanges()`).
    Context,
    /// The context's database facade (`ctx.Database.ExecuteSqlRaw(...)`).
    Database,
    Other,
}

/// A call chain, upstream first: `ctx.Users.Where(..).ToList()` has links
/// `[Where, ToList]` and origin `DbSet`.
#[derive(Debug, Clone)]
pub struct QueryChain<'t> {
    pub origin: Origin,
    pub origin_node: Option<Node<'t>>,
    pub links: Vec<Call<'t>>,
}

impl<'t> QueryChain<'t> {
    /// Whether the chain starts at a database query source.
    pub fn is_query_source(&self) -> bool {
        matches!(self.origin, Origin::DbSet | Origin::Queryable { .. })
    }

    /// Whether the query is still composed on the server when link `index` runs.
    pub fn is_server_side_before(&self, index: usize) -> bool {
        self.is_query_source()
            && self.links[..index.min(self.links.len())]
                .iter()
                .all(|link| !methods::is_executing(link.name))
    }

    /// The call the chain was walked from.
    pub fn call(&self) -> Option<&Call<'t>> {
        self.links.last()
    }

    /// Index of the call the chain was walked from.
    pub fn last_index(&self) -> usize {
        self.links.len().saturating_sub(1)
    }

    /// Whether the last call applies to a server-side query.
    pub fn is_server_side_call(&self) -> bool {
        !self.links.is_empty() && self.is_server_side_before(self.last_index())
    }

    /// Whether a link before `index` is named in `names`.
    pub fn has_before(&self, index: usize, names: &[&str]) -> bool {
        self.links[..index.min(self.links.len())]
            .iter()
            .any(|link| methods::is_in(names, link.name))
    }

    /// Number of links before `index` named `name`.
    pub fn count_before(&self, index: usize, name: &str) -> usize {
        self.links[..index.min(self.links.len())]
            .iter()
            .filter(|link| link.name == name)
            .count()
    }

    /// Whether rows are ordered before link `index`.
    pub fn has_ordering_before(&self, index: usize) -> bool {
        matches!(self.origin, Origin::Queryable { ordered: true }) || self.has_before(index, ORDERING)
    }

    /// Whether any link is named in `names`.
    pub fn has_any(&self, names: &[&str]) -> bool {
        self.has_before(self.links.len(), names)
    }

    /// Number of links named `name`.
    pub fn count(&self, name: &str) -> usize {
        self.count_before(self.links.len(), name)
    }

    /// Whether the call is made directly on a context (`ctx.SaveChanges()`).
    pub fn is_direct_context_call(&self) -> bool {
        self.origin == Origin::Context && self.links.len() == 1
    }
}

/// Walk the chain ending at `node` (usually an invocation).
pub fn walk_chain<'t>(ctx: &AnalysisContext<'t>, node: Node<'t>) -> QueryChain<'t> {
    let mut links = Vec::new();
    let mut current = Some(node);
    let mut resolutions = 0;
    let mut origin = Origin::Other;
    let mut origin_node = None;

    while let Some(expr) = current.take() {
        if links.len() >= MAX_CHAIN_LENGTH {
            break;
        }
        let expr = syntax::unwrap(expr);

        if let Some(inner) = syntax::await_operand(expr) {
            current = Some(inner);
            continue;
        }

        if let Some(call) = syntax::as_call(expr, ctx.source) {
            if call.name == "Set"
                && call
                    .receiver
                    .is_some_and(|r| classify_origin(ctx, syntax::unwrap(r), 0) == Origin::Context)
            {
                origin = Origin::DbSet;
                origin_node = Some(expr);
                break;
            }
            current = call.receiver;
            links.push(call);
            continue;
        }

        if expr.kind() == "identifier" && resolutions < MAX_RESOLUTION_DEPTH {
            if let Some(initializer) = deferred_query_initializer(ctx, expr) {
                resolutions += 1;
                current = Some(initializer);
                continue;
            }
        }

        origin = classify_origin(ctx, expr, 0);
        origin_node = Some(expr);
    }

    links.reverse();
    QueryChain {
        origin,
        origin_node,
        links,
    }
}

/// The initializer of a local holding a not-yet-executed query.
fn deferred_query_initializer<'t>(ctx: &AnalysisContext<'t>, ident: Node<'t>) -> Option<Node<'t>> {
    let decl = ctx.symbols.lookup(ctx.text(ident), ident.start_byte())?;
    if decl.kind != DeclarationKind::Local {
        return None;
    }
    if !matches!(
        ctx.symbols.classify_type(decl.type_text),
        TypeKind::Inferred | TypeKind::Queryable { .. }
    ) {
        return None;
    }
    let initializer = decl.initializer?;
    let unwrapped = syntax::unwrap(initializer);
    if unwrapped.kind() == "await_expression" {
        return None;
    }
    if let Some(call) = syntax::as_call(unwrapped, ctx.source) {
        if methods::is_executing(call.name) {
            return None;
        }
    }
    // Avoid following a local into its own initializer.
    if initializer.start_byte() <= ident.start_byte() && ident.end_byte() <= initializer.end_byte() {
        return None;
    }
    Some(initializer)
}

/// Classify a non-call expression at the start of a chain.
pub fn classify_origin(ctx: &AnalysisContext<'_>, expr: Node<'_>, depth: usize) -> Origin {
    if depth > MAX_ORIGIN_DEPTH {
        return Origin::Other;
    }
    let expr = syntax::unwrap(expr);
    match expr.kind() {
        "identifier" => classify_identifier(ctx, expr),
        "this_expression" => {
            if enclosing_class_is_context(ctx, expr) {
                Origin::Context
            } else {
                Origin::Other
            }
        }
        "member_access_expression" => {
            let (Some(receiver), Some(name)) = (
                expr.child_by_field_name("expression"),
                expr.child_by_field_name("name"),
            ) else {
                return Origin::Other;
            };
            let member = ctx.text(name);
            match classify_origin(ctx, receiver, depth + 1) {
                Origin::Context if member == "Database" => Origin::Database,
                Origin::Context if ctx.symbols.is_context_set_member(member) => {
                    classify_context_member(ctx, member, expr.start_byte())
                }
                _ if syntax::unwrap(receiver).kind() == "this_expression" => {
                    classify_identifier_text(ctx, member, expr.start_byte())
                }
                _ => Origin::Other,
            }
        }
        "object_creation_expression" => match expr.child_by_field_name("type") {
            Some(ty) if ctx.symbols.is_context_type(ctx.text(ty)) => Origin::Context,
            _ => Origin::Other,
        },
        _ => Origin::Other,
    }
}

/// A member of a context: an entity set unless declared otherwise.
fn classify_context_member(ctx: &AnalysisContext<'_>, member: &str, at: usize) -> Origin {
    match ctx.symbols.lookup(member, at) {
        Some(decl) if decl.kind == DeclarationKind::Property => {
            match ctx.symbols.classify_type(decl.type_text) {
                TypeKind::DbSet => Origin::DbSet,
                TypeKind::Queryable { ordered } => Origin::Queryable { ordered },
                _ => Origin::Other,
            }
        }
        _ => Origin::DbSet,
    }
}

fn classify_identifier(ctx: &AnalysisContext<'_>, ident: Node<'_>) -> Origin {
    classify_identifier_text(ctx, ctx.text(ident), ident.start_byte())
}

fn classify_identifier_text(ctx: &AnalysisContext<'_>, name: &str, at: usize) -> Origin {
    let decl = ctx.symbols.lookup(name, at);
    // Undeclared, or an untyped lambda parameter: go by the name.
    let Some(decl) = decl.filter(|d| !d.type_text.is_empty()) else {
        return if ctx.symbols.is_conventional_context_name(name) {
            Origin::Context
        } else {
            Origin::Other
        };
    };

    match ctx.symbols.classify_type(decl.type_text) {
        TypeKind::DbSet => Origin::DbSet,
        TypeKind::Queryable { ordered } => Origin::Queryable { ordered },
        TypeKind::Context => Origin::Context,
        TypeKind::Inferred => match decl.initializer {
            Some(init) if initializer_creates_context(ctx, init) => Origin::Context,
            _ => Origin::Other,
        },
        TypeKind::Other => Origin::Other,
    }
}

/// `new ShopContext()`, `factory.CreateDbContext()`,
/// `provider.GetRequiredService<ShopContext>()` and their awaited forms.
fn initializer_creates_context(ctx: &AnalysisContext<'_>, init: Node<'_>) -> bool {
    let mut expr = syntax::unwrap(init);
    if let Some(inner) = syntax::await_operand(expr) {
        expr = syntax::unwrap(inner);
    }
    match expr.kind() {
        "object_creation_expression" => expr
            .child_by_field_name("type")
            .is_some_and(|ty| ctx.symbols.is_context_type(ctx.text(ty))),
        "invocation_expression" => match syntax::as_call(expr, ctx.source) {
            Some(call) => {
                matches!(methods::base_name(call.name), "CreateDbContext")
                    || call
                        .type_arguments()
                        .iter()
                        .any(|ty| ctx.symbols.is_context_type(ctx.text(*ty)))
            }
            None => false,
        },
        _ => false,
    }
}

fn enclosing_class_is_context(ctx: &AnalysisContext<'_>, node: Node<'_>) -> bool {
    visitor::ancestors(node)
        .find(|a| a.kind() == "class_declaration")
        .and_then(|class| class.child_by_field_name("name"))
        .is_some_and(|name| ctx.symbols.is_context_class(ctx.text(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::parser::parse_source;
    use crate::Config;
    use std::path::Path;

    fn with_chain(source: &str, call_text: &str, check: impl FnOnce(&QueryChain<'_>)) {
        let tree = parse_source(source).unwrap();
        let config = Config::default();
        let ctx = AnalysisContext::new(Path::new("Test.cs"), source, &tree, &config);
        let node = ctx
            .invocations()
            .iter()
            .copied()
            .find(|n| ctx.text(*n) == call_text)
            .unwrap_or_else(|| panic!("no call `{call_text}`"));
        let chain = walk_chain(&ctx, node);
        check(&chain);
    }

    fn names(chain: &QueryChain<'_>) -> Vec<String> {
        chain.links.iter().map(|l| l.name.to_string()).collect()
    }

    #[test]
    fn test_dbset_origin_through_context_field() {
        let source = r#"
class UserService {
    private readonly AppDbContext _context;
    void M() { _context.Users.Where(u => u.Active).ToList(); }
}"#;
        with_chain(source, "_context.Users.Where(u => u.Active).ToList()", |chain| {
            assert_eq!(chain.origin, Origin::DbSet);
            assert_eq!(names(chain), vec!["Where", "ToList"]);
            assert!(chain.is_server_side_call());
        });
    }

    #[test]
    fn test_set_call_is_dbset_origin() {
        let source = "class S { void M(AppDbContext db) { db.Set<User>().Count(); } }";
        with_chain(source, "db.Set<User>().Count()", |chain| {
            assert_eq!(chain.origin, Origin::DbSet);
            assert_eq!(names(chain), vec!["Count"]);
        });
    }

    #[test]
    fn test_resolves_deferred_local() {
        let source = r#"
class S {
    void M(AppDbContext db) {
        var query = db.Orders.Where(o => o.Open);
        query.OrderBy(o => o.Id).ToList();
    }
}"#;
        with_chain(source, "query.OrderBy(o => o.Id).ToList()", |chain| {
            assert_eq!(chain.origin, Origin::DbSet);
            assert_eq!(names(chain), vec!["Where", "OrderBy", "ToList"]);
            assert!(chain.has_ordering_before(2));
        });
    }

    #[test]
    fn test_does_not_resolve_materialized_local() {
        let source = r#"
class S {
    void M(AppDbContext db) {
        var list = db.Orders.ToList();
        list.Where(o => o.Open).ToList();
    }
}"#;
        with_chain(source, "list.Where(o => o.Open).ToList()", |chain| {
            assert_eq!(chain.origin, Origin::Other);
            assert!(!chain.is_server_side_call());
        });
    }

    #[test]
    fn test_materialization_ends_server_side() {
        let source = "class S { void M(AppDbContext db) { db.Users.ToList().Where(u => u.Active); } }";
        with_chain(source, "db.Users.ToList().Where(u => u.Active)", |chain| {
            assert_eq!(names(chain), vec!["ToList", "Where"]);
            assert!(chain.is_server_side_before(0));
            assert!(!chain.is_server_side_before(1));
        });
    }

    #[test]
    fn test_context_and_database_origins() {
        let source = r#"
class S {
    void M(ShopDbContext shop) {
        shop.SaveChanges();
        shop.Database.ExecuteSqlRaw("DELETE FROM Logs");
    }
}"#;
        with_chain(source, "shop.SaveChanges()", |chain| {
            assert_eq!(chain.origin, Origin::Context);
            assert!(chain.is_direct_context_call());
        });
        with_chain(
            source,
            "shop.Database.ExecuteSqlRaw(\"DELETE FROM Logs\")",
            |chain| assert_eq!(chain.origin, Origin::Database),
        );
    }

    #[test]
    fn test_queryable_parameter_origin() {
        let source = "class S { void M(IOrderedQueryable<User> users) { users.Skip(10).ToList(); } }";
        with_chain(source, "users.Skip(10).ToList()", |chain| {
            assert_eq!(chain.origin, Origin::Queryable { ordered: true });
            assert!(chain.has_ordering_before(0));
        });
    }

    #[test]
    fn test_in_memory_list_is_other() {
        let source = "class S { void M(List<User> users) { users.Where(u => u.Active).ToList(); } }";
        with_chain(source, "users.Where(u => u.Active).ToList()", |chain| {
            assert_eq!(chain.origin, Origin::Other);
            assert!(!chain.is_server_side_call());
        });
    }

    #[test]
    fn test_context_class_members() {
        let source = r#"
class ShopContext : DbContext {
    public DbSet<Order> Orders { get; set; }
    public int OpenCount() => Orders.Count(o => o.Open);
}"#;
        with_chain(source, "Orders.Count(o => o.Open)", |chain| {
            assert_eq!(chain.origin, Origin::DbSet);
        });
    }
}
