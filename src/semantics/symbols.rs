//! File-local symbol table.
//!
//! Records the declared type (and initializer) of every field, property,
//! parameter and local in a file, and which classes derive from `DbContext`.
//! Locals and parameters are visible inside their block or function;
//! fields and properties anywhere in the file.

use super::syntax::{self, text, type_base_name, FUNCTION_KINDS};
use crate::rules::visitor;
use crate::Config;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use tree_sitter::Node;

/// Nodes that bound the scope of a local declared directly inside them.
const LOCAL_SCOPE_KINDS: &[&str] = &[
    "block",
    "switch_section",
    "for_statement",
    "foreach_statement",
    "using_statement",
    "fixed_statement",
];

/// Scope of a declaration that is visible in the whole file.
const FILE_SCOPE: Range<usize> = 0..usize::MAX;

/// Well-known base classes of EF Core contexts.
const CONTEXT_BASES: &[&str] = &[
    "DbContext",
    "IdentityDbContext",
    "IdentityUserContext",
    "ApiAuthorizationDbContext",
];

/// Conventional identifiers for context instances, compared case-insensitively
/// after stripping a leading underscore.
const CONTEXT_NAMES: &[&str] = &["db", "ctx", "context", "dbcontext", "dbctx", "datacontext"];

/// Context members that are not entity sets.
const CONTEXT_NON_SET_MEMBERS: &[&str] = &["Database", "ChangeTracker", "Model", "ContextId"];

/// What a declared type says about a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// `DbSet<T>`
    DbSet,
    /// `IQueryable<T>` and friends; `ordered` for `IOrderedQueryable<T>`.
    Queryable { ordered: bool },
    /// A `DbContext` subclass.
    Context,
    /// Implicitly typed (`var`); see the initializer.
    Inferred,
    Other,
}

/// A single declaration.
///
/// `type_text` is empty for implicitly typed lambda parameters.
#[derive(Debug, Clone)]
pub struct Declaration<'t> {
    pub name: &'t str,
    pub type_text: &'t str,
    pub initializer: Option<Node<'t>>,
    pub position: usize,
    pub kind: DeclarationKind,
    /// Byte range in which the name is visible.
    pub scope: Range<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    Field,
    Property,
    Parameter,
    Local,
}

/// Declarations and context classes of one file.
pub struct SymbolTable<'t> {
    declarations: HashMap<&'t str, Vec<Declaration<'t>>>,
    context_classes: HashSet<&'t str>,
    class_bases: HashMap<&'t str, Vec<&'t str>>,
    extra_context_types: Vec<String>,
    extra_context_names: Vec<String>,
}

impl<'t> SymbolTable<'t> {
    /// Collect declarations from the whole tree under `root`.
    pub fn build(root: Node<'t>, source: &'t str, config: &Config) -> Self {
        let mut table = SymbolTable {
            declarations: HashMap::new(),
            context_classes: HashSet::new(),
            class_bases: HashMap::new(),
            extra_context_types: config.database.context_types.clone(),
            extra_context_names: config.database.context_names.clone(),
        };

        visitor::walk(root, |node| match node.kind() {
            "variable_declaration" => table.add_variable_declaration(node, source),
            "property_declaration" => table.add_property(node, source),
            "parameter" => table.add_parameter(node, source),
            "implicit_parameter" => table.add_implicit_parameter(node, source),
            "foreach_statement" => table.add_foreach_variable(node, source),
            "class_declaration" | "record_declaration" => table.add_class(node, source),
            _ => {}
        });

        table.resolve_context_classes();
        table
    }

    fn add_variable_declaration(&mut self, node: Node<'t>, source: &'t str) {
        let Some(type_node) = node.child_by_field_name("type") else {
            return;
        };
        let type_text = text(type_node, source);
        let (kind, scope) = if node
            .parent()
            .is_some_and(|p| p.kind() == "field_declaration" || p.kind() == "event_field_declaration")
        {
            (DeclarationKind::Field, FILE_SCOPE)
        } else {
            (DeclarationKind::Local, local_scope(node))
        };

        let mut cursor = node.walk();
        for declarator in node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "variable_declarator")
        {
            let (name, initializer) = syntax::declarator_parts(declarator);
            if let Some(name) = name {
                self.push(Declaration {
                    name: text(name, source),
                    type_text,
                    initializer,
                    position: declarator.start_byte(),
                    kind,
                    scope: scope.clone(),
                });
            }
        }
    }

    fn add_property(&mut self, node: Node<'t>, source: &'t str) {
        let (Some(type_node), Some(name)) = (
            node.child_by_field_name("type"),
            node.child_by_field_name("name"),
        ) else {
            return;
        };
        self.push(Declaration {
            name: text(name, source),
            type_text: text(type_node, source),
            initializer: None,
            position: node.start_byte(),
            kind: DeclarationKind::Property,
            scope: FILE_SCOPE,
        });
    }

    /// A parameter of a method, constructor, local function or lambda; it is
    /// visible inside the declaring function.
    fn add_parameter(&mut self, node: Node<'t>, source: &'t str) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let Some(function) = node.parent().and_then(|list| list.parent()) else {
            return;
        };
        self.push(Declaration {
            name: text(name, source),
            type_text: node
                .child_by_field_name("type")
                .map_or("", |t| text(t, source)),
            initializer: None,
            position: node.start_byte(),
            kind: DeclarationKind::Parameter,
            scope: function.byte_range(),
        });
    }

    /// The single untyped parameter of `x => ...`.
    fn add_implicit_parameter(&mut self, node: Node<'t>, source: &'t str) {
        let Some(lambda) = node.parent() else {
            return;
        };
        self.push(Declaration {
            name: text(node, source),
            type_text: "",
            initializer: None,
            position: node.start_byte(),
            kind: DeclarationKind::Parameter,
            scope: lambda.byte_range(),
        });
    }

    fn add_foreach_variable(&mut self, node: Node<'t>, source: &'t str) {
        let (Some(type_node), Some(left)) = (
            node.child_by_field_name("type"),
            node.child_by_field_name("left"),
        ) else {
            return;
        };
        if left.kind() != "identifier" {
            return;
        }
        self.push(Declaration {
            name: text(left, source),
            type_text: text(type_node, source),
            initializer: None,
            position: left.start_byte(),
            kind: DeclarationKind::Local,
            scope: node.byte_range(),
        });
    }

    fn add_class(&mut self, node: Node<'t>, source: &'t str) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let mut cursor = node.walk();
        let bases: Vec<&'t str> = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "base_list")
            .flat_map(|list| {
                let mut inner = list.walk();
                list.named_children(&mut inner)
                    .map(|b| type_base_name(text(b, source)))
                    .collect::<Vec<_>>()
            })
            .collect();
        self.class_bases.insert(text(name, source), bases);
    }

    fn push(&mut self, declaration: Declaration<'t>) {
        self.declarations
            .entry(declaration.name)
            .or_default()
            .push(declaration);
    }

    /// Mark classes deriving (transitively, within the file) from a context base.
    fn resolve_context_classes(&mut self) {
        loop {
            let newly_found: Vec<&'t str> = self
                .class_bases
                .iter()
                .filter(|(name, _)| !self.context_classes.contains(*name))
                .filter(|(_, bases)| {
                    bases.iter().any(|b| {
                        CONTEXT_BASES.contains(b)
                            || self.context_classes.contains(b)
                            || self.extra_context_types.iter().any(|t| t == b)
                    })
                })
                .map(|(name, _)| *name)
                .collect();
            if newly_found.is_empty() {
                break;
            }
            self.context_classes.extend(newly_found);
        }
    }

    /// The declaration of `name` visible at byte offset `at`.
    ///
    /// Prefers the innermost local or parameter in scope at `at`; falls back
    /// to a field or property, which may be declared after its use.
    pub fn lookup(&self, name: &str, at: usize) -> Option<&Declaration<'t>> {
        let candidates = self.declarations.get(name)?;
        candidates
            .iter()
            .filter(|d| matches!(d.kind, DeclarationKind::Local | DeclarationKind::Parameter))
            .filter(|d| d.position <= at && d.scope.contains(&at))
            .max_by_key(|d| d.position)
            .or_else(|| {
                candidates
                    .iter()
                    .find(|d| matches!(d.kind, DeclarationKind::Field | DeclarationKind::Property))
            })
    }

    /// Whether anything in the file declares `name`.
    pub fn is_declared(&self, name: &str) -> bool {
        self.declarations.contains_key(name)
    }

    /// Whether `type_text` names a context type.
    pub fn is_context_type(&self, type_text: &str) -> bool {
        let base = type_base_name(type_text);
        base.ends_with("DbContext")
            || CONTEXT_BASES.contains(&base)
            || self.context_classes.contains(base)
            || self.extra_context_types.iter().any(|t| t == base)
    }

    /// Whether the class named `name` derives from a context type.
    pub fn is_context_class(&self, name: &str) -> bool {
        self.context_classes.contains(name)
    }

    /// Whether an undeclared identifier conventionally names a context.
    pub fn is_conventional_context_name(&self, ident: &str) -> bool {
        let normalized = ident.trim_start_matches('_').to_lowercase();
        CONTEXT_NAMES.contains(&normalized.as_str())
            || self.extra_context_names.iter().any(|n| n == ident)
    }

    /// Whether `member` of a context can be an entity set.
    pub fn is_context_set_member(&self, member: &str) -> bool {
        !CONTEXT_NON_SET_MEMBERS.contains(&member)
    }

    /// Classify a declared type.
    pub fn classify_type(&self, type_text: &str) -> TypeKind {
        let trimmed = type_text.trim();
        if trimmed == "var" {
            return TypeKind::Inferred;
        }
        match type_base_name(trimmed) {
            "DbSet" => TypeKind::DbSet,
            "IOrderedQueryable" => TypeKind::Queryable { ordered: true },
            "IQueryable" | "IIncludableQueryable" => TypeKind::Queryable { ordered: false },
            base if self.is_context_type(base) => TypeKind::Context,
            _ => TypeKind::Other,
        }
    }
}

/// The block, loop or `using` statement bounding a local declared at
/// `declaration`; the whole file for top-level statements.
fn local_scope(declaration: Node<'_>) -> Range<usize> {
    visitor::ancestors(declaration)
        .find(|a| LOCAL_SCOPE_KINDS.contains(&a.kind()) || FUNCTION_KINDS.contains(&a.kind()))
        .map_or(FILE_SCOPE, |scope| scope.byte_range())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::parser::parse_source;

    const SOURCE: &str = r#"
public class ShopContext : DbContext
{
    public DbSet<Order> Orders { get; set; }
}

public class AuditContext : ShopContext { }

public class OrderService
{
    private readonly ShopContext _shop;
    private readonly IOrderedQueryable<Order> _sorted;

    public OrderService(ShopContext shop) { _shop = shop; }

    public void Run(IQueryable<Order> source)
    {
        var pending = _shop.Orders;
        int count = 0;
    }
}
"#;

    fn table<'t>(tree: &'t tree_sitter::Tree, config: &Config) -> SymbolTable<'t> {
        SymbolTable::build(tree.root_node(), SOURCE, config)
    }

    #[test]
    fn test_context_classes_are_resolved_transitively() {
        let tree = parse_source(SOURCE).unwrap();
        let config = Config::default();
        let symbols = table(&tree, &config);
        assert!(symbols.is_context_class("ShopContext"));
        assert!(symbols.is_context_class("AuditContext"));
        assert!(!symbols.is_context_class("OrderService"));
    }

    #[test]
    fn test_declared_types_are_classified() {
        let tree = parse_source(SOURCE).unwrap();
        let config = Config::default();
        let symbols = table(&tree, &config);

        let at = SOURCE.find("int count = 0;").unwrap() + "int count = 0;".len();
        let shop = symbols.lookup("_shop", at).unwrap();
        assert_eq!(symbols.classify_type(shop.type_text), TypeKind::Context);

        let orders = symbols.lookup("Orders", at).unwrap();
        assert_eq!(orders.kind, DeclarationKind::Property);
        assert_eq!(symbols.classify_type(orders.type_text), TypeKind::DbSet);

        let source = symbols.lookup("source", at).unwrap();
        assert_eq!(
            symbols.classify_type(source.type_text),
            TypeKind::Queryable { ordered: false }
        );

        let sorted = symbols.lookup("_sorted", at).unwrap();
        assert_eq!(
            symbols.classify_type(sorted.type_text),
            TypeKind::Queryable { ordered: true }
        );

        let pending = symbols.lookup("pending", at).unwrap();
        assert_eq!(symbols.classify_type(pending.type_text), TypeKind::Inferred);
        assert_eq!(&SOURCE[pending.initializer.unwrap().byte_range()], "_shop.Orders");

        let count = symbols.lookup("count", at).unwrap();
        assert_eq!(symbols.classify_type(count.type_text), TypeKind::Other);
    }

    #[test]
    fn test_conventional_and_configured_names() {
        let tree = parse_source(SOURCE).unwrap();
        let mut config = Config::default();
        config.database.context_names.push("uow".to_string());
        config.database.context_types.push("LegacyStore".to_string());
        let symbols = table(&tree, &config);

        assert!(symbols.is_conventional_context_name("_context"));
        assert!(symbols.is_conventional_context_name("db"));
        assert!(symbols.is_conventional_context_name("uow"));
        assert!(!symbols.is_conventional_context_name("_httpClient"));
        assert!(symbols.is_context_type("LegacyStore"));
        assert!(symbols.is_context_type("ApplicationDbContext"));
    }

    #[test]
    fn test_locals_are_scoped_to_their_function() {
        let source = r#"
class S {
    void A(AppDbContext db) { var items = db.Orders.Where(o => o.Open); }
    void B(List<List<Order>> batches) { var n = batches.Select(items => items.Count()); }
    void C() { var later = items; }
}"#;
        let tree = parse_source(source).unwrap();
        let config = Config::default();
        let symbols = SymbolTable::build(tree.root_node(), source, &config);

        let in_a = source.find("o.Open").unwrap();
        let local = symbols.lookup("items", in_a).unwrap();
        assert_eq!(local.kind, DeclarationKind::Local);

        let in_b = source.find("items.Count").unwrap();
        let param = symbols.lookup("items", in_b).unwrap();
        assert_eq!(param.kind, DeclarationKind::Parameter);
        assert_eq!(param.type_text, "");

        let in_c = source.find("= items;").unwrap() + 2;
        assert!(symbols.lookup("items", in_c).is_none());
        assert!(symbols.is_declared("items"));
    }

    #[test]
    fn test_sibling_blocks_do_not_share_locals() {
        let source = r#"
class S {
    void M(AppDbContext db, bool flag) {
        if (flag) { var q = db.Orders; }
        foreach (var q2 in new[] { 1 }) { var x = q; }
    }
}"#;
        let tree = parse_source(source).unwrap();
        let config = Config::default();
        let symbols = SymbolTable::build(tree.root_node(), source, &config);

        let use_site = source.find("= q;").unwrap() + 2;
        assert!(symbols.lookup("q", use_site).is_none());
        assert_eq!(
            symbols.lookup("q2", use_site).map(|d| d.kind),
            Some(DeclarationKind::Local)
        );
    }
}
