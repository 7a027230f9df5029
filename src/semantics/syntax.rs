//! Helpers over the tree-sitter C# grammar.
//!
//! These hide grammar details (field names, aliased nodes) from the rules.

use tree_sitter::Node;

/// Static classes whose methods are LINQ/EF extension methods; calls written
/// in static form pass the query source as the first argument.
const EXTENSION_HOSTS: &[&str] = &[
    "Queryable",
    "Enumerable",
    "EntityFrameworkQueryableExtensions",
    "RelationalQueryableExtensions",
    "AsyncEnumerable",
];

/// Node kinds that bound a function body.
pub const FUNCTION_KINDS: &[&str] = &[
    "method_declaration",
    "constructor_declaration",
    "destructor_declaration",
    "operator_declaration",
    "conversion_operator_declaration",
    "local_function_statement",
    "accessor_declaration",
    "lambda_expression",
    "anonymous_method_expression",
];

/// Node kinds of lambda-like expressions.
pub const LAMBDA_KINDS: &[&str] = &["lambda_expression", "anonymous_method_expression"];

/// Node kinds of loop statements.
pub const LOOP_KINDS: &[&str] = &[
    "for_statement",
    "foreach_statement",
    "while_statement",
    "do_statement",
];

/// Source text of `node`.
pub fn text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or("")
}

/// A decomposed `invocation_expression`.
#[derive(Debug, Clone)]
pub struct Call<'t> {
    /// The invocation node itself.
    pub node: Node<'t>,
    /// Method name without type arguments.
    pub name: &'t str,
    /// The identifier node holding the method name.
    pub name_node: Node<'t>,
    /// Receiver expression, if any (`x` in `x.M()`).
    pub receiver: Option<Node<'t>>,
    /// Argument expressions (excluding a static-extension `this` argument).
    pub args: Vec<Node<'t>>,
    /// The `argument_list` node, parentheses included.
    pub arg_list: Node<'t>,
    /// The `member_access_expression` used as callee, if any.
    pub member_access: Option<Node<'t>>,
}

impl<'t> Call<'t> {
    /// Whether the call names one of `names`.
    pub fn is_any(&self, names: &[&str]) -> bool {
        names.contains(&self.name)
    }

    /// Type argument nodes of a generic call (`M<A, B>()`).
    pub fn type_arguments(&self) -> Vec<Node<'t>> {
        let Some(generic) = self.name_node.parent().filter(|p| p.kind() == "generic_name")
        else {
            return Vec::new();
        };
        let mut cursor = generic.walk();
        let Some(list) = generic
            .named_children(&mut cursor)
            .find(|c| c.kind() == "type_argument_list")
        else {
            return Vec::new();
        };
        let mut cursor = list.walk();
        list.named_children(&mut cursor).collect()
    }
}

/// Decompose an invocation expression.
///
/// The static extension form `Queryable.Where(source, pred)` is normalised so
/// that `source` becomes the receiver and `pred` the only argument.
pub fn as_call<'t>(node: Node<'t>, source: &'t str) -> Option<Call<'t>> {
    if node.kind() != "invocation_expression" {
        return None;
    }
    let function = node.child_by_field_name("function")?;
    let arg_list = node.child_by_field_name("arguments")?;
    let mut args = arguments(arg_list);

    let (name_node, receiver, member_access) = match function.kind() {
        "member_access_expression" => {
            let name = simple_name_identifier(function.child_by_field_name("name")?)?;
            let receiver = function.child_by_field_name("expression")?;
            (name, Some(receiver), Some(function))
        }
        "identifier" | "generic_name" => (simple_name_identifier(function)?, None, None),
        _ => return None,
    };

    let mut receiver = receiver;
    if let Some(host) = receiver {
        if host.kind() == "identifier" && EXTENSION_HOSTS.contains(&text(host, source)) && !args.is_empty()
        {
            receiver = Some(args.remove(0));
        }
    }

    Some(Call {
        node,
        name: text(name_node, source),
        name_node,
        receiver,
        args,
        arg_list,
        member_access,
    })
}

/// The identifier of an `identifier` or `generic_name` node.
fn simple_name_identifier(node: Node<'_>) -> Option<Node<'_>> {
    match node.kind() {
        "identifier" => Some(node),
        "generic_name" => {
            let mut cursor = node.walk();
            let found = node
                .named_children(&mut cursor)
                .find(|c| c.kind() == "identifier");
            found
        }
        _ => None,
    }
}

/// Argument expressions of an `argument_list`.
///
/// Named arguments (`name: value`) and `ref`/`out` modifiers are skipped; the
/// expression is always the last named child of an `argument`.
pub fn arguments(arg_list: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = arg_list.walk();
    arg_list
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "argument")
        .filter_map(|arg| {
            let count = arg.named_child_count();
            if count == 0 {
                None
            } else {
                arg.named_child(count - 1)
            }
        })
        .collect()
}

/// Look through parentheses, casts and the null-forgiving operator.
pub fn unwrap(mut node: Node<'_>) -> Node<'_> {
    loop {
        let inner = match node.kind() {
            "parenthesized_expression" => node.named_child(0),
            "cast_expression" => node.child_by_field_name("value"),
            "postfix_unary_expression" if node.child(1).is_some_and(|op| op.kind() == "!") => {
                node.named_child(0)
            }
            _ => None,
        };
        match inner {
            Some(next) => node = next,
            None => return node,
        }
    }
}

/// The operand of an `await` expression.
pub fn await_operand(node: Node<'_>) -> Option<Node<'_>> {
    if node.kind() == "await_expression" {
        node.named_child(0)
    } else {
        None
    }
}

/// Parameter names of a lambda or anonymous method.
pub fn lambda_parameters<'t>(lambda: Node<'t>, source: &'t str) -> Vec<&'t str> {
    let Some(params) = lambda.child_by_field_name("parameters").or_else(|| {
        let mut cursor = lambda.walk();
        let found = lambda
            .named_children(&mut cursor)
            .find(|c| c.kind() == "parameter_list");
        found
    }) else {
        return Vec::new();
    };

    match params.kind() {
        "implicit_parameter" | "identifier" => vec![text(params, source)],
        _ => {
            let mut cursor = params.walk();
            params
                .named_children(&mut cursor)
                .filter(|c| c.kind() == "parameter")
                .filter_map(|p| {
                    p.child_by_field_name("name")
                        .map(|name| text(name, source))
                })
                .collect()
        }
    }
}

/// Body of a lambda, method or local function.
pub fn function_body(function: Node<'_>) -> Option<Node<'_>> {
    function.child_by_field_name("body")
}

/// The declared name and initializer of a `variable_declarator`.
pub fn declarator_parts(declarator: Node<'_>) -> (Option<Node<'_>>, Option<Node<'_>>) {
    let name = declarator.child_by_field_name("name").or_else(|| {
        let mut cursor = declarator.walk();
        let found = declarator
            .named_children(&mut cursor)
            .find(|c| c.kind() == "identifier");
        found
    });

    let mut cursor = declarator.walk();
    let initializer = declarator
        .named_children(&mut cursor)
        .filter(|c| Some(*c) != name)
        .find(|c| !matches!(c.kind(), "bracketed_argument_list" | "tuple_pattern"))
        .and_then(|c| {
            if c.kind() == "equals_value_clause" {
                c.named_child(0)
            } else {
                Some(c)
            }
        });

    (name, initializer)
}

/// Whether a function-like node carries the `async` modifier.
pub fn has_async_modifier(function: Node<'_>, source: &str) -> bool {
    let body_start = function_body(function)
        .map(|b| b.start_byte())
        .unwrap_or_else(|| function.end_byte());
    let mut cursor = function.walk();
    let found = function
        .children(&mut cursor)
        .take_while(|c| c.start_byte() < body_start)
        .any(|c| text(c, source) == "async");
    found
}

/// Kinds that bind the identifier in their `name` field.
const NAMED_BINDINGS: &[&str] = &[
    "variable_declarator",
    "parameter",
    "catch_declaration",
    "declaration_expression",
    "declaration_pattern",
    "recursive_pattern",
    "var_pattern",
    "from_clause",
];

/// Every local, parameter, loop, pattern and range variable declared
/// inside `node`, including lambda parameters.
pub fn declared_names<'t>(node: Node<'t>, source: &'t str) -> Vec<&'t str> {
    let mut names = Vec::new();
    crate::rules::visitor::walk(node, |n| match n.kind() {
        "implicit_parameter" => names.push(text(n, source)),
        "foreach_statement" => {
            if let Some(left) = n.child_by_field_name("left") {
                crate::rules::visitor::walk(left, |id| {
                    if id.kind() == "identifier" {
                        names.push(text(id, source));
                    }
                });
            }
        }
        "let_clause" | "join_clause" | "parenthesized_variable_designation" => {
            let mut cursor = n.walk();
            names.extend(
                n.named_children(&mut cursor)
                    .filter(|c| c.kind() == "identifier")
                    .map(|c| text(c, source)),
            );
        }
        kind if NAMED_BINDINGS.contains(&kind) => {
            if let Some(name) = n.child_by_field_name("name") {
                names.push(text(name, source));
            }
        }
        _ => {}
    });
    names
}

/// Whether any identifier inside `node` is one of `names`.
pub fn references_any(node: Node<'_>, source: &str, names: &[&str]) -> bool {
    if names.is_empty() {
        return false;
    }
    let mut found = false;
    crate::rules::visitor::walk(node, |n| {
        if !found && n.kind() == "identifier" && names.contains(&text(n, source)) {
            found = true;
        }
    });
    found
}

/// The leftmost identifier of a member-access chain (`u` in `u.Name.ToLower()`).
pub fn root_identifier<'t>(mut node: Node<'t>, source: &'t str) -> Option<&'t str> {
    loop {
        node = unwrap(node);
        match node.kind() {
            "identifier" => return Some(text(node, source)),
            "member_access_expression" => node = node.child_by_field_name("expression")?,
            "invocation_expression" => node = node.child_by_field_name("function")?,
            "element_access_expression" => node = node.child_by_field_name("expression")?,
            "conditional_access_expression" => node = node.named_child(0)?,
            _ => return None,
        }
    }
}

/// Base name of a type: `System.Collections.Generic.List<int>?` becomes `List`.
pub fn type_base_name(type_text: &str) -> &str {
    let without_generics = type_text.split('<').next().unwrap_or(type_text);
    let trimmed = without_generics.trim().trim_end_matches('?');
    trimmed.rsplit('.').next().unwrap_or(trimmed).trim()
}

/// Convert `PascalCase` to `camelCase`.
pub fn lower_camel(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::parser::parse_source;
    use crate::rules::visitor::descendants_of_kind;

    fn calls<'t>(tree: &'t tree_sitter::Tree) -> Vec<Node<'t>> {
        descendants_of_kind(tree.root_node(), "invocation_expression")
    }

    #[test]
    fn test_member_call_decomposition() {
        let source = "class A { void M() { db.Users.Where(u => u.Active); } }";
        let tree = parse_source(source).unwrap();
        let call = as_call(calls(&tree)[0], source).unwrap();
        assert_eq!(call.name, "Where");
        assert_eq!(text(call.receiver.unwrap(), source), "db.Users");
        assert_eq!(call.args.len(), 1);
        assert_eq!(text(call.args[0], source), "u => u.Active");
    }

    #[test]
    fn test_generic_call_decomposition() {
        let source = "class A { void M() { db.Set<User>(); } }";
        let tree = parse_source(source).unwrap();
        let call = as_call(calls(&tree)[0], source).unwrap();
        assert_eq!(call.name, "Set");
        let type_args = call.type_arguments();
        assert_eq!(type_args.len(), 1);
        assert_eq!(text(type_args[0], source), "User");
    }

    #[test]
    fn test_static_extension_form_uses_this_argument() {
        let source = "class A { void M() { Queryable.Where(db.Users, u => u.Active); } }";
        let tree = parse_source(source).unwrap();
        let call = as_call(calls(&tree)[0], source).unwrap();
        assert_eq!(call.name, "Where");
        assert_eq!(text(call.receiver.unwrap(), source), "db.Users");
        assert_eq!(call.args.len(), 1);
    }

    #[test]
    fn test_bare_call_has_no_receiver() {
        let source = "class A { void M() { Compute(1, 2); } }";
        let tree = parse_source(source).unwrap();
        let call = as_call(calls(&tree)[0], source).unwrap();
        assert_eq!(call.name, "Compute");
        assert!(call.receiver.is_none());
        assert_eq!(call.args.len(), 2);
    }

    #[test]
    fn test_lambda_parameters() {
        let source = "class A { void M() { F(u => u.Id); G((a, b) => a + b); } }";
        let tree = parse_source(source).unwrap();
        let lambdas = descendants_of_kind(tree.root_node(), "lambda_expression");
        assert_eq!(lambda_parameters(lambdas[0], source), vec!["u"]);
        assert_eq!(lambda_parameters(lambdas[1], source), vec!["a", "b"]);
    }

    #[test]
    fn test_declarator_parts() {
        let source = "class A { void M() { var query = db.Users; } }";
        let tree = parse_source(source).unwrap();
        let declarator = descendants_of_kind(tree.root_node(), "variable_declarator")[0];
        let (name, init) = declarator_parts(declarator);
        assert_eq!(text(name.unwrap(), source), "query");
        assert_eq!(text(init.unwrap(), source), "db.Users");
    }

    #[test]
    fn test_async_modifier() {
        let source = "class A { async Task M() { } void N() { } }";
        let tree = parse_source(source).unwrap();
        let methods = descendants_of_kind(tree.root_node(), "method_declaration");
        assert!(has_async_modifier(methods[0], source));
        assert!(!has_async_modifier(methods[1], source));
    }

    #[test]
    fn test_root_identifier() {
        let source = "class A { void M() { u.Name.ToLower(); } }";
        let tree = parse_source(source).unwrap();
        let call = calls(&tree)[0];
        assert_eq!(root_identifier(call, source), Some("u"));
    }

    #[test]
    fn test_type_base_name() {
        assert_eq!(type_base_name("DbSet<User>"), "DbSet");
        assert_eq!(type_base_name("Microsoft.EntityFrameworkCore.DbContext"), "DbContext");
        assert_eq!(type_base_name("ShopContext?"), "ShopContext");
        assert_eq!(type_base_name("IQueryable<Order>"), "IQueryable");
    }

    #[test]
    fn test_lower_camel() {
        assert_eq!(lower_camel("ComputeCutoff"), "computeCutoff");
        assert_eq!(lower_camel(""), "");
    }
}
