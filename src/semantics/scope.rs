//! Lexical context of a node: the function it runs in, whether it runs in
//! the database (inside a query lambda), and whether it runs repeatedly.

use super::chain::{walk_chain, QueryChain};
use super::methods::{self, LAMBDA_OPERATORS, PER_ITEM_OPERATORS};
use super::syntax::{self, Call, FUNCTION_KINDS, LAMBDA_KINDS, LOOP_KINDS};
use crate::engine::AnalysisContext;
use crate::rules::visitor::ancestors;
use tree_sitter::Node;

/// A lambda whose body is translated to SQL.
#[derive(Debug, Clone)]
pub struct QueryLambda<'t> {
    /// The lambda passed to the query operator.
    pub lambda: Node<'t>,
    /// The operator receiving the lambda (`Where`, `OrderBy`, ...).
    pub operator: Call<'t>,
    /// The operator's chain.
    pub chain: QueryChain<'t>,
    /// Parameters of every lambda between the node and the query lambda.
    pub params: Vec<&'t str>,
}

/// Why a node runs more than once.
#[derive(Debug, Clone)]
pub enum Repetition<'t> {
    /// Body, condition or update clause of a loop statement.
    Loop(Node<'t>),
    /// Lambda of an in-memory per-item operator (`ForEach`, `Select`, ...).
    PerItem { lambda: Node<'t>, operator: Call<'t> },
}

impl<'t> Repetition<'t> {
    pub fn describe(&self) -> String {
        match self {
            Repetition::Loop(node) => match node.kind() {
                "foreach_statement" => "a foreach loop".to_string(),
                "while_statement" => "a while loop".to_string(),
                "do_statement" => "a do-while loop".to_string(),
                _ => "a for loop".to_string(),
            },
            Repetition::PerItem { operator, .. } => format!("a per-item {} callback", operator.name),
        }
    }
}

/// The nearest method, constructor, accessor, local function, lambda or
/// anonymous method around `node`.
pub fn enclosing_function(node: Node<'_>) -> Option<Node<'_>> {
    ancestors(node).find(|a| FUNCTION_KINDS.contains(&a.kind()))
}

pub fn is_async_function(function: Node<'_>, source: &str) -> bool {
    syntax::has_async_modifier(function, source)
}

/// Whether `node` runs directly inside an `async` function.
///
/// A synchronous lambda nested in an async method is not an async context.
pub fn in_async_context(ctx: &AnalysisContext<'_>, node: Node<'_>) -> bool {
    enclosing_function(node).is_some_and(|f| is_async_function(f, ctx.source))
}

/// The call a lambda is passed to as an argument.
pub fn lambda_operator<'t>(ctx: &AnalysisContext<'t>, lambda: Node<'t>) -> Option<Call<'t>> {
    let argument = lambda.parent().filter(|p| p.kind() == "argument")?;
    let arg_list = argument.parent().filter(|p| p.kind() == "argument_list")?;
    let invocation = arg_list.parent()?;
    let call = syntax::as_call(invocation, ctx.source)?;
    call.args.contains(&lambda).then_some(call)
}

/// The query lambda `node` sits in, if any.
///
/// Lambdas nested inside a query lambda (`u.Orders.Any(o => ...)`) belong
/// to it; their parameters are collected too. Stops at the enclosing method.
pub fn enclosing_query_lambda<'t>(ctx: &AnalysisContext<'t>, node: Node<'t>) -> Option<QueryLambda<'t>> {
    let mut params = Vec::new();
    for ancestor in ancestors(node) {
        let kind = ancestor.kind();
        if LAMBDA_KINDS.contains(&kind) {
            params.extend(syntax::lambda_parameters(ancestor, ctx.source));
            if let Some(operator) = lambda_operator(ctx, ancestor) {
                if methods::is_in(LAMBDA_OPERATORS, operator.name) {
                    let chain = walk_chain(ctx, operator.node);
                    if chain.is_server_side_call() {
                        return Some(QueryLambda {
                            lambda: ancestor,
                            operator,
                            chain,
                            params,
                        });
                    }
                }
            }
        } else if FUNCTION_KINDS.contains(&kind) {
            return None;
        }
    }
    None
}

/// Whether `node` runs once per iteration of something.
///
/// The collection expression of a `foreach` and the initializer of a `for`
/// run once. A query lambda ends the search: its body is SQL.
pub fn enclosing_repetition<'t>(ctx: &AnalysisContext<'t>, node: Node<'t>) -> Option<Repetition<'t>> {
    let mut child = node;
    for ancestor in ancestors(node) {
        let kind = ancestor.kind();
        if LOOP_KINDS.contains(&kind) && repeats_child(ancestor, child) {
            return Some(Repetition::Loop(ancestor));
        }
        if LAMBDA_KINDS.contains(&kind) {
            if let Some(operator) = lambda_operator(ctx, ancestor) {
                if methods::is_in(LAMBDA_OPERATORS, operator.name)
                    && walk_chain(ctx, operator.node).is_server_side_call()
                {
                    return None;
                }
                if methods::is_in(PER_ITEM_OPERATORS, operator.name) {
                    return Some(Repetition::PerItem {
                        lambda: ancestor,
                        operator,
                    });
                }
            }
        } else if FUNCTION_KINDS.contains(&kind) {
            return None;
        }
        child = ancestor;
    }
    None
}

fn repeats_child(loop_node: Node<'_>, child: Node<'_>) -> bool {
    let fields: &[&str] = match loop_node.kind() {
        "foreach_statement" => &["body"],
        "for_statement" => &["body", "condition", "update"],
        _ => &["body", "condition"],
    };
    fields.iter().any(|field| {
        let mut cursor = loop_node.walk();
        let found = loop_node
            .children_by_field_name(field, &mut cursor)
            .any(|n| n == child);
        found
    })
}

/// The statement directly inside a block that contains `node`.
pub fn enclosing_statement(node: Node<'_>) -> Option<Node<'_>> {
    std::iter::once(node)
        .chain(ancestors(node))
        .take_while(|n| n.kind() != "compilation_unit")
        .find(|n| n.kind() == "global_statement" || n.parent().is_some_and(|p| p.kind() == "block"))
}

/// The class, record or struct declaring `node`.
pub fn enclosing_type(node: Node<'_>) -> Option<Node<'_>> {
    ancestors(node).find(|a| {
        matches!(
            a.kind(),
            "class_declaration" | "record_declaration" | "struct_declaration"
        )
    })
}
