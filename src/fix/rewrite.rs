//! Builders for the source edits that code fixes are made of.
//!
//! Every edit is a [`Replacement`] against the analysed file. Edits that
//! touch the same span as another rule's edit are resolved when applied.

use crate::engine::AnalysisContext;
use crate::rules::Replacement;
use crate::semantics::syntax::Call;
use std::collections::HashSet;
use tree_sitter::Node;

/// Replace the byte range `start..end`.
pub fn replace_range(ctx: &AnalysisContext<'_>, start: usize, end: usize, new_text: impl Into<String>) -> Replacement {
    Replacement {
        file_path: ctx.file_path.to_path_buf(),
        start_byte: start,
        end_byte: end,
        new_text: new_text.into(),
    }
}

/// Replace `node` with `new_text`.
pub fn replace_node(ctx: &AnalysisContext<'_>, node: Node<'_>, new_text: impl Into<String>) -> Replacement {
    replace_range(ctx, node.start_byte(), node.end_byte(), new_text)
}

/// Insert `new_text` right after `node`.
pub fn insert_after(ctx: &AnalysisContext<'_>, node: Node<'_>, new_text: impl Into<String>) -> Replacement {
    replace_range(ctx, node.end_byte(), node.end_byte(), new_text)
}

/// Rename the called method, keeping receiver, type arguments and arguments.
pub fn rename_method(ctx: &AnalysisContext<'_>, call: &Call<'_>, new_name: &str) -> Replacement {
    replace_node(ctx, call.name_node, new_name)
}

/// Prefix `expr` with `await`, parenthesising it when it is the receiver
/// of a member access (`(await q.ToListAsync()).Count`).
pub fn wrap_await(ctx: &AnalysisContext<'_>, expr: Node<'_>) -> Vec<Replacement> {
    if needs_parentheses(expr) {
        vec![
            replace_range(ctx, expr.start_byte(), expr.start_byte(), "(await "),
            insert_after(ctx, expr, ")"),
        ]
    } else {
        vec![replace_range(ctx, expr.start_byte(), expr.start_byte(), "await ")]
    }
}

/// Replace `outer` with `await {awaited}`, parenthesised like [`wrap_await`].
pub fn replace_with_await(ctx: &AnalysisContext<'_>, outer: Node<'_>, awaited: Node<'_>) -> Replacement {
    let awaited = ctx.text(awaited);
    if needs_parentheses(outer) {
        replace_node(ctx, outer, format!("(await {awaited})"))
    } else {
        replace_node(ctx, outer, format!("await {awaited}"))
    }
}

/// Whether an `await` replacing `expr` must be parenthesised.
pub fn needs_parentheses(expr: Node<'_>) -> bool {
    expr.parent().is_some_and(|parent| {
        matches!(
            parent.kind(),
            "member_access_expression" | "element_access_expression" | "conditional_access_expression"
        ) && parent.named_child(0) == Some(expr)
    })
}

/// Remove a chained call: `q.ToList().ToList()` becomes `q.ToList()`.
///
/// Only calls written in member form can be removed.
pub fn remove_call(ctx: &AnalysisContext<'_>, call: &Call<'_>) -> Option<Replacement> {
    call.member_access?;
    let receiver = call.receiver?;
    Some(replace_range(ctx, receiver.end_byte(), call.node.end_byte(), ""))
}

/// Declare `var name = value;` on its own line before `statement`,
/// indented like the statement.
pub fn insert_local_before_statement(
    ctx: &AnalysisContext<'_>,
    statement: Node<'_>,
    name: &str,
    value: &str,
) -> Replacement {
    let start = statement.start_byte();
    let indent = indentation_at(ctx.source, start);
    replace_range(ctx, start, start, format!("var {name} = {value};\n{indent}"))
}

/// Leading whitespace of the line containing byte `offset`.
fn indentation_at(source: &str, offset: usize) -> &str {
    let line_start = source[..offset].rfind('\n').map_or(0, |i| i + 1);
    let line = &source[line_start..offset];
    let width = line.len() - line.trim_start().len();
    &line[..width]
}

/// `base`, or `base2`, `base3`, ... when `base` is already declared in the
/// file or in `taken`.
pub fn unique_local_name(ctx: &AnalysisContext<'_>, base: &str, taken: &HashSet<String>) -> String {
    let is_free = |name: &str| !taken.contains(name) && !ctx.symbols.is_declared(name);
    if is_free(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}{n}"))
        .find(|candidate| is_free(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Add `using {namespace};` unless the file already imports it.
///
/// The directive goes after the last top-level `using`, or at the start of
/// the file when there is none.
pub fn ensure_using(ctx: &AnalysisContext<'_>, namespace: &str) -> Option<Replacement> {
    let root = ctx.root();
    let mut cursor = root.walk();
    let usings: Vec<Node<'_>> = root
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "using_directive")
        .collect();

    if usings
        .iter()
        .any(|u| imported_namespace(ctx.text(*u)) == Some(namespace))
    {
        return None;
    }

    match usings.last() {
        Some(last) => Some(insert_after(ctx, *last, format!("\nusing {namespace};"))),
        None => Some(replace_range(ctx, 0, 0, format!("using {namespace};\n"))),
    }
}

/// The namespace of a plain `using` directive (`global` allowed, no alias).
fn imported_namespace(directive: &str) -> Option<&str> {
    let rest = directive.trim().strip_prefix("global").unwrap_or(directive.trim()).trim_start();
    let rest = rest.strip_prefix("using")?.trim_start();
    if rest.starts_with("static ") || rest.contains('=') {
        return None;
    }
    Some(rest.trim_end_matches(';').trim())
}
