//! Shared tree traversal for rule implementations.
//!
//! tree-sitter trees are walked with a cursor instead of recursion, so deeply
//! nested sources cannot overflow the stack. The depth limit still bounds how
//! far a single walk descends into pathological input.

use tree_sitter::Node;

/// Maximum node depth visited by [`walk`].
/// Protects against maliciously crafted deeply-nested code.
pub const MAX_RECURSION_DEPTH: usize = 2048;

/// Visit `root` and all of its descendants in pre-order.
///
/// Subtrees below [`MAX_RECURSION_DEPTH`] are skipped.
pub fn walk<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>)) {
    let mut cursor = root.walk();
    let mut depth = 0usize;

    loop {
        visit(cursor.node());

        if depth < MAX_RECURSION_DEPTH && cursor.goto_first_child() {
            depth += 1;
            continue;
        }

        loop {
            if depth == 0 {
                return;
            }
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
            depth -= 1;
        }
    }
}

/// Collect every descendant of `root` (inclusive) with the given kind.
pub fn descendants_of_kind<'t>(root: Node<'t>, kind: &str) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    walk(root, |node| {
        if node.kind() == kind {
            found.push(node);
        }
    });
    found
}

/// Iterate the ancestors of `node`, nearest first.
pub fn ancestors(node: Node<'_>) -> impl Iterator<Item = Node<'_>> {
    std::iter::successors(node.parent(), |n| n.parent())
}
