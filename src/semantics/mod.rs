//! Lightweight, file-local semantic model over the tree-sitter C# tree.
//!
//! There is no binder: types are known only as declared in the file, and
//! the rules work from call chains, declared types and lexical context.

pub mod chain;
pub mod methods;
pub mod scope;
pub mod symbols;
pub mod syntax;
