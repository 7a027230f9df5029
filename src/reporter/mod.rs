//! Output formats for analysis results.

pub mod console;
pub mod json;
pub mod sarif;
