//! efcheck: static analysis for Entity Framework Core data access
//!
//! Catch query anti-patterns in C# sources before they reach production.

pub mod baseline;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod fix;
pub mod reporter;
pub mod rules;
pub mod semantics;
pub mod suppression;

pub use config::Config;
pub use engine::{AnalysisContext, Engine};
pub use error::{Error, Result};
pub use rules::{Diagnostic, Rule, Severity};

/// Run analysis on a project directory
pub fn analyze(path: &std::path::Path, config: &Config) -> anyhow::Result<Vec<Diagnostic>> {
    let engine = Engine::new(config);
    engine.analyze(path)
}
