//! Analysis engine - coordinates file discovery and rule execution.

mod context;
mod file_analyzer;
pub mod parser;

pub use context::AnalysisContext;
pub use file_analyzer::{
    analyze_file_with_rules, analyze_source_with_rules, read_file_secure, read_file_with_bom,
    UTF8_BOM,
};

use crate::discovery::{discover_csharp_files, DiscoveryOptions};
use crate::rules::{registry, Diagnostic, Rule};
use crate::Config;
use anyhow::Result;
use rayon::prelude::*;
use std::path::Path;
use tracing::{debug, warn};

/// Counters gathered during a run, reported by `--timing`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisStats {
    pub files_analyzed: usize,
    pub files_failed: usize,
    pub rules_run: usize,
}

pub struct Engine<'a> {
    config: &'a Config,
    rules: Vec<Box<dyn Rule>>,
}

impl<'a> Engine<'a> {
    /// An engine running every registered rule.
    pub fn new(config: &'a Config) -> Self {
        Self::with_rules(config, registry::all_rules())
    }

    pub fn with_rules(config: &'a Config, rules: Vec<Box<dyn Rule>>) -> Self {
        Self { config, rules }
    }

    /// Keep only the rules named in `ids`. Unknown ids are logged.
    pub fn restrict_to<S: AsRef<str>>(mut self, ids: &[S]) -> Self {
        for id in ids {
            if !self.rules.iter().any(|r| r.id() == id.as_ref()) {
                warn!(rule = id.as_ref(), "unknown rule requested (ignored)");
            }
        }
        self.rules
            .retain(|r| ids.iter().any(|id| id.as_ref() == r.id()));
        self
    }

    /// Rules this engine will run.
    pub fn rules(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    pub fn analyze(&self, path: &Path) -> Result<Vec<Diagnostic>> {
        self.analyze_with_stats(path).map(|(diagnostics, _)| diagnostics)
    }

    /// Analyze every C# file under `path` in parallel.
    ///
    /// Files that cannot be read or parsed are logged and skipped. The
    /// result is sorted by path, line and column.
    pub fn analyze_with_stats(&self, path: &Path) -> Result<(Vec<Diagnostic>, AnalysisStats)> {
        if !path.exists() {
            anyhow::bail!("Path does not exist: {}", path.display());
        }

        let files = discover_csharp_files(path, &DiscoveryOptions::secure());
        debug!(files = files.len(), rules = self.rules.len(), "starting analysis");

        let results: Vec<_> = files
            .par_iter()
            .map(|file| (file, analyze_file_with_rules(file, self.config, self.rules())))
            .collect();

        let mut stats = AnalysisStats {
            rules_run: self.rules.len(),
            ..AnalysisStats::default()
        };
        let mut diagnostics = Vec::new();
        for (file, result) in results {
            match result {
                Ok(found) => {
                    stats.files_analyzed += 1;
                    diagnostics.extend(found);
                }
                Err(e) => {
                    stats.files_failed += 1;
                    warn!(path = %file.display(), error = %e, "failed to analyze file");
                }
            }
        }

        sort_diagnostics(&mut diagnostics);
        Ok((diagnostics, stats))
    }

    /// Analyze in-memory source as if it lived at `file_path`.
    pub fn analyze_source(&self, file_path: &Path, source: &str) -> Result<Vec<Diagnostic>> {
        let mut diagnostics =
            analyze_source_with_rules(file_path, source, self.config, self.rules())?;
        sort_diagnostics(&mut diagnostics);
        Ok(diagnostics)
    }
}

fn sort_diagnostics(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by(|a, b| {
        (&a.file_path, a.line, a.column, a.rule_id).cmp(&(&b.file_path, b.line, b.column, b.rule_id))
    });
}
