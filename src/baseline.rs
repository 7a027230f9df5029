//! Baseline support for ignoring known issues.
//!
//! A baseline file records the fingerprints of existing diagnostics so they
//! can be filtered out of later runs. Teams adopting efcheck on a legacy
//! data layer baseline what exists today and fail CI only on new issues.
//!
//! # Fingerprinting Strategy
//!
//! Diagnostics are fingerprinted using:
//! - Rule ID
//! - Path relative to the analyzed root
//! - A hash of the trimmed source lines around the diagnostic
//!
//! A fingerprint survives edits elsewhere in the file. It changes when the
//! flagged code itself or its immediate neighbours change.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::Diagnostic;

/// Default baseline filename
pub const BASELINE_FILENAME: &str = ".efcheck-baseline";

const BASELINE_VERSION: u32 = 1;

/// A fingerprint that uniquely identifies a diagnostic
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// The rule that produced this diagnostic
    pub rule_id: String,
    /// Relative path to the file, with `/` separators
    pub file_path: String,
    /// Hash of the source code context
    pub code_hash: u64,
}

impl Fingerprint {
    /// Fingerprint `diag` against the already-split lines of its file.
    pub fn from_lines(diag: &Diagnostic, root: &Path, lines: &[&str]) -> Option<Self> {
        let file_path = diag
            .file_path
            .strip_prefix(root)
            .unwrap_or(&diag.file_path)
            .to_string_lossy()
            .replace('\\', "/");

        Some(Fingerprint {
            rule_id: diag.rule_id.to_string(),
            file_path,
            code_hash: context_hash(lines, diag.line)?,
        })
    }
}

/// Hash the trimmed lines `line - 1 ..= line + 1` (1-indexed).
fn context_hash(lines: &[&str], line: usize) -> Option<u64> {
    if line == 0 || line > lines.len() {
        return None;
    }

    let start = line.saturating_sub(2);
    let end = (line + 1).min(lines.len());

    let mut context = String::new();
    for text in &lines[start..end] {
        context.push_str(text.trim());
        context.push('\n');
    }

    Some(stable_hash(&context))
}

/// FNV-1a, stable across Rust versions and platforms.
fn stable_hash(s: &str) -> u64 {
    const FNV_OFFSET: u64 = 14695981039346656037;
    const FNV_PRIME: u64 = 1099511628211;

    s.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
    })
}

/// A baseline entry with human-readable metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineEntry {
    /// The diagnostic fingerprint
    pub fingerprint: Fingerprint,
    /// Human-readable description
    pub description: String,
}

/// A collection of baselined diagnostics
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Baseline {
    /// Schema version for forward compatibility
    pub version: u32,
    /// Baselined entries
    pub entries: Vec<BaselineEntry>,

    #[serde(skip)]
    fingerprints: HashSet<Fingerprint>,
}

impl Baseline {
    /// Create a new empty baseline
    pub fn new() -> Self {
        Baseline {
            version: BASELINE_VERSION,
            entries: Vec::new(),
            fingerprints: HashSet::new(),
        }
    }

    /// Load a baseline from the default location
    pub fn load(root: &Path) -> std::io::Result<Self> {
        Self::load_from(root.join(BASELINE_FILENAME))
    }

    /// Load a baseline from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let mut baseline: Baseline = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        if baseline.version != BASELINE_VERSION {
            tracing::warn!(
                version = baseline.version,
                "baseline was written by a different efcheck version"
            );
        }

        baseline.fingerprints = baseline
            .entries
            .iter()
            .map(|e| e.fingerprint.clone())
            .collect();

        Ok(baseline)
    }

    /// Save the baseline to the default location
    pub fn save(&self, root: &Path) -> std::io::Result<()> {
        self.save_to(root.join(BASELINE_FILENAME))
    }

    /// Save the baseline to a specific path
    pub fn save_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Create a baseline from a list of diagnostics.
    ///
    /// Each source file is read once.
    pub fn from_diagnostics(diagnostics: &[Diagnostic], root: &Path) -> Self {
        let mut baseline = Baseline::new();
        let mut sources = SourceCache::default();

        for diag in diagnostics {
            let Some(fingerprint) = sources.fingerprint(diag, root) else {
                continue;
            };
            if baseline.fingerprints.insert(fingerprint.clone()) {
                baseline.entries.push(BaselineEntry {
                    fingerprint,
                    description: format!(
                        "{}: {} ({}:{})",
                        diag.rule_id,
                        diag.message,
                        diag.file_path.display(),
                        diag.line
                    ),
                });
            }
        }

        baseline
    }

    /// Drop diagnostics recorded in the baseline, keeping order.
    ///
    /// A diagnostic that cannot be fingerprinted is kept.
    pub fn filter(&self, diagnostics: Vec<Diagnostic>, root: &Path) -> Vec<Diagnostic> {
        let mut sources = SourceCache::default();
        diagnostics
            .into_iter()
            .filter(|diag| {
                sources
                    .fingerprint(diag, root)
                    .is_none_or(|fp| !self.fingerprints.contains(&fp))
            })
            .collect()
    }

    /// Number of entries in the baseline
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if baseline is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// File contents read while fingerprinting; `None` for unreadable files.
#[derive(Default)]
struct SourceCache {
    files: HashMap<PathBuf, Option<String>>,
}

impl SourceCache {
    fn fingerprint(&mut self, diag: &Diagnostic, root: &Path) -> Option<Fingerprint> {
        let source = self
            .files
            .entry(diag.file_path.clone())
            .or_insert_with(|| fs::read_to_string(&diag.file_path).ok())
            .as_deref()?;
        let lines: Vec<&str> = source.lines().collect();
        Fingerprint::from_lines(diag, root, &lines)
    }
}
