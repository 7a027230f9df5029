//! File discovery utilities for efcheck.
//!
//! Walks a project tree and collects the C# sources worth analyzing.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Maximum file size to analyze (10 MB).
///
/// Files larger than this are skipped to prevent memory exhaustion attacks.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// File name suffixes produced by code generators (designers, source generators).
const GENERATED_SUFFIXES: &[&str] = &[".g.cs", ".g.i.cs", ".Designer.cs", ".AssemblyInfo.cs"];

/// Options for file discovery.
#[derive(Clone, Debug, Default)]
pub struct DiscoveryOptions {
    /// Whether to check file size limits.
    pub check_file_size: bool,
    /// Whether to perform TOCTOU-safe metadata checks.
    pub security_checks: bool,
}

impl DiscoveryOptions {
    /// Create options with all security checks enabled (recommended for engine).
    pub fn secure() -> Self {
        Self {
            check_file_size: true,
            security_checks: true,
        }
    }

    /// Create options without security checks (faster, for trusted contexts).
    pub fn fast() -> Self {
        Self {
            check_file_size: false,
            security_checks: false,
        }
    }
}

/// Discover all C# files at the given path.
///
/// This function walks the directory tree, filtering out:
/// - `bin` and `obj` directories (MSBuild output)
/// - Hidden directories (starting with `.`)
/// - Common non-source directories (node_modules, packages, etc.)
/// - Generated sources (`*.g.cs`, `*.Designer.cs`, ...)
/// - Files that are too large (when `options.check_file_size` is true)
/// - Symlinks (when `options.security_checks` is true)
///
/// When `path` is a single file it is returned as-is if it is a C# file.
pub fn discover_csharp_files(path: &Path, options: &DiscoveryOptions) -> Vec<PathBuf> {
    let mut files = Vec::new();

    // SECURITY: Disable symlink following within the tree to prevent attacks
    // Note: We allow the root path to be a symlink (common for /tmp on macOS)
    for entry in WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_excluded_dir(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let file_path = entry.path();

        if !is_csharp_source(file_path) {
            continue;
        }

        if options.security_checks {
            // SECURITY: Double-check it's a regular file via metadata
            match std::fs::symlink_metadata(file_path) {
                Ok(meta) if meta.is_file() => {
                    if options.check_file_size && meta.len() > MAX_FILE_SIZE {
                        tracing::warn!(
                            path = %file_path.display(),
                            size = meta.len(),
                            max = MAX_FILE_SIZE,
                            "skipping file (too large)"
                        );
                        continue;
                    }
                    files.push(file_path.to_path_buf());
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %file_path.display(), error = %e, "cannot read metadata");
                    continue;
                }
            }
        } else {
            files.push(file_path.to_path_buf());
        }
    }

    files.sort();
    files
}

/// Whether the path names a hand-written C# source file.
pub fn is_csharp_source(path: &Path) -> bool {
    if !path.extension().is_some_and(|ext| ext == "cs") {
        return false;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    !GENERATED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Check if a directory entry should be excluded from traversal.
///
/// Note: The root directory (depth 0) is never excluded, even if it starts with `.`.
pub fn is_excluded_dir(entry: &walkdir::DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }

    // Never exclude the root directory (allows temp dirs like .tmpXXX)
    if entry.depth() == 0 {
        return false;
    }

    let name = entry.file_name().to_string_lossy();

    if name.starts_with('.') {
        return true;
    }

    matches!(
        name.as_ref(),
        "bin" | "obj" | "node_modules" | "packages" | "TestResults" | "artifacts"
    )
}
