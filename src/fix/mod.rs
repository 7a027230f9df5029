//! Code fix application.
//!
//! Fixes are byte-range replacements produced by [`rewrite`]. They are
//! validated against the file, deduplicated, and written atomically.

pub mod rewrite;

use crate::engine::{read_file_with_bom, UTF8_BOM};
use crate::rules::{Diagnostic, Replacement};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during fix application
#[derive(Debug, Error)]
pub enum FixError {
    #[error("path traversal attempt: {path} is outside base directory {base}")]
    PathTraversal { path: String, base: String },

    #[error("invalid byte offset {offset} for file of length {len} in {path}")]
    InvalidOffset {
        path: String,
        offset: usize,
        len: usize,
    },

    #[error("byte offset {offset} is not on a UTF-8 character boundary in {path}")]
    InvalidUtf8Boundary { path: String, offset: usize },

    #[error("start_byte {start} is greater than end_byte {end} in {path}")]
    InvalidRange {
        path: String,
        start: usize,
        end: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Read(#[from] crate::error::Error),
}

/// Validate that a file path is within the allowed base directory.
///
/// This prevents path traversal attacks where a malicious diagnostic
/// could attempt to write to files outside the project directory.
fn validate_path(path: &Path, base_dir: &Path) -> Result<std::path::PathBuf, FixError> {
    // Canonicalize the base directory
    let canonical_base = base_dir.canonicalize().map_err(FixError::Io)?;

    // For the target path, we need to handle both existing and non-existing files
    let canonical_path = if path.exists() {
        path.canonicalize().map_err(FixError::Io)?
    } else {
        // If file doesn't exist, canonicalize the parent and append the filename
        let parent = path.parent().ok_or_else(|| FixError::PathTraversal {
            path: path.display().to_string(),
            base: canonical_base.display().to_string(),
        })?;
        let filename = path.file_name().ok_or_else(|| FixError::PathTraversal {
            path: path.display().to_string(),
            base: canonical_base.display().to_string(),
        })?;
        let canonical_parent = parent.canonicalize().map_err(FixError::Io)?;
        canonical_parent.join(filename)
    };

    // Verify the path is within the base directory
    if !canonical_path.starts_with(&canonical_base) {
        return Err(FixError::PathTraversal {
            path: canonical_path.display().to_string(),
            base: canonical_base.display().to_string(),
        });
    }

    Ok(canonical_path)
}

/// Validate byte offsets for a replacement operation.
fn validate_offsets(
    replacement: &Replacement,
    content: &str,
    path: &Path,
) -> Result<(), FixError> {
    let path_str = path.display().to_string();
    let len = content.len();

    // Check bounds
    if replacement.start_byte > len {
        return Err(FixError::InvalidOffset {
            path: path_str,
            offset: replacement.start_byte,
            len,
        });
    }

    if replacement.end_byte > len {
        return Err(FixError::InvalidOffset {
            path: path_str,
            offset: replacement.end_byte,
            len,
        });
    }

    // Check ordering
    if replacement.start_byte > replacement.end_byte {
        return Err(FixError::InvalidRange {
            path: path_str,
            start: replacement.start_byte,
            end: replacement.end_byte,
        });
    }

    // Check UTF-8 boundaries
    if !content.is_char_boundary(replacement.start_byte) {
        return Err(FixError::InvalidUtf8Boundary {
            path: path_str,
            offset: replacement.start_byte,
        });
    }

    if !content.is_char_boundary(replacement.end_byte) {
        return Err(FixError::InvalidUtf8Boundary {
            path: path_str,
            offset: replacement.end_byte,
        });
    }

    Ok(())
}

/// Whether two edits from different fixes touch the same bytes.
///
/// Insertions at the same offset stack, and an insertion at either end of
/// a replaced range stays outside it.
fn overlaps(a: &Replacement, b: &Replacement) -> bool {
    let a_insert = a.start_byte == a.end_byte;
    let b_insert = b.start_byte == b.end_byte;
    match (a_insert, b_insert) {
        (true, true) => false,
        (true, false) => b.start_byte < a.start_byte && a.start_byte < b.end_byte,
        (false, true) => a.start_byte < b.start_byte && b.start_byte < a.end_byte,
        (false, false) => a.start_byte < b.end_byte && b.start_byte < a.end_byte,
    }
}

/// Apply `fixes` to `content`. Each entry holds the edits of one fix.
///
/// Offsets are validated first. Fixes are taken in order, and a fix is
/// accepted or skipped as a whole: if any of its edits overlaps an edit
/// already accepted, none of them is applied. An edit identical to one
/// already accepted (the same `using` directive from two diagnostics) is
/// applied once. Accepted edits are applied back to front so offsets stay
/// valid; insertions at the same offset keep their acceptance order.
pub fn apply_replacements(
    content: &str,
    fixes: &[Vec<&Replacement>],
    path: &Path,
) -> Result<String, FixError> {
    for replacement in fixes.iter().flatten() {
        validate_offsets(replacement, content, path)?;
    }

    let mut accepted: Vec<&Replacement> = Vec::new();
    for fix in fixes {
        let mut pending: Vec<&Replacement> = Vec::with_capacity(fix.len());
        for &replacement in fix {
            if !accepted.contains(&replacement) && !pending.contains(&replacement) {
                pending.push(replacement);
            }
        }

        let clash = pending.iter().enumerate().any(|(i, edit)| {
            accepted
                .iter()
                .chain(&pending[..i])
                .any(|other| overlaps(edit, other))
        });
        if clash {
            if let Some(first) = fix.first() {
                warn!(
                    "Skipping overlapping fix at {}:{}..{}",
                    path.display(),
                    first.start_byte,
                    first.end_byte
                );
            }
            continue;
        }
        accepted.extend(pending);
    }

    // Stable, so equal offsets keep acceptance order.
    accepted.sort_by_key(|r| (r.start_byte, r.end_byte));

    let mut result = content.to_string();
    for replacement in accepted.iter().rev() {
        result.replace_range(
            replacement.start_byte..replacement.end_byte,
            &replacement.new_text,
        );
    }
    Ok(result)
}

/// Apply code fixes from diagnostics with safety checks.
///
/// All file paths must resolve inside `base_dir`. Fixes are grouped per
/// file in diagnostic order and applied with [`apply_replacements`]. A
/// leading byte order mark is set aside while editing, since fix offsets
/// refer to the text without it, and written back. Each file is written
/// through a temporary file that is then persisted over the original.
///
/// Returns the number of files changed.
pub fn apply_fixes(diagnostics: &[Diagnostic], base_dir: &Path) -> Result<usize, FixError> {
    let mut by_file: HashMap<&Path, Vec<Vec<&Replacement>>> = HashMap::new();

    for fix in diagnostics.iter().filter_map(|d| d.fix.as_ref()) {
        let mut per_file: HashMap<&Path, Vec<&Replacement>> = HashMap::new();
        for replacement in &fix.replacements {
            per_file
                .entry(replacement.file_path.as_path())
                .or_default()
                .push(replacement);
        }
        for (path, edits) in per_file {
            by_file.entry(path).or_default().push(edits);
        }
    }

    let mut fixed = 0;

    for (path, fixes) in by_file {
        let validated_path = validate_path(path, base_dir)?;
        let raw = read_file_with_bom(&validated_path)?;
        let (bom, content) = match raw.strip_prefix(UTF8_BOM) {
            Some(rest) => (UTF8_BOM, rest),
            None => ("", raw.as_str()),
        };

        let result = apply_replacements(content, &fixes, path)?;
        if result == content {
            continue;
        }

        // SECURITY: random temp file name in the same directory, then rename
        let parent = validated_path.parent().unwrap_or(Path::new("."));
        let mut temp_file = NamedTempFile::new_in(parent)?;
        temp_file.write_all(bom.as_bytes())?;
        temp_file.write_all(result.as_bytes())?;
        temp_file.flush()?;
        temp_file
            .persist(&validated_path)
            .map_err(|e| FixError::Io(e.error))?;

        debug!("Applied {} fix(es) to {}", fixes.len(), path.display());
        fixed += 1;
    }

    Ok(fixed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_path_traversal_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();

        // Create a path outside the base directory
        let evil_path = PathBuf::from("/etc/passwd");

        let result = validate_path(&evil_path, base);
        assert!(result.is_err());

        if let Err(FixError::PathTraversal { .. }) = result {
            // Expected
        } else {
            panic!("Expected PathTraversal error");
        }
    }

    #[test]
    fn test_valid_path_accepted() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();

        // Create a file inside the base directory
        let valid_path = base.join("Test.cs");
        std::fs::write(&valid_path, "test").unwrap();

        let result = validate_path(&valid_path, base);
        assert!(result.is_ok());
    }

    #[test]
    fn test_invalid_offset_rejected() {
        let content = "hello";
        let replacement = Replacement {
            file_path: PathBuf::from("Test.cs"),
            start_byte: 0,
            end_byte: 100, // Way past end of content
            new_text: "world".to_string(),
        };

        let result = validate_offsets(&replacement, content, Path::new("Test.cs"));
        assert!(matches!(result, Err(FixError::InvalidOffset { .. })));
    }

    #[test]
    fn test_invalid_range_rejected() {
        let content = "hello";
        let replacement = Replacement {
            file_path: PathBuf::from("Test.cs"),
            start_byte: 3,
            end_byte: 1, // start > end
            new_text: "world".to_string(),
        };

        let result = validate_offsets(&replacement, content, Path::new("Test.cs"));
        assert!(matches!(result, Err(FixError::InvalidRange { .. })));
    }

    fn replacement(start: usize, end: usize, text: &str) -> Replacement {
        Replacement {
            file_path: PathBuf::from("Test.cs"),
            start_byte: start,
            end_byte: end,
            new_text: text.to_string(),
        }
    }

    #[test]
    fn test_apply_replacements_back_to_front() {
        let content = "db.Users.ToList();";
        let a = replacement(8, 8, ".AsNoTracking()");
        let b = replacement(0, 0, "var x = ");
        let result = apply_replacements(content, &[vec![&a], vec![&b]], Path::new("Test.cs")).unwrap();
        assert_eq!(result, "var x = db.Users.AsNoTracking().ToList();");
    }

    #[test]
    fn test_identical_replacements_apply_once() {
        let content = "class A {}";
        let using = replacement(0, 0, "using Microsoft.EntityFrameworkCore;\n");
        let same = using.clone();
        let result =
            apply_replacements(content, &[vec![&using], vec![&same]], Path::new("Test.cs")).unwrap();
        assert_eq!(result, "using Microsoft.EntityFrameworkCore;\nclass A {}");
    }

    #[test]
    fn test_overlapping_replacement_is_skipped() {
        let content = "abcdef";
        let first = replacement(1, 4, "X");
        let second = replacement(2, 5, "Y");
        let result =
            apply_replacements(content, &[vec![&first], vec![&second]], Path::new("Test.cs")).unwrap();
        assert_eq!(result, "aXef");
    }

    #[test]
    fn test_insertions_at_same_offset_stack() {
        let content = "x;";
        let a = replacement(0, 0, "var a = 1;\n");
        let b = replacement(0, 0, "var b = 2;\n");
        let result = apply_replacements(content, &[vec![&a], vec![&b]], Path::new("Test.cs")).unwrap();
        assert_eq!(result, "var a = 1;\nvar b = 2;\nx;");
    }

    #[test]
    fn test_insertion_inside_replaced_range_clashes() {
        let content = "q.ToList().Count";
        let shorten = replacement(1, 16, ".Count()");
        let insert = replacement(10, 10, ")");
        let result =
            apply_replacements(content, &[vec![&shorten], vec![&insert]], Path::new("Test.cs")).unwrap();
        assert_eq!(result, "q.Count()");
    }

    #[test]
    fn test_fix_is_skipped_as_a_whole() {
        let content = "db.Users.ToList().Count";
        let count = replacement(8, 23, ".Count()");
        let await_open = replacement(0, 0, "(await ");
        let rename = replacement(9, 15, "ToListAsync");
        let await_close = replacement(17, 17, ")");
        let no_tracking = replacement(8, 8, ".AsNoTracking()");
        let using = replacement(0, 0, "using Microsoft.EntityFrameworkCore;\n");

        let fixes = vec![
            vec![&count],
            vec![&await_open, &rename, &await_close],
            vec![&no_tracking, &using],
        ];
        let result = apply_replacements(content, &fixes, Path::new("Test.cs")).unwrap();
        assert_eq!(
            result,
            "using Microsoft.EntityFrameworkCore;\ndb.Users.AsNoTracking().Count()"
        );
    }

    #[test]
    fn test_overlap_within_a_fix_skips_it() {
        let content = "abcdef";
        let a = replacement(1, 4, "X");
        let b = replacement(2, 5, "Y");
        let result = apply_replacements(content, &[vec![&a, &b]], Path::new("Test.cs")).unwrap();
        assert_eq!(result, content);
    }

    fn fix_diagnostic(file: &Path, edits: Vec<Replacement>) -> Diagnostic {
        Diagnostic {
            rule_id: "sync-over-async",
            severity: crate::Severity::Warning,
            message: "m".to_string(),
            file_path: file.to_path_buf(),
            line: 1,
            column: 1,
            end_line: None,
            end_column: None,
            suggestion: None,
            fix: Some(crate::rules::Fix {
                description: "Await the async counterpart".to_string(),
                replacements: edits,
            }),
        }
    }

    #[test]
    fn test_apply_fixes_preserves_bom() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("Repo.cs");
        let source = "class S { async Task M(AppDbContext db) { db.SaveChanges(); } }";
        let mut bytes = b"\xEF\xBB\xBF".to_vec();
        bytes.extend_from_slice(source.as_bytes());
        std::fs::write(&file, bytes).unwrap();

        // Offsets into the text without the BOM.
        let call = source.find("db.SaveChanges").unwrap();
        let name = source.find("SaveChanges").unwrap();
        let edits = vec![
            Replacement {
                file_path: file.clone(),
                start_byte: call,
                end_byte: call,
                new_text: "await ".to_string(),
            },
            Replacement {
                file_path: file.clone(),
                start_byte: name,
                end_byte: name + "SaveChanges".len(),
                new_text: "SaveChangesAsync".to_string(),
            },
        ];

        let fixed = apply_fixes(&[fix_diagnostic(&file, edits)], temp_dir.path()).unwrap();
        assert_eq!(fixed, 1);

        let written = std::fs::read(&file).unwrap();
        assert!(written.starts_with(b"\xEF\xBB\xBF"));
        assert_eq!(
            std::str::from_utf8(&written[3..]).unwrap(),
            "class S { async Task M(AppDbContext db) { await db.SaveChangesAsync(); } }"
        );
    }

    #[test]
    fn test_apply_fixes_writes_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("Repo.cs");
        std::fs::write(&file, "var n = q.Count() > 0;").unwrap();

        let diagnostic = Diagnostic {
            rule_id: "count-for-existence",
            severity: crate::Severity::Warning,
            message: "m".to_string(),
            file_path: file.clone(),
            line: 1,
            column: 9,
            end_line: None,
            end_column: None,
            suggestion: None,
            fix: Some(crate::rules::Fix {
                description: "Use Any()".to_string(),
                replacements: vec![Replacement {
                    file_path: file.clone(),
                    start_byte: 8,
                    end_byte: 21,
                    new_text: "q.Any()".to_string(),
                }],
            }),
        };

        let fixed = apply_fixes(&[diagnostic], temp_dir.path()).unwrap();
        assert_eq!(fixed, 1);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "var n = q.Any();");
    }

    #[test]
    fn test_utf8_boundary_rejected() {
        let content = "héllo"; // 'é' is 2 bytes
        let replacement = Replacement {
            file_path: PathBuf::from("Test.cs"),
            start_byte: 2, // Middle of 'é'
            end_byte: 3,
            new_text: "a".to_string(),
        };

        let result = validate_offsets(&replacement, content, Path::new("Test.cs"));
        assert!(matches!(result, Err(FixError::InvalidUtf8Boundary { .. })));
    }
}
