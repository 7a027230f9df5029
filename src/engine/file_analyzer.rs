//! Per-file analysis: TOCTOU-safe reading, parsing and rule execution.

use crate::discovery::MAX_FILE_SIZE;
use crate::engine::context::AnalysisContext;
use crate::engine::parser;
use crate::error::{Error, Result};
use crate::rules::{Diagnostic, Rule};
use crate::suppression::SuppressionExtractor;
use crate::Config;
use std::any::Any;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Extract a human-readable message from a panic payload.
fn extract_panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "(unknown panic payload)".to_string()
}

/// UTF-8 byte order mark, as it appears at the start of a decoded file.
pub const UTF8_BOM: &str = "\u{feff}";

/// Read a file with TOCTOU-safe handling.
///
/// The file is opened once; type and size are checked on the open
/// descriptor, and the content is read from that same descriptor. A
/// leading byte order mark is kept.
pub fn read_file_with_bom(file_path: &Path) -> Result<String> {
    let mut file = File::open(file_path).map_err(|e| Error::io(file_path, e))?;
    let metadata = file.metadata().map_err(|e| Error::io(file_path, e))?;

    if !metadata.is_file() {
        return Err(Error::io(
            file_path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }

    if metadata.len() > MAX_FILE_SIZE {
        return Err(Error::io(
            file_path,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "file too large: {} bytes (max: {} bytes)",
                    metadata.len(),
                    MAX_FILE_SIZE
                ),
            ),
        ));
    }

    let mut bytes = Vec::with_capacity(metadata.len() as usize);
    file.read_to_end(&mut bytes)
        .map_err(|e| Error::io(file_path, e))?;

    String::from_utf8(bytes).map_err(|e| {
        Error::io(
            file_path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })
}

/// Read a file like [`read_file_with_bom`] and drop the byte order mark.
///
/// Visual Studio writes C# files with a BOM by default. Diagnostic and fix
/// offsets refer to the text without it.
pub fn read_file_secure(file_path: &Path) -> Result<String> {
    let content = read_file_with_bom(file_path)?;
    Ok(match content.strip_prefix(UTF8_BOM) {
        Some(rest) => rest.to_string(),
        None => content,
    })
}

/// Read, parse and analyze one file.
pub fn analyze_file_with_rules<'a, I>(
    file_path: &Path,
    config: &Config,
    rules: I,
) -> Result<Vec<Diagnostic>>
where
    I: Iterator<Item = &'a dyn Rule>,
{
    let source = read_file_secure(file_path)?;
    analyze_source_with_rules(file_path, &source, config, rules)
}

/// Analyze in-memory source as if it were `file_path`.
///
/// Each enabled rule runs under `catch_unwind`; a panicking rule is
/// logged and skipped. Configured severities replace rule defaults and
/// suppressed diagnostics are dropped.
pub fn analyze_source_with_rules<'a, I>(
    file_path: &Path,
    source: &str,
    config: &Config,
    rules: I,
) -> Result<Vec<Diagnostic>>
where
    I: Iterator<Item = &'a dyn Rule>,
{
    let tree = parser::parse_source(source).map_err(|e| Error::parse(file_path, e.to_string()))?;

    let ctx = AnalysisContext::new(file_path, source, &tree, config);
    let suppressions = SuppressionExtractor::new(source, &tree);

    let mut diagnostics = Vec::new();

    for rule in rules {
        let Some(severity) = config.rule_severity(rule.id(), rule.default_severity()) else {
            continue;
        };

        let rule_diagnostics =
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| rule.check(&ctx))) {
                Ok(diags) => diags,
                Err(panic_payload) => {
                    warn!(
                        rule = rule.id(),
                        path = %file_path.display(),
                        "rule panicked: {}",
                        extract_panic_message(panic_payload.as_ref())
                    );
                    continue;
                }
            };

        for mut diag in rule_diagnostics {
            if suppressions.is_suppressed(diag.rule_id, diag.line) {
                debug!(rule = diag.rule_id, line = diag.line, "suppressed");
                continue;
            }
            diag.severity = severity;
            diagnostics.push(diag);
        }
    }

    Ok(diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleSeverity;
    use crate::rules::registry;
    use crate::{AnalysisContext, Severity};
    use tempfile::TempDir;

    const N_PLUS_ONE: &str = r#"
class S {
    void M(AppDbContext db, List<int> ids) {
        foreach (var id in ids) {
            var user = db.Users.Find(id);
        }
    }
}"#;

    struct PanickingRule;

    impl Rule for PanickingRule {
        fn id(&self) -> &'static str {
            "panicking-rule"
        }
        fn name(&self) -> &'static str {
            "Panicking Rule"
        }
        fn description(&self) -> &'static str {
            "Always panics"
        }
        fn default_severity(&self) -> Severity {
            Severity::Error
        }
        fn check(&self, _ctx: &AnalysisContext) -> Vec<Diagnostic> {
            panic!("boom")
        }
    }

    fn run(source: &str, config: &Config) -> Vec<Diagnostic> {
        let rules = registry::all_rules();
        analyze_source_with_rules(
            Path::new("Test.cs"),
            source,
            config,
            rules.iter().map(|r| r.as_ref()),
        )
        .unwrap()
    }

    #[test]
    fn test_read_file_secure_success() {
        let tmp = TempDir::new().unwrap();
        let file_path = tmp.path().join("A.cs");
        std::fs::write(&file_path, "class A { }").unwrap();

        let content = read_file_secure(&file_path).unwrap();
        assert_eq!(content, "class A { }");
    }

    #[test]
    fn test_read_file_secure_strips_bom() {
        let tmp = TempDir::new().unwrap();
        let file_path = tmp.path().join("A.cs");
        std::fs::write(&file_path, b"\xEF\xBB\xBFclass A { }").unwrap();

        assert_eq!(read_file_secure(&file_path).unwrap(), "class A { }");
        assert_eq!(
            read_file_with_bom(&file_path).unwrap(),
            "\u{feff}class A { }"
        );
    }

    #[test]
    fn test_read_file_secure_not_found() {
        let result = read_file_secure(Path::new("/nonexistent/File.cs"));
        assert!(result.is_err());
    }

    #[test]
    fn test_read_file_secure_directory() {
        let tmp = TempDir::new().unwrap();
        let result = read_file_secure(tmp.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_severity_override_and_allow() {
        let mut config = Config::default();
        config
            .rules
            .insert("n-plus-one-query".to_string(), RuleSeverity::Warn);
        let diagnostics = run(N_PLUS_ONE, &config);
        let n_plus_one: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.rule_id == "n-plus-one-query")
            .collect();
        assert_eq!(n_plus_one.len(), 1);
        assert_eq!(n_plus_one[0].severity, Severity::Warning);

        config
            .rules
            .insert("n-plus-one-query".to_string(), RuleSeverity::Allow);
        assert!(run(N_PLUS_ONE, &config)
            .iter()
            .all(|d| d.rule_id != "n-plus-one-query"));
    }

    #[test]
    fn test_suppressed_diagnostics_are_dropped() {
        let source = N_PLUS_ONE.replace(
            "            var user",
            "            // efcheck-ignore: n-plus-one-query\n            var user",
        );
        assert!(run(&source, &Config::default())
            .iter()
            .all(|d| d.rule_id != "n-plus-one-query"));
    }

    #[test]
    fn test_panicking_rule_is_isolated() {
        let panicking = PanickingRule;
        let rules = registry::all_rules();
        let all = std::iter::once(&panicking as &dyn Rule).chain(rules.iter().map(|r| r.as_ref()));

        let diagnostics =
            analyze_source_with_rules(Path::new("Test.cs"), N_PLUS_ONE, &Config::default(), all)
                .unwrap();
        assert!(diagnostics.iter().any(|d| d.rule_id == "n-plus-one-query"));
    }
}
