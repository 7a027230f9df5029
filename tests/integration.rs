//! Integration tests for efcheck
//!
//! Runs the public library API against the C# fixtures.

use efcheck::config::RuleSeverity;
use efcheck::{analyze, Config, Engine, Severity};
use std::collections::HashSet;
use std::path::Path;

const BAD: &str = "tests/fixtures/BadQueries.cs";
const CLEAN: &str = "tests/fixtures/CleanQueries.cs";

fn rule_ids(path: &str, config: &Config) -> HashSet<&'static str> {
    analyze(Path::new(path), config)
        .expect("Analysis should succeed")
        .iter()
        .map(|d| d.rule_id)
        .collect()
}

#[test]
fn test_bad_fixture_triggers_every_rule_family() {
    let ids = rule_ids(BAD, &Config::default());

    for expected in [
        "n-plus-one-query",
        "save-changes-in-loop",
        "sync-over-async",
        "blocking-async-call",
        "materialize-to-count",
        "count-for-existence",
        "client-side-evaluation",
        "missing-as-no-tracking",
        "cartesian-explosion",
        "unordered-pagination",
        "last-without-order-by",
        "raw-sql-injection",
        "non-sargable-predicate",
        "untranslatable-method-in-query",
        "dbcontext-singleton-lifetime",
    ] {
        assert!(ids.contains(expected), "expected {expected} in {ids:?}");
    }
}

#[test]
fn test_clean_fixture_has_no_issues() {
    let diagnostics = analyze(Path::new(CLEAN), &Config::default()).unwrap();
    assert!(
        diagnostics.is_empty(),
        "Clean code should have no issues: {:#?}",
        diagnostics
    );
}

#[test]
fn test_diagnostics_point_into_fixture() {
    let source = std::fs::read_to_string(BAD).unwrap();
    let diagnostics = analyze(Path::new(BAD), &Config::default()).unwrap();

    let n_plus_one = diagnostics
        .iter()
        .find(|d| d.rule_id == "n-plus-one-query")
        .expect("n-plus-one-query reported");
    let line = source.lines().nth(n_plus_one.line - 1).unwrap();
    assert!(line.contains("_db.Customers.Find"), "unexpected line: {line}");
    assert_eq!(n_plus_one.severity, Severity::Error);
}

#[test]
fn test_config_allow_disables_rule() {
    let mut config = Config::default();
    config
        .rules
        .insert("missing-as-no-tracking".to_string(), RuleSeverity::Allow);
    config
        .rules
        .insert("last-without-order-by".to_string(), RuleSeverity::Warn);

    let diagnostics = analyze(Path::new(BAD), &config).unwrap();
    assert!(diagnostics.iter().all(|d| d.rule_id != "missing-as-no-tracking"));
    assert!(diagnostics
        .iter()
        .filter(|d| d.rule_id == "last-without-order-by")
        .all(|d| d.severity == Severity::Warning));
}

#[test]
fn test_fixes_leave_fixed_code_clean_for_those_rules() {
    let temp_dir = tempfile::tempdir().unwrap();
    let file_path = temp_dir.path().join("Repo.cs");
    std::fs::write(
        &file_path,
        r#"using Microsoft.EntityFrameworkCore;
class Repo {
    async Task<int> Open(AppDbContext db) {
        if (db.Orders.Count() > 0) {
            await db.Orders.AddAsync(new Order());
        }
        return db.Orders.ToList().Count;
    }
}
"#,
    )
    .unwrap();

    let config = Config::default();
    let engine = Engine::new(&config).restrict_to(&[
        "count-for-existence",
        "prefer-add-over-add-async",
        "materialize-to-count",
    ]);
    let diagnostics = engine.analyze(temp_dir.path()).unwrap();
    assert_eq!(diagnostics.len(), 3);

    let changed = efcheck::fix::apply_fixes(&diagnostics, temp_dir.path()).unwrap();
    assert_eq!(changed, 1);
    assert!(engine.analyze(temp_dir.path()).unwrap().is_empty());

    let fixed = std::fs::read_to_string(&file_path).unwrap();
    assert!(fixed.contains("if (db.Orders.Any())"));
    assert!(fixed.contains("db.Orders.Add(new Order());"));
    assert!(fixed.contains("return db.Orders.Count();"));
}

#[test]
fn test_analyze_nonexistent_path() {
    let result = analyze(Path::new("/nonexistent/path"), &Config::default());
    assert!(result.is_err());
}

#[test]
fn test_syntax_errors_are_analyzed_best_effort() {
    let temp_dir = tempfile::tempdir().unwrap();
    let file_path = temp_dir.path().join("Broken.cs");
    std::fs::write(
        &file_path,
        r#"class Broken {
    void M(AppDbContext db) {
        var last = db.Orders.Last();
    }
    void N( {
}
"#,
    )
    .unwrap();

    let ids = rule_ids(file_path.to_str().unwrap(), &Config::default());
    assert!(ids.contains("last-without-order-by"), "{ids:?}");
}

#[test]
fn test_fixes_keep_byte_order_mark() {
    let temp_dir = tempfile::tempdir().unwrap();
    let file_path = temp_dir.path().join("Bom.cs");
    let mut bytes = b"\xEF\xBB\xBF".to_vec();
    bytes.extend_from_slice(
        b"class S { async Task Save(AppDbContext db) { db.SaveChanges(); } }\n",
    );
    std::fs::write(&file_path, bytes).unwrap();

    let config = Config::default();
    let engine = Engine::new(&config).restrict_to(&["sync-over-async"]);
    let diagnostics = engine.analyze(temp_dir.path()).unwrap();
    assert_eq!(diagnostics.len(), 1);

    let changed = efcheck::fix::apply_fixes(&diagnostics, temp_dir.path()).unwrap();
    assert_eq!(changed, 1);

    let fixed = std::fs::read(&file_path).unwrap();
    assert!(fixed.starts_with(b"\xEF\xBB\xBF"));
    assert_eq!(
        String::from_utf8(fixed[3..].to_vec()).unwrap(),
        "class S { async Task Save(AppDbContext db) { await db.SaveChangesAsync(); } }\n"
    );
}

#[test]
fn test_competing_fixes_on_one_expression_stay_balanced() {
    let temp_dir = tempfile::tempdir().unwrap();
    let file_path = temp_dir.path().join("Count.cs");
    std::fs::write(
        &file_path,
        r#"class S {
    async Task<int> M(AppDbContext db) {
        var n = db.Users.ToList().Count;
        return n;
    }
}
"#,
    )
    .unwrap();

    let config = Config::default();
    let engine = Engine::new(&config).restrict_to(&[
        "sync-over-async",
        "materialize-to-count",
        "missing-as-no-tracking",
    ]);
    let diagnostics = engine.analyze(temp_dir.path()).unwrap();
    assert!(diagnostics.len() >= 2, "{diagnostics:#?}");

    efcheck::fix::apply_fixes(&diagnostics, temp_dir.path()).unwrap();
    let fixed = std::fs::read_to_string(&file_path).unwrap();

    assert_eq!(fixed.matches('(').count(), fixed.matches(')').count(), "{fixed}");
    assert!(!fixed.contains("(await db.Users.Count()"), "{fixed}");
    assert!(
        fixed.contains(".Count();") || fixed.contains("ToListAsync()).Count;"),
        "{fixed}"
    );
}

#[test]
fn test_set_count_is_reported_but_left_alone() {
    let temp_dir = tempfile::tempdir().unwrap();
    let file_path = temp_dir.path().join("Set.cs");
    let source = r#"class S {
    int M(AppDbContext db) {
        return db.Users.Select(u => u.Country).ToHashSet().Count;
    }
}
"#;
    std::fs::write(&file_path, source).unwrap();

    let config = Config::default();
    let engine = Engine::new(&config).restrict_to(&["materialize-to-count"]);
    let diagnostics = engine.analyze(temp_dir.path()).unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].fix.is_none());

    let changed = efcheck::fix::apply_fixes(&diagnostics, temp_dir.path()).unwrap();
    assert_eq!(changed, 0);
    assert_eq!(std::fs::read_to_string(&file_path).unwrap(), source);
}

#[test]
fn test_no_hoist_out_of_enclosing_lambda() {
    let temp_dir = tempfile::tempdir().unwrap();
    let file_path = temp_dir.path().join("Hoist.cs");
    let source = r#"class S {
    void M(AppDbContext db, List<int> ids) {
        ids.ForEach(id => db.Orders.Where(o => o.Total > Limit(id)).ToList());
    }
}
"#;
    std::fs::write(&file_path, source).unwrap();

    let config = Config::default();
    let engine = Engine::new(&config).restrict_to(&["untranslatable-method-in-query"]);
    let diagnostics = engine.analyze(temp_dir.path()).unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].fix.is_none());

    efcheck::fix::apply_fixes(&diagnostics, temp_dir.path()).unwrap();
    assert_eq!(std::fs::read_to_string(&file_path).unwrap(), source);
}
