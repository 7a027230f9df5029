use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use efcheck::baseline::{Baseline, BASELINE_FILENAME};
use efcheck::config::CONFIG_FILENAME;
use efcheck::engine::AnalysisStats;
use efcheck::rules::registry;
use efcheck::{Config, Diagnostic, Engine, Severity};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "efcheck")]
#[command(about = "Static analysis for Entity Framework Core data access in C#")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    check: CheckArgs,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Args, Clone)]
struct CheckArgs {
    /// Path to analyze (file or directory)
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Output format (defaults to `[output] format` in efcheck.toml)
    #[arg(short, long)]
    format: Option<OutputFormat>,

    /// Minimum severity to report
    #[arg(long, default_value = "info")]
    min_severity: Severity,

    /// Fail if any diagnostic meets this severity
    #[arg(long)]
    fail_on: Option<Severity>,

    /// Specific rules to run (comma-separated)
    #[arg(long, value_delimiter = ',')]
    rules: Vec<String>,

    /// Strict mode: only run high-confidence rules
    #[arg(long)]
    strict: bool,

    /// Show timing information
    #[arg(long)]
    timing: bool,

    /// Hide issues recorded in .efcheck-baseline
    #[arg(long)]
    baseline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run data-access analysis (default)
    Check(CheckArgs),
    /// Apply auto-fixes for detected issues
    Fix {
        /// Path to analyze and fix
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Only show what would be fixed without making changes
        #[arg(long)]
        dry_run: bool,

        /// Specific rules to apply fixes for (comma-separated)
        #[arg(long, value_delimiter = ',')]
        rules: Vec<String>,
    },
    /// Create an efcheck.toml config
    Init {
        /// Directory to create the config in
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// List available rules
    Rules,
    /// Explain a specific rule in detail
    Explain {
        /// Rule ID to explain (e.g., "n-plus-one-query")
        rule_id: String,
    },
    /// Record current issues in .efcheck-baseline
    Baseline {
        /// Path to analyze
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Console,
    Json,
    Sarif,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{} {e}", "error:".red().bold());
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Log to stderr. `-v` takes precedence over `EFCHECK_LOG`; the default is `warn`.
fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_env("EFCHECK_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Check(args)) => run_check(&args),
        None => run_check(&cli.check),
        Some(Commands::Fix {
            path,
            dry_run,
            rules,
        }) => run_fix(&path, dry_run, &rules),
        Some(Commands::Init { path }) => run_init(&path),
        Some(Commands::Rules) => run_list_rules(),
        Some(Commands::Explain { rule_id }) => run_explain(&rule_id),
        Some(Commands::Baseline { path }) => run_baseline(&path),
    }
}

/// Load config for `path` and apply its color preference.
fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_or_default(path)?;
    match config.output.color.as_str() {
        "always" => colored::control::set_override(true),
        "never" => colored::control::set_override(false),
        _ => {}
    }
    Ok(config)
}

/// Directory that holds config and baseline files for `path`.
fn project_root(path: &Path) -> PathBuf {
    let dir = if path.is_file() {
        path.parent().unwrap_or(path)
    } else {
        path
    };
    dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())
}

fn build_engine<'a>(config: &'a Config, rules: &[String], strict: bool) -> Engine<'a> {
    let mut engine = Engine::new(config);
    if strict {
        engine = engine.restrict_to(registry::STRICT_RULES);
    }
    if !rules.is_empty() {
        engine = engine.restrict_to(rules);
    }
    engine
}

fn run_check(args: &CheckArgs) -> Result<()> {
    let config = load_config(&args.path)?;
    let engine = build_engine(&config, &args.rules, args.strict);

    let start = Instant::now();
    let (diagnostics, stats) = engine.analyze_with_stats(&args.path)?;
    let analysis_time = start.elapsed();

    let diagnostics: Vec<_> = diagnostics
        .into_iter()
        .filter(|d| d.severity >= args.min_severity)
        .collect();

    let diagnostics = if args.baseline {
        let root = project_root(&args.path);
        let baseline = Baseline::load(&root).map_err(|e| {
            anyhow::anyhow!(
                "cannot read {}: {e} (run `efcheck baseline` first)",
                root.join(BASELINE_FILENAME).display()
            )
        })?;
        let before = diagnostics.len();
        let remaining = baseline.filter(diagnostics, &root);
        tracing::debug!(hidden = before - remaining.len(), "applied baseline");
        remaining
    } else {
        diagnostics
    };

    let format = match args.format {
        Some(format) => format,
        None => OutputFormat::from_str(&config.output.format, true).unwrap_or_else(|_| {
            tracing::warn!(format = %config.output.format, "unknown output format in config");
            OutputFormat::Console
        }),
    };
    match format {
        OutputFormat::Console => efcheck::reporter::console::report(&diagnostics),
        OutputFormat::Json => efcheck::reporter::json::report(&diagnostics)?,
        OutputFormat::Sarif => efcheck::reporter::sarif::report(&diagnostics)?,
    }

    if args.timing {
        print_timing(analysis_time, &stats, &diagnostics);
    }

    if let Some(fail_severity) = args.fail_on {
        let failing = diagnostics
            .iter()
            .filter(|d| d.severity >= fail_severity)
            .count();
        if failing > 0 {
            anyhow::bail!("Found {failing} diagnostic(s) at or above {fail_severity} severity");
        }
    }

    Ok(())
}

fn print_timing(elapsed: std::time::Duration, stats: &AnalysisStats, diagnostics: &[Diagnostic]) {
    eprintln!();
    eprintln!("{}", "Timing:".bold());
    eprintln!("  Analysis time: {:?}", elapsed);
    eprintln!("  Files:         {}", stats.files_analyzed);
    if stats.files_failed > 0 {
        eprintln!("  Failed:        {}", stats.files_failed);
    }
    eprintln!("  Rules:         {}", stats.rules_run);
    eprintln!("  Diagnostics:   {}", diagnostics.len());
}

fn run_init(path: &Path) -> Result<()> {
    let config_path = path.join(CONFIG_FILENAME);
    if config_path.exists() {
        anyhow::bail!("{} already exists", config_path.display());
    }
    std::fs::write(&config_path, Config::default_toml())?;
    println!("Created {}", config_path.display());
    Ok(())
}

fn run_baseline(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let diagnostics = Engine::new(&config).analyze(path)?;

    let root = project_root(path);
    let baseline = Baseline::from_diagnostics(&diagnostics, &root);
    baseline.save(&root)?;

    println!(
        "Recorded {} issue(s) in {}",
        baseline.len(),
        root.join(BASELINE_FILENAME).display()
    );
    println!("Run `efcheck check --baseline` to report only new issues.");
    Ok(())
}

fn run_list_rules() -> Result<()> {
    println!("Available rules:\n");
    for rule in registry::all_rules() {
        let strict = if registry::STRICT_RULES.contains(&rule.id()) {
            " (strict)"
        } else {
            ""
        };
        println!(
            "  {:<32} [{}]{} {}",
            rule.id(),
            rule.default_severity(),
            strict,
            rule.description()
        );
    }
    println!("\nUse `efcheck explain <rule-id>` for detailed information.");
    Ok(())
}

fn run_explain(rule_id: &str) -> Result<()> {
    let Some(rule) = registry::get_rule(rule_id) else {
        eprintln!("{} Unknown rule: {}", "error:".red().bold(), rule_id);
        eprintln!("\nAvailable rules:");
        for r in registry::all_rules() {
            eprintln!("  {}", r.id());
        }
        anyhow::bail!("Unknown rule: {}", rule_id);
    };

    println!("{}", rule.name().bold().underline());
    println!("Rule ID: {}", rule.id().cyan());
    println!("Severity: {}", rule.default_severity());
    println!();
    println!("{}", rule.description());
    println!();

    match explanation(rule.id()) {
        Some(text) => {
            println!("{}", "Why it matters:".yellow().bold());
            print_indented(text.why);
            println!();
            println!("{}", "Bad:".red().bold());
            print_indented(text.bad);
            println!();
            println!("{}", "Good:".green().bold());
            print_indented(text.good);
            if text.fixable {
                println!();
                println!("{}", "Auto-fix available:".cyan().bold());
                println!("  This rule supports automatic fixing via `efcheck fix`.");
            }
        }
        None => println!("No detailed explanation available for this rule."),
    }

    println!();
    println!("{}", "Suppression:".yellow().bold());
    println!("  // efcheck-ignore: {}", rule_id);
    println!("  #pragma warning disable {}", rule_id);
    println!("  [SuppressMessage(\"efcheck\", \"{}\")]", rule_id);
    Ok(())
}

fn print_indented(text: &str) {
    for line in text.lines() {
        println!("  {line}");
    }
}

struct Explanation {
    why: &'static str,
    bad: &'static str,
    good: &'static str,
    fixable: bool,
}

fn explanation(rule_id: &str) -> Option<Explanation> {
    let text = match rule_id {
        "n-plus-one-query" => Explanation {
            why: "A query executed once per item costs one round trip per item.\n\
                  100 orders become 101 queries instead of one.",
            bad: "foreach (var order in orders)\n{\n    var customer = db.Customers.Find(order.CustomerId);\n}",
            good: "var ids = orders.Select(o => o.CustomerId).ToList();\n\
                   var customers = db.Customers.Where(c => ids.Contains(c.Id)).ToList();",
            fixable: false,
        },
        "save-changes-in-loop" => Explanation {
            why: "Each SaveChanges opens a transaction and sends its own batch.\n\
                  Saving once after the loop batches every change together.",
            bad: "foreach (var item in items)\n{\n    db.Items.Add(item);\n    db.SaveChanges();\n}",
            good: "db.Items.AddRange(items);\ndb.SaveChanges();",
            fixable: false,
        },
        "client-side-evaluation" => Explanation {
            why: "Operators after ToList/AsEnumerable run in memory over every\n\
                  row the database returned.",
            bad: "var active = db.Users.ToList().Where(u => u.IsActive);",
            good: "var active = db.Users.Where(u => u.IsActive).ToList();",
            fixable: false,
        },
        "redundant-materialization" => Explanation {
            why: "Materializing an already materialized sequence copies it again.",
            bad: "var names = db.Users.Select(u => u.Name).ToList().ToArray();",
            good: "var names = db.Users.Select(u => u.Name).ToArray();",
            fixable: true,
        },
        "materialize-to-count" => Explanation {
            why: "Loading every row to count it transfers the whole table.\n\
                  Count() runs SELECT COUNT(*) on the server.",
            bad: "var total = db.Orders.ToList().Count;",
            good: "var total = db.Orders.Count();",
            fixable: true,
        },
        "count-for-existence" => Explanation {
            why: "Count() scans every match; Any() stops at the first one.",
            bad: "if (db.Orders.Count(o => o.Open) > 0) { }",
            good: "if (db.Orders.Any(o => o.Open)) { }",
            fixable: true,
        },
        "sync-over-async" => Explanation {
            why: "Synchronous EF calls block a thread-pool thread for the whole\n\
                  database round trip inside an async method.",
            bad: "public async Task<List<User>> Load()\n{\n    return db.Users.ToList();\n}",
            good: "public async Task<List<User>> Load()\n{\n    return await db.Users.ToListAsync();\n}",
            fixable: true,
        },
        "blocking-async-call" => Explanation {
            why: "Blocking on an EF async call with .Result or .Wait() wastes a\n\
                  thread and can deadlock under a synchronization context.",
            bad: "var users = db.Users.ToListAsync().Result;",
            good: "var users = await db.Users.ToListAsync();",
            fixable: true,
        },
        "prefer-add-over-add-async" => Explanation {
            why: "AddAsync only exists for async value generators. For ordinary\n\
                  entities it allocates a ValueTask for no benefit.",
            bad: "await db.Users.AddAsync(user);",
            good: "db.Users.Add(user);",
            fixable: true,
        },
        "missing-as-no-tracking" => Explanation {
            why: "Tracked queries snapshot every entity for change detection.\n\
                  Read-only queries skip that cost with AsNoTracking().",
            bad: "return db.Products.Where(p => p.Visible).ToList();",
            good: "return db.Products.AsNoTracking().Where(p => p.Visible).ToList();",
            fixable: true,
        },
        "cartesian-explosion" => Explanation {
            why: "Several collection Includes in one query multiply the rows\n\
                  returned (orders x lines x payments).",
            bad: "db.Orders.Include(o => o.Lines).Include(o => o.Payments).ToList();",
            good: "db.Orders.Include(o => o.Lines).Include(o => o.Payments).AsSplitQuery().ToList();",
            fixable: true,
        },
        "unordered-pagination" => Explanation {
            why: "Without OrderBy the database may return rows in any order, so\n\
                  pages can repeat or skip rows.",
            bad: "db.Users.Skip(page * 20).Take(20).ToList();",
            good: "db.Users.OrderBy(u => u.Id).Skip(page * 20).Take(20).ToList();",
            fixable: false,
        },
        "last-without-order-by" => Explanation {
            why: "EF Core cannot translate Last/LastOrDefault without an ordering\n\
                  and throws InvalidOperationException at runtime.",
            bad: "var newest = db.Orders.Last();",
            good: "var newest = db.Orders.OrderByDescending(o => o.CreatedAt).First();",
            fixable: false,
        },
        "raw-sql-injection" => Explanation {
            why: "Values spliced into raw SQL text are not parameterized and\n\
                  allow SQL injection.",
            bad: "db.Users.FromSqlRaw($\"SELECT * FROM Users WHERE Name = '{name}'\");",
            good: "db.Users.FromSqlInterpolated($\"SELECT * FROM Users WHERE Name = {name}\");",
            fixable: true,
        },
        "non-sargable-predicate" => Explanation {
            why: "Wrapping a column in a function prevents index seeks; the\n\
                  database evaluates the function for every row.",
            bad: "db.Users.Where(u => u.Email.ToLower() == email);",
            good: "db.Users.Where(u => u.Email == email); // use a case-insensitive collation",
            fixable: false,
        },
        "untranslatable-method-in-query" => Explanation {
            why: "Custom methods cannot be translated to SQL. EF Core throws, or\n\
                  evaluates on the client after loading every row.",
            bad: "db.Orders.Where(o => o.Total > Threshold(region));",
            good: "var threshold = Threshold(region);\ndb.Orders.Where(o => o.Total > threshold);",
            fixable: true,
        },
        "dbcontext-singleton-lifetime" => Explanation {
            why: "A DbContext is not thread-safe and grows its change tracker\n\
                  forever. A singleton is shared by every concurrent request.",
            bad: "services.AddSingleton<ShopDbContext>();",
            good: "services.AddDbContext<ShopDbContext>();",
            fixable: true,
        },
        _ => return None,
    };
    Some(text)
}

fn run_fix(path: &Path, dry_run: bool, rules: &[String]) -> Result<()> {
    use efcheck::fix::apply_fixes;

    let config = load_config(path)?;
    let diagnostics = build_engine(&config, rules, false).analyze(path)?;

    let fixable: Vec<_> = diagnostics.iter().filter(|d| d.fix.is_some()).collect();
    let total_fixes: usize = fixable
        .iter()
        .filter_map(|d| d.fix.as_ref())
        .map(|f| f.replacements.len())
        .sum();

    if fixable.is_empty() {
        println!("{}", "No auto-fixes available for detected issues.".yellow());
        if !diagnostics.is_empty() {
            println!(
                "\nFound {} issue(s), but none have an automatic fix.",
                diagnostics.len()
            );
        }
        return Ok(());
    }

    println!(
        "Found {} fixable issue(s) with {} replacement(s):\n",
        fixable.len(),
        total_fixes
    );

    for diagnostic in &fixable {
        if let Some(fix) = &diagnostic.fix {
            println!(
                "  {} {}:{} - {}",
                diagnostic.rule_id.cyan(),
                diagnostic.file_path.display(),
                diagnostic.line,
                fix.description
            );
        }
    }

    if dry_run {
        println!("\n{}", "Dry run - no changes made.".yellow());
        return Ok(());
    }

    let base_dir = project_root(path);
    let count = apply_fixes(&diagnostics, &base_dir)
        .map_err(|e| anyhow::anyhow!("Failed to apply fixes: {e}"))?;
    println!("\n{}", format!("Updated {count} file(s).").green());
    println!("Run `efcheck check` to verify remaining issues.");

    Ok(())
}
