use crate::rules::{Diagnostic, Severity};
use colored::Colorize;

pub fn report(diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        println!("{}", "No data-access issues found.".green());
        return;
    }

    for diagnostic in diagnostics {
        print_diagnostic(diagnostic);
    }

    let (errors, warnings, infos) = count_by_severity(diagnostics);
    let mut parts = Vec::new();
    if errors > 0 {
        parts.push(format!("{errors} error(s)").red().to_string());
    }
    if warnings > 0 {
        parts.push(format!("{warnings} warning(s)").yellow().to_string());
    }
    if infos > 0 {
        parts.push(format!("{infos} info(s)").blue().to_string());
    }
    println!("Found {}", parts.join(", "));

    let fixable = diagnostics.iter().filter(|d| d.fix.is_some()).count();
    if fixable > 0 {
        println!(
            "{}",
            format!("{fixable} issue(s) can be fixed with `efcheck fix`.").dimmed()
        );
    }
}

fn print_diagnostic(d: &Diagnostic) {
    let severity_str = match d.severity {
        Severity::Error => "error".red().bold(),
        Severity::Warning => "warning".yellow().bold(),
        Severity::Info => "info".blue().bold(),
    };

    let rule_id = format!("[{}]", d.rule_id).dimmed();

    println!("{}{} {} {}", severity_str, ":".bold(), d.message, rule_id);
    println!("  {} {}:{}:{}", "-->".blue(), d.file_path.display(), d.line, d.column);

    if let Some(suggestion) = &d.suggestion {
        println!("  {} {}", "help:".cyan(), suggestion);
    }
    if let Some(fix) = &d.fix {
        println!("  {} {}", "fix:".green(), fix.description);
    }

    println!();
}

/// Format a diagnostic as a plain text string (no colors).
#[cfg(test)]
fn format_diagnostic_plain(d: &Diagnostic) -> String {
    let mut result = format!(
        "{}: {} [{}]\n  --> {}:{}:{}\n",
        d.severity,
        d.message,
        d.rule_id,
        d.file_path.display(),
        d.line,
        d.column
    );

    if let Some(suggestion) = &d.suggestion {
        result.push_str(&format!("  help: {}\n", suggestion));
    }
    if let Some(fix) = &d.fix {
        result.push_str(&format!("  fix: {}\n", fix.description));
    }

    result
}

/// Count diagnostics as (errors, warnings, infos).
pub fn count_by_severity(diagnostics: &[Diagnostic]) -> (usize, usize, usize) {
    diagnostics
        .iter()
        .fold((0, 0, 0), |(e, w, i), d| match d.severity {
            Severity::Error => (e + 1, w, i),
            Severity::Warning => (e, w + 1, i),
            Severity::Info => (e, w, i + 1),
        })
}
