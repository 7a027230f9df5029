use crate::reporter::console::count_by_severity;
use crate::rules::Diagnostic;
use anyhow::Result;
use serde::Serialize;

#[derive(Serialize)]
struct JsonReport<'a> {
    version: &'static str,
    summary: Summary,
    diagnostics: &'a [Diagnostic],
}

#[derive(Serialize)]
struct Summary {
    errors: usize,
    warnings: usize,
    infos: usize,
    fixable: usize,
}

pub fn report(diagnostics: &[Diagnostic]) -> Result<()> {
    println!("{}", format(diagnostics)?);
    Ok(())
}

/// Format diagnostics as JSON string without printing.
pub fn format(diagnostics: &[Diagnostic]) -> Result<String> {
    let (errors, warnings, infos) = count_by_severity(diagnostics);
    let report = JsonReport {
        version: env!("CARGO_PKG_VERSION"),
        summary: Summary {
            errors,
            warnings,
            infos,
            fixable: diagnostics.iter().filter(|d| d.fix.is_some()).count(),
        },
        diagnostics,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}
