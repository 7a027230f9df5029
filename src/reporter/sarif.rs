use crate::rules::{registry, Diagnostic, Severity};
use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;

const SARIF_SCHEMA: &str =
    "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/master/Schemata/sarif-schema-2.1.0.json";

/// SARIF 2.1.0 output for code-scanning integrations
pub fn report(diagnostics: &[Diagnostic]) -> Result<()> {
    println!("{}", format(diagnostics)?);
    Ok(())
}

/// Format diagnostics as a SARIF log without printing.
pub fn format(diagnostics: &[Diagnostic]) -> Result<String> {
    let sarif = SarifReport::from_diagnostics(diagnostics);
    Ok(serde_json::to_string_pretty(&sarif)?)
}

#[derive(Serialize)]
struct SarifReport {
    #[serde(rename = "$schema")]
    schema: &'static str,
    version: &'static str,
    runs: Vec<SarifRun>,
}

#[derive(Serialize)]
struct SarifRun {
    tool: SarifTool,
    results: Vec<SarifResult>,
}

#[derive(Serialize)]
struct SarifTool {
    driver: SarifDriver,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifDriver {
    name: &'static str,
    version: &'static str,
    rules: Vec<SarifRule>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifRule {
    id: &'static str,
    name: &'static str,
    short_description: SarifMessage,
    default_configuration: SarifConfiguration,
}

#[derive(Serialize)]
struct SarifConfiguration {
    level: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifResult {
    rule_id: &'static str,
    rule_index: usize,
    level: &'static str,
    message: SarifMessage,
    locations: Vec<SarifLocation>,
}

#[derive(Serialize)]
struct SarifMessage {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifLocation {
    physical_location: SarifPhysicalLocation,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifPhysicalLocation {
    artifact_location: SarifArtifactLocation,
    region: SarifRegion,
}

#[derive(Serialize)]
struct SarifArtifactLocation {
    uri: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifRegion {
    start_line: usize,
    start_column: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_column: Option<usize>,
}

fn level(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "note",
    }
}

impl SarifReport {
    fn from_diagnostics(diagnostics: &[Diagnostic]) -> Self {
        let rules: Vec<SarifRule> = registry::all_rules()
            .iter()
            .map(|rule| SarifRule {
                id: rule.id(),
                name: rule.name(),
                short_description: SarifMessage {
                    text: rule.description().to_string(),
                },
                default_configuration: SarifConfiguration {
                    level: level(rule.default_severity()),
                },
            })
            .collect();
        let index: HashMap<&str, usize> = rules
            .iter()
            .enumerate()
            .map(|(i, rule)| (rule.id, i))
            .collect();

        let results = diagnostics
            .iter()
            .map(|d| SarifResult {
                rule_id: d.rule_id,
                rule_index: index.get(d.rule_id).copied().unwrap_or_default(),
                level: level(d.severity),
                message: SarifMessage {
                    text: match &d.suggestion {
                        Some(suggestion) => format!("{} ({})", d.message, suggestion),
                        None => d.message.clone(),
                    },
                },
                locations: vec![SarifLocation {
                    physical_location: SarifPhysicalLocation {
                        artifact_location: SarifArtifactLocation {
                            uri: d.file_path.to_string_lossy().replace('\\', "/"),
                        },
                        region: SarifRegion {
                            start_line: d.line,
                            start_column: d.column,
                            end_line: d.end_line,
                            end_column: d.end_column,
                        },
                    },
                }],
            })
            .collect();

        SarifReport {
            schema: SARIF_SCHEMA,
            version: "2.1.0",
            runs: vec![SarifRun {
                tool: SarifTool {
                    driver: SarifDriver {
                        name: "efcheck",
                        version: env!("CARGO_PKG_VERSION"),
                        rules,
                    },
                },
                results,
            }],
        }
    }
}
