use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::Severity;

/// Name of the configuration file looked up in the analyzed directory
pub const CONFIG_FILENAME: &str = "efcheck.toml";

/// Maximum config file size (1 MB) - prevents memory exhaustion from malformed files
const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rules: HashMap<String, RuleSeverity>,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    Deny,
    Warn,
    Allow,
}

impl From<RuleSeverity> for Option<Severity> {
    fn from(rs: RuleSeverity) -> Option<Severity> {
        match rs {
            RuleSeverity::Deny => Some(Severity::Error),
            RuleSeverity::Warn => Some(Severity::Warning),
            RuleSeverity::Allow => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_format")]
    pub format: String,

    #[serde(default = "default_color")]
    pub color: String,
}

fn default_format() -> String {
    "console".to_string()
}

fn default_color() -> String {
    "auto".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            color: default_color(),
        }
    }
}

/// Hints about the data-access layer that the file-local analysis cannot infer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Extra type names treated as `DbContext` subclasses (declared in other files).
    #[serde(default)]
    pub context_types: Vec<String>,

    /// Extra identifiers treated as context instances when their declaration is not visible.
    #[serde(default)]
    pub context_names: Vec<String>,
}

impl Config {
    /// Load config from efcheck.toml in the given path, or return default
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the project directory containing efcheck.toml
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the path doesn't exist or the config file
    /// cannot be read, and [`Error::Config`] if it is too large or invalid.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "path does not exist"),
            ));
        }

        // If path is a file, use its parent directory for config lookup
        let dir_path = if path.is_file() {
            path.parent().unwrap_or(path)
        } else {
            path
        };

        let config_path = dir_path.join(CONFIG_FILENAME);
        if config_path.exists() {
            let metadata = std::fs::metadata(&config_path).map_err(|e| Error::io(&config_path, e))?;
            if metadata.len() > MAX_CONFIG_SIZE {
                return Err(Error::config(format!(
                    "config file too large ({} bytes, max {} bytes): {}",
                    metadata.len(),
                    MAX_CONFIG_SIZE,
                    config_path.display()
                )));
            }

            let content =
                std::fs::read_to_string(&config_path).map_err(|e| Error::io(&config_path, e))?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| Error::config(format!("{}: {}", config_path.display(), e)))?;

            Self::validate_rule_ids(&config);

            tracing::debug!(path = %config_path.display(), "loaded configuration");
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Validate that configured rule IDs exist, warning about unknown ones.
    fn validate_rule_ids(config: &Config) {
        use crate::rules::registry;

        for rule_id in config.rules.keys() {
            if !registry::has_rule(rule_id) {
                tracing::warn!(
                    rule = %rule_id,
                    "unknown rule in {} (will be ignored)",
                    CONFIG_FILENAME
                );
            }
        }
    }

    /// Get the effective severity for a rule
    pub fn rule_severity(&self, rule_id: &str, default: Severity) -> Option<Severity> {
        match self.rules.get(rule_id) {
            Some(RuleSeverity::Allow) => None,
            Some(RuleSeverity::Warn) => Some(Severity::Warning),
            Some(RuleSeverity::Deny) => Some(Severity::Error),
            None => Some(default),
        }
    }

    /// Whether `type_name` was configured as a context type.
    pub fn is_configured_context_type(&self, type_name: &str) -> bool {
        self.database.context_types.iter().any(|t| t == type_name)
    }

    /// Whether `ident` was configured as a context instance name.
    pub fn is_configured_context_name(&self, ident: &str) -> bool {
        self.database.context_names.iter().any(|n| n == ident)
    }

    /// Generate default TOML config
    pub fn default_toml() -> &'static str {
        r#"# efcheck configuration

[rules]
# Set rule severity: "deny" (error), "warn" (warning), "allow" (ignore)
# n-plus-one-query = "deny"
# sync-over-async = "deny"
# missing-as-no-tracking = "allow"
# unordered-pagination = "warn"

[output]
format = "console"  # "console", "json", "sarif"
color = "auto"      # "auto", "always", "never"

[database]
# DbContext subclasses declared in other files or assemblies
# context_types = ["ShopContext", "ReportingContext"]
# Identifiers that always hold a context instance
# context_names = ["_shop", "uow"]
"#
    }
}
