use std::path::Path;

use serde::Deserialize;

use crate::errors::ConfigError;
use crate::interpreter::Limits;

/// Engine settings. Every field has a default, so a partial file is fine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Expressions remembered per command.
    pub max_history: usize,
    /// Guest recursion limit.
    pub max_call_depth: usize,
    /// Loop iterations allowed per evaluation.
    pub max_loop_iterations: u64,
    /// How deeply expressions may nest before parsing gives up.
    pub max_nesting_depth: usize,
    /// Generator iteration counts are clamped to this.
    pub max_generator_iterations: usize,
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_history: 10,
            max_call_depth: 256,
            max_loop_iterations: 1_000_000,
            max_nesting_depth: 128,
            max_generator_iterations: 100_000,
            log_filter: None,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_call_depth: self.max_call_depth,
            max_loop_iterations: self.max_loop_iterations,
            max_nesting_depth: self.max_nesting_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_files_keep_defaults() {
        let settings = Settings::from_toml_str("max_history = 3\nlog_filter = \"text_transformer=debug\"").unwrap();
        assert_eq!(settings.max_history, 3);
        assert_eq!(settings.max_call_depth, 256);
        assert_eq!(settings.log_filter.as_deref(), Some("text_transformer=debug"));
    }

    #[test]
    fn nesting_budget_reaches_the_limits() {
        let settings = Settings::from_toml_str("max_nesting_depth = 32").unwrap();
        assert_eq!(settings.limits().max_nesting_depth, 32);
        assert_eq!(Settings::default().limits(), Limits::default());
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(Settings::from_toml_str("").unwrap(), Settings::default());
    }

    #[test]
    fn bad_types_are_rejected() {
        assert!(matches!(Settings::from_toml_str("max_history = \"ten\""), Err(ConfigError::Toml(_))));
    }
}
