//! Kernel configuration loaded from TOML
//!
//! Every section and field is optional; missing values fall back to the
//! defaults below.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading or parsing a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Runtime settings for a [`crate::Kernel`]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub invocation: InvocationConfig,
    pub tool_calls: ToolCallConfig,
    pub render: RenderConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InvocationConfig {
    /// How often post-invoke hooks may ask for a repeat within one call
    pub max_repeats: usize,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self { max_repeats: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ToolCallConfig {
    /// Execute requested tool calls and send the results back to the model
    pub auto_invoke: bool,
    /// Upper bound on model round-trips in one resolution loop
    pub max_auto_invoke_attempts: usize,
}

impl Default for ToolCallConfig {
    fn default() -> Self {
        Self {
            auto_invoke: true,
            max_auto_invoke_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Skip escaping for every substitution
    pub allow_unsafe_content: bool,
    /// Variables whose values are substituted without escaping
    pub trusted_variables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
        }
    }
}

impl KernelConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_max_repeats(mut self, max_repeats: usize) -> Self {
        self.invocation.max_repeats = max_repeats;
        self
    }

    pub fn with_auto_invoke(mut self, auto_invoke: bool) -> Self {
        self.tool_calls.auto_invoke = auto_invoke;
        self
    }

    pub fn with_max_auto_invoke_attempts(mut self, attempts: usize) -> Self {
        self.tool_calls.max_auto_invoke_attempts = attempts;
        self
    }

    pub fn with_allow_unsafe_content(mut self, allow: bool) -> Self {
        self.render.allow_unsafe_content = allow;
        self
    }

    pub fn with_trusted_variable(mut self, name: impl Into<String>) -> Self {
        self.render.trusted_variables.push(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = KernelConfig::from_str("").expect("Should parse");
        assert_eq!(config, KernelConfig::default());
        assert_eq!(config.invocation.max_repeats, 3);
        assert!(config.tool_calls.auto_invoke);
        assert_eq!(config.tool_calls.max_auto_invoke_attempts, 5);
        assert!(!config.render.allow_unsafe_content);
        assert_eq!(config.logging.filter, "warn");
    }

    #[test]
    fn test_partial_sections() {
        let config = KernelConfig::from_str(
            r#"
[tool_calls]
max_auto_invoke_attempts = 2

[render]
trusted_variables = ["html"]
"#,
        )
        .expect("Should parse");

        assert_eq!(config.tool_calls.max_auto_invoke_attempts, 2);
        assert!(config.tool_calls.auto_invoke);
        assert_eq!(config.render.trusted_variables, vec!["html".to_string()]);
        assert_eq!(config.invocation.max_repeats, 3);
    }

    #[test]
    fn test_invalid_toml() {
        let result = KernelConfig::from_str("[invocation\nmax_repeats = 1");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_wrong_type() {
        let result = KernelConfig::from_str("[invocation]\nmax_repeats = \"many\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = KernelConfig::from_file(Path::new("/nonexistent/kernel.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_builders() {
        let config = KernelConfig::default()
            .with_max_repeats(0)
            .with_auto_invoke(false)
            .with_max_auto_invoke_attempts(9)
            .with_allow_unsafe_content(true)
            .with_trusted_variable("x");
        assert_eq!(config.invocation.max_repeats, 0);
        assert!(!config.tool_calls.auto_invoke);
        assert_eq!(config.tool_calls.max_auto_invoke_attempts, 9);
        assert!(config.render.allow_unsafe_content);
        assert_eq!(config.render.trusted_variables, vec!["x".to_string()]);
    }
}
