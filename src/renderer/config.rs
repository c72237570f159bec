//! Trust policy for template rendering

use std::collections::HashSet;

use crate::config::RenderConfig;

/// Controls which substitutions are escaped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOptions {
    /// Trust the whole render call: nothing is escaped
    pub allow_unsafe_content: bool,

    /// Variables substituted verbatim even when the call is untrusted
    pub trusted_variables: HashSet<String>,
}

impl RenderOptions {
    /// Create options that escape everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the whole call is trusted
    pub fn with_allow_unsafe_content(mut self, allow: bool) -> Self {
        self.allow_unsafe_content = allow;
        self
    }

    /// Mark one variable as trusted
    pub fn with_trusted_variable(mut self, name: impl Into<String>) -> Self {
        self.trusted_variables.insert(name.into());
        self
    }

    /// Whether the value of `name` may be substituted without escaping
    pub fn is_trusted_variable(&self, name: &str) -> bool {
        self.allow_unsafe_content || self.trusted_variables.contains(name)
    }

    /// Whether function output may be substituted without escaping
    pub fn is_trusted_output(&self) -> bool {
        self.allow_unsafe_content
    }
}

impl From<&RenderConfig> for RenderOptions {
    fn from(config: &RenderConfig) -> Self {
        Self {
            allow_unsafe_content: config.allow_unsafe_content,
            trusted_variables: config.trusted_variables.iter().cloned().collect(),
        }
    }
}
