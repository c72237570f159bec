//! Argument table passed into renders and invocations

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key used for execution settings that do not name a service
pub const DEFAULT_SERVICE_ID: &str = "default";

/// Per-request model settings, keyed by service id inside [`KernelArguments`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptExecutionSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Provider specific options passed through untouched
    #[serde(default, flatten)]
    pub extension_data: IndexMap<String, Value>,
}

impl PromptExecutionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_service(service_id: impl Into<String>) -> Self {
        Self {
            service_id: Some(service_id.into()),
            ..Self::default()
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extension_data.insert(key.into(), value.into());
        self
    }

    /// The key this entry is stored under
    pub fn key(&self) -> &str {
        self.service_id.as_deref().unwrap_or(DEFAULT_SERVICE_ID)
    }
}

/// Ordered, case-preserving variable table.
///
/// Cloning gives an independent copy; nested and parallel invocations
/// always receive a clone, never a reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelArguments {
    values: IndexMap<String, Value>,
    execution_settings: Option<IndexMap<String, PromptExecutionSettings>>,
}

impl KernelArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`KernelArguments::insert`]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Attach settings, keyed by their service id
    pub fn with_settings(mut self, settings: PromptExecutionSettings) -> Self {
        self.add_settings(settings);
        self
    }

    pub fn add_settings(&mut self, settings: PromptExecutionSettings) {
        self.execution_settings
            .get_or_insert_with(IndexMap::new)
            .insert(settings.key().to_string(), settings);
    }

    pub fn execution_settings(&self) -> Option<&IndexMap<String, PromptExecutionSettings>> {
        self.execution_settings.as_ref()
    }

    /// Insert or overwrite a value, returning the previous one
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Value as text: strings unquoted, `null` empty, anything else as JSON
    pub fn get_text(&self, name: &str) -> Option<String> {
        self.values.get(name).map(value_to_text)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.shift_remove(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for KernelArguments {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut args = KernelArguments::new();
        for (k, v) in iter {
            args.insert(k, v);
        }
        args
    }
}

/// Render a JSON value the way it is substituted into text
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insertion_order_and_case_preserved() {
        let args = KernelArguments::new()
            .with("Zeta", "1")
            .with("alpha", 2)
            .with("zeta", true);
        let names: Vec<&str> = args.names().collect();
        assert_eq!(names, vec!["Zeta", "alpha", "zeta"]);
        assert!(args.get("ZETA").is_none());
    }

    #[test]
    fn test_get_text() {
        let args = KernelArguments::new()
            .with("s", "hello")
            .with("n", 42)
            .with("null", Value::Null)
            .with("obj", json!({"a": 1}));
        assert_eq!(args.get_text("s").as_deref(), Some("hello"));
        assert_eq!(args.get_text("n").as_deref(), Some("42"));
        assert_eq!(args.get_text("null").as_deref(), Some(""));
        assert_eq!(args.get_text("obj").as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(args.get_text("missing"), None);
    }

    #[test]
    fn test_clone_is_independent() {
        let original = KernelArguments::new().with("x", "1");
        let mut copy = original.clone();
        copy.insert("x", "2");
        copy.insert("y", "3");
        assert_eq!(original.get_text("x").as_deref(), Some("1"));
        assert!(!original.contains("y"));
    }

    #[test]
    fn test_settings_keyed_by_service() {
        let args = KernelArguments::new()
            .with_settings(PromptExecutionSettings::new().with_model_id("m"))
            .with_settings(PromptExecutionSettings::for_service("fast"));
        let settings = args.execution_settings().expect("settings");
        let keys: Vec<&str> = settings.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec![DEFAULT_SERVICE_ID, "fast"]);
        assert_eq!(settings[DEFAULT_SERVICE_ID].model_id.as_deref(), Some("m"));
    }

    #[test]
    fn test_settings_extension_data_flattens() {
        let settings =
            PromptExecutionSettings::for_service("svc").with_extension("temperature", 0.5);
        let value = serde_json::to_value(&settings).expect("serialize");
        assert_eq!(value, json!({"service_id": "svc", "temperature": 0.5}));
    }
}
