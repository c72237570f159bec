//! Result of one function invocation

use std::fmt;

use indexmap::IndexMap;
use serde_json::Value;

use super::arguments::value_to_text;
use super::metadata::FunctionDescriptor;

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResult {
    pub function: FunctionDescriptor,
    pub value: Value,
    pub metadata: IndexMap<String, Value>,
}

impl FunctionResult {
    pub fn new(function: FunctionDescriptor, value: impl Into<Value>) -> Self {
        Self {
            function,
            value: value.into(),
            metadata: IndexMap::new(),
        }
    }

    /// A result carrying no value
    pub fn empty(function: FunctionDescriptor) -> Self {
        Self::new(function, Value::Null)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The value as substituted into text
    pub fn text(&self) -> String {
        value_to_text(&self.value)
    }
}

impl fmt::Display for FunctionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_conversion() {
        let f = FunctionDescriptor::native("f");
        assert_eq!(FunctionResult::new(f.clone(), "plain").text(), "plain");
        assert_eq!(FunctionResult::new(f.clone(), 5).text(), "5");
        assert_eq!(FunctionResult::empty(f.clone()).text(), "");
        assert_eq!(FunctionResult::new(f, json!([1, "a"])).to_string(), r#"[1,"a"]"#);
    }
}
