//! Function descriptors and their tool schema

use serde::Serialize;
use serde_json::{json, Map, Value};

/// Separator between collection and function in tool names
pub const TOOL_NAME_SEPARATOR: char = '-';

/// How a function produces its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    /// Local Rust code
    Native,
    /// Renders a template and asks a chat completion service
    Prompt,
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<Value>,
    /// JSON schema type name (`string`, `number`, ...)
    pub type_name: Option<String>,
}

impl ParameterDescriptor {
    /// An optional parameter without description or type
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required: false,
            default: None,
            type_name: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    fn schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert(
            "type".to_string(),
            Value::String(self.type_name.clone().unwrap_or_else(|| "string".to_string())),
        );
        if let Some(description) = &self.description {
            schema.insert("description".to_string(), Value::String(description.clone()));
        }
        if let Some(default) = &self.default {
            schema.insert("default".to_string(), default.clone());
        }
        Value::Object(schema)
    }
}

/// Immutable metadata of a registered function
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDescriptor {
    /// Owning collection; assigned at registration
    pub collection: String,
    pub name: String,
    pub description: Option<String>,
    pub parameters: Vec<ParameterDescriptor>,
    pub return_description: Option<String>,
    pub kind: FunctionKind,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>, kind: FunctionKind) -> Self {
        Self {
            collection: String::new(),
            name: name.into(),
            description: None,
            parameters: Vec::new(),
            return_description: None,
            kind,
        }
    }

    pub fn native(name: impl Into<String>) -> Self {
        Self::new(name, FunctionKind::Native)
    }

    pub fn prompt(name: impl Into<String>) -> Self {
        Self::new(name, FunctionKind::Prompt)
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parameter(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_return_description(mut self, description: impl Into<String>) -> Self {
        self.return_description = Some(description.into());
        self
    }

    /// `collection.name`, as written in templates and error messages
    pub fn qualified_name(&self) -> String {
        if self.collection.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.collection, self.name)
        }
    }

    /// `collection-name`, the name a model sees for this function
    pub fn fully_qualified_name(&self) -> String {
        if self.collection.is_empty() {
            self.name.clone()
        } else {
            format!("{}{}{}", self.collection, TOOL_NAME_SEPARATOR, self.name)
        }
    }

    pub fn required_parameters(&self) -> impl Iterator<Item = &ParameterDescriptor> {
        self.parameters.iter().filter(|p| p.required)
    }

    /// Function-calling schema in the common `{"type": "function", ...}` shape
    pub fn to_tool_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.schema()))
            .collect();
        let required: Vec<&str> = self.required_parameters().map(|p| p.name.as_str()).collect();

        json!({
            "type": "function",
            "function": {
                "name": self.fully_qualified_name(),
                "description": self.description.clone().unwrap_or_default(),
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn add() -> FunctionDescriptor {
        FunctionDescriptor::native("add")
            .with_collection("math")
            .with_description("Add two numbers")
            .with_parameter(ParameterDescriptor::new("x").required().with_type("number"))
            .with_parameter(ParameterDescriptor::new("y").with_default(0))
    }

    #[test]
    fn test_names() {
        let f = add();
        assert_eq!(f.qualified_name(), "math.add");
        assert_eq!(f.fully_qualified_name(), "math-add");
        assert_eq!(FunctionDescriptor::native("free").fully_qualified_name(), "free");
    }

    #[test]
    fn test_tool_schema() {
        let schema = add().to_tool_schema();
        assert_eq!(
            schema,
            json!({
                "type": "function",
                "function": {
                    "name": "math-add",
                    "description": "Add two numbers",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "x": {"type": "number"},
                            "y": {"type": "string", "default": 0},
                        },
                        "required": ["x"],
                    },
                },
            })
        );
    }
}
