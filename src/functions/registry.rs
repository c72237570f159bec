//! Registry of named function collections

use std::sync::Arc;

use indexmap::map::Entry;
use indexmap::IndexMap;

use crate::error::KernelError;
use crate::parser::{FunctionRef, Identifier};

use super::function::KernelFunction;
use super::metadata::{FunctionDescriptor, TOOL_NAME_SEPARATOR};

/// A named group of functions ("plugin")
#[derive(Clone)]
pub struct FunctionCollection {
    name: String,
    description: Option<String>,
    functions: IndexMap<String, Arc<dyn KernelFunction>>,
}

impl FunctionCollection {
    pub fn new(name: impl Into<String>) -> Result<Self, KernelError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            description: None,
            functions: IndexMap::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder form of [`FunctionCollection::add`]
    pub fn with_function<F: KernelFunction + 'static>(
        mut self,
        function: F,
    ) -> Result<Self, KernelError> {
        self.add(function)?;
        Ok(self)
    }

    /// Add a function, failing if the name is already taken
    pub fn add<F: KernelFunction + 'static>(&mut self, function: F) -> Result<(), KernelError> {
        self.insert(function, false)
    }

    /// Add a function, replacing any function of the same name
    pub fn add_or_replace<F: KernelFunction + 'static>(
        &mut self,
        function: F,
    ) -> Result<(), KernelError> {
        self.insert(function, true)
    }

    fn insert<F: KernelFunction + 'static>(
        &mut self,
        mut function: F,
        overwrite: bool,
    ) -> Result<(), KernelError> {
        let name = function.metadata().name.clone();
        validate_name(&name)?;
        if !overwrite && self.functions.contains_key(&name) {
            return Err(KernelError::DuplicateFunction {
                collection: self.name.clone(),
                function: name,
            });
        }
        function.metadata_mut().collection = self.name.clone();
        self.functions.insert(name, Arc::new(function));
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn KernelFunction>> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Arc<dyn KernelFunction>> {
        self.functions.values()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for FunctionCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionCollection")
            .field("name", &self.name)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// All collections known to a kernel, in registration order.
///
/// Read-only once registration is done, so concurrent lookups need no lock.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    collections: IndexMap<String, FunctionCollection>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one function under `collection`, creating the collection
    /// when needed
    pub fn register<F: KernelFunction + 'static>(
        &mut self,
        collection: &str,
        function: F,
    ) -> Result<(), KernelError> {
        self.collection_entry(collection)?.add(function)
    }

    /// Like [`FunctionRegistry::register`] but replaces an existing function
    pub fn register_or_replace<F: KernelFunction + 'static>(
        &mut self,
        collection: &str,
        function: F,
    ) -> Result<(), KernelError> {
        self.collection_entry(collection)?.add_or_replace(function)
    }

    /// Add a whole collection. Functions are merged into an existing
    /// collection of the same name; clashing names are rejected.
    pub fn add_collection(&mut self, collection: FunctionCollection) -> Result<(), KernelError> {
        match self.collections.entry(collection.name.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(collection);
                Ok(())
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if let Some(clash) = collection.functions.keys().find(|n| existing.contains(n)) {
                    return Err(KernelError::DuplicateFunction {
                        collection: collection.name.clone(),
                        function: clash.clone(),
                    });
                }
                existing.functions.extend(collection.functions);
                Ok(())
            }
        }
    }

    fn collection_entry(&mut self, name: &str) -> Result<&mut FunctionCollection, KernelError> {
        match self.collections.entry(name.to_string()) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => Ok(slot.insert(FunctionCollection::new(name)?)),
        }
    }

    pub fn collection(&self, name: &str) -> Option<&FunctionCollection> {
        self.collections.get(name)
    }

    pub fn collections(&self) -> impl Iterator<Item = &FunctionCollection> {
        self.collections.values()
    }

    /// Look up `collection.name`
    pub fn get(
        &self,
        collection: &str,
        name: &str,
    ) -> Result<Arc<dyn KernelFunction>, KernelError> {
        let found = self
            .collections
            .get(collection)
            .ok_or_else(|| KernelError::CollectionNotFound {
                collection: collection.to_string(),
            })?;
        found
            .get(name)
            .cloned()
            .ok_or_else(|| KernelError::FunctionNotFound {
                collection: collection.to_string(),
                function: name.to_string(),
            })
    }

    /// Look up an unqualified name in the first collection that has it
    pub fn find(&self, name: &str) -> Result<Arc<dyn KernelFunction>, KernelError> {
        self.collections
            .values()
            .find_map(|c| c.get(name).cloned())
            .ok_or_else(|| KernelError::UnknownFunction {
                function: name.to_string(),
            })
    }

    /// Resolve a template function reference
    pub fn resolve(&self, function: &FunctionRef) -> Result<Arc<dyn KernelFunction>, KernelError> {
        match &function.collection {
            Some(collection) => self.get(collection.as_str(), function.name.as_str()),
            None => self.find(function.name.as_str()),
        }
    }

    /// Resolve a model tool name (`collection-function` or a bare name)
    pub fn resolve_tool(&self, tool_name: &str) -> Result<Arc<dyn KernelFunction>, KernelError> {
        match tool_name.split_once(TOOL_NAME_SEPARATOR) {
            Some((collection, name)) => self.get(collection, name),
            None => self.find(tool_name),
        }
    }

    /// Metadata of every registered function, in registration order
    pub fn descriptors(&self) -> Vec<FunctionDescriptor> {
        self.collections
            .values()
            .flat_map(|c| c.functions().map(|f| f.metadata().clone()))
            .collect()
    }

    /// Tool schemas for every registered function, as sent to a model
    pub fn tool_schemas(&self) -> Vec<serde_json::Value> {
        self.descriptors()
            .iter()
            .map(FunctionDescriptor::to_tool_schema)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.values().all(|c| c.is_empty())
    }
}

fn validate_name(name: &str) -> Result<(), KernelError> {
    if Identifier::is_valid(name) {
        Ok(())
    } else {
        Err(KernelError::InvalidName {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::NativeFunction;
    use serde_json::json;

    fn constant(name: &str, value: &'static str) -> NativeFunction {
        NativeFunction::from_fn(FunctionDescriptor::native(name), move |_| Ok(json!(value)))
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = FunctionRegistry::new();
        registry
            .register("text", constant("hello", "hi"))
            .expect("Should register");

        let f = registry.get("text", "hello").expect("Should find");
        assert_eq!(f.metadata().collection, "text");
        assert_eq!(f.metadata().qualified_name(), "text.hello");
    }

    #[test]
    fn test_tool_schemas_follow_registration_order() {
        let mut registry = FunctionRegistry::new();
        registry
            .register("text", constant("hello", "hi"))
            .expect("Should register");
        registry
            .register("time", constant("now", "noon"))
            .expect("Should register");

        let schemas = registry.tool_schemas();
        let names: Vec<&str> = schemas
            .iter()
            .filter_map(|s| s["function"]["name"].as_str())
            .collect();
        assert_eq!(names, vec!["text-hello", "time-now"]);
    }

    #[test]
    fn test_duplicate_error() {
        let mut registry = FunctionRegistry::new();
        registry
            .register("text", constant("hello", "hi"))
            .expect("First register should succeed");
        let result = registry.register("text", constant("hello", "again"));
        assert!(matches!(result, Err(KernelError::DuplicateFunction { .. })));
    }

    #[test]
    fn test_register_or_replace() {
        let mut registry = FunctionRegistry::new();
        registry
            .register("text", constant("hello", "hi"))
            .expect("Should register");
        registry
            .register_or_replace("text", constant("hello", "again"))
            .expect("Should replace");
        assert_eq!(registry.collection("text").map(|c| c.len()), Some(1));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut registry = FunctionRegistry::new();
        let result = registry.register("my-plugin", constant("f", "x"));
        assert!(matches!(result, Err(KernelError::InvalidName { .. })));
        let result = registry.register("ok", constant("bad name", "x"));
        assert!(matches!(result, Err(KernelError::InvalidName { .. })));
    }

    #[test]
    fn test_lookup_errors() {
        let mut registry = FunctionRegistry::new();
        registry
            .register("text", constant("hello", "hi"))
            .expect("Should register");
        assert!(matches!(
            registry.get("nope", "hello"),
            Err(KernelError::CollectionNotFound { .. })
        ));
        assert!(matches!(
            registry.get("text", "nope"),
            Err(KernelError::FunctionNotFound { .. })
        ));
        assert!(matches!(
            registry.find("nope"),
            Err(KernelError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_unqualified_lookup_uses_first_collection() {
        let mut registry = FunctionRegistry::new();
        registry.register("a", constant("f", "from a")).expect("register");
        registry.register("b", constant("f", "from b")).expect("register");

        let f = registry
            .resolve(&FunctionRef::new(None, "f"))
            .expect("Should resolve");
        assert_eq!(f.metadata().collection, "a");

        let f = registry
            .resolve(&FunctionRef::new(Some("b"), "f"))
            .expect("Should resolve");
        assert_eq!(f.metadata().collection, "b");
    }

    #[test]
    fn test_resolve_tool_name() {
        let mut registry = FunctionRegistry::new();
        registry.register("math", constant("add", "x")).expect("register");
        let f = registry.resolve_tool("math-add").expect("Should resolve");
        assert_eq!(f.metadata().fully_qualified_name(), "math-add");
        assert!(registry.resolve_tool("add").is_ok());
        assert!(registry.resolve_tool("text-add").is_err());
    }

    #[test]
    fn test_add_collection_merges() {
        let mut registry = FunctionRegistry::new();
        registry.register("text", constant("a", "x")).expect("register");

        let extra = FunctionCollection::new("text")
            .and_then(|c| c.with_function(constant("b", "y")))
            .expect("collection");
        registry.add_collection(extra).expect("merge");
        assert_eq!(registry.collection("text").map(|c| c.len()), Some(2));

        let clash = FunctionCollection::new("text")
            .and_then(|c| c.with_function(constant("a", "z")))
            .expect("collection");
        assert!(registry.add_collection(clash).is_err());
    }

    #[test]
    fn test_descriptors_in_order() {
        let mut registry = FunctionRegistry::new();
        registry.register("b", constant("x", "1")).expect("register");
        registry.register("a", constant("y", "2")).expect("register");
        let names: Vec<String> = registry
            .descriptors()
            .iter()
            .map(|d| d.fully_qualified_name())
            .collect();
        assert_eq!(names, vec!["b-x", "a-y"]);
    }
}
