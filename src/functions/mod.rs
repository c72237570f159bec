//! Function model: arguments, descriptors, results and the registry

pub mod arguments;
pub mod function;
pub mod metadata;
pub mod registry;
pub mod result;

pub use arguments::{value_to_text, KernelArguments, PromptExecutionSettings, DEFAULT_SERVICE_ID};
pub use function::{bind_defaults, KernelFunction, NativeFunction, PromptFunction};
pub use metadata::{FunctionDescriptor, FunctionKind, ParameterDescriptor, TOOL_NAME_SEPARATOR};
pub use registry::{FunctionCollection, FunctionRegistry};
pub use result::FunctionResult;
