//! Prompt Kernel - prompt templates, function invocation and tool calling
//!
//! This library provides a parser for the `{{ }}` prompt-template language,
//! a renderer that calls registered functions while rendering, an invocation
//! pipeline with pre/post hooks, and a loop that resolves tool calls
//! requested by a chat model.
//!
//! # Example
//!
//! ```rust
//! use prompt_kernel::{render, KernelArguments};
//!
//! let args = KernelArguments::new().with("name", "Ada");
//! let text = futures::executor::block_on(render(
//!     "Hello {{$name}}, 2 + 3 = {{math.add x='2' y='3'}}",
//!     &args,
//! ))
//! .unwrap();
//! assert_eq!(text, "Hello Ada, 2 + 3 = 5");
//! ```

pub mod chat;
pub mod config;
pub mod error;
pub mod functions;
pub mod kernel;
pub mod parser;
pub mod plugins;
pub mod renderer;

pub use chat::{
    ChatCompletionService, ChatHistory, ChatMessage, FunctionCallingLoop, StreamAggregator,
    StreamingChatMessage, ToolCall,
};
pub use config::{ConfigError, KernelConfig};
pub use error::{KernelError, ParseError};
pub use functions::{
    FunctionCollection, FunctionDescriptor, FunctionResult, KernelArguments, KernelFunction,
    NativeFunction, ParameterDescriptor, PromptExecutionSettings, PromptFunction,
};
pub use kernel::{
    FunctionInvocationHook, HookId, InvokeOutcome, InvokedContext, InvokingContext, Kernel,
    PostInvokeAction, PreInvokeAction,
};
pub use parser::{tokenize, Block, Template};
pub use renderer::RenderOptions;

/// Render a template against a kernel holding only the built-in plugins
///
/// # Example
///
/// ```rust
/// use prompt_kernel::{render, KernelArguments};
///
/// let out = futures::executor::block_on(render(
///     "{{text.uppercase $who}}",
///     &KernelArguments::new().with("who", "world"),
/// ))
/// .unwrap();
/// assert_eq!(out, "WORLD");
/// ```
pub async fn render(template: &str, arguments: &KernelArguments) -> Result<String, KernelError> {
    let mut kernel = Kernel::new();
    plugins::register_builtins(&mut kernel)?;
    kernel.render(template, arguments).await
}
