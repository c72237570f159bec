//! Callable functions: the [`KernelFunction`] trait and its two implementations

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::chat::tool_calls::FunctionCallingLoop;
use crate::chat::ChatHistory;
use crate::error::{KernelError, ParseError};
use crate::kernel::Kernel;
use crate::parser::Template;
use crate::renderer;

use super::arguments::{KernelArguments, PromptExecutionSettings};
use super::metadata::{FunctionDescriptor, ParameterDescriptor};
use super::result::FunctionResult;

/// Anything the kernel can invoke.
///
/// Implementations report failures as `anyhow::Error`; the invocation
/// pipeline attaches the function name before they reach a caller.
#[async_trait]
pub trait KernelFunction: Send + Sync {
    fn metadata(&self) -> &FunctionDescriptor;

    /// Used by the registry to assign the owning collection
    fn metadata_mut(&mut self) -> &mut FunctionDescriptor;

    async fn invoke(
        &self,
        kernel: &Kernel,
        arguments: &KernelArguments,
    ) -> anyhow::Result<FunctionResult>;
}

/// Fill declared defaults and check that required parameters are present
pub fn bind_defaults(
    metadata: &FunctionDescriptor,
    arguments: &KernelArguments,
) -> Result<KernelArguments, KernelError> {
    let mut bound = arguments.clone();
    for param in &metadata.parameters {
        if bound.contains(&param.name) {
            continue;
        }
        match &param.default {
            Some(default) => {
                bound.insert(param.name.clone(), default.clone());
            }
            None if param.required => {
                return Err(KernelError::MissingArgument {
                    function: metadata.qualified_name(),
                    parameter: param.name.clone(),
                });
            }
            None => {}
        }
    }
    Ok(bound)
}

type NativeHandler =
    Arc<dyn Fn(KernelArguments) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// A function backed by a Rust closure
#[derive(Clone)]
pub struct NativeFunction {
    metadata: FunctionDescriptor,
    handler: NativeHandler,
}

impl NativeFunction {
    /// Wrap an async closure. It receives its own copy of the arguments
    /// with defaults already filled in.
    pub fn new<F, Fut>(metadata: FunctionDescriptor, handler: F) -> Self
    where
        F: Fn(KernelArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            metadata,
            handler: Arc::new(move |args| handler(args).boxed()),
        }
    }

    /// Wrap a synchronous closure
    pub fn from_fn<F>(metadata: FunctionDescriptor, f: F) -> Self
    where
        F: Fn(&KernelArguments) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(metadata, move |args| futures::future::ready(f(&args)))
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KernelFunction for NativeFunction {
    fn metadata(&self) -> &FunctionDescriptor {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut FunctionDescriptor {
        &mut self.metadata
    }

    async fn invoke(
        &self,
        _kernel: &Kernel,
        arguments: &KernelArguments,
    ) -> anyhow::Result<FunctionResult> {
        let arguments = bind_defaults(&self.metadata, arguments)?;
        let value = (self.handler)(arguments).await?;
        Ok(FunctionResult::new(self.metadata.clone(), value))
    }
}

/// A function that renders a template and sends it to a chat completion
/// service as a user message. The reply text is the result.
#[derive(Debug, Clone)]
pub struct PromptFunction {
    metadata: FunctionDescriptor,
    template: Template,
    execution_settings: IndexMap<String, PromptExecutionSettings>,
}

impl PromptFunction {
    /// Parse `template` once; every variable it references becomes an
    /// optional parameter.
    pub fn new(name: impl Into<String>, template: &str) -> Result<Self, ParseError> {
        let template = Template::parse(template)?;
        let mut metadata = FunctionDescriptor::prompt(name);
        metadata.parameters = template
            .variables()
            .into_iter()
            .map(ParameterDescriptor::new)
            .collect();
        Ok(Self {
            metadata,
            template,
            execution_settings: IndexMap::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    /// Settings used when the call arguments carry none
    pub fn with_settings(mut self, settings: PromptExecutionSettings) -> Self {
        self.execution_settings
            .insert(settings.key().to_string(), settings);
        self
    }
}

#[async_trait]
impl KernelFunction for PromptFunction {
    fn metadata(&self) -> &FunctionDescriptor {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut FunctionDescriptor {
        &mut self.metadata
    }

    async fn invoke(
        &self,
        kernel: &Kernel,
        arguments: &KernelArguments,
    ) -> anyhow::Result<FunctionResult> {
        let arguments = bind_defaults(&self.metadata, arguments)?;
        let rendered =
            renderer::render(kernel, &self.template, &arguments, &kernel.render_options()).await?;

        let own_settings = if self.execution_settings.is_empty() {
            None
        } else {
            Some(&self.execution_settings)
        };
        let (service, settings) =
            kernel.select_service(arguments.execution_settings().or(own_settings))?;
        debug!(
            function = %self.metadata.qualified_name(),
            service = service.service_id(),
            "sending rendered prompt"
        );

        let mut history = ChatHistory::new();
        history.add_user_message(rendered.clone());
        let reply = FunctionCallingLoop::new(kernel)
            .run(service.as_ref(), &mut history, &settings, &arguments)
            .await?;

        Ok(
            FunctionResult::new(self.metadata.clone(), reply.content.unwrap_or_default())
                .with_metadata("rendered_prompt", rendered)
                .with_metadata("messages", serde_json::to_value(&history)?),
        )
    }
}
