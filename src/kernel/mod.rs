//! The kernel: functions, chat services and hooks under one owner, plus the
//! invocation pipeline that runs every function call.

pub mod hooks;

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, error, info, warn};

use crate::chat::ChatCompletionService;
use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::functions::{
    FunctionCollection, FunctionRegistry, FunctionResult, KernelArguments, KernelFunction,
    PromptExecutionSettings, PromptFunction, DEFAULT_SERVICE_ID,
};
use crate::parser::Template;
use crate::renderer::{self, RenderOptions};

pub use hooks::{
    FunctionInvocationHook, HookId, InvokeOutcome, InvokedContext, InvokingContext,
    PostInvokeAction, PreInvokeAction,
};

/// Collection used for ad-hoc prompts run through [`Kernel::invoke_prompt`]
const INLINE_PROMPT_COLLECTION: &str = "prompts";
const INLINE_PROMPT_NAME: &str = "inline";

#[derive(Clone, Default)]
pub struct Kernel {
    functions: FunctionRegistry,
    services: IndexMap<String, Arc<dyn ChatCompletionService>>,
    hooks: Vec<(HookId, Arc<dyn FunctionInvocationHook>)>,
    next_hook_id: u64,
    config: KernelConfig,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("functions", &self.functions)
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .field("hooks", &self.hooks.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Kernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: KernelConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut KernelConfig {
        &mut self.config
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }

    pub fn add_function<F: KernelFunction + 'static>(
        &mut self,
        collection: &str,
        function: F,
    ) -> Result<(), KernelError> {
        self.functions.register(collection, function)
    }

    pub fn add_collection(&mut self, collection: FunctionCollection) -> Result<(), KernelError> {
        self.functions.add_collection(collection)
    }

    /// Register a chat service under its own id, replacing any previous one
    pub fn add_service<S: ChatCompletionService + 'static>(&mut self, service: S) {
        let id = service.service_id().to_string();
        self.services.insert(id, Arc::new(service));
    }

    /// Look up a service by id, or the first registered one
    pub fn service(
        &self,
        service_id: Option<&str>,
    ) -> Result<Arc<dyn ChatCompletionService>, KernelError> {
        let found = match service_id {
            Some(id) => self.services.get(id),
            None => self.services.values().next(),
        };
        found.cloned().ok_or_else(|| KernelError::ServiceNotFound {
            service_id: service_id.map(str::to_string),
        })
    }

    /// Pick the service for a prompt.
    ///
    /// Settings are tried in order; the first one whose key names a
    /// registered service wins, and the `default` key matches the first
    /// registered service. Without settings the first service is used.
    pub fn select_service(
        &self,
        settings: Option<&IndexMap<String, PromptExecutionSettings>>,
    ) -> Result<(Arc<dyn ChatCompletionService>, PromptExecutionSettings), KernelError> {
        let Some(settings) = settings.filter(|s| !s.is_empty()) else {
            return Ok((self.service(None)?, PromptExecutionSettings::default()));
        };

        for (key, entry) in settings {
            let lookup = if key == DEFAULT_SERVICE_ID {
                None
            } else {
                Some(key.as_str())
            };
            if let Ok(service) = self.service(lookup) {
                return Ok((service, entry.clone()));
            }
        }

        Err(KernelError::ServiceNotFound {
            service_id: settings.keys().next().cloned(),
        })
    }

    pub fn add_hook<H: FunctionInvocationHook + 'static>(&mut self, hook: H) -> HookId {
        let id = HookId(self.next_hook_id);
        self.next_hook_id += 1;
        self.hooks.push((id, Arc::new(hook)));
        id
    }

    /// Remove a hook; returns false if it was not registered
    pub fn remove_hook(&mut self, id: HookId) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|(hook_id, _)| *hook_id != id);
        self.hooks.len() != before
    }

    /// Render options derived from the `[render]` config section
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions::from(&self.config.render)
    }

    /// Parse and render a template with this kernel's functions
    pub async fn render(
        &self,
        template: &str,
        arguments: &KernelArguments,
    ) -> Result<String, KernelError> {
        let template = Template::parse(template)?;
        renderer::render(self, &template, arguments, &self.render_options()).await
    }

    /// Invoke `collection.name` through the pipeline
    pub async fn invoke(
        &self,
        collection: &str,
        name: &str,
        arguments: KernelArguments,
    ) -> Result<InvokeOutcome, KernelError> {
        let function = self.functions.get(collection, name)?;
        self.invoke_function(&function, arguments).await
    }

    /// Render `prompt` as an ad-hoc prompt function and invoke it
    pub async fn invoke_prompt(
        &self,
        prompt: &str,
        arguments: KernelArguments,
    ) -> Result<InvokeOutcome, KernelError> {
        let mut function = PromptFunction::new(INLINE_PROMPT_NAME, prompt)?;
        function.metadata_mut().collection = INLINE_PROMPT_COLLECTION.to_string();
        let function: Arc<dyn KernelFunction> = Arc::new(function);
        self.invoke_function(&function, arguments).await
    }

    /// Run one function call with its hooks.
    ///
    /// A post-invoke `Repeat` starts over from the pre-invoke hooks, at most
    /// `invocation.max_repeats` times; after that the current result is
    /// returned as if the hooks had continued.
    pub async fn invoke_function(
        &self,
        function: &Arc<dyn KernelFunction>,
        arguments: KernelArguments,
    ) -> Result<InvokeOutcome, KernelError> {
        let metadata = function.metadata();
        let name = metadata.qualified_name();
        let mut arguments = arguments;
        let mut repeats = 0;

        loop {
            let mut invoking = InvokingContext::new(metadata, arguments);
            match self.run_pre_hooks(&mut invoking).await {
                PreInvokeAction::Continue => {}
                PreInvokeAction::Cancel => {
                    info!(function = %name, "invocation cancelled before call");
                    return Ok(InvokeOutcome::Cancelled(None));
                }
                PreInvokeAction::Skip => {
                    info!(function = %name, "invocation skipped");
                    return Ok(InvokeOutcome::Skipped);
                }
            }
            if invoking.arguments_replaced() {
                info!(function = %name, "arguments replaced by pre-invoke hook");
            }
            let call_arguments = invoking.into_arguments();

            debug!(function = %name, attempt = repeats + 1, "invoking function");
            let outcome = function.invoke(self, &call_arguments).await;
            if let Err(err) = &outcome {
                error!(function = %name, error = %err, "function failed");
            }

            let mut invoked = InvokedContext::new(metadata, call_arguments, outcome);
            let action = self.run_post_hooks(&mut invoked).await;
            let (current_arguments, result, error) = invoked.into_parts();

            if let Some(source) = error {
                return Err(KernelError::Execution {
                    function: name,
                    source,
                });
            }

            match action {
                PostInvokeAction::Continue => {
                    return Ok(InvokeOutcome::Completed(
                        result.unwrap_or_else(|| FunctionResult::empty(metadata.clone())),
                    ));
                }
                PostInvokeAction::Cancel => {
                    info!(function = %name, "invocation cancelled after call");
                    return Ok(InvokeOutcome::Cancelled(result));
                }
                PostInvokeAction::Repeat(replacement) => {
                    if repeats >= self.config.invocation.max_repeats {
                        warn!(
                            function = %name,
                            max_repeats = self.config.invocation.max_repeats,
                            "repeat limit reached, returning current result"
                        );
                        return Ok(InvokeOutcome::Completed(
                            result.unwrap_or_else(|| FunctionResult::empty(metadata.clone())),
                        ));
                    }
                    repeats += 1;
                    info!(function = %name, repeat = repeats, "repeating invocation");
                    arguments = replacement.unwrap_or(current_arguments);
                }
            }
        }
    }

    async fn run_pre_hooks(&self, context: &mut InvokingContext<'_>) -> PreInvokeAction {
        for (_, hook) in &self.hooks {
            let action = hook.on_invoking(context).await;
            if action != PreInvokeAction::Continue {
                return action;
            }
        }
        PreInvokeAction::Continue
    }

    async fn run_post_hooks(&self, context: &mut InvokedContext<'_>) -> PostInvokeAction {
        for (_, hook) in &self.hooks {
            let action = hook.on_invoked(context).await;
            if action != PostInvokeAction::Continue {
                return action;
            }
        }
        PostInvokeAction::Continue
    }
}
