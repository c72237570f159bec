//! Pre- and post-invocation hooks
//!
//! Hooks are owned by the [`super::Kernel`] and run in registration order.
//! Each one returns an action instead of raising: the first action other
//! than `Continue` ends the round of hooks.

use async_trait::async_trait;

use crate::functions::{FunctionDescriptor, FunctionResult, KernelArguments};

/// Handle returned by [`super::Kernel::add_hook`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub(crate) u64);

/// What a pre-invoke hook wants to happen next
#[derive(Debug, Clone, PartialEq)]
pub enum PreInvokeAction {
    Continue,
    /// Stop; the function is not called and nothing is returned
    Cancel,
    /// Stop like `Cancel`, reported separately to the caller
    Skip,
}

/// What a post-invoke hook wants to happen next
#[derive(Debug, Clone, PartialEq)]
pub enum PostInvokeAction {
    Continue,
    /// Stop and return whatever result is currently set
    Cancel,
    /// Run the whole invocation again, pre-invoke hooks included. `None`
    /// reuses the context's arguments as the hooks left them.
    Repeat(Option<KernelArguments>),
}

/// State handed to pre-invoke hooks
#[derive(Debug)]
pub struct InvokingContext<'a> {
    function: &'a FunctionDescriptor,
    arguments: KernelArguments,
    replaced: bool,
}

impl<'a> InvokingContext<'a> {
    pub(crate) fn new(function: &'a FunctionDescriptor, arguments: KernelArguments) -> Self {
        Self {
            function,
            arguments,
            replaced: false,
        }
    }

    pub fn function(&self) -> &FunctionDescriptor {
        self.function
    }

    pub fn arguments(&self) -> &KernelArguments {
        &self.arguments
    }

    pub fn arguments_mut(&mut self) -> &mut KernelArguments {
        self.replaced = true;
        &mut self.arguments
    }

    /// Replace the argument table the function will be called with
    pub fn set_arguments(&mut self, arguments: KernelArguments) {
        self.replaced = true;
        self.arguments = arguments;
    }

    /// Whether a hook asked for mutable access to the arguments
    pub fn arguments_replaced(&self) -> bool {
        self.replaced
    }

    pub(crate) fn into_arguments(self) -> KernelArguments {
        self.arguments
    }
}

/// State handed to post-invoke hooks.
///
/// The arguments start as the ones the function was called with; hooks may
/// replace them for a following `Repeat`. A failed call leaves `result`
/// empty and the error attached here. If the error is still attached once
/// all hooks ran, the invocation fails with it.
#[derive(Debug)]
pub struct InvokedContext<'a> {
    function: &'a FunctionDescriptor,
    arguments: KernelArguments,
    result: Option<FunctionResult>,
    error: Option<anyhow::Error>,
}

impl<'a> InvokedContext<'a> {
    pub(crate) fn new(
        function: &'a FunctionDescriptor,
        arguments: KernelArguments,
        outcome: anyhow::Result<FunctionResult>,
    ) -> Self {
        let (result, error) = match outcome {
            Ok(result) => (Some(result), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            function,
            arguments,
            result,
            error,
        }
    }

    pub fn function(&self) -> &FunctionDescriptor {
        self.function
    }

    pub fn arguments(&self) -> &KernelArguments {
        &self.arguments
    }

    pub fn arguments_mut(&mut self) -> &mut KernelArguments {
        &mut self.arguments
    }

    /// Replace the arguments a repeated invocation starts from
    pub fn set_arguments(&mut self, arguments: KernelArguments) {
        self.arguments = arguments;
    }

    pub fn result(&self) -> Option<&FunctionResult> {
        self.result.as_ref()
    }

    pub fn set_result(&mut self, result: FunctionResult) {
        self.result = Some(result);
    }

    pub fn take_result(&mut self) -> Option<FunctionResult> {
        self.result.take()
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_ref()
    }

    /// Detach the captured error so the invocation does not fail
    pub fn clear_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (KernelArguments, Option<FunctionResult>, Option<anyhow::Error>) {
        (self.arguments, self.result, self.error)
    }
}

/// Extension point around every function invocation
#[async_trait]
pub trait FunctionInvocationHook: Send + Sync {
    async fn on_invoking(&self, _context: &mut InvokingContext<'_>) -> PreInvokeAction {
        PreInvokeAction::Continue
    }

    async fn on_invoked(&self, _context: &mut InvokedContext<'_>) -> PostInvokeAction {
        PostInvokeAction::Continue
    }
}

/// How one pipeline run ended
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeOutcome {
    Completed(FunctionResult),
    /// Cancelled by a hook; post-invoke cancellation keeps the current result
    Cancelled(Option<FunctionResult>),
    Skipped,
}

impl InvokeOutcome {
    pub fn result(&self) -> Option<&FunctionResult> {
        match self {
            InvokeOutcome::Completed(result) => Some(result),
            InvokeOutcome::Cancelled(result) => result.as_ref(),
            InvokeOutcome::Skipped => None,
        }
    }

    pub fn into_result(self) -> Option<FunctionResult> {
        match self {
            InvokeOutcome::Completed(result) => Some(result),
            InvokeOutcome::Cancelled(result) => result,
            InvokeOutcome::Skipped => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, InvokeOutcome::Cancelled(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, InvokeOutcome::Skipped)
    }

    /// Result text, empty when there is no result
    pub fn text(&self) -> String {
        self.result().map(|r| r.text()).unwrap_or_default()
    }
}
