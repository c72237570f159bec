//! Tool-call resolution loop
//!
//! Each round sends the history to the model. When the reply requests tool
//! calls, all of them run concurrently, their results are appended to the
//! history in request order, and the next round starts. The loop ends on a
//! reply without tool calls or when the attempt budget is used up.

use futures::future::join_all;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::error::KernelError;
use crate::functions::{FunctionDescriptor, KernelArguments, PromptExecutionSettings};
use crate::kernel::{InvokeOutcome, Kernel};

use super::streaming::{StreamAggregator, StreamingChatMessage};
use super::{ChatCompletionService, ChatHistory, ChatMessage, ToolCall};

/// Sent back to the model when a tool call's arguments are not a JSON object
pub const MALFORMED_ARGUMENTS_MESSAGE: &str =
    "The tool call arguments are malformed, please try again.";

/// Drives model rounds and tool-call resolution for one conversation
#[derive(Debug, Clone)]
pub struct FunctionCallingLoop<'k> {
    kernel: &'k Kernel,
    auto_invoke: bool,
    max_attempts: usize,
}

impl<'k> FunctionCallingLoop<'k> {
    /// A loop configured from the kernel's `[tool_calls]` section
    pub fn new(kernel: &'k Kernel) -> Self {
        let config = &kernel.config().tool_calls;
        Self {
            kernel,
            auto_invoke: config.auto_invoke,
            max_attempts: config.max_auto_invoke_attempts,
        }
    }

    /// With `false` the loop makes a single request and hands any tool
    /// calls back to the caller untouched
    pub fn with_auto_invoke(mut self, auto_invoke: bool) -> Self {
        self.auto_invoke = auto_invoke;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    fn rounds(&self) -> usize {
        if self.auto_invoke {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    fn tools(&self) -> Vec<FunctionDescriptor> {
        self.kernel.functions().descriptors()
    }

    /// Run rounds until the model answers without tool calls.
    ///
    /// Every reply is appended to `history`. When the budget runs out while
    /// the model still asks for tools, the last reply is returned as is.
    pub async fn run(
        &self,
        service: &dyn ChatCompletionService,
        history: &mut ChatHistory,
        settings: &PromptExecutionSettings,
        arguments: &KernelArguments,
    ) -> Result<ChatMessage, KernelError> {
        let tools = self.tools();
        let rounds = self.rounds();

        for round in 1..=rounds {
            debug!(round, service = service.service_id(), "requesting chat completion");
            let reply = service
                .complete_chat(history, settings, &tools)
                .await
                .map_err(KernelError::Service)?
                .into_iter()
                .next()
                .ok_or_else(|| no_reply(service))?;

            if let Some(reply) = self.after_reply(history, reply, round, rounds, arguments).await? {
                return Ok(reply);
            }
        }

        // `after_reply` always returns on the last round
        Err(no_reply(service))
    }

    /// Streaming form of [`FunctionCallingLoop::run`].
    ///
    /// Fragments are passed to `on_fragment` as they arrive and accumulated
    /// until the reply choice (the lowest index seen) sends a terminal
    /// fragment (stop or tool calls) or the stream ends.
    pub async fn run_streaming<F>(
        &self,
        service: &dyn ChatCompletionService,
        history: &mut ChatHistory,
        settings: &PromptExecutionSettings,
        arguments: &KernelArguments,
        mut on_fragment: F,
    ) -> Result<ChatMessage, KernelError>
    where
        F: FnMut(&StreamingChatMessage) + Send,
    {
        let tools = self.tools();
        let rounds = self.rounds();

        for round in 1..=rounds {
            debug!(round, service = service.service_id(), "requesting streamed completion");
            let mut stream = service
                .complete_chat_stream(history, settings, &tools)
                .await
                .map_err(KernelError::Service)?;

            let mut aggregator = StreamAggregator::new();
            while let Some(fragment) = stream.next().await {
                let fragment = fragment.map_err(KernelError::Service)?;
                on_fragment(&fragment);
                let choice = fragment.choice_index;
                let terminal = fragment.is_terminal();
                aggregator.push(fragment);
                // Only the reply choice ends the round
                if terminal && aggregator.first_choice() == Some(choice) {
                    break;
                }
            }

            let reply = aggregator
                .into_messages()
                .into_iter()
                .next()
                .ok_or_else(|| no_reply(service))?;

            if let Some(reply) = self.after_reply(history, reply, round, rounds, arguments).await? {
                return Ok(reply);
            }
        }

        Err(no_reply(service))
    }

    /// Record a reply and resolve its tool calls; `Some` ends the loop
    async fn after_reply(
        &self,
        history: &mut ChatHistory,
        reply: ChatMessage,
        round: usize,
        rounds: usize,
        arguments: &KernelArguments,
    ) -> Result<Option<ChatMessage>, KernelError> {
        history.add_message(reply.clone());

        if !reply.has_tool_calls() || !self.auto_invoke {
            return Ok(Some(reply));
        }
        if round == rounds {
            warn!(
                max_attempts = rounds,
                pending = reply.tool_calls.len(),
                "auto-invoke attempts exhausted, returning last reply"
            );
            return Ok(Some(reply));
        }

        self.resolve_tool_calls(history, &reply.tool_calls, arguments)
            .await?;
        Ok(None)
    }

    /// Resolve one round of tool calls concurrently.
    ///
    /// Every call gets its own copy of `arguments`. Results are appended as
    /// tool messages in request order once all calls have finished.
    /// Malformed arguments become a corrective tool message; unknown
    /// functions and unhandled execution errors fail the round, and a failed
    /// round appends nothing.
    pub async fn resolve_tool_calls(
        &self,
        history: &mut ChatHistory,
        requests: &[ToolCall],
        arguments: &KernelArguments,
    ) -> Result<(), KernelError> {
        info!(count = requests.len(), "resolving tool calls");

        let results = join_all(
            requests
                .iter()
                .map(|request| self.resolve_one(request, arguments.clone())),
        )
        .await;

        let messages = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        for message in messages {
            history.add_message(message);
        }
        Ok(())
    }

    async fn resolve_one(
        &self,
        request: &ToolCall,
        mut arguments: KernelArguments,
    ) -> Result<ChatMessage, KernelError> {
        let parsed = match request.parse_arguments() {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(
                    tool = %request.name,
                    id = %request.id,
                    error = %err,
                    "malformed tool call arguments"
                );
                return Ok(ChatMessage::tool(
                    &request.id,
                    &request.name,
                    MALFORMED_ARGUMENTS_MESSAGE,
                ));
            }
        };

        let function = self.kernel.functions().resolve_tool(&request.name)?;
        let metadata = function.metadata();
        let tool_name = metadata.fully_qualified_name();
        for (name, value) in parsed {
            arguments.insert(name, value);
        }

        let missing: Vec<&str> = metadata
            .required_parameters()
            .filter(|p| p.default.is_none() && !arguments.contains(&p.name))
            .map(|p| p.name.as_str())
            .collect();
        if !missing.is_empty() {
            warn!(
                tool = %request.name,
                id = %request.id,
                ?missing,
                "tool call lacks required arguments"
            );
            let message = format!(
                "The tool call is missing required arguments: {}. Please try again.",
                missing.join(", ")
            );
            return Ok(ChatMessage::tool(&request.id, tool_name, message));
        }

        info!(tool = %tool_name, id = %request.id, "invoking tool");
        let content = match self.kernel.invoke_function(&function, arguments).await? {
            InvokeOutcome::Completed(result) => result.text(),
            InvokeOutcome::Cancelled(result) => result.map(|r| r.text()).unwrap_or_default(),
            InvokeOutcome::Skipped => String::new(),
        };
        Ok(ChatMessage::tool(&request.id, tool_name, content))
    }
}

fn no_reply(service: &dyn ChatCompletionService) -> KernelError {
    KernelError::Service(anyhow::anyhow!(
        "chat completion service '{}' returned no message",
        service.service_id()
    ))
}
