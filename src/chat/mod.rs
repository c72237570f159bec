//! Conversation types and the chat completion service seam
//!
//! Concrete model clients live outside this crate; they implement
//! [`ChatCompletionService`].

pub mod streaming;
pub mod tool_calls;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::KernelError;
use crate::functions::{FunctionDescriptor, PromptExecutionSettings};

pub use streaming::{StreamAggregator, StreamError, StreamingChatMessage, ToolCallDelta};
pub use tool_calls::{FunctionCallingLoop, MALFORMED_ARGUMENTS_MESSAGE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    /// `collection-function`
    pub name: String,
    /// Raw JSON object text as sent by the model
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the argument payload. Blank text means no arguments; anything
    /// else must be a JSON object.
    pub fn parse_arguments(&self) -> Result<Map<String, Value>, KernelError> {
        if self.arguments.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&self.arguments) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(self.invalid(format!("expected a JSON object, got `{}`", other))),
            Err(e) => Err(self.invalid(e.to_string())),
        }
    }

    fn invalid(&self, reason: String) -> KernelError {
        KernelError::InvalidToolArguments {
            function: self.name.clone(),
            reason,
        }
    }
}

/// One message of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: AuthorRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Request id a tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, Value>,
}

impl ChatMessage {
    pub fn new(role: AuthorRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            finish_reason: None,
            metadata: IndexMap::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(AuthorRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(AuthorRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(AuthorRole::Assistant, content).with_finish_reason(FinishReason::Stop)
    }

    /// An assistant message that only requests tool calls
    pub fn tool_requests(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
            ..Self::new(AuthorRole::Assistant, "")
        }
        .with_finish_reason(FinishReason::ToolCalls)
    }

    /// The result of one tool call
    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::new(AuthorRole::Tool, content)
        }
    }

    pub fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Append-only conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_message(content: impl Into<String>) -> Self {
        let mut history = Self::new();
        history.add_message(ChatMessage::system(content));
        history
    }

    pub fn add_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.add_message(ChatMessage::user(content));
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.add_message(ChatMessage::assistant(content));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

pub type FragmentStream = BoxStream<'static, anyhow::Result<StreamingChatMessage>>;

/// A chat model behind some provider API
#[async_trait]
pub trait ChatCompletionService: Send + Sync {
    /// Key used to select this service from execution settings
    fn service_id(&self) -> &str;

    /// One request/response round. `tools` are the functions the model may
    /// call, named by [`FunctionDescriptor::fully_qualified_name`].
    async fn complete_chat(
        &self,
        history: &ChatHistory,
        settings: &PromptExecutionSettings,
        tools: &[FunctionDescriptor],
    ) -> anyhow::Result<Vec<ChatMessage>>;

    /// Streaming form of [`ChatCompletionService::complete_chat`]. The
    /// default sends every complete message as a single fragment.
    async fn complete_chat_stream(
        &self,
        history: &ChatHistory,
        settings: &PromptExecutionSettings,
        tools: &[FunctionDescriptor],
    ) -> anyhow::Result<FragmentStream> {
        let messages = self.complete_chat(history, settings, tools).await?;
        let fragments: Vec<anyhow::Result<StreamingChatMessage>> = messages
            .into_iter()
            .enumerate()
            .map(|(choice, message)| Ok(StreamingChatMessage::from_message(choice, message)))
            .collect();
        Ok(futures::stream::iter(fragments).boxed())
    }
}
