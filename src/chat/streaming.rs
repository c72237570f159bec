//! Streaming fragments and their accumulation
//!
//! Fragments of one choice are appended in arrival order. Appending is
//! associative but not commutative: there is no reordering buffer, so a
//! fragment that arrives late or not at all corrupts that choice.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::{AuthorRole, ChatMessage, FinishReason, ToolCall};

#[derive(Debug, Error, PartialEq)]
pub enum StreamError {
    #[error("cannot append a fragment of choice {found} to choice {expected}")]
    ChoiceMismatch { expected: usize, found: usize },
}

/// Partial tool call, merged with other deltas of the same `index`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ToolCallDelta {
    /// The id is kept from the first delta that has one; name and
    /// argument text are concatenated.
    fn merge(&mut self, other: ToolCallDelta) {
        if self.id.is_none() {
            self.id = other.id;
        }
        append_text(&mut self.name, other.name);
        append_text(&mut self.arguments, other.arguments);
    }

    fn into_tool_call(self) -> ToolCall {
        ToolCall {
            id: self.id.unwrap_or_else(|| format!("call_{}", self.index)),
            name: self.name.unwrap_or_default(),
            arguments: self.arguments.unwrap_or_default(),
        }
    }
}

/// One fragment of a streamed response, or the accumulation of several
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingChatMessage {
    pub choice_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<AuthorRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl StreamingChatMessage {
    /// A content delta
    pub fn text(choice_index: usize, content: impl Into<String>) -> Self {
        Self {
            choice_index,
            role: Some(AuthorRole::Assistant),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// A tool call delta
    pub fn tool_call(choice_index: usize, delta: ToolCallDelta) -> Self {
        Self {
            choice_index,
            role: Some(AuthorRole::Assistant),
            tool_calls: vec![delta],
            ..Self::default()
        }
    }

    /// A terminal fragment without content
    pub fn finish(choice_index: usize, reason: FinishReason) -> Self {
        Self {
            choice_index,
            finish_reason: Some(reason),
            ..Self::default()
        }
    }

    /// A complete message delivered as one fragment
    pub fn from_message(choice_index: usize, message: ChatMessage) -> Self {
        let tool_calls = message
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(index, call)| ToolCallDelta {
                index,
                id: Some(call.id),
                name: Some(call.name),
                arguments: Some(call.arguments),
            })
            .collect();
        Self {
            choice_index,
            role: Some(message.role),
            content: message.content,
            tool_calls,
            finish_reason: message.finish_reason,
        }
    }

    /// Whether this fragment ends its round
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.finish_reason,
            Some(FinishReason::Stop) | Some(FinishReason::ToolCalls)
        )
    }

    /// Append `other`, which must belong to the same choice
    pub fn append(&mut self, other: StreamingChatMessage) -> Result<(), StreamError> {
        if other.choice_index != self.choice_index {
            return Err(StreamError::ChoiceMismatch {
                expected: self.choice_index,
                found: other.choice_index,
            });
        }

        if self.role.is_none() {
            self.role = other.role;
        }
        append_text(&mut self.content, other.content);

        for delta in other.tool_calls {
            match self.tool_calls.iter_mut().find(|d| d.index == delta.index) {
                Some(existing) => existing.merge(delta),
                None => self.tool_calls.push(delta),
            }
        }

        if other.finish_reason.is_some() {
            self.finish_reason = other.finish_reason;
        }
        Ok(())
    }

    pub fn into_message(self) -> ChatMessage {
        let mut message = ChatMessage::new(
            self.role.unwrap_or(AuthorRole::Assistant),
            self.content.unwrap_or_default(),
        );
        message.tool_calls = self
            .tool_calls
            .into_iter()
            .map(ToolCallDelta::into_tool_call)
            .collect();
        message.finish_reason = self.finish_reason;
        message
    }
}

fn append_text(target: &mut Option<String>, addition: Option<String>) {
    match (target.as_mut(), addition) {
        (Some(existing), Some(more)) => existing.push_str(&more),
        (None, Some(more)) => *target = Some(more),
        (_, None) => {}
    }
}

/// Accumulates fragments per choice index
#[derive(Debug, Clone, Default)]
pub struct StreamAggregator {
    choices: BTreeMap<usize, StreamingChatMessage>,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: StreamingChatMessage) {
        match self.choices.entry(fragment.choice_index) {
            Entry::Occupied(mut accumulated) => {
                if let Err(err) = accumulated.get_mut().append(fragment) {
                    warn!(error = %err, "dropping stream fragment");
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(fragment);
            }
        }
    }

    /// Lowest choice index seen so far; its message is the round's reply
    pub fn first_choice(&self) -> Option<usize> {
        self.choices.keys().next().copied()
    }

    pub fn get(&self, choice_index: usize) -> Option<&StreamingChatMessage> {
        self.choices.get(&choice_index)
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Accumulated messages ordered by choice index
    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.choices
            .into_values()
            .map(StreamingChatMessage::into_message)
            .collect()
    }
}
