//! Messages exchanged inside a group conversation
//!
//! Two closed categories: [`ChatMessage`] for visible agent-to-agent
//! messages, [`AgentEvent`] for internal events describing a participant's
//! intermediate steps. [`GroupMessage`] is the union stored in the transcript
//! and delivered to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One part of a multi-modal message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { url: String },
}

/// A plain text message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextMessage {
    pub id: String,
    pub source: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A message composed of ordered text/image parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiModalMessage {
    pub id: String,
    pub source: String,
    pub parts: Vec<ContentPart>,
    pub created_at: DateTime<Utc>,
}

/// A structured-data payload message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredMessage {
    pub id: String,
    pub source: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

/// A control message requesting that the conversation stop.
///
/// Doubles as the stop reason carried by a
/// [`TaskResult`](crate::chat::TaskResult): the literal message/content that
/// caused termination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopMessage {
    pub source: String,
    pub content: String,
}

impl StopMessage {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
        }
    }
}

/// A visible, agent-to-agent chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatMessage {
    Text(TextMessage),
    MultiModal(MultiModalMessage),
    Structured(StructuredMessage),
    Stop(StopMessage),
}

impl ChatMessage {
    pub fn text(source: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage::Text(TextMessage {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            content: content.into(),
            created_at: Utc::now(),
        })
    }

    pub fn multi_modal(source: impl Into<String>, parts: Vec<ContentPart>) -> Self {
        ChatMessage::MultiModal(MultiModalMessage {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            parts,
            created_at: Utc::now(),
        })
    }

    pub fn structured(source: impl Into<String>, data: Value) -> Self {
        ChatMessage::Structured(StructuredMessage {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            data,
            created_at: Utc::now(),
        })
    }

    pub fn stop(source: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage::Stop(StopMessage::new(source, content))
    }

    /// Name of the participant that produced this message.
    pub fn source(&self) -> &str {
        match self {
            ChatMessage::Text(m) => &m.source,
            ChatMessage::MultiModal(m) => &m.source,
            ChatMessage::Structured(m) => &m.source,
            ChatMessage::Stop(m) => &m.source,
        }
    }

    /// Content rendered to plain text (image parts become a placeholder).
    pub fn rendered(&self) -> String {
        match self {
            ChatMessage::Text(m) => m.content.clone(),
            ChatMessage::MultiModal(m) => m
                .parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.clone(),
                    ContentPart::Image { .. } => "[image]".to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            ChatMessage::Structured(m) => m.data.to_string(),
            ChatMessage::Stop(m) => m.content.clone(),
        }
    }
}

/// A tool invocation requested by a participant during its turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequestEvent {
    pub id: String,
    pub source: String,
    pub tool_name: String,
    pub arguments: Value,
    pub created_at: DateTime<Utc>,
}

/// The outcome of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResultEvent {
    pub id: String,
    pub source: String,
    pub tool_call_id: String,
    pub output: Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Internal event describing a participant's intermediate step.
///
/// Events are observable but are never delivered to other participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    ToolCallRequest(ToolCallRequestEvent),
    ToolCallResult(ToolCallResultEvent),
}

impl AgentEvent {
    pub fn tool_call_request(
        source: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        AgentEvent::ToolCallRequest(ToolCallRequestEvent {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            tool_name: tool_name.into(),
            arguments,
            created_at: Utc::now(),
        })
    }

    pub fn tool_call_result(
        source: impl Into<String>,
        tool_call_id: impl Into<String>,
        output: Value,
        error: Option<String>,
    ) -> Self {
        AgentEvent::ToolCallResult(ToolCallResultEvent {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            tool_call_id: tool_call_id.into(),
            output,
            error,
            created_at: Utc::now(),
        })
    }

    pub fn source(&self) -> &str {
        match self {
            AgentEvent::ToolCallRequest(e) => &e.source,
            AgentEvent::ToolCallResult(e) => &e.source,
        }
    }
}

/// Union of the two message categories, as stored in the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum GroupMessage {
    Chat(ChatMessage),
    Event(AgentEvent),
}

impl GroupMessage {
    pub fn source(&self) -> &str {
        match self {
            GroupMessage::Chat(m) => m.source(),
            GroupMessage::Event(e) => e.source(),
        }
    }

    /// The chat message, if this entry is one.
    pub fn as_chat(&self) -> Option<&ChatMessage> {
        match self {
            GroupMessage::Chat(m) => Some(m),
            GroupMessage::Event(_) => None,
        }
    }
}

impl From<ChatMessage> for GroupMessage {
    fn from(m: ChatMessage) -> Self {
        GroupMessage::Chat(m)
    }
}

impl From<AgentEvent> for GroupMessage {
    fn from(e: AgentEvent) -> Self {
        GroupMessage::Event(e)
    }
}
