//! # Roundtable
//!
//! Group conversation orchestration for multi-agent LLM workflows: a
//! registry of named participants, pluggable turn selection, composable
//! termination conditions, and a sequential run loop with batch and
//! streaming interfaces and cooperative cancellation.
//!
//! ## Core Concepts
//!
//! - **Participant**: a named, stateful actor that consumes the chat
//!   messages it has not yet seen and produces events plus one response
//! - **Selector**: decides who speaks next: round-robin, model-driven, or
//!   caller-supplied functions
//! - **Termination**: stateful predicates over each turn's message delta,
//!   composable with `and_of`/`or_of`
//! - **GroupChat**: drives selector → participant → transcript →
//!   termination, one speaker at a time, resumable across runs
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use roundtable::{
//!     conditions, AssistantAgent, GroupChat, ModelClient, OpenAIModel,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> roundtable::Result<()> {
//! let model: Arc<dyn ModelClient> = Arc::new(OpenAIModel::new("gpt-4o"));
//!
//! let writer = AssistantAgent::new("writer", model.clone())
//!     .description("drafts short texts")
//!     .instructions("You write concise drafts.");
//! let critic = AssistantAgent::new("critic", model)
//!     .description("reviews drafts")
//!     .instructions("Reply APPROVE when the draft is good.");
//!
//! let chat = GroupChat::builder()
//!     .participant(writer)
//!     .participant(critic)
//!     .termination(conditions::or_of(
//!         conditions::text_mention("APPROVE"),
//!         conditions::max_messages(10),
//!     ))
//!     .build()?;
//!
//! let result = chat.run(Some("Write a haiku about autumn.".to_string())).await?;
//! println!("stopped: {:?}", result.stop_reason);
//! # Ok(())
//! # }
//! ```

pub mod assistant;
pub mod chat;
pub mod error;
pub mod memory;
pub mod messages;
pub mod model;
pub mod participant;
pub mod selector;
pub mod termination;
pub mod tool;
pub mod transcript;

// Re-export the main surface
pub use assistant::AssistantAgent;
pub use chat::{GroupChat, GroupChatBuilder, RunStatus, StreamEvent, TaskResult, TASK_SOURCE};
pub use error::{GroupChatError, Result};
pub use memory::{ListMemory, Memory, MemoryContent};
pub use messages::{
    AgentEvent, ChatMessage, ContentPart, GroupMessage, MultiModalMessage, StopMessage,
    StructuredMessage, TextMessage,
};
pub use model::{Completion, ModelClient, ModelMessage, OpenAIModel, Role, ScriptedModel, ToolCall};
pub use participant::{ChatParticipant, ParticipantItem, ParticipantResponse, RosterEntry};
pub use selector::{
    CandidateFn, ModelSelector, RoundRobinSelector, SelectRequest, SelectorFn, SelectorModelSvc,
    SpeakerSelector,
};
pub use termination::{
    conditions, AndCondition, ExternalTermination, MaxMessageTermination, OrCondition, StopHandle,
    TerminationCondition, TextMentionTermination, TimeoutTermination,
};
pub use tool::{FunctionTool, Tool};
pub use transcript::Transcript;

// Re-export the cancellation token callers thread through runs
pub use tokio_util::sync::CancellationToken;
