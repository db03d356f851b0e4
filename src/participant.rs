//! Participant abstraction for group conversations
//!
//! A participant is a named, stateful actor: it accepts the batch of chat
//! messages it has not yet seen and produces zero-or-more internal events
//! plus exactly one terminal chat message. Internal state is only advanced by
//! these incremental batches; delivering the same message twice corrupts a
//! participant's state, and that contract is the caller's to uphold.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::messages::{AgentEvent, ChatMessage};

/// What a participant produced during one turn.
#[derive(Debug, Clone)]
pub struct ParticipantResponse {
    /// Intermediate steps taken while producing the message, in order
    pub events: Vec<AgentEvent>,
    /// The single terminal chat message for this turn
    pub message: ChatMessage,
}

impl ParticipantResponse {
    pub fn message(message: ChatMessage) -> Self {
        Self {
            events: Vec::new(),
            message,
        }
    }
}

/// One element of a participant's streaming turn.
#[derive(Debug, Clone)]
pub enum ParticipantItem {
    /// An intermediate event, forwarded as it happens
    Event(AgentEvent),
    /// Terminal element: the same response a batch call would return
    Response(ParticipantResponse),
}

/// Roster entry describing an eligible speaker to a turn selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub name: String,
    pub description: String,
}

/// A conversational actor in a group chat.
///
/// Long-running work must honor the cancellation token threaded through every
/// call; a cancelled participant returns the
/// [`Aborted`](crate::error::GroupChatError::Aborted) error and produces
/// nothing.
#[async_trait]
pub trait ChatParticipant: Send {
    /// Unique name within a registry
    fn name(&self) -> &str;

    /// Role description, used by model-driven turn selection
    fn description(&self) -> &str;

    /// Handle the chat messages this participant has not yet seen and
    /// produce this turn's response.
    async fn on_messages(
        &mut self,
        new_messages: Vec<ChatMessage>,
        cancel: &CancellationToken,
    ) -> Result<ParticipantResponse>;

    /// Streaming variant: a lazy, finite, non-restartable sequence of items
    /// terminated by the same [`ParticipantResponse`] as its last element.
    ///
    /// The default implementation runs the batch call and then replays its
    /// events ahead of the terminal response.
    fn on_messages_stream<'a>(
        &'a mut self,
        new_messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> BoxStream<'a, Result<ParticipantItem>> {
        futures::stream::once(async move { self.on_messages(new_messages, &cancel).await })
            .flat_map(|result| match result {
                Ok(response) => {
                    let mut items: Vec<Result<ParticipantItem>> = response
                        .events
                        .iter()
                        .cloned()
                        .map(|e| Ok(ParticipantItem::Event(e)))
                        .collect();
                    items.push(Ok(ParticipantItem::Response(response)));
                    futures::stream::iter(items).boxed()
                }
                Err(e) => futures::stream::iter(vec![Err(e)]).boxed(),
            })
            .boxed()
    }

    /// Clear all internal state back to construction-time defaults.
    async fn reset(&mut self) -> Result<()>;
}
