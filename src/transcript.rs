//! Append-only transcript shared by the run loop and its observers

use crate::messages::{ChatMessage, GroupMessage};

/// Ordered, append-only record of everything said in a group chat.
///
/// Append order equals speaking order. Entries are never mutated or removed
/// except through [`Transcript::clear`].
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<GroupMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: impl Into<GroupMessage>) {
        self.messages.push(message.into());
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[GroupMessage] {
        &self.messages
    }

    /// Chat messages appended at or after `watermark` (a transcript index).
    ///
    /// Events are skipped: participants and termination conditions only ever
    /// see the chat category.
    pub fn chat_since(&self, watermark: usize) -> Vec<ChatMessage> {
        self.messages[watermark.min(self.messages.len())..]
            .iter()
            .filter_map(|m| m.as_chat().cloned())
            .collect()
    }

    /// Everything appended at or after `watermark`, both categories.
    pub fn since(&self, watermark: usize) -> &[GroupMessage] {
        &self.messages[watermark.min(self.messages.len())..]
    }

    /// Explicit reset; the only way entries are ever removed.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
