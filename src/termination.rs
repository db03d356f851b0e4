//! Composable termination conditions for the run loop
//!
//! A condition is a stateful predicate over the delta of chat messages
//! appended since its last evaluation, never the full transcript. Once it
//! signals stop it is terminated: evaluating it again without a reset is a
//! protocol error, not a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{GroupChatError, Result};
use crate::messages::{ChatMessage, StopMessage};

/// Stateful predicate deciding whether a conversation must stop.
///
/// Lifecycle: armed → triggered (via [`evaluate`](Self::evaluate) returning
/// `Some`) → armed again only through [`reset`](Self::reset).
pub trait TerminationCondition: Send {
    /// Identifier used in stop reasons and protocol-misuse errors
    fn name(&self) -> &str;

    /// Inspect the delta since the last call. Returns `Some(stop)` when the
    /// condition triggers, `Err(AlreadyTerminated)` when called after it has.
    fn evaluate(&mut self, delta: &[ChatMessage]) -> Result<Option<StopMessage>>;

    /// Whether the condition has triggered and needs a reset before reuse
    fn is_terminated(&self) -> bool;

    /// Return to the armed state; prior triggers have no further effect
    fn reset(&mut self);
}

fn already_terminated(name: &str) -> GroupChatError {
    GroupChatError::AlreadyTerminated {
        condition: name.to_string(),
    }
}

/// Triggers once the total number of messages seen reaches a threshold.
pub struct MaxMessageTermination {
    max: usize,
    count: usize,
    terminated: bool,
}

impl MaxMessageTermination {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            count: 0,
            terminated: false,
        }
    }
}

impl TerminationCondition for MaxMessageTermination {
    fn name(&self) -> &str {
        "max_messages"
    }

    fn evaluate(&mut self, delta: &[ChatMessage]) -> Result<Option<StopMessage>> {
        if self.terminated {
            return Err(already_terminated(self.name()));
        }
        self.count += delta.len();
        if self.count >= self.max {
            self.terminated = true;
            return Ok(Some(StopMessage::new(
                self.name(),
                format!("maximum number of messages ({}) reached", self.max),
            )));
        }
        Ok(None)
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn reset(&mut self) {
        self.count = 0;
        self.terminated = false;
    }
}

/// Triggers on the first delta message whose rendered content contains a
/// target substring.
pub struct TextMentionTermination {
    text: String,
    terminated: bool,
}

impl TextMentionTermination {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            terminated: false,
        }
    }
}

impl TerminationCondition for TextMentionTermination {
    fn name(&self) -> &str {
        "text_mention"
    }

    fn evaluate(&mut self, delta: &[ChatMessage]) -> Result<Option<StopMessage>> {
        if self.terminated {
            return Err(already_terminated(self.name()));
        }
        for message in delta {
            if message.rendered().contains(&self.text) {
                self.terminated = true;
                return Ok(Some(StopMessage::new(
                    self.name(),
                    format!("text '{}' mentioned by {}", self.text, message.source()),
                )));
            }
        }
        Ok(None)
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn reset(&mut self) {
        self.terminated = false;
    }
}

/// Triggers once wall-clock time since arming exceeds a duration.
///
/// The clock starts at the first evaluation after construction or reset.
pub struct TimeoutTermination {
    duration: Duration,
    started: Option<Instant>,
    terminated: bool,
}

impl TimeoutTermination {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            started: None,
            terminated: false,
        }
    }
}

impl TerminationCondition for TimeoutTermination {
    fn name(&self) -> &str {
        "timeout"
    }

    fn evaluate(&mut self, _delta: &[ChatMessage]) -> Result<Option<StopMessage>> {
        if self.terminated {
            return Err(already_terminated(self.name()));
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        if started.elapsed() >= self.duration {
            self.terminated = true;
            return Ok(Some(StopMessage::new(
                self.name(),
                format!("timeout of {:?} reached", self.duration),
            )));
        }
        Ok(None)
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn reset(&mut self) {
        self.started = None;
        self.terminated = false;
    }
}

/// Cloneable handle that trips an [`ExternalTermination`] from another task.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a graceful stop at the next evaluation point.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Toggled out-of-band via a [`StopHandle`]; the flag is checked, not
/// computed, on evaluation.
pub struct ExternalTermination {
    handle: StopHandle,
    terminated: bool,
}

impl ExternalTermination {
    pub fn new() -> (Self, StopHandle) {
        let handle = StopHandle::new();
        (
            Self {
                handle: handle.clone(),
                terminated: false,
            },
            handle,
        )
    }
}

impl TerminationCondition for ExternalTermination {
    fn name(&self) -> &str {
        "external"
    }

    fn evaluate(&mut self, _delta: &[ChatMessage]) -> Result<Option<StopMessage>> {
        if self.terminated {
            return Err(already_terminated(self.name()));
        }
        if self.handle.is_set() {
            self.terminated = true;
            return Ok(Some(StopMessage::new(
                self.name(),
                "external termination requested",
            )));
        }
        Ok(None)
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn reset(&mut self) {
        self.handle.flag.store(false, Ordering::SeqCst);
        self.terminated = false;
    }
}

/// Triggers only once every child has independently triggered.
///
/// Every still-armed child receives the full delta on each call and keeps its
/// own triggered state.
pub struct AndCondition {
    children: Vec<Box<dyn TerminationCondition>>,
    fired: Vec<Option<StopMessage>>,
    terminated: bool,
}

impl AndCondition {
    pub fn new(children: Vec<Box<dyn TerminationCondition>>) -> Self {
        let fired = children.iter().map(|_| None).collect();
        Self {
            children,
            fired,
            terminated: false,
        }
    }
}

impl TerminationCondition for AndCondition {
    fn name(&self) -> &str {
        "and"
    }

    fn evaluate(&mut self, delta: &[ChatMessage]) -> Result<Option<StopMessage>> {
        if self.terminated {
            return Err(already_terminated(self.name()));
        }
        for (child, fired) in self.children.iter_mut().zip(self.fired.iter_mut()) {
            if fired.is_none() {
                *fired = child.evaluate(delta)?;
            }
        }
        if self.fired.iter().all(|f| f.is_some()) {
            self.terminated = true;
            let combined = self
                .fired
                .iter()
                .flatten()
                .map(|s| s.content.clone())
                .collect::<Vec<_>>()
                .join("; ");
            return Ok(Some(StopMessage::new(self.name(), combined)));
        }
        Ok(None)
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn reset(&mut self) {
        for child in &mut self.children {
            child.reset();
        }
        for fired in &mut self.fired {
            *fired = None;
        }
        self.terminated = false;
    }
}

/// Triggers as soon as any child triggers.
pub struct OrCondition {
    children: Vec<Box<dyn TerminationCondition>>,
    terminated: bool,
}

impl OrCondition {
    pub fn new(children: Vec<Box<dyn TerminationCondition>>) -> Self {
        Self {
            children,
            terminated: false,
        }
    }
}

impl TerminationCondition for OrCondition {
    fn name(&self) -> &str {
        "or"
    }

    fn evaluate(&mut self, delta: &[ChatMessage]) -> Result<Option<StopMessage>> {
        if self.terminated {
            return Err(already_terminated(self.name()));
        }
        let mut stop = None;
        for child in &mut self.children {
            if child.is_terminated() {
                continue;
            }
            if let Some(s) = child.evaluate(delta)? {
                stop.get_or_insert(s);
            }
        }
        if let Some(s) = stop {
            self.terminated = true;
            return Ok(Some(s));
        }
        Ok(None)
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn reset(&mut self) {
        for child in &mut self.children {
            child.reset();
        }
        self.terminated = false;
    }
}

/// Built-in condition constructors
pub mod conditions {
    use super::*;

    pub fn max_messages(max: usize) -> MaxMessageTermination {
        MaxMessageTermination::new(max)
    }

    pub fn text_mention(text: impl Into<String>) -> TextMentionTermination {
        TextMentionTermination::new(text)
    }

    pub fn timeout(duration: Duration) -> TimeoutTermination {
        TimeoutTermination::new(duration)
    }

    pub fn external() -> (ExternalTermination, StopHandle) {
        ExternalTermination::new()
    }

    /// Composite that stops only after both conditions have triggered.
    pub fn and_of(
        a: impl TerminationCondition + 'static,
        b: impl TerminationCondition + 'static,
    ) -> AndCondition {
        AndCondition::new(vec![Box::new(a), Box::new(b)])
    }

    /// Composite that stops as soon as either condition triggers.
    pub fn or_of(
        a: impl TerminationCondition + 'static,
        b: impl TerminationCondition + 'static,
    ) -> OrCondition {
        OrCondition::new(vec![Box::new(a), Box::new(b)])
    }
}
