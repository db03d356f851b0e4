//! Group chat orchestration
//!
//! The run loop drives one participant at a time: select a speaker, deliver
//! the chat messages that participant has not yet seen, commit what it
//! produced to the shared transcript, evaluate termination against exactly
//! that step's delta, repeat. Runs are resumable: transcript, participant
//! state, and selector position persist until an explicit reset.

use std::collections::HashMap;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{GroupChatError, Result};
use crate::messages::{ChatMessage, GroupMessage, StopMessage};
use crate::participant::{ChatParticipant, ParticipantItem, ParticipantResponse, RosterEntry};
use crate::selector::{RoundRobinSelector, SpeakerSelector};
use crate::termination::TerminationCondition;
use crate::transcript::Transcript;

/// Source name used for messages injected by the run entry point.
pub const TASK_SOURCE: &str = "task";

/// Terminal output of one run segment.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Messages produced during this run segment only, in speaking order
    pub messages: Vec<GroupMessage>,
    /// The literal message that caused termination; `None` only for results
    /// assembled outside a normal stop
    pub stop_reason: Option<StopMessage>,
}

/// Lifecycle of a group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// No run has started, or the last run failed and may be retried
    Idle,
    /// A run is in progress
    Running,
    /// A participant ended the conversation with a stop message
    Completed,
    /// A termination condition triggered
    Stopped,
    /// Cancellation tripped; in-flight output was discarded
    Aborted,
}

/// Incremental output of [`GroupChat::run_stream`].
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A message or event, forwarded as it is produced
    Message(GroupMessage),
    /// Terminal: the run finished gracefully
    Completed(TaskResult),
    /// Terminal: the run was cancelled; uncommitted output was discarded
    Aborted,
    /// Terminal: a participant or collaborator failure ended the run
    Failed(String),
}

struct ChatCore {
    participants: Vec<Box<dyn ChatParticipant>>,
    index: HashMap<String, usize>,
    selector: Box<dyn SpeakerSelector>,
    termination: Option<Box<dyn TerminationCondition>>,
    transcript: Transcript,
    /// Per participant: transcript index of the first entry not yet delivered
    watermarks: Vec<usize>,
    last_speaker: Option<usize>,
    status: RunStatus,
}

impl ChatCore {
    fn roster(&self) -> Vec<RosterEntry> {
        self.participants
            .iter()
            .map(|p| RosterEntry {
                name: p.name().to_string(),
                description: p.description().to_string(),
            })
            .collect()
    }

    /// Registry-order default when the selector defers.
    fn default_next_speaker(&self) -> usize {
        match self.last_speaker {
            Some(last) => (last + 1) % self.participants.len(),
            None => 0,
        }
    }
}

/// Builder for [`GroupChat`].
#[derive(Default)]
pub struct GroupChatBuilder {
    participants: Vec<Box<dyn ChatParticipant>>,
    selector: Option<Box<dyn SpeakerSelector>>,
    termination: Option<Box<dyn TerminationCondition>>,
}

impl GroupChatBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn participant(mut self, participant: impl ChatParticipant + 'static) -> Self {
        self.participants.push(Box::new(participant));
        self
    }

    /// Turn-selection strategy; defaults to [`RoundRobinSelector`].
    pub fn selector(mut self, selector: impl SpeakerSelector + 'static) -> Self {
        self.selector = Some(Box::new(selector));
        self
    }

    /// Termination condition. Without one, only a participant's stop message
    /// ends a run.
    pub fn termination(mut self, condition: impl TerminationCondition + 'static) -> Self {
        self.termination = Some(Box::new(condition));
        self
    }

    pub fn build(self) -> Result<GroupChat> {
        if self.participants.is_empty() {
            return Err(GroupChatError::Other(
                "group chat requires at least one participant".to_string(),
            ));
        }
        let mut index = HashMap::new();
        for (i, p) in self.participants.iter().enumerate() {
            if index.insert(p.name().to_string(), i).is_some() {
                return Err(GroupChatError::DuplicateParticipant {
                    name: p.name().to_string(),
                });
            }
        }
        let watermarks = vec![0; self.participants.len()];
        Ok(GroupChat {
            core: std::sync::Arc::new(tokio::sync::Mutex::new(ChatCore {
                participants: self.participants,
                index,
                selector: self
                    .selector
                    .unwrap_or_else(|| Box::new(RoundRobinSelector::new())),
                termination: self.termination,
                transcript: Transcript::new(),
                watermarks,
                last_speaker: None,
                status: RunStatus::Idle,
            })),
        })
    }
}

/// A group conversation: ordered participant registry, turn selector,
/// termination evaluator, and the shared transcript.
///
/// Cloning shares the same underlying conversation. Exactly one run may be in
/// progress at a time; a second concurrent call fails with
/// [`RunInProgress`](GroupChatError::RunInProgress).
#[derive(Clone)]
pub struct GroupChat {
    core: std::sync::Arc<tokio::sync::Mutex<ChatCore>>,
}

impl std::fmt::Debug for GroupChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupChat").finish_non_exhaustive()
    }
}

impl GroupChat {
    pub fn builder() -> GroupChatBuilder {
        GroupChatBuilder::new()
    }

    /// Current lifecycle state. Reports [`RunStatus::Running`] while a run
    /// holds the conversation.
    pub fn status(&self) -> RunStatus {
        match self.core.try_lock() {
            Ok(core) => core.status,
            Err(_) => RunStatus::Running,
        }
    }

    /// Run until a stop, with a fresh cancellation token.
    ///
    /// Passing `None` resumes from the existing transcript and selector
    /// position; passing a task appends it as a text message from the
    /// synthetic [`TASK_SOURCE`] before the first turn.
    pub async fn run(&self, task: impl Into<Option<String>>) -> Result<TaskResult> {
        self.run_with(task, CancellationToken::new()).await
    }

    /// Run until a stop, checking `cancel` at every suspension point.
    #[instrument(skip_all)]
    pub async fn run_with(
        &self,
        task: impl Into<Option<String>>,
        cancel: CancellationToken,
    ) -> Result<TaskResult> {
        let mut core = self
            .core
            .clone()
            .try_lock_owned()
            .map_err(|_| GroupChatError::RunInProgress)?;
        Self::run_inner(&mut core, task.into(), cancel, None).await
    }

    /// Streaming variant: yields every committed message as it is produced,
    /// ending with exactly one terminal event.
    pub fn run_stream(&self, task: impl Into<Option<String>>) -> BoxStream<'static, StreamEvent> {
        self.run_stream_with(task, CancellationToken::new())
    }

    /// Streaming variant with an external cancellation token.
    pub fn run_stream_with(
        &self,
        task: impl Into<Option<String>>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, StreamEvent> {
        let core_arc = self.core.clone();
        let task = task.into();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut core = match core_arc.try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    let _ = tx
                        .send(StreamEvent::Failed(
                            GroupChatError::RunInProgress.to_string(),
                        ))
                        .await;
                    return;
                }
            };
            let outcome = Self::run_inner(&mut core, task, cancel, Some(&tx)).await;
            let terminal = match outcome {
                Ok(result) => StreamEvent::Completed(result),
                Err(e) if e.is_abort() => StreamEvent::Aborted,
                Err(e) => StreamEvent::Failed(e.to_string()),
            };
            let _ = tx.send(terminal).await;
        });
        Box::pin(ReceiverStream::new(rx))
    }

    /// Reset transcript, participants, selector, and termination back to
    /// construction-time defaults.
    pub async fn reset(&self) -> Result<()> {
        let mut core = self
            .core
            .clone()
            .try_lock_owned()
            .map_err(|_| GroupChatError::RunInProgress)?;
        for participant in &mut core.participants {
            participant.reset().await?;
        }
        core.selector.reset();
        if let Some(termination) = core.termination.as_mut() {
            termination.reset();
        }
        core.transcript.clear();
        core.watermarks.fill(0);
        core.last_speaker = None;
        core.status = RunStatus::Idle;
        Ok(())
    }

    /// Everything committed so far, across all runs.
    pub async fn transcript(&self) -> Vec<GroupMessage> {
        self.core.lock().await.transcript.messages().to_vec()
    }

    async fn run_inner(
        core: &mut ChatCore,
        task: Option<String>,
        cancel: CancellationToken,
        observer: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Result<TaskResult> {
        core.status = RunStatus::Running;
        // A termination condition re-arms automatically at the start of a run.
        if let Some(termination) = core.termination.as_mut() {
            termination.reset();
        }

        let outcome = Self::drive(core, task, &cancel, observer).await;
        match &outcome {
            Ok(_) => {}
            Err(e) if e.is_abort() => core.status = RunStatus::Aborted,
            // Failures leave the transcript as of the last committed turn;
            // the chat may be run again.
            Err(_) => core.status = RunStatus::Idle,
        }
        outcome
    }

    async fn drive(
        core: &mut ChatCore,
        task: Option<String>,
        cancel: &CancellationToken,
        observer: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Result<TaskResult> {
        let run_start = core.transcript.len();

        if cancel.is_cancelled() {
            return Err(GroupChatError::Aborted);
        }

        if let Some(text) = task {
            let message = ChatMessage::text(TASK_SOURCE, text);
            Self::commit(core, message.clone().into(), observer).await;
            if let Some(stop) = Self::evaluate(core, &[message])? {
                return Self::finish(core, RunStatus::Stopped, run_start, stop);
            }
        }

        info!(participants = core.participants.len(), "run loop started");
        loop {
            if cancel.is_cancelled() {
                return Err(GroupChatError::Aborted);
            }

            // 1. Pick the next speaker.
            let roster = core.roster();
            let picked = {
                let ChatCore {
                    selector,
                    transcript,
                    ..
                } = &mut *core;
                selector
                    .select_speaker(transcript.messages(), &roster)
                    .await?
            };
            let speaker = match picked {
                Some(name) => *core
                    .index
                    .get(&name)
                    .ok_or(GroupChatError::UnknownParticipant { name })?,
                None => core.default_next_speaker(),
            };
            let speaker_name = core.participants[speaker].name().to_string();
            debug!(speaker = %speaker_name, "turn started");

            // 2. Deliver the unseen delta; delivery counts as seen.
            let delta = core.transcript.chat_since(core.watermarks[speaker]);
            core.watermarks[speaker] = core.transcript.len();

            let response =
                Self::invoke(&mut core.participants[speaker], delta, cancel, observer).await?;

            // 3. Commit events and the terminal message, in production order.
            for event in &response.events {
                core.transcript.append(event.clone());
            }
            core.transcript.append(response.message.clone());
            if let Some(tx) = observer {
                let _ = tx
                    .send(StreamEvent::Message(response.message.clone().into()))
                    .await;
            }
            core.last_speaker = Some(speaker);
            // The speaker has already seen its own turn.
            core.watermarks[speaker] = core.transcript.len();

            // A stop message from a participant completes the conversation.
            if let ChatMessage::Stop(stop) = &response.message {
                info!(speaker = %speaker_name, "participant requested stop");
                return Self::finish(core, RunStatus::Completed, run_start, stop.clone());
            }

            // 4. Evaluate termination against exactly this step's delta.
            if let Some(stop) = Self::evaluate(core, std::slice::from_ref(&response.message))? {
                info!(condition = %stop.source, "termination triggered");
                return Self::finish(core, RunStatus::Stopped, run_start, stop);
            }
        }
    }

    /// Drive one participant turn, racing the cancellation token. Events are
    /// forwarded to the observer as they happen; nothing is committed until
    /// the terminal response arrives.
    async fn invoke(
        participant: &mut Box<dyn ChatParticipant>,
        delta: Vec<ChatMessage>,
        cancel: &CancellationToken,
        observer: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Result<ParticipantResponse> {
        let name = participant.name().to_string();
        let mut stream = participant.on_messages_stream(delta, cancel.child_token());
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(participant = %name, "turn cancelled mid-flight");
                    return Err(GroupChatError::Aborted);
                }
                item = stream.next() => item,
            };
            match item {
                Some(Ok(ParticipantItem::Event(event))) => {
                    if let Some(tx) = observer {
                        let _ = tx.send(StreamEvent::Message(event.into())).await;
                    }
                }
                Some(Ok(ParticipantItem::Response(response))) => return Ok(response),
                Some(Err(e)) if e.is_abort() => return Err(GroupChatError::Aborted),
                Some(Err(e)) => {
                    warn!(participant = %name, error = %e, "participant failed");
                    return Err(GroupChatError::ParticipantFailed {
                        name,
                        message: e.to_string(),
                    });
                }
                None => {
                    return Err(GroupChatError::ParticipantFailed {
                        name,
                        message: "stream ended without a terminal response".to_string(),
                    })
                }
            }
        }
    }

    async fn commit(
        core: &mut ChatCore,
        message: GroupMessage,
        observer: Option<&mpsc::Sender<StreamEvent>>,
    ) {
        core.transcript.append(message.clone());
        if let Some(tx) = observer {
            let _ = tx.send(StreamEvent::Message(message)).await;
        }
    }

    fn evaluate(core: &mut ChatCore, delta: &[ChatMessage]) -> Result<Option<StopMessage>> {
        match core.termination.as_mut() {
            Some(condition) => condition.evaluate(delta),
            None => Ok(None),
        }
    }

    fn finish(
        core: &mut ChatCore,
        status: RunStatus,
        run_start: usize,
        stop: StopMessage,
    ) -> Result<TaskResult> {
        core.status = status;
        Ok(TaskResult {
            messages: core.transcript.since(run_start).to_vec(),
            stop_reason: Some(stop),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::termination::conditions;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct EchoAgent {
        name: String,
    }

    #[async_trait]
    impl ChatParticipant for EchoAgent {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "echoes the last message"
        }

        async fn on_messages(
            &mut self,
            new_messages: Vec<ChatMessage>,
            _cancel: &CancellationToken,
        ) -> Result<ParticipantResponse> {
            let last = new_messages
                .last()
                .map(|m| m.rendered())
                .unwrap_or_default();
            Ok(ParticipantResponse::message(ChatMessage::text(
                self.name.clone(),
                format!("{} echoed: {last}", self.name),
            )))
        }

        async fn reset(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn echo(name: &str) -> EchoAgent {
        EchoAgent {
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected_at_build() {
        let err = GroupChat::builder()
            .participant(echo("a"))
            .participant(echo("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, GroupChatError::DuplicateParticipant { .. }));
    }

    #[tokio::test]
    async fn task_message_uses_the_synthetic_source() {
        let chat = GroupChat::builder()
            .participant(echo("a"))
            .termination(conditions::max_messages(2))
            .build()
            .unwrap();

        let result = chat.run(Some("hello".to_string())).await.unwrap();
        assert_eq!(result.messages[0].source(), TASK_SOURCE);
        assert_eq!(result.messages.len(), 2);
    }

    struct SlowAgent;

    #[async_trait]
    impl ChatParticipant for SlowAgent {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "takes a long time to answer"
        }
        async fn on_messages(
            &mut self,
            _new_messages: Vec<ChatMessage>,
            _cancel: &CancellationToken,
        ) -> Result<ParticipantResponse> {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok(ParticipantResponse::message(ChatMessage::text(
                "slow", "finally",
            )))
        }
        async fn reset(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn second_concurrent_run_fails_outright() {
        let chat = GroupChat::builder()
            .participant(SlowAgent)
            .termination(conditions::max_messages(200))
            .build()
            .unwrap();

        let cancel = CancellationToken::new();
        let background = {
            let chat = chat.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { chat.run_with(Some("spin".to_string()), cancel).await })
        };
        tokio::task::yield_now().await;

        let err = chat.run(None).await.unwrap_err();
        assert!(matches!(err, GroupChatError::RunInProgress));

        cancel.cancel();
        let outcome = background.await.unwrap();
        assert!(outcome.unwrap_err().is_abort());
    }

    #[tokio::test]
    async fn status_reflects_the_lifecycle() {
        let chat = GroupChat::builder()
            .participant(echo("a"))
            .termination(conditions::max_messages(2))
            .build()
            .unwrap();
        assert_eq!(chat.status(), RunStatus::Idle);

        chat.run(Some("go".to_string())).await.unwrap();
        assert_eq!(chat.status(), RunStatus::Stopped);

        chat.reset().await.unwrap();
        assert_eq!(chat.status(), RunStatus::Idle);
    }

    #[tokio::test]
    async fn stop_message_completes_the_conversation() {
        struct Approver;

        #[async_trait]
        impl ChatParticipant for Approver {
            fn name(&self) -> &str {
                "approver"
            }
            fn description(&self) -> &str {
                "approves everything"
            }
            async fn on_messages(
                &mut self,
                _new_messages: Vec<ChatMessage>,
                _cancel: &CancellationToken,
            ) -> Result<ParticipantResponse> {
                Ok(ParticipantResponse::message(ChatMessage::stop(
                    "approver",
                    "all done",
                )))
            }
            async fn reset(&mut self) -> Result<()> {
                Ok(())
            }
        }

        let chat = GroupChat::builder()
            .participant(Approver)
            .termination(conditions::max_messages(100))
            .build()
            .unwrap();

        let result = chat.run(Some("review this".to_string())).await.unwrap();
        assert_eq!(chat.status(), RunStatus::Completed);
        assert_eq!(result.stop_reason.unwrap().content, "all done");
    }
}
