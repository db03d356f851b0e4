//! Integration tests for the group chat run loop

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use roundtable::{
    conditions, AssistantAgent, ChatMessage, ChatParticipant, GroupChat, GroupChatError,
    GroupMessage, ModelClient, ModelSelector, ParticipantResponse, Result, ScriptedModel,
    SelectRequest, StreamEvent, TASK_SOURCE,
};
use tower::util::BoxCloneService;
use tower::{service_fn, BoxError};

/// Deterministic participant: replies with its name and an incrementing turn
/// counter, optionally after a per-turn delay.
struct ScriptedAgent {
    name: String,
    turn: usize,
    delay: Option<Duration>,
}

impl ScriptedAgent {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            turn: 0,
            delay: None,
        }
    }

    fn with_delay(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            turn: 0,
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl ChatParticipant for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "replies with a turn counter"
    }

    async fn on_messages(
        &mut self,
        _new_messages: Vec<ChatMessage>,
        _cancel: &CancellationToken,
    ) -> Result<ParticipantResponse> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.turn += 1;
        Ok(ParticipantResponse::message(ChatMessage::text(
            self.name.clone(),
            format!("{} turn {}", self.name, self.turn),
        )))
    }

    async fn reset(&mut self) -> Result<()> {
        self.turn = 0;
        Ok(())
    }
}

fn chat_sources(messages: &[GroupMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| m.as_chat())
        .map(|m| m.source().to_string())
        .collect()
}

#[tokio::test]
async fn max_message_termination_stops_exactly_at_the_threshold() {
    let chat = GroupChat::builder()
        .participant(ScriptedAgent::new("writer"))
        .participant(ScriptedAgent::new("critic"))
        .termination(conditions::max_messages(3))
        .build()
        .unwrap();

    let result = chat.run(Some("start".to_string())).await.unwrap();

    // Task plus two participant turns: the run stops on the third message.
    assert_eq!(
        chat_sources(&result.messages),
        vec!["task", "writer", "critic"]
    );
    let stop = result.stop_reason.unwrap();
    assert_eq!(stop.source, "max_messages");
    assert!(stop.content.contains("3"));
}

#[tokio::test]
async fn text_mention_stops_on_first_matching_delta() {
    struct Approver {
        turns_before_approval: usize,
    }

    #[async_trait]
    impl ChatParticipant for Approver {
        fn name(&self) -> &str {
            "approver"
        }
        fn description(&self) -> &str {
            "approves after a few turns"
        }
        async fn on_messages(
            &mut self,
            _new_messages: Vec<ChatMessage>,
            _cancel: &CancellationToken,
        ) -> Result<ParticipantResponse> {
            let content = if self.turns_before_approval == 0 {
                "looks good, APPROVE".to_string()
            } else {
                self.turns_before_approval -= 1;
                "needs more work".to_string()
            };
            Ok(ParticipantResponse::message(ChatMessage::text(
                "approver", content,
            )))
        }
        async fn reset(&mut self) -> Result<()> {
            Ok(())
        }
    }

    let chat = GroupChat::builder()
        .participant(Approver {
            turns_before_approval: 2,
        })
        .termination(conditions::text_mention("APPROVE"))
        .build()
        .unwrap();

    let result = chat.run(Some("review the draft".to_string())).await.unwrap();

    // Two rejections, then the approval triggers, and not before.
    assert_eq!(result.messages.len(), 4);
    let stop = result.stop_reason.unwrap();
    assert_eq!(stop.source, "text_mention");
    assert!(stop.content.contains("APPROVE"));
}

#[tokio::test]
async fn round_robin_speakers_are_periodic_across_runs() {
    let chat = GroupChat::builder()
        .participant(ScriptedAgent::new("a"))
        .participant(ScriptedAgent::new("b"))
        .participant(ScriptedAgent::new("c"))
        .termination(conditions::max_messages(4))
        .build()
        .unwrap();

    let first = chat.run(Some("go".to_string())).await.unwrap();
    assert_eq!(chat_sources(&first.messages), vec!["task", "a", "b", "c"]);

    // Resume without a new task: the condition re-arms, and the rotation
    // continues from the participant after the last speaker.
    let second = chat.run(None).await.unwrap();
    assert_eq!(chat_sources(&second.messages), vec!["a", "b", "c", "a"]);
}

#[tokio::test]
async fn resumed_segment_contains_only_its_own_messages() {
    let chat = GroupChat::builder()
        .participant(ScriptedAgent::new("a"))
        .participant(ScriptedAgent::new("b"))
        .termination(conditions::max_messages(2))
        .build()
        .unwrap();

    let first = chat.run(Some("go".to_string())).await.unwrap();
    assert_eq!(first.messages.len(), 2);

    let second = chat.run(None).await.unwrap();
    assert_eq!(second.messages.len(), 2);
    assert_eq!(chat_sources(&second.messages), vec!["b", "a"]);

    // The full transcript holds both segments in order.
    let transcript = chat.transcript().await;
    assert_eq!(transcript.len(), 4);
    assert_eq!(chat_sources(&transcript), vec!["task", "a", "b", "a"]);
}

#[tokio::test]
async fn cancellation_mid_turn_aborts_without_partial_commit() {
    let chat = GroupChat::builder()
        .participant(ScriptedAgent::with_delay("slow", Duration::from_secs(30)))
        .termination(conditions::max_messages(10))
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let handle = {
        let chat = chat.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { chat.run_with(Some("go".to_string()), cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_abort());
    assert!(matches!(err, GroupChatError::Aborted));

    // The task message committed before the turn; the interrupted turn left
    // nothing behind.
    let transcript = chat.transcript().await;
    assert_eq!(chat_sources(&transcript), vec![TASK_SOURCE]);
    assert_eq!(chat.status(), roundtable::RunStatus::Aborted);
}

#[tokio::test]
async fn external_termination_stops_a_background_run_gracefully() {
    let (external, stop_handle) = conditions::external();
    let chat = GroupChat::builder()
        .participant(ScriptedAgent::with_delay("a", Duration::from_millis(5)))
        .participant(ScriptedAgent::with_delay("b", Duration::from_millis(5)))
        .termination(conditions::or_of(external, conditions::max_messages(10_000)))
        .build()
        .unwrap();

    let handle = {
        let chat = chat.clone();
        tokio::spawn(async move { chat.run(Some("discuss".to_string())).await })
    };

    tokio::time::sleep(Duration::from_millis(40)).await;
    stop_handle.set();

    let result = handle.await.unwrap().unwrap();
    let stop = result.stop_reason.unwrap();
    assert_eq!(stop.content, "external termination requested");
    assert_eq!(chat.status(), roundtable::RunStatus::Stopped);
}

#[tokio::test]
async fn run_stream_yields_messages_then_a_single_terminal_event() {
    let chat = GroupChat::builder()
        .participant(ScriptedAgent::new("a"))
        .participant(ScriptedAgent::new("b"))
        .termination(conditions::max_messages(3))
        .build()
        .unwrap();

    let events: Vec<StreamEvent> = chat.run_stream(Some("go".to_string())).collect().await;

    let (messages, terminals): (Vec<_>, Vec<_>) = events
        .into_iter()
        .partition(|e| matches!(e, StreamEvent::Message(_)));
    assert_eq!(messages.len(), 3);
    assert_eq!(terminals.len(), 1);
    match &terminals[0] {
        StreamEvent::Completed(result) => {
            assert_eq!(result.messages.len(), 3);
            assert_eq!(result.stop_reason.as_ref().unwrap().source, "max_messages");
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn cancelled_stream_ends_with_the_abort_event() {
    let chat = GroupChat::builder()
        .participant(ScriptedAgent::with_delay("slow", Duration::from_secs(30)))
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let mut stream = chat.run_stream_with(Some("go".to_string()), cancel.clone());

    // First event is the committed task message.
    match stream.next().await.unwrap() {
        StreamEvent::Message(message) => assert_eq!(message.source(), TASK_SOURCE),
        other => panic!("expected task message, got {other:?}"),
    }

    cancel.cancel();
    match stream.next().await.unwrap() {
        StreamEvent::Aborted => {}
        other => panic!("expected abort, got {other:?}"),
    }
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn participant_failure_is_fatal_but_leaves_the_transcript_intact() {
    struct FailingAgent;

    #[async_trait]
    impl ChatParticipant for FailingAgent {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn on_messages(
            &mut self,
            _new_messages: Vec<ChatMessage>,
            _cancel: &CancellationToken,
        ) -> Result<ParticipantResponse> {
            Err(GroupChatError::Other("upstream model unavailable".to_string()))
        }
        async fn reset(&mut self) -> Result<()> {
            Ok(())
        }
    }

    let chat = GroupChat::builder()
        .participant(FailingAgent)
        .termination(conditions::max_messages(5))
        .build()
        .unwrap();

    let err = chat.run(Some("go".to_string())).await.unwrap_err();
    assert!(matches!(err, GroupChatError::ParticipantFailed { .. }));
    assert!(!err.is_abort());

    // Committed state survives the failure; the chat can be run again.
    let transcript = chat.transcript().await;
    assert_eq!(chat_sources(&transcript), vec![TASK_SOURCE]);
    assert_eq!(chat.status(), roundtable::RunStatus::Idle);
}

#[tokio::test]
async fn model_selected_assistants_alternate_until_approval() {
    let writer_model: Arc<dyn ModelClient> = Arc::new(
        ScriptedModel::new("scripted")
            .with_message("draft one")
            .with_message("draft two"),
    );
    let critic_model: Arc<dyn ModelClient> = Arc::new(
        ScriptedModel::new("scripted")
            .with_message("needs work")
            .with_message("APPROVE"),
    );

    let writer = AssistantAgent::new("writer", writer_model).description("drafts short texts");
    let critic = AssistantAgent::new("critic", critic_model).description("reviews drafts");

    // The selection model always names the writer; repeat avoidance forces
    // the critic on every other turn.
    let selection_svc = BoxCloneService::new(service_fn(|_req: SelectRequest| async move {
        Ok::<_, BoxError>("writer".to_string())
    }));

    let chat = GroupChat::builder()
        .participant(writer)
        .participant(critic)
        .selector(ModelSelector::new(selection_svc))
        .termination(conditions::text_mention("APPROVE"))
        .build()
        .unwrap();

    let result = chat.run(Some("Write a haiku.".to_string())).await.unwrap();

    assert_eq!(
        chat_sources(&result.messages),
        vec!["task", "writer", "critic", "writer", "critic"]
    );
    let stop = result.stop_reason.unwrap();
    assert!(stop.content.contains("APPROVE"));
    assert!(stop.content.contains("critic"));
}

#[tokio::test]
async fn reset_restores_construction_time_state() {
    let chat = GroupChat::builder()
        .participant(ScriptedAgent::new("a"))
        .participant(ScriptedAgent::new("b"))
        .termination(conditions::max_messages(3))
        .build()
        .unwrap();

    chat.run(Some("go".to_string())).await.unwrap();
    chat.reset().await.unwrap();
    assert!(chat.transcript().await.is_empty());

    // A fresh run starts from the first participant with fresh agent state.
    let result = chat.run(Some("again".to_string())).await.unwrap();
    assert_eq!(chat_sources(&result.messages), vec!["task", "a", "b"]);
    let turn_one = result.messages[1].as_chat().unwrap().rendered();
    assert_eq!(turn_one, "a turn 1");
}
