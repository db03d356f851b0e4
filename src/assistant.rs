//! Model-backed participant
//!
//! An [`AssistantAgent`] keeps a private model context that is advanced only
//! by the incremental message batches it receives. During a turn it may
//! invoke tools, emitting a request/result event pair per invocation, before
//! producing its single terminal chat message.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{GroupChatError, Result};
use crate::memory::Memory;
use crate::messages::{AgentEvent, ChatMessage};
use crate::model::{ModelClient, ModelMessage};
use crate::participant::{ChatParticipant, ParticipantResponse};
use crate::tool::Tool;

/// A participant that defers to a model client, with optional tools and
/// retrieval-backed memory.
pub struct AssistantAgent {
    name: String,
    description: String,
    instructions: String,
    model: Arc<dyn ModelClient>,
    tools: Vec<Arc<dyn Tool>>,
    memory: Option<Arc<dyn Memory>>,
    max_tool_rounds: usize,
    context: Vec<ModelMessage>,
}

impl AssistantAgent {
    pub fn new(name: impl Into<String>, model: Arc<dyn ModelClient>) -> Self {
        Self {
            name: name.into(),
            description: "a helpful assistant".to_string(),
            instructions: "You are a helpful assistant.".to_string(),
            model,
            tools: Vec::new(),
            memory: None,
            max_tool_rounds: 10,
            context: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Cap on model/tool round-trips within a single turn.
    pub fn max_tool_rounds(mut self, max: usize) -> Self {
        self.max_tool_rounds = max.max(1);
        self
    }

    fn tool_by_name(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    fn check_cancel(cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(GroupChatError::Aborted);
        }
        Ok(())
    }
}

#[async_trait]
impl ChatParticipant for AssistantAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn on_messages(
        &mut self,
        new_messages: Vec<ChatMessage>,
        cancel: &CancellationToken,
    ) -> Result<ParticipantResponse> {
        Self::check_cancel(cancel)?;

        for message in &new_messages {
            self.context.push(ModelMessage::user(format!(
                "{}: {}",
                message.source(),
                message.rendered()
            )));
        }

        let mut working = vec![ModelMessage::system(self.instructions.clone())];
        working.extend(self.context.iter().cloned());
        if let Some(memory) = &self.memory {
            memory.update_context(&mut working).await?;
        }

        let mut events = Vec::new();
        for round in 0..self.max_tool_rounds {
            Self::check_cancel(cancel)?;
            let completion = self.model.generate(working.clone(), self.tools.clone()).await?;

            if !completion.has_tool_calls() {
                let content = completion.content.unwrap_or_default();
                self.context.push(ModelMessage::assistant(content.clone()));
                debug!(agent = %self.name, rounds = round + 1, "turn complete");
                return Ok(ParticipantResponse {
                    events,
                    message: ChatMessage::text(self.name.clone(), content),
                });
            }

            let assistant = ModelMessage::assistant_with_tool_calls(
                completion.content.clone().unwrap_or_default(),
                completion.tool_calls.clone(),
            );
            working.push(assistant.clone());
            self.context.push(assistant);

            for call in completion.tool_calls {
                Self::check_cancel(cancel)?;
                events.push(AgentEvent::tool_call_request(
                    self.name.clone(),
                    call.name.clone(),
                    call.arguments.clone(),
                ));

                // Tool failures are degraded into the context so the model
                // can recover; they do not abort the turn.
                let (output, error) = match self.tool_by_name(&call.name) {
                    Some(tool) => match tool.invoke(call.arguments.clone()).await {
                        Ok(output) => (output, None),
                        Err(e) => {
                            warn!(agent = %self.name, tool = %call.name, error = %e, "tool failed");
                            (serde_json::Value::Null, Some(e.to_string()))
                        }
                    },
                    None => (
                        serde_json::Value::Null,
                        Some(format!("unknown tool: {}", call.name)),
                    ),
                };

                let rendered = match &error {
                    Some(e) => format!("Error: {e}"),
                    None => output.to_string(),
                };
                events.push(AgentEvent::tool_call_result(
                    self.name.clone(),
                    call.id.clone(),
                    output,
                    error,
                ));

                let tool_msg = ModelMessage::tool(rendered, call.id);
                working.push(tool_msg.clone());
                self.context.push(tool_msg);
            }
        }

        Err(GroupChatError::ParticipantFailed {
            name: self.name.clone(),
            message: format!(
                "exceeded maximum tool rounds ({}) without a final response",
                self.max_tool_rounds
            ),
        })
    }

    async fn reset(&mut self) -> Result<()> {
        self.context.clear();
        Ok(())
    }
}
