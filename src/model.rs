//! Model client seam
//!
//! Wraps the async-openai crate behind a narrow trait so participants and the
//! model-driven selector stay decoupled from any particular provider.

use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolArgs,
        ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionObjectArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GroupChatError, Result};
use crate::tool::Tool;

/// Role in a model conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of the context sent to a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ModelMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Some(tool_calls),
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// What a model produced for one generation call
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Trait for model inference clients
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Generate a completion for the given context, advertising `tools`
    async fn generate(
        &self,
        messages: Vec<ModelMessage>,
        tools: Vec<Arc<dyn Tool>>,
    ) -> Result<Completion>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI model client using async-openai
pub struct OpenAIModel {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAIModel {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Create with a custom client (endpoint, key, and org come from its config)
    pub fn with_client(client: Client<OpenAIConfig>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn max_tokens(mut self, mt: u32) -> Self {
        self.max_tokens = Some(mt);
        self
    }

    fn convert_message(msg: &ModelMessage) -> Result<ChatCompletionRequestMessage> {
        let converted = match msg.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(msg.content.clone())
                .build()
                .map_err(|e| GroupChatError::ModelBehaviorError {
                    message: format!("system message build: {e}"),
                })?
                .into(),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(msg.content.clone())
                .build()
                .map_err(|e| GroupChatError::ModelBehaviorError {
                    message: format!("user message build: {e}"),
                })?
                .into(),
            Role::Assistant => {
                let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                builder.content(msg.content.clone());
                if let Some(tool_calls) = &msg.tool_calls {
                    let openai_tool_calls: Vec<_> = tool_calls
                        .iter()
                        .map(|tc| async_openai::types::ChatCompletionMessageToolCall {
                            id: tc.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: async_openai::types::FunctionCall {
                                name: tc.name.clone(),
                                arguments: tc.arguments.to_string(),
                            },
                        })
                        .collect();
                    builder.tool_calls(openai_tool_calls);
                }
                builder
                    .build()
                    .map_err(|e| GroupChatError::ModelBehaviorError {
                        message: format!("assistant message build: {e}"),
                    })?
                    .into()
            }
            Role::Tool => ChatCompletionRequestToolMessageArgs::default()
                .content(msg.content.clone())
                .tool_call_id(msg.tool_call_id.clone().unwrap_or_default())
                .build()
                .map_err(|e| GroupChatError::ModelBehaviorError {
                    message: format!("tool message build: {e}"),
                })?
                .into(),
        };
        Ok(converted)
    }

    fn convert_tools(tools: &[Arc<dyn Tool>]) -> Result<Vec<ChatCompletionTool>> {
        tools
            .iter()
            .map(|tool| {
                let func = FunctionObjectArgs::default()
                    .name(tool.name())
                    .description(tool.description())
                    .parameters(tool.parameters_schema())
                    .build()
                    .map_err(|e| GroupChatError::ModelBehaviorError {
                        message: format!("function object build: {e}"),
                    })?;
                ChatCompletionToolArgs::default()
                    .r#type(ChatCompletionToolType::Function)
                    .function(func)
                    .build()
                    .map_err(|e| GroupChatError::ModelBehaviorError {
                        message: format!("chat tool build: {e}"),
                    })
            })
            .collect()
    }
}

#[async_trait]
impl ModelClient for OpenAIModel {
    async fn generate(
        &self,
        messages: Vec<ModelMessage>,
        tools: Vec<Arc<dyn Tool>>,
    ) -> Result<Completion> {
        let openai_messages: Vec<ChatCompletionRequestMessage> = messages
            .iter()
            .map(Self::convert_message)
            .collect::<Result<_>>()?;

        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(&self.model).messages(openai_messages);

        if !tools.is_empty() {
            request.tools(Self::convert_tools(&tools)?);
        }
        if let Some(temp) = self.temperature {
            request.temperature(temp);
        }
        if let Some(max) = self.max_tokens {
            request.max_tokens(max);
        }

        let request = request
            .build()
            .map_err(|e| GroupChatError::ModelBehaviorError {
                message: format!("request build: {e}"),
            })?;
        let response = self.client.chat().create(request).await?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| GroupChatError::ModelBehaviorError {
                message: "no choices in response".to_string(),
            })?;

        let tool_calls = choice
            .message
            .tool_calls
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|tc| ToolCall {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                arguments: serde_json::from_str(&tc.function.arguments).unwrap_or(Value::Null),
            })
            .collect();

        Ok(Completion {
            content: choice.message.content.clone(),
            tool_calls,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Scripted model client for tests: pops queued completions in order and
/// falls back to a fixed default once drained.
pub struct ScriptedModel {
    model: String,
    completions: std::sync::Mutex<Vec<Completion>>,
}

impl ScriptedModel {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            completions: std::sync::Mutex::new(vec![]),
        }
    }

    pub fn with_completion(self, completion: Completion) -> Self {
        self.completions.lock().unwrap().push(completion);
        self
    }

    pub fn with_message(self, content: impl Into<String>) -> Self {
        self.with_completion(Completion {
            content: Some(content.into()),
            tool_calls: vec![],
        })
    }

    pub fn with_tool_call(self, tool_name: impl Into<String>, args: Value) -> Self {
        self.with_completion(Completion {
            content: None,
            tool_calls: vec![ToolCall {
                id: uuid::Uuid::new_v4().to_string(),
                name: tool_name.into(),
                arguments: args,
            }],
        })
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn generate(
        &self,
        _messages: Vec<ModelMessage>,
        _tools: Vec<Arc<dyn Tool>>,
    ) -> Result<Completion> {
        let mut completions = self.completions.lock().unwrap();
        if completions.is_empty() {
            return Ok(Completion {
                content: Some("Default response".to_string()),
                tool_calls: vec![],
            });
        }
        Ok(completions.remove(0))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::FunctionTool;

    #[test]
    fn test_openai_model_creation() {
        let model = OpenAIModel::new("gpt-4o").temperature(0.2);
        assert_eq!(model.model_name(), "gpt-4o");
    }

    #[test]
    fn test_message_conversion() {
        for msg in [
            ModelMessage::system("You are helpful"),
            ModelMessage::user("Hello"),
            ModelMessage::assistant("Hi there"),
            ModelMessage::tool("Result", "call_123"),
        ] {
            assert!(OpenAIModel::convert_message(&msg).is_ok());
        }
    }

    #[test]
    fn test_tool_conversion() {
        let tool: Arc<dyn Tool> = Arc::new(FunctionTool::simple("echo", "echoes input", |s| s));
        let converted = OpenAIModel::convert_tools(&[tool]).unwrap();
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].function.name, "echo");
    }

    #[tokio::test]
    async fn test_scripted_model_pops_in_order() {
        let model = ScriptedModel::new("scripted")
            .with_message("First")
            .with_tool_call("search", serde_json::json!({"q": "rust"}));

        let first = model.generate(vec![], vec![]).await.unwrap();
        assert_eq!(first.content, Some("First".to_string()));
        assert!(!first.has_tool_calls());

        let second = model.generate(vec![], vec![]).await.unwrap();
        assert!(second.has_tool_calls());
        assert_eq!(second.tool_calls[0].name, "search");

        let third = model.generate(vec![], vec![]).await.unwrap();
        assert_eq!(third.content, Some("Default response".to_string()));
    }
}
