//! services/api/src/adapters/gateway.rs
//!
//! This module contains the adapter for the generative-AI backend.
//! It implements the `GenerativeAiService` port from the `core` crate on top
//! of an OpenAI-compatible chat-completions API: stateful chat contexts are
//! kept client-side, chat turns stream their reply fragments, and analyses
//! demand strict schema-conforming JSON.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs,
        ImageUrlArgs, ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use async_trait::async_trait;
use futures::StreamExt;
use german_coach_core::ports::{
    AnalysisSchema, ChatSession, ChunkStream, GenerativeAiService, PortError, PortResult,
    PromptPart,
};
use std::sync::Arc;
use tokio::sync::Mutex;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `GenerativeAiService` using an OpenAI-compatible API.
///
/// Constructed without a credential, the adapter stays in an unconfigured
/// state in which every operation fails with the missing-credential error.
#[derive(Clone)]
pub struct OpenAiGatewayAdapter {
    client: Option<Client<OpenAIConfig>>,
    chat_model: String,
    analysis_model: String,
}

impl OpenAiGatewayAdapter {
    /// Creates a new `OpenAiGatewayAdapter`.
    pub fn new(api_key: Option<&str>, chat_model: String, analysis_model: String) -> Self {
        let client =
            api_key.map(|key| Client::with_config(OpenAIConfig::new().with_api_key(key)));
        Self {
            client,
            chat_model,
            analysis_model,
        }
    }

    fn client(&self) -> PortResult<&Client<OpenAIConfig>> {
        self.client
            .as_ref()
            .ok_or_else(|| PortError::MissingCredential("OPENAI_API_KEY".to_string()))
    }
}

/// Reassembles an inline image part into a self-contained `data:` URL.
fn inline_image_url(mime_type: &str, data: &str) -> String {
    format!("data:{mime_type};base64,{data}")
}

//=========================================================================================
// The Chat Session
//=========================================================================================

/// One stateful chat context. The backend API is stateless, so the full
/// message history is kept here and replayed on every turn.
struct OpenAiChatSession {
    client: Client<OpenAIConfig>,
    model: String,
    system_instruction: String,
    history: Arc<Mutex<Vec<ChatCompletionRequestMessage>>>,
}

#[async_trait]
impl ChatSession for OpenAiChatSession {
    /// Sends one user turn and yields the reply as a stream of text deltas.
    /// The accumulated reply is appended to the history when the stream ends,
    /// so the next turn sees the full exchange.
    async fn stream_turn(&self, message: &str) -> PortResult<ChunkStream> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.system_instruction.as_str())
                .build()
                .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?
                .into(),
        ];
        {
            let mut history = self.history.lock().await;
            history.push(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(message)
                    .build()
                    .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?
                    .into(),
            );
            messages.extend(history.iter().cloned());
        }

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let mut upstream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let history = Arc::clone(&self.history);
        Ok(Box::pin(async_stream::stream! {
            let mut full_reply = String::new();
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(response) => {
                        if let Some(choice) = response.choices.first() {
                            if let Some(content) = &choice.delta.content {
                                if !content.is_empty() {
                                    full_reply.push_str(content);
                                    yield Ok(content.clone());
                                }
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(PortError::Unexpected(e.to_string()));
                        break;
                    }
                }
            }
            if !full_reply.is_empty() {
                if let Ok(reply) = ChatCompletionRequestAssistantMessageArgs::default()
                    .content(full_reply)
                    .build()
                {
                    history.lock().await.push(reply.into());
                }
            }
        }))
    }
}

//=========================================================================================
// `GenerativeAiService` Trait Implementation
//=========================================================================================

#[async_trait]
impl GenerativeAiService for OpenAiGatewayAdapter {
    /// Opens a fresh chat context scoped to one conversation session.
    async fn start_chat(&self, system_instruction: &str) -> PortResult<Arc<dyn ChatSession>> {
        let client = self.client()?.clone();
        Ok(Arc::new(OpenAiChatSession {
            client,
            model: self.chat_model.clone(),
            system_instruction: system_instruction.to_string(),
            history: Arc::new(Mutex::new(Vec::new())),
        }))
    }

    /// Single request/response call that demands schema-conforming JSON.
    /// A parse failure or absent content is a gateway-level failure; a
    /// partial object is never returned.
    async fn run_structured_analysis(
        &self,
        parts: Vec<PromptPart>,
        schema: AnalysisSchema,
    ) -> PortResult<serde_json::Value> {
        let client = self.client()?;

        let mut content_parts: Vec<ChatCompletionRequestUserMessageContentPart> = Vec::new();
        for part in parts {
            match part {
                PromptPart::Text(text) => content_parts.push(
                    ChatCompletionRequestMessageContentPartTextArgs::default()
                        .text(text)
                        .build()
                        .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?
                        .into(),
                ),
                PromptPart::InlineImage { mime_type, data } => content_parts.push(
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(
                            ImageUrlArgs::default()
                                .url(inline_image_url(&mime_type, &data))
                                .build()
                                .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?,
                        )
                        .build()
                        .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?
                        .into(),
                ),
            }
        }

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.analysis_model)
            .messages(vec![ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
                .build()
                .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?
                .into()])
            .response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: schema.name.to_string(),
                    schema: Some(schema.schema),
                    strict: Some(true),
                },
            })
            .build()
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error, which respects the orphan rule.
        let response = client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::MalformedResponse(
                    "analysis response contained no text content".to_string(),
                )
            })?;

        serde_json::from_str(content.trim())
            .map_err(|e| PortError::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn an_unconfigured_gateway_blocks_every_operation() {
        let gateway = OpenAiGatewayAdapter::new(None, "gpt-4o".into(), "gpt-4o".into());

        assert!(matches!(
            gateway.start_chat("instruction").await,
            Err(PortError::MissingCredential(_))
        ));
        assert!(matches!(
            gateway
                .run_structured_analysis(
                    vec![PromptPart::Text("prompt".into())],
                    AnalysisSchema {
                        name: "test",
                        schema: json!({"type": "object"})
                    },
                )
                .await,
            Err(PortError::MissingCredential(_))
        ));
    }

    #[test]
    fn inline_images_become_data_urls() {
        assert_eq!(
            inline_image_url("image/png", "aGFsbG8="),
            "data:image/png;base64,aGFsbG8="
        );
    }
}
