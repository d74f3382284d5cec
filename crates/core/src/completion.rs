use crate::config::OpenAiConfig;
use crate::error::ServiceError;
use crate::openai::OpenAiClient;
use crate::traits::CompletionProvider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: OpenAiClient,
    model: String,
}

impl OpenAiChat {
    pub fn new(config: &OpenAiConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            client: OpenAiClient::new(config)?,
            model: config.chat_model.clone(),
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiChat {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ServiceError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.0,
        };

        let response: ChatResponse = self
            .client
            .post_json("completion", "chat/completions", &request)
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| ServiceError::BadResponse {
                service: "completion".to_string(),
                details: "response contained no message content".to_string(),
            })
    }
}
