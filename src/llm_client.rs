use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use url::Url;

use crate::cli::chat::conversation_state::{Message, Role};
use crate::config::ProviderConfig;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid base url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model returned no completion")]
    EmptyCompletion,

    #[error("model call cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerateOptions {
    pub temperature: f32,
}

impl GenerateOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self { temperature }
    }
}

/// Anything that turns a role-tagged transcript into one completion.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        options: GenerateOptions,
    ) -> Result<String, ProviderError>;

    fn model_id(&self) -> &str;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::Human => "user",
        Role::Ai => "assistant",
    }
}

/// Client for any OpenAI-compatible `chat/completions` endpoint.
pub struct OpenAiCompatibleClient {
    api_key: String,
    model: String,
    endpoint: Url,
    client: reqwest::Client,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &ProviderConfig, model: &str) -> Result<Self, ProviderError> {
        let endpoint = Url::parse(&config.base_url)?.join("chat/completions")?;

        Ok(Self {
            api_key: config.api_key.clone(),
            model: model.to_string(),
            endpoint,
            client: reqwest::Client::new(),
        })
    }

    async fn send(&self, messages: &[Message], options: GenerateOptions) -> Result<String, ProviderError> {
        let request_body = ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: wire_role(m.role),
                    content: m.text(),
                })
                .collect(),
            temperature: options.temperature,
        };

        debug!(model = %self.model, messages = messages.len(), "Sending chat completion request");

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            error!("API request failed with response: {}", body);
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response: CompletionResponse = response.json().await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ProviderError::EmptyCompletion)?;

        debug!(model = %self.model, "Received completion: {}", content);
        Ok(content)
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleClient {
    async fn generate(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        options: GenerateOptions,
    ) -> Result<String, ProviderError> {
        let start = std::time::Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            result = self.send(messages, options) => result,
        };

        match &result {
            Ok(_) => info!(
                model = %self.model,
                duration_ms = %start.elapsed().as_millis(),
                "Model call completed"
            ),
            Err(e) => error!(
                model = %self.model,
                duration_ms = %start.elapsed().as_millis(),
                error = %e,
                "Model call failed"
            ),
        }
        result
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    pub enum Reply {
        Text(String),
        Fail(String),
        /// Blocks until the caller cancels.
        Hang,
    }

    #[derive(Debug, Clone)]
    pub struct Recorded {
        pub messages: Vec<Message>,
        pub temperature: f32,
    }

    /// Replays queued replies in order and records every request.
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<Recorded>>,
    }

    impl ScriptedModel {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(self, text: impl Into<String>) -> Self {
            self.push(Reply::Text(text.into()))
        }

        pub fn fail(self, reason: impl Into<String>) -> Self {
            self.push(Reply::Fail(reason.into()))
        }

        pub fn hang(self) -> Self {
            self.push(Reply::Hang)
        }

        fn push(self, reply: Reply) -> Self {
            self.replies.lock().unwrap().push_back(reply);
            self
        }

        pub fn requests(&self) -> Vec<Recorded> {
            self.requests.lock().unwrap().clone()
        }

        pub fn remaining(&self) -> usize {
            self.replies.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(
            &self,
            cancel: &CancellationToken,
            messages: &[Message],
            options: GenerateOptions,
        ) -> Result<String, ProviderError> {
            self.requests.lock().unwrap().push(Recorded {
                messages: messages.to_vec(),
                temperature: options.temperature,
            });
            let reply = self.replies.lock().unwrap().pop_front();
            match reply {
                Some(Reply::Text(text)) => Ok(text),
                Some(Reply::Fail(body)) => Err(ProviderError::Status { status: 500, body }),
                Some(Reply::Hang) => {
                    cancel.cancelled().await;
                    Err(ProviderError::Cancelled)
                }
                None => Err(ProviderError::Status {
                    status: 503,
                    body: "script exhausted".to_string(),
                }),
            }
        }

        fn model_id(&self) -> &str {
            "scripted"
        }
    }
}
