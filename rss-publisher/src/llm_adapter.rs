use crate::config::CompletionConfig;
use crate::fetcher::{build_client, ensure_success, with_retry};
use crate::types::{FetchConfig, PipelineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

/// One prompt for the completion service.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Trait for completion backends: prompt in, free text out
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Return the completion text. Transient failures are retried internally.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
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

/// Chat-completions client for the OpenAI HTTP API
pub struct OpenAiCompletionClient {
    client: Client,
    fetch: FetchConfig,
    endpoint: String,
    model: String,
    api_key: String,
    organization: Option<String>,
}

impl OpenAiCompletionClient {
    pub fn new(
        config: &CompletionConfig,
        fetch: FetchConfig,
        api_key: String,
        organization: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(&fetch)?,
            fetch,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            organization,
        })
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<String> {
        let mut request = self.client.post(&self.endpoint).bearer_auth(&self.api_key).json(body);
        if let Some(org) = &self.organization {
            request = request.header("OpenAI-Organization", org);
        }

        let response = ensure_success("openai", request.send().await?).await?;
        let parsed: ChatResponse = response.json().await?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| PipelineError::malformed("openai", "no completion text in response"))
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let body = &body;
        let reply = with_retry(&self.fetch, "completion", move || async move { self.send(body).await }).await?;
        debug!("Completion reply ({} chars)", reply.len());
        Ok(reply)
    }
}

/// Scripted completion backend for development and testing
///
/// Replies are handed out in order; once the script runs out every call
/// fails with a malformed-response error. Requests are kept for inspection.
pub struct MockCompletionClient {
    name: String,
    replies: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockCompletionClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.push_reply(reply);
        self
    }

    pub fn with_error(self, error: PipelineError) -> Self {
        self.lock_replies().push_back(Err(error));
        self
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.lock_replies().push_back(Ok(reply.into()));
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String>>> {
        self.replies.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());

        self.lock_replies()
            .pop_front()
            .unwrap_or_else(|| Err(PipelineError::malformed(self.name.clone(), "no scripted reply left")))
    }
}
