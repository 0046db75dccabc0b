use std::fmt;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::{ClientBuilder, ClientConfig};
use crate::error::{Error, Result};
use crate::models::{ChatMessage, ChatRequest, ChatResponse, Payload};

/// Something that can answer a prompt. Lets callers swap the HTTP client for a fake.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send_prompt(&self, prompt: &str) -> Result<String>;
    async fn send_messages(&self, messages: Vec<ChatMessage>) -> Result<String>;
}

/// Stateless chat-completions client. Every call is one independent POST, so a
/// single instance (or its clones, which share the connection pool) can serve
/// concurrent callers. Dropping a returned future cancels its request.
#[derive(Clone)]
pub struct DeepSeekClient {
    client: reqwest::Client,
    api_key: String,
    config: ClientConfig,
}

impl fmt::Debug for DeepSeekClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeepSeekClient")
            .field("api_key", &"<redacted>")
            .field("config", &self.config)
            .finish()
    }
}

impl DeepSeekClient {
    /// Client with the default endpoint, model and sampling settings. The key
    /// is not checked here; a bad key shows up as an API error on the first call.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::builder(api_key).build()
    }

    pub fn builder(api_key: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(api_key.into())
    }

    pub(crate) fn from_parts(client: reqwest::Client, api_key: String, config: ClientConfig) -> Self {
        Self {
            client,
            api_key,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Request with this client's model and sampling defaults.
    pub fn chat_request(&self, messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }

    /// Send a single user message and return the first choice's text.
    pub async fn send_prompt(&self, prompt: &str) -> Result<String> {
        self.send_messages(vec![ChatMessage::user(prompt)]).await
    }

    /// Send a caller-assembled conversation and return the first choice's text.
    pub async fn send_messages(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let request = self.chat_request(messages);
        let response = self.complete(&request).await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| Error::InvalidResponse("response contained no choices".to_string()))
    }

    /// Perform one request and return the full typed response.
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        if request.messages.is_empty() {
            return Err(Error::InvalidRequest("messages must not be empty".to_string()));
        }

        let body = request.encode()?;
        let headers = self.headers()?;

        debug!(
            endpoint = %self.config.endpoint,
            model = %request.model,
            messages = request.messages.len(),
            prompt_chars = request.messages.iter().map(|m| m.content.chars().count()).sum::<usize>(),
            "sending chat request"
        );

        let mut builder = self
            .client
            .post(self.config.endpoint.clone())
            .headers(headers)
            .body(body);
        if let Some(timeout) = self.config.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        debug!(status = status.as_u16(), bytes = body.len(), "received chat response");

        classify(status, &body)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| Error::api(None, "invalid API key format"))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl ChatApi for DeepSeekClient {
    async fn send_prompt(&self, prompt: &str) -> Result<String> {
        DeepSeekClient::send_prompt(self, prompt).await
    }

    async fn send_messages(&self, messages: Vec<ChatMessage>) -> Result<String> {
        DeepSeekClient::send_messages(self, messages).await
    }
}

/// Map a status and raw body to exactly one outcome.
fn classify(status: StatusCode, body: &[u8]) -> Result<ChatResponse> {
    let code = Some(status.as_u16());

    if body.is_empty() {
        if !status.is_success() {
            warn!(status = status.as_u16(), "chat API returned an empty error body");
        }
        return Err(Error::NoData);
    }

    match Payload::decode(body) {
        Ok(Payload::Failure(envelope)) => {
            warn!(status = status.as_u16(), kind = ?envelope.error.kind, "chat API reported an error");
            Err(Error::api(code, envelope.error.message))
        }
        _ if !status.is_success() => {
            warn!(status = status.as_u16(), "chat API returned an unrecognised error body");
            Err(Error::api(code, String::from_utf8_lossy(body).trim()))
        }
        Ok(Payload::Completion(response)) => Ok(response),
        Err(err) => Err(Error::InvalidResponse(err.to_string())),
    }
}
