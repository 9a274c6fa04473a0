use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::models::Message;

/// Errors surfaced by the transport before or during streaming. Rate limiting
/// and missing credits are distinguished so the session can show a specific
/// message for each.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("rate limited by the model provider")]
    RateLimited,
    #[error("model provider requires payment or additional credits")]
    PaymentRequired,
    #[error("request failed: {0}")]
    Request(String),
    #[error("stream interrupted: {0}")]
    Stream(String),
}

/// Raw byte chunks as delivered by the transport; chunk boundaries carry no
/// meaning and may fall anywhere inside a frame.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// Boundary to whatever actually carries the chat completion request. The
/// session only ever sees a status outcome and a stream of bytes.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open_stream(&self, history: &[Message]) -> Result<ByteStream, TransportError>;
}

/// OpenAI-compatible chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.as_str(),
            content: message.content.clone(),
        }
    }
}

/// LLM client for OpenAI-compatible streaming APIs. Constructed explicitly
/// and injected into the session; there is no ambient global instance.
pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
}

impl LlmClient {
    /// Create a new LLM client with the given configuration
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300)) // 5 minute timeout for long generations
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature: None,
        }
    }

    /// Create a new LLM client from the app's configuration
    pub fn from_config() -> Result<Self, String> {
        let config = super::config_service::get_effective_config()?;
        let mut client = Self::new(&config.base_url, &config.api_key, &config.model);
        if let Some(temperature) = config.temperature {
            client = client.with_temperature(temperature);
        }
        Ok(client)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    // Build the full URL - append /chat/completions if base_url doesn't already include it
    fn completions_url(&self) -> String {
        if self.base_url.contains("/chat/completions") {
            self.base_url.clone()
        } else {
            format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
        }
    }
}

#[async_trait]
impl ChatTransport for LlmClient {
    async fn open_stream(&self, history: &[Message]) -> Result<ByteStream, TransportError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: history.iter().map(WireMessage::from).collect(),
            stream: true,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::Request(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited,
                StatusCode::PAYMENT_REQUIRED => TransportError::PaymentRequired,
                _ => TransportError::Request(format!("API error ({}): {}", status, error_text)),
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| match chunk {
                Ok(bytes) => Ok(bytes.to_vec()),
                Err(e) => Err(TransportError::Stream(e.to_string())),
            })
            .boxed();

        Ok(stream)
    }
}
