//! LLM Backend Traits
//!
//! Trait definitions for the model-call collaborator. The comparison engine
//! only knows this interface; transports and provider specifics live in the
//! implementations.
//!
//! # Design Philosophy
//!
//! A streamed call is a channel of [`StreamingToken`]s. Each lane drains its
//! own receiver, which makes the chunk-to-message binding an explicit value
//! instead of a callback that could be shared between concurrent calls.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::messages::MessageRole;
use crate::settings::{ProviderInfo, Selection};
use crate::store::Attachment;

/// Token stream events from LLM backends
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// A chunk of the response
    Token(String),
    /// Response completed successfully
    Complete {
        /// The complete message (authoritative over the concatenated chunks)
        message: String,
    },
    /// Error occurred during streaming
    Error(String),
}

/// One entry of the outgoing conversation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatTurn {
    /// Speaker
    pub role: MessageRole,
    /// Text content
    pub content: String,
    /// Attachments sent with this turn
    pub attachments: Vec<Attachment>,
}

impl ChatTurn {
    /// Create a turn without attachments
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    /// Attach files to this turn
    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// A chat request, fully captured by value when the call starts
#[derive(Clone, Debug, PartialEq)]
pub struct LlmRequest {
    /// Ordered conversation, system prompt first
    pub messages: Vec<ChatTurn>,
    /// Provider the call is addressed to
    pub provider: ProviderInfo,
    /// Model to use (backend-specific identifier)
    pub model: String,
    /// Whether to stream the response
    pub stream: bool,
    /// Sampling temperature, `None` = backend default
    pub temperature: Option<f32>,
    /// Maximum tokens in response (0 = default)
    pub max_tokens: u32,
}

impl LlmRequest {
    /// Create an empty request for a provider and model
    pub fn new(provider: ProviderInfo, model: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            provider,
            model: model.into(),
            stream: true,
            temperature: None,
            max_tokens: 0,
        }
    }

    /// Create an empty request from a validated selection
    #[must_use]
    pub fn for_selection(selection: &Selection) -> Self {
        Self::new(selection.provider.clone(), selection.model.clone())
            .with_stream(selection.stream)
    }

    /// Append a turn
    #[must_use]
    pub fn with_turn(mut self, turn: ChatTurn) -> Self {
        self.messages.push(turn);
        self
    }

    /// Set streaming mode
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// The system prompt, if the request starts with one
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|t| t.role == MessageRole::System)
            .map(|t| t.content.as_str())
    }
}

/// Response from non-streaming LLM request
#[derive(Clone, Debug)]
pub struct LlmResponse {
    /// The response text
    pub content: String,
    /// Model that generated the response
    pub model: String,
    /// Tokens used (if available)
    pub tokens_used: Option<u32>,
    /// Response generation time in milliseconds
    pub duration_ms: Option<u64>,
}

/// Information about an available model
#[derive(Clone, Debug)]
pub struct ModelInfo {
    /// Model identifier
    pub name: String,
    /// Model size in bytes (if known)
    pub size: Option<u64>,
    /// Parameter count (if known)
    pub parameters: Option<String>,
}

/// A failure inside an in-flight call
///
/// Lanes never propagate these; they are rendered into the assistant turn.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The request could not be started
    #[error(transparent)]
    Backend(#[from] anyhow::Error),

    /// The provider reported an error mid-stream
    #[error("{0}")]
    Stream(String),

    /// The stream closed without a final message
    #[error("stream ended before the response completed")]
    Disconnected,
}

/// LLM Backend trait
///
/// Implement this trait to add support for different LLM providers.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Get the backend name (e.g., "Ollama")
    fn name(&self) -> &str;

    /// Check if the backend is healthy and reachable
    async fn health_check(&self) -> bool;

    /// Send a request and get a streaming response
    ///
    /// Returns a channel receiver that will receive tokens as they arrive.
    /// The channel ends with `Complete` or `Error`; closing it early counts
    /// as a failure.
    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>>;

    /// Send a request and wait for complete response (non-streaming)
    async fn send(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse>;

    /// List available models
    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>>;

    /// Check if a specific model is available
    async fn has_model(&self, model: &str) -> anyhow::Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m.name == model))
    }
}
