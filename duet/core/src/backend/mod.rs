//! LLM Backend Abstraction
//!
//! The comparison engine talks to models through the [`LlmBackend`] trait.
//! [`OllamaBackend`] is the bundled implementation; tests supply scripted
//! backends of their own.

mod ollama;
mod traits;

pub use ollama::OllamaBackend;
pub use traits::{
    ChatTurn, LlmBackend, LlmRequest, LlmResponse, ModelInfo, ProviderError, StreamingToken,
};
