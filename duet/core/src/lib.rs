//! Duet Core - Dual-Lane Prompt Comparison Engine
//!
//! This crate drives two independent chat sessions against a language model at
//! the same time, so two prompts can be compared side by side, turn by turn.
//! It is headless: a TUI, web UI or the `duet` CLI renders what it publishes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         UI Surfaces                              │
//! │        ┌─────────┐   ┌─────────┐   ┌──────────────────┐          │
//! │        │   CLI   │   │  WebUI  │   │ Headless / Tests │          │
//! │        └────┬────┘   └────┬────┘   └────────┬─────────┘          │
//! │             └─────────────┴─────────────────┘                    │
//! │              operations (down)   ComparisonEvent (up)            │
//! └──────────────────────────────┼───────────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┼───────────────────────────────────┐
//! │                         DUET CORE                                │
//! │  ┌───────────────────────────┴──────────────────────────────┐    │
//! │  │                  ComparisonController                    │    │
//! │  │   ┌──────────────┐                  ┌──────────────┐     │    │
//! │  │   │  Left lane   │                  │  Right lane  │     │    │
//! │  │   │ coordinator  │                  │ coordinator  │     │    │
//! │  │   └──────┬───────┘                  └──────┬───────┘     │    │
//! │  │          │   ComparisonState (4 logs)      │             │    │
//! │  └──────────┼─────────────────────────────────┼─────────────┘    │
//! │             └──────────────┬──────────────────┘                  │
//! │                     LlmBackend (Ollama, ...)                     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ComparisonController`]: owns the state and exposes every operation
//! - [`ComparisonEvent`]: change notifications for UI surfaces
//! - [`ComparisonState`]: the mode, both configs, four logs, two busy flags
//! - [`LlmBackend`]: the model-call collaborator
//! - [`SettingsProvider`]: the provider/model selection collaborator
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use duet_core::{
//!     backend::OllamaBackend, config::load_config, ComparisonController, Side,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let backend = Arc::new(OllamaBackend::from_config(&config.backend));
//!     let controller = ComparisonController::new(
//!         backend,
//!         Arc::new(config.settings()),
//!         config.comparison.clone(),
//!     );
//!
//!     controller.init_system_comparison("You are terse.", "You are thorough.");
//!     controller.set_shared_user_input("Explain ownership.");
//!     controller.send_system_message(&[]).await?;
//!
//!     for message in controller.messages(Side::Right) {
//!         println!("{}: {}", message.role.as_str(), message.content);
//!     }
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]

pub mod backend;
pub mod comparison;
pub mod config;
pub mod lane;
pub mod messages;
pub mod settings;
pub mod share;
pub mod state;
pub mod store;

pub use backend::{LlmBackend, LlmRequest, OllamaBackend, ProviderError, StreamingToken};
pub use comparison::{ComparisonConfig, ComparisonController};
pub use lane::CallContext;
pub use messages::{ComparisonEvent, ComparisonMode, MessageId, MessageRole, SessionId, Side};
pub use settings::{
    resolve_selection, ProviderInfo, Selection, SettingsProvider, StaticSettings, ValidationError,
};
pub use share::{AccessMode, ShareError, SharePayload};
pub use state::{ComparisonState, SystemPromptCompareConfig, UserPromptCompareConfig};
pub use store::{Attachment, ChatMessage, MessageStore};
