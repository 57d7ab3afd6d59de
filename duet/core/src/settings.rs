//! Provider/model selection
//!
//! The engine never owns the provider or model choice. It reads the current
//! selection from a [`SettingsProvider`] at the start of every call and
//! captures it by value, so a selection change only affects later calls.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A provider the user can pick
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Stable identifier (e.g. "ollama")
    pub id: String,
    /// Human-readable name
    pub name: String,
}

impl ProviderInfo {
    /// Create provider info
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A validated provider/model pair, captured when a call starts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    /// The selected provider
    pub provider: ProviderInfo,
    /// The selected model
    pub model: String,
    /// Whether responses should be streamed
    pub stream: bool,
}

/// Reasons a call cannot start
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// No provider is selected
    #[error("select an AI provider and model first")]
    NoProvider,

    /// The selected provider is not in the available list
    #[error("selected provider '{0}' is not available")]
    UnknownProvider(String),

    /// No model is selected
    #[error("select a model for provider '{0}' first")]
    NoModel(String),
}

/// Read-only view of the user's provider/model settings
pub trait SettingsProvider: Send + Sync {
    /// Id of the selected provider
    fn selected_provider(&self) -> Option<String>;

    /// The selected model
    fn selected_model(&self) -> Option<String>;

    /// All providers the user may pick from
    fn available_providers(&self) -> Vec<ProviderInfo>;

    /// Whether to request streamed responses
    fn stream_mode(&self) -> bool {
        true
    }
}

/// Resolve and validate the current selection
///
/// # Errors
///
/// Returns a [`ValidationError`] if no provider is selected, the selected
/// provider is not available, or no model is selected.
pub fn resolve_selection(settings: &dyn SettingsProvider) -> Result<Selection, ValidationError> {
    let provider_id = settings
        .selected_provider()
        .filter(|id| !id.trim().is_empty())
        .ok_or(ValidationError::NoProvider)?;

    let provider = settings
        .available_providers()
        .into_iter()
        .find(|p| p.id == provider_id)
        .ok_or_else(|| ValidationError::UnknownProvider(provider_id.clone()))?;

    let model = settings
        .selected_model()
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ValidationError::NoModel(provider.id.clone()))?;

    Ok(Selection {
        provider,
        model,
        stream: settings.stream_mode(),
    })
}

#[derive(Debug, Default)]
struct SelectionState {
    providers: Vec<ProviderInfo>,
    provider: Option<String>,
    model: Option<String>,
    stream: bool,
}

/// In-memory settings, mutable through a shared reference
#[derive(Debug)]
pub struct StaticSettings {
    inner: RwLock<SelectionState>,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl StaticSettings {
    /// Create settings with the given providers and nothing selected
    #[must_use]
    pub fn new(providers: Vec<ProviderInfo>) -> Self {
        Self {
            inner: RwLock::new(SelectionState {
                providers,
                provider: None,
                model: None,
                stream: true,
            }),
        }
    }

    /// Create settings with a single provider already selected
    pub fn selected(provider: ProviderInfo, model: impl Into<String>) -> Self {
        let settings = Self::new(vec![provider.clone()]);
        settings.select_provider(Some(provider.id));
        settings.select_model(Some(model.into()));
        settings
    }

    /// Change the selected provider
    pub fn select_provider(&self, provider: Option<String>) {
        self.inner.write().provider = provider;
    }

    /// Change the selected model
    pub fn select_model(&self, model: Option<String>) {
        self.inner.write().model = model;
    }

    /// Turn streaming on or off
    pub fn set_stream_mode(&self, stream: bool) {
        self.inner.write().stream = stream;
    }

    /// Add a provider to the available list
    pub fn add_provider(&self, provider: ProviderInfo) {
        let mut inner = self.inner.write();
        if !inner.providers.iter().any(|p| p.id == provider.id) {
            inner.providers.push(provider);
        }
    }
}

impl SettingsProvider for StaticSettings {
    fn selected_provider(&self) -> Option<String> {
        self.inner.read().provider.clone()
    }

    fn selected_model(&self) -> Option<String> {
        self.inner.read().model.clone()
    }

    fn available_providers(&self) -> Vec<ProviderInfo> {
        self.inner.read().providers.clone()
    }

    fn stream_mode(&self) -> bool {
        self.inner.read().stream
    }
}
