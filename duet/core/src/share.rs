//! Share export
//!
//! Builds the JSON body a playground-share service accepts for one lane's
//! conversation. Storing and serving shares is the service's business.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::MessageRole;
use crate::settings::{Selection, ValidationError};
use crate::store::MessageStore;

/// Errors building a share payload
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShareError {
    /// Title is blank
    #[error("share title must not be empty")]
    EmptyTitle,

    /// Nothing finished to share
    #[error("conversation has no finished messages")]
    EmptyConversation,

    /// No usable provider/model selection
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Who may open a share
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Anyone with the link
    #[default]
    Public,
    /// Signed-in users only
    AuthOnly,
}

/// Provider block of a share
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareProvider {
    /// Provider id
    pub id: String,
    /// Provider display name
    pub name: String,
    /// Model id
    pub model_id: String,
    /// Model display name
    pub model_name: String,
    /// Whether the conversation was streamed
    pub stream_mode: bool,
}

/// Optional artifact attached to a share
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareArtifact {
    /// Artifact kind
    #[serde(rename = "type")]
    pub kind: String,
    /// Artifact body
    pub content: String,
}

/// One shared message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareMessage {
    /// Message id
    pub id: String,
    /// `user` or `model`
    pub role: String,
    /// Raw text
    pub text: String,
    /// Rendered text
    pub display_text: String,
    /// Unix timestamp (ms)
    pub timestamp: u64,
}

/// Body of a create-share request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharePayload {
    /// Share title
    pub title: String,
    /// System prompt the lane ran with
    #[serde(rename = "systemPrompt")]
    pub system_prompt: String,
    /// Provider and model
    pub provider: ShareProvider,
    /// Optional artifact
    pub artifact: Option<ShareArtifact>,
    /// Finished messages in order
    pub messages: Vec<ShareMessage>,
    /// Never expires
    pub is_permanent: bool,
    /// Custom expiry (ISO 8601)
    pub expires_at: Option<String>,
    /// Access mode
    pub access_mode: AccessMode,
    /// Access password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl SharePayload {
    /// Build a payload from one lane's log
    ///
    /// Messages still streaming are left out.
    ///
    /// # Errors
    ///
    /// [`ShareError::EmptyTitle`] for a blank title and
    /// [`ShareError::EmptyConversation`] when no finished message remains.
    pub fn from_lane(
        title: &str,
        system_prompt: &str,
        selection: &Selection,
        store: &MessageStore,
    ) -> Result<Self, ShareError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ShareError::EmptyTitle);
        }

        let messages: Vec<ShareMessage> = store
            .iter()
            .filter(|m| !m.is_streaming)
            .map(|m| ShareMessage {
                id: m.id.to_string(),
                role: match m.role {
                    MessageRole::Assistant => "model".to_string(),
                    other => other.as_str().to_string(),
                },
                text: m.content.clone(),
                display_text: m.content.clone(),
                timestamp: m.timestamp,
            })
            .collect();

        if messages.is_empty() {
            return Err(ShareError::EmptyConversation);
        }

        Ok(Self {
            title: title.to_string(),
            system_prompt: system_prompt.to_string(),
            provider: ShareProvider {
                id: selection.provider.id.clone(),
                name: selection.provider.name.clone(),
                model_id: selection.model.clone(),
                model_name: selection.model.clone(),
                stream_mode: selection.stream,
            },
            artifact: None,
            messages,
            is_permanent: false,
            expires_at: None,
            access_mode: AccessMode::Public,
            password: None,
        })
    }

    /// Make the share permanent
    #[must_use]
    pub fn permanent(mut self) -> Self {
        self.is_permanent = true;
        self.expires_at = None;
        self
    }

    /// Set a custom expiry
    #[must_use]
    pub fn with_expiry(mut self, expires_at: impl Into<String>) -> Self {
        self.is_permanent = false;
        self.expires_at = Some(expires_at.into());
        self
    }

    /// Set the access mode
    #[must_use]
    pub fn with_access_mode(mut self, access_mode: AccessMode) -> Self {
        self.access_mode = access_mode;
        self
    }

    /// Protect the share with a password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}
