//! Comparison Messages
//!
//! Identifiers shared across the engine and the events the controller
//! publishes to UI surfaces.
//!
//! # Design Philosophy
//!
//! The controller owns all comparison state. UI surfaces are renderers that
//! subscribe to [`ComparisonEvent`]s and re-read whatever they need from a
//! state snapshot. Events are notifications, not the source of truth: a surface
//! that lags behind can always resynchronise from `snapshot()`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// One of the two comparison lanes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Left lane ("original")
    Left,
    /// Right lane ("optimized")
    Right,
}

impl Side {
    /// Both sides, left first
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    /// Lowercase name, also used as the id prefix
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which prompt axis is being compared
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    /// Two system prompts, one shared user input
    #[default]
    SystemPrompt,
    /// One shared system prompt, two user prompts
    UserPrompt,
}

impl fmt::Display for ComparisonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SystemPrompt => f.write_str("system"),
            Self::UserPrompt => f.write_str("user"),
        }
    }
}

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User input
    User,
    /// Model output
    Assistant,
    /// System prompt (only ever appears in outgoing requests)
    System,
}

impl MessageRole {
    /// Wire name used by chat-style APIs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// Message identifier
///
/// Ids carry their lane as a prefix (`left-...`, `right-...`) and end in a
/// process-wide sequence number, so they never collide across lanes, modes or
/// sessions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_stamp() -> String {
    let seq = MESSAGE_SEQ.fetch_add(1, Ordering::SeqCst);
    format!("{}-{seq}", crate::store::now_ms())
}

impl MessageId {
    /// Ids for one logical user turn sent to both lanes
    ///
    /// Both ids share a base and differ only in their lane prefix.
    #[must_use]
    pub fn user_pair() -> (Self, Self) {
        let base = format!("user-{}", next_stamp());
        (
            Self(format!("{}-{base}", Side::Left)),
            Self(format!("{}-{base}", Side::Right)),
        )
    }

    /// Id for a user turn on a single lane
    #[must_use]
    pub fn user(side: Side) -> Self {
        Self(format!("{side}-user-{}", next_stamp()))
    }

    /// Id for an assistant turn on a single lane
    #[must_use]
    pub fn assistant(side: Side) -> Self {
        Self(format!("{side}-ai-{}", next_stamp()))
    }

    /// Borrow the raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Comparison session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new random session ID
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Events published by the controller to UI surfaces
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ComparisonEvent {
    // ============================================
    // Session Lifecycle
    // ============================================
    /// A comparison was (re)initialised in the given mode
    ModeChanged {
        /// The now-active mode
        mode: ComparisonMode,
    },

    /// Everything was reset to empty
    Reset {
        /// The fresh session id
        session_id: SessionId,
    },

    /// A pending draft or prompt was edited
    DraftChanged {
        /// Mode whose configuration changed
        mode: ComparisonMode,
        /// Lane the draft belongs to (`None` for shared fields)
        side: Option<Side>,
    },

    // ============================================
    // Conversation Messages
    // ============================================
    /// A message was appended to a lane's log
    MessageAdded {
        /// Lane that received the message
        side: Side,
        /// Mode whose log was touched
        mode: ComparisonMode,
        /// The new message
        message_id: MessageId,
        /// Role of the new message
        role: MessageRole,
    },

    /// A message's content was edited in place
    MessageEdited {
        /// Lane owning the message
        side: Side,
        /// The edited message
        message_id: MessageId,
    },

    /// A streaming chunk was appended to an assistant turn
    Token {
        /// Lane owning the message
        side: Side,
        /// Message the chunk belongs to
        message_id: MessageId,
        /// The chunk text
        text: String,
    },

    /// A stream completed and the message holds its final text
    StreamEnd {
        /// Lane owning the message
        side: Side,
        /// Message that completed
        message_id: MessageId,
        /// Authoritative final content
        final_content: String,
    },

    /// A stream failed and the message holds the error marker
    StreamError {
        /// Lane owning the message
        side: Side,
        /// Message that failed
        message_id: MessageId,
        /// Failure description
        error: String,
    },

    /// A lane's log was cut back before a replay
    HistoryTruncated {
        /// Lane whose log was truncated
        side: Side,
        /// Mode whose log was truncated
        mode: ComparisonMode,
        /// Messages left in the log
        remaining: usize,
    },

    /// One or both active logs were emptied
    HistoryCleared {
        /// Lane that was cleared (`None` = both)
        side: Option<Side>,
        /// Mode whose logs were cleared
        mode: ComparisonMode,
    },

    // ============================================
    // Lane State
    // ============================================
    /// A lane's busy flag changed
    Generating {
        /// Lane whose flag changed
        side: Side,
        /// New value
        generating: bool,
    },
}

impl ComparisonEvent {
    /// Lane this event concerns, if it concerns exactly one
    #[must_use]
    pub fn side(&self) -> Option<Side> {
        match self {
            Self::MessageAdded { side, .. }
            | Self::MessageEdited { side, .. }
            | Self::Token { side, .. }
            | Self::StreamEnd { side, .. }
            | Self::StreamError { side, .. }
            | Self::HistoryTruncated { side, .. }
            | Self::Generating { side, .. } => Some(*side),
            Self::DraftChanged { side, .. } | Self::HistoryCleared { side, .. } => *side,
            Self::ModeChanged { .. } | Self::Reset { .. } => None,
        }
    }
}
