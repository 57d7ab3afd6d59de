//! Message Store
//!
//! The ordered log of chat turns behind one lane. Every mutation addresses a
//! message by id; positions are only ever computed at the moment of a
//! truncation, never carried across an await.

use serde::{Deserialize, Serialize};

use crate::messages::{MessageId, MessageRole};

/// An opaque attachment record carried alongside a user turn
///
/// Cloning is a deep copy, so a message never aliases the caller's data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Display name (usually the original file name)
    pub name: String,
    /// MIME type, e.g. `image/png` or `text/plain`
    pub mime_type: String,
    /// Payload: base64 for binary data, raw text for text types
    pub data: String,
}

impl Attachment {
    /// Create a new attachment
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Whether this attachment is an image
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// A message in one lane's conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message ID
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// When the message was created (Unix timestamp ms)
    pub timestamp: u64,
    /// Whether the message is still being streamed
    pub is_streaming: bool,
    /// Attachments sent with this turn
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// UI flag: the message is open in an editor
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_editing: bool,
    /// UI field: content before the edit started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,
}

impl ChatMessage {
    /// Create a user turn
    ///
    /// The attachments are cloned, never borrowed.
    pub fn user(
        id: MessageId,
        content: impl Into<String>,
        timestamp: u64,
        attachments: &[Attachment],
    ) -> Self {
        Self {
            id,
            role: MessageRole::User,
            content: content.into(),
            timestamp,
            is_streaming: false,
            attachments: attachments.to_vec(),
            is_editing: false,
            original_content: None,
        }
    }

    /// Create an empty assistant turn that will be filled by a stream
    #[must_use]
    pub fn placeholder(id: MessageId) -> Self {
        Self {
            id,
            role: MessageRole::Assistant,
            content: String::new(),
            timestamp: now_ms(),
            is_streaming: true,
            attachments: Vec::new(),
            is_editing: false,
            original_content: None,
        }
    }

    /// Append content to a streaming message
    pub fn append(&mut self, text: &str) {
        self.content.push_str(text);
    }

    /// Replace the content with the final text and stop streaming
    pub fn complete(&mut self, final_content: String) {
        self.content = final_content;
        self.is_streaming = false;
    }

    /// Replace the content with an error line and stop streaming
    pub fn fail(&mut self, marker: &str, error: &str) {
        self.content = format!("{marker}{error}");
        self.is_streaming = false;
    }
}

/// Ordered, append/truncate-capable log of chat turns
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageStore {
    messages: Vec<ChatMessage>,
}

impl MessageStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Get message by ID
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Get a mutable message by ID
    pub fn get_mut(&mut self, id: &MessageId) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }

    /// Index of a message by ID
    #[must_use]
    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    /// Append a chunk to a message, returns false if the message is gone
    pub fn append_chunk(&mut self, id: &MessageId, text: &str) -> bool {
        match self.get_mut(id) {
            Some(msg) => {
                msg.append(text);
                true
            }
            None => false,
        }
    }

    /// Drop everything after `id`, keeping `id` itself
    ///
    /// Returns the new length, or `None` if `id` is not in the log.
    pub fn truncate_after(&mut self, id: &MessageId) -> Option<usize> {
        let idx = self.position(id)?;
        self.messages.truncate(idx + 1);
        Some(self.messages.len())
    }

    /// Drop `id` and everything after it
    ///
    /// Returns the new length, or `None` if `id` is not in the log.
    pub fn truncate_from(&mut self, id: &MessageId) -> Option<usize> {
        let idx = self.position(id)?;
        self.messages.truncate(idx);
        Some(self.messages.len())
    }

    /// Open a user message for editing, remembering its content
    pub fn begin_edit(&mut self, id: &MessageId) -> bool {
        match self.get_mut(id) {
            Some(msg) if msg.role == MessageRole::User => {
                if !msg.is_editing {
                    msg.original_content = Some(msg.content.clone());
                    msg.is_editing = true;
                }
                true
            }
            _ => false,
        }
    }

    /// Abandon an edit and restore the original content
    pub fn cancel_edit(&mut self, id: &MessageId) -> bool {
        match self.get_mut(id) {
            Some(msg) if msg.is_editing => {
                if let Some(original) = msg.original_content.take() {
                    msg.content = original;
                }
                msg.is_editing = false;
                true
            }
            _ => false,
        }
    }

    /// Replace a user message's content and close any open edit
    pub fn commit_edit(&mut self, id: &MessageId, content: String) -> bool {
        match self.get_mut(id) {
            Some(msg) if msg.role == MessageRole::User => {
                msg.content = content;
                msg.is_editing = false;
                msg.original_content = None;
                true
            }
            _ => false,
        }
    }

    /// Number of messages currently marked as streaming
    #[must_use]
    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_streaming).count()
    }

    /// Close every streaming message with an error line
    ///
    /// Returns the ids of the messages closed.
    pub fn fail_streaming(&mut self, marker: &str, error: &str) -> Vec<MessageId> {
        self.messages
            .iter_mut()
            .filter(|m| m.is_streaming)
            .map(|m| {
                m.fail(marker, error);
                m.id.clone()
            })
            .collect()
    }

    /// Get all messages
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Iterate over messages in order
    pub fn iter(&self) -> std::slice::Iter<'_, ChatMessage> {
        self.messages.iter()
    }

    /// Most recent message
    #[must_use]
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Get current message count
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Clear message history
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl<'a> IntoIterator for &'a MessageStore {
    type Item = &'a ChatMessage;
    type IntoIter = std::slice::Iter<'a, ChatMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

/// Get current timestamp in milliseconds
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
