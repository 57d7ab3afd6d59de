//! Comparison Controller
//!
//! The root of the engine. Owns the comparison state, the two lane
//! coordinators and the event channel, and exposes every operation a UI
//! needs.
//!
//! # Design Philosophy
//!
//! Operations either do nothing, fail with a [`ValidationError`] before
//! touching state, or run to completion. Unmet preconditions (empty draft,
//! busy lane, unknown id, wrong role) are silent no-ops, so a UI may call any
//! operation at any time without guarding it first.
//!
//! All preparation for a call happens in one critical section: the user turns,
//! the cleared draft, the busy flags, the placeholders and the outgoing
//! requests. Only then are the lane calls awaited.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::backend::LlmBackend;
use crate::lane::{emit, LaneCoordinator, SharedState, INTERRUPTED};
use crate::messages::{ComparisonEvent, ComparisonMode, MessageId, MessageRole, SessionId, Side};
use crate::settings::{resolve_selection, SettingsProvider, ValidationError};
use crate::share::{ShareError, SharePayload};
use crate::state::{ComparisonState, SystemPromptCompareConfig, UserPromptCompareConfig};
use crate::store::{now_ms, Attachment, ChatMessage};

/// Default prefix of failed assistant turns
pub const DEFAULT_ERROR_MARKER: &str = "❌ Error: ";

/// Default capacity of the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Controller settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComparisonConfig {
    /// Prefix written before a provider error in a failed turn
    pub error_marker: String,
    /// Events buffered per subscriber before it starts lagging
    pub event_capacity: usize,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            error_marker: DEFAULT_ERROR_MARKER.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ComparisonConfig {
    /// Set the error marker
    #[must_use]
    pub fn with_error_marker(mut self, marker: impl Into<String>) -> Self {
        self.error_marker = marker.into();
        self
    }

    /// Set the event channel capacity
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

/// Drives a two-lane prompt comparison
pub struct ComparisonController<B: LlmBackend + ?Sized> {
    state: SharedState,
    settings: Arc<dyn SettingsProvider>,
    events: broadcast::Sender<ComparisonEvent>,
    left: LaneCoordinator<B>,
    right: LaneCoordinator<B>,
    config: ComparisonConfig,
}

impl<B: LlmBackend + ?Sized> ComparisonController<B> {
    /// Create a controller with an empty system-mode session
    pub fn new(
        backend: Arc<B>,
        settings: Arc<dyn SettingsProvider>,
        config: ComparisonConfig,
    ) -> Self {
        let state: SharedState = Arc::new(Mutex::new(ComparisonState::default()));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let marker: Arc<str> = Arc::from(config.error_marker.as_str());

        let left = LaneCoordinator::new(
            Side::Left,
            Arc::clone(&backend),
            Arc::clone(&state),
            events.clone(),
            Arc::clone(&marker),
        );
        let right = LaneCoordinator::new(Side::Right, backend, Arc::clone(&state), events.clone(), marker);

        tracing::debug!(session_id = %state.lock().session_id, "Comparison controller created");

        Self {
            state,
            settings,
            events,
            left,
            right,
            config,
        }
    }

    /// Create a controller with default settings
    pub fn with_defaults(backend: Arc<B>, settings: Arc<dyn SettingsProvider>) -> Self {
        Self::new(backend, settings, ComparisonConfig::default())
    }

    fn lane(&self, side: Side) -> &LaneCoordinator<B> {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    // ============================================
    // Session Lifecycle
    // ============================================

    /// Start a system-prompt comparison
    ///
    /// Clears the shared draft and both system-mode logs. Calls still in
    /// flight are orphaned: their placeholders are closed as interrupted and
    /// nothing they receive afterwards is written.
    pub fn init_system_comparison(&self, original_prompt: &str, optimized_prompt: &str) {
        let mode = ComparisonMode::SystemPrompt;
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            self.release(&mut state, &mut events);
            state.mode = mode;
            state.system_config = SystemPromptCompareConfig {
                left_system_prompt: original_prompt.to_string(),
                right_system_prompt: optimized_prompt.to_string(),
                shared_user_input: String::new(),
            };
            state.left_messages.clear();
            state.right_messages.clear();

            tracing::info!(
                session_id = %state.session_id,
                left_len = original_prompt.len(),
                right_len = optimized_prompt.len(),
                "System prompt comparison initialised"
            );
        }
        events.push(ComparisonEvent::ModeChanged { mode });
        events.push(ComparisonEvent::HistoryCleared { side: None, mode });
        emit(&self.events, events);
    }

    /// Start a user-prompt comparison
    ///
    /// Clears both user-mode logs. Calls still in flight are orphaned, as in
    /// [`init_system_comparison`](Self::init_system_comparison).
    pub fn init_user_comparison(
        &self,
        system_prompt: &str,
        original_user_prompt: &str,
        optimized_user_prompt: &str,
    ) {
        let mode = ComparisonMode::UserPrompt;
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            self.release(&mut state, &mut events);
            state.mode = mode;
            state.user_config = UserPromptCompareConfig {
                shared_system_prompt: system_prompt.to_string(),
                left_user_prompt: original_user_prompt.to_string(),
                right_user_prompt: optimized_user_prompt.to_string(),
            };
            state.left_user_messages.clear();
            state.right_user_messages.clear();

            tracing::info!(
                session_id = %state.session_id,
                system_len = system_prompt.len(),
                left_len = original_user_prompt.len(),
                right_len = optimized_user_prompt.len(),
                "User prompt comparison initialised"
            );
        }
        events.push(ComparisonEvent::ModeChanged { mode });
        events.push(ComparisonEvent::HistoryCleared { side: None, mode });
        emit(&self.events, events);
    }

    /// Clear both configurations, all four logs and both busy flags
    ///
    /// The mode is kept. A new session id is assigned.
    pub fn reset(&self) {
        let mut events = Vec::new();
        let session_id = {
            let mut state = self.state.lock();
            self.release(&mut state, &mut events);

            let fresh = ComparisonState {
                mode: state.mode,
                left: state.left.clone(),
                right: state.right.clone(),
                ..ComparisonState::default()
            };
            *state = fresh;
            state.session_id.clone()
        };

        tracing::info!(session_id = %session_id, "Comparison reset");
        events.push(ComparisonEvent::Reset { session_id });
        emit(&self.events, events);
    }

    /// Orphan in-flight calls, queueing events for released lanes
    ///
    /// Their placeholders are closed as interrupted in every log, including
    /// the inactive mode's logs that `init*` keeps.
    fn release(&self, state: &mut ComparisonState, events: &mut Vec<ComparisonEvent>) {
        for (side, message_id) in state.interrupt_streaming(&self.config.error_marker, INTERRUPTED) {
            events.push(ComparisonEvent::StreamError {
                side,
                message_id,
                error: INTERRUPTED.to_string(),
            });
        }
        for side in state.invalidate_lanes() {
            tracing::debug!(side = %side, "Orphaning in-flight call");
            events.push(ComparisonEvent::Generating {
                side,
                generating: false,
            });
        }
    }

    // ============================================
    // Drafts
    // ============================================

    /// Set the shared user input (system mode)
    pub fn set_shared_user_input(&self, text: impl Into<String>) {
        self.state.lock().system_config.shared_user_input = text.into();
        emit(
            &self.events,
            vec![ComparisonEvent::DraftChanged {
                mode: ComparisonMode::SystemPrompt,
                side: None,
            }],
        );
    }

    /// Set a lane's system prompt (system mode)
    pub fn set_system_prompt(&self, side: Side, text: impl Into<String>) {
        {
            let mut state = self.state.lock();
            let config = &mut state.system_config;
            match side {
                Side::Left => config.left_system_prompt = text.into(),
                Side::Right => config.right_system_prompt = text.into(),
            }
        }
        emit(
            &self.events,
            vec![ComparisonEvent::DraftChanged {
                mode: ComparisonMode::SystemPrompt,
                side: Some(side),
            }],
        );
    }

    /// Set a lane's pending user prompt (user mode)
    pub fn set_user_draft(&self, side: Side, text: impl Into<String>) {
        *self.state.lock().user_config.draft_mut(side) = text.into();
        emit(
            &self.events,
            vec![ComparisonEvent::DraftChanged {
                mode: ComparisonMode::UserPrompt,
                side: Some(side),
            }],
        );
    }

    /// Set the shared system prompt (user mode)
    pub fn set_shared_system_prompt(&self, text: impl Into<String>) {
        self.state.lock().user_config.shared_system_prompt = text.into();
        emit(
            &self.events,
            vec![ComparisonEvent::DraftChanged {
                mode: ComparisonMode::UserPrompt,
                side: None,
            }],
        );
    }

    // ============================================
    // Sending
    // ============================================

    /// Send the shared input to both lanes (system mode)
    ///
    /// No-op if the trimmed input is empty or either lane is busy. Both lane
    /// calls run concurrently; one failing does not affect the other.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if no provider/model is selected. State is
    /// left untouched in that case.
    pub async fn send_system_message(&self, attachments: &[Attachment]) -> Result<(), ValidationError> {
        let mode = ComparisonMode::SystemPrompt;
        let mut events = Vec::new();

        // Settings are read before locking; they may observe the controller
        let selection = resolve_selection(self.settings.as_ref());

        let (left, right) = {
            let mut state = self.state.lock();
            let input = state.system_config.shared_user_input.trim().to_string();
            if input.is_empty() {
                return Ok(());
            }
            if state.is_generating() {
                tracing::debug!("Shared send ignored, a lane is busy");
                return Ok(());
            }
            let selection = selection?;

            let (left_id, right_id) = MessageId::user_pair();
            let timestamp = now_ms();
            for (side, id) in [(Side::Left, left_id), (Side::Right, right_id)] {
                state
                    .store_mut(mode, side)
                    .push(ChatMessage::user(id.clone(), input.clone(), timestamp, attachments));
                events.push(ComparisonEvent::MessageAdded {
                    side,
                    mode,
                    message_id: id,
                    role: MessageRole::User,
                });
            }

            state.system_config.shared_user_input.clear();
            events.push(ComparisonEvent::DraftChanged { mode, side: None });

            let left = self.left.begin_call(&mut state, mode, selection.clone(), &mut events);
            let right = self.right.begin_call(&mut state, mode, selection, &mut events);
            (left, right)
        };
        emit(&self.events, events);

        let (left_ctx, left_request) = left;
        let (right_ctx, right_request) = right;
        futures::future::join(
            self.left.run(left_ctx, left_request),
            self.right.run(right_ctx, right_request),
        )
        .await;

        Ok(())
    }

    /// Send a lane's own draft (user mode)
    ///
    /// No-op if that lane's trimmed draft is empty or that lane is busy. The
    /// other lane may be busy.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if no provider/model is selected.
    pub async fn send_user_message(
        &self,
        side: Side,
        attachments: &[Attachment],
    ) -> Result<(), ValidationError> {
        let mode = ComparisonMode::UserPrompt;
        let mut events = Vec::new();

        let selection = resolve_selection(self.settings.as_ref());

        let (ctx, request) = {
            let mut state = self.state.lock();
            let input = state.user_config.draft(side).trim().to_string();
            if input.is_empty() {
                return Ok(());
            }
            if state.is_lane_generating(side) {
                tracing::debug!(side = %side, "Send ignored, lane is busy");
                return Ok(());
            }
            let selection = selection?;

            let id = MessageId::user(side);
            state
                .store_mut(mode, side)
                .push(ChatMessage::user(id.clone(), input, now_ms(), attachments));
            events.push(ComparisonEvent::MessageAdded {
                side,
                mode,
                message_id: id,
                role: MessageRole::User,
            });

            state.user_config.draft_mut(side).clear();
            events.push(ComparisonEvent::DraftChanged {
                mode,
                side: Some(side),
            });

            self.lane(side).begin_call(&mut state, mode, selection, &mut events)
        };
        emit(&self.events, events);

        self.lane(side).run(ctx, request).await;
        Ok(())
    }

    /// Send the left lane's draft (user mode)
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if no provider/model is selected.
    pub async fn send_left_user_message(&self, attachments: &[Attachment]) -> Result<(), ValidationError> {
        self.send_user_message(Side::Left, attachments).await
    }

    /// Send the right lane's draft (user mode)
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if no provider/model is selected.
    pub async fn send_right_user_message(&self, attachments: &[Attachment]) -> Result<(), ValidationError> {
        self.send_user_message(Side::Right, attachments).await
    }

    /// Replay a user turn
    ///
    /// Drops everything after the target, keeps the target and asks the model
    /// again. No-op unless the target is a user message in the lane's active
    /// log and the lane is idle.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if no provider/model is selected.
    pub async fn resend_message(&self, side: Side, message_id: &MessageId) -> Result<(), ValidationError> {
        self.replay(side, message_id, MessageRole::User).await
    }

    /// Regenerate an assistant turn
    ///
    /// Drops the target and everything after it, then asks the model again
    /// from the same preceding context. No-op unless the target is an
    /// assistant message in the lane's active log and the lane is idle.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if no provider/model is selected.
    pub async fn regenerate_assistant_message(
        &self,
        side: Side,
        message_id: &MessageId,
    ) -> Result<(), ValidationError> {
        self.replay(side, message_id, MessageRole::Assistant).await
    }

    async fn replay(
        &self,
        side: Side,
        message_id: &MessageId,
        role: MessageRole,
    ) -> Result<(), ValidationError> {
        let mut events = Vec::new();
        let selection = resolve_selection(self.settings.as_ref());

        let (ctx, request) = {
            let mut state = self.state.lock();
            let mode = state.mode;
            let found = state.store(mode, side).get(message_id).map(|m| m.role);
            if found != Some(role) || state.is_lane_generating(side) {
                return Ok(());
            }
            let selection = selection?;

            let store = state.store_mut(mode, side);
            let remaining = match role {
                MessageRole::Assistant => store.truncate_from(message_id),
                _ => store.truncate_after(message_id),
            }
            .unwrap_or_default();

            tracing::debug!(
                side = %side,
                mode = %mode,
                message_id = %message_id,
                remaining,
                "History truncated for replay"
            );
            events.push(ComparisonEvent::HistoryTruncated {
                side,
                mode,
                remaining,
            });

            self.lane(side).begin_call(&mut state, mode, selection, &mut events)
        };
        emit(&self.events, events);

        self.lane(side).run(ctx, request).await;
        Ok(())
    }

    /// Empty one lane's active log, or both
    ///
    /// Busy flags and configurations are left alone.
    pub fn clear_history(&self, side: Option<Side>) {
        let mode = {
            let mut state = self.state.lock();
            let mode = state.mode;
            for lane in Side::BOTH {
                if side.map_or(true, |s| s == lane) {
                    state.store_mut(mode, lane).clear();
                }
            }
            mode
        };

        tracing::debug!(side = ?side, mode = %mode, "History cleared");
        emit(&self.events, vec![ComparisonEvent::HistoryCleared { side, mode }]);
    }

    // ============================================
    // Editing
    // ============================================

    /// Open a user message for editing
    ///
    /// Returns false if the lane is busy or the target is not a user message.
    pub fn begin_edit(&self, side: Side, message_id: &MessageId) -> bool {
        self.edit(side, message_id, |store| store.begin_edit(message_id))
    }

    /// Abandon an edit, restoring the original content
    pub fn cancel_edit(&self, side: Side, message_id: &MessageId) -> bool {
        self.edit(side, message_id, |store| store.cancel_edit(message_id))
    }

    /// Replace a user message's content
    ///
    /// Usually followed by [`resend_message`](Self::resend_message).
    pub fn commit_edit(&self, side: Side, message_id: &MessageId, content: impl Into<String>) -> bool {
        let content = content.into();
        self.edit(side, message_id, move |store| store.commit_edit(message_id, content))
    }

    fn edit(
        &self,
        side: Side,
        message_id: &MessageId,
        apply: impl FnOnce(&mut crate::store::MessageStore) -> bool,
    ) -> bool {
        let applied = {
            let mut state = self.state.lock();
            if state.is_lane_generating(side) {
                return false;
            }
            let mode = state.mode;
            apply(state.store_mut(mode, side))
        };

        if applied {
            emit(
                &self.events,
                vec![ComparisonEvent::MessageEdited {
                    side,
                    message_id: message_id.clone(),
                }],
            );
        }
        applied
    }

    // ============================================
    // Export
    // ============================================

    /// Build the share payload for one lane's active conversation
    ///
    /// # Errors
    ///
    /// See [`ShareError`].
    pub fn share_payload(&self, side: Side, title: &str) -> Result<SharePayload, ShareError> {
        if title.trim().is_empty() {
            return Err(ShareError::EmptyTitle);
        }
        let selection = resolve_selection(self.settings.as_ref())?;

        let state = self.state.lock();
        let mode = state.mode;
        SharePayload::from_lane(
            title,
            state.system_prompt(mode, side),
            &selection,
            state.store(mode, side),
        )
    }

    // ============================================
    // Observation
    // ============================================

    /// Subscribe to state change events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ComparisonEvent> {
        self.events.subscribe()
    }

    /// Copy of the full state
    #[must_use]
    pub fn snapshot(&self) -> ComparisonState {
        self.state.lock().clone()
    }

    /// Active mode
    #[must_use]
    pub fn mode(&self) -> ComparisonMode {
        self.state.lock().mode
    }

    /// Whether either lane is busy
    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.state.lock().is_generating()
    }

    /// Whether the left lane is busy
    #[must_use]
    pub fn is_left_generating(&self) -> bool {
        self.state.lock().is_left_generating()
    }

    /// Whether the right lane is busy
    #[must_use]
    pub fn is_right_generating(&self) -> bool {
        self.state.lock().is_right_generating()
    }

    /// A lane's active-mode log
    #[must_use]
    pub fn messages(&self, side: Side) -> Vec<ChatMessage> {
        self.state.lock().active_store(side).messages().to_vec()
    }

    /// Current session id
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.state.lock().session_id.clone()
    }

    /// Controller settings
    #[must_use]
    pub fn config(&self) -> &ComparisonConfig {
        &self.config
    }
}
