//! Lane Coordinator
//!
//! Runs the model-call lifecycle for one side of the comparison.
//!
//! # Design Philosophy
//!
//! Every call carries an explicit [`CallContext`]: the lane, the mode whose log
//! it writes to, the id of its placeholder and the lane epoch it started in.
//! Each write re-locates the placeholder by id and checks the epoch under the
//! state lock, so two calls can never write through the same binding and a call
//! orphaned by `init*`/`reset()` can never touch the new session.
//!
//! The lock is only ever taken in short synchronous sections. No guard lives
//! across an `.await`.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::backend::{ChatTurn, LlmBackend, LlmRequest, ProviderError, StreamingToken};
use crate::messages::{ComparisonEvent, ComparisonMode, MessageId, MessageRole, Side};
use crate::settings::Selection;
use crate::state::ComparisonState;
use crate::store::ChatMessage;

/// Shared handle to the comparison state
pub(crate) type SharedState = Arc<Mutex<ComparisonState>>;

/// Content written into a placeholder whose call was dropped mid-flight
pub const INTERRUPTED: &str = "generation interrupted";

/// Per-call binding between a model call and the message it fills
#[derive(Clone, Debug, PartialEq)]
pub struct CallContext {
    /// Lane the call belongs to
    pub side: Side,
    /// Mode whose log holds the placeholder
    pub mode: ComparisonMode,
    /// The placeholder assistant message
    pub message_id: MessageId,
    /// Lane epoch when the call started
    pub epoch: u64,
    /// Provider/model captured when the call started
    pub selection: Selection,
}

/// How a call ended
#[derive(Debug)]
enum CallOutcome {
    /// Final text arrived
    Completed(String),
    /// The provider failed
    Failed(ProviderError),
    /// The lane moved to a newer epoch while the call was running
    Abandoned,
}

/// Publish events, ignoring the no-subscriber case
pub(crate) fn emit(events: &broadcast::Sender<ComparisonEvent>, batch: Vec<ComparisonEvent>) {
    for event in batch {
        let _ = events.send(event);
    }
}

/// Coordinates model calls for one lane
pub(crate) struct LaneCoordinator<B: LlmBackend + ?Sized> {
    side: Side,
    backend: Arc<B>,
    state: SharedState,
    events: broadcast::Sender<ComparisonEvent>,
    error_marker: Arc<str>,
}

impl<B: LlmBackend + ?Sized> LaneCoordinator<B> {
    pub(crate) fn new(
        side: Side,
        backend: Arc<B>,
        state: SharedState,
        events: broadcast::Sender<ComparisonEvent>,
        error_marker: Arc<str>,
    ) -> Self {
        Self {
            side,
            backend,
            state,
            events,
            error_marker,
        }
    }

    /// Start a call inside the caller's critical section
    ///
    /// Sets the busy flag, snapshots the outgoing request from the lane's log
    /// and appends the streaming placeholder. The request therefore never
    /// contains the placeholder itself.
    pub(crate) fn begin_call(
        &self,
        state: &mut ComparisonState,
        mode: ComparisonMode,
        selection: Selection,
        events: &mut Vec<ComparisonEvent>,
    ) -> (CallContext, LlmRequest) {
        let side = self.side;

        let lane = state.lane_mut(side);
        lane.generating = true;
        let epoch = lane.epoch;

        let mut request = LlmRequest::for_selection(&selection).with_turn(ChatTurn::new(
            MessageRole::System,
            state.system_prompt(mode, side),
        ));
        for message in state.store(mode, side) {
            request = request.with_turn(
                ChatTurn::new(message.role, message.content.clone())
                    .with_attachments(message.attachments.clone()),
            );
        }

        let message_id = MessageId::assistant(side);
        state
            .store_mut(mode, side)
            .push(ChatMessage::placeholder(message_id.clone()));

        events.push(ComparisonEvent::Generating {
            side,
            generating: true,
        });
        events.push(ComparisonEvent::MessageAdded {
            side,
            mode,
            message_id: message_id.clone(),
            role: MessageRole::Assistant,
        });

        tracing::debug!(
            side = %side,
            mode = %mode,
            message_id = %message_id,
            epoch,
            turns = request.messages.len(),
            model = %selection.model,
            "Lane call started"
        );

        (
            CallContext {
                side,
                mode,
                message_id,
                epoch,
                selection,
            },
            request,
        )
    }

    /// Run a started call to its end
    ///
    /// Never fails: provider errors are rendered into the placeholder. The
    /// busy flag is released when this future completes or is dropped.
    pub(crate) async fn run(&self, ctx: CallContext, request: LlmRequest) {
        let _guard = BusyGuard {
            state: &self.state,
            events: &self.events,
            error_marker: &self.error_marker,
            ctx: &ctx,
        };

        let outcome = if ctx.selection.stream {
            self.stream(&ctx, &request).await
        } else {
            self.send_batch(&request).await
        };

        self.settle(&ctx, outcome);
    }

    async fn stream(&self, ctx: &CallContext, request: &LlmRequest) -> CallOutcome {
        let mut rx = match self.backend.send_streaming(request).await {
            Ok(rx) => rx,
            Err(e) => return CallOutcome::Failed(ProviderError::Backend(e)),
        };

        while let Some(token) = rx.recv().await {
            match token {
                StreamingToken::Token(text) => {
                    if !self.apply_chunk(ctx, text) {
                        return CallOutcome::Abandoned;
                    }
                }
                StreamingToken::Complete { message } => return CallOutcome::Completed(message),
                StreamingToken::Error(e) => return CallOutcome::Failed(ProviderError::Stream(e)),
            }
        }

        CallOutcome::Failed(ProviderError::Disconnected)
    }

    async fn send_batch(&self, request: &LlmRequest) -> CallOutcome {
        match self.backend.send(request).await {
            Ok(response) => CallOutcome::Completed(response.content),
            Err(e) => CallOutcome::Failed(ProviderError::Backend(e)),
        }
    }

    /// Append one chunk to the bound placeholder
    ///
    /// Returns false once the call is stale.
    fn apply_chunk(&self, ctx: &CallContext, text: String) -> bool {
        let event = {
            let mut state = self.state.lock();
            if state.lane(ctx.side).epoch != ctx.epoch {
                tracing::debug!(side = %ctx.side, message_id = %ctx.message_id, "Stale call, dropping stream");
                return false;
            }
            if !state
                .store_mut(ctx.mode, ctx.side)
                .append_chunk(&ctx.message_id, &text)
            {
                // Placeholder cleared by clear_history; keep draining
                return true;
            }
            ComparisonEvent::Token {
                side: ctx.side,
                message_id: ctx.message_id.clone(),
                text,
            }
        };

        tracing::trace!(side = %ctx.side, message_id = %ctx.message_id, "Chunk applied");
        emit(&self.events, vec![event]);
        true
    }

    /// Write the final outcome into the placeholder
    fn settle(&self, ctx: &CallContext, outcome: CallOutcome) {
        let event = {
            let mut state = self.state.lock();
            if state.lane(ctx.side).epoch != ctx.epoch {
                tracing::debug!(side = %ctx.side, message_id = %ctx.message_id, "Discarding stale completion");
                return;
            }
            let Some(message) = state.store_mut(ctx.mode, ctx.side).get_mut(&ctx.message_id) else {
                tracing::debug!(side = %ctx.side, message_id = %ctx.message_id, "Placeholder gone, completion dropped");
                return;
            };

            match outcome {
                CallOutcome::Completed(final_content) => {
                    message.complete(final_content.clone());
                    tracing::debug!(
                        side = %ctx.side,
                        message_id = %ctx.message_id,
                        chars = final_content.len(),
                        "Lane call completed"
                    );
                    ComparisonEvent::StreamEnd {
                        side: ctx.side,
                        message_id: ctx.message_id.clone(),
                        final_content,
                    }
                }
                CallOutcome::Failed(error) => {
                    let error = error.to_string();
                    message.fail(&self.error_marker, &error);
                    tracing::warn!(
                        side = %ctx.side,
                        message_id = %ctx.message_id,
                        provider = %ctx.selection.provider.id,
                        error = %error,
                        "Lane call failed"
                    );
                    ComparisonEvent::StreamError {
                        side: ctx.side,
                        message_id: ctx.message_id.clone(),
                        error,
                    }
                }
                CallOutcome::Abandoned => return,
            }
        };

        emit(&self.events, vec![event]);
    }
}

/// Releases a lane's busy flag on every exit path
///
/// If the call never settled (its future was dropped), the placeholder is
/// closed with an interruption error first.
struct BusyGuard<'a> {
    state: &'a SharedState,
    events: &'a broadcast::Sender<ComparisonEvent>,
    error_marker: &'a str,
    ctx: &'a CallContext,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let ctx = self.ctx;
        let mut batch = Vec::new();
        {
            let mut state = self.state.lock();
            if state.lane(ctx.side).epoch != ctx.epoch {
                return;
            }

            if let Some(message) = state
                .store_mut(ctx.mode, ctx.side)
                .get_mut(&ctx.message_id)
                .filter(|m| m.is_streaming)
            {
                message.fail(self.error_marker, INTERRUPTED);
                tracing::debug!(side = %ctx.side, message_id = %ctx.message_id, "Call dropped mid-flight");
                batch.push(ComparisonEvent::StreamError {
                    side: ctx.side,
                    message_id: ctx.message_id.clone(),
                    error: INTERRUPTED.to_string(),
                });
            }

            state.lane_mut(ctx.side).generating = false;
            batch.push(ComparisonEvent::Generating {
                side: ctx.side,
                generating: false,
            });
        }
        emit(self.events, batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LlmResponse, ModelInfo};
    use crate::settings::ProviderInfo;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Streams fixed chunks, or fails every call
    struct FixedBackend {
        chunks: Vec<&'static str>,
        fail: bool,
    }

    #[async_trait]
    impl LlmBackend for FixedBackend {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn send_streaming(
            &self,
            _request: &LlmRequest,
        ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
            if self.fail {
                anyhow::bail!("connection refused");
            }
            let (tx, rx) = mpsc::channel(16);
            let mut full = String::new();
            for chunk in &self.chunks {
                full.push_str(chunk);
                tx.send(StreamingToken::Token(chunk.to_string())).await?;
            }
            tx.send(StreamingToken::Complete { message: full }).await?;
            Ok(rx)
        }

        async fn send(&self, _request: &LlmRequest) -> anyhow::Result<LlmResponse> {
            Ok(LlmResponse {
                content: self.chunks.concat(),
                model: "m".to_string(),
                tokens_used: None,
                duration_ms: None,
            })
        }

        async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }
    }

    fn selection(stream: bool) -> Selection {
        Selection {
            provider: ProviderInfo::new("fixed", "Fixed"),
            model: "m".to_string(),
            stream,
        }
    }

    fn lane(backend: FixedBackend) -> (LaneCoordinator<FixedBackend>, SharedState) {
        let state = SharedState::default();
        let (tx, _) = broadcast::channel(64);
        let lane = LaneCoordinator::new(
            Side::Left,
            Arc::new(backend),
            state.clone(),
            tx,
            Arc::from("ERR: "),
        );
        (lane, state)
    }

    fn start(
        lane: &LaneCoordinator<FixedBackend>,
        state: &SharedState,
        stream: bool,
    ) -> (CallContext, LlmRequest) {
        let mut st = state.lock();
        st.system_config.left_system_prompt = "sys".to_string();
        st.left_messages
            .push(ChatMessage::user(MessageId::user(Side::Left), "hi", 0, &[]));
        lane.begin_call(
            &mut st,
            ComparisonMode::SystemPrompt,
            selection(stream),
            &mut Vec::new(),
        )
    }

    #[test]
    fn test_begin_call_excludes_placeholder() {
        let (lane, state) = lane(FixedBackend {
            chunks: vec![],
            fail: false,
        });
        let (ctx, request) = start(&lane, &state, true);

        let st = state.lock();
        assert!(st.is_left_generating());
        assert_eq!(st.left_messages.len(), 2);
        assert!(st.left_messages.get(&ctx.message_id).unwrap().is_streaming);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.system_prompt(), Some("sys"));
        assert_eq!(request.messages[1].content, "hi");
    }

    #[tokio::test]
    async fn test_run_streams_into_placeholder() {
        let (lane, state) = lane(FixedBackend {
            chunks: vec!["Hel", "lo"],
            fail: false,
        });
        let (ctx, request) = start(&lane, &state, true);
        lane.run(ctx.clone(), request).await;

        let st = state.lock();
        let msg = st.left_messages.get(&ctx.message_id).unwrap();
        assert_eq!(msg.content, "Hello");
        assert!(!msg.is_streaming);
        assert!(!st.is_left_generating());
    }

    #[tokio::test]
    async fn test_run_non_streaming() {
        let (lane, state) = lane(FixedBackend {
            chunks: vec!["all ", "at once"],
            fail: false,
        });
        let (ctx, request) = start(&lane, &state, false);
        lane.run(ctx.clone(), request).await;

        let st = state.lock();
        assert_eq!(st.left_messages.get(&ctx.message_id).unwrap().content, "all at once");
    }

    #[tokio::test]
    async fn test_run_failure_renders_marker() {
        let (lane, state) = lane(FixedBackend {
            chunks: vec![],
            fail: true,
        });
        let (ctx, request) = start(&lane, &state, true);
        lane.run(ctx.clone(), request).await;

        let st = state.lock();
        let msg = st.left_messages.get(&ctx.message_id).unwrap();
        assert_eq!(msg.content, "ERR: connection refused");
        assert!(!msg.is_streaming);
        assert!(!st.is_left_generating());
    }

    #[tokio::test]
    async fn test_stale_call_writes_nothing() {
        let (lane, state) = lane(FixedBackend {
            chunks: vec!["late"],
            fail: false,
        });
        let (ctx, request) = start(&lane, &state, true);
        {
            let mut st = state.lock();
            st.invalidate_lanes();
            // a newer call owns the flag now
            st.left.generating = true;
        }
        lane.run(ctx.clone(), request).await;

        let st = state.lock();
        let msg = st.left_messages.get(&ctx.message_id).unwrap();
        assert!(msg.content.is_empty());
        assert!(st.is_left_generating());
    }

    #[test]
    fn test_guard_finalizes_unsettled_placeholder() {
        let (lane, state) = lane(FixedBackend {
            chunks: vec![],
            fail: false,
        });
        let (ctx, _request) = start(&lane, &state, true);
        drop(BusyGuard {
            state: &lane.state,
            events: &lane.events,
            error_marker: &lane.error_marker,
            ctx: &ctx,
        });

        let st = state.lock();
        let msg = st.left_messages.get(&ctx.message_id).unwrap();
        assert_eq!(msg.content, format!("ERR: {INTERRUPTED}"));
        assert!(!st.is_left_generating());
    }
}
