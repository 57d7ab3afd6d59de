//! Shared test infrastructure: a scripted in-memory backend and event helpers
//!
//! Nothing here sleeps. Held streams wait on a [`Gate`] the test opens, and
//! tests observe progress through controller events.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};

use duet_core::backend::{LlmResponse, ModelInfo};
use duet_core::{
    ComparisonController, ComparisonEvent, ComparisonState, LlmBackend, LlmRequest, MessageRole,
    ProviderInfo, StaticSettings, StreamingToken,
};

// =============================================================================
// Gate
// =============================================================================

/// A one-way latch that held streams wait on
#[derive(Clone)]
pub struct Gate {
    tx: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Let every current and future waiter through
    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

// =============================================================================
// Scripted Backend
// =============================================================================

/// What the backend does for a matching request
#[derive(Clone)]
pub enum Script {
    /// Stream these chunks, then complete with their concatenation
    Reply(Vec<String>),
    /// Stream these chunks, then wait for the gate before completing
    Hold(Vec<String>, Gate),
    /// Stream these chunks, then report an error
    Fail(Vec<String>, String),
    /// Refuse to start the call
    Refuse(String),
    /// Stream these chunks, then close the channel without completing
    Hangup(Vec<String>),
}

/// How a rule picks requests
#[derive(Clone)]
enum Match {
    LastTurn(String),
    System(String),
}

impl Match {
    fn matches(&self, request: &LlmRequest) -> bool {
        match self {
            Self::LastTurn(text) => request.messages.last().is_some_and(|t| &t.content == text),
            Self::System(prompt) => request.system_prompt() == Some(prompt.as_str()),
        }
    }
}

/// In-memory backend matched by request content
///
/// Unmatched requests reply with `"<system>|<last turn>"`, streamed in three
/// chunks.
#[derive(Default)]
pub struct ScriptedBackend {
    rules: Mutex<Vec<(Match, Script)>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script requests whose last turn has this content
    pub fn on_turn(&self, content: &str, script: Script) {
        self.rules
            .lock()
            .push((Match::LastTurn(content.to_string()), script));
    }

    /// Script requests with this system prompt
    pub fn on_system(&self, prompt: &str, script: Script) {
        self.rules
            .lock()
            .push((Match::System(prompt.to_string()), script));
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }

    /// Requests whose system prompt is `prompt`
    pub fn requests_for(&self, prompt: &str) -> Vec<LlmRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.system_prompt() == Some(prompt))
            .collect()
    }

    fn script_for(&self, request: &LlmRequest) -> Script {
        self.requests.lock().push(request.clone());
        self.rules
            .lock()
            .iter()
            .find(|(m, _)| m.matches(request))
            .map(|(_, s)| s.clone())
            .unwrap_or_else(|| Script::Reply(default_chunks(request)))
    }
}

fn default_chunks(request: &LlmRequest) -> Vec<String> {
    let system = request.system_prompt().unwrap_or_default().to_string();
    let last = request
        .messages
        .last()
        .map(|t| t.content.clone())
        .unwrap_or_default();
    vec![system, "|".to_string(), last]
}

/// The text an unscripted call ends with
pub fn default_reply(system: &str, last: &str) -> String {
    format!("{system}|{last}")
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let script = self.script_for(request);
        let (tx, rx) = mpsc::channel(64);

        match script {
            Script::Refuse(reason) => anyhow::bail!(reason),
            Script::Reply(chunks) => {
                let full = chunks.concat();
                for chunk in chunks {
                    tx.send(StreamingToken::Token(chunk)).await?;
                }
                tx.send(StreamingToken::Complete { message: full }).await?;
            }
            Script::Fail(chunks, error) => {
                for chunk in chunks {
                    tx.send(StreamingToken::Token(chunk)).await?;
                }
                tx.send(StreamingToken::Error(error)).await?;
            }
            Script::Hangup(chunks) => {
                for chunk in chunks {
                    tx.send(StreamingToken::Token(chunk)).await?;
                }
            }
            Script::Hold(chunks, gate) => {
                tokio::spawn(async move {
                    let full = chunks.concat();
                    for chunk in chunks {
                        if tx.send(StreamingToken::Token(chunk)).await.is_err() {
                            return;
                        }
                    }
                    gate.wait().await;
                    let _ = tx.send(StreamingToken::Complete { message: full }).await;
                });
            }
        }

        Ok(rx)
    }

    async fn send(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse> {
        let content = match self.script_for(request) {
            Script::Reply(chunks) | Script::Hangup(chunks) => chunks.concat(),
            Script::Hold(chunks, gate) => {
                gate.wait().await;
                chunks.concat()
            }
            Script::Fail(_, error) | Script::Refuse(error) => anyhow::bail!(error),
        };

        Ok(LlmResponse {
            content,
            model: request.model.clone(),
            tokens_used: None,
            duration_ms: None,
        })
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            name: "test-model".to_string(),
            size: None,
            parameters: None,
        }])
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn provider() -> ProviderInfo {
    ProviderInfo::new("scripted", "Scripted")
}

pub fn settings() -> Arc<StaticSettings> {
    Arc::new(StaticSettings::selected(provider(), "test-model"))
}

pub fn controller(
    backend: &Arc<ScriptedBackend>,
    settings: &Arc<StaticSettings>,
) -> ComparisonController<ScriptedBackend> {
    ComparisonController::with_defaults(Arc::clone(backend), settings.clone())
}

pub fn chunks(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| (*p).to_string()).collect()
}

/// Roles and contents of a request, system turn included
pub fn turns(request: &LlmRequest) -> Vec<(MessageRole, String)> {
    request
        .messages
        .iter()
        .map(|t| (t.role, t.content.clone()))
        .collect()
}

// =============================================================================
// Event Helpers
// =============================================================================

/// Wait until `condition` holds for the controller state
///
/// Re-checks after every event, so it never misses a transition that already
/// happened.
pub async fn until<B, F>(
    rx: &mut broadcast::Receiver<ComparisonEvent>,
    controller: &ComparisonController<B>,
    condition: F,
) where
    B: LlmBackend + ?Sized,
    F: Fn(&ComparisonState) -> bool,
{
    loop {
        if condition(&controller.snapshot()) {
            return;
        }
        match rx.recv().await {
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
        }
    }
}

/// Drain every event currently buffered
pub fn drain(rx: &mut broadcast::Receiver<ComparisonEvent>) -> Vec<ComparisonEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
