//! Ollama Backend Implementation
//!
//! Reference model-call collaborator for a local Ollama server.
//!
//! # Ollama API
//!
//! - `/api/chat` - Chat completions with message history (streaming or batch)
//! - `/api/tags` - List available models
//!
//! Streaming responses are newline-delimited JSON objects carrying
//! `message.content` until one arrives with `done: true`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::BackendConfig;

use super::traits::{ChatTurn, LlmBackend, LlmRequest, LlmResponse, ModelInfo, StreamingToken};

/// Ollama backend client
#[derive(Clone)]
pub struct OllamaBackend {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// HTTP client
    http_client: reqwest::Client,
}

/// One parsed line of a streamed chat response
#[derive(Debug, PartialEq, Eq)]
enum ChatLine {
    /// Content chunk (may be empty on the final line)
    Chunk { text: String, done: bool },
    /// The server reported an error
    Error(String),
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_timeout(host, port, Duration::from_secs(120))
    }

    /// Create a new Ollama backend with a request timeout
    pub fn with_timeout(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            host: host.into(),
            port,
            http_client,
        }
    }

    /// Create a backend from configuration
    #[must_use]
    pub fn from_config(config: &BackendConfig) -> Self {
        Self::with_timeout(config.host.clone(), config.port, config.timeout)
    }

    /// Get the base URL
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get chat endpoint URL
    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url())
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Build the `/api/chat` request body
    fn build_chat_body(request: &LlmRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(Self::turn_to_json).collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": stream,
        });

        let mut options = serde_json::Map::new();
        if let Some(temperature) = request.temperature {
            options.insert("temperature".to_string(), json!(temperature));
        }
        if request.max_tokens > 0 {
            options.insert("num_predict".to_string(), json!(request.max_tokens));
        }
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }

        body
    }

    /// Convert one turn, splitting image attachments from inline text
    fn turn_to_json(turn: &ChatTurn) -> Value {
        let mut content = turn.content.clone();
        let mut images = Vec::new();

        for attachment in &turn.attachments {
            if attachment.is_image() {
                images.push(Value::String(attachment.data.clone()));
            } else {
                content.push_str(&format!(
                    "\n\n[Attachment: {}]\n{}",
                    attachment.name, attachment.data
                ));
            }
        }

        let mut value = json!({
            "role": turn.role.as_str(),
            "content": content,
        });
        if !images.is_empty() {
            value["images"] = Value::Array(images);
        }
        value
    }

    /// Forward a newline-delimited chat body to the token channel
    async fn pump_stream<S, B, E>(mut stream: S, tx: mpsc::Sender<StreamingToken>)
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        // Bytes, not text: a chunk may end inside a multi-byte character
        let mut buffer: Vec<u8> = Vec::new();
        let mut full_response = String::new();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                    return;
                }
            };
            buffer.extend_from_slice(bytes.as_ref());

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if Self::forward_line(&line, &mut full_response, &tx).await {
                    return;
                }
            }
        }

        // The last line may arrive without a trailing newline
        if !buffer.is_empty() && Self::forward_line(&buffer, &mut full_response, &tx).await {
            return;
        }

        // Stream ended without done signal: the receiver sees a disconnect
        tracing::debug!(
            received = full_response.len(),
            "Ollama stream closed without done"
        );
    }

    /// Send one line's tokens, returns true once the stream is finished
    async fn forward_line(
        line: &[u8],
        full_response: &mut String,
        tx: &mpsc::Sender<StreamingToken>,
    ) -> bool {
        let line = String::from_utf8_lossy(line);
        match Self::parse_chat_line(line.trim()) {
            Some(ChatLine::Chunk { text, done }) => {
                if !text.is_empty() {
                    full_response.push_str(&text);
                    if tx.send(StreamingToken::Token(text)).await.is_err() {
                        // Receiver dropped, stop streaming
                        return true;
                    }
                }
                if done {
                    let _ = tx
                        .send(StreamingToken::Complete {
                            message: std::mem::take(full_response),
                        })
                        .await;
                }
                done
            }
            Some(ChatLine::Error(error)) => {
                let _ = tx.send(StreamingToken::Error(error)).await;
                true
            }
            None => false,
        }
    }

    /// Parse one NDJSON line of a chat stream
    fn parse_chat_line(line: &str) -> Option<ChatLine> {
        let data: Value = serde_json::from_str(line).ok()?;

        if let Some(error) = data.get("error").and_then(Value::as_str) {
            return Some(ChatLine::Error(error.to_string()));
        }

        let text = data
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let done = data.get("done").and_then(Value::as_bool).unwrap_or(false);

        Some(ChatLine::Chunk { text, done })
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new("localhost", 11434)
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }

    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let (tx, rx) = mpsc::channel(100);

        let response = self
            .http_client
            .post(self.chat_url())
            .json(&Self::build_chat_body(request, true))
            .send()
            .await?;

        // Check for HTTP errors
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }

        tokio::spawn(Self::pump_stream(response.bytes_stream(), tx));

        Ok(rx)
    }

    async fn send(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse> {
        let start = Instant::now();

        let response = self
            .http_client
            .post(self.chat_url())
            .json(&Self::build_chat_body(request, false))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }

        let data: Value = response.json().await?;

        if let Some(error) = data.get("error").and_then(Value::as_str) {
            anyhow::bail!("Ollama error: {error}");
        }

        let content = data
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let tokens_used = data
            .get("eval_count")
            .and_then(Value::as_u64)
            .map(|c| c as u32);

        Ok(LlmResponse {
            content,
            model: request.model.clone(),
            tokens_used,
            duration_ms: Some(start.elapsed().as_millis() as u64),
        })
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let response = self
            .http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }

        let data: Value = response.json().await?;

        let models = data
            .get("models")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| {
                        let name = m.get("name")?.as_str()?.to_string();
                        let size = m.get("size").and_then(Value::as_u64);
                        let parameters = m
                            .get("details")
                            .and_then(|d| d.get("parameter_size"))
                            .and_then(Value::as_str)
                            .map(String::from);

                        Some(ModelInfo {
                            name,
                            size,
                            parameters,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageRole;
    use crate::settings::ProviderInfo;
    use crate::store::Attachment;

    fn request() -> LlmRequest {
        LlmRequest::new(ProviderInfo::new("ollama", "Ollama"), "llama3.2")
            .with_turn(ChatTurn::new(MessageRole::System, "Be brief"))
            .with_turn(ChatTurn::new(MessageRole::User, "Hello"))
    }

    #[test]
    fn test_ollama_backend_creation() {
        let backend = OllamaBackend::new("localhost", 11434);
        assert_eq!(backend.host, "localhost");
        assert_eq!(backend.port, 11434);
        assert_eq!(backend.chat_url(), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_from_config() {
        let config = BackendConfig {
            host: "gpu-box".to_string(),
            port: 11500,
            timeout: Duration::from_secs(5),
        };
        let backend = OllamaBackend::from_config(&config);
        assert_eq!(backend.tags_url(), "http://gpu-box:11500/api/tags");
    }

    #[test]
    fn test_chat_body_shape() {
        let body = OllamaBackend::build_chat_body(&request(), true);
        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "Be brief");
        assert_eq!(body["messages"][1]["role"], "user");
        assert!(body.get("options").is_none());
    }

    #[test]
    fn test_chat_body_options() {
        let body =
            OllamaBackend::build_chat_body(&request().with_temperature(0.2).with_max_tokens(64), false);
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 64);
        assert!(body["options"]["temperature"].is_number());
    }

    #[test]
    fn test_attachments_split_by_type() {
        let turn = ChatTurn::new(MessageRole::User, "Look").with_attachments(vec![
            Attachment::new("cat.png", "image/png", "aGVsbG8="),
            Attachment::new("notes.txt", "text/plain", "remember"),
        ]);
        let value = OllamaBackend::turn_to_json(&turn);
        assert_eq!(value["images"][0], "aGVsbG8=");
        assert_eq!(value["content"], "Look\n\n[Attachment: notes.txt]\nremember");
    }

    #[test]
    fn test_parse_chat_lines() {
        assert_eq!(
            OllamaBackend::parse_chat_line(
                r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#
            ),
            Some(ChatLine::Chunk {
                text: "Hi".to_string(),
                done: false
            })
        );
        assert_eq!(
            OllamaBackend::parse_chat_line(r#"{"done":true,"eval_count":3}"#),
            Some(ChatLine::Chunk {
                text: String::new(),
                done: true
            })
        );
        assert_eq!(
            OllamaBackend::parse_chat_line(r#"{"error":"model not found"}"#),
            Some(ChatLine::Error("model not found".to_string()))
        );
        assert_eq!(OllamaBackend::parse_chat_line("not json"), None);
    }

    fn body(parts: &[&'static str]) -> impl Stream<Item = Result<&'static [u8], std::io::Error>> + Unpin {
        futures::stream::iter(parts.iter().map(|p| Ok(p.as_bytes())).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_stream_completes_on_unterminated_done_line() {
        let (tx, mut rx) = mpsc::channel(8);
        OllamaBackend::pump_stream(
            body(&[
                "{\"message\":{\"content\":\"Hi\"},\"done\":false}\n{\"message\":{\"content\":\" there\"},",
                "\"done\":true}",
            ]),
            tx,
        )
        .await;

        assert_eq!(rx.recv().await, Some(StreamingToken::Token("Hi".to_string())));
        assert_eq!(rx.recv().await, Some(StreamingToken::Token(" there".to_string())));
        assert_eq!(
            rx.recv().await,
            Some(StreamingToken::Complete {
                message: "Hi there".to_string()
            })
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_stream_without_done_closes_channel() {
        let (tx, mut rx) = mpsc::channel(8);
        OllamaBackend::pump_stream(body(&["{\"message\":{\"content\":\"cut\"},\"done\":false}"]), tx).await;

        assert_eq!(rx.recv().await, Some(StreamingToken::Token("cut".to_string())));
        assert_eq!(rx.recv().await, None);
    }
}
