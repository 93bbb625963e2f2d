//! OpenAI-compatible chat completions token source.
//!
//! Works with any server implementing `POST /v1/chat/completions` with
//! `stream: true` (OpenAI, Ollama, vLLM, llama.cpp server, …). Text deltas
//! arrive as `data: {...}` frames terminated by `data: [DONE]`.

use crate::config::LlmConfig;
use crate::error::{Result, SpeechError};
use crate::llm::{ChatMessage, LlmEvent, TokenSource, TokenStream};
use crate::transport::sse::SseLineParser;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use tracing::{debug, warn};

/// Token source backed by an OpenAI-compatible HTTP API.
pub struct OpenAiTokenSource {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
    temperature: f64,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<&'a ChatMessage>,
    stream: bool,
    temperature: f64,
    max_tokens: usize,
}

impl OpenAiTokenSource {
    /// Create a token source from LLM configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SpeechError::Llm(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            api_key: config.resolved_api_key(),
            model: config.api_model.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn endpoint(&self) -> String {
        let base = self.api_url.strip_suffix("/v1").unwrap_or(&self.api_url);
        format!("{base}/v1/chat/completions")
    }
}

/// What one `data:` payload contributed.
#[derive(Debug, PartialEq)]
enum Delta {
    Text(String),
    Error(String),
    Nothing,
}

fn parse_completion_chunk(data: &str) -> Delta {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            warn!("skipping malformed completion chunk: {e}");
            return Delta::Nothing;
        }
    };
    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_owned)
            .unwrap_or_else(|| err.to_string());
        return Delta::Error(message);
    }
    match value
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
    {
        Some(text) if !text.is_empty() => Delta::Text(text.to_owned()),
        _ => Delta::Nothing,
    }
}

#[async_trait]
impl TokenSource for OpenAiTokenSource {
    async fn stream(&self, messages: &[ChatMessage]) -> TokenStream {
        let system = ChatMessage {
            role: "system".to_owned(),
            content: self.system_prompt.clone(),
        };
        let mut all: Vec<&ChatMessage> = Vec::with_capacity(messages.len() + 1);
        if !self.system_prompt.is_empty() {
            all.push(&system);
        }
        all.extend(messages.iter());

        let body = CompletionBody {
            model: &self.model,
            messages: all,
            stream: true,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut request = self.client.post(self.endpoint()).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                let event = LlmEvent::error(format!("LLM request failed: {e}"));
                return Box::pin(futures_util::stream::once(async move { event }));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let event = LlmEvent::Error {
                message: format!("LLM returned {status}: {text}"),
                status: Some(status.as_u16()),
                status_text: status.canonical_reason().map(str::to_owned),
            };
            return Box::pin(futures_util::stream::once(async move { event }));
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut parser = SseLineParser::new();
            let mut full = String::new();

            loop {
                let (frames, ended) = match bytes.next().await {
                    Some(Ok(chunk)) => (parser.push(&chunk), false),
                    Some(Err(e)) => {
                        yield LlmEvent::error(format!("LLM stream read failed: {e}"));
                        return;
                    }
                    None => (parser.finish().into_iter().collect::<Vec<_>>(), true),
                };
                for frame in frames {
                    if frame.is_done() {
                        debug!(chars = full.len(), "LLM stream complete");
                        yield LlmEvent::Complete(full);
                        return;
                    }
                    match parse_completion_chunk(&frame.data) {
                        Delta::Text(text) => {
                            full.push_str(&text);
                            yield LlmEvent::Token(text);
                        }
                        Delta::Error(message) => {
                            yield LlmEvent::error(message);
                            return;
                        }
                        Delta::Nothing => {}
                    }
                }
                if ended {
                    break;
                }
            }
            debug!(chars = full.len(), "LLM stream ended without [DONE]");
            yield LlmEvent::Complete(full);
        };
        Box::pin(stream)
    }
}
