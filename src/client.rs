//! Consumer side of the chat stream.
//!
//! Posts one turn to `POST /api/chat/stream`, reads the `data: {json}`
//! frames as they arrive, hands text tokens to a callback and audio chunks
//! to a [`StreamingAudioQueue`].

use crate::error::{Result, SpeechError};
use crate::llm::ChatMessage;
use crate::playback::StreamingAudioQueue;
use crate::transport::event::StreamEvent;
use crate::transport::sse::SseLineParser;
use futures_util::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Request body for one turn.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub history: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

impl ChatTurn {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// What the server sent for one turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    /// Conversation id echoed by the server.
    pub conversation_id: String,
    /// Concatenated text tokens.
    pub text: String,
    /// Audio chunks handed to the playback queue, markers included.
    pub audio_chunks: usize,
    /// The reply ended the coaching session.
    pub session_complete: bool,
    /// Audio arrived sentence by sentence during generation.
    pub streaming_tts: bool,
    /// Upstream failure reported by an `error` event.
    pub error: Option<String>,
}

/// HTTP client for the chat stream endpoint.
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    queue: Option<StreamingAudioQueue>,
}

impl ChatClient {
    /// Client for the server at `base_url` (e.g. `http://127.0.0.1:8787`).
    /// Without a queue, audio chunks are counted and dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, queue: Option<StreamingAudioQueue>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| SpeechError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            queue,
        })
    }

    pub fn queue(&self) -> Option<&StreamingAudioQueue> {
        self.queue.as_ref()
    }

    /// Stream one turn, calling `on_token` for each text token.
    ///
    /// Playback state from the previous turn is cleared first. Returns
    /// once the `done` or `error` event arrives or the stream ends; audio
    /// may still be playing.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the server answers with a
    /// non-success status (429 maps to [`SpeechError::RateLimited`]), or a
    /// frame is not a valid event.
    pub async fn stream_turn(
        &self,
        turn: &ChatTurn,
        mut on_token: impl FnMut(&str) + Send,
    ) -> Result<TurnOutcome> {
        if let Some(queue) = &self.queue {
            queue.reset_playback_state();
        }

        let url = format!("{}/api/chat/stream", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(turn)
            .send()
            .await
            .map_err(|e| SpeechError::Transport(format!("chat request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return Err(SpeechError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Transport(format!(
                "chat stream returned {status}: {body}"
            )));
        }

        let mut outcome = TurnOutcome {
            conversation_id: turn.conversation_id.clone().unwrap_or_default(),
            ..TurnOutcome::default()
        };
        let mut parser = SseLineParser::new();
        let mut body = response.bytes_stream();

        while let Some(bytes) = body.next().await {
            let bytes =
                bytes.map_err(|e| SpeechError::Transport(format!("chat stream read failed: {e}")))?;
            for frame in parser.push(&bytes) {
                if self.apply(&frame.data, &mut outcome, &mut on_token).await? {
                    return Ok(outcome);
                }
            }
        }
        if let Some(frame) = parser.finish() {
            self.apply(&frame.data, &mut outcome, &mut on_token).await?;
        }
        warn!("chat stream ended without a done event");
        Ok(outcome)
    }

    /// Apply one frame. Returns `true` on a terminal event.
    async fn apply(
        &self,
        data: &str,
        outcome: &mut TurnOutcome,
        on_token: &mut (impl FnMut(&str) + Send),
    ) -> Result<bool> {
        if data.trim().is_empty() {
            return Ok(false);
        }
        let event = StreamEvent::from_json(data)?;
        let terminal = event.is_terminal();
        match event {
            StreamEvent::Token {
                token,
                conversation_id,
            } => {
                outcome.conversation_id = conversation_id;
                on_token(&token);
                outcome.text.push_str(&token);
            }
            StreamEvent::AudioChunk { chunk } => {
                outcome.audio_chunks += 1;
                debug!(
                    chunk_index = chunk.chunk_index,
                    offset_ms = chunk.cumulative_offset_ms,
                    is_last = chunk.is_last,
                    "audio chunk received"
                );
                if let Some(queue) = &self.queue
                    && let Err(e) = queue.enqueue_chunk(&chunk).await
                {
                    warn!(chunk_index = chunk.chunk_index, "failed to enqueue chunk: {e}");
                }
            }
            StreamEvent::Done {
                conversation_id,
                session_complete,
                streaming_tts,
                ..
            } => {
                info!(conversation_id = %conversation_id, session_complete, "turn done");
                outcome.conversation_id = conversation_id;
                outcome.session_complete = session_complete;
                outcome.streaming_tts = streaming_tts;
            }
            StreamEvent::Error {
                error,
                status,
                conversation_id,
                ..
            } => {
                warn!(conversation_id = %conversation_id, ?status, "turn failed: {error}");
                outcome.conversation_id = conversation_id;
                outcome.error = Some(error);
            }
        }
        Ok(terminal)
    }
}
