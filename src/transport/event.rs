//! Events multiplexed onto one response stream.

use crate::error::{Result, SpeechError};
use crate::pipeline::messages::AudioChunk;
use serde::{Deserialize, Serialize};

/// One event of a streamed turn, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// An LLM text token.
    Token {
        /// Token text.
        token: String,
        /// Conversation the turn belongs to.
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    /// Synthesized audio for one timeline position.
    AudioChunk {
        /// The chunk payload.
        chunk: AudioChunk,
    },
    /// The turn finished; no more events follow.
    Done {
        /// Always `true`.
        done: bool,
        /// Conversation the turn belongs to.
        #[serde(rename = "conversationId")]
        conversation_id: String,
        /// The reply contained the session-complete token.
        #[serde(rename = "sessionComplete")]
        session_complete: bool,
        /// Audio was delivered sentence-by-sentence during generation.
        #[serde(rename = "streamingTTS")]
        streaming_tts: bool,
    },
    /// The turn failed upstream.
    Error {
        /// Human-readable message.
        error: String,
        /// Upstream HTTP status, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        /// Upstream HTTP status text, when known.
        #[serde(
            rename = "statusText",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        status_text: Option<String>,
        /// Conversation the turn belongs to.
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
}

impl StreamEvent {
    /// Token event.
    pub fn token(token: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self::Token {
            token: token.into(),
            conversation_id: conversation_id.into(),
        }
    }

    /// Completion event.
    pub fn done(conversation_id: impl Into<String>, session_complete: bool, streaming_tts: bool) -> Self {
        Self::Done {
            done: true,
            conversation_id: conversation_id.into(),
            session_complete,
            streaming_tts,
        }
    }

    /// Error event without upstream status.
    pub fn error(error: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
            status: None,
            status_text: None,
            conversation_id: conversation_id.into(),
        }
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// JSON body of the event.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (non-finite numbers).
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SpeechError::Transport(e.to_string()))
    }

    /// Full wire frame: `data: {json}` followed by a blank line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_sse_frame(&self) -> Result<String> {
        Ok(format!("data: {}\n\n", self.to_json()?))
    }

    /// Parse the `data` payload of one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a known event.
    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data).map_err(|e| SpeechError::Transport(format!("bad event: {e}")))
    }
}
