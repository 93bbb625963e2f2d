//! LLM token sources.
//!
//! The streaming pipeline treats the language model as an opaque, ordered
//! producer of text tokens ending in either completion or an error.

pub mod openai;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub use openai::OpenAiTokenSource;

/// One event from a token source.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    /// A text fragment, in generation order.
    Token(String),
    /// Generation finished. Carries the full response text.
    Complete(String),
    /// Generation failed. No further events follow.
    Error {
        /// Human-readable message.
        message: String,
        /// Upstream HTTP status, when the failure was an HTTP error.
        status: Option<u16>,
        /// Upstream HTTP reason phrase.
        status_text: Option<String>,
    },
}

impl LlmEvent {
    /// Error without HTTP status.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            status: None,
            status_text: None,
        }
    }
}

/// Ordered stream of [`LlmEvent`]s for one turn.
pub type TokenStream = Pin<Box<dyn Stream<Item = LlmEvent> + Send>>;

/// A message in the conversation so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_owned(),
            content: content.into(),
        }
    }

    /// Assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_owned(),
            content: content.into(),
        }
    }
}

/// Producer of LLM tokens for one conversational turn.
///
/// Connection failures are reported as a single [`LlmEvent::Error`] on the
/// returned stream rather than as a `Result`, so callers handle every
/// failure in one place.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Start generating a reply to `messages` (oldest first).
    async fn stream(&self, messages: &[ChatMessage]) -> TokenStream;
}
