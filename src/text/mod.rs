//! Text processing for speech: sentence segmentation and sanitization.

pub mod sanitize;
pub mod sentence;

pub use sanitize::{contains_session_complete, sanitize_for_tts};
pub use sentence::{SentenceDetector, split_sentences};
