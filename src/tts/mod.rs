//! Text-to-speech vendor adapters.
//!
//! Every vendor is normalized behind [`TtsProvider`]: one `synthesize` call
//! returns audio plus word timings and a duration, regardless of whether the
//! vendor reports real alignment or timings have to be estimated. Vendors
//! with progressive delivery also implement [`TtsProvider::synthesize_stream`].

pub mod elevenlabs;
pub mod openai;
pub mod timing;
pub mod wav;

use crate::config::{TtsBackend, TtsConfig};
use crate::error::{Result, SpeechError};
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

pub use elevenlabs::ElevenLabsTts;
pub use openai::OpenAiTts;
pub use timing::{TimingSource, WordTiming};

/// A synthesis request for one unit of text.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    /// Sanitized text to speak.
    pub text: String,
    /// Voice override (None = provider default).
    pub voice: Option<String>,
}

impl SynthesisRequest {
    /// Request with the provider's default voice.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: None,
        }
    }

    /// Override the voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }
}

/// Audio and timing produced by a batch synthesis call.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// Encoded audio bytes.
    pub audio: Vec<u8>,
    /// MIME type of `audio`.
    pub content_type: String,
    /// Word timings relative to the start of `audio`.
    pub word_timings: Vec<WordTiming>,
    /// Duration of `audio`: exact when the container tells us, estimated otherwise.
    pub estimated_duration_ms: f64,
    /// Whether `word_timings` are vendor alignment or an estimate.
    pub timing_source: TimingSource,
    /// Voice actually used.
    pub voice: String,
}

/// One progressively delivered piece of a sentence's audio.
#[derive(Debug, Clone)]
pub struct StreamedAudio {
    /// Encoded audio bytes.
    pub audio: Vec<u8>,
    /// MIME type of `audio`.
    pub content_type: String,
    /// Word timings relative to the start of this piece.
    pub word_timings: Vec<WordTiming>,
    /// Duration of this piece.
    pub duration_ms: f64,
}

/// A stream of progressively delivered audio.
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<StreamedAudio>> + Send>>;

/// Uniform synthesis contract implemented once per vendor.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Provider name for logs (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Synthesize a whole unit of text.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResult>;

    /// Whether [`synthesize_stream`](Self::synthesize_stream) delivers sub-sentence audio.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Synthesize with progressive delivery.
    async fn synthesize_stream(&self, _request: &SynthesisRequest) -> Result<AudioStream> {
        Err(SpeechError::Tts(format!(
            "{} does not support streaming synthesis",
            self.name()
        )))
    }
}

/// Apply estimated timings to a payload, correcting them against the
/// container's exact duration when the payload is WAV.
///
/// Returns the (possibly rescaled) timings and the resolved duration.
pub fn resolve_estimated_timing(
    audio: &[u8],
    estimate: timing::TimingEstimate,
) -> (Vec<WordTiming>, f64) {
    let mut words = estimate.words;
    if !wav::is_wav(audio) {
        return (words, estimate.duration_ms);
    }
    match wav::wav_duration_ms(audio) {
        Ok(true_ms) if true_ms > 0.0 => {
            debug!(
                estimated_ms = estimate.duration_ms,
                true_ms, "rescaling estimated word timings to WAV duration"
            );
            timing::scale_timings(&mut words, true_ms);
            (words, true_ms)
        }
        Ok(_) => (words, estimate.duration_ms),
        Err(e) => {
            warn!("could not read WAV duration, keeping estimate: {e}");
            (words, estimate.duration_ms)
        }
    }
}

/// Build the configured vendor adapter.
///
/// # Errors
///
/// Returns an error if the selected vendor is missing required settings.
pub fn build_provider(config: &TtsConfig) -> Result<Arc<dyn TtsProvider>> {
    match config.backend {
        TtsBackend::OpenAi => Ok(Arc::new(OpenAiTts::new(config)?)),
        TtsBackend::ElevenLabs => Ok(Arc::new(ElevenLabsTts::new(config)?)),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn estimated_timings_rescaled_for_wav() {
        // 1 s of silence at 24 kHz.
        let audio = wav::pcm16_to_wav(&vec![0u8; 48_000], 24_000).unwrap();
        let estimate = timing::estimate_word_timings("Take it one craving at a time.", 1.0);
        let (words, duration) = resolve_estimated_timing(&audio, estimate);
        assert!((duration - 1000.0).abs() < 1e-6);
        assert!((words.last().unwrap().end_ms - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn estimated_timings_rescaled_for_streamed_wav() {
        let mut audio = wav::pcm16_to_wav(&vec![0u8; 48_000], 24_000).unwrap();
        audio[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        let at = audio.windows(4).position(|w| w == b"data").unwrap();
        audio[at + 4..at + 8].copy_from_slice(&u32::MAX.to_le_bytes());
        let estimate = timing::estimate_word_timings("Take it one craving at a time.", 1.0);
        let (words, duration) = resolve_estimated_timing(&audio, estimate);
        assert!((duration - 1000.0).abs() < 1e-6);
        assert!((words.last().unwrap().end_ms - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn estimated_timings_kept_for_compressed_audio() {
        let estimate = timing::estimate_word_timings("Hello there.", 1.0);
        let expected = estimate.duration_ms;
        let (words, duration) = resolve_estimated_timing(b"\xFF\xFB\x90\x00mp3", estimate);
        assert_eq!(words.len(), 2);
        assert!((duration - expected).abs() < 1e-9);
    }

    #[test]
    fn build_provider_requires_key() {
        let config = TtsConfig {
            openai: crate::config::OpenAiTtsConfig {
                api_key: String::new(),
                api_key_env: None,
                ..Default::default()
            },
            ..TtsConfig::default()
        };
        assert!(build_provider(&config).is_err());
    }

    #[test]
    fn request_builder() {
        let req = SynthesisRequest::new("hi").with_voice("onyx");
        assert_eq!(req.voice.as_deref(), Some("onyx"));
    }
}
