//! OpenAI-compatible speech adapter (`POST /v1/audio/speech`).
//!
//! The endpoint returns audio only, so word timings are always estimated.
//! When the payload is WAV (or raw PCM, which is wrapped into WAV here) the
//! estimate is rescaled to the exact duration from the header. Self-hosted
//! OpenAI-compatible TTS servers work by pointing `base_url` at them.

use crate::config::TtsConfig;
use crate::error::{Result, SpeechError};
use crate::tts::timing::{TimingSource, estimate_word_timings};
use crate::tts::{SynthesisRequest, SynthesisResult, TtsProvider, resolve_estimated_timing, wav};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Sample rate of OpenAI `pcm` output.
const PCM_SAMPLE_RATE: u32 = 24_000;

/// Hosted endpoint; requires an API key.
const OPENAI_HOST: &str = "api.openai.com";

/// Adapter for OpenAI-compatible speech endpoints.
pub struct OpenAiTts {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    response_format: String,
    speed: f32,
}

#[derive(Debug, Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
    speed: f32,
}

impl OpenAiTts {
    /// Create the adapter from TTS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the hosted endpoint is selected without an API key,
    /// the response format is unknown, or the HTTP client cannot be built.
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let cfg = &config.openai;
        let api_key = cfg.resolved_api_key();
        if api_key.is_empty() && cfg.base_url.contains(OPENAI_HOST) {
            return Err(SpeechError::Config(
                "OpenAI TTS requires tts.openai.api_key or its env var".into(),
            ));
        }
        let response_format = cfg.response_format.to_ascii_lowercase();
        if content_type_for(&response_format).is_none() {
            return Err(SpeechError::Config(format!(
                "unsupported OpenAI response_format '{response_format}'"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .map_err(|e| SpeechError::Tts(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key,
            model: cfg.model.clone(),
            voice: config.voice.clone(),
            response_format,
            speed: config.speed.clamp(0.25, 4.0),
        })
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.strip_suffix("/v1").unwrap_or(&self.base_url);
        format!("{base}/v1/audio/speech")
    }
}

/// MIME type of each supported `response_format` as delivered downstream.
fn content_type_for(format: &str) -> Option<&'static str> {
    match format {
        "mp3" => Some("audio/mpeg"),
        "wav" | "pcm" => Some("audio/wav"),
        "opus" => Some("audio/ogg"),
        "aac" => Some("audio/aac"),
        "flac" => Some("audio/flac"),
        _ => None,
    }
}

#[async_trait]
impl TtsProvider for OpenAiTts {
    fn name(&self) -> &str {
        "openai"
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResult> {
        let voice = request.voice.as_deref().unwrap_or(&self.voice);
        let body = SpeechBody {
            model: &self.model,
            input: &request.text,
            voice,
            response_format: &self.response_format,
            speed: self.speed,
        };

        let mut req = self.client.post(self.endpoint()).json(&body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| SpeechError::Tts(format!("OpenAI TTS request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SpeechError::Tts(format!(
                "OpenAI TTS returned {status}: {text}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SpeechError::Tts(format!("OpenAI TTS body read failed: {e}")))?;

        let audio = if self.response_format == "pcm" {
            wav::pcm16_to_wav(&bytes, PCM_SAMPLE_RATE)?
        } else {
            bytes.to_vec()
        };
        if audio.is_empty() {
            return Err(SpeechError::Tts("OpenAI TTS returned empty audio".into()));
        }

        let estimate = estimate_word_timings(&request.text, self.speed);
        let (word_timings, duration_ms) = resolve_estimated_timing(&audio, estimate);
        debug!(
            bytes = audio.len(),
            duration_ms,
            words = word_timings.len(),
            "OpenAI TTS synthesized"
        );

        let content_type = content_type_for(&self.response_format)
            .unwrap_or("application/octet-stream")
            .to_owned();

        Ok(SynthesisResult {
            audio,
            content_type,
            word_timings,
            estimated_duration_ms: duration_ms,
            timing_source: TimingSource::Estimated,
            voice: voice.to_owned(),
        })
    }
}
