//! ElevenLabs adapter with vendor word alignment.
//!
//! Uses the `with-timestamps` endpoints, which return base64 audio together
//! with per-character start/end times. Characters are aggregated into words
//! at whitespace transitions. Audio is requested as raw 24 kHz PCM and
//! wrapped into WAV so every chunk carries an exact duration.
//!
//! Batch: `POST /v1/text-to-speech/{voice}/with-timestamps` (one JSON object).
//! Streaming: `POST /v1/text-to-speech/{voice}/stream/with-timestamps`
//! (newline-delimited JSON objects, one per audio piece).

use crate::config::TtsConfig;
use crate::error::{Result, SpeechError};
use crate::tts::timing::{TimingSource, WordTiming, words_from_character_alignment};
use crate::tts::{AudioStream, StreamedAudio, SynthesisRequest, SynthesisResult, TtsProvider, wav};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Requested output format and its sample rate.
const OUTPUT_FORMAT: &str = "pcm_24000";
const PCM_SAMPLE_RATE: u32 = 24_000;

/// Adapter for the ElevenLabs text-to-speech API.
pub struct ElevenLabsTts {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
}

#[derive(Debug, Serialize)]
struct TtsBody<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// Character-level alignment as reported by the vendor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Alignment {
    /// One entry per character (may be multi-byte).
    #[serde(default)]
    pub characters: Vec<String>,
    /// Start time of each character in seconds.
    #[serde(default)]
    pub character_start_times_seconds: Vec<f64>,
    /// End time of each character in seconds.
    #[serde(default)]
    pub character_end_times_seconds: Vec<f64>,
}

impl Alignment {
    fn words(&self, base_ms: f64) -> Vec<WordTiming> {
        words_from_character_alignment(
            &self.characters,
            &self.character_start_times_seconds,
            &self.character_end_times_seconds,
            base_ms,
        )
    }
}

/// One response object (the whole batch response, or one streamed line).
#[derive(Debug, Deserialize)]
pub struct TimestampedAudio {
    /// Base64-encoded audio in the requested output format.
    #[serde(default)]
    pub audio_base64: String,
    /// Alignment of the original text.
    #[serde(default)]
    pub alignment: Option<Alignment>,
    /// Alignment of the vendor-normalized text.
    #[serde(default)]
    pub normalized_alignment: Option<Alignment>,
}

impl TimestampedAudio {
    fn decode_audio(&self) -> Result<Vec<u8>> {
        if self.audio_base64.is_empty() {
            return Ok(Vec::new());
        }
        BASE64
            .decode(self.audio_base64.as_bytes())
            .map_err(|e| SpeechError::Tts(format!("invalid base64 audio from ElevenLabs: {e}")))
    }

    fn alignment(&self) -> Option<&Alignment> {
        self.alignment.as_ref().or(self.normalized_alignment.as_ref())
    }
}

impl ElevenLabsTts {
    /// Create the adapter from TTS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no API key is configured or the client cannot be built.
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let cfg = &config.elevenlabs;
        let api_key = cfg.resolved_api_key();
        if api_key.is_empty() {
            return Err(SpeechError::Config(
                "ElevenLabs TTS requires tts.elevenlabs.api_key or its env var".into(),
            ));
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
        })
    }

    fn voice_for<'a>(&'a self, request: &'a SynthesisRequest) -> &'a str {
        request.voice.as_deref().unwrap_or(&self.voice)
    }

    async fn post(&self, path: &str, text: &str) -> Result<reqwest::Response> {
        let url = format!("{}{path}?output_format={OUTPUT_FORMAT}", self.base_url);
        let response = self
            .client
            .post(url)
            .header("xi-api-key", &self.api_key)
            .json(&TtsBody {
                text,
                model_id: &self.model,
            })
            .send()
            .await
            .map_err(|e| SpeechError::Tts(format!("ElevenLabs request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Tts(format!(
                "ElevenLabs returned {status}: {body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl TtsProvider for ElevenLabsTts {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResult> {
        let voice = self.voice_for(request).to_owned();
        let response = self
            .post(&format!("/v1/text-to-speech/{voice}/with-timestamps"), &request.text)
            .await?;
        let payload: TimestampedAudio = response
            .json()
            .await
            .map_err(|e| SpeechError::Tts(format!("invalid ElevenLabs response: {e}")))?;

        let pcm = payload.decode_audio()?;
        if pcm.len() < 2 {
            return Err(SpeechError::Tts("ElevenLabs returned empty audio".into()));
        }
        let word_timings = payload.alignment().map(|a| a.words(0.0)).unwrap_or_default();
        let duration_ms = wav::pcm16_duration_ms(pcm.len(), PCM_SAMPLE_RATE);
        let audio = wav::pcm16_to_wav(&pcm, PCM_SAMPLE_RATE)?;
        debug!(duration_ms, words = word_timings.len(), "ElevenLabs synthesized");

        Ok(SynthesisResult {
            audio,
            content_type: "audio/wav".to_owned(),
            word_timings,
            estimated_duration_ms: duration_ms,
            timing_source: TimingSource::Actual,
            voice,
        })
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn synthesize_stream(&self, request: &SynthesisRequest) -> Result<AudioStream> {
        let voice = self.voice_for(request).to_owned();
        let response = self
            .post(
                &format!("/v1/text-to-speech/{voice}/stream/with-timestamps"),
                &request.text,
            )
            .await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut lines = JsonLineBuffer::default();
            let mut pieces = PieceAssembler::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(SpeechError::Tts(format!("ElevenLabs stream read failed: {e}")));
                        return;
                    }
                };
                for line in lines.push(&chunk) {
                    match pieces.accept(&line) {
                        Ok(Some(piece)) => yield Ok(piece),
                        Ok(None) => {}
                        Err(e) => yield Err(e),
                    }
                }
            }
            if let Some(line) = lines.finish() {
                match pieces.accept(&line) {
                    Ok(Some(piece)) => yield Ok(piece),
                    Ok(None) => {}
                    Err(e) => yield Err(e),
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Splits a byte stream into complete newline-terminated lines.
#[derive(Debug, Default)]
struct JsonLineBuffer {
    pending: Vec<u8>,
}

impl JsonLineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).trim().to_owned();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let text = String::from_utf8_lossy(&std::mem::take(&mut self.pending))
            .trim()
            .to_owned();
        (!text.is_empty()).then_some(text)
    }
}

/// Turns streamed response objects into self-contained WAV pieces.
///
/// Alignment times are relative to the start of the sentence's audio; each
/// piece's words are re-based onto that piece. PCM bytes split across
/// objects are carried to the next piece.
#[derive(Debug, Default)]
struct PieceAssembler {
    elapsed_ms: f64,
    carry: Option<u8>,
    orphan_words: Vec<WordTiming>,
}

impl PieceAssembler {
    fn accept(&mut self, line: &str) -> Result<Option<StreamedAudio>> {
        let object: TimestampedAudio = serde_json::from_str(line)
            .map_err(|e| SpeechError::Tts(format!("invalid ElevenLabs stream line: {e}")))?;

        let mut pcm = Vec::new();
        if let Some(b) = self.carry.take() {
            pcm.push(b);
        }
        pcm.extend(object.decode_audio()?);
        if pcm.len() % 2 == 1 {
            self.carry = pcm.pop();
        }

        let mut words = std::mem::take(&mut self.orphan_words);
        if let Some(alignment) = object.alignment() {
            words.extend(alignment.words(self.elapsed_ms));
        }

        if pcm.is_empty() {
            if !words.is_empty() {
                warn!(
                    words = words.len(),
                    "alignment without audio, attaching to next piece"
                );
                // Already relative to the next piece's start; elapsed is unchanged.
                self.orphan_words = words;
            }
            return Ok(None);
        }

        let duration_ms = wav::pcm16_duration_ms(pcm.len(), PCM_SAMPLE_RATE);
        let audio = wav::pcm16_to_wav(&pcm, PCM_SAMPLE_RATE)?;
        let word_timings = words
            .into_iter()
            .map(|mut w| {
                w.start_ms = w.start_ms.min(duration_ms);
                w.end_ms = w.end_ms.clamp(w.start_ms, duration_ms.max(w.start_ms));
                w
            })
            .collect();
        self.elapsed_ms += duration_ms;

        Ok(Some(StreamedAudio {
            audio,
            content_type: "audio/wav".to_owned(),
            word_timings,
            duration_ms,
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn line(pcm_len: usize, text: &str, start: f64, step: f64) -> String {
        let chars: Vec<String> = text.chars().map(String::from).collect();
        let starts: Vec<f64> = (0..chars.len()).map(|i| start + i as f64 * step).collect();
        let ends: Vec<f64> = starts.iter().map(|s| s + step).collect();
        serde_json::json!({
            "audio_base64": BASE64.encode(vec![0u8; pcm_len]),
            "alignment": {
                "characters": chars,
                "character_start_times_seconds": starts,
                "character_end_times_seconds": ends,
            }
        })
        .to_string()
    }

    #[test]
    fn line_buffer_handles_split_lines() {
        let mut buf = JsonLineBuffer::default();
        assert!(buf.push(b"{\"a\":").is_empty());
        assert_eq!(buf.push(b"1}\n{\"b\""), vec!["{\"a\":1}"]);
        assert_eq!(buf.push(b":2}\n\n"), vec!["{\"b\":2}"]);
        assert!(buf.finish().is_none());
    }

    #[test]
    fn line_buffer_flushes_unterminated_line() {
        let mut buf = JsonLineBuffer::default();
        buf.push(b"{\"c\":3}");
        assert_eq!(buf.finish().as_deref(), Some("{\"c\":3}"));
    }

    #[test]
    fn pieces_are_rebased() {
        let mut asm = PieceAssembler::default();
        // 12_000 bytes = 6_000 samples = 250 ms
        let first = asm.accept(&line(12_000, "Hi", 0.0, 0.1)).unwrap().unwrap();
        assert!((first.duration_ms - 250.0).abs() < 1e-9);
        assert_eq!(first.word_timings[0].word, "Hi");
        assert!(wav::is_wav(&first.audio));

        let second = asm.accept(&line(12_000, "yo", 0.25, 0.05)).unwrap().unwrap();
        assert_eq!(second.word_timings[0].word, "yo");
        assert!(second.word_timings[0].start_ms.abs() < 1e-6);
        assert!((second.word_timings[0].end_ms - 100.0).abs() < 1e-6);
    }

    #[test]
    fn odd_pcm_byte_carried() {
        let mut asm = PieceAssembler::default();
        let a = asm.accept(&line(3, "a", 0.0, 0.0)).unwrap().unwrap();
        assert!((a.duration_ms - wav::pcm16_duration_ms(2, PCM_SAMPLE_RATE)).abs() < 1e-9);
        let b = asm.accept(&line(1, "b", 0.0, 0.0)).unwrap().unwrap();
        assert!((b.duration_ms - wav::pcm16_duration_ms(2, PCM_SAMPLE_RATE)).abs() < 1e-9);
    }

    #[test]
    fn alignment_only_line_attaches_to_next_piece() {
        let mut asm = PieceAssembler::default();
        assert!(asm.accept(&line(0, "Hey", 0.0, 0.01)).unwrap().is_none());
        let piece = asm.accept(&line(4_800, "", 0.0, 0.0)).unwrap().unwrap();
        assert_eq!(piece.word_timings.len(), 1);
        assert_eq!(piece.word_timings[0].word, "Hey");
    }

    #[test]
    fn malformed_line_is_error() {
        let mut asm = PieceAssembler::default();
        assert!(asm.accept("not json").is_err());
    }

    #[test]
    fn requires_api_key() {
        let mut config = TtsConfig::default();
        config.elevenlabs.api_key = String::new();
        config.elevenlabs.api_key_env = None;
        assert!(ElevenLabsTts::new(&config).is_err());
    }
}
