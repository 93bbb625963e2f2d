//! Message types passed between pipeline stages.

use crate::tts::WordTiming;
use serde::{Deserialize, Serialize};

/// One sentence (or the final flushed remainder) submitted for synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisUnit {
    /// Sequence number assigned when the unit was enqueued.
    pub index: u64,
    /// Text as produced by the LLM.
    pub text: String,
    /// Text after system-token and markdown removal.
    pub sanitized: String,
    /// Whether this is the last unit of the response.
    pub is_last: bool,
}

/// Synthesized audio for one position on the response timeline, as sent
/// to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunk {
    /// Position in emission order (0, 1, 2, …).
    pub chunk_index: u64,
    /// Encoded audio, standard base64. Empty for completion markers.
    pub audio_base64: String,
    /// MIME type of the decoded audio.
    pub content_type: String,
    /// Word timings relative to the start of this chunk.
    pub word_timings: Vec<WordTiming>,
    /// Sum of `duration_ms` of every earlier chunk.
    pub cumulative_offset_ms: f64,
    /// Duration of this chunk's audio.
    pub duration_ms: f64,
    /// No more audio follows this chunk.
    pub is_last: bool,
    /// Display text; empty for follow-up sub-chunks of a sentence.
    pub text: String,
}

impl AudioChunk {
    /// A zero-duration chunk that only signals the end of audio.
    pub fn completion_marker(chunk_index: u64, cumulative_offset_ms: f64) -> Self {
        Self {
            chunk_index,
            audio_base64: String::new(),
            content_type: String::new(),
            word_timings: Vec::new(),
            cumulative_offset_ms,
            duration_ms: 0.0,
            is_last: true,
            text: String::new(),
        }
    }

    /// Whether this chunk carries no audio.
    pub fn is_marker(&self) -> bool {
        self.audio_base64.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn chunk_uses_wire_field_names() {
        let chunk = AudioChunk {
            chunk_index: 2,
            audio_base64: "AAAA".into(),
            content_type: "audio/mpeg".into(),
            word_timings: vec![WordTiming::new("Hi.", 0.0, 320.0)],
            cumulative_offset_ms: 1500.0,
            duration_ms: 620.0,
            is_last: false,
            text: "Hi.".into(),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["chunkIndex"], 2);
        assert_eq!(json["audioBase64"], "AAAA");
        assert_eq!(json["contentType"], "audio/mpeg");
        assert_eq!(json["cumulativeOffsetMs"], 1500.0);
        assert_eq!(json["durationMs"], 620.0);
        assert_eq!(json["isLast"], false);
        assert_eq!(json["wordTimings"][0]["endMs"], 320.0);
    }

    #[test]
    fn marker_is_empty_and_last() {
        let marker = AudioChunk::completion_marker(4, 2000.0);
        assert!(marker.is_marker());
        assert!(marker.is_last);
        assert_eq!(marker.duration_ms, 0.0);
        assert_eq!(marker.cumulative_offset_ms, 2000.0);
    }
}
