//! Word-level timing: estimation, correction, and vendor alignment.
//!
//! Timings are relative to the start of the audio chunk they belong to.
//! Within a chunk they satisfy `0 <= start_ms <= end_ms` and are
//! non-decreasing in array order.

use serde::{Deserialize, Serialize};

/// Baseline speaking rate used for estimation.
pub const BASE_WORDS_PER_MINUTE: f64 = 150.0;

/// Pause inserted after `.`, `!` or `?`.
pub const SENTENCE_PAUSE_MS: f64 = 300.0;

/// Pause inserted after `,`, `;` or `:`.
pub const CLAUSE_PAUSE_MS: f64 = 150.0;

/// Words longer than this many characters are spoken more slowly.
const LONG_WORD_CHARS: usize = 8;

/// Words shorter than this many characters are spoken faster.
const SHORT_WORD_CHARS: usize = 3;

/// One word and the span of audio in which it is spoken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordTiming {
    /// The word as it appears in the text (punctuation included).
    pub word: String,
    /// Start offset in milliseconds.
    pub start_ms: f64,
    /// End offset in milliseconds.
    pub end_ms: f64,
}

impl WordTiming {
    /// Create a timing entry.
    pub fn new(word: impl Into<String>, start_ms: f64, end_ms: f64) -> Self {
        Self {
            word: word.into(),
            start_ms,
            end_ms,
        }
    }

    /// Copy of this timing shifted by `offset_ms`.
    pub fn shifted(&self, offset_ms: f64) -> Self {
        Self {
            word: self.word.clone(),
            start_ms: self.start_ms + offset_ms,
            end_ms: self.end_ms + offset_ms,
        }
    }
}

/// Where a set of word timings came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingSource {
    /// Vendor-provided alignment.
    Actual,
    /// Computed from a speaking-rate model.
    Estimated,
}

/// Estimated timings and total duration for a piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingEstimate {
    /// Per-word timings.
    pub words: Vec<WordTiming>,
    /// Total estimated duration, trailing pause included.
    pub duration_ms: f64,
}

/// Estimate word timings from a words-per-minute model.
///
/// `speed` is the vendor speed multiplier (1.0 = 150 WPM). Long words take
/// ×1.2, short words ×0.8, and punctuation inserts a pause after the word.
pub fn estimate_word_timings(text: &str, speed: f32) -> TimingEstimate {
    let speed = if speed.is_finite() && speed > 0.0 {
        f64::from(speed)
    } else {
        1.0
    };
    let base_ms = 60_000.0 / (BASE_WORDS_PER_MINUTE * speed);

    let mut words = Vec::new();
    let mut cursor = 0.0;
    for word in text.split_whitespace() {
        let letters = word.chars().filter(|c| c.is_alphanumeric()).count();
        let factor = if letters > LONG_WORD_CHARS {
            1.2
        } else if letters < SHORT_WORD_CHARS {
            0.8
        } else {
            1.0
        };
        let end = cursor + base_ms * factor;
        words.push(WordTiming::new(word, cursor, end));
        cursor = end;

        match word.chars().last() {
            Some('.' | '!' | '?') => cursor += SENTENCE_PAUSE_MS / speed,
            Some(',' | ';' | ':') => cursor += CLAUSE_PAUSE_MS / speed,
            _ => {}
        }
    }

    TimingEstimate {
        words,
        duration_ms: cursor,
    }
}

/// Rescale timings so the final word ends exactly at `true_duration_ms`.
///
/// Every start and end is multiplied by `true_duration_ms / last_end`. Leaves
/// the input untouched when there is nothing meaningful to scale against.
pub fn scale_timings(words: &mut [WordTiming], true_duration_ms: f64) {
    let Some(last_end) = words.last().map(|w| w.end_ms) else {
        return;
    };
    if last_end <= 0.0 || !true_duration_ms.is_finite() || true_duration_ms <= 0.0 {
        return;
    }
    let ratio = true_duration_ms / last_end;
    for w in words.iter_mut() {
        w.start_ms *= ratio;
        w.end_ms *= ratio;
    }
}

/// Aggregate per-character alignment into word timings.
///
/// A word starts at the first non-whitespace character after whitespace and
/// ends at the last character before the next whitespace. Times are in
/// seconds, as vendors report them; `base_ms` is subtracted from every
/// result (clamped at zero) to re-base alignment onto a sub-chunk.
pub fn words_from_character_alignment(
    characters: &[String],
    starts_secs: &[f64],
    ends_secs: &[f64],
    base_ms: f64,
) -> Vec<WordTiming> {
    let n = characters.len().min(starts_secs.len()).min(ends_secs.len());
    let mut words = Vec::new();
    let mut current: Option<WordTiming> = None;

    for i in 0..n {
        let ch = &characters[i];
        let start = (starts_secs[i] * 1000.0 - base_ms).max(0.0);
        let end = (ends_secs[i] * 1000.0 - base_ms).max(start);

        if ch.trim().is_empty() {
            if let Some(w) = current.take() {
                words.push(w);
            }
            continue;
        }

        match current.as_mut() {
            Some(w) => {
                w.word.push_str(ch);
                w.end_ms = w.end_ms.max(end);
            }
            None => current = Some(WordTiming::new(ch.clone(), start, end)),
        }
    }
    if let Some(w) = current {
        words.push(w);
    }

    enforce_monotonic(&mut words);
    words
}

/// Clamp timings so starts never go backwards and `start <= end`.
pub fn enforce_monotonic(words: &mut [WordTiming]) {
    let mut floor = 0.0_f64;
    for w in words.iter_mut() {
        w.start_ms = w.start_ms.max(floor).max(0.0);
        w.end_ms = w.end_ms.max(w.start_ms);
        floor = w.start_ms;
    }
}
