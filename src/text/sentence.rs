//! Incremental sentence segmentation over a live token stream.
//!
//! A sentence ends at a run of terminal punctuation (`.`, `!`, `?`) that is
//! followed by whitespace. The end of the stream also terminates a sentence,
//! but that case is only known once the producer is finished, so it is
//! handled by [`SentenceDetector::flush`].

/// Returns `true` for sentence-terminal punctuation.
fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Find the end of the first complete sentence in `text`.
///
/// Returns the byte index just past the terminal punctuation run, or `None`
/// if no run is followed by whitespace yet. A run with nothing but
/// whitespace or punctuation before it does not close a sentence; it stays
/// attached to the text that follows.
fn find_sentence_end(text: &str) -> Option<usize> {
    let mut has_content = false;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !is_terminal(c) {
            if !c.is_whitespace() {
                has_content = true;
            }
            continue;
        }

        // Consume the whole punctuation run ("...", "?!").
        let mut run_end = text.len();
        while let Some(&(i, next)) = chars.peek() {
            if is_terminal(next) {
                chars.next();
            } else {
                run_end = i;
                break;
            }
        }

        let followed_by_space = text[run_end..]
            .chars()
            .next()
            .is_some_and(char::is_whitespace);
        if has_content && followed_by_space {
            return Some(run_end);
        }
    }
    None
}

/// Accumulates LLM tokens and yields sentences as soon as they are complete.
#[derive(Debug, Default, Clone)]
pub struct SentenceDetector {
    buffer: String,
}

impl SentenceDetector {
    /// Create an empty detector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a token and return every sentence it completed, in order.
    ///
    /// A single token may complete zero, one, or several sentences
    /// (`"Yes. No. "`).
    pub fn add_token(&mut self, token: &str) -> Vec<String> {
        self.buffer.push_str(token);

        let mut sentences = Vec::new();
        while let Some(end) = find_sentence_end(&self.buffer) {
            let sentence = self.buffer[..end].trim().to_owned();
            self.buffer.drain(..end);
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
        }
        sentences
    }

    /// Emit whatever remains in the buffer, trimmed, and clear it.
    ///
    /// Call once after the token stream ends so a trailing sentence without
    /// terminal punctuation is not lost.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_owned())
        }
    }

    /// Discard buffered text.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Text received but not yet emitted as a sentence.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

/// Split a complete text into sentences in one pass.
///
/// Equivalent to feeding `text` to a [`SentenceDetector`] in any tokenization
/// and then flushing.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut detector = SentenceDetector::new();
    let mut sentences = detector.add_token(text);
    sentences.extend(detector.flush());
    sentences
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn feed(tokens: &[&str]) -> Vec<String> {
        let mut d = SentenceDetector::new();
        let mut out = Vec::new();
        for t in tokens {
            out.extend(d.add_token(t));
        }
        out.extend(d.flush());
        out
    }

    #[test]
    fn emits_sentence_once_followed_by_space() {
        let mut d = SentenceDetector::new();
        assert!(d.add_token("Hello there.").is_empty());
        assert_eq!(d.add_token(" How"), vec!["Hello there."]);
        assert_eq!(d.pending(), " How");
    }

    #[test]
    fn single_token_completes_several_sentences() {
        let mut d = SentenceDetector::new();
        assert_eq!(d.add_token("Yes. No. Maybe"), vec!["Yes.", "No."]);
        assert_eq!(d.flush().as_deref(), Some("Maybe"));
    }

    #[test]
    fn repeated_punctuation_is_one_boundary() {
        assert_eq!(
            feed(&["Wait", "...", " Really", "?!", " Yes", "."]),
            vec!["Wait...", "Really?!", "Yes."]
        );
    }

    #[test]
    fn punctuation_split_across_tokens_is_not_premature() {
        assert_eq!(feed(&["Hmm", ".", ".", ". Okay"]), vec!["Hmm...", "Okay"]);
    }

    #[test]
    fn decimal_numbers_do_not_split() {
        assert_eq!(
            feed(&["You saved 3", ".5 hours. Nice"]),
            vec!["You saved 3.5 hours.", "Nice"]
        );
    }

    #[test]
    fn bare_punctuation_attaches_to_next_sentence() {
        assert_eq!(split_sentences("Yes. ... No."), vec!["Yes.", "... No."]);
    }

    #[test]
    fn newline_counts_as_whitespace() {
        assert_eq!(split_sentences("One!\nTwo?"), vec!["One!", "Two?"]);
    }

    #[test]
    fn flush_without_remainder_is_none() {
        let mut d = SentenceDetector::new();
        assert_eq!(d.add_token("Done. "), vec!["Done."]);
        assert!(d.flush().is_none());
    }

    #[test]
    fn flush_trims_and_clears() {
        let mut d = SentenceDetector::new();
        d.add_token("  trailing words  ");
        assert_eq!(d.flush().as_deref(), Some("trailing words"));
        assert!(d.flush().is_none());
    }

    #[test]
    fn reset_discards_buffer() {
        let mut d = SentenceDetector::new();
        d.add_token("half a sent");
        d.reset();
        assert!(d.flush().is_none());
    }

    #[test]
    fn tokenization_does_not_change_sentences() {
        let text = "First sentence. Second one! Is this the third? Yes... \
                    Final words without a stop";
        let expected = split_sentences(text);
        assert_eq!(expected.len(), 5);

        // Every split into two tokens, and one-character tokens.
        for cut in 0..=text.len() {
            if !text.is_char_boundary(cut) {
                continue;
            }
            assert_eq!(feed(&[&text[..cut], &text[cut..]]), expected, "cut at {cut}");
        }
        let chars: Vec<String> = text.chars().map(String::from).collect();
        let refs: Vec<&str> = chars.iter().map(String::as_str).collect();
        assert_eq!(feed(&refs), expected);
    }

    #[test]
    fn multibyte_text_is_safe() {
        assert_eq!(
            split_sentences("Très bien. ¿Qué tal? 好的。"),
            vec!["Très bien.", "¿Qué tal?", "好的。"]
        );
    }
}
