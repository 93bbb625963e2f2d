//! Speech sanitization: turn assistant markdown into plain speakable text.
//!
//! Applied to every unit before it reaches a TTS vendor:
//! 1. Drop bracketed system tokens and vocal directions (`[SESSION_COMPLETE]`, `[softly]`)
//! 2. Render markdown to text (links → link text; emphasis, code, headers,
//!    blockquotes and list markers removed)
//! 3. Collapse whitespace and trim

use pulldown_cmark::{Event, Parser, TagEnd};

/// Marker the coach emits when a session has reached its end.
pub const SESSION_COMPLETE_TOKEN: &str = "[SESSION_COMPLETE]";

/// Sanitize text for synthesis. May return an empty string.
pub fn sanitize_for_tts(text: &str) -> String {
    let without_tokens = strip_system_tokens(text);
    let plain = markdown_to_text(&without_tokens);
    collapse_whitespace(&plain)
}

/// Whether `text` contains the session-complete marker.
pub fn contains_session_complete(text: &str) -> bool {
    text.contains(SESSION_COMPLETE_TOKEN)
}

/// Remove `[anything]` spans that are not the label of a markdown link.
///
/// An unmatched `[` is kept as-is.
pub fn strip_system_tokens(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        out.push_str(&rest[..open]);
        let after_open = &rest[open..];
        let Some(close) = after_open.find(']') else {
            out.push_str(after_open);
            return out;
        };
        let span = &after_open[..=close];
        let tail = &after_open[close + 1..];
        if tail.starts_with('(') {
            // `[label](url)`: leave for the markdown pass.
            out.push_str(span);
        }
        rest = tail;
    }
    out.push_str(rest);
    out
}

/// Render markdown to plain text, keeping only what would be read aloud.
fn markdown_to_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for event in Parser::new(text) {
        match event {
            Event::Text(t) | Event::Code(t) => out.push_str(&t),
            Event::SoftBreak | Event::HardBreak => out.push(' '),
            Event::End(end) if is_block_end(&end) => out.push(' '),
            _ => {}
        }
    }
    out
}

fn is_block_end(end: &TagEnd) -> bool {
    matches!(
        end,
        TagEnd::Paragraph
            | TagEnd::Heading(_)
            | TagEnd::Item
            | TagEnd::BlockQuote(_)
            | TagEnd::CodeBlock
            | TagEnd::TableCell
            | TagEnd::TableRow
    )
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn trailing_system_token_removed() {
        assert_eq!(sanitize_for_tts("Good job! [SESSION_COMPLETE]"), "Good job!");
    }

    #[test]
    fn token_only_sanitizes_to_empty() {
        assert_eq!(sanitize_for_tts("[SESSION_COMPLETE]"), "");
        assert_eq!(sanitize_for_tts("  [pause]  [warmly] "), "");
    }

    #[test]
    fn vocal_direction_mid_sentence() {
        assert_eq!(
            sanitize_for_tts("[softly] Take a breath [pause] and notice it."),
            "Take a breath and notice it."
        );
    }

    #[test]
    fn links_resolve_to_label() {
        assert_eq!(
            sanitize_for_tts("Read [the guide](https://example.com/guide) tonight."),
            "Read the guide tonight."
        );
    }

    #[test]
    fn emphasis_and_code_markers_stripped() {
        assert_eq!(
            sanitize_for_tts("This is **really** _important_ and `simple`."),
            "This is really important and simple."
        );
    }

    #[test]
    fn headers_blockquotes_and_lists_stripped() {
        let text = "## Your plan\n\n> Cravings pass.\n\n- Drink water\n- Walk\n1. Breathe";
        assert_eq!(
            sanitize_for_tts(text),
            "Your plan Cravings pass. Drink water Walk Breathe"
        );
    }

    #[test]
    fn whitespace_collapsed() {
        assert_eq!(sanitize_for_tts("  one\n\n   two\tthree  "), "one two three");
    }

    #[test]
    fn unmatched_bracket_kept() {
        assert_eq!(strip_system_tokens("a [b"), "a [b");
    }

    #[test]
    fn strip_keeps_link_labels() {
        assert_eq!(strip_system_tokens("[x](y) [Z]"), "[x](y) ");
    }

    #[test]
    fn session_complete_detection() {
        assert!(contains_session_complete("Well done. [SESSION_COMPLETE]"));
        assert!(!contains_session_complete("Well done."));
    }
}
