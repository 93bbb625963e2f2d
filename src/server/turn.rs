//! One streamed conversational turn: LLM tokens and synthesized audio
//! multiplexed onto a single event channel.
//!
//! Text and audio are independent failure domains. Tokens are forwarded as
//! soon as they arrive; synthesis failures only ever cost audio.

use crate::llm::{ChatMessage, LlmEvent, TokenSource};
use crate::pipeline::messages::AudioChunk;
use crate::pipeline::processor::{ProcessorOptions, SynthesisProcessor};
use crate::text::{SentenceDetector, contains_session_complete};
use crate::transport::event::StreamEvent;
use crate::tts::TtsProvider;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything a turn needs besides the conversation itself.
#[derive(Clone)]
pub struct TurnContext {
    /// LLM token producer.
    pub tokens: Arc<dyn TokenSource>,
    /// TTS provider; `None` streams text only.
    pub tts: Option<Arc<dyn TtsProvider>>,
    /// Synthesize sentence-by-sentence during generation.
    pub streaming: bool,
    /// Options for the synthesis processor.
    pub options: ProcessorOptions,
    /// Capacity of the processor → transport chunk channel.
    pub chunk_buffer: usize,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEnd {
    /// `done` was sent.
    Completed {
        /// Audio chunks forwarded (markers included).
        chunks: usize,
    },
    /// `error` was sent.
    Failed,
    /// The event receiver went away mid-turn.
    Disconnected,
}

struct Synthesis {
    processor: SynthesisProcessor,
    forwarder: JoinHandle<usize>,
}

impl Synthesis {
    fn start(
        tts: Arc<dyn TtsProvider>,
        ctx: &TurnContext,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Self {
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<AudioChunk>(ctx.chunk_buffer.max(1));
        let processor = SynthesisProcessor::new(tts, ctx.options.clone(), chunk_tx);
        let events = events.clone();
        let forwarder = tokio::spawn(async move {
            let mut forwarded = 0;
            while let Some(chunk) = chunk_rx.recv().await {
                if events.send(StreamEvent::AudioChunk { chunk }).await.is_err() {
                    debug!("event receiver closed, dropping audio");
                    break;
                }
                forwarded += 1;
            }
            forwarded
        });
        Self {
            processor,
            forwarder,
        }
    }

    /// Wait for all queued audio to reach the event channel.
    async fn drain(self) -> usize {
        self.processor.flush().await;
        self.processor.finish().await;
        self.forwarder.await.unwrap_or_else(|e| {
            warn!("audio forwarder failed: {e}");
            0
        })
    }
}

/// Run one turn, sending events to `events` until a terminal event.
pub async fn run_turn(
    ctx: TurnContext,
    conversation_id: String,
    messages: Vec<ChatMessage>,
    events: mpsc::Sender<StreamEvent>,
) -> TurnEnd {
    let synthesis = ctx
        .tts
        .clone()
        .map(|tts| Synthesis::start(tts, &ctx, &events));
    let mut detector = SentenceDetector::new();
    let mut full = String::new();

    let mut stream = ctx.tokens.stream(&messages).await;
    let completed = loop {
        let Some(event) = stream.next().await else {
            // Source ended without an explicit completion.
            break full.clone();
        };
        match event {
            LlmEvent::Token(token) => {
                full.push_str(&token);
                if events
                    .send(StreamEvent::token(token.clone(), &conversation_id))
                    .await
                    .is_err()
                {
                    info!(conversation_id = %conversation_id, "client disconnected during generation");
                    if let Some(s) = synthesis {
                        s.processor.abort();
                    }
                    return TurnEnd::Disconnected;
                }
                if ctx.streaming
                    && let Some(s) = &synthesis
                {
                    for sentence in detector.add_token(&token) {
                        s.processor.enqueue_sentence(&sentence, false);
                    }
                }
            }
            LlmEvent::Complete(text) => {
                break if text.is_empty() { full.clone() } else { text };
            }
            LlmEvent::Error {
                message,
                status,
                status_text,
            } => {
                warn!(conversation_id = %conversation_id, ?status, "LLM stream failed: {message}");
                if let Some(s) = synthesis {
                    s.processor.abort();
                    s.drain().await;
                }
                let _ = events
                    .send(StreamEvent::Error {
                        error: message,
                        status,
                        status_text,
                        conversation_id,
                    })
                    .await;
                return TurnEnd::Failed;
            }
        }
    };

    let mut streamed = false;
    let mut chunks = 0;
    if let Some(s) = synthesis {
        let p = &s.processor;
        if ctx.streaming {
            match detector.flush() {
                Some(rest) => p.enqueue_sentence(&rest, true),
                None if p.enqueued_count() > 0 => p.send_completion_marker(),
                None => {}
            }
            streamed = p.enqueued_count() > 0;
        }
        if !streamed {
            if completed.trim().is_empty() {
                p.send_completion_marker();
            } else {
                debug!(conversation_id = %conversation_id, "synthesizing full reply in one unit");
                p.enqueue_sentence(&completed, true);
            }
        }
        chunks = s.drain().await;
    }

    let session_complete = contains_session_complete(&completed);
    info!(
        conversation_id = %conversation_id,
        chars = completed.len(),
        chunks,
        session_complete,
        "turn complete"
    );
    if events
        .send(StreamEvent::done(&conversation_id, session_complete, streamed))
        .await
        .is_err()
    {
        return TurnEnd::Disconnected;
    }
    TurnEnd::Completed { chunks }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::error::Result;
    use crate::llm::TokenStream;
    use crate::tts::{SynthesisRequest, SynthesisResult, TimingSource};
    use async_trait::async_trait;

    struct Scripted(Vec<LlmEvent>);

    #[async_trait]
    impl TokenSource for Scripted {
        async fn stream(&self, _messages: &[ChatMessage]) -> TokenStream {
            Box::pin(futures_util::stream::iter(self.0.clone()))
        }
    }

    struct Echo;

    #[async_trait]
    impl TtsProvider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResult> {
            Ok(SynthesisResult {
                audio: request.text.as_bytes().to_vec(),
                content_type: "audio/mpeg".into(),
                word_timings: Vec::new(),
                estimated_duration_ms: 100.0,
                timing_source: TimingSource::Estimated,
                voice: "echo".into(),
            })
        }
    }

    fn tokens(parts: &[&str]) -> Vec<LlmEvent> {
        let mut events: Vec<LlmEvent> = parts.iter().map(|t| LlmEvent::Token((*t).into())).collect();
        events.push(LlmEvent::Complete(parts.concat()));
        events
    }

    fn ctx(script: Vec<LlmEvent>, streaming: bool) -> TurnContext {
        TurnContext {
            tokens: Arc::new(Scripted(script)),
            tts: Some(Arc::new(Echo)),
            streaming,
            options: ProcessorOptions::default(),
            chunk_buffer: 4,
        }
    }

    async fn run(ctx: TurnContext) -> (TurnEnd, Vec<StreamEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = run_turn(ctx, "conv".into(), vec![ChatMessage::user("hi")], tx).await;
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        (outcome, events)
    }

    fn audio_texts(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::AudioChunk { chunk } => Some(chunk.text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn streaming_turn_emits_sentence_chunks_then_done() {
        let (outcome, events) = run(ctx(tokens(&["Hi there. ", "How are", " you"]), true)).await;
        assert_eq!(outcome, TurnEnd::Completed { chunks: 2 });
        assert_eq!(audio_texts(&events), vec!["Hi there.", "How are you"]);
        match events.last().unwrap() {
            StreamEvent::Done {
                streaming_tts,
                session_complete,
                ..
            } => {
                assert!(*streaming_tts);
                assert!(!*session_complete);
            }
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn batch_mode_synthesizes_full_reply_once() {
        let (_, events) = run(ctx(tokens(&["One. ", "Two."]), false)).await;
        assert_eq!(audio_texts(&events), vec!["One. Two."]);
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Done { streaming_tts: false, .. })
        ));
    }

    #[tokio::test]
    async fn session_complete_reply_ends_with_marker() {
        let (_, events) = run(ctx(tokens(&["Well done. ", "[SESSION_COMPLETE]"]), true)).await;
        let chunks: Vec<&AudioChunk> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::AudioChunk { chunk } => Some(chunk),
                _ => None,
            })
            .collect();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].is_marker() && chunks[1].is_last);
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Done { session_complete: true, .. })
        ));
    }

    #[tokio::test]
    async fn llm_error_becomes_error_event() {
        let script = vec![
            LlmEvent::Token("Partial. ".into()),
            LlmEvent::Error {
                message: "upstream 503".into(),
                status: Some(503),
                status_text: Some("Service Unavailable".into()),
            },
        ];
        let (outcome, events) = run(ctx(script, true)).await;
        assert_eq!(outcome, TurnEnd::Failed);
        match events.last().unwrap() {
            StreamEvent::Error { status, .. } => assert_eq!(*status, Some(503)),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(matches!(events[0], StreamEvent::Token { .. }));
    }

    #[tokio::test]
    async fn text_only_without_tts() {
        let mut c = ctx(tokens(&["Just text."]), true);
        c.tts = None;
        let (outcome, events) = run(c).await;
        assert_eq!(outcome, TurnEnd::Completed { chunks: 0 });
        assert_eq!(events.len(), 2);
    }
}
