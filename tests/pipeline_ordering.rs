//! Ordering properties of the sequential synthesis processor.
//!
//! Synthesis latency per sentence is deliberately uneven; emitted chunks
//! must still follow enqueue order with contiguous indices and offsets
//! equal to the running sum of earlier durations.

use async_trait::async_trait;
use ember::error::Result;
use ember::pipeline::processor::ProcessorOptions;
use ember::tts::{SynthesisRequest, SynthesisResult, TimingSource, TtsProvider, WordTiming};
use ember::{AudioChunk, SynthesisProcessor};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Vendor whose latency and duration depend on the sentence.
struct LaggyTts {
    latency_ms: HashMap<String, u64>,
}

#[async_trait]
impl TtsProvider for LaggyTts {
    fn name(&self) -> &str {
        "laggy"
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResult> {
        let delay = self.latency_ms.get(&request.text).copied().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        let duration = request.text.len() as f64 * 10.0;
        Ok(SynthesisResult {
            audio: request.text.as_bytes().to_vec(),
            content_type: "audio/mpeg".into(),
            word_timings: vec![WordTiming::new(request.text.clone(), 0.0, duration)],
            estimated_duration_ms: duration,
            timing_source: TimingSource::Estimated,
            voice: "test".into(),
        })
    }
}

async fn run(sentences: &[&str], latency_ms: &[u64]) -> Vec<AudioChunk> {
    let provider = LaggyTts {
        latency_ms: sentences
            .iter()
            .zip(latency_ms)
            .map(|(s, l)| ((*s).to_owned(), *l))
            .collect(),
    };
    let (tx, mut rx) = mpsc::channel(64);
    let processor = SynthesisProcessor::new(Arc::new(provider), ProcessorOptions::default(), tx);
    for (i, sentence) in sentences.iter().enumerate() {
        processor.enqueue_sentence(sentence, i + 1 == sentences.len());
    }
    processor.finish().await;

    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    chunks
}

fn assert_timeline(chunks: &[AudioChunk], sentences: &[&str]) {
    assert_eq!(chunks.len(), sentences.len());
    let mut offset = 0.0;
    for (i, (chunk, sentence)) in chunks.iter().zip(sentences).enumerate() {
        assert_eq!(chunk.chunk_index, i as u64);
        assert_eq!(chunk.text, *sentence);
        assert!((chunk.cumulative_offset_ms - offset).abs() < 1e-9);
        assert_eq!(chunk.is_last, i + 1 == sentences.len());
        offset += chunk.duration_ms;
    }
}

#[tokio::test]
async fn slow_first_sentence_does_not_reorder() {
    let sentences = ["First one.", "Second.", "Third sentence here."];
    let chunks = run(&sentences, &[300, 50, 150]).await;
    assert_timeline(&chunks, &sentences);
    assert_eq!(chunks[1].cumulative_offset_ms, chunks[0].duration_ms);
    assert_eq!(
        chunks[2].cumulative_offset_ms,
        chunks[0].duration_ms + chunks[1].duration_ms
    );
}

#[tokio::test]
async fn random_latencies_keep_enqueue_order() {
    let sentences = [
        "Breathe in.",
        "Hold it for a moment.",
        "Now let it go slowly.",
        "Notice how your shoulders feel.",
        "Good.",
        "We will try once more.",
    ];
    let mut rng = rand::thread_rng();
    for _ in 0..3 {
        let latency: Vec<u64> = sentences.iter().map(|_| rng.gen_range(0..60)).collect();
        let chunks = run(&sentences, &latency).await;
        assert_timeline(&chunks, &sentences);
    }
}

#[tokio::test]
async fn empty_after_sanitizing_still_signals_end() {
    let sentences = ["All done.", "[SESSION_COMPLETE]"];
    let chunks = run(&sentences, &[0, 0]).await;
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text, "All done.");
    assert!(!chunks[0].is_last);
    assert!(chunks[1].is_marker());
    assert!(chunks[1].is_last);
    assert_eq!(chunks[1].chunk_index, 1);
    assert_eq!(chunks[1].cumulative_offset_ms, chunks[0].duration_ms);
}
