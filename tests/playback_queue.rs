//! Playback queue behaviour on a virtual audio clock.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ember::AudioChunk;
use ember::audio::{AudioContext, ContextState, VirtualAudioContext};
use ember::playback::{
    ContextFactory, GestureKind, GestureUnlock, NoopUnlock, PlaybackEvent, StreamingAudioQueue,
    UnlockStrategy,
};
use ember::tts::{WordTiming, wav};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const RATE: u32 = 24_000;

struct Harness {
    ctx: Arc<VirtualAudioContext>,
    created: Arc<AtomicUsize>,
    queue: StreamingAudioQueue,
}

/// Every factory call creates a fresh context; `ctx` is the latest one.
fn harness_with(state: ContextState, unlock: Arc<dyn UnlockStrategy>) -> Harness {
    let ctx = Arc::new(VirtualAudioContext::with_state(RATE, state));
    let created = Arc::new(AtomicUsize::new(0));
    let factory_ctx = Arc::clone(&ctx);
    let counter = Arc::clone(&created);
    let factory: ContextFactory = Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let ctx: Arc<dyn AudioContext> = factory_ctx.clone();
        Ok(ctx)
    });
    Harness {
        ctx,
        created,
        queue: StreamingAudioQueue::new(factory, unlock),
    }
}

fn harness() -> Harness {
    harness_with(ContextState::Running, Arc::new(NoopUnlock))
}

fn chunk(index: u64, offset_ms: f64, duration_ms: f64, text: &str, is_last: bool) -> AudioChunk {
    let samples = (duration_ms / 1000.0 * f64::from(RATE)).round() as usize;
    let audio = wav::pcm16_to_wav(&vec![0u8; samples * 2], RATE).unwrap();
    let words: Vec<&str> = text.split_whitespace().collect();
    let per_word = duration_ms / words.len().max(1) as f64;
    AudioChunk {
        chunk_index: index,
        audio_base64: BASE64.encode(audio),
        content_type: "audio/wav".into(),
        word_timings: words
            .iter()
            .enumerate()
            .map(|(i, w)| WordTiming::new(*w, i as f64 * per_word, (i + 1) as f64 * per_word))
            .collect(),
        cumulative_offset_ms: offset_ms,
        duration_ms,
        is_last,
        text: text.into(),
    }
}

/// Let spawned `ended` watchers run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

async fn completes(queue: &StreamingAudioQueue) {
    tokio::time::timeout(Duration::from_secs(2), queue.wait_for_completion())
        .await
        .expect("playback should complete");
}

#[tokio::test]
async fn initialize_is_idempotent_and_reset_keeps_context() {
    let h = harness();
    let first = h.queue.initialize().unwrap();
    let second = h.queue.initialize().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.created.load(Ordering::SeqCst), 1);

    h.queue
        .enqueue_chunk(&chunk(0, 0.0, 200.0, "Hello there", false))
        .await
        .unwrap();
    assert_eq!(h.ctx.active_sources(), 1);

    h.queue.reset_playback_state();
    assert_eq!(h.ctx.active_sources(), 0);
    assert_eq!(h.ctx.state(), ContextState::Running);
    assert!(h.queue.all_word_timings().borrow().is_empty());
    assert!(h.queue.tts_text().borrow().is_empty());
    h.queue.initialize().unwrap();
    assert_eq!(h.created.load(Ordering::SeqCst), 1);

    h.queue.stop();
    assert_eq!(h.ctx.state(), ContextState::Closed);
    assert!(h.queue.context().is_none());
    // A closed context is replaced on next use.
    h.queue.initialize().unwrap();
    assert_eq!(h.created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stale_sources_do_not_complete_the_next_turn() {
    let h = harness();
    let mut events = h.queue.subscribe();
    h.queue
        .enqueue_chunk(&chunk(0, 0.0, 100.0, "Old", true))
        .await
        .unwrap();
    assert_eq!(events.recv().await.unwrap(), PlaybackEvent::Started);

    h.queue.reset_playback_state();
    settle().await;
    assert!(!h.queue.is_complete());

    // Indices restart at zero for the next response.
    h.queue
        .enqueue_chunk(&chunk(0, 0.0, 100.0, "New", true))
        .await
        .unwrap();
    assert_eq!(*h.queue.tts_text().borrow(), "New");
    h.ctx.advance(0.15);
    completes(&h.queue).await;
}

#[tokio::test]
async fn out_of_order_chunks_keep_their_offsets() {
    let h = harness();
    h.queue
        .enqueue_chunk(&chunk(1, 200.0, 100.0, "second", false))
        .await
        .unwrap();
    h.queue
        .enqueue_chunk(&chunk(0, 0.0, 200.0, "first one", false))
        .await
        .unwrap();
    h.queue
        .enqueue_chunk(&chunk(2, 300.0, 100.0, "third", true))
        .await
        .unwrap();

    let words: Vec<String> = h.queue.tts_words().borrow().clone();
    assert_eq!(words, vec!["first", "one", "second", "third"]);

    h.ctx.advance(0.35);
    settle().await;
    // Only "third" (0.3 to 0.4 s) is still playing.
    assert_eq!(h.ctx.active_sources(), 1);
    assert!(!h.queue.is_complete());
    assert_eq!(h.queue.current_word_index(), Some(3));

    h.ctx.advance(0.1);
    completes(&h.queue).await;
}

#[tokio::test]
async fn late_chunk_starts_now_not_in_the_past() {
    let h = harness();
    h.queue
        .enqueue_chunk(&chunk(0, 0.0, 100.0, "Quick", false))
        .await
        .unwrap();
    // Synthesis of the next sentence took longer than the first played.
    h.ctx.advance(0.5);
    h.queue
        .enqueue_chunk(&chunk(1, 100.0, 100.0, "Later", true))
        .await
        .unwrap();
    assert_eq!(h.ctx.active_sources(), 1);
    h.ctx.advance(0.05);
    settle().await;
    assert!(!h.queue.is_complete());
    assert_eq!(h.queue.current_word_index(), Some(1));
    h.ctx.advance(0.06);
    completes(&h.queue).await;
}

#[tokio::test]
async fn completion_marker_ends_playback() {
    let h = harness();
    let mut events = h.queue.subscribe();
    h.queue
        .enqueue_chunk(&chunk(0, 0.0, 100.0, "Done now", false))
        .await
        .unwrap();
    h.queue
        .enqueue_chunk(&AudioChunk::completion_marker(1, 100.0))
        .await
        .unwrap();
    assert_eq!(events.recv().await.unwrap(), PlaybackEvent::Started);
    settle().await;
    assert!(!h.queue.is_complete());

    h.ctx.advance(0.12);
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap(),
        PlaybackEvent::Completed
    );
}

#[tokio::test]
async fn marker_only_response_completes_immediately() {
    let h = harness();
    h.queue
        .enqueue_chunk(&AudioChunk::completion_marker(0, 0.0))
        .await
        .unwrap();
    assert!(h.queue.is_complete());
    assert_eq!(h.ctx.active_sources(), 0);
}

#[tokio::test]
async fn undecodable_chunk_reserves_its_slot() {
    let h = harness();
    let mut broken = chunk(0, 0.0, 500.0, "lost", false);
    broken.audio_base64 = BASE64.encode(b"not audio at all");
    h.queue.enqueue_chunk(&broken).await.unwrap();
    h.queue
        .enqueue_chunk(&chunk(1, 500.0, 100.0, "kept", true))
        .await
        .unwrap();

    h.ctx.advance(0.45);
    settle().await;
    assert!(!h.queue.is_complete());
    h.ctx.advance(0.2);
    completes(&h.queue).await;
}

#[tokio::test]
async fn last_chunk_finishing_before_a_gap_does_not_complete() {
    let h = harness();
    h.queue
        .enqueue_chunk(&chunk(1, 100.0, 100.0, "end", true))
        .await
        .unwrap();
    // Chunk 1 plays out (0.1 to 0.2 s) while chunk 0 is still missing.
    h.ctx.advance(0.25);
    settle().await;
    assert_eq!(h.ctx.active_sources(), 0);
    assert!(!h.queue.is_complete());

    h.queue
        .enqueue_chunk(&chunk(0, 0.0, 100.0, "start", false))
        .await
        .unwrap();
    assert_eq!(h.ctx.active_sources(), 1);
    settle().await;
    assert!(!h.queue.is_complete());
    h.ctx.advance(0.15);
    completes(&h.queue).await;
}

#[tokio::test]
async fn marker_filling_the_gap_completes() {
    let h = harness();
    h.queue
        .enqueue_chunk(&chunk(1, 0.0, 100.0, "only", true))
        .await
        .unwrap();
    h.ctx.advance(0.15);
    settle().await;
    assert!(!h.queue.is_complete());

    h.queue
        .enqueue_chunk(&AudioChunk::completion_marker(0, 0.0))
        .await
        .unwrap();
    assert!(h.queue.is_complete());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chunks_decode_on_a_multi_thread_runtime() {
    let h = harness();
    for i in 0u32..4 {
        let offset = f64::from(i) * 100.0;
        h.queue
            .enqueue_chunk(&chunk(u64::from(i), offset, 100.0, "word", i == 3))
            .await
            .unwrap();
    }
    assert_eq!(h.ctx.active_sources(), 4);
    h.ctx.advance(0.45);
    completes(&h.queue).await;
}

#[tokio::test]
async fn suspended_context_is_unlocked_by_gesture() {
    let unlock = Arc::new(GestureUnlock::new());
    let h = harness_with(ContextState::Suspended, unlock.clone());

    let ctx = tokio::time::timeout(Duration::from_millis(200), async { h.queue.initialize() })
        .await
        .expect("initialize must not wait for resume")
        .unwrap();
    assert_eq!(ctx.state(), ContextState::Suspended);
    assert_eq!(unlock.pending(), GestureKind::ALL.len());
    assert_eq!(h.ctx.resume_requests(), 0);

    h.queue
        .enqueue_chunk(&chunk(0, 0.0, 100.0, "Wake up", true))
        .await
        .unwrap();
    h.ctx.advance(1.0);
    settle().await;
    assert!(!h.queue.is_complete());

    assert!(unlock.dispatch(GestureKind::TouchStart));
    assert_eq!(h.ctx.state(), ContextState::Running);
    assert_eq!(unlock.pending(), 0);

    h.ctx.advance(0.2);
    completes(&h.queue).await;
}
