//! Gapless, offset-positioned playback of streamed audio chunks.
//!
//! Every chunk declares where it belongs on the response timeline
//! (`cumulativeOffsetMs`). Chunks are placed on the audio clock from that
//! offset, not from arrival order:
//!
//! - the next expected chunk starts at `max(cursor, now)`, where `cursor` is
//!   the end of the contiguous prefix already scheduled;
//! - a chunk that arrives ahead of a missing predecessor starts at
//!   `max(anchor + offset, now)`, where `anchor` is the clock time of
//!   timeline offset zero.
//!
//! Word timings are shifted by the chunk offset and merged into one
//! timeline, so "which word is playing" is a lookup of
//! `now - anchor` against [`StreamingAudioQueue::all_word_timings`].
//!
//! One audio context lives for the whole conversation.
//! [`reset_playback_state`](StreamingAudioQueue::reset_playback_state)
//! clears audio and timings between turns but keeps the context; only
//! [`stop`](StreamingAudioQueue::stop) closes it.

use crate::audio::{AudioBuffer, AudioContext, ContextState};
use crate::error::{Result, SpeechError};
use crate::pipeline::messages::AudioChunk;
use crate::playback::unlock::UnlockStrategy;
use crate::tts::WordTiming;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Creates the audio context on first use.
pub type ContextFactory = Arc<dyn Fn() -> Result<Arc<dyn AudioContext>> + Send + Sync>;

/// Playback lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The first source of a response was scheduled.
    Started,
    /// The last chunk was received and every scheduled source has ended.
    Completed,
}

#[derive(Default)]
struct Timeline {
    /// Bumped on reset so stale `ended` notifications are ignored.
    generation: u64,
    /// Clock time of timeline offset zero.
    anchor: Option<f64>,
    /// End of the contiguous scheduled prefix, in clock seconds.
    cursor: f64,
    /// Index of the next chunk that extends the prefix.
    next_expected: u64,
    /// End times of chunks scheduled ahead of a gap, by index.
    ahead: BTreeMap<u64, f64>,
    active: HashSet<u64>,
    playing: bool,
    /// Index of the chunk flagged `is_last`, once received.
    last_index: Option<u64>,
    completed: bool,
}

impl Timeline {
    /// Clock time at which a chunk should start.
    fn placement(&mut self, chunk: &AudioChunk, now: f64) -> f64 {
        let offset = chunk.cumulative_offset_ms / 1000.0;
        let anchor = *self.anchor.get_or_insert(self.cursor.max(now));
        if chunk.chunk_index <= self.next_expected {
            self.cursor.max(anchor).max(now)
        } else {
            (anchor + offset).max(now)
        }
    }

    /// Record that `chunk` occupies `[start, start + secs)`.
    fn occupy(&mut self, chunk: &AudioChunk, start: f64, secs: f64) {
        let end = start + secs.max(0.0);
        if chunk.chunk_index <= self.next_expected {
            // Late starts shift the rest of the timeline.
            let offset = chunk.cumulative_offset_ms / 1000.0;
            if let Some(anchor) = self.anchor.as_mut() {
                *anchor = anchor.max(start - offset);
            }
            self.cursor = self.cursor.max(end);
            if chunk.chunk_index == self.next_expected {
                self.next_expected += 1;
            }
            while let Some(ahead_end) = self.ahead.remove(&self.next_expected) {
                self.cursor = self.cursor.max(ahead_end);
                self.next_expected += 1;
            }
        } else {
            self.ahead.insert(chunk.chunk_index, end);
        }
    }

    /// The last chunk arrived and no index before it is still missing.
    fn all_received(&self) -> bool {
        self.last_index.is_some_and(|last| self.next_expected > last)
    }
}

struct Inner {
    context: Option<Arc<dyn AudioContext>>,
    timeline: Timeline,
}

struct Shared {
    factory: ContextFactory,
    unlock: Arc<dyn UnlockStrategy>,
    inner: Mutex<Inner>,
    all_word_timings: watch::Sender<Vec<WordTiming>>,
    tts_words: watch::Sender<Vec<String>>,
    tts_text: watch::Sender<String>,
    events: broadcast::Sender<PlaybackEvent>,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| SpeechError::Audio("playback state lock poisoned".into()))
    }

    fn emit(&self, event: PlaybackEvent) {
        debug!(?event, "playback event");
        let _ = self.events.send(event);
    }

    /// Emit `Completed` once every chunk up to the last one arrived and
    /// nothing is playing.
    fn check_completed(&self, timeline: &mut Timeline) {
        if timeline.all_received() && timeline.active.is_empty() && !timeline.completed {
            timeline.completed = true;
            timeline.playing = false;
            self.emit(PlaybackEvent::Completed);
        }
    }

    fn source_ended(&self, generation: u64, id: u64) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let timeline = &mut inner.timeline;
        if timeline.generation != generation {
            return;
        }
        timeline.active.remove(&id);
        self.check_completed(timeline);
    }
}

/// Client-side queue that schedules streamed chunks on one audio context.
#[derive(Clone)]
pub struct StreamingAudioQueue {
    shared: Arc<Shared>,
}

impl StreamingAudioQueue {
    /// Create a queue. No context exists until [`initialize`](Self::initialize)
    /// or the first [`enqueue_chunk`](Self::enqueue_chunk).
    pub fn new(factory: ContextFactory, unlock: Arc<dyn UnlockStrategy>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(Shared {
                factory,
                unlock,
                inner: Mutex::new(Inner {
                    context: None,
                    timeline: Timeline::default(),
                }),
                all_word_timings: watch::Sender::new(Vec::new()),
                tts_words: watch::Sender::new(Vec::new()),
                tts_text: watch::Sender::new(String::new()),
                events,
            }),
        }
    }

    /// Return the audio context, creating it on first call.
    ///
    /// Never waits for a suspended context to resume: the context is
    /// returned as is and the unlock strategy is armed.
    ///
    /// # Errors
    ///
    /// Returns an error if the context cannot be created.
    pub fn initialize(&self) -> Result<Arc<dyn AudioContext>> {
        let mut inner = self.shared.lock()?;
        if let Some(ctx) = &inner.context
            && ctx.state() != ContextState::Closed
        {
            return Ok(Arc::clone(ctx));
        }
        let ctx = (self.shared.factory)()?;
        info!(state = ?ctx.state(), "audio context created");
        if ctx.state() == ContextState::Suspended {
            self.shared.unlock.arm(Arc::clone(&ctx));
        }
        inner.context = Some(Arc::clone(&ctx));
        Ok(ctx)
    }

    /// Decode and schedule one chunk.
    ///
    /// A chunk that cannot be decoded is skipped; its declared duration is
    /// still reserved on the timeline so later chunks keep their position.
    ///
    /// # Errors
    ///
    /// Returns an error only if no audio context can be obtained or the
    /// context refuses to schedule.
    pub async fn enqueue_chunk(&self, chunk: &AudioChunk) -> Result<()> {
        let ctx = self.initialize()?;
        self.record_words(chunk);

        if chunk.is_marker() {
            let mut inner = self.shared.lock()?;
            let timeline = &mut inner.timeline;
            let now = ctx.current_time();
            let start = timeline.placement(chunk, now);
            timeline.occupy(chunk, start, 0.0);
            if chunk.is_last {
                timeline.last_index = Some(chunk.chunk_index);
            }
            // A marker may also close the gap before an earlier last chunk.
            self.shared.check_completed(timeline);
            return Ok(());
        }

        let decoded = match BASE64.decode(chunk.audio_base64.as_bytes()) {
            Ok(bytes) => {
                decode_blocking(Arc::clone(&ctx), bytes, chunk.content_type.clone()).await
            }
            Err(e) => Err(SpeechError::Decode(format!("invalid base64: {e}"))),
        };

        let mut inner = self.shared.lock()?;
        let timeline = &mut inner.timeline;
        let now = ctx.current_time();
        let start = timeline.placement(chunk, now);
        if chunk.is_last {
            timeline.last_index = Some(chunk.chunk_index);
        }

        let buffer: AudioBuffer = match decoded {
            Ok(b) => b,
            Err(e) => {
                warn!(
                    chunk_index = chunk.chunk_index,
                    declared_ms = chunk.duration_ms,
                    "skipping undecodable chunk: {e}"
                );
                timeline.occupy(chunk, start, chunk.duration_ms.max(0.0) / 1000.0);
                self.shared.check_completed(timeline);
                return Ok(());
            }
        };

        let source = ctx.schedule(&buffer, start)?;
        timeline.occupy(chunk, source.start_time, buffer.duration_secs());
        timeline.active.insert(source.id);
        timeline.completed = false;
        let first = !timeline.playing;
        timeline.playing = true;
        let generation = timeline.generation;
        drop(inner);

        debug!(
            chunk_index = chunk.chunk_index,
            start = source.start_time,
            secs = buffer.duration_secs(),
            "chunk scheduled"
        );
        if first {
            self.shared.emit(PlaybackEvent::Started);
        }

        let shared = Arc::clone(&self.shared);
        let id = source.id;
        let ended = source.ended;
        tokio::spawn(async move {
            // A dropped sender also means the source is gone.
            let _ = ended.await;
            shared.source_ended(generation, id);
        });
        Ok(())
    }

    /// Stop all scheduled audio and clear timings and the cursor, keeping
    /// the audio context alive for the next turn.
    pub fn reset_playback_state(&self) {
        let Ok(mut inner) = self.shared.lock() else {
            return;
        };
        let generation = inner.timeline.generation + 1;
        let active: Vec<u64> = inner.timeline.active.drain().collect();
        inner.timeline = Timeline {
            generation,
            ..Timeline::default()
        };
        let ctx = inner.context.clone();
        drop(inner);

        if let Some(ctx) = ctx {
            for id in active {
                ctx.stop_source(id);
            }
        }
        self.shared.all_word_timings.send_replace(Vec::new());
        self.shared.tts_words.send_replace(Vec::new());
        self.shared.tts_text.send_replace(String::new());
        debug!("playback state reset");
    }

    /// Reset and close the audio context.
    pub fn stop(&self) {
        self.reset_playback_state();
        let ctx = match self.shared.lock() {
            Ok(mut inner) => inner.context.take(),
            Err(_) => None,
        };
        self.shared.unlock.disarm();
        if let Some(ctx) = ctx {
            ctx.close();
            info!("audio context closed");
        }
    }

    /// The current context, if one was created and not stopped.
    pub fn context(&self) -> Option<Arc<dyn AudioContext>> {
        self.shared.lock().ok().and_then(|i| i.context.clone())
    }

    /// All word timings received so far, on the response timeline.
    pub fn all_word_timings(&self) -> watch::Receiver<Vec<WordTiming>> {
        self.shared.all_word_timings.subscribe()
    }

    /// Words received so far, in timeline order.
    pub fn tts_words(&self) -> watch::Receiver<Vec<String>> {
        self.shared.tts_words.subscribe()
    }

    /// Display text received so far.
    pub fn tts_text(&self) -> watch::Receiver<String> {
        self.shared.tts_text.subscribe()
    }

    /// Playback start/complete notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.shared.events.subscribe()
    }

    /// Whether the last chunk arrived and all audio has finished.
    pub fn is_complete(&self) -> bool {
        self.shared
            .lock()
            .map(|i| i.timeline.completed)
            .unwrap_or(false)
    }

    /// Resolve once playback of the current response has completed.
    ///
    /// Returns immediately if it already has.
    pub async fn wait_for_completion(&self) {
        let mut events = self.subscribe();
        if self.is_complete() {
            return;
        }
        loop {
            match events.recv().await {
                Ok(PlaybackEvent::Completed) | Err(broadcast::error::RecvError::Closed) => return,
                Ok(PlaybackEvent::Started) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if self.is_complete() {
                        return;
                    }
                }
            }
        }
    }

    /// Index into [`all_word_timings`](Self::all_word_timings) of the word
    /// being spoken now, or `None` before playback starts.
    pub fn current_word_index(&self) -> Option<usize> {
        let (ctx, anchor) = {
            let inner = self.shared.lock().ok()?;
            (inner.context.clone()?, inner.timeline.anchor?)
        };
        let elapsed_ms = (ctx.current_time() - anchor) * 1000.0;
        if elapsed_ms < 0.0 {
            return None;
        }
        let words = self.shared.all_word_timings.borrow();
        let started = words.partition_point(|w| w.start_ms <= elapsed_ms);
        started.checked_sub(1)
    }

    fn record_words(&self, chunk: &AudioChunk) {
        if !chunk.word_timings.is_empty() {
            let shifted: Vec<WordTiming> = chunk
                .word_timings
                .iter()
                .map(|w| w.shifted(chunk.cumulative_offset_ms))
                .collect();
            self.shared.all_word_timings.send_modify(|all| {
                all.extend(shifted);
                all.sort_by(|a, b| a.start_ms.total_cmp(&b.start_ms));
            });
            let words: Vec<String> = self
                .shared
                .all_word_timings
                .borrow()
                .iter()
                .map(|w| w.word.clone())
                .collect();
            self.shared.tts_words.send_replace(words);
        }
        if !chunk.text.is_empty() {
            self.shared.tts_text.send_modify(|text| {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(&chunk.text);
            });
        }
    }
}

/// Decode off the async worker threads; symphonia decodes synchronously.
async fn decode_blocking(
    ctx: Arc<dyn AudioContext>,
    bytes: Vec<u8>,
    content_type: String,
) -> Result<AudioBuffer> {
    tokio::task::spawn_blocking(move || ctx.decode(&bytes, &content_type))
        .await
        .map_err(|e| SpeechError::Decode(format!("decode task failed: {e}")))?
}
