//! Sequential synthesis: turns enqueued sentences into strictly ordered
//! audio chunks.
//!
//! All synthesis runs on one worker task that drains a FIFO mailbox. A
//! sentence's chunks are fully built and sent before the next sentence's
//! synthesis starts, so emission order is enqueue order no matter how long
//! each vendor call takes. Chunk indices and the running timeline offset
//! live only inside the worker.

use crate::config::TtsConfig;
use crate::pipeline::messages::{AudioChunk, SynthesisUnit};
use crate::text::sanitize_for_tts;
use crate::tts::{StreamedAudio, SynthesisRequest, TtsProvider, WordTiming};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Per-response synthesis options.
#[derive(Debug, Clone, Default)]
pub struct ProcessorOptions {
    /// Voice override passed to every synthesis request.
    pub voice: Option<String>,
    /// Use progressive sub-sentence delivery when the provider supports it.
    pub sub_chunk_streaming: bool,
}

impl From<&TtsConfig> for ProcessorOptions {
    fn from(config: &TtsConfig) -> Self {
        Self {
            voice: None,
            sub_chunk_streaming: config.sub_chunk_streaming,
        }
    }
}

enum Job {
    Sentence(SynthesisUnit),
    CompletionMarker,
    Flush(oneshot::Sender<()>),
}

/// Serializes synthesis of one streamed response.
///
/// Create one per response. Dropping the processor lets the worker finish
/// any queued work and then closes the chunk sink.
pub struct SynthesisProcessor {
    jobs: mpsc::UnboundedSender<Job>,
    next_unit: AtomicU64,
    enqueued: AtomicUsize,
    aborted: AtomicBool,
    worker: JoinHandle<()>,
}

impl SynthesisProcessor {
    /// Spawn the worker. Chunks are delivered to `sink` in emission order.
    pub fn new(
        provider: Arc<dyn TtsProvider>,
        options: ProcessorOptions,
        sink: mpsc::Sender<AudioChunk>,
    ) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            provider,
            options,
            sink,
            next_index: 0,
            offset_ms: 0.0,
            completion_signalled: false,
            sink_closed: false,
        };
        let worker = tokio::spawn(worker.run(rx));
        Self {
            jobs,
            next_unit: AtomicU64::new(0),
            enqueued: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            worker,
        }
    }

    /// Queue one sentence. Ignored after [`abort`](Self::abort).
    pub fn enqueue_sentence(&self, text: &str, is_last: bool) {
        if self.aborted.load(Ordering::Acquire) {
            warn!(
                chars = text.len(),
                "synthesis processor aborted, ignoring sentence"
            );
            return;
        }
        let unit = SynthesisUnit {
            index: self.next_unit.fetch_add(1, Ordering::Relaxed),
            text: text.to_owned(),
            sanitized: sanitize_for_tts(text),
            is_last,
        };
        debug!(unit = unit.index, is_last, "enqueue sentence");
        if self.jobs.send(Job::Sentence(unit)).is_err() {
            error!("synthesis worker is gone, sentence dropped");
            return;
        }
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Wait until everything enqueued so far has been emitted.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.jobs.send(Job::Flush(tx)).is_err() {
            return;
        }
        let _ = rx.await;
    }

    /// Emit a zero-duration `isLast` chunk unless the end of audio was
    /// already signalled.
    pub fn send_completion_marker(&self) {
        if self.jobs.send(Job::CompletionMarker).is_err() {
            warn!("synthesis worker is gone, completion marker dropped");
        }
    }

    /// Number of sentences accepted so far.
    pub fn enqueued_count(&self) -> usize {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Stop accepting sentences. Work already queued still drains.
    pub fn abort(&self) {
        if !self.aborted.swap(true, Ordering::AcqRel) {
            info!("synthesis processor aborted");
        }
    }

    /// Whether [`abort`](Self::abort) was called.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Drop the mailbox and wait for queued work to finish.
    pub async fn finish(self) {
        let Self { jobs, worker, .. } = self;
        drop(jobs);
        if let Err(e) = worker.await {
            error!("synthesis worker panicked: {e}");
        }
    }
}

struct Worker {
    provider: Arc<dyn TtsProvider>,
    options: ProcessorOptions,
    sink: mpsc::Sender<AudioChunk>,
    next_index: u64,
    offset_ms: f64,
    completion_signalled: bool,
    sink_closed: bool,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = rx.recv().await {
            match job {
                Job::Sentence(unit) => self.process(unit).await,
                Job::CompletionMarker => {
                    if !self.completion_signalled {
                        self.emit_marker().await;
                    }
                }
                Job::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!(
            chunks = self.next_index,
            offset_ms = self.offset_ms,
            "synthesis worker finished"
        );
    }

    async fn process(&mut self, unit: SynthesisUnit) {
        if self.sink_closed {
            return;
        }
        if unit.sanitized.is_empty() {
            debug!(unit = unit.index, "sentence empty after sanitization, skipped");
        } else if self.options.sub_chunk_streaming && self.provider.supports_streaming() {
            self.synthesize_streaming(&unit).await;
        } else {
            self.synthesize_batch(&unit).await;
        }

        if unit.is_last && !self.completion_signalled {
            self.emit_marker().await;
        }
    }

    fn request(&self, unit: &SynthesisUnit) -> SynthesisRequest {
        let request = SynthesisRequest::new(unit.sanitized.clone());
        match &self.options.voice {
            Some(voice) => request.with_voice(voice.clone()),
            None => request,
        }
    }

    async fn synthesize_batch(&mut self, unit: &SynthesisUnit) {
        let request = self.request(unit);
        match self.provider.synthesize(&request).await {
            Ok(result) => {
                let chunk = self.build_chunk(
                    &result.audio,
                    result.content_type,
                    result.word_timings,
                    result.estimated_duration_ms,
                    unit.is_last,
                    unit.sanitized.clone(),
                );
                self.emit(chunk).await;
            }
            Err(e) => {
                error!(
                    unit = unit.index,
                    provider = self.provider.name(),
                    "synthesis failed, chunk dropped: {e}"
                );
            }
        }
    }

    /// Emit sub-chunks as they arrive. For the last sentence one piece is
    /// held back so the final piece can be flagged `is_last`.
    async fn synthesize_streaming(&mut self, unit: &SynthesisUnit) {
        let request = self.request(unit);
        let mut stream = match self.provider.synthesize_stream(&request).await {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    unit = unit.index,
                    "streaming synthesis unavailable, using batch: {e}"
                );
                self.synthesize_batch(unit).await;
                return;
            }
        };

        let mut first = true;
        let mut held: Option<StreamedAudio> = None;
        while let Some(piece) = stream.next().await {
            let piece = match piece {
                Ok(p) => p,
                Err(e) => {
                    error!(unit = unit.index, "streaming synthesis failed mid-sentence: {e}");
                    break;
                }
            };
            if !unit.is_last {
                self.emit_piece(piece, false, &mut first, unit).await;
                continue;
            }
            if let Some(prev) = held.replace(piece) {
                self.emit_piece(prev, false, &mut first, unit).await;
            }
        }
        if let Some(last) = held {
            self.emit_piece(last, true, &mut first, unit).await;
        }
    }

    async fn emit_piece(
        &mut self,
        piece: StreamedAudio,
        is_last: bool,
        first: &mut bool,
        unit: &SynthesisUnit,
    ) {
        let text = if *first {
            unit.sanitized.clone()
        } else {
            String::new()
        };
        *first = false;
        let chunk = self.build_chunk(
            &piece.audio,
            piece.content_type,
            piece.word_timings,
            piece.duration_ms,
            is_last,
            text,
        );
        self.emit(chunk).await;
    }

    /// Assign the next index and offset. The offset advances before the
    /// next chunk is built.
    fn build_chunk(
        &mut self,
        audio: &[u8],
        content_type: String,
        word_timings: Vec<WordTiming>,
        duration_ms: f64,
        is_last: bool,
        text: String,
    ) -> AudioChunk {
        let duration_ms = if duration_ms.is_finite() {
            duration_ms.max(0.0)
        } else {
            0.0
        };
        let chunk = AudioChunk {
            chunk_index: self.next_index,
            audio_base64: BASE64.encode(audio),
            content_type,
            word_timings,
            cumulative_offset_ms: self.offset_ms,
            duration_ms,
            is_last,
            text,
        };
        self.next_index += 1;
        self.offset_ms += duration_ms;
        if is_last {
            self.completion_signalled = true;
        }
        chunk
    }

    async fn emit_marker(&mut self) {
        let marker = AudioChunk::completion_marker(self.next_index, self.offset_ms);
        self.next_index += 1;
        self.completion_signalled = true;
        debug!(chunk_index = marker.chunk_index, "emitting completion marker");
        self.emit(marker).await;
    }

    async fn emit(&mut self, chunk: AudioChunk) {
        if self.sink_closed {
            return;
        }
        debug!(
            chunk_index = chunk.chunk_index,
            offset_ms = chunk.cumulative_offset_ms,
            duration_ms = chunk.duration_ms,
            is_last = chunk.is_last,
            "audio chunk ready"
        );
        if self.sink.send(chunk).await.is_err() {
            warn!("audio chunk receiver dropped, discarding further synthesis");
            self.sink_closed = true;
        }
    }
}
