//! The audio context contract the playback queue schedules against.
//!
//! Modelled on a browser audio context: one monotonically advancing clock,
//! sources scheduled at absolute clock times, an `ended` notification per
//! source, and a `suspended` state that only a resume request leaves.

use crate::audio::decode::decode_audio;
use crate::error::Result;
use tokio::sync::oneshot;

/// Lifecycle state of an audio context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// The clock advances and scheduled audio is heard.
    Running,
    /// Created but not yet allowed to play; the clock is frozen.
    Suspended,
    /// Torn down; cannot be resumed.
    Closed,
}

/// Decoded mono PCM at the context's sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Handle to a scheduled source.
#[derive(Debug)]
pub struct ScheduledSource {
    /// Id accepted by [`AudioContext::stop_source`].
    pub id: u64,
    /// Start time on the context clock, in seconds.
    pub start_time: f64,
    /// Resolves when the source finished playing or was stopped.
    pub ended: oneshot::Receiver<()>,
}

/// A playback clock with sample-accurate scheduling.
pub trait AudioContext: Send + Sync {
    /// Current lifecycle state.
    fn state(&self) -> ContextState;

    /// Context clock in seconds. Only advances while running.
    fn current_time(&self) -> f64;

    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Decode an encoded payload for this context.
    ///
    /// # Errors
    ///
    /// Returns a decode error for empty or unsupported audio.
    fn decode(&self, bytes: &[u8], content_type: &str) -> Result<AudioBuffer> {
        decode_audio(bytes, content_type, self.sample_rate())
    }

    /// Schedule `buffer` to start at clock time `when` (seconds). Times in
    /// the past start immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the context is closed.
    fn schedule(&self, buffer: &AudioBuffer, when: f64) -> Result<ScheduledSource>;

    /// Stop a scheduled or playing source. Its `ended` fires.
    fn stop_source(&self, id: u64);

    /// Request that a suspended context start running. Returns without
    /// waiting for the request to take effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the context is closed or the device refuses.
    fn resume(&self) -> Result<()>;

    /// Stop every source and release the device.
    fn close(&self);
}
