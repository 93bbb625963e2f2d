//! Manually clocked audio context for headless runs and tests.

use crate::audio::context::{AudioBuffer, AudioContext, ContextState, ScheduledSource};
use crate::audio::mixer::Mixer;
use crate::error::{Result, SpeechError};
use std::sync::Mutex;

struct Inner {
    state: ContextState,
    mixer: Mixer,
    resume_requests: usize,
}

/// An audio context whose clock only moves when [`advance`](Self::advance)
/// is called. Nothing is rendered.
pub struct VirtualAudioContext {
    inner: Mutex<Inner>,
}

impl VirtualAudioContext {
    /// A running context.
    pub fn new(sample_rate: u32) -> Self {
        Self::with_state(sample_rate, ContextState::Running)
    }

    /// A context created in `state`. Use [`ContextState::Suspended`] to model
    /// platforms that need a user gesture before audio may play.
    pub fn with_state(sample_rate: u32, state: ContextState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                mixer: Mixer::new(sample_rate),
                resume_requests: 0,
            }),
        }
    }

    /// Move the clock forward by `secs` if running, firing `ended` for every
    /// source that finished.
    pub fn advance(&self, secs: f64) {
        if let Ok(mut inner) = self.inner.lock()
            && inner.state == ContextState::Running
        {
            let frames = (secs.max(0.0) * f64::from(inner.mixer.sample_rate())).round() as u64;
            inner.mixer.advance_frames(frames);
        }
    }

    /// Sources scheduled or playing.
    pub fn active_sources(&self) -> usize {
        self.inner.lock().map(|i| i.mixer.active()).unwrap_or(0)
    }

    /// How many times [`AudioContext::resume`] was called.
    pub fn resume_requests(&self) -> usize {
        self.inner.lock().map(|i| i.resume_requests).unwrap_or(0)
    }
}

impl AudioContext for VirtualAudioContext {
    fn state(&self) -> ContextState {
        self.inner
            .lock()
            .map(|i| i.state)
            .unwrap_or(ContextState::Closed)
    }

    fn current_time(&self) -> f64 {
        self.inner.lock().map(|i| i.mixer.now_secs()).unwrap_or(0.0)
    }

    fn sample_rate(&self) -> u32 {
        self.inner
            .lock()
            .map(|i| i.mixer.sample_rate())
            .unwrap_or(1)
    }

    fn schedule(&self, buffer: &AudioBuffer, when: f64) -> Result<ScheduledSource> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| SpeechError::Audio("virtual context lock poisoned".into()))?;
        if inner.state == ContextState::Closed {
            return Err(SpeechError::Audio("audio context is closed".into()));
        }
        let (id, start_time, ended) = inner.mixer.add(buffer.samples.clone(), when);
        Ok(ScheduledSource {
            id,
            start_time,
            ended,
        })
    }

    fn stop_source(&self, id: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.mixer.stop(id);
        }
    }

    fn resume(&self) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| SpeechError::Audio("virtual context lock poisoned".into()))?;
        inner.resume_requests += 1;
        match inner.state {
            ContextState::Closed => Err(SpeechError::Audio("cannot resume a closed context".into())),
            _ => {
                inner.state = ContextState::Running;
                Ok(())
            }
        }
    }

    fn close(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.mixer.stop_all();
            inner.state = ContextState::Closed;
        }
    }
}
