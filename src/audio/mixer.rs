//! Frame-clocked source mixer shared by the audio context backends.

use tokio::sync::oneshot;

struct Source {
    id: u64,
    start_frame: u64,
    samples: Vec<f32>,
    ended: Option<oneshot::Sender<()>>,
}

impl Source {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }

    fn finish(&mut self) {
        if let Some(tx) = self.ended.take() {
            let _ = tx.send(());
        }
    }
}

/// Mixes scheduled mono sources onto a clock counted in output frames.
pub(crate) struct Mixer {
    sample_rate: u32,
    frame: u64,
    next_id: u64,
    sources: Vec<Source>,
}

impl Mixer {
    pub(crate) fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frame: 0,
            next_id: 0,
            sources: Vec::new(),
        }
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Clock position in seconds.
    pub(crate) fn now_secs(&self) -> f64 {
        self.frame as f64 / f64::from(self.sample_rate)
    }

    /// Add a source starting at `when_secs` (clamped to now).
    pub(crate) fn add(
        &mut self,
        samples: Vec<f32>,
        when_secs: f64,
    ) -> (u64, f64, oneshot::Receiver<()>) {
        let requested = if when_secs.is_finite() && when_secs > 0.0 {
            (when_secs * f64::from(self.sample_rate)).round() as u64
        } else {
            0
        };
        let start_frame = requested.max(self.frame);
        let (tx, rx) = oneshot::channel();
        let id = self.next_id;
        self.next_id += 1;
        let mut source = Source {
            id,
            start_frame,
            samples,
            ended: Some(tx),
        };
        if source.samples.is_empty() {
            source.finish();
        } else {
            self.sources.push(source);
        }
        (id, start_frame as f64 / f64::from(self.sample_rate), rx)
    }

    pub(crate) fn stop(&mut self, id: u64) {
        if let Some(pos) = self.sources.iter().position(|s| s.id == id) {
            let mut source = self.sources.swap_remove(pos);
            source.finish();
        }
    }

    pub(crate) fn stop_all(&mut self) {
        for mut source in self.sources.drain(..) {
            source.finish();
        }
    }

    /// Number of sources not yet finished.
    pub(crate) fn active(&self) -> usize {
        self.sources.len()
    }

    /// Fill `out` with the mix of the next `out.len()` frames and advance.
    pub(crate) fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let from = self.frame;
        let to = from + out.len() as u64;
        for source in &self.sources {
            let start = source.start_frame.max(from);
            let end = source.end_frame().min(to);
            if start >= end {
                continue;
            }
            let src_off = (start - source.start_frame) as usize;
            let out_off = (start - from) as usize;
            let len = (end - start) as usize;
            for (o, s) in out[out_off..out_off + len]
                .iter_mut()
                .zip(&source.samples[src_off..src_off + len])
            {
                *o += *s;
            }
        }
        for o in out.iter_mut() {
            *o = o.clamp(-1.0, 1.0);
        }
        self.advance_frames(out.len() as u64);
    }

    /// Advance the clock without producing output.
    pub(crate) fn advance_frames(&mut self, frames: u64) {
        self.frame += frames;
        let now = self.frame;
        self.sources.retain_mut(|source| {
            if source.end_frame() <= now {
                source.finish();
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn sources_mix_at_their_start_frame() {
        let mut mixer = Mixer::new(10);
        mixer.add(vec![0.5; 3], 0.2);
        mixer.add(vec![0.25; 2], 0.3);
        let mut out = [0.0; 6];
        mixer.render(&mut out);
        assert_eq!(out, [0.0, 0.0, 0.5, 0.75, 0.75, 0.0]);
        assert_eq!(mixer.active(), 0);
    }

    #[test]
    fn past_start_times_clamp_to_now() {
        let mut mixer = Mixer::new(10);
        mixer.advance_frames(5);
        let (_, start, _) = mixer.add(vec![0.1; 2], 0.1);
        assert!((start - 0.5).abs() < 1e-9);
    }

    #[test]
    fn ended_fires_on_completion_and_stop() {
        let mut mixer = Mixer::new(10);
        let (_, _, mut done) = mixer.add(vec![0.1; 2], 0.0);
        let (id, _, mut stopped) = mixer.add(vec![0.1; 100], 0.0);
        mixer.advance_frames(1);
        assert!(done.try_recv().is_err());
        mixer.advance_frames(1);
        assert!(done.try_recv().is_ok());
        mixer.stop(id);
        assert!(stopped.try_recv().is_ok());
    }

    #[test]
    fn empty_source_ends_immediately() {
        let mut mixer = Mixer::new(10);
        let (_, _, mut rx) = mixer.add(Vec::new(), 1.0);
        assert!(rx.try_recv().is_ok());
        assert_eq!(mixer.active(), 0);
    }

    #[test]
    fn output_is_clamped() {
        let mut mixer = Mixer::new(10);
        mixer.add(vec![0.8; 1], 0.0);
        mixer.add(vec![0.8; 1], 0.0);
        let mut out = [0.0; 1];
        mixer.render(&mut out);
        assert_eq!(out[0], 1.0);
    }
}
