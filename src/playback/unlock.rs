//! Recovering audio contexts that start suspended.
//!
//! Some platforms create audio contexts in a suspended state until the
//! user interacts, and a resume request made outside an interaction may
//! never complete. The playback queue therefore never waits on resume.
//! It arms an [`UnlockStrategy`] instead, which resumes the context on the
//! next qualifying gesture.

use crate::audio::{AudioContext, ContextState};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// User interactions that may unlock audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GestureKind {
    /// Touch began.
    TouchStart,
    /// Touch ended.
    TouchEnd,
    /// Pointer click or key activation.
    Click,
}

impl GestureKind {
    /// Every gesture kind an unlock listens for.
    pub const ALL: [GestureKind; 3] = [Self::TouchStart, Self::TouchEnd, Self::Click];
}

/// How a suspended context gets resumed.
pub trait UnlockStrategy: Send + Sync {
    /// Called with a context that is not running. Must not block.
    fn arm(&self, context: Arc<dyn AudioContext>);

    /// Drop any pending listeners.
    fn disarm(&self) {}
}

/// For platforms without gesture requirements: never fires.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUnlock;

impl UnlockStrategy for NoopUnlock {
    fn arm(&self, _context: Arc<dyn AudioContext>) {}
}

struct Listener {
    kind: GestureKind,
    context: Arc<dyn AudioContext>,
}

/// One-shot gesture listeners that resume the context.
///
/// [`arm`](UnlockStrategy::arm) registers one listener per [`GestureKind`].
/// The host forwards interactions through [`dispatch`](Self::dispatch); the
/// matching listener requests a resume and removes itself. Once the context
/// is running the remaining listeners are removed as well.
#[derive(Default)]
pub struct GestureUnlock {
    listeners: Mutex<Vec<Listener>>,
}

impl GestureUnlock {
    /// No listeners registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward a user interaction. Returns whether a listener fired.
    pub fn dispatch(&self, kind: GestureKind) -> bool {
        let fired = {
            let Ok(mut listeners) = self.listeners.lock() else {
                return false;
            };
            match listeners.iter().position(|l| l.kind == kind) {
                Some(pos) => listeners.remove(pos),
                None => return false,
            }
        };

        if let Err(e) = fired.context.resume() {
            warn!(?kind, "resume on gesture failed: {e}");
            return true;
        }
        debug!(?kind, "audio unlocked by gesture");
        if fired.context.state() == ContextState::Running
            && let Ok(mut listeners) = self.listeners.lock()
        {
            listeners.retain(|l| !Arc::ptr_eq(&l.context, &fired.context));
        }
        true
    }

    /// Number of listeners still waiting.
    pub fn pending(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

impl UnlockStrategy for GestureUnlock {
    fn arm(&self, context: Arc<dyn AudioContext>) {
        let Ok(mut listeners) = self.listeners.lock() else {
            return;
        };
        if listeners.iter().any(|l| Arc::ptr_eq(&l.context, &context)) {
            return;
        }
        debug!("audio context suspended, waiting for a user gesture");
        listeners.extend(GestureKind::ALL.iter().map(|&kind| Listener {
            kind,
            context: Arc::clone(&context),
        }));
    }

    fn disarm(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.clear();
        }
    }
}
