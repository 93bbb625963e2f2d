//! Client-side playback of streamed audio chunks.

pub mod queue;
pub mod unlock;

pub use queue::{ContextFactory, PlaybackEvent, StreamingAudioQueue};
pub use unlock::{GestureKind, GestureUnlock, NoopUnlock, UnlockStrategy};
