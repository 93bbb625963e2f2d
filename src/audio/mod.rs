//! Client-side audio: context backends and payload decoding.

pub mod context;
pub mod cpal_context;
pub mod decode;
mod mixer;
pub mod virtual_context;

pub use context::{AudioBuffer, AudioContext, ContextState, ScheduledSource};
pub use cpal_context::CpalAudioContext;
pub use decode::decode_audio;
pub use virtual_context::VirtualAudioContext;
