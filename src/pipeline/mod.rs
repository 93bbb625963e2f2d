//! Server-side synthesis pipeline: sentences in, ordered audio chunks out.

pub mod messages;
pub mod processor;

pub use messages::{AudioChunk, SynthesisUnit};
pub use processor::{ProcessorOptions, SynthesisProcessor};
