//! Ember: streaming speech for a conversational coaching app.
//!
//! The crate turns an incrementally generated LLM reply into ordered,
//! sentence-level audio and plays it back in sync with the text:
//! LLM tokens → sentence detector → sequential synthesis → SSE → playback queue
//!
//! # Architecture
//!
//! - **text**: sentence segmentation of a live token stream and speech sanitization
//! - **tts**: vendor adapters behind one [`tts::TtsProvider`] contract, with
//!   word-timing estimation and WAV-based timing correction
//! - **pipeline**: the [`pipeline::SynthesisProcessor`] that emits audio chunks
//!   strictly in enqueue order with a running timeline offset
//! - **transport**: the `data: {json}` event stream shared by server and client
//! - **server**: axum endpoint multiplexing tokens and audio for one turn
//! - **playback**: client-side scheduling on an audio clock with word highlighting
//! - **audio**: audio context backends (cpal device, virtual clock) and decoding

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod playback;
pub mod server;
pub mod text;
pub mod transport;
pub mod tts;

pub use config::SpeechConfig;
pub use error::{Result, SpeechError};
pub use pipeline::messages::AudioChunk;
pub use pipeline::processor::SynthesisProcessor;
pub use playback::queue::StreamingAudioQueue;
pub use text::sentence::SentenceDetector;
pub use transport::event::StreamEvent;
