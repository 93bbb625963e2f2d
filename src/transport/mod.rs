//! Wire format shared by the server and the listening client.

pub mod event;
pub mod sse;

pub use event::StreamEvent;
pub use sse::{SseFrame, SseLineParser};
