//! Event streaming to clients

mod sse;

pub use sse::{stream_events, SseConfig, SseError};
