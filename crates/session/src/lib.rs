//! Streaming generation orchestrator.
//!
//! One `Session` owns at most one in-flight generation at a time, pumps
//! decoded deltas through a throttled emitter to the consumer's event
//! channel, creates conversations lazily once a response is confirmed
//! alive, and detaches best-effort title generation.

pub mod controller;
pub mod emitter;
pub mod strategy;
pub mod title;

pub use controller::{SendRequest, Session};
pub use emitter::ThrottledEmitter;
