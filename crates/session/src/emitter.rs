//! Timer-gated coalescing of content fragments.
//!
//! The gate is wall-clock elapsed-since-last-emit, reset on every emit:
//! the first non-empty fragment goes out immediately (this is what lets a
//! consumer leave its "pending" state), later fragments are coalesced and
//! released no more often than once per interval, and end-of-stream flushes
//! whatever remains exactly once.

use shared::events::UiEvent;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{Duration, Instant};

pub struct ThrottledEmitter {
    events: UnboundedSender<UiEvent>,
    interval: Duration,
    /// Buffered-but-unsent content.
    pending: String,
    /// Everything pushed so far, kept for persistence.
    full_text: String,
    last_emit: Option<Instant>,
    finished: bool,
}

impl ThrottledEmitter {
    pub fn new(events: UnboundedSender<UiEvent>, interval: Duration) -> Self {
        Self {
            events,
            interval,
            pending: String::new(),
            full_text: String::new(),
            last_emit: None,
            finished: false,
        }
    }

    /// Accept one content fragment, forwarding the coalesced buffer when
    /// the gate allows.
    pub fn push(&mut self, fragment: &str) {
        if self.finished || fragment.is_empty() {
            return;
        }
        self.full_text.push_str(fragment);
        self.pending.push_str(fragment);

        let due = match self.last_emit {
            None => true,
            Some(at) => at.elapsed() >= self.interval,
        };
        if due {
            self.emit();
        }
    }

    /// Reasoning text bypasses the gate entirely; it rides its own event
    /// and has no ordering relation to content.
    pub fn push_reasoning(&mut self, fragment: &str) {
        if self.finished || fragment.is_empty() {
            return;
        }
        let _ = self
            .events
            .send(UiEvent::StreamReasoning(fragment.to_string()));
    }

    /// End-of-stream: release any residual buffered text. Idempotent; later
    /// pushes are ignored.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if !self.pending.is_empty() {
            self.emit();
        }
    }

    /// The full accumulated content of the stream.
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    fn emit(&mut self) {
        let batch = std::mem::take(&mut self.pending);
        self.last_emit = Some(Instant::now());
        let _ = self.events.send(UiEvent::StreamChunk(batch));
    }
}
