//! Streaming reply state shared between the request worker, the watchdog and
//! the UI poller.

mod assembler;
mod watchdog;

pub use assembler::{extract_content, StreamAssembler};
pub use watchdog::{spawn_watchdog, STALL_NOTICE, STALL_THRESHOLD, WATCHDOG_INTERVAL};

use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

#[derive(Debug)]
struct ReplyState {
    reply: String,
    flushed: usize,
    stopping: bool,
    finalized: bool,
    last_activity: Instant,
}

/// Mutable state of one in-flight request.
///
/// The reply text is append-only until finalization, so any reader observes a
/// prefix of the final text. All fields live behind a single lock; every
/// read/update pair takes it once. Finalization is a one-way transition that
/// exactly one caller wins, whichever path (end-of-stream, cancellation,
/// watchdog) gets there first.
#[derive(Debug, Clone)]
pub struct SharedReply(Arc<Mutex<ReplyState>>);

impl SharedReply {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(ReplyState {
            reply: String::new(),
            flushed: 0,
            stopping: false,
            finalized: false,
            last_activity: Instant::now(),
        })))
    }

    /// Appends extracted content. A no-op once finalized, so text recovered
    /// after a watchdog truncation or a cancellation never leaks in.
    pub fn append(&self, text: &str) {
        let mut state = self.0.lock().unwrap();
        if !state.finalized {
            state.reply.push_str(text);
            state.last_activity = Instant::now();
        }
    }

    /// Records chunk arrival for the watchdog without changing the text.
    pub fn touch(&self) {
        let mut state = self.0.lock().unwrap();
        state.last_activity = Instant::now();
    }

    /// Returns the text appended since the last call and advances the flush
    /// cursor. The UI poller's read.
    pub fn take_new_text(&self) -> String {
        let mut state = self.0.lock().unwrap();
        let new = state.reply[state.flushed..].to_string();
        state.flushed = state.reply.len();
        new
    }

    pub fn snapshot(&self) -> String {
        self.0.lock().unwrap().reply.clone()
    }

    pub fn request_stop(&self) {
        self.0.lock().unwrap().stopping = true;
    }

    pub fn is_stopping(&self) -> bool {
        self.0.lock().unwrap().stopping
    }

    pub fn is_finalized(&self) -> bool {
        self.0.lock().unwrap().finalized
    }

    pub fn idle_for(&self) -> Duration {
        self.0.lock().unwrap().last_activity.elapsed()
    }

    /// Attempts the finalize transition. Returns true for exactly one caller.
    pub fn try_finalize(&self) -> bool {
        let mut state = self.0.lock().unwrap();
        if state.finalized {
            false
        } else {
            state.finalized = true;
            true
        }
    }

    /// Watchdog finalization: appends the truncation notice and requests the
    /// read loop to stop, all under one lock so the notice cannot race with a
    /// normal completion.
    pub fn stall_finalize(&self, notice: &str) -> bool {
        let mut state = self.0.lock().unwrap();
        if state.finalized {
            return false;
        }
        state.reply.push_str(notice);
        state.finalized = true;
        state.stopping = true;
        true
    }
}

impl Default for SharedReply {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn take_new_text_returns_suffix_once() {
        let reply = SharedReply::new();
        reply.append("hello ");
        assert_eq!(reply.take_new_text(), "hello ");
        reply.append("world");
        assert_eq!(reply.take_new_text(), "world");
        assert_eq!(reply.take_new_text(), "");
        assert_eq!(reply.snapshot(), "hello world");
    }

    #[tokio::test]
    async fn finalize_wins_exactly_once() {
        let reply = SharedReply::new();
        assert!(reply.try_finalize());
        assert!(!reply.try_finalize());
        assert!(!reply.stall_finalize("[late]"));
        assert_eq!(reply.snapshot(), "");
    }

    #[tokio::test]
    async fn append_after_finalize_is_dropped() {
        let reply = SharedReply::new();
        reply.append("kept");
        assert!(reply.try_finalize());
        reply.append(" dropped");
        assert_eq!(reply.snapshot(), "kept");
    }

    #[tokio::test]
    async fn stall_finalize_appends_notice_and_stops() {
        let reply = SharedReply::new();
        reply.append("partial");
        assert!(reply.stall_finalize("\n[truncated]"));
        assert!(reply.is_stopping());
        assert!(reply.is_finalized());
        assert_eq!(reply.snapshot(), "partial\n[truncated]");
    }
}
