//! Idle-stream detection.

use super::SharedReply;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::warn;

pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);
pub const STALL_THRESHOLD: Duration = Duration::from_secs(15);
pub const STALL_NOTICE: &str = "\n[Response truncated: stream stalled]";

/// Spawns the watchdog for one streaming request.
///
/// Wakes every second; once no chunk has arrived for the stall threshold and
/// the reply is still live, it appends the truncation notice, wins the
/// finalize transition and asks the read loop to stop. It disables itself as
/// soon as it observes completion from any path.
pub fn spawn_watchdog(reply: SharedReply) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(WATCHDOG_INTERVAL);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if reply.is_finalized() {
                break;
            }
            if reply.idle_for() >= STALL_THRESHOLD {
                if reply.stall_finalize(STALL_NOTICE) {
                    warn!(
                        idle_secs = reply.idle_for().as_secs(),
                        "stream stalled, forcing completion"
                    );
                }
                break;
            }
        }
    })
}
