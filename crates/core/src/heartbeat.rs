//! Periodic liveness pings for an active session.
//!
//! The backend stops the agent process when the frontend goes silent, so the
//! scheduler pings it at a fixed interval for exactly as long as a session is
//! active. At most one timer exists at a time; starting replaces any running
//! timer and stopping is idempotent.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::capability::HeartbeatSink;

/// Default ping interval, matching the backend's liveness window.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(3000);

/// Owns the single liveness timer for a session.
pub struct HeartbeatScheduler {
    sink: Arc<dyn HeartbeatSink>,
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatScheduler {
    pub fn new(sink: Arc<dyn HeartbeatSink>, period: Duration) -> Self {
        Self {
            sink,
            period,
            task: Mutex::new(None),
        }
    }

    /// Starts pinging `channel_id` every period. A running timer is stopped
    /// first, so two concurrent heartbeats can never exist.
    pub fn start(&self, channel_id: &str) {
        self.stop();

        let sink = Arc::clone(&self.sink);
        let period = self.period;
        let channel = channel_id.to_string();
        debug!(channel = %channel, period_ms = period.as_millis() as u64, "heartbeat started");

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                // Best-effort: a failed ping is logged and the next tick
                // fires regardless.
                if let Err(e) = sink.ping(&channel).await {
                    warn!(channel = %channel, error = ?e, "heartbeat ping failed");
                }
            }
        });

        *self.task.lock() = Some(handle);
    }

    /// Stops the timer. Calling this with no timer running is a no-op.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            debug!("heartbeat stopped");
        }
    }

    /// Whether a timer is currently scheduled.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts pings; optionally fails every call.
    struct CountingSink {
        pings: AtomicUsize,
        fail: bool,
    }

    impl CountingSink {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                pings: AtomicUsize::new(0),
                fail,
            })
        }

        fn count(&self) -> usize {
            self.pings.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HeartbeatSink for CountingSink {
        async fn ping(&self, _channel_id: &str) -> Result<()> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(anyhow!("backend unreachable"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pings_at_fixed_interval() {
        let sink = CountingSink::new(false);
        let scheduler = HeartbeatScheduler::new(sink.clone(), Duration::from_millis(3000));

        scheduler.start("test-channel");
        assert!(scheduler.is_running());
        assert_eq!(sink.count(), 0, "first ping waits a full period");

        tokio::time::sleep(Duration::from_millis(9100)).await;
        assert_eq!(sink.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_failure_does_not_stop_the_timer() {
        let sink = CountingSink::new(true);
        let scheduler = HeartbeatScheduler::new(sink.clone(), Duration::from_millis(3000));

        scheduler.start("test-channel");
        tokio::time::sleep(Duration::from_millis(9100)).await;
        assert_eq!(sink.count(), 3, "failed pings must not cancel later ticks");
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_the_running_timer() {
        let sink = CountingSink::new(false);
        let scheduler = HeartbeatScheduler::new(sink.clone(), Duration::from_millis(3000));

        scheduler.start("a");
        scheduler.start("b");
        tokio::time::sleep(Duration::from_millis(3100)).await;
        // A duplicate timer would have produced two pings per period.
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let sink = CountingSink::new(false);
        let scheduler = HeartbeatScheduler::new(sink.clone(), Duration::from_millis(3000));

        scheduler.start("test-channel");
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_start_is_a_noop() {
        let sink = CountingSink::new(false);
        let scheduler = HeartbeatScheduler::new(sink.clone(), DEFAULT_HEARTBEAT_INTERVAL);
        scheduler.stop();
        assert!(!scheduler.is_running());
    }
}
