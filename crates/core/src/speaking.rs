//! Debounced speaking detection from sampled volume levels.
//!
//! Two parties are monitored with the same debouncing logic but different
//! sampling strategies: the local microphone pushes levels through an SDK
//! callback, while the remote audio stream is polled on a fixed cadence.
//! Both are variants of one detector so the threshold/change-only logic is
//! not duplicated.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::capability::RemoteAudioTrack;

/// Local microphone levels arrive in `[0, 100]`; above this is speech.
pub const LOCAL_SPEAKING_THRESHOLD: f32 = 50.0;

/// Remote track levels arrive in `[0, 1]`; above this is speech.
pub const REMOTE_SPEAKING_THRESHOLD: f32 = 0.05;

/// Poll cadence for the remote audio stream.
pub const DEFAULT_REMOTE_POLL_INTERVAL: Duration = Duration::from_millis(160);

/// Threshold comparison plus change-only emission.
struct Debounce {
    threshold: f32,
    state: watch::Sender<bool>,
}

impl Debounce {
    fn apply(&self, level: f32) -> bool {
        let speaking = level > self.threshold;
        self.state.send_if_modified(|current| {
            if *current == speaking {
                false
            } else {
                *current = speaking;
                true
            }
        })
    }
}

#[derive(Clone, Copy)]
enum SourceMode {
    /// Levels are delivered by an external callback.
    Push,
    /// Levels are read from an attached track every `period`.
    Poll { period: Duration },
}

/// Derives a boolean speaking state from a noisy volume signal.
///
/// The observable boolean only changes when the thresholded value actually
/// flips, so downstream observers are not woken on every sample.
pub struct SpeakingDetector {
    inner: Arc<Debounce>,
    mode: SourceMode,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl SpeakingDetector {
    /// Detector fed by an external push callback (local microphone).
    pub fn push(threshold: f32) -> Self {
        Self::new(threshold, SourceMode::Push)
    }

    /// Detector that polls an attached track (remote audio stream).
    pub fn poll(threshold: f32, period: Duration) -> Self {
        Self::new(threshold, SourceMode::Poll { period })
    }

    fn new(threshold: f32, mode: SourceMode) -> Self {
        let (state, _) = watch::channel(false);
        Self {
            inner: Arc::new(Debounce { threshold, state }),
            mode,
            poll_task: Mutex::new(None),
        }
    }

    /// Feeds one volume sample. Returns whether the speaking state changed.
    pub fn sample(&self, level: f32) -> bool {
        self.inner.apply(level)
    }

    /// Attaches a track and starts polling it. A previously attached track's
    /// poll timer is torn down first.
    pub fn attach(&self, track: Arc<dyn RemoteAudioTrack>) {
        let SourceMode::Poll { period } = self.mode else {
            warn!("attach called on a push-fed detector; ignoring");
            return;
        };
        self.detach();

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                inner.apply(read_level(track.as_ref()));
            }
        });
        *self.poll_task.lock() = Some(handle);
    }

    /// Tears down the poll timer and forces the state to not-speaking.
    /// Called when the underlying source disappears.
    pub fn detach(&self) {
        if let Some(handle) = self.poll_task.lock().take() {
            handle.abort();
        }
        self.reset();
    }

    /// Forces the state back to not-speaking.
    pub fn reset(&self) {
        self.inner.apply(0.0);
    }

    pub fn is_speaking(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Watch the speaking boolean; receivers only wake on actual changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }
}

impl Drop for SpeakingDetector {
    fn drop(&mut self) {
        if let Some(handle) = self.poll_task.lock().take() {
            handle.abort();
        }
    }
}

/// Reads the current level off a track, first accessor present wins. A
/// missing accessor reads as silence; a failing read is logged and treated
/// as silence for this tick.
fn read_level(track: &dyn RemoteAudioTrack) -> f32 {
    let read = track.volume_level().or_else(|| track.current_level());
    match read {
        Some(Ok(level)) => level,
        Some(Err(e)) => {
            warn!(error = ?e, "unable to read remote audio level");
            0.0
        }
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FixedTrack(f32);

    impl RemoteAudioTrack for FixedTrack {
        fn volume_level(&self) -> Option<anyhow::Result<f32>> {
            Some(Ok(self.0))
        }
    }

    struct LegacyTrack(f32);

    impl RemoteAudioTrack for LegacyTrack {
        fn current_level(&self) -> Option<anyhow::Result<f32>> {
            Some(Ok(self.0))
        }
    }

    struct FailingTrack;

    impl RemoteAudioTrack for FailingTrack {
        fn volume_level(&self) -> Option<anyhow::Result<f32>> {
            Some(Err(anyhow!("track detached mid-read")))
        }
    }

    struct BareTrack;

    impl RemoteAudioTrack for BareTrack {}

    #[test]
    fn local_sequence_emits_only_on_change() {
        let detector = SpeakingDetector::push(LOCAL_SPEAKING_THRESHOLD);
        let levels = [0.0, 60.0, 60.0, 40.0, 51.0];
        let changes: Vec<bool> = levels.iter().map(|&l| detector.sample(l)).collect();

        // 0 -> no change, 60 -> true, 60 -> no change, 40 -> false, 51 -> true.
        assert_eq!(changes, [false, true, false, true, true]);
        assert_eq!(changes.iter().filter(|&&c| c).count(), 3);
        assert!(detector.is_speaking());
    }

    #[test]
    fn threshold_is_strictly_greater_than() {
        let detector = SpeakingDetector::push(LOCAL_SPEAKING_THRESHOLD);
        assert!(!detector.sample(50.0));
        assert!(!detector.is_speaking());
        assert!(detector.sample(50.1));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_track_detected_within_one_poll_interval() {
        let detector =
            SpeakingDetector::poll(REMOTE_SPEAKING_THRESHOLD, DEFAULT_REMOTE_POLL_INTERVAL);
        detector.attach(Arc::new(FixedTrack(0.10)));

        tokio::time::sleep(Duration::from_millis(170)).await;
        assert!(detector.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn legacy_accessor_wins_when_primary_is_absent() {
        let detector =
            SpeakingDetector::poll(REMOTE_SPEAKING_THRESHOLD, DEFAULT_REMOTE_POLL_INTERVAL);
        detector.attach(Arc::new(LegacyTrack(0.10)));

        tokio::time::sleep(Duration::from_millis(170)).await;
        assert!(detector.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn detach_forces_not_speaking_immediately() {
        let detector =
            SpeakingDetector::poll(REMOTE_SPEAKING_THRESHOLD, DEFAULT_REMOTE_POLL_INTERVAL);
        detector.attach(Arc::new(FixedTrack(0.50)));
        tokio::time::sleep(Duration::from_millis(170)).await;
        assert!(detector.is_speaking());

        detector.detach();
        assert!(!detector.is_speaking());

        // The poll timer is gone: nothing flips the state back.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!detector.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reads_count_as_silence() {
        let detector =
            SpeakingDetector::poll(REMOTE_SPEAKING_THRESHOLD, DEFAULT_REMOTE_POLL_INTERVAL);
        detector.attach(Arc::new(FailingTrack));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!detector.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn track_without_accessors_reads_as_silence() {
        let detector =
            SpeakingDetector::poll(REMOTE_SPEAKING_THRESHOLD, DEFAULT_REMOTE_POLL_INTERVAL);
        detector.attach(Arc::new(BareTrack));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!detector.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn reattach_replaces_the_poll_timer() {
        let detector =
            SpeakingDetector::poll(REMOTE_SPEAKING_THRESHOLD, DEFAULT_REMOTE_POLL_INTERVAL);
        detector.attach(Arc::new(FixedTrack(0.50)));
        detector.attach(Arc::new(FixedTrack(0.0)));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!detector.is_speaking(), "only the new track must be polled");
    }

    #[tokio::test(start_paused = true)]
    async fn change_only_emission_over_watch() {
        let detector = SpeakingDetector::push(LOCAL_SPEAKING_THRESHOLD);
        let mut rx = detector.subscribe();

        detector.sample(60.0);
        detector.sample(60.0);
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
        // The second identical sample did not re-notify.
        assert!(!rx.has_changed().unwrap());
    }
}
