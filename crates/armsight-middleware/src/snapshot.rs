//! Latest-value perception channel.
//!
//! The perception producer replaces the whole snapshot at its own cadence;
//! the servo and the grasp coordinator read whatever is current.  Built on
//! [`tokio::sync::watch`], so a read never observes a half-written update and
//! never blocks the writer for longer than a clone.

use std::sync::Arc;
use std::time::Duration;

use armsight_types::{CameraSource, RefinedDetection};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::trace;

/// Everything the perception side knows about one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PerceptionSnapshot {
    /// Monotonic publish counter; `0` for the initial empty snapshot.
    pub sequence: u64,
    pub detections: Vec<RefinedDetection>,
    pub focus_score: f32,
    pub source: CameraSource,
    pub captured_at: DateTime<Utc>,
}

impl PerceptionSnapshot {
    pub fn new(detections: Vec<RefinedDetection>, focus_score: f32, source: CameraSource) -> Self {
        Self {
            sequence: 0,
            detections,
            focus_score,
            source,
            captured_at: Utc::now(),
        }
    }

    /// First detection whose label contains `label`, case-insensitively.
    pub fn find(&self, label: &str) -> Option<&RefinedDetection> {
        self.detections.iter().find(|d| d.matches(label))
    }

    /// Older than `max_age` relative to `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        let age = now.signed_duration_since(self.captured_at);
        age.to_std().is_ok_and(|a| a > max_age)
    }
}

impl Default for PerceptionSnapshot {
    fn default() -> Self {
        Self {
            sequence: 0,
            detections: Vec::new(),
            focus_score: 0.0,
            source: CameraSource::World,
            captured_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Shared handle to the current [`PerceptionSnapshot`].  Clone freely.
#[derive(Clone, Debug)]
pub struct PerceptionHub {
    tx: Arc<watch::Sender<PerceptionSnapshot>>,
}

impl PerceptionHub {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(PerceptionSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current snapshot, stamping it with the next sequence
    /// number.  Returns that number.
    pub fn publish(&self, mut snapshot: PerceptionSnapshot) -> u64 {
        let mut seq = 0;
        self.tx.send_modify(|current| {
            seq = current.sequence + 1;
            snapshot.sequence = seq;
            *current = snapshot;
        });
        trace!(sequence = seq, "perception snapshot published");
        seq
    }

    /// Copy of the current snapshot.
    pub fn latest(&self) -> PerceptionSnapshot {
        self.tx.borrow().clone()
    }

    /// Async change notifications, for consumers that want to wait.
    pub fn subscribe(&self) -> watch::Receiver<PerceptionSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for PerceptionHub {
    fn default() -> Self {
        Self::new()
    }
}
