//! C3 — Position Store (§4.3). The single source of truth for "where are
//! we now", shared between the receiver task and the navigator/supervisor
//! tasks via a `tokio::sync::watch` channel.

use rover_types::KinematicSample;
use tokio::sync::watch;

/// Samples older than this are considered stale by `PositionStore::is_stale`.
pub const DEFAULT_STALE_MS: u64 = 1_500;

/// A `Sync`/`Clone`-able handle onto the latest accepted kinematic sample.
///
/// Cloning a `PositionStore` is cheap (it clones a `watch` sender/receiver
/// pair) and every clone observes the same underlying slot.
#[derive(Clone)]
pub struct PositionStore {
    tx: watch::Sender<Option<KinematicSample>>,
}

impl PositionStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Publish a new accepted sample, overwriting whatever was there.
    pub fn publish(&self, sample: KinematicSample) {
        // `send` errors when there are no receivers; `send_replace` always
        // updates the held value regardless, which is what every caller
        // here actually wants (some never subscribe at all).
        self.tx.send_replace(Some(sample));
    }

    /// Snapshot the latest sample, if one has ever been published.
    pub fn latest(&self) -> Option<KinematicSample> {
        *self.tx.borrow()
    }

    /// A receiver that can be awaited for updates (`changed().await`).
    pub fn subscribe(&self) -> watch::Receiver<Option<KinematicSample>> {
        self.tx.subscribe()
    }

    /// Whether the latest sample (if any) is older than `max_age_ms` as of
    /// `now_ms`. A store with no sample yet is considered stale.
    pub fn is_stale(&self, now_ms: u64, max_age_ms: u64) -> bool {
        match self.latest() {
            Some(s) => now_ms.saturating_sub(s.position.received_at_ms) > max_age_ms,
            None => true,
        }
    }
}

impl Default for PositionStore {
    fn default() -> Self {
        Self::new()
    }
}
