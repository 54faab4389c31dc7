//! Process-wide monotonic clock.
//!
//! All reception/generation timestamps in the data model are milliseconds
//! relative to a single `Instant` captured at first use, so that otherwise
//! plain, `Serialize`-able structs (`GeodeticPosition`, `DriveCommand`, ...)
//! can still support monotonic ordering and staleness checks without
//! carrying a non-serializable `Instant` around.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Milliseconds elapsed since the process epoch.
pub fn now_ms() -> u64 {
    epoch().elapsed().as_millis() as u64
}
