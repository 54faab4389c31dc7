//! # rover-types
//!
//! Shared data model for the RtkRover autonomy stack.
//!
//! These types are used by:
//! - `rover-core`: the GNSS parser, navigator, motor translator and supervisor
//! - `rover-supervisor`: the process entry point wiring the core to real hardware
//! - `rover-sim`: the software rover/GNSS simulator used for local development
//!
//! All reception timestamps are monotonic milliseconds relative to a single
//! process-wide epoch (see `rover-core::clock`), not wall-clock time — this
//! keeps the model plain, `Serialize`-able data while still supporting the
//! staleness/ramp-rate comparisons spec.md requires.

use serde::{Deserialize, Serialize};

// ── Fix quality ───────────────────────────────────────────────────────────────

/// Ordinal GNSS fix classification (`NO_FIX < SINGLE < DGPS < RTK_FLOAT < RTK_FIXED`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixQuality {
    #[default]
    NoFix,
    GpsSingle,
    Dgps,
    RtkFloat,
    RtkFixed,
}

impl FixQuality {
    /// Map an NMEA GGA fix-quality digit. Returns the mapped quality plus
    /// whether the digit was unrecognized (caller should count a warning).
    ///
    /// `0→NO_FIX, 1→GPS_SINGLE, 2→DGPS, 4→RTK_FIXED, 5→RTK_FLOAT`; anything
    /// else maps to `GPS_SINGLE` with `unrecognized = true`.
    pub fn from_nmea_digit(digit: u8) -> (Self, bool) {
        match digit {
            0 => (Self::NoFix, false),
            1 => (Self::GpsSingle, false),
            2 => (Self::Dgps, false),
            4 => (Self::RtkFixed, false),
            5 => (Self::RtkFloat, false),
            _ => (Self::GpsSingle, true),
        }
    }
}

// ── Geodetic position ─────────────────────────────────────────────────────────

/// WGS-84 position plus fix metadata and a monotonic reception timestamp.
///
/// Invariant: `lat ∈ [-90, 90]`, `lon ∈ [-180, 180]`. Enforcement happens at
/// construction time in the GNSS parser (§4.1); this struct itself is plain
/// data and does not re-validate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeodeticPosition {
    pub lat: f64,
    pub lon: f64,
    pub alt_m: Option<f64>,
    pub fix_quality: FixQuality,
    pub satellites: u32,
    /// Horizontal dilution of precision. `None` means "unknown".
    pub hdop: Option<f64>,
    /// Monotonic reception timestamp, milliseconds since process epoch.
    pub received_at_ms: u64,
}

impl GeodeticPosition {
    pub fn is_valid_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Position plus course-over-ground and ground speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinematicSample {
    pub position: GeodeticPosition,
    /// Degrees, 0 = north, clockwise-positive, wraps at 360. `None` when
    /// heading is unavailable or was marked unreliable by the parser.
    pub course_deg: Option<f64>,
    /// Meters per second, non-negative. `None` when unavailable.
    pub speed_mps: Option<f64>,
}

// ── Waypoints ──────────────────────────────────────────────────────────────────

/// A geodetic target with a reach tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
    pub name: Option<String>,
    pub tolerance_m: f64,
    /// Optional per-waypoint speed cap in `[0, 1]`.
    pub speed_cap: Option<f64>,
}

impl Waypoint {
    pub const DEFAULT_TOLERANCE_M: f64 = 0.5;

    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            name: None,
            tolerance_m: Self::DEFAULT_TOLERANCE_M,
            speed_cap: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tolerance(mut self, tolerance_m: f64) -> Self {
        self.tolerance_m = tolerance_m;
        self
    }
}

// ── Navigation state ───────────────────────────────────────────────────────────

/// `{IDLE, CALIBRATING, ALIGNING, DRIVING, REACHED}` — the six-edge phase
/// machine of spec §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NavigationPhase {
    #[default]
    Idle,
    Calibrating,
    Aligning,
    Driving,
    Reached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NavMode {
    #[default]
    Single,
    Path,
    Loop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NavStatus {
    #[default]
    Idle,
    Navigating,
    ReachedWaypoint,
    PathComplete,
    Error,
    Paused,
}

/// Observable navigation snapshot returned by `get_navigation_status` (§6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationState {
    pub phase: NavigationPhase,
    pub target: Option<Waypoint>,
    pub distance_m: Option<f64>,
    pub bearing_deg: Option<f64>,
    pub heading_deg: Option<f64>,
    pub speed_mps: Option<f64>,
    pub mode: NavMode,
    pub status: NavStatus,
    pub error: Option<String>,
    pub remaining_waypoints: usize,
    pub loop_count: u64,
}

impl Default for NavigationState {
    fn default() -> Self {
        Self {
            phase: NavigationPhase::Idle,
            target: None,
            distance_m: None,
            bearing_deg: None,
            heading_deg: None,
            speed_mps: None,
            mode: NavMode::Single,
            status: NavStatus::Idle,
            error: None,
            remaining_waypoints: 0,
            loop_count: 0,
        }
    }
}

// ── Drive / wheel commands ─────────────────────────────────────────────────────

/// Normalized drive command: `speed`/`turn_rate` both in `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveCommand {
    pub speed: f64,
    pub turn_rate: f64,
    pub generated_at_ms: u64,
    pub priority: u8,
}

impl DriveCommand {
    pub fn zero(generated_at_ms: u64) -> Self {
        Self {
            speed: 0.0,
            turn_rate: 0.0,
            generated_at_ms,
            priority: 0,
        }
    }
}

/// Per-side wheel command, both sides in `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct WheelCommand {
    pub left: f64,
    pub right: f64,
}

impl WheelCommand {
    pub const ZERO: WheelCommand = WheelCommand {
        left: 0.0,
        right: 0.0,
    };
}

// ── System status (§6.4 get_system_status) ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub gps_connected: bool,
    pub ntrip_connected: bool,
    pub fix_quality: FixQuality,
    pub satellites: u32,
    pub hdop: Option<f64>,
    pub mode: NavMode,
}
