//! Configuration surface (§6.5), loaded from TOML and overridable from the
//! CLI in `rover-supervisor`. Every key has a `Default` matching spec's
//! table so a missing `rover.toml` still produces a runnable configuration.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub port: String,
    pub baud: u32,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            port: default_receiver_port().to_string(),
            baud: 115_200,
        }
    }
}

#[cfg(unix)]
fn default_receiver_port() -> &'static str {
    "/dev/ttyACM0"
}

#[cfg(windows)]
fn default_receiver_port() -> &'static str {
    "COM3"
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CasterConfig {
    pub host: String,
    pub port: u16,
    pub mountpoint: String,
    pub user: String,
    pub pass: String,
}

fn default_caster_port() -> u16 {
    2101
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    pub max_speed: f64,
    pub align_tolerance_deg: f64,
    pub realign_threshold_deg: f64,
    pub waypoint_tolerance_m: f64,
    pub align_speed: f64,
    pub align_timeout_s: f64,
    pub calibration_duration_s: f64,
    pub drive_correction_gain: f64,
    pub loop_mode: bool,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            max_speed: 1.0,
            align_tolerance_deg: 15.0,
            realign_threshold_deg: 30.0,
            waypoint_tolerance_m: 0.5,
            align_speed: 0.4,
            align_timeout_s: 10.0,
            calibration_duration_s: 5.0,
            drive_correction_gain: 0.02,
            loop_mode: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    pub ramp_rate: f64,
    pub turn_sensitivity: f64,
    pub safety_timeout_s: f64,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            ramp_rate: 0.5,
            turn_sensitivity: 1.0,
            safety_timeout_s: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    pub period_ms: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self { period_ms: 500 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RoverConfig {
    pub receiver: ReceiverConfig,
    pub caster: CasterConfig,
    pub nav: NavConfig,
    pub motor: MotorConfig,
    pub tick: TickConfig,
}

impl RoverConfig {
    /// Parse from a TOML string, falling back to defaults for any section
    /// that is absent or malformed within a present section's keys.
    pub fn from_toml_str(s: &str) -> Result<Self, toml_like::ParseError> {
        toml_like::from_str(s)
    }

    pub fn validate(&self) -> Result<(), crate::error::StartupError> {
        use crate::error::StartupError;
        if self.nav.realign_threshold_deg <= self.nav.align_tolerance_deg {
            return Err(StartupError::InvalidConfig(
                "nav.realign_threshold_deg must exceed nav.align_tolerance_deg".into(),
            ));
        }
        if self.nav.waypoint_tolerance_m <= 0.0 {
            return Err(StartupError::InvalidConfig(
                "nav.waypoint_tolerance_m must be > 0".into(),
            ));
        }
        if !(0.01..=1.0).contains(&self.motor.ramp_rate) {
            return Err(StartupError::InvalidConfig(
                "motor.ramp_rate must be in [0.01, 1.0]".into(),
            ));
        }
        if self.tick.period_ms == 0 {
            return Err(StartupError::InvalidConfig(
                "tick.period_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl CasterConfig {
    pub fn port_or_default(&self) -> u16 {
        if self.port == 0 {
            default_caster_port()
        } else {
            self.port
        }
    }
}

/// Minimal TOML deserialization shim kept private to this module so the
/// `RoverConfig::from_toml_str` signature doesn't leak the `toml` crate's
/// error type into callers that only care about "did it parse".
mod toml_like {
    use super::RoverConfig;

    #[derive(Debug)]
    pub struct ParseError(pub String);

    impl std::fmt::Display for ParseError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl std::error::Error for ParseError {}

    pub fn from_str(s: &str) -> Result<RoverConfig, ParseError> {
        toml::from_str(s).map_err(|e| ParseError(e.to_string()))
    }
}
