//! Renders a simulated ground-truth pose as `GGA`/`VTG` sentences, the
//! inverse of `rover_core::parser`. Kept in the simulator rather than the
//! core crate: the core only ever needs to decode this wire format.

use rover_types::FixQuality;

use crate::physics::GroundTruth;

pub fn gga_sentence(pose: &GroundTruth, fix: FixQuality, satellites: u32, hdop: f64) -> String {
    let (lat_deg, lat_min, lat_hemi) = decompose(pose.lat, true);
    let (lon_deg, lon_min, lon_hemi) = decompose(pose.lon, false);
    let fix_digit: u8 = match fix {
        FixQuality::NoFix => 0,
        FixQuality::GpsSingle => 1,
        FixQuality::Dgps => 2,
        FixQuality::RtkFixed => 4,
        FixQuality::RtkFloat => 5,
    };
    let body = format!(
        "GPGGA,120000,{lat_deg:02}{lat_min:07.4},{lat_hemi},{lon_deg:03}{lon_min:07.4},{lon_hemi},{fix_digit},{satellites:02},{hdop:.1},10.0,M,0.0,M,,"
    );
    checksummed(&body)
}

pub fn vtg_sentence(pose: &GroundTruth) -> String {
    let knots = pose.speed_mps / rover_core::parser::KNOTS_TO_MPS;
    let body = format!(
        "GPVTG,{course:.1},T,,M,{knots:.2},N,{kph:.2},K",
        course = pose.heading_deg,
        kph = pose.speed_mps * 3.6,
    );
    checksummed(&body)
}

fn checksummed(body: &str) -> String {
    let checksum = body.bytes().fold(0u8, |c, b| c ^ b);
    format!("${body}*{checksum:02X}")
}

fn decompose(value: f64, is_lat: bool) -> (u32, f64, &'static str) {
    let hemi = if is_lat {
        if value < 0.0 { "S" } else { "N" }
    } else if value < 0.0 {
        "W"
    } else {
        "E"
    };
    let abs = value.abs();
    let degrees = abs.trunc() as u32;
    let minutes = (abs - degrees as f64) * 60.0;
    (degrees, minutes, hemi)
}
