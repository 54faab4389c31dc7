//! C1 — GNSS Stream Parser (§4.1).
//!
//! Decodes line-delimited NMEA 0183 sentences (`GGA` position/quality,
//! `VTG` course/speed) into the data model of `rover-types`. This module is
//! a synchronous state machine; the async coalescing/stall-detection loop
//! that drives it lives in `receiver`.

use rover_types::FixQuality;

use crate::error::ParseError;

/// Knots to meters-per-second.
pub const KNOTS_TO_MPS: f64 = 0.514_444_4;

/// Below this ground speed, reported course is considered unreliable and is
/// replaced by the last accepted heading (never fabricated).
pub const HEADING_RELIABLE_SPEED_MPS: f64 = 0.5;

/// Parsed fields from a `GGA` (position/quality) sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct GgaFields {
    pub lat: f64,
    pub lon: f64,
    pub fix_quality: FixQuality,
    pub satellites: u32,
    pub hdop: Option<f64>,
    pub alt_m: Option<f64>,
}

/// Parsed fields from a `VTG` (course/speed over ground) sentence, after
/// the heading-reliability rule has been applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VtgFields {
    pub course_deg: Option<f64>,
    pub speed_mps: f64,
}

/// What one accepted sentence contributed.
#[derive(Debug, Clone, PartialEq)]
pub enum SentenceEvent {
    Position(GgaFields),
    Velocity(VtgFields),
    /// `RMC`, `GSA`, `GSV` — accepted, but carry nothing the core needs.
    Ignored,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ParserCounters {
    pub checksum_failures: u64,
    pub malformed: u64,
    pub unrecognized_fix_quality: u64,
}

pub struct NmeaParser {
    last_reliable_heading_deg: Option<f64>,
    counters: ParserCounters,
}

impl Default for NmeaParser {
    fn default() -> Self {
        Self::new()
    }
}

impl NmeaParser {
    pub fn new() -> Self {
        Self {
            last_reliable_heading_deg: None,
            counters: ParserCounters::default(),
        }
    }

    pub fn counters(&self) -> ParserCounters {
        self.counters
    }

    /// Accept one line from the receiver stream. Checksum failures and
    /// malformed lines are counted and returned as `Err` — callers drop the
    /// line and continue (§7 "Transient input").
    pub fn accept_line(&mut self, line: &str) -> Result<SentenceEvent, ParseError> {
        let line = line.trim();
        if !line.starts_with('$') {
            self.counters.malformed += 1;
            return Err(ParseError::Malformed("missing '$'"));
        }

        let star = line.find('*').ok_or_else(|| {
            self.counters.malformed += 1;
            ParseError::Malformed("missing '*' checksum marker")
        })?;

        let body = &line[1..star];
        let checksum_hex = line.get(star + 1..star + 3).ok_or_else(|| {
            self.counters.malformed += 1;
            ParseError::Malformed("truncated checksum")
        })?;
        let expected = u8::from_str_radix(checksum_hex, 16).map_err(|_| {
            self.counters.malformed += 1;
            ParseError::Malformed("non-hex checksum")
        })?;
        let actual = body.bytes().fold(0u8, |c, b| c ^ b);
        if actual != expected {
            self.counters.checksum_failures += 1;
            return Err(ParseError::BadChecksum);
        }

        let mut fields = body.split(',');
        let talker = fields.next().ok_or_else(|| {
            self.counters.malformed += 1;
            ParseError::Malformed("empty sentence")
        })?;
        let rest: Vec<&str> = fields.collect();

        let sentence_class = &talker[talker.len().saturating_sub(3)..];
        match sentence_class {
            "GGA" => self.parse_gga(&rest).map(SentenceEvent::Position),
            "VTG" => self.parse_vtg(&rest).map(SentenceEvent::Velocity),
            "RMC" | "GSA" | "GSV" => Ok(SentenceEvent::Ignored),
            _ => {
                self.counters.malformed += 1;
                Err(ParseError::UnknownSentence)
            }
        }
    }

    fn parse_gga(&mut self, f: &[&str]) -> Result<GgaFields, ParseError> {
        // $--GGA,time,lat,N/S,lon,E/W,fix,numSat,hdop,alt,M,...
        if f.len() < 9 {
            self.counters.malformed += 1;
            return Err(ParseError::Malformed("GGA: too few fields"));
        }

        let lat = parse_nmea_coord(f[1], f[2]).ok_or_else(|| {
            self.counters.malformed += 1;
            ParseError::Malformed("GGA: bad latitude")
        })?;
        let lon = parse_nmea_coord(f[3], f[4]).ok_or_else(|| {
            self.counters.malformed += 1;
            ParseError::Malformed("GGA: bad longitude")
        })?;

        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(ParseError::CoordinateOutOfRange);
        }

        let fix_digit: u8 = f[5].parse().unwrap_or(0);
        let (fix_quality, unrecognized) = FixQuality::from_nmea_digit(fix_digit);
        if unrecognized {
            self.counters.unrecognized_fix_quality += 1;
        }

        let satellites: u32 = f[6].parse().unwrap_or(0);
        let hdop: Option<f64> = f[7].parse().ok();
        let alt_m: Option<f64> = f[8].parse().ok();

        Ok(GgaFields {
            lat,
            lon,
            fix_quality,
            satellites,
            hdop,
            alt_m,
        })
    }

    fn parse_vtg(&mut self, f: &[&str]) -> Result<VtgFields, ParseError> {
        // $--VTG,course_true,T,course_mag,M,speed_kn,N,speed_kmh,K,...
        if f.len() < 5 {
            self.counters.malformed += 1;
            return Err(ParseError::Malformed("VTG: too few fields"));
        }

        let reported_course: Option<f64> = f[0].parse().ok();
        let speed_knots: f64 = f[4].parse().unwrap_or(0.0);
        let speed_mps = speed_knots * KNOTS_TO_MPS;

        let course_deg = if speed_mps >= HEADING_RELIABLE_SPEED_MPS {
            let c = reported_course.map(|c| c.rem_euclid(360.0));
            if let Some(c) = c {
                self.last_reliable_heading_deg = Some(c);
            }
            c.or(self.last_reliable_heading_deg)
        } else {
            // Unreliable — never fabricate, fall back to last accepted.
            self.last_reliable_heading_deg
        };

        Ok(VtgFields {
            course_deg,
            speed_mps,
        })
    }
}

/// NMEA `ddmm.mmmm` (or `dddmm.mmmm` for longitude) to signed decimal
/// degrees.
pub fn parse_nmea_coord(coord: &str, hemisphere: &str) -> Option<f64> {
    if coord.is_empty() {
        return None;
    }
    let dot = coord.find('.')?;
    if dot < 2 {
        return None;
    }
    let deg_len = dot - 2;
    let degrees: f64 = coord[..deg_len].parse().ok()?;
    let minutes: f64 = coord[deg_len..].parse().ok()?;
    let mut value = degrees + minutes / 60.0;
    if hemisphere == "S" || hemisphere == "W" {
        value = -value;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_checksum(body: &str) -> String {
        let cs = body.bytes().fold(0u8, |c, b| c ^ b);
        format!("${body}*{cs:02X}")
    }

    #[test]
    fn parses_gga_rtk_fixed() {
        let body = "GNGGA,123519,5214.2229,N,02101.0519,E,4,12,0.9,100.0,M,0.0,M,,";
        let line = with_checksum(body);
        let mut p = NmeaParser::new();
        let ev = p.accept_line(&line).unwrap();
        match ev {
            SentenceEvent::Position(gga) => {
                assert_eq!(gga.fix_quality, FixQuality::RtkFixed);
                assert_eq!(gga.satellites, 12);
                assert!((gga.lat - 52.237048).abs() < 1e-4);
                assert!((gga.lon - 21.017532).abs() < 1e-4);
            }
            _ => panic!("expected Position event"),
        }
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut p = NmeaParser::new();
        let err = p
            .accept_line("$GNGGA,123519,5214.2229,N,02101.0519,E,4,12,0.9,100.0,M,0.0,M,,*00")
            .unwrap_err();
        assert_eq!(err, ParseError::BadChecksum);
        assert_eq!(p.counters().checksum_failures, 1);
    }

    #[test]
    fn vtg_below_threshold_is_unreliable_and_falls_back() {
        let mut p = NmeaParser::new();
        // First a fast VTG establishes a reliable heading.
        let fast = with_checksum("GNVTG,090.0,T,,M,002.0,N,3.7,K,A");
        let VtgFields {
            course_deg,
            speed_mps,
        } = match p.accept_line(&fast).unwrap() {
            SentenceEvent::Velocity(v) => v,
            _ => panic!("expected velocity"),
        };
        assert!((speed_mps - 2.0 * KNOTS_TO_MPS).abs() < 1e-6);
        assert_eq!(course_deg, Some(90.0));

        // Then a slow VTG with a different course must not replace it.
        let slow = with_checksum("GNVTG,270.0,T,,M,000.1,N,0.2,K,A");
        let VtgFields { course_deg, .. } = match p.accept_line(&slow).unwrap() {
            SentenceEvent::Velocity(v) => v,
            _ => panic!("expected velocity"),
        };
        assert_eq!(course_deg, Some(90.0), "must retain last reliable heading");
    }

    #[test]
    fn unknown_fix_digit_maps_to_gps_single_with_warning() {
        let body = "GNGGA,123519,5214.2229,N,02101.0519,E,9,12,0.9,100.0,M,0.0,M,,";
        let mut p = NmeaParser::new();
        let ev = p.accept_line(&with_checksum(body)).unwrap();
        match ev {
            SentenceEvent::Position(gga) => assert_eq!(gga.fix_quality, FixQuality::GpsSingle),
            _ => panic!(),
        }
        assert_eq!(p.counters().unrecognized_fix_quality, 1);
    }

    #[test]
    fn rmc_gsa_gsv_are_accepted_and_ignored() {
        let mut p = NmeaParser::new();
        for class in ["GNRMC,,,,,,,,,,,,", "GNGSA,,,,,,,,,,,,,,", "GPGSV,,,,,,,,,,"] {
            let ev = p.accept_line(&with_checksum(class)).unwrap();
            assert_eq!(ev, SentenceEvent::Ignored);
        }
    }

    #[test]
    fn back_to_back_gga_each_yields_its_own_position_event() {
        // The parser itself is stateless per sentence for GGA — two
        // consecutive position sentences must decode as two independent
        // events, not be collapsed or have the first one discarded. (The
        // companion-sentence coalescing that can drop an unflushed pending
        // GGA lives one layer up, in `receiver`.)
        let body1 = "GNGGA,123519,5214.2229,N,02101.0519,E,4,12,0.9,100.0,M,0.0,M,,";
        let body2 = "GNGGA,123520,5215.0000,N,02101.0519,E,4,12,0.9,100.0,M,0.0,M,,";
        let mut p = NmeaParser::new();
        let first = match p.accept_line(&with_checksum(body1)).unwrap() {
            SentenceEvent::Position(gga) => gga,
            _ => panic!("expected Position event"),
        };
        let second = match p.accept_line(&with_checksum(body2)).unwrap() {
            SentenceEvent::Position(gga) => gga,
            _ => panic!("expected Position event"),
        };
        assert!((first.lat - 52.237048).abs() < 1e-4);
        assert!((second.lat - 52.25).abs() < 1e-4);
        assert!((second.lat - first.lat).abs() > 1e-3, "must not collapse to the same sample");
    }

    #[test]
    fn coordinate_out_of_range_rejected() {
        let body = "GNGGA,123519,9514.2229,N,02101.0519,E,1,12,0.9,100.0,M,0.0,M,,";
        let mut p = NmeaParser::new();
        let err = p.accept_line(&with_checksum(body)).unwrap_err();
        assert_eq!(err, ParseError::CoordinateOutOfRange);
    }
}
