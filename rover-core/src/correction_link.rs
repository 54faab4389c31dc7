//! C2 — Correction Link (§4.2). Maintains one long-lived NTRIP-style TCP
//! session to a correction caster, forwards downstream correction bytes to
//! the receiver, and periodically reports position upstream.
//!
//! No file in the reference pack implements NTRIP; this module is authored
//! directly from the wire contract in §6.2 using the same "generic over
//! `AsyncRead + AsyncWrite`" style the teacher uses for its network tasks,
//! plus the "never crash the task, log and retry" posture of `uwb_hub.rs`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::config::CasterConfig;
use crate::error::CasterError;
use crate::position_store::PositionStore;

const DOWNSTREAM_CHUNK: usize = 4 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Metrics surfaced to the supervisor (§4.2 "Observed metrics").
#[derive(Default)]
struct MetricsInner {
    disconnect_count: AtomicU64,
    downstream_bytes_total: AtomicU64,
    last_handshake_latency_ms: AtomicU64,
    streaming: std::sync::atomic::AtomicBool,
}

#[derive(Clone, Default)]
pub struct CasterMetrics(Arc<MetricsInner>);

impl CasterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_streaming(&self) -> bool {
        self.0.streaming.load(Ordering::Relaxed)
    }

    pub fn disconnect_count(&self) -> u64 {
        self.0.disconnect_count.load(Ordering::Relaxed)
    }

    pub fn downstream_bytes_total(&self) -> u64 {
        self.0.downstream_bytes_total.load(Ordering::Relaxed)
    }

    pub fn last_handshake_latency_ms(&self) -> u64 {
        self.0.last_handshake_latency_ms.load(Ordering::Relaxed)
    }

    fn mark_streaming(&self, streaming: bool) {
        self.0.streaming.store(streaming, Ordering::Relaxed);
    }

    fn record_disconnect(&self) {
        self.0.disconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_downstream(&self, n: u64) {
        self.0.downstream_bytes_total.fetch_add(n, Ordering::Relaxed);
    }

    fn record_handshake_latency(&self, ms: u64) {
        self.0.last_handshake_latency_ms.store(ms, Ordering::Relaxed);
    }
}

/// Adaptive upstream GGA interval (§4.2), keyed on current fix quality and
/// HDOP.
fn gga_interval(quality: rover_types::FixQuality, hdop: Option<f64>) -> Duration {
    use rover_types::FixQuality::*;
    let secs = match quality {
        RtkFixed => 8.0,
        RtkFloat => 12.0,
        Dgps | GpsSingle => {
            let hdop = hdop.unwrap_or(6.0).clamp(2.0, 6.0);
            15.0 + (hdop - 2.0) / (6.0 - 2.0) * (20.0 - 15.0)
        }
        NoFix => 30.0,
    };
    Duration::from_secs_f64(secs)
}

fn jitter_fraction() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

/// Drives the reconnect-with-backoff loop forever. Never returns under
/// normal operation; intended to run as its own execution context (§5).
pub async fn run_correction_link<W>(
    config: CasterConfig,
    mut receiver_write: W,
    position_store: PositionStore,
    metrics: CasterMetrics,
) where
    W: AsyncWrite + Unpin,
{
    let mut backoff = Duration::from_secs(1);
    loop {
        match run_session(&config, &mut receiver_write, &position_store, &metrics).await {
            Ok(()) => {}
            Err(e) => warn!(error = %e, "correction link session ended"),
        }
        metrics.mark_streaming(false);
        metrics.record_disconnect();

        let jitter = 1.0 + (jitter_fraction() - 0.5) * 0.2;
        let sleep_for = backoff.mul_f64(jitter).min(BACKOFF_CAP);
        info!(delay_ms = sleep_for.as_millis() as u64, "reconnecting to caster");
        tokio::time::sleep(sleep_for).await;
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}

async fn run_session<W>(
    config: &CasterConfig,
    receiver_write: &mut W,
    position_store: &PositionStore,
    metrics: &CasterMetrics,
) -> Result<(), CasterError>
where
    W: AsyncWrite + Unpin,
{
    let handshake_start = std::time::Instant::now();
    let mut stream = tokio::time::timeout(
        CONNECT_TIMEOUT,
        TcpStream::connect((config.host.as_str(), config.port_or_default())),
    )
    .await
    .map_err(|_| CasterError::Connect(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timeout")))?
    .map_err(CasterError::Connect)?;

    send_handshake(&mut stream, config).await?;
    let status_line = read_status_line(&mut stream).await?;
    if !status_ok(&status_line) {
        return Err(CasterError::HandshakeRejected(status_line));
    }
    metrics.record_handshake_latency(handshake_start.elapsed().as_millis() as u64);
    metrics.mark_streaming(true);
    info!("caster handshake accepted, streaming");

    let mut last_upstream = std::time::Instant::now() - Duration::from_secs(3600);
    let mut buf = vec![0u8; DOWNSTREAM_CHUNK];

    loop {
        let next_upstream_in = upstream_due_in(position_store, last_upstream);

        tokio::select! {
            read = tokio::time::timeout(READ_IDLE_TIMEOUT, stream.read(&mut buf)) => {
                let n = read
                    .map_err(|_| CasterError::IdleTimeout)?
                    .map_err(CasterError::Read)?;
                if n == 0 {
                    return Err(CasterError::Read(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "caster closed connection",
                    )));
                }
                metrics.record_downstream(n as u64);
                tokio::time::timeout(WRITE_TIMEOUT, receiver_write.write_all(&buf[..n]))
                    .await
                    .map_err(|_| CasterError::Write(std::io::Error::new(std::io::ErrorKind::TimedOut, "receiver write timeout")))?
                    .map_err(CasterError::Write)?;
            }
            _ = tokio::time::sleep(next_upstream_in) => {
                if let Some(sample) = position_store.latest() {
                    let sentence = build_gga_sentence(&sample);
                    tokio::time::timeout(WRITE_TIMEOUT, stream.write_all(sentence.as_bytes()))
                        .await
                        .map_err(|_| CasterError::Write(std::io::Error::new(std::io::ErrorKind::TimedOut, "caster write timeout")))?
                        .map_err(CasterError::Write)?;
                    last_upstream = std::time::Instant::now();
                }
                // No sample yet: withhold the upstream until one arrives.
            }
        }
    }
}

fn upstream_due_in(position_store: &PositionStore, last_upstream: std::time::Instant) -> Duration {
    let interval = match position_store.latest() {
        Some(sample) => gga_interval(sample.position.fix_quality, sample.position.hdop),
        None => Duration::from_secs(5),
    };
    interval.saturating_sub(last_upstream.elapsed())
}

async fn send_handshake(stream: &mut TcpStream, config: &CasterConfig) -> Result<(), CasterError> {
    let credentials = format!("{}:{}", config.user, config.pass);
    let auth = BASE64.encode(credentials.as_bytes());
    let request = format!(
        "GET /{mountpoint} HTTP/1.0\r\n\
         User-Agent: NTRIP rtk-rover/0.1\r\n\
         Ntrip-Version: Ntrip/2.0\r\n\
         Authorization: Basic {auth}\r\n\
         \r\n",
        mountpoint = config.mountpoint,
    );
    tokio::time::timeout(WRITE_TIMEOUT, stream.write_all(request.as_bytes()))
        .await
        .map_err(|_| CasterError::Write(std::io::Error::new(std::io::ErrorKind::TimedOut, "handshake write timeout")))?
        .map_err(CasterError::Write)
}

async fn read_status_line(stream: &mut TcpStream) -> Result<String, CasterError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = tokio::time::timeout(CONNECT_TIMEOUT, stream.read(&mut byte))
            .await
            .map_err(|_| CasterError::IdleTimeout)?
            .map_err(CasterError::Read)?;
        if n == 0 || byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&line).trim().to_string())
}

fn status_ok(line: &str) -> bool {
    line.starts_with("ICY 200 OK") || (line.starts_with("HTTP/1.") && line.contains(" 200"))
}

/// Build an upstream NMEA GGA sentence from the latest accepted sample.
fn build_gga_sentence(sample: &rover_types::KinematicSample) -> String {
    let p = &sample.position;
    let (lat_deg, lat_min, lat_hemi) = decompose(p.lat, true);
    let (lon_deg, lon_min, lon_hemi) = decompose(p.lon, false);
    let fix_digit: u8 = match p.fix_quality {
        rover_types::FixQuality::NoFix => 0,
        rover_types::FixQuality::GpsSingle => 1,
        rover_types::FixQuality::Dgps => 2,
        rover_types::FixQuality::RtkFloat => 5,
        rover_types::FixQuality::RtkFixed => 4,
    };
    let body = format!(
        "GPGGA,000000,{lat_deg:02}{lat_min:07.4},{lat_hemi},{lon_deg:03}{lon_min:07.4},{lon_hemi},{fix},{sat:02},{hdop:.1},{alt:.1},M,0.0,M,,",
        fix = fix_digit,
        sat = p.satellites,
        hdop = p.hdop.unwrap_or(99.9),
        alt = p.alt_m.unwrap_or(0.0),
    );
    let checksum = body.bytes().fold(0u8, |c, b| c ^ b);
    format!("${body}*{checksum:02X}\r\n")
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

#[cfg(test)]
mod tests {
    use super::*;
    use rover_types::FixQuality;

    #[test]
    fn gga_interval_matches_table() {
        assert_eq!(gga_interval(FixQuality::RtkFixed, None), Duration::from_secs(8));
        assert_eq!(gga_interval(FixQuality::RtkFloat, None), Duration::from_secs(12));
        assert_eq!(gga_interval(FixQuality::NoFix, None), Duration::from_secs(30));
        let at_low_hdop = gga_interval(FixQuality::GpsSingle, Some(2.0));
        let at_high_hdop = gga_interval(FixQuality::GpsSingle, Some(6.0));
        assert_eq!(at_low_hdop, Duration::from_secs_f64(15.0));
        assert_eq!(at_high_hdop, Duration::from_secs_f64(20.0));
    }

    #[test]
    fn status_line_accepts_icy_and_http() {
        assert!(status_ok("ICY 200 OK"));
        assert!(status_ok("HTTP/1.1 200 OK"));
        assert!(!status_ok("HTTP/1.1 404 Not Found"));
        assert!(!status_ok("SOURCETABLE 200 OK"));
    }

    #[test]
    fn gga_sentence_roundtrips_through_parser() {
        let sample = rover_types::KinematicSample {
            position: rover_types::GeodeticPosition {
                lat: 52.237049,
                lon: 21.017532,
                alt_m: Some(105.0),
                fix_quality: FixQuality::RtkFixed,
                satellites: 11,
                hdop: Some(0.9),
                received_at_ms: 0,
            },
            course_deg: None,
            speed_mps: None,
        };
        let sentence = build_gga_sentence(&sample);
        assert!(sentence.starts_with("$GPGGA,"));
        let mut parser = crate::parser::NmeaParser::new();
        let ev = parser.accept_line(sentence.trim()).unwrap();
        match ev {
            crate::parser::SentenceEvent::Position(gga) => {
                assert!((gga.lat - 52.237049).abs() < 1e-3);
                assert!((gga.lon - 21.017532).abs() < 1e-3);
                assert_eq!(gga.fix_quality, FixQuality::RtkFixed);
            }
            _ => panic!("expected position"),
        }
    }
}
