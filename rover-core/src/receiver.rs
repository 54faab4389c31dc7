//! Serial reader execution context (§5 "serial reader"): decodes the
//! receiver's line-delimited NMEA stream via `parser`, coalesces a `GGA` +
//! `VTG` pair into one `KinematicSample` (§4.1 "Emission"), and detects
//! stream stalls.
//!
//! Grounded on `other_examples/450fc39f_ecto-muni__depot-gps-status-src-main.rs.rs`'s
//! `BufReader::new(serial).lines()` reconnect-loop shape.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rover_types::{GeodeticPosition, KinematicSample};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{info, warn};

use crate::clock;
use crate::parser::{GgaFields, NmeaParser, SentenceEvent};
use crate::position_store::PositionStore;

/// Companion-sentence coalescing window (§4.1).
pub const COALESCE_WINDOW: Duration = Duration::from_millis(200);
/// Default stream-stall threshold (§4.1).
pub const STREAM_STALE_MS: u64 = 1_500;
/// Per-read timeout on the serial line (§5 "Cancellation and timeouts").
const READ_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Default)]
struct ReceiverHealthInner {
    liveness_timeouts: AtomicU64,
    stalled: AtomicBool,
    checksum_failures: AtomicU64,
    malformed: AtomicU64,
}

/// Shared liveness/health counters, surfaced to the supervisor (§4.7).
#[derive(Clone, Default)]
pub struct ReceiverHealth(Arc<ReceiverHealthInner>);

impl ReceiverHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn liveness_timeouts(&self) -> u64 {
        self.0.liveness_timeouts.load(Ordering::Relaxed)
    }

    pub fn is_stalled(&self) -> bool {
        self.0.stalled.load(Ordering::Relaxed)
    }

    pub fn checksum_failures(&self) -> u64 {
        self.0.checksum_failures.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.0.malformed.load(Ordering::Relaxed)
    }

    fn record_timeout(&self) {
        self.0.liveness_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn set_stalled(&self, stalled: bool) {
        self.0.stalled.store(stalled, Ordering::Relaxed);
    }

    fn sync_counters(&self, parser: &NmeaParser) {
        let c = parser.counters();
        self.0
            .checksum_failures
            .store(c.checksum_failures, Ordering::Relaxed);
        self.0.malformed.store(c.malformed, Ordering::Relaxed);
    }
}

/// Runs until the stream ends (EOF) or an unrecoverable I/O error occurs.
/// Callers are expected to reconnect (new serial handle) and call again,
/// mirroring the teacher's "loop { run(...).await; sleep; }" reconnect
/// shape at the `rover-supervisor` call site.
pub async fn run_receiver<R>(read_half: R, position_store: PositionStore, health: ReceiverHealth)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(read_half);
    let mut parser = NmeaParser::new();
    let mut last_valid_at = tokio::time::Instant::now();
    let mut pending_gga: Option<GgaFields> = None;
    let mut pending_since: Option<tokio::time::Instant> = None;
    let mut pending_course: Option<f64> = None;
    let mut pending_speed: Option<f64> = None;

    loop {
        let mut line = String::new();
        // Anchored to when `pending_gga` first became `Some`, not to this
        // iteration's wakeup — otherwise an interleaved ignored sentence
        // (or even just the `select!` waking for another reason) would
        // keep pushing the window forward and the 200ms deadline would
        // never actually arrive (§4.1).
        let coalesce_deadline = pending_since.map(|since| since + COALESCE_WINDOW);

        tokio::select! {
            read = tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut line)) => {
                match read {
                    Err(_) => {
                        health.record_timeout();
                        maybe_mark_stalled(&health, last_valid_at);
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "serial read error");
                        return;
                    }
                    Ok(Ok(0)) => {
                        info!("receiver stream closed (EOF)");
                        return;
                    }
                    Ok(Ok(_)) => {
                        match parser.accept_line(line.trim()) {
                            Ok(SentenceEvent::Position(gga)) => {
                                last_valid_at = tokio::time::Instant::now();
                                clear_stall(&health);
                                // A GGA arriving while one is already pending
                                // means the previous position sentence never
                                // got its companion VTG — flush it now so
                                // every accepted position sentence still
                                // yields at least one emission (§4.1).
                                if let Some(prev) = pending_gga.take() {
                                    emit(&position_store, prev, pending_course.take(), pending_speed.take());
                                }
                                pending_gga = Some(gga);
                                pending_since = Some(last_valid_at);
                            }
                            Ok(SentenceEvent::Velocity(v)) => {
                                last_valid_at = tokio::time::Instant::now();
                                clear_stall(&health);
                                pending_course = v.course_deg;
                                pending_speed = Some(v.speed_mps);
                                if let Some(gga) = pending_gga.take() {
                                    pending_since = None;
                                    emit(&position_store, gga, pending_course, pending_speed.take());
                                    pending_course = None;
                                }
                            }
                            Ok(SentenceEvent::Ignored) => {
                                last_valid_at = tokio::time::Instant::now();
                                clear_stall(&health);
                            }
                            Err(_) => {
                                // Counted inside the parser; drop and continue.
                            }
                        }
                        health.sync_counters(&parser);
                    }
                }
            }
            _ = sleep_until_or_forever(coalesce_deadline) => {
                pending_since = None;
                if let Some(gga) = pending_gga.take() {
                    emit(&position_store, gga, pending_course.take(), pending_speed.take());
                }
            }
        }
    }
}

async fn sleep_until_or_forever(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

fn maybe_mark_stalled(health: &ReceiverHealth, last_valid_at: tokio::time::Instant) {
    if last_valid_at.elapsed() > Duration::from_millis(STREAM_STALE_MS) && !health.is_stalled() {
        warn!("receiver stream stalled");
        health.set_stalled(true);
    }
}

fn clear_stall(health: &ReceiverHealth) {
    if health.is_stalled() {
        info!("receiver stream recovered");
        health.set_stalled(false);
    }
}

fn emit(
    position_store: &PositionStore,
    gga: GgaFields,
    course_deg: Option<f64>,
    speed_mps: Option<f64>,
) {
    let position = GeodeticPosition {
        lat: gga.lat,
        lon: gga.lon,
        alt_m: gga.alt_m,
        fix_quality: gga.fix_quality,
        satellites: gga.satellites,
        hdop: gga.hdop,
        received_at_ms: clock::now_ms(),
    };
    position_store.publish(KinematicSample {
        position,
        course_deg,
        speed_mps,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    struct ScriptedReader {
        chunks: Vec<&'static [u8]>,
    }

    impl AsyncRead for ScriptedReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.chunks.is_empty() {
                return Poll::Ready(Ok(()));
            }
            let chunk = self.chunks.remove(0);
            buf.put_slice(chunk);
            Poll::Ready(Ok(()))
        }
    }

    fn checksum_line(body: &str) -> String {
        let cs = body.bytes().fold(0u8, |c, b| c ^ b);
        format!("${body}*{cs:02X}\r\n")
    }

    #[tokio::test]
    async fn gga_then_vtg_emits_combined_sample() {
        let gga = checksum_line("GNGGA,123519,5214.2229,N,02101.0519,E,4,12,0.9,100.0,M,0.0,M,,");
        let vtg = checksum_line("GNVTG,090.0,T,,M,002.0,N,3.7,K,A");
        let script = format!("{gga}{vtg}");
        let reader = ScriptedReader {
            chunks: vec![Box::leak(script.into_boxed_str()).as_bytes()],
        };
        let store = PositionStore::new();
        let health = ReceiverHealth::new();
        let store2 = store.clone();
        let handle = tokio::spawn(run_receiver(reader, store2, health));

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        let sample = store.latest().expect("sample published");
        assert!((sample.position.lat - 52.237048).abs() < 1e-3);
        assert_eq!(sample.course_deg, Some(90.0));
    }

    #[tokio::test]
    async fn back_to_back_gga_flushes_the_first_before_overwriting() {
        // Two position sentences with no companion VTG in between: the
        // first must still be emitted (§4.1 "at least once per accepted
        // position sentence") instead of being silently replaced.
        let gga1 = checksum_line("GNGGA,123519,5214.2229,N,02101.0519,E,4,12,0.9,100.0,M,0.0,M,,");
        let gga2 = checksum_line("GNGGA,123520,5215.0000,N,02101.0519,E,4,12,0.9,100.0,M,0.0,M,,");
        let script = format!("{gga1}{gga2}");
        let reader = ScriptedReader {
            chunks: vec![Box::leak(script.into_boxed_str()).as_bytes()],
        };
        let store = PositionStore::new();
        let health = ReceiverHealth::new();
        let store2 = store.clone();
        let handle = tokio::spawn(run_receiver(reader, store2, health));

        // Well inside the 200ms coalescing window, so only the flush
        // triggered by the second GGA's arrival can have published yet.
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.abort();

        let sample = store.latest().expect("first GGA was flushed, not dropped");
        assert!((sample.position.lat - 52.237048).abs() < 1e-3);
        assert_eq!(sample.course_deg, None);
    }
}
