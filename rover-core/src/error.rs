//! Typed error families, one per component, matching spec §7's
//! recoverability categories.

use thiserror::Error;

/// Transient input errors from the GNSS parser (§4.1) — counted and
/// discarded, never propagated as a hard failure.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("checksum mismatch")]
    BadChecksum,
    #[error("malformed sentence: {0}")]
    Malformed(&'static str),
    #[error("coordinate out of range")]
    CoordinateOutOfRange,
    #[error("unrecognized sentence class")]
    UnknownSentence,
}

/// Correction link failures (§4.2) — all recoverable via reconnect/backoff.
#[derive(Debug, Error)]
pub enum CasterError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
    #[error("read error: {0}")]
    Read(#[source] std::io::Error),
    #[error("write error: {0}")]
    Write(#[source] std::io::Error),
    #[error("idle timeout — no downstream bytes")]
    IdleTimeout,
}

/// Irrecoverable startup failures (§7) — surfaced once, never silently
/// retried.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to open receiver port {port}: {source}")]
    ReceiverOpenFailed {
        port: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
