//! Capability interface of the external TLS engine.
//!
//! The driver never encodes records, negotiates suites or validates
//! certificates itself. All of that lives behind [`TlsEngine`], which exposes
//! the classic WRAP/UNWRAP pair plus a handshake status signal. Any conforming
//! implementation (a real TLS library binding or a simulation) can be plugged
//! into [`crate::driver::TlsDriver`] unchanged.
//!
//! # Contract
//!
//! - `wrap` consumes plaintext (possibly none) and produces at most one
//!   protocol record into `dst`.
//! - `unwrap` consumes at most one protocol record from `src` and produces
//!   plaintext (possibly none) into `dst`.
//! - Both report how many bytes they consumed and produced, the outcome of the
//!   operation ([`EngineStatus`]) and what the handshake needs next
//!   ([`HandshakeStatus`]).
//! - Destinations are scatter lists: plaintext and ciphertext land directly in
//!   the pages of a [`crate::buffer::PagedBuffer`] without an intermediate
//!   copy.

use std::fmt;

use thiserror::Error;

/// Outcome of a single wrap or unwrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// The operation completed normally.
    Ok,
    /// Not enough input to form a complete record; supply more bytes.
    BufferUnderflow,
    /// Not enough room in the destination; supply a larger one.
    BufferOverflow,
    /// The engine direction used by this call is closed.
    Closed,
}

/// What the handshake needs from the caller next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// No handshake in progress.
    NotHandshaking,
    /// The call that returned this status just completed the handshake.
    Finished,
    /// A delegated task must run before the handshake can proceed.
    NeedTask,
    /// The engine must produce a record (call `wrap`).
    NeedWrap,
    /// The engine must consume a record from the peer (call `unwrap`).
    NeedUnwrap,
}

impl HandshakeStatus {
    /// Whether this status describes an idle or just-completed handshake.
    #[must_use]
    pub fn is_idle(self) -> bool {
        matches!(self, HandshakeStatus::NotHandshaking | HandshakeStatus::Finished)
    }
}

/// Result of a wrap or unwrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    /// Outcome of the call
    pub status: EngineStatus,
    /// Handshake status after the call
    pub handshake_status: HandshakeStatus,
    /// Bytes read from the source
    pub bytes_consumed: usize,
    /// Bytes written to the destination
    pub bytes_produced: usize,
}

impl EngineResult {
    /// Create a result.
    #[must_use]
    pub fn new(
        status: EngineStatus,
        handshake_status: HandshakeStatus,
        bytes_consumed: usize,
        bytes_produced: usize,
    ) -> Self {
        Self { status, handshake_status, bytes_consumed, bytes_produced }
    }
}

/// Buffer sizing advertised by the engine's current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSizes {
    /// Largest protocol record the engine may produce or expect
    pub packet_buffer_size: usize,
    /// Largest plaintext a single record may decrypt to
    pub application_buffer_size: usize,
}

/// TLS alert descriptions the driver needs to name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertDescription {
    /// close_notify (0)
    CloseNotify,
    /// unexpected_message (10)
    UnexpectedMessage,
    /// bad_record_mac (20)
    BadRecordMac,
    /// record_overflow (22)
    RecordOverflow,
    /// handshake_failure (40)
    HandshakeFailure,
    /// illegal_parameter (47)
    IllegalParameter,
    /// decode_error (50)
    DecodeError,
    /// protocol_version (70)
    ProtocolVersion,
    /// insufficient_security (71)
    InsufficientSecurity,
    /// internal_error (80)
    InternalError,
    /// Any description code this enum does not name
    Other(u8),
}

impl AlertDescription {
    /// Wire code of the description.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::CloseNotify => 0,
            Self::UnexpectedMessage => 10,
            Self::BadRecordMac => 20,
            Self::RecordOverflow => 22,
            Self::HandshakeFailure => 40,
            Self::IllegalParameter => 47,
            Self::DecodeError => 50,
            Self::ProtocolVersion => 70,
            Self::InsufficientSecurity => 71,
            Self::InternalError => 80,
            Self::Other(code) => code,
        }
    }

    /// Description for a wire code.
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::CloseNotify,
            10 => Self::UnexpectedMessage,
            20 => Self::BadRecordMac,
            22 => Self::RecordOverflow,
            40 => Self::HandshakeFailure,
            47 => Self::IllegalParameter,
            50 => Self::DecodeError,
            70 => Self::ProtocolVersion,
            71 => Self::InsufficientSecurity,
            80 => Self::InternalError,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for AlertDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CloseNotify => "close_notify",
            Self::UnexpectedMessage => "unexpected_message",
            Self::BadRecordMac => "bad_record_mac",
            Self::RecordOverflow => "record_overflow",
            Self::HandshakeFailure => "handshake_failure",
            Self::IllegalParameter => "illegal_parameter",
            Self::DecodeError => "decode_error",
            Self::ProtocolVersion => "protocol_version",
            Self::InsufficientSecurity => "insufficient_security",
            Self::InternalError => "internal_error",
            Self::Other(code) => return write!(f, "alert({code})"),
        };
        f.write_str(name)
    }
}

/// Errors raised by an engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Version or cipher-suite negotiation failed; carries the engine's text.
    #[error("{0}")]
    Negotiation(String),

    /// The peer sent a fatal alert.
    #[error("received fatal alert: {0}")]
    AlertReceived(AlertDescription),

    /// The peer sent close_notify before the handshake finished.
    #[error("received close_notify during handshake")]
    CloseNotifyDuringHandshake,

    /// A record could not be parsed or authenticated.
    #[error("bad record: {0}")]
    BadRecord(String),

    /// Inbound was closed without the peer's close_notify.
    #[error("inbound closed before receiving peer's close_notify")]
    PeerDidNotClose,

    /// The engine does not support the requested operation in its state.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// External TLS engine driven by [`crate::driver::TlsDriver`].
///
/// Implementations are single-threaded state machines: every method performs
/// only the work immediately possible and returns.
pub trait TlsEngine {
    /// Select the client or server side of the handshake. Called once, before
    /// [`TlsEngine::begin_handshake`].
    fn set_client_mode(&mut self, client: bool);

    /// Start the initial handshake, or a renegotiation on an established
    /// session.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot start a handshake in its current
    /// state.
    fn begin_handshake(&mut self) -> Result<(), EngineError>;

    /// Current handshake status.
    fn handshake_status(&self) -> HandshakeStatus;

    /// Run one delegated task. Returns `false` once no task remains.
    fn run_delegated_task(&mut self) -> bool;

    /// Produce one record from `src` (handshake, alert or application data)
    /// into `dst`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine hits a fatal protocol condition.
    fn wrap(&mut self, src: &[&[u8]], dst: &mut [&mut [u8]])
    -> Result<EngineResult, EngineError>;

    /// Consume at most one record from `src`, writing any plaintext into
    /// `dst`.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed records, fatal alerts, negotiation
    /// failures and premature close_notify.
    fn unwrap(&mut self, src: &[u8], dst: &mut [&mut [u8]]) -> Result<EngineResult, EngineError>;

    /// Signal that no more application data will be sent. The engine queues
    /// its closing record unless a fatal alert is already queued.
    fn close_outbound(&mut self);

    /// Signal that no more records will be read.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PeerDidNotClose`] if the peer's close_notify was
    /// never received.
    fn close_inbound(&mut self) -> Result<(), EngineError>;

    /// Whether the engine will produce no more records.
    fn is_outbound_done(&self) -> bool;

    /// Whether the engine will consume no more records.
    fn is_inbound_done(&self) -> bool;

    /// Buffer sizes for the current session.
    fn session_sizes(&self) -> SessionSizes;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_codes_round_trip_for_named_descriptions() {
        for code in [0u8, 10, 20, 22, 40, 47, 50, 70, 71, 80] {
            let description = AlertDescription::from_code(code);
            assert!(!matches!(description, AlertDescription::Other(_)));
            assert_eq!(description.code(), code);
        }
    }

    #[test]
    fn unknown_alert_code_is_preserved() {
        let description = AlertDescription::from_code(100);
        assert_eq!(description, AlertDescription::Other(100));
        assert_eq!(description.code(), 100);
        assert_eq!(description.to_string(), "alert(100)");
    }

    #[test]
    fn alert_error_message_names_description() {
        let err = EngineError::AlertReceived(AlertDescription::HandshakeFailure);
        assert_eq!(err.to_string(), "received fatal alert: handshake_failure");
    }

    #[test]
    fn idle_statuses() {
        assert!(HandshakeStatus::NotHandshaking.is_idle());
        assert!(HandshakeStatus::Finished.is_idle());
        assert!(!HandshakeStatus::NeedWrap.is_idle());
        assert!(!HandshakeStatus::NeedUnwrap.is_idle());
        assert!(!HandshakeStatus::NeedTask.is_idle());
    }
}
