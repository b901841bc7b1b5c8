//! Error types for the session driver.
//!
//! Errors fall into two groups:
//! - Protocol errors (negotiation failure, premature closure, fatal alerts,
//!   engine faults). These are recoverable at the connection level: the
//!   surrounding system tears down that one connection.
//! - Usage errors (calling an operation in the wrong phase, abandoning a
//!   closing exchange). These indicate a bug in the caller's event loop.
//!
//! Buffer-level inconsistencies are not represented here; they panic.

use std::io;

use thiserror::Error;

use crate::{
    driver::SessionPhase,
    engine::{AlertDescription, EngineError},
};

/// Errors returned by [`crate::driver::TlsDriver`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Version or cipher-suite negotiation failed. The local side still owes
    /// an alert: keep calling `non_application_write` until
    /// `needs_non_application_write` is false.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// The peer's closing record arrived before the handshake finished.
    #[error("received close_notify during handshake")]
    CloseDuringHandshake,

    /// The peer sent a fatal alert. Check `needs_non_application_write`
    /// before assuming the session is fully closed.
    #[error("received fatal alert: {0}")]
    FatalAlert(AlertDescription),

    /// `close()` was called with the closing exchange still outstanding.
    #[error(
        "closed engine without completing the close exchange \
         (send pending: {send_pending}, receive pending: {receive_pending})"
    )]
    IncompleteClose {
        /// Our closing record was never fully produced and flushed
        send_pending: bool,
        /// The peer's closing record was never consumed
        receive_pending: bool,
    },

    /// Operation not valid in the current phase.
    #[error("invalid state: cannot {operation} while {phase}")]
    InvalidState {
        /// Phase when the operation was attempted
        phase: SessionPhase,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Any other engine failure (malformed or unauthenticated records,
    /// inconsistent sizing).
    #[error("engine error: {0}")]
    Engine(String),
}

impl DriverError {
    /// Returns true if this error is a caller bug rather than a peer or
    /// negotiation problem.
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(self, DriverError::InvalidState { .. } | DriverError::IncompleteClose { .. })
    }

    /// Returns true if the handshake failed because the two sides could not
    /// agree on parameters, whether detected locally or reported by the
    /// peer's alert.
    #[must_use]
    pub fn is_negotiation_failure(&self) -> bool {
        match self {
            DriverError::Negotiation(_) => true,
            DriverError::FatalAlert(alert) => matches!(
                alert,
                AlertDescription::HandshakeFailure
                    | AlertDescription::IllegalParameter
                    | AlertDescription::ProtocolVersion
                    | AlertDescription::InsufficientSecurity
            ),
            _ => false,
        }
    }
}

impl From<EngineError> for DriverError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Negotiation(message) => DriverError::Negotiation(message),
            EngineError::AlertReceived(alert) => DriverError::FatalAlert(alert),
            EngineError::CloseNotifyDuringHandshake => DriverError::CloseDuringHandshake,
            other => DriverError::Engine(other.to_string()),
        }
    }
}

/// Convert DriverError to io::Error for transports built on `std::io`.
///
/// This is only for boundary conversion - internally we use DriverError.
impl From<DriverError> for io::Error {
    fn from(err: DriverError) -> Self {
        let kind = match &err {
            DriverError::InvalidState { .. } | DriverError::IncompleteClose { .. } => {
                io::ErrorKind::Other
            },
            DriverError::CloseDuringHandshake => io::ErrorKind::ConnectionAborted,
            DriverError::Negotiation(_) | DriverError::FatalAlert(_) | DriverError::Engine(_) => {
                io::ErrorKind::InvalidData
            },
        };
        io::Error::new(kind, err)
    }
}
