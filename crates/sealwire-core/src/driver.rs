//! Session driver state machine.
//!
//! [`TlsDriver`] sits between a byte-oriented transport and an application.
//! It owns the session phase, drives the engine's WRAP/UNWRAP pair and stages
//! outbound records, but never touches a socket. The transport moves bytes in
//! and out through two buffers and polls a handful of predicates to learn what
//! to do next.
//!
//! # Phases
//!
//! ```text
//! ┌───────────────┐ init  ┌─────────────┐ finished + flushed ┌─────────────┐
//! │ Uninitialized │──────>│ Handshaking │───────────────────>│ Established │
//! └───────────────┘       └─────────────┘<───────────────────└─────────────┘
//!                                │            renegotiate           │
//!                                │ close / closing record / error   │
//!                                ↓                                  ↓
//!                         ┌─────────────┐  own record flushed, ┌────────┐
//!                         │   Closing   │─────────────────────>│ Closed │
//!                         └─────────────┘  peer record read    └────────┘
//! ```
//!
//! # Caller loop
//!
//! 1. Place received bytes in [`TlsDriver::network_read_buffer`] and call
//!    [`TlsDriver::read`].
//! 2. While [`TlsDriver::needs_non_application_write`] is true, call
//!    [`TlsDriver::non_application_write`] and flush.
//! 3. Drain [`TlsDriver::network_write_buffer`] whenever
//!    [`TlsDriver::has_flush_pending`] is true. No new record is wrapped until
//!    the previous ones are drained.
//! 4. Once [`TlsDriver::ready_for_application_writes`] is true, hand plaintext
//!    to [`TlsDriver::application_write`].

use std::{fmt, io::IoSlice};

use bytes::{Buf, BytesMut};

use crate::{
    buffer::{Page, PageSupplier, PagedBuffer},
    engine::{EngineResult, EngineStatus, HandshakeStatus, TlsEngine},
    error::DriverError,
};

/// Which side of the handshake this driver plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates the handshake
    Client,
    /// Responds to the handshake
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// Observable session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No handshake started
    Uninitialized,
    /// Initial or renegotiated handshake in progress
    Handshaking,
    /// Application data may flow in both directions
    Established,
    /// Closing records still need to be produced or consumed
    Closing,
    /// No further I/O permitted
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Uninitialized => "uninitialized",
            SessionPhase::Handshaking => "handshaking",
            SessionPhase::Established => "established",
            SessionPhase::Closing => "closing",
            SessionPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Handshaking { status: HandshakeStatus },
    Established,
    /// At least one flag is always set; otherwise the phase is `Closed`.
    Closing { send_pending: bool, receive_pending: bool },
    Closed,
}

impl Phase {
    fn public(self) -> SessionPhase {
        match self {
            Phase::Uninitialized => SessionPhase::Uninitialized,
            Phase::Handshaking { .. } => SessionPhase::Handshaking,
            Phase::Established => SessionPhase::Established,
            Phase::Closing { .. } => SessionPhase::Closing,
            Phase::Closed => SessionPhase::Closed,
        }
    }
}

/// Non-blocking, full-duplex TLS session driver.
///
/// Each instance belongs to one connection and is driven by one execution
/// context. Every method does only the work currently possible and returns.
pub struct TlsDriver<E> {
    engine: E,
    role: Role,
    phase: Phase,
    network_read: BytesMut,
    network_write: PagedBuffer,
}

impl<E: TlsEngine> TlsDriver<E> {
    /// Create a driver whose outbound staging pages are plain allocations.
    pub fn new(engine: E, role: Role) -> Self {
        Self::with_page_supplier(engine, role, Page::allocate)
    }

    /// Create a driver drawing outbound staging pages from `supplier`.
    pub fn with_page_supplier(
        mut engine: E,
        role: Role,
        supplier: impl PageSupplier + 'static,
    ) -> Self {
        engine.set_client_mode(role == Role::Client);
        let packet_size = engine.session_sizes().packet_buffer_size;

        Self {
            engine,
            role,
            phase: Phase::Uninitialized,
            network_read: BytesMut::with_capacity(packet_size),
            network_write: PagedBuffer::new(supplier),
        }
    }

    /// Begin the handshake. A client stages its first handshake record
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the driver is uninitialized, or the
    /// engine's error if the handshake cannot start.
    pub fn init(&mut self) -> Result<(), DriverError> {
        if self.phase != Phase::Uninitialized {
            return Err(self.invalid_state("init"));
        }

        if let Err(err) = self.engine.begin_handshake() {
            return Err(self.fail(err.into()));
        }
        let status = self.engine.handshake_status();
        self.transition(Phase::Handshaking { status });

        self.handshake().map_err(|err| self.fail(err))
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase.public()
    }

    /// Handshake role
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// The wrapped engine
    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Mutable access to the wrapped engine
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// True while an initial or renegotiated handshake is in progress.
    #[must_use]
    pub fn is_handshaking(&self) -> bool {
        matches!(self.phase, Phase::Handshaking { .. })
    }

    /// True once both directions are closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// True only when application data may be written.
    #[must_use]
    pub fn ready_for_application_writes(&self) -> bool {
        self.phase == Phase::Established
    }

    /// True if a handshake or closing record must be produced (or a finished
    /// handshake acknowledged) before application data may flow.
    #[must_use]
    pub fn needs_non_application_write(&self) -> bool {
        match self.phase {
            Phase::Handshaking { status } => matches!(
                status,
                HandshakeStatus::NeedWrap
                    | HandshakeStatus::NeedTask
                    | HandshakeStatus::Finished
                    | HandshakeStatus::NotHandshaking
            ),
            Phase::Closing { send_pending, .. } => send_pending,
            Phase::Uninitialized | Phase::Established | Phase::Closed => false,
        }
    }

    /// True if staged outbound bytes are waiting to be flushed.
    #[must_use]
    pub fn has_flush_pending(&self) -> bool {
        self.network_write.index() > 0
    }

    /// Staged outbound bytes for the transport to flush. Advancing the
    /// returned buffer releases the flushed bytes.
    pub fn network_write_buffer(&mut self) -> NetworkWriteBuffer<'_> {
        NetworkWriteBuffer { staged: &mut self.network_write }
    }

    /// Buffer the transport fills with received bytes before calling
    /// [`TlsDriver::read`]. Bytes the engine cannot decode yet stay here.
    pub fn network_read_buffer(&mut self) -> &mut BytesMut {
        &mut self.network_read
    }

    /// Drive one handshake or closing step, staging any record produced.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside the handshake and closing phases, or
    /// the engine's error. A handshake failure moves the driver to
    /// `Closing`; keep calling this method while
    /// [`TlsDriver::needs_non_application_write`] is true to flush the alert.
    pub fn non_application_write(&mut self) -> Result<(), DriverError> {
        match self.phase {
            Phase::Handshaking { .. } => self.handshake().map_err(|err| self.fail(err)),
            Phase::Closing { .. } => self.write_closing().map_err(|err| self.fail(err)),
            Phase::Uninitialized | Phase::Established | Phase::Closed => {
                Err(self.invalid_state("non_application_write"))
            },
        }
    }

    /// Wrap as much of `src` as fits in one record. Returns the number of
    /// plaintext bytes consumed, which may be less than offered.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the session is established with nothing
    /// left to flush, or the engine's error.
    pub fn application_write(&mut self, src: &[&[u8]]) -> Result<usize, DriverError> {
        if !self.ready_for_application_writes() || self.has_flush_pending() {
            return Err(self.invalid_state("application_write"));
        }

        let mut budget = self.engine.session_sizes().application_buffer_size;
        let clipped: Vec<&[u8]> = src
            .iter()
            .map_while(|chunk| {
                if budget == 0 {
                    return None;
                }
                let take = chunk.len().min(budget);
                budget -= take;
                Some(&chunk[..take])
            })
            .collect();

        let result = self.wrap(&clipped).map_err(|err| self.fail(err))?;
        if result.status == EngineStatus::Closed {
            self.closing_internal();
        } else if !result.handshake_status.is_idle() {
            self.enter_renegotiation(result.handshake_status).map_err(|err| self.fail(err))?;
        }

        Ok(result.bytes_consumed)
    }

    /// Consume bytes from the network read buffer, appending any application
    /// plaintext to `dst`. Handshake and closing records are consumed
    /// internally. Returns the number of plaintext bytes appended.
    ///
    /// When the phase changes mid-call the remaining bytes are processed
    /// under the new phase before returning.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` before `init` or after closure,
    /// `CloseDuringHandshake` for a closing record mid-handshake, `FatalAlert`
    /// for a peer alert, and `Negotiation` when the handshake cannot agree on
    /// parameters.
    pub fn read(&mut self, dst: &mut PagedBuffer) -> Result<usize, DriverError> {
        if matches!(self.phase, Phase::Uninitialized | Phase::Closed) {
            return Err(self.invalid_state("read"));
        }

        let start = dst.index();
        loop {
            let before = self.phase();
            match self.phase {
                Phase::Handshaking { .. } => self.read_handshake(dst)?,
                Phase::Established => self.read_application(dst)?,
                Phase::Closing { .. } => self.read_closing(dst)?,
                Phase::Uninitialized | Phase::Closed => break,
            }
            if self.phase() == before {
                break;
            }
        }

        Ok(dst.index() - start)
    }

    /// Start closing. The closing record is produced by the next
    /// [`TlsDriver::non_application_write`].
    pub fn initiate_close(&mut self) {
        self.closing_internal();
    }

    /// Close the engine and release the staging pages.
    ///
    /// The driver is `Closed` afterwards whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns `IncompleteClose` if our closing record was not flushed or the
    /// peer's was not received.
    pub fn close(&mut self) -> Result<(), DriverError> {
        self.closing_internal();

        let (send_pending, receive_pending) = match self.phase {
            Phase::Closing { send_pending, receive_pending } => (send_pending, receive_pending),
            _ => (false, false),
        };
        if send_pending {
            self.engine.close_outbound();
        }
        if receive_pending {
            self.close_inbound_quietly();
        }

        self.network_write.close();
        self.transition(Phase::Closed);

        if send_pending || receive_pending {
            tracing::warn!(
                role = %self.role,
                send_pending,
                receive_pending,
                "session closed before closing exchange completed"
            );
            return Err(DriverError::IncompleteClose { send_pending, receive_pending });
        }
        Ok(())
    }

    /// Start a new handshake over the established session. Data the peer
    /// sent under the current keys stays readable until the new handshake
    /// completes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless established, or the engine's error.
    pub fn renegotiate(&mut self) -> Result<(), DriverError> {
        if self.phase != Phase::Established {
            return Err(self.invalid_state("renegotiate"));
        }

        if let Err(err) = self.engine.begin_handshake() {
            return Err(self.fail(err.into()));
        }
        let status = self.engine.handshake_status();
        self.enter_renegotiation(status).map_err(|err| self.fail(err))
    }

    fn handshake(&mut self) -> Result<(), DriverError> {
        while let Phase::Handshaking { status } = self.phase {
            match status {
                // Unwraps happen in `read`.
                HandshakeStatus::NeedUnwrap => break,
                HandshakeStatus::NeedWrap => {
                    if self.has_flush_pending() {
                        break;
                    }
                    let result = self.wrap(&[])?;
                    if result.status == EngineStatus::Closed {
                        self.closing_internal();
                        break;
                    }
                    self.set_handshake_status(result.handshake_status);
                    if result.handshake_status != HandshakeStatus::NeedTask {
                        break;
                    }
                },
                HandshakeStatus::NeedTask => {
                    let mut ran = false;
                    while self.engine.run_delegated_task() {
                        ran = true;
                    }
                    let next = self.engine.handshake_status();
                    if !ran && next == HandshakeStatus::NeedTask {
                        return Err(DriverError::Engine(
                            "engine needs a task but has none to run".to_string(),
                        ));
                    }
                    self.set_handshake_status(next);
                },
                HandshakeStatus::NotHandshaking | HandshakeStatus::Finished => {
                    self.maybe_finish_handshake();
                    break;
                },
            }
        }
        Ok(())
    }

    fn maybe_finish_handshake(&mut self) {
        if self.engine.is_outbound_done() || self.engine.is_inbound_done() {
            self.closing_internal();
        } else if !self.has_flush_pending() {
            self.transition(Phase::Established);
        }
    }

    fn enter_renegotiation(&mut self, status: HandshakeStatus) -> Result<(), DriverError> {
        self.transition(Phase::Handshaking { status });
        self.handshake()
    }

    fn read_handshake(&mut self, dst: &mut PagedBuffer) -> Result<(), DriverError> {
        self.unwrap_handshake(dst).map_err(|err| self.fail(err))
    }

    fn unwrap_handshake(&mut self, dst: &mut PagedBuffer) -> Result<(), DriverError> {
        while self.phase == (Phase::Handshaking { status: HandshakeStatus::NeedUnwrap })
            && !self.network_read.is_empty()
        {
            let result = self.unwrap_into(dst)?;
            self.set_handshake_status(result.handshake_status);
            self.handshake()?;

            if result.status != EngineStatus::Ok || result.bytes_consumed == 0 {
                break;
            }
        }
        self.handshake()
    }

    fn read_application(&mut self, dst: &mut PagedBuffer) -> Result<(), DriverError> {
        while !self.network_read.is_empty() {
            let result = self.unwrap_into(dst).map_err(|err| self.fail(err))?;
            if result.status == EngineStatus::Closed {
                break;
            }
            if !result.handshake_status.is_idle() {
                tracing::debug!(role = %self.role, "peer requested renegotiation");
                self.enter_renegotiation(result.handshake_status)
                    .map_err(|err| self.fail(err))?;
                break;
            }
            if result.status != EngineStatus::Ok || result.bytes_consumed == 0 {
                break;
            }
        }
        Ok(())
    }

    fn read_closing(&mut self, dst: &mut PagedBuffer) -> Result<(), DriverError> {
        let Phase::Closing { send_pending, receive_pending } = self.phase else {
            return Ok(());
        };
        if !receive_pending {
            // Not waiting for the peer: whatever arrives is discarded.
            self.network_read.clear();
            return Ok(());
        }

        let mut outcome = Ok(());
        while !self.network_read.is_empty() {
            match self.unwrap_into(dst) {
                Ok(result) => {
                    if result.status != EngineStatus::Ok
                        || (result.bytes_consumed == 0 && result.bytes_produced == 0)
                    {
                        break;
                    }
                },
                Err(err) => {
                    outcome = Err(err);
                    break;
                },
            }
        }

        if self.engine.is_inbound_done() {
            self.enter_closing(send_pending, false);
        }
        outcome
    }

    fn write_closing(&mut self) -> Result<(), DriverError> {
        let Phase::Closing { receive_pending, .. } = self.phase else {
            return Ok(());
        };
        if self.has_flush_pending() {
            return Ok(());
        }

        if self.engine.is_outbound_done() {
            if !receive_pending && !self.engine.is_inbound_done() {
                self.close_inbound_quietly();
            }
            self.enter_closing(false, receive_pending);
            return Ok(());
        }

        let result = self.wrap(&[])?;
        if result.bytes_produced == 0 && !self.engine.is_outbound_done() {
            return Err(DriverError::Engine("closing wrap produced no record".to_string()));
        }
        Ok(())
    }

    /// Move toward `Closing`, closing the engine's outbound side. Waiting for
    /// the peer's closing record is skipped mid-handshake.
    fn closing_internal(&mut self) {
        let handshaking = match self.phase {
            Phase::Closing { .. } | Phase::Closed => return,
            Phase::Uninitialized => {
                self.engine.close_outbound();
                self.close_inbound_quietly();
                self.transition(Phase::Closed);
                return;
            },
            Phase::Handshaking { .. } => true,
            Phase::Established => false,
        };

        let receive_pending = !handshaking && !self.engine.is_inbound_done();
        let send_pending = if self.engine.is_outbound_done() {
            false
        } else {
            self.engine.close_outbound();
            true
        };
        self.enter_closing(send_pending, receive_pending);
    }

    fn enter_closing(&mut self, send_pending: bool, receive_pending: bool) {
        let next = if send_pending || receive_pending {
            Phase::Closing { send_pending, receive_pending }
        } else {
            Phase::Closed
        };
        self.transition(next);
    }

    fn close_inbound_quietly(&mut self) {
        if self.engine.is_inbound_done() {
            return;
        }
        if let Err(err) = self.engine.close_inbound() {
            tracing::trace!(role = %self.role, error = %err, "ignoring inbound close error");
        }
    }

    fn wrap(&mut self, src: &[&[u8]]) -> Result<EngineResult, DriverError> {
        loop {
            let required = self.engine.session_sizes().packet_buffer_size;
            let index = self.network_write.index();
            self.network_write.ensure_capacity(index + required);
            let room = self.network_write.remaining();

            let result = {
                let mut slots = self.network_write.slice_from(index);
                self.engine.wrap(src, &mut slots)?
            };
            tracing::trace!(
                role = %self.role,
                status = ?result.status,
                handshake = ?result.handshake_status,
                consumed = result.bytes_consumed,
                produced = result.bytes_produced,
                "wrap"
            );
            self.network_write.increment_index(result.bytes_produced);

            match result.status {
                EngineStatus::Ok | EngineStatus::Closed => return Ok(result),
                EngineStatus::BufferUnderflow => {
                    return Err(DriverError::Engine("wrap reported buffer underflow".to_string()));
                },
                EngineStatus::BufferOverflow => {
                    let needed = self.engine.session_sizes().packet_buffer_size;
                    if room >= needed {
                        return Err(DriverError::Engine(format!(
                            "wrap overflowed {room} bytes of room for a {needed} byte record"
                        )));
                    }
                },
            }
        }
    }

    fn unwrap_into(&mut self, dst: &mut PagedBuffer) -> Result<EngineResult, DriverError> {
        loop {
            let required = self.engine.session_sizes().application_buffer_size;
            let index = dst.index();
            dst.ensure_capacity(index + required);
            let room = dst.remaining();

            let result = {
                let mut slots = dst.slice_from(index);
                self.engine.unwrap(&self.network_read[..], &mut slots)?
            };
            tracing::trace!(
                role = %self.role,
                status = ?result.status,
                handshake = ?result.handshake_status,
                consumed = result.bytes_consumed,
                produced = result.bytes_produced,
                "unwrap"
            );
            self.network_read.advance(result.bytes_consumed);
            dst.increment_index(result.bytes_produced);

            match result.status {
                // Underflow leaves the partial record in the read buffer.
                EngineStatus::Ok | EngineStatus::BufferUnderflow => return Ok(result),
                EngineStatus::Closed => {
                    self.closing_internal();
                    return Ok(result);
                },
                EngineStatus::BufferOverflow => {
                    let needed = self.engine.session_sizes().application_buffer_size;
                    if room >= needed {
                        return Err(DriverError::Engine(format!(
                            "unwrap overflowed {room} bytes of room for a {needed} byte record"
                        )));
                    }
                },
            }
        }
    }

    fn set_handshake_status(&mut self, next: HandshakeStatus) {
        if let Phase::Handshaking { status } = &mut self.phase {
            *status = next;
        }
    }

    fn transition(&mut self, next: Phase) {
        let from = self.phase();
        self.phase = next;
        let to = self.phase();
        if from != to {
            tracing::debug!(role = %self.role, from = %from, to = %to, "session phase changed");
        }
    }

    fn fail(&mut self, err: DriverError) -> DriverError {
        tracing::warn!(role = %self.role, phase = %self.phase(), error = %err, "session error");
        self.closing_internal();
        err
    }

    fn invalid_state(&self, operation: &'static str) -> DriverError {
        DriverError::InvalidState { phase: self.phase(), operation }
    }
}

impl<E> fmt::Debug for TlsDriver<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsDriver")
            .field("role", &self.role)
            .field("phase", &self.phase.public())
            .field("network_read", &self.network_read.len())
            .field("network_write", &self.network_write.index())
            .finish()
    }
}

/// Staged outbound bytes, borrowed from a [`TlsDriver`].
///
/// Implements [`Buf`]: `chunk`/`chunks_vectored` expose the unflushed bytes
/// and `advance` releases what the transport has written.
pub struct NetworkWriteBuffer<'a> {
    staged: &'a mut PagedBuffer,
}

impl NetworkWriteBuffer<'_> {
    /// Views of every unflushed byte, one slice per page.
    #[must_use]
    pub fn slices(&self) -> Vec<&[u8]> {
        self.staged.slice_to(self.staged.index())
    }
}

impl Buf for NetworkWriteBuffer<'_> {
    fn remaining(&self) -> usize {
        Buf::remaining(&*self.staged)
    }

    fn chunk(&self) -> &[u8] {
        self.staged.chunk()
    }

    fn chunks_vectored<'b>(&'b self, dst: &mut [IoSlice<'b>]) -> usize {
        self.staged.chunks_vectored(dst)
    }

    fn advance(&mut self, cnt: usize) {
        self.staged.advance(cnt);
    }
}

impl fmt::Debug for NetworkWriteBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkWriteBuffer").field("remaining", &self.staged.index()).finish()
    }
}
