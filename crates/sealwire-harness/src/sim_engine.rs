//! Deterministic in-memory TLS engine.
//!
//! [`SimEngine`] implements [`TlsEngine`] with a TLS 1.2 shaped exchange so
//! the driver can be tested end to end without a real TLS library:
//!
//! ```text
//! client                                   server
//!   ClientHello                 ───────>                       flight 1
//!                               <───────   ServerHello
//!                                          ServerHelloDone     flight 2
//!   ClientKeyExchange
//!   [derive keys: NeedTask]
//!   ChangeCipherSpec
//!   Finished                    ───────>   [derive keys]       flight 3
//!                               <───────   ChangeCipherSpec
//!                                          Finished            flight 4
//! ```
//!
//! One record is produced per wrap. Records after ChangeCipherSpec are sealed
//! with [`crate::cipher::DirectionKeys`]. Version and suite negotiation,
//! alerts, close_notify and renegotiation behave like a JSSE-style engine,
//! including its habit of closing after a single outbound alert.
//!
//! Everything random comes from a ChaCha20 RNG seeded by [`SimConfig::seed`],
//! so runs are reproducible.

use std::{collections::VecDeque, fmt};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sealwire_core::{
    AlertDescription, EngineError, EngineResult, EngineStatus, HandshakeStatus, Role,
    SessionSizes, TlsEngine,
};

use crate::{
    cipher::{DirectionKeys, TAG_LEN, derive_secret, verify_data},
    handshake::{CipherSuite, HandshakeMessage, MessageKind, ProtocolVersion},
    record::{ContentType, RecordError, RecordHeader, encode_record, split_record},
};

const ALERT_WARNING: u8 = 1;
const ALERT_FATAL: u8 = 2;

/// Simulated engine configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Versions this side accepts
    pub enabled_protocols: Vec<ProtocolVersion>,
    /// Suites this side accepts, in preference order
    pub enabled_cipher_suites: Vec<CipherSuite>,
    /// RNG seed for randoms and key material
    pub seed: u64,
    /// Largest plaintext per record
    pub max_fragment_len: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            enabled_protocols: vec![ProtocolVersion::Tls11, ProtocolVersion::Tls12],
            enabled_cipher_suites: CipherSuite::ALL.to_vec(),
            seed: 0,
            max_fragment_len: 1 << 14,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flight {
    HelloRequest,
    ClientHello,
    ServerHello,
    ServerHelloDone,
    ClientKeyExchange,
    ChangeCipherSpec,
    Finished,
}

impl From<MessageKind> for Flight {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::HelloRequest => Flight::HelloRequest,
            MessageKind::ClientHello => Flight::ClientHello,
            MessageKind::ServerHello => Flight::ServerHello,
            MessageKind::ServerHelloDone => Flight::ServerHelloDone,
            MessageKind::ClientKeyExchange => Flight::ClientKeyExchange,
            MessageKind::Finished => Flight::Finished,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Send(Flight),
    Expect(Flight),
    Derive,
}

fn client_script() -> VecDeque<Step> {
    VecDeque::from([
        Step::Send(Flight::ClientHello),
        Step::Expect(Flight::ServerHello),
        Step::Expect(Flight::ServerHelloDone),
        Step::Send(Flight::ClientKeyExchange),
        Step::Derive,
        Step::Send(Flight::ChangeCipherSpec),
        Step::Send(Flight::Finished),
        Step::Expect(Flight::ChangeCipherSpec),
        Step::Expect(Flight::Finished),
    ])
}

fn server_script(request_first: bool) -> VecDeque<Step> {
    let mut script = VecDeque::from([
        Step::Expect(Flight::ClientHello),
        Step::Send(Flight::ServerHello),
        Step::Send(Flight::ServerHelloDone),
        Step::Expect(Flight::ClientKeyExchange),
        Step::Derive,
        Step::Expect(Flight::ChangeCipherSpec),
        Step::Expect(Flight::Finished),
        Step::Send(Flight::ChangeCipherSpec),
        Step::Send(Flight::Finished),
    ]);
    if request_first {
        script.push_front(Step::Send(Flight::HelloRequest));
    }
    script
}

fn peer(role: Role) -> Role {
    match role {
        Role::Client => Role::Server,
        Role::Server => Role::Client,
    }
}

/// Simulated TLS engine.
pub struct SimEngine {
    config: SimConfig,
    role: Role,
    rng: ChaCha20Rng,
    script: VecDeque<Step>,
    handshakes: u32,
    version: Option<ProtocolVersion>,
    suite: Option<CipherSuite>,
    client_random: [u8; 32],
    server_random: [u8; 32],
    premaster: Option<[u8; 32]>,
    pending_secret: Option<[u8; 32]>,
    write_keys: Option<DirectionKeys>,
    read_keys: Option<DirectionKeys>,
    pending_alert: Option<AlertDescription>,
    outbound_done: bool,
    inbound_done: bool,
    received_close_notify: bool,
}

impl SimEngine {
    /// Create an engine. The role defaults to server until
    /// [`TlsEngine::set_client_mode`] is called.
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        let rng = ChaCha20Rng::seed_from_u64(config.seed);
        Self {
            config,
            role: Role::Server,
            rng,
            script: VecDeque::new(),
            handshakes: 0,
            version: None,
            suite: None,
            client_random: [0; 32],
            server_random: [0; 32],
            premaster: None,
            pending_secret: None,
            write_keys: None,
            read_keys: None,
            pending_alert: None,
            outbound_done: false,
            inbound_done: false,
            received_close_notify: false,
        }
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Completed handshakes, counting renegotiations
    #[must_use]
    pub fn handshakes_completed(&self) -> u32 {
        self.handshakes
    }

    /// Negotiated protocol version, once known
    #[must_use]
    pub fn negotiated_version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    /// Negotiated cipher suite, once known
    #[must_use]
    pub fn negotiated_suite(&self) -> Option<CipherSuite> {
        self.suite
    }

    /// Whether the peer's close_notify has been consumed
    #[must_use]
    pub fn received_close_notify(&self) -> bool {
        self.received_close_notify
    }

    fn is_established(&self) -> bool {
        self.handshakes > 0
    }

    fn result(&self, status: EngineStatus, consumed: usize, produced: usize) -> EngineResult {
        EngineResult::new(status, self.handshake_status(), consumed, produced)
    }

    /// Record a locally detected fatal condition: queue the alert, stop
    /// reading and abandon any handshake.
    fn fatal(&mut self, alert: AlertDescription, err: EngineError) -> EngineError {
        tracing::debug!(role = %self.role, alert = %alert, error = %err, "fatal engine error");
        if !self.outbound_done {
            self.pending_alert = Some(alert);
        }
        self.inbound_done = true;
        self.script.clear();
        err
    }

    /// Advance past a completed step, reporting `Finished` if it was the
    /// last one.
    fn after_step(&mut self) -> HandshakeStatus {
        if !self.script.is_empty() {
            return self.handshake_status();
        }

        self.handshakes += 1;
        self.premaster = None;
        tracing::debug!(
            role = %self.role,
            handshakes = self.handshakes,
            version = ?self.version,
            suite = ?self.suite,
            "handshake finished"
        );
        HandshakeStatus::Finished
    }

    fn record_version(&self) -> u16 {
        self.version
            .or_else(|| self.config.enabled_protocols.iter().copied().max())
            .unwrap_or(ProtocolVersion::Tls10)
            .wire()
    }

    fn sealed_len(&self, plaintext_len: usize) -> usize {
        let tag = if self.write_keys.is_some() { TAG_LEN } else { 0 };
        RecordHeader::SIZE + plaintext_len + tag
    }

    fn encode(&mut self, content_type: ContentType, plaintext: &[u8]) -> Vec<u8> {
        let version = self.record_version();
        let body = match self.write_keys.as_mut() {
            Some(keys) => keys.seal(content_type as u8, plaintext),
            None => plaintext.to_vec(),
        };
        let mut out = Vec::with_capacity(RecordHeader::SIZE + body.len());
        encode_record(&mut out, content_type, version, &body);
        out
    }

    fn open(&mut self, content_type: ContentType, body: &[u8]) -> Result<Vec<u8>, EngineError> {
        let opened = match self.read_keys.as_mut() {
            None => return Ok(body.to_vec()),
            Some(keys) => keys.open(content_type as u8, body),
        };
        opened.ok_or_else(|| {
            self.fatal(
                AlertDescription::BadRecordMac,
                EngineError::BadRecord("bad_record_mac".to_string()),
            )
        })
    }

    fn secret(&mut self) -> Result<[u8; 32], EngineError> {
        match self.pending_secret {
            Some(secret) => Ok(secret),
            None => Err(self.fatal(
                AlertDescription::InternalError,
                EngineError::Unsupported("no session secret derived".to_string()),
            )),
        }
    }

    fn build(&mut self, flight: Flight) -> Result<(ContentType, Vec<u8>), EngineError> {
        let message = match flight {
            Flight::HelloRequest => HandshakeMessage::HelloRequest,
            Flight::ClientHello => {
                let Some(version) = self.config.enabled_protocols.iter().copied().max() else {
                    return Err(EngineError::Unsupported("no protocols enabled".to_string()));
                };
                self.rng.fill_bytes(&mut self.client_random);
                HandshakeMessage::ClientHello {
                    version: version.wire(),
                    random: self.client_random,
                    suites: self.config.enabled_cipher_suites.iter().map(|s| s.id()).collect(),
                }
            },
            Flight::ServerHello => {
                let (Some(version), Some(suite)) = (self.version, self.suite) else {
                    return Err(EngineError::Unsupported("nothing negotiated".to_string()));
                };
                self.rng.fill_bytes(&mut self.server_random);
                HandshakeMessage::ServerHello {
                    version: version.wire(),
                    random: self.server_random,
                    suite: suite.id(),
                }
            },
            Flight::ServerHelloDone => HandshakeMessage::ServerHelloDone,
            Flight::ClientKeyExchange => {
                let mut premaster = [0u8; 32];
                self.rng.fill_bytes(&mut premaster);
                self.premaster = Some(premaster);
                HandshakeMessage::ClientKeyExchange { premaster }
            },
            Flight::ChangeCipherSpec => return Ok((ContentType::ChangeCipherSpec, vec![1])),
            Flight::Finished => {
                let secret = self.secret()?;
                HandshakeMessage::Finished { verify_data: verify_data(&secret, self.role) }
            },
        };
        Ok((ContentType::Handshake, message.encode()))
    }

    fn wrap_alert(
        &mut self,
        alert: AlertDescription,
        dst: &mut [&mut [u8]],
    ) -> Result<EngineResult, EngineError> {
        if room(dst) < self.sealed_len(2) {
            return Ok(self.result(EngineStatus::BufferOverflow, 0, 0));
        }

        let level = if alert == AlertDescription::CloseNotify { ALERT_WARNING } else { ALERT_FATAL };
        let record = self.encode(ContentType::Alert, &[level, alert.code()]);
        scatter(&record, dst);

        self.pending_alert = None;
        self.outbound_done = true;
        self.script.clear();
        tracing::debug!(role = %self.role, alert = %alert, "sent alert");

        Ok(self.result(EngineStatus::Closed, 0, record.len()))
    }

    fn wrap_handshake(
        &mut self,
        flight: Flight,
        dst: &mut [&mut [u8]],
    ) -> Result<EngineResult, EngineError> {
        let (content_type, body) = self.build(flight)?;
        if room(dst) < self.sealed_len(body.len()) {
            return Ok(self.result(EngineStatus::BufferOverflow, 0, 0));
        }

        let record = self.encode(content_type, &body);
        scatter(&record, dst);
        self.script.pop_front();

        if flight == Flight::ChangeCipherSpec {
            let secret = self.secret()?;
            self.write_keys = Some(DirectionKeys::new(&secret, self.role));
        }

        let status = self.after_step();
        Ok(EngineResult::new(EngineStatus::Ok, status, 0, record.len()))
    }

    fn wrap_application(
        &mut self,
        src: &[&[u8]],
        dst: &mut [&mut [u8]],
    ) -> Result<EngineResult, EngineError> {
        let available: usize = src.iter().map(|chunk| chunk.len()).sum();
        if available == 0 {
            return Ok(self.result(EngineStatus::Ok, 0, 0));
        }
        if !self.is_established() || self.write_keys.is_none() {
            return Err(EngineError::Unsupported(
                "application data before handshake completion".to_string(),
            ));
        }

        let take = available.min(self.config.max_fragment_len);
        if room(dst) < self.sealed_len(take) {
            return Ok(self.result(EngineStatus::BufferOverflow, 0, 0));
        }

        let plaintext = gather(src, take);
        let record = self.encode(ContentType::ApplicationData, &plaintext);
        scatter(&record, dst);

        Ok(self.result(EngineStatus::Ok, take, record.len()))
    }

    fn receive_application(
        &mut self,
        plaintext: &[u8],
        consumed: usize,
        dst: &mut [&mut [u8]],
    ) -> Result<EngineResult, EngineError> {
        if !self.is_established() {
            return Err(self.fatal(
                AlertDescription::UnexpectedMessage,
                EngineError::BadRecord(
                    "unexpected_message: application data before handshake".to_string(),
                ),
            ));
        }
        if plaintext.len() > self.config.max_fragment_len {
            return Err(self.fatal(
                AlertDescription::RecordOverflow,
                EngineError::BadRecord("record_overflow".to_string()),
            ));
        }

        scatter(plaintext, dst);
        Ok(self.result(EngineStatus::Ok, consumed, plaintext.len()))
    }

    fn receive_alert(
        &mut self,
        plaintext: &[u8],
        consumed: usize,
    ) -> Result<EngineResult, EngineError> {
        let &[level, code] = plaintext else {
            return Err(self.fatal(
                AlertDescription::DecodeError,
                EngineError::BadRecord("decode_error: malformed alert".to_string()),
            ));
        };
        let alert = AlertDescription::from_code(code);

        if alert == AlertDescription::CloseNotify {
            if !self.script.is_empty() {
                return Err(self.fatal(
                    AlertDescription::UnexpectedMessage,
                    EngineError::CloseNotifyDuringHandshake,
                ));
            }
            self.inbound_done = true;
            self.received_close_notify = true;
            tracing::debug!(role = %self.role, "received close_notify");
            return Ok(self.result(EngineStatus::Closed, consumed, 0));
        }

        if level == ALERT_WARNING {
            tracing::debug!(role = %self.role, alert = %alert, "ignoring warning alert");
            return Ok(self.result(EngineStatus::Ok, consumed, 0));
        }

        // A fatal alert closes both directions without a reply.
        self.inbound_done = true;
        self.outbound_done = true;
        self.pending_alert = None;
        self.script.clear();
        Err(EngineError::AlertReceived(alert))
    }

    fn receive_change_cipher_spec(
        &mut self,
        plaintext: &[u8],
        consumed: usize,
    ) -> Result<EngineResult, EngineError> {
        if self.script.front() != Some(&Step::Expect(Flight::ChangeCipherSpec)) || plaintext != [1]
        {
            return Err(self.fatal(
                AlertDescription::UnexpectedMessage,
                EngineError::BadRecord("unexpected_message: change_cipher_spec".to_string()),
            ));
        }

        let secret = self.secret()?;
        self.read_keys = Some(DirectionKeys::new(&secret, peer(self.role)));
        self.script.pop_front();

        let status = self.after_step();
        Ok(EngineResult::new(EngineStatus::Ok, status, consumed, 0))
    }

    fn receive_handshake(
        &mut self,
        plaintext: &[u8],
        consumed: usize,
    ) -> Result<EngineResult, EngineError> {
        let message = HandshakeMessage::decode(plaintext)
            .map_err(|err| self.fatal(AlertDescription::DecodeError, err))?;

        if self.script.is_empty() && self.is_established() {
            match (self.role, message.kind()) {
                (Role::Server, MessageKind::ClientHello) => {
                    tracing::debug!(role = %self.role, "peer started renegotiation");
                    self.script = server_script(false);
                },
                (Role::Client, MessageKind::HelloRequest) => {
                    tracing::debug!(role = %self.role, "peer requested renegotiation");
                    self.script = client_script();
                    return Ok(self.result(EngineStatus::Ok, consumed, 0));
                },
                _ => {},
            }
        }

        if self.script.front() != Some(&Step::Expect(Flight::from(message.kind()))) {
            return Err(self.fatal(
                AlertDescription::UnexpectedMessage,
                EngineError::BadRecord(format!("unexpected_message: {:?}", message.kind())),
            ));
        }

        match message {
            HandshakeMessage::ClientHello { version, random, suites } => {
                self.client_random = random;
                self.negotiate(version, &suites)?;
            },
            HandshakeMessage::ServerHello { version, random, suite } => {
                self.server_random = random;
                self.accept_server_choice(version, suite)?;
            },
            HandshakeMessage::ClientKeyExchange { premaster } => {
                self.premaster = Some(premaster);
            },
            HandshakeMessage::Finished { verify_data: received } => {
                let secret = self.secret()?;
                if received != verify_data(&secret, peer(self.role)) {
                    return Err(self.fatal(
                        AlertDescription::HandshakeFailure,
                        EngineError::BadRecord("decrypt_error: finished mismatch".to_string()),
                    ));
                }
            },
            HandshakeMessage::HelloRequest | HandshakeMessage::ServerHelloDone => {},
        }

        self.script.pop_front();
        let status = self.after_step();
        Ok(EngineResult::new(EngineStatus::Ok, status, consumed, 0))
    }

    /// Server side: pick the highest enabled version not above the client's
    /// and the first client suite this side enables.
    fn negotiate(&mut self, client_version: u16, suites: &[u16]) -> Result<(), EngineError> {
        let chosen = self
            .config
            .enabled_protocols
            .iter()
            .copied()
            .filter(|version| version.wire() <= client_version)
            .max();
        let Some(version) = chosen else {
            let requested = ProtocolVersion::from_wire(client_version)
                .map_or_else(|| format!("{client_version:#06x}"), |v| v.to_string());
            return Err(self.fatal(
                AlertDescription::HandshakeFailure,
                EngineError::Negotiation(format!(
                    "client requested protocol {requested} not enabled or not supported"
                )),
            ));
        };

        let suite = suites
            .iter()
            .filter_map(|id| CipherSuite::from_id(*id))
            .find(|suite| self.config.enabled_cipher_suites.contains(suite));
        let Some(suite) = suite else {
            return Err(self.fatal(
                AlertDescription::HandshakeFailure,
                EngineError::Negotiation("no cipher suites in common".to_string()),
            ));
        };

        tracing::debug!(role = %self.role, version = %version, suite = ?suite, "negotiated");
        self.version = Some(version);
        self.suite = Some(suite);
        Ok(())
    }

    /// Client side: the server's choice must be something we offered.
    fn accept_server_choice(&mut self, version: u16, suite: u16) -> Result<(), EngineError> {
        let version = ProtocolVersion::from_wire(version)
            .filter(|version| self.config.enabled_protocols.contains(version));
        let Some(version) = version else {
            return Err(self.fatal(
                AlertDescription::ProtocolVersion,
                EngineError::Negotiation("server selected an unsupported protocol".to_string()),
            ));
        };

        let suite = CipherSuite::from_id(suite)
            .filter(|suite| self.config.enabled_cipher_suites.contains(suite));
        let Some(suite) = suite else {
            return Err(self.fatal(
                AlertDescription::IllegalParameter,
                EngineError::Negotiation("server selected a cipher suite not offered".to_string()),
            ));
        };

        self.version = Some(version);
        self.suite = Some(suite);
        Ok(())
    }
}

impl TlsEngine for SimEngine {
    fn set_client_mode(&mut self, client: bool) {
        self.role = if client { Role::Client } else { Role::Server };
        self.rng = ChaCha20Rng::seed_from_u64(self.config.seed.wrapping_add(u64::from(client)));
    }

    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        if self.outbound_done || self.inbound_done {
            return Err(EngineError::Unsupported("engine is closed".to_string()));
        }
        if !self.script.is_empty() {
            return Err(EngineError::Unsupported("handshake already in progress".to_string()));
        }

        self.script = match self.role {
            Role::Client => client_script(),
            Role::Server => server_script(self.is_established()),
        };
        Ok(())
    }

    fn handshake_status(&self) -> HandshakeStatus {
        if self.pending_alert.is_some() && !self.outbound_done {
            return HandshakeStatus::NeedWrap;
        }
        match self.script.front() {
            None => HandshakeStatus::NotHandshaking,
            Some(Step::Send(_)) => HandshakeStatus::NeedWrap,
            Some(Step::Expect(_)) => HandshakeStatus::NeedUnwrap,
            Some(Step::Derive) => HandshakeStatus::NeedTask,
        }
    }

    fn run_delegated_task(&mut self) -> bool {
        if self.script.front() != Some(&Step::Derive) {
            return false;
        }
        self.script.pop_front();

        let premaster = self.premaster.unwrap_or_default();
        self.pending_secret =
            Some(derive_secret(&premaster, &self.client_random, &self.server_random));
        true
    }

    fn wrap(
        &mut self,
        src: &[&[u8]],
        dst: &mut [&mut [u8]],
    ) -> Result<EngineResult, EngineError> {
        if self.outbound_done {
            return Ok(self.result(EngineStatus::Closed, 0, 0));
        }
        if let Some(alert) = self.pending_alert {
            return self.wrap_alert(alert, dst);
        }
        if let Some(&Step::Send(flight)) = self.script.front() {
            return self.wrap_handshake(flight, dst);
        }
        self.wrap_application(src, dst)
    }

    fn unwrap(&mut self, src: &[u8], dst: &mut [&mut [u8]]) -> Result<EngineResult, EngineError> {
        if self.inbound_done {
            return Ok(self.result(EngineStatus::Closed, 0, 0));
        }
        // Owed writes come first.
        if matches!(self.script.front(), Some(Step::Send(_) | Step::Derive)) {
            return Ok(self.result(EngineStatus::Ok, 0, 0));
        }

        let record = match split_record(src) {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(self.result(EngineStatus::BufferUnderflow, 0, 0)),
            Err(RecordError::TooLong { .. }) => {
                return Err(self.fatal(
                    AlertDescription::RecordOverflow,
                    EngineError::BadRecord("record_overflow".to_string()),
                ));
            },
            Err(err) => {
                return Err(self.fatal(
                    AlertDescription::DecodeError,
                    EngineError::BadRecord(format!("decode_error: {err}")),
                ));
            },
        };

        if record.content_type == ContentType::ApplicationData {
            let tag = if self.read_keys.is_some() { TAG_LEN } else { 0 };
            let plaintext_len = record.body.len().saturating_sub(tag);
            if plaintext_len > self.config.max_fragment_len {
                return Err(self.fatal(
                    AlertDescription::RecordOverflow,
                    EngineError::BadRecord("record_overflow".to_string()),
                ));
            }
            if plaintext_len > room(dst) {
                return Ok(self.result(EngineStatus::BufferOverflow, 0, 0));
            }
        }

        let consumed = record.wire_len;
        let plaintext = self.open(record.content_type, record.body)?;
        match record.content_type {
            ContentType::ApplicationData => self.receive_application(&plaintext, consumed, dst),
            ContentType::Alert => self.receive_alert(&plaintext, consumed),
            ContentType::ChangeCipherSpec => self.receive_change_cipher_spec(&plaintext, consumed),
            ContentType::Handshake => self.receive_handshake(&plaintext, consumed),
        }
    }

    fn close_outbound(&mut self) {
        if !self.outbound_done && self.pending_alert.is_none() {
            self.pending_alert = Some(AlertDescription::CloseNotify);
        }
        self.script.clear();
    }

    fn close_inbound(&mut self) -> Result<(), EngineError> {
        self.inbound_done = true;
        self.script.clear();
        if self.received_close_notify { Ok(()) } else { Err(EngineError::PeerDidNotClose) }
    }

    fn is_outbound_done(&self) -> bool {
        self.outbound_done
    }

    fn is_inbound_done(&self) -> bool {
        self.inbound_done
    }

    fn session_sizes(&self) -> SessionSizes {
        SessionSizes {
            packet_buffer_size: RecordHeader::SIZE + self.config.max_fragment_len + TAG_LEN,
            application_buffer_size: self.config.max_fragment_len,
        }
    }
}

impl fmt::Debug for SimEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimEngine")
            .field("role", &self.role)
            .field("status", &self.handshake_status())
            .field("handshakes", &self.handshakes)
            .field("version", &self.version)
            .field("suite", &self.suite)
            .field("outbound_done", &self.outbound_done)
            .field("inbound_done", &self.inbound_done)
            .finish_non_exhaustive()
    }
}

fn room(dst: &[&mut [u8]]) -> usize {
    dst.iter().map(|slot| slot.len()).sum()
}

fn scatter(bytes: &[u8], dst: &mut [&mut [u8]]) {
    let mut rest = bytes;
    for slot in dst.iter_mut() {
        if rest.is_empty() {
            break;
        }
        let n = slot.len().min(rest.len());
        slot[..n].copy_from_slice(&rest[..n]);
        rest = &rest[n..];
    }
    debug_assert!(rest.is_empty(), "caller checked room before scattering");
}

fn gather(src: &[&[u8]], take: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(take);
    for chunk in src {
        let n = chunk.len().min(take - out.len());
        out.extend_from_slice(&chunk[..n]);
        if out.len() == take {
            break;
        }
    }
    out
}
