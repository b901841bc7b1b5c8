//! Handshake vocabulary of the simulated engine.
//!
//! Messages travel one per handshake record:
//! `[msg_type u8][length u24 BE][body]`.

use std::fmt;

use bytes::{Buf, BufMut};
use sealwire_core::EngineError;

use crate::cipher::VERIFY_LEN;

/// Protocol versions the simulated engine can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    /// TLSv1 (0x0301)
    Tls10,
    /// TLSv1.1 (0x0302)
    Tls11,
    /// TLSv1.2 (0x0303)
    Tls12,
}

impl ProtocolVersion {
    /// Every version, oldest first
    pub const ALL: [ProtocolVersion; 3] =
        [ProtocolVersion::Tls10, ProtocolVersion::Tls11, ProtocolVersion::Tls12];

    /// Wire value
    #[must_use]
    pub fn wire(self) -> u16 {
        match self {
            Self::Tls10 => 0x0301,
            Self::Tls11 => 0x0302,
            Self::Tls12 => 0x0303,
        }
    }

    /// Version for a wire value
    #[must_use]
    pub fn from_wire(value: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|version| version.wire() == value)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tls10 => "TLSv1",
            Self::Tls11 => "TLSv1.1",
            Self::Tls12 => "TLSv1.2",
        };
        f.write_str(name)
    }
}

/// Cipher suites the simulated engine can negotiate. Only the identifier
/// matters; every suite uses the same toy protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    /// TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
    EcdheRsaAes128GcmSha256,
    /// TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384
    EcdheRsaAes256GcmSha384,
    /// TLS_RSA_WITH_AES_128_CBC_SHA
    RsaAes128CbcSha,
    /// TLS_RSA_WITH_AES_256_CBC_SHA
    RsaAes256CbcSha,
}

impl CipherSuite {
    /// Every suite, in default preference order
    pub const ALL: [CipherSuite; 4] = [
        CipherSuite::EcdheRsaAes128GcmSha256,
        CipherSuite::EcdheRsaAes256GcmSha384,
        CipherSuite::RsaAes128CbcSha,
        CipherSuite::RsaAes256CbcSha,
    ];

    /// IANA identifier
    #[must_use]
    pub fn id(self) -> u16 {
        match self {
            Self::EcdheRsaAes128GcmSha256 => 0xc02f,
            Self::EcdheRsaAes256GcmSha384 => 0xc030,
            Self::RsaAes128CbcSha => 0x002f,
            Self::RsaAes256CbcSha => 0x0035,
        }
    }

    /// Suite for an IANA identifier
    #[must_use]
    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|suite| suite.id() == id)
    }
}

/// Handshake message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// hello_request (0)
    HelloRequest,
    /// client_hello (1)
    ClientHello,
    /// server_hello (2)
    ServerHello,
    /// server_hello_done (14)
    ServerHelloDone,
    /// client_key_exchange (16)
    ClientKeyExchange,
    /// finished (20)
    Finished,
}

/// A decoded handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    /// Server asks the client to renegotiate
    HelloRequest,
    /// Client offer
    ClientHello {
        /// Highest version the client enables
        version: u16,
        /// Client random
        random: [u8; 32],
        /// Offered suite identifiers, in preference order
        suites: Vec<u16>,
    },
    /// Server choice
    ServerHello {
        /// Selected version
        version: u16,
        /// Server random
        random: [u8; 32],
        /// Selected suite identifier
        suite: u16,
    },
    /// End of the server's first flight
    ServerHelloDone,
    /// Client key material
    ClientKeyExchange {
        /// Premaster secret (sent in the clear; this is a simulation)
        premaster: [u8; 32],
    },
    /// Handshake confirmation under the new keys
    Finished {
        /// Verify data derived from the session secret
        verify_data: [u8; VERIFY_LEN],
    },
}

impl HandshakeMessage {
    /// Message type
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::HelloRequest => MessageKind::HelloRequest,
            Self::ClientHello { .. } => MessageKind::ClientHello,
            Self::ServerHello { .. } => MessageKind::ServerHello,
            Self::ServerHelloDone => MessageKind::ServerHelloDone,
            Self::ClientKeyExchange { .. } => MessageKind::ClientKeyExchange,
            Self::Finished { .. } => MessageKind::Finished,
        }
    }

    fn type_code(&self) -> u8 {
        match self.kind() {
            MessageKind::HelloRequest => 0,
            MessageKind::ClientHello => 1,
            MessageKind::ServerHello => 2,
            MessageKind::ServerHelloDone => 14,
            MessageKind::ClientKeyExchange => 16,
            MessageKind::Finished => 20,
        }
    }

    /// Encode with the 4-byte message header.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            Self::HelloRequest | Self::ServerHelloDone => {},
            Self::ClientHello { version, random, suites } => {
                body.put_u16(*version);
                body.put_slice(random);
                body.put_u16(u16::try_from(suites.len() * 2).unwrap_or(u16::MAX));
                for suite in suites {
                    body.put_u16(*suite);
                }
            },
            Self::ServerHello { version, random, suite } => {
                body.put_u16(*version);
                body.put_slice(random);
                body.put_u16(*suite);
            },
            Self::ClientKeyExchange { premaster } => body.put_slice(premaster),
            Self::Finished { verify_data } => body.put_slice(verify_data),
        }

        let mut out = Vec::with_capacity(4 + body.len());
        out.put_u8(self.type_code());
        out.put_uint(body.len() as u64, 3);
        out.put_slice(&body);
        out
    }

    /// Decode one message occupying all of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BadRecord` for truncated, oversized or unknown
    /// messages.
    pub fn decode(bytes: &[u8]) -> Result<Self, EngineError> {
        let mut buf = bytes;
        if buf.remaining() < 4 {
            return Err(decode_error("truncated handshake header"));
        }
        let msg_type = buf.get_u8();
        let len = buf.get_uint(3) as usize;
        if buf.remaining() != len {
            return Err(decode_error("handshake length mismatch"));
        }

        let message = match msg_type {
            0 => Self::HelloRequest,
            1 => {
                let version = read_u16(&mut buf)?;
                let random = read_array(&mut buf)?;
                let suites_len = usize::from(read_u16(&mut buf)?);
                if suites_len % 2 != 0 || buf.remaining() < suites_len {
                    return Err(decode_error("bad cipher suite list"));
                }
                let suites = (0..suites_len / 2).map(|_| buf.get_u16()).collect();
                Self::ClientHello { version, random, suites }
            },
            2 => {
                let version = read_u16(&mut buf)?;
                let random = read_array(&mut buf)?;
                let suite = read_u16(&mut buf)?;
                Self::ServerHello { version, random, suite }
            },
            14 => Self::ServerHelloDone,
            16 => Self::ClientKeyExchange { premaster: read_array(&mut buf)? },
            20 => Self::Finished { verify_data: read_array(&mut buf)? },
            other => return Err(decode_error(&format!("unknown handshake type {other}"))),
        };

        if buf.has_remaining() {
            return Err(decode_error("trailing bytes in handshake message"));
        }
        Ok(message)
    }
}

fn decode_error(detail: &str) -> EngineError {
    EngineError::BadRecord(format!("decode_error: {detail}"))
}

fn read_u16(buf: &mut &[u8]) -> Result<u16, EngineError> {
    if buf.remaining() < 2 {
        return Err(decode_error("truncated field"));
    }
    Ok(buf.get_u16())
}

fn read_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N], EngineError> {
    if buf.remaining() < N {
        return Err(decode_error("truncated field"));
    }
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}
