//! Record framing for the simulated engine.
//!
//! Every record starts with a fixed 5-byte header (Big Endian):
//!
//! ```text
//! ┌──────────────┬─────────────┬─────────────┐
//! │ content_type │ version u16 │ length u16  │ body ...
//! └──────────────┴─────────────┴─────────────┘
//!   byte 0         bytes 1-2     bytes 3-4
//! ```
//!
//! The header is parsed zero-copy with `zerocopy`; the body is opaque here
//! (plaintext before ChangeCipherSpec, sealed afterwards).

use bytes::BufMut;
use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    /// change_cipher_spec (20)
    ChangeCipherSpec = 20,
    /// alert (21)
    Alert = 21,
    /// handshake (22)
    Handshake = 22,
    /// application_data (23)
    ApplicationData = 23,
}

impl ContentType {
    /// Parse a wire value.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            20 => Some(Self::ChangeCipherSpec),
            21 => Some(Self::Alert),
            22 => Some(Self::Handshake),
            23 => Some(Self::ApplicationData),
            _ => None,
        }
    }
}

/// Record framing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Fewer bytes than a complete header
    #[error("record too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Unknown content type byte
    #[error("unknown content type {0}")]
    UnknownContentType(u8),

    /// Body length above the protocol maximum
    #[error("record length {length} exceeds maximum {max}")]
    TooLong {
        /// Declared length
        length: usize,
        /// Maximum accepted length
        max: usize,
    },

    /// Version field does not belong to the TLS 1.x family
    #[error("unsupported record version {0:#06x}")]
    BadVersion(u16),
}

/// Fixed 5-byte record header.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RecordHeader {
    content_type: u8,
    version: [u8; 2],
    length: [u8; 2],
}

impl RecordHeader {
    /// Serialized header size
    pub const SIZE: usize = 5;

    /// Largest body accepted (2^14 plaintext plus 2048 bytes of expansion)
    pub const MAX_LENGTH: usize = (1 << 14) + 2048;

    /// Create a header.
    #[must_use]
    pub fn new(content_type: ContentType, version: u16, length: u16) -> Self {
        Self {
            content_type: content_type as u8,
            version: version.to_be_bytes(),
            length: length.to_be_bytes(),
        }
    }

    /// Parse a header from the front of `bytes` without copying.
    ///
    /// # Errors
    ///
    /// Returns `RecordError` if fewer than [`RecordHeader::SIZE`] bytes are
    /// available, the content type is unknown, the version is not 3.x or the
    /// length exceeds [`RecordHeader::MAX_LENGTH`].
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self, RecordError> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| RecordError::TooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if ContentType::from_u8(header.content_type).is_none() {
            return Err(RecordError::UnknownContentType(header.content_type));
        }

        let version = header.version();
        if version >> 8 != 0x03 {
            return Err(RecordError::BadVersion(version));
        }

        let length = header.length();
        if length > Self::MAX_LENGTH {
            return Err(RecordError::TooLong { length, max: Self::MAX_LENGTH });
        }

        Ok(header)
    }

    /// Serialize the header.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(IntoBytes::as_bytes(self));
        out
    }

    /// Content type (validated by [`RecordHeader::from_bytes`])
    #[must_use]
    pub fn content_type(&self) -> Option<ContentType> {
        ContentType::from_u8(self.content_type)
    }

    /// Record version
    #[must_use]
    pub fn version(&self) -> u16 {
        u16::from_be_bytes(self.version)
    }

    /// Body length
    #[must_use]
    pub fn length(&self) -> usize {
        usize::from(u16::from_be_bytes(self.length))
    }
}

/// A complete record found at the front of a byte slice.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    /// Content type
    pub content_type: ContentType,
    /// Body bytes
    pub body: &'a [u8],
    /// Header plus body length
    pub wire_len: usize,
}

/// Split the first record off `bytes`. Returns `Ok(None)` if the record is
/// not complete yet.
///
/// # Errors
///
/// Returns `RecordError` for a malformed header.
pub fn split_record(bytes: &[u8]) -> Result<Option<RawRecord<'_>>, RecordError> {
    if bytes.len() < RecordHeader::SIZE {
        return Ok(None);
    }
    let header = RecordHeader::from_bytes(bytes)?;
    let content_type = header
        .content_type()
        .ok_or(RecordError::UnknownContentType(bytes[0]))?;

    let wire_len = RecordHeader::SIZE + header.length();
    if bytes.len() < wire_len {
        return Ok(None);
    }

    Ok(Some(RawRecord { content_type, body: &bytes[RecordHeader::SIZE..wire_len], wire_len }))
}

/// Append a full record (header and body) to `dst`.
///
/// # Panics
///
/// Panics if `body` is longer than `u16::MAX`.
pub fn encode_record(dst: &mut impl BufMut, content_type: ContentType, version: u16, body: &[u8]) {
    let length = u16::try_from(body.len()).unwrap_or_else(|_| {
        panic!("record body of {} bytes does not fit a u16 length", body.len())
    });
    dst.put_slice(&RecordHeader::new(content_type, version, length).to_bytes());
    dst.put_slice(body);
}
