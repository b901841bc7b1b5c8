//! Toy record protection for the simulated engine.
//!
//! Not cryptography. Each direction gets a key derived from the negotiated
//! secret; every record is XORed with a ChaCha20 keystream selected by
//! (key, sequence number) and carries a 16-byte check tag. This is enough
//! to make old-key and new-key records distinguishable and to detect
//! corruption, which is all the driver tests need.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sealwire_core::Role;

/// Bytes appended to every sealed record
pub const TAG_LEN: usize = 16;

/// Bytes of Finished verify data
pub const VERIFY_LEN: usize = 12;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Protection state for one direction of one session.
#[derive(Clone)]
pub struct DirectionKeys {
    key: [u8; 32],
    seq: u64,
}

impl DirectionKeys {
    /// Keys for records written by `writer`.
    #[must_use]
    pub fn new(secret: &[u8; 32], writer: Role) -> Self {
        let mut key = *secret;
        key[0] ^= label(writer);
        Self { key, seq: 0 }
    }

    /// Records sealed or opened so far
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// Encrypt `plaintext` and append the check tag.
    #[must_use]
    pub fn seal(&mut self, content_type: u8, plaintext: &[u8]) -> Vec<u8> {
        let stream = self.keystream(TAG_LEN + plaintext.len());
        let (mask, pad) = stream.split_at(TAG_LEN);

        let mut sealed: Vec<u8> = plaintext.iter().zip(pad).map(|(b, k)| b ^ k).collect();
        let tag = digest(content_type, plaintext);
        sealed.extend(tag.iter().zip(mask).map(|(b, k)| b ^ k));

        self.seq += 1;
        sealed
    }

    /// Decrypt and verify a sealed body. Returns `None` if the tag does not
    /// match; the sequence number only advances on success.
    #[must_use]
    pub fn open(&mut self, content_type: u8, sealed: &[u8]) -> Option<Vec<u8>> {
        let body_len = sealed.len().checked_sub(TAG_LEN)?;
        let stream = self.keystream(sealed.len());
        let (mask, pad) = stream.split_at(TAG_LEN);
        let (body, tag) = sealed.split_at(body_len);

        let plaintext: Vec<u8> = body.iter().zip(pad).map(|(b, k)| b ^ k).collect();
        let expected = digest(content_type, &plaintext);
        let matches = tag.iter().zip(mask).zip(expected).all(|((t, k), e)| t ^ k == e);
        if !matches {
            return None;
        }

        self.seq += 1;
        Some(plaintext)
    }

    fn keystream(&self, len: usize) -> Vec<u8> {
        let mut rng = ChaCha20Rng::from_seed(self.key);
        rng.set_stream(self.seq);
        let mut stream = vec![0u8; len];
        rng.fill_bytes(&mut stream);
        stream
    }
}

/// Mix the handshake inputs into a session secret.
#[must_use]
pub fn derive_secret(
    premaster: &[u8; 32],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> [u8; 32] {
    let mut seed = *premaster;
    for (i, byte) in seed.iter_mut().enumerate() {
        *byte ^= client_random[i].rotate_left(1) ^ server_random[i].rotate_left(3);
    }

    let mut secret = [0u8; 32];
    ChaCha20Rng::from_seed(seed).fill_bytes(&mut secret);
    secret
}

/// Finished verify data sent by `writer` under `secret`.
#[must_use]
pub fn verify_data(secret: &[u8; 32], writer: Role) -> [u8; VERIFY_LEN] {
    let mut rng = ChaCha20Rng::from_seed(*secret);
    rng.set_stream(u64::MAX - u64::from(label(writer)));
    let mut out = [0u8; VERIFY_LEN];
    rng.fill_bytes(&mut out);
    out
}

fn label(writer: Role) -> u8 {
    match writer {
        Role::Client => b'C',
        Role::Server => b'S',
    }
}

fn digest(content_type: u8, data: &[u8]) -> [u8; TAG_LEN] {
    let fnv = |basis: u64| {
        std::iter::once(content_type)
            .chain(data.iter().copied())
            .fold(basis, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
    };

    let mut out = [0u8; TAG_LEN];
    out[..8].copy_from_slice(&fnv(FNV_OFFSET).to_be_bytes());
    out[8..].copy_from_slice(&fnv(!FNV_OFFSET).to_be_bytes());
    out
}
