//! In-memory link between two driven sessions.
//!
//! The link plays the transport for both ends: it flushes staged records from
//! one driver into the other's read buffer and lets the receiver consume
//! them. Flushes are split at random points so every read sees partial
//! records.
//!
//! # Determinism
//!
//! Split points come from a ChaCha20 RNG seeded with a fixed value (0) by
//! default. Use [`Link::with_seed`] to explore other fragmentations while
//! keeping runs reproducible.

use bytes::Buf;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sealwire_core::{DriverError, PagedBuffer, RecyclingPagePool, Role, TlsDriver};
use thiserror::Error;

use crate::sim_engine::{SimConfig, SimEngine};

/// Rounds of flushing before a handshake is declared stuck.
const MAX_ROUNDS: usize = 64;

/// Link failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// A driver call failed
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The exchange stopped making progress
    #[error("{what} stalled after {rounds} rounds")]
    Stalled {
        /// Exchange that stalled
        what: &'static str,
        /// Rounds attempted
        rounds: usize,
    },
}

/// One end of a link: a driver plus the plaintext it has received.
#[derive(Debug)]
pub struct Peer {
    /// The session driver
    pub driver: TlsDriver<SimEngine>,
    /// Application bytes read so far
    pub received: PagedBuffer,
}

impl Peer {
    /// Create a peer with freshly allocated pages.
    #[must_use]
    pub fn new(role: Role, config: SimConfig) -> Self {
        Self {
            driver: TlsDriver::new(SimEngine::new(config), role),
            received: PagedBuffer::allocating(),
        }
    }

    /// Create a peer whose staging and receive pages come from `pool`.
    #[must_use]
    pub fn with_pool(role: Role, config: SimConfig, pool: &RecyclingPagePool) -> Self {
        Self {
            driver: TlsDriver::with_page_supplier(SimEngine::new(config), role, pool.clone()),
            received: PagedBuffer::new(pool.clone()),
        }
    }

    /// Client with the default configuration
    #[must_use]
    pub fn client() -> Self {
        Self::new(Role::Client, SimConfig::default())
    }

    /// Server with the default configuration
    #[must_use]
    pub fn server() -> Self {
        Self::new(Role::Server, SimConfig::default())
    }

    /// Drain and return everything received so far.
    pub fn take_received(&mut self) -> Vec<u8> {
        let bytes = self.received.to_vec();
        self.received.release(bytes.len());
        bytes
    }
}

/// Fragmenting in-memory transport.
#[derive(Debug, Clone)]
pub struct Link {
    rng: ChaCha20Rng,
    fragment: bool,
}

impl Link {
    /// Create a fragmenting link with the default seed (0).
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Create a fragmenting link with a specific seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: ChaCha20Rng::seed_from_u64(seed), fragment: true }
    }

    /// Create a link that delivers each flush in one piece.
    #[must_use]
    pub fn whole() -> Self {
        Self { rng: ChaCha20Rng::seed_from_u64(0), fragment: false }
    }

    /// Move every staged byte from `from` to `to`, letting `to` read after
    /// each piece. Bytes arriving at a closed peer are dropped.
    ///
    /// Returns the number of bytes moved.
    ///
    /// # Errors
    ///
    /// Returns the receiver's read error.
    pub fn transfer(&mut self, from: &mut Peer, to: &mut Peer) -> Result<usize, LinkError> {
        let mut moved = 0;
        while from.driver.has_flush_pending() {
            let mut staged = from.driver.network_write_buffer();
            let available = staged.remaining();
            let take = if self.fragment { self.rng.gen_range(1..=available) } else { available };
            let piece = staged.copy_to_bytes(take);
            moved += take;

            if to.driver.is_closed() {
                continue;
            }
            to.driver.network_read_buffer().extend_from_slice(&piece);
            to.driver.read(&mut to.received)?;
        }
        Ok(moved)
    }

    /// Produce and deliver every handshake or closing record `from` owes.
    ///
    /// # Errors
    ///
    /// Returns the first driver error on either side.
    pub fn send_needed_writes(&mut self, from: &mut Peer, to: &mut Peer) -> Result<(), LinkError> {
        self.transfer(from, to)?;
        while from.driver.needs_non_application_write() {
            from.driver.non_application_write()?;
            if !from.driver.has_flush_pending() {
                break;
            }
            self.transfer(from, to)?;
        }
        Ok(())
    }

    /// Initialize both drivers and exchange flights until both are
    /// established.
    ///
    /// # Errors
    ///
    /// Returns the first driver error, or `Stalled` if the handshake stops
    /// making progress.
    pub fn handshake(&mut self, client: &mut Peer, server: &mut Peer) -> Result<(), LinkError> {
        client.driver.init()?;
        server.driver.init()?;

        for _ in 0..MAX_ROUNDS {
            self.send_needed_writes(client, server)?;
            self.send_needed_writes(server, client)?;
            if client.driver.ready_for_application_writes()
                && server.driver.ready_for_application_writes()
            {
                return Ok(());
            }
        }
        Err(LinkError::Stalled { what: "handshake", rounds: MAX_ROUNDS })
    }

    /// Write all of `data` from `from` and deliver it to `to`.
    ///
    /// # Errors
    ///
    /// Returns the first driver error, or `Stalled` if `from` stops
    /// accepting data.
    pub fn send_app_data(
        &mut self,
        from: &mut Peer,
        to: &mut Peer,
        data: &[u8],
    ) -> Result<(), LinkError> {
        self.send_app_vectored(from, to, &[data])
    }

    /// Write the concatenation of `chunks` from `from` and deliver it to
    /// `to`. Each write offers every unsent chunk, empty ones included.
    ///
    /// # Errors
    ///
    /// Returns the first driver error, or `Stalled` if `from` stops
    /// accepting data.
    pub fn send_app_vectored(
        &mut self,
        from: &mut Peer,
        to: &mut Peer,
        chunks: &[&[u8]],
    ) -> Result<(), LinkError> {
        let total: usize = chunks.iter().map(|chunk| chunk.len()).sum();
        let mut sent = 0;
        let mut rounds = 0;
        while sent < total {
            if rounds == MAX_ROUNDS * 16 {
                return Err(LinkError::Stalled { what: "application write", rounds });
            }
            rounds += 1;

            if from.driver.ready_for_application_writes() && !from.driver.has_flush_pending() {
                sent += from.driver.application_write(&unsent(chunks, sent))?;
            }
            self.transfer(from, to)?;
            // Renegotiation flights interleave with data.
            self.send_needed_writes(from, to)?;
            self.send_needed_writes(to, from)?;
        }
        Ok(())
    }

    /// Run the closing exchange started by `initiator`.
    ///
    /// # Errors
    ///
    /// Returns the first driver error, or `Stalled` if either side fails to
    /// reach `Closed`.
    pub fn close(&mut self, initiator: &mut Peer, responder: &mut Peer) -> Result<(), LinkError> {
        initiator.driver.initiate_close();

        for _ in 0..MAX_ROUNDS {
            if initiator.driver.is_closed() && responder.driver.is_closed() {
                return Ok(());
            }
            self.send_needed_writes(initiator, responder)?;
            self.send_needed_writes(responder, initiator)?;
        }
        Err(LinkError::Stalled { what: "close", rounds: MAX_ROUNDS })
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

/// What is left of `chunks` after the first `sent` bytes.
fn unsent<'a>(chunks: &[&'a [u8]], mut sent: usize) -> Vec<&'a [u8]> {
    let mut rest = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        if sent > 0 && sent >= chunk.len() {
            sent -= chunk.len();
            continue;
        }
        rest.push(&chunk[sent..]);
        sent = 0;
    }
    rest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsent_skips_consumed_bytes_and_keeps_later_empty_chunks() {
        let chunks: [&[u8]; 4] = [b"abc", b"", b"defg", b"h"];

        assert_eq!(unsent(&chunks, 0), chunks.to_vec());
        assert_eq!(unsent(&chunks, 2), [&b"c"[..], &b""[..], &b"defg"[..], &b"h"[..]]);
        assert_eq!(unsent(&chunks, 3), [&b""[..], &b"defg"[..], &b"h"[..]]);
        assert_eq!(unsent(&chunks, 5), [&b"fg"[..], &b"h"[..]]);
        assert!(unsent(&chunks, 8).is_empty());
    }

    #[test]
    fn vectored_write_spans_chunks_and_records() {
        let mut link = Link::with_seed(3);
        let mut client = Peer::client();
        let mut server = Peer::server();
        link.handshake(&mut client, &mut server).unwrap();

        let head = vec![1u8; 10_000];
        let body = vec![2u8; 20_000];
        let chunks: [&[u8]; 4] = [&head, &[], &body, b"tail!"];
        link.send_app_vectored(&mut client, &mut server, &chunks).unwrap();

        assert_eq!(server.take_received(), chunks.concat());
    }
}
