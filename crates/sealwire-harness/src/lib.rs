//! Deterministic test harness for the sealwire driver.
//!
//! This crate provides a simulated TLS engine and an in-memory link, so
//! driver behavior can be exercised end to end without sockets or a real TLS
//! library:
//!
//! - [`SimEngine`]: a seeded, TLS 1.2 shaped implementation of
//!   [`sealwire_core::TlsEngine`] with version and suite negotiation, alerts,
//!   close_notify and renegotiation
//! - [`Link`]: moves staged records between two [`Peer`]s in randomly sized
//!   pieces
//!
//! Identical seeds give identical byte streams.

#![warn(missing_docs)]

pub mod cipher;
pub mod handshake;
pub mod link;
pub mod record;
pub mod sim_engine;

pub use handshake::{CipherSuite, ProtocolVersion};
pub use link::{Link, LinkError, Peer};
pub use sim_engine::{SimConfig, SimEngine};
