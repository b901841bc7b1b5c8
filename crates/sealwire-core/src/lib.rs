//! Sealwire core: a non-blocking TLS session driver
//!
//! This crate drives an external TLS engine through handshake, application
//! data, renegotiation and closure without ever performing I/O itself. The
//! transport hands bytes in and takes bytes out; everything else is a pure
//! state machine over buffers.
//!
//! # Architecture: "The Hollow Shell"
//!
//! ```text
//!          ┌───────────────────────────────┐
//!          │ sealwire-core                 │
//!          │ - Session phase machine       │
//!          │ - WRAP/UNWRAP orchestration   │
//!          │ - Paged staging buffers       │
//!          └───────────────────────────────┘
//!             ↓                         ↓
//! ┌──────────────────────┐   ┌──────────────────────┐
//! │ sealwire-harness     │   │ production transport │
//! │ - Simulated engine   │   │ - Real TLS engine    │
//! │ - Seeded RNG         │   │ - Event loop         │
//! │ - Fragmenting link   │   │ - Sockets            │
//! └──────────────────────┘   └──────────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - No I/O in core: the driver only fills and drains buffers
//! - Engine as capability: any [`engine::TlsEngine`] implementation plugs in
//! - Fail fast on misuse: caller contract violations are errors, buffer
//!   inconsistencies panic
//!
//! # Modules
//!
//! - [`driver`]: Session driver state machine
//! - [`engine`]: Engine capability interface and result types
//! - [`buffer`]: Growable staged buffer built from pages
//! - [`error`]: Driver error types

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod buffer;
pub mod driver;
pub mod engine;
pub mod error;

pub use buffer::{PAGE_SIZE, Page, PageSupplier, PagedBuffer, RecyclingPagePool};
pub use driver::{NetworkWriteBuffer, Role, SessionPhase, TlsDriver};
pub use engine::{
    AlertDescription, EngineError, EngineResult, EngineStatus, HandshakeStatus, SessionSizes,
    TlsEngine,
};
pub use error::DriverError;
