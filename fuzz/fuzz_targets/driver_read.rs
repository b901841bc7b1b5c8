//! Feeds arbitrary bytes to a server driver, mid-handshake or established.
//!
//! Input layout: `[stage][chunk_len][bytes...]`. The bytes are delivered
//! `chunk_len` at a time (at least one), with a read after each delivery.
//! The driver must never panic, and a failed read must leave it closing or
//! closed.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sealwire_core::SessionPhase;
use sealwire_harness::{Link, Peer};

fuzz_target!(|data: &[u8]| {
    let [stage, chunk_len, rest @ ..] = data else {
        return;
    };

    let mut client = Peer::client();
    let mut server = Peer::server();
    if stage & 1 == 0 {
        if server.driver.init().is_err() {
            return;
        }
    } else if Link::whole().handshake(&mut client, &mut server).is_err() {
        return;
    }

    for chunk in rest.chunks(usize::from(*chunk_len).max(1)) {
        if server.driver.is_closed() {
            break;
        }
        server.driver.network_read_buffer().extend_from_slice(chunk);
        if server.driver.read(&mut server.received).is_err() {
            assert!(matches!(server.driver.phase(), SessionPhase::Closing | SessionPhase::Closed));
        }
    }
});
