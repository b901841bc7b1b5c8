//! Chaos property tests for the driver state machine.
//!
//! These tests verify that the driver handles hostile input:
//! - Arbitrary bytes never panic, in any phase
//! - A failed read always leaves the session closing or closed
//! - Closed is terminal: every further operation is a usage error

use bytes::Buf;
use proptest::prelude::*;
use sealwire_core::SessionPhase;
use sealwire_harness::{Link, Peer};

/// Phase to feed garbage in
#[derive(Debug, Clone, Copy)]
enum Stage {
    Handshaking,
    Established,
}

fn stage_strategy() -> impl Strategy<Value = Stage> {
    prop_oneof![Just(Stage::Handshaking), Just(Stage::Established)]
}

/// Drop everything `peer` has staged and keep producing closing records.
fn drain_closing(peer: &mut Peer) {
    for _ in 0..8 {
        let mut staged = peer.driver.network_write_buffer();
        let pending = staged.remaining();
        staged.advance(pending);

        if !peer.driver.needs_non_application_write() {
            return;
        }
        if peer.driver.non_application_write().is_err() {
            return;
        }
    }
}

#[test]
fn prop_garbage_never_panics() {
    proptest!(|(
        stage in stage_strategy(),
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 1..8),
    )| {
        let mut link = Link::whole();
        let mut client = Peer::client();
        let mut server = Peer::server();
        match stage {
            Stage::Handshaking => {
                prop_assert_eq!(server.driver.init(), Ok(()));
            },
            Stage::Established => {
                prop_assert_eq!(link.handshake(&mut client, &mut server), Ok(()));
            },
        }

        for chunk in chunks {
            if server.driver.is_closed() {
                break;
            }
            server.driver.network_read_buffer().extend_from_slice(&chunk);
            if server.driver.read(&mut server.received).is_err() {
                prop_assert!(matches!(
                    server.driver.phase(),
                    SessionPhase::Closing | SessionPhase::Closed
                ));
                drain_closing(&mut server);
            }
        }
    });
}

#[test]
fn prop_closed_is_terminal() {
    proptest!(|(garbage in prop::collection::vec(any::<u8>(), 0..256), handshake_first in any::<bool>())| {
        let mut link = Link::new();
        let mut client = Peer::client();
        let mut server = Peer::server();
        if handshake_first {
            prop_assert_eq!(link.handshake(&mut client, &mut server), Ok(()));
        }

        let _ = server.driver.close();
        prop_assert!(server.driver.is_closed());

        server.driver.network_read_buffer().extend_from_slice(&garbage);
        let read = server.driver.read(&mut server.received);
        prop_assert!(read.is_err_and(|err| err.is_usage_error()));

        let write = server.driver.application_write(&[&garbage[..]]);
        prop_assert!(write.is_err_and(|err| err.is_usage_error()));

        let handshake = server.driver.non_application_write();
        prop_assert!(handshake.is_err_and(|err| err.is_usage_error()));

        prop_assert!(server.driver.renegotiate().is_err());
        prop_assert!(server.driver.init().is_err());
        prop_assert!(!server.driver.needs_non_application_write());
        prop_assert_eq!(server.driver.phase(), SessionPhase::Closed);
    });
}
