//! End-to-end session scenarios over the simulated engine.
//!
//! These tests validate:
//! - The four-flight handshake over a fragmenting link
//! - Bidirectional application data and the close_notify exchange
//! - Renegotiation started by either side
//! - Negotiation failures reported on both sides
//! - Closing mid-handshake and closing before the peer answers

use bytes::Buf;
use sealwire_core::{
    AlertDescription, DriverError, PAGE_SIZE, RecyclingPagePool, Role, SessionPhase,
};
use sealwire_harness::{CipherSuite, Link, LinkError, Peer, ProtocolVersion, SimConfig};

fn established(link: &mut Link) -> (Peer, Peer) {
    let mut client = Peer::client();
    let mut server = Peer::server();
    link.handshake(&mut client, &mut server).unwrap();
    (client, server)
}

/// Exchange owed records until both sides are established again.
fn settle(link: &mut Link, a: &mut Peer, b: &mut Peer) {
    for _ in 0..32 {
        link.send_needed_writes(a, b).unwrap();
        link.send_needed_writes(b, a).unwrap();
        if a.driver.ready_for_application_writes() && b.driver.ready_for_application_writes() {
            return;
        }
    }
    panic!("sessions did not settle: {:?} / {:?}", a.driver.phase(), b.driver.phase());
}

#[test]
fn handshake_over_fragmenting_link() {
    let mut link = Link::new();
    let (client, server) = established(&mut link);

    assert_eq!(client.driver.phase(), SessionPhase::Established);
    assert_eq!(server.driver.phase(), SessionPhase::Established);
    assert!(!client.driver.has_flush_pending());
    assert!(!server.driver.needs_non_application_write());

    assert_eq!(client.driver.engine().negotiated_version(), Some(ProtocolVersion::Tls12));
    assert_eq!(server.driver.engine().negotiated_version(), Some(ProtocolVersion::Tls12));
    assert_eq!(server.driver.engine().handshakes_completed(), 1);
}

#[test]
fn handshake_takes_four_flights() {
    let mut link = Link::whole();
    let mut client = Peer::client();
    let mut server = Peer::server();
    client.driver.init().unwrap();
    server.driver.init().unwrap();

    let mut flights = 0;
    while !(client.driver.ready_for_application_writes()
        && server.driver.ready_for_application_writes())
    {
        assert!(flights < 8, "handshake did not finish");
        let (from, to) =
            if flights % 2 == 0 { (&mut client, &mut server) } else { (&mut server, &mut client) };
        link.send_needed_writes(from, to).unwrap();
        flights += 1;
    }

    assert_eq!(flights, 4);
    assert!(!client.driver.is_handshaking());
    assert!(!server.driver.is_handshaking());
}

#[test]
fn ping_pong_then_clean_close() {
    let mut link = Link::new();
    let (mut client, mut server) = established(&mut link);

    link.send_app_data(&mut client, &mut server, b"ping").unwrap();
    assert_eq!(server.take_received(), b"ping");

    link.send_app_data(&mut server, &mut client, b"pong").unwrap();
    assert_eq!(client.take_received(), b"pong");

    link.close(&mut client, &mut server).unwrap();
    assert!(client.driver.is_closed());
    assert!(server.driver.is_closed());
    assert!(client.driver.engine().received_close_notify());
    assert!(server.driver.engine().received_close_notify());

    assert_eq!(client.driver.close(), Ok(()));
    assert_eq!(server.driver.close(), Ok(()));
}

#[test]
fn server_can_initiate_close() {
    let mut link = Link::with_seed(7);
    let (mut client, mut server) = established(&mut link);

    link.close(&mut server, &mut client).unwrap();
    assert!(client.driver.is_closed());
    assert!(server.driver.is_closed());
}

#[test]
fn large_payload_arrives_in_page_sized_slices() {
    let mut link = Link::whole();
    let (mut client, mut server) = established(&mut link);

    let data: Vec<u8> = (0..2 * PAGE_SIZE).map(|i| (i % 251) as u8).collect();
    link.send_app_data(&mut client, &mut server, &data).unwrap();

    assert_eq!(server.received.index(), 2 * PAGE_SIZE);
    let slices = server.received.slice_to(2 * PAGE_SIZE);
    assert_eq!(slices.len(), 2);
    assert!(slices.iter().all(|slice| slice.len() == PAGE_SIZE));
    assert_eq!(slices.concat(), data);
}

#[test]
fn application_write_is_clipped_to_one_record() {
    let mut link = Link::whole();
    let (mut client, _server) = established(&mut link);

    let data = vec![7u8; PAGE_SIZE + 100];
    let consumed = client.driver.application_write(&[&data[..]]).unwrap();
    assert_eq!(consumed, PAGE_SIZE);
    assert!(client.driver.has_flush_pending());

    // One sealed record, staged across two pages.
    let staged = client.driver.network_write_buffer();
    let slices = staged.slices();
    assert_eq!(slices.len(), 2);
    assert_eq!(slices.iter().map(|slice| slice.len()).sum::<usize>(), staged.remaining());
    assert!(staged.remaining() > PAGE_SIZE);

    // Nothing more until the record is flushed.
    let err = client.driver.application_write(&[&data[consumed..]]).unwrap_err();
    assert!(err.is_usage_error());
}

#[test]
fn client_initiated_renegotiation() {
    let mut link = Link::new();
    let (mut client, mut server) = established(&mut link);

    client.driver.renegotiate().unwrap();
    assert!(client.driver.is_handshaking());
    assert!(!client.driver.ready_for_application_writes());

    settle(&mut link, &mut client, &mut server);
    assert_eq!(client.driver.engine().handshakes_completed(), 2);
    assert_eq!(server.driver.engine().handshakes_completed(), 2);

    link.send_app_data(&mut client, &mut server, b"after renegotiation").unwrap();
    assert_eq!(server.take_received(), b"after renegotiation");
    link.send_app_data(&mut server, &mut client, b"reply").unwrap();
    assert_eq!(client.take_received(), b"reply");
}

#[test]
fn old_keys_stay_readable_during_renegotiation() {
    let mut link = Link::whole();
    let (mut client, mut server) = established(&mut link);

    client.driver.renegotiate().unwrap();
    assert!(client.driver.has_flush_pending());

    // The server has not seen the new hello yet and still writes under the
    // current keys.
    assert_eq!(server.driver.application_write(&[&b"in flight"[..]]), Ok(9));
    link.transfer(&mut server, &mut client).unwrap();
    assert!(client.driver.is_handshaking());
    assert_eq!(client.take_received(), b"in flight");

    settle(&mut link, &mut client, &mut server);
    assert_eq!(server.driver.engine().handshakes_completed(), 2);
}

#[test]
fn renegotiation_cannot_restart_while_handshaking() {
    let mut link = Link::whole();
    let (mut client, mut server) = established(&mut link);

    client.driver.renegotiate().unwrap();
    let err = client.driver.renegotiate().unwrap_err();
    assert_eq!(
        err,
        DriverError::InvalidState { phase: SessionPhase::Handshaking, operation: "renegotiate" }
    );
    assert!(err.is_usage_error());

    // The rejected call leaves the running handshake alone.
    settle(&mut link, &mut client, &mut server);
    assert_eq!(client.driver.engine().handshakes_completed(), 2);
}

#[test]
fn server_initiated_renegotiation() {
    let mut link = Link::new();
    let (mut client, mut server) = established(&mut link);

    server.driver.renegotiate().unwrap();
    settle(&mut link, &mut server, &mut client);

    assert_eq!(client.driver.engine().handshakes_completed(), 2);
    assert_eq!(server.driver.engine().handshakes_completed(), 2);

    link.send_app_data(&mut client, &mut server, b"still here").unwrap();
    assert_eq!(server.take_received(), b"still here");
}

#[test]
fn protocol_mismatch_fails_both_sides() {
    let mut link = Link::whole();
    let mut client = Peer::new(
        Role::Client,
        SimConfig { enabled_protocols: vec![ProtocolVersion::Tls10], ..SimConfig::default() },
    );
    let mut server = Peer::server();

    let err = link.handshake(&mut client, &mut server).unwrap_err();
    let LinkError::Driver(err) = err else { panic!("handshake stalled") };
    assert_eq!(
        err.to_string(),
        "negotiation failed: client requested protocol TLSv1 not enabled or not supported"
    );
    assert!(err.is_negotiation_failure());
    assert_eq!(server.driver.phase(), SessionPhase::Closing);
    assert!(server.driver.needs_non_application_write());

    // The server's alert reaches the client.
    let err = link.send_needed_writes(&mut server, &mut client).unwrap_err();
    assert_eq!(
        err,
        LinkError::Driver(DriverError::FatalAlert(AlertDescription::HandshakeFailure))
    );
    let LinkError::Driver(err) = err else { unreachable!() };
    assert_eq!(err.to_string(), "received fatal alert: handshake_failure");
    assert!(err.is_negotiation_failure());
    assert!(client.driver.is_closed());

    link.send_needed_writes(&mut server, &mut client).unwrap();
    assert!(server.driver.is_closed());
}

#[test]
fn no_common_cipher_suites() {
    let mut link = Link::whole();
    let mut client = Peer::new(
        Role::Client,
        SimConfig {
            enabled_cipher_suites: vec![CipherSuite::RsaAes128CbcSha],
            ..SimConfig::default()
        },
    );
    let mut server = Peer::new(
        Role::Server,
        SimConfig {
            enabled_cipher_suites: vec![CipherSuite::EcdheRsaAes128GcmSha256],
            ..SimConfig::default()
        },
    );

    let err = link.handshake(&mut client, &mut server).unwrap_err();
    assert_eq!(
        err,
        LinkError::Driver(DriverError::Negotiation("no cipher suites in common".to_string()))
    );

    let err = link.send_needed_writes(&mut server, &mut client).unwrap_err();
    assert_eq!(
        err,
        LinkError::Driver(DriverError::FatalAlert(AlertDescription::HandshakeFailure))
    );
    assert!(client.driver.is_closed());
}

#[test]
fn close_during_handshake() {
    let mut link = Link::new();
    let mut client = Peer::client();
    let mut server = Peer::server();
    client.driver.init().unwrap();
    server.driver.init().unwrap();

    // Flight 1 arrives; the server answers and then gives up.
    link.transfer(&mut client, &mut server).unwrap();
    assert!(server.driver.has_flush_pending());
    server.driver.initiate_close();
    assert_eq!(server.driver.phase(), SessionPhase::Closing);

    let err = link.send_needed_writes(&mut server, &mut client).unwrap_err();
    assert_eq!(err, LinkError::Driver(DriverError::CloseDuringHandshake));
    assert_eq!(client.driver.phase(), SessionPhase::Closing);
    assert!(client.driver.needs_non_application_write());

    link.send_needed_writes(&mut client, &mut server).unwrap();
    assert!(client.driver.is_closed());

    link.send_needed_writes(&mut server, &mut client).unwrap();
    assert!(server.driver.is_closed());
}

#[test]
fn close_before_peer_answers_is_incomplete() {
    let mut link = Link::new();
    let (mut client, _server) = established(&mut link);

    let err = client.driver.close().unwrap_err();
    assert_eq!(err, DriverError::IncompleteClose { send_pending: true, receive_pending: true });
    assert!(client.driver.is_closed());

    let err = client.driver.read(&mut client.received).unwrap_err();
    assert!(err.is_usage_error());
}

#[test]
fn half_close_waits_for_peer_record() {
    let mut link = Link::whole();
    let (mut client, mut server) = established(&mut link);

    client.driver.initiate_close();
    link.send_needed_writes(&mut client, &mut server).unwrap();
    assert_eq!(client.driver.phase(), SessionPhase::Closing);
    assert!(!client.driver.needs_non_application_write());

    // The peer answered but its record has not been flushed yet.
    assert_eq!(server.driver.phase(), SessionPhase::Closing);
    assert!(server.driver.needs_non_application_write());

    link.send_needed_writes(&mut server, &mut client).unwrap();
    assert!(client.driver.is_closed());
    assert!(server.driver.is_closed());
}

#[test]
fn close_on_either_side_mid_exchange_is_incomplete() {
    let mut link = Link::whole();
    let (mut client, mut server) = established(&mut link);

    client.driver.initiate_close();
    link.send_needed_writes(&mut client, &mut server).unwrap();
    assert!(!client.driver.has_flush_pending());

    // The responder has read the closing record but owes its own.
    let err = server.driver.close().unwrap_err();
    assert_eq!(err, DriverError::IncompleteClose { send_pending: true, receive_pending: false });
    assert!(server.driver.is_closed());

    // The initiator has flushed but never hears back.
    let err = client.driver.close().unwrap_err();
    assert_eq!(err, DriverError::IncompleteClose { send_pending: false, receive_pending: true });
    assert!(client.driver.is_closed());
}

#[test]
fn pages_return_to_pool_after_session() {
    let pool = RecyclingPagePool::new();
    {
        let mut link = Link::new();
        let mut client = Peer::with_pool(Role::Client, SimConfig::default(), &pool);
        let mut server = Peer::with_pool(Role::Server, SimConfig::default(), &pool);
        link.handshake(&mut client, &mut server).unwrap();

        let data = vec![0x5a; 3 * PAGE_SIZE];
        link.send_app_data(&mut client, &mut server, &data).unwrap();
        assert_eq!(server.take_received(), data);

        link.close(&mut client, &mut server).unwrap();
        assert!(pool.allocated() > 0);
    }
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.pooled(), pool.allocated());
}
