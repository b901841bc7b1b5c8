//! Property tests over the simulated link.
//!
//! - Payloads survive arbitrary fragmentation intact and in order, whether
//!   written as one slice or as many (empty ones included)
//! - Version and suite negotiation agree with a simple model of the rules

use proptest::prelude::*;
use sealwire_core::Role;
use sealwire_harness::{CipherSuite, Link, Peer, ProtocolVersion, SimConfig};

/// Version the server should pick, if any, and whether the client accepts it.
fn expected_version(
    client: &[ProtocolVersion],
    server: &[ProtocolVersion],
) -> Option<ProtocolVersion> {
    let client_max = client.iter().copied().max()?;
    let chosen = server.iter().copied().filter(|version| *version <= client_max).max()?;
    client.contains(&chosen).then_some(chosen)
}

/// A payload split into write chunks, some of them empty.
fn chunked_payload() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..12_000), 1..5)
}

#[test]
fn prop_fragmented_payloads_arrive_intact() {
    proptest!(ProptestConfig::with_cases(32), |(
        seed in any::<u64>(),
        payloads in prop::collection::vec(chunked_payload(), 1..4),
    )| {
        let mut link = Link::with_seed(seed);
        let mut client = Peer::client();
        let mut server = Peer::server();
        prop_assert_eq!(link.handshake(&mut client, &mut server), Ok(()));

        for chunks in &payloads {
            let chunks: Vec<&[u8]> = chunks.iter().map(Vec::as_slice).collect();
            let payload = chunks.concat();

            prop_assert_eq!(link.send_app_vectored(&mut client, &mut server, &chunks), Ok(()));
            prop_assert_eq!(server.take_received(), payload.clone());

            prop_assert_eq!(link.send_app_data(&mut server, &mut client, &payload), Ok(()));
            prop_assert_eq!(client.take_received(), payload);
        }

        prop_assert_eq!(link.close(&mut client, &mut server), Ok(()));
    });
}

#[test]
fn prop_negotiation_matches_model() {
    proptest!(ProptestConfig::with_cases(64), |(
        client_versions in prop::sample::subsequence(ProtocolVersion::ALL.to_vec(), 1..=3),
        server_versions in prop::sample::subsequence(ProtocolVersion::ALL.to_vec(), 1..=3),
        client_suites in prop::sample::subsequence(CipherSuite::ALL.to_vec(), 1..=4),
        server_suites in prop::sample::subsequence(CipherSuite::ALL.to_vec(), 1..=4),
    )| {
        let mut link = Link::new();
        let mut client = Peer::new(Role::Client, SimConfig {
            enabled_protocols: client_versions.clone(),
            enabled_cipher_suites: client_suites.clone(),
            ..SimConfig::default()
        });
        let mut server = Peer::new(Role::Server, SimConfig {
            enabled_protocols: server_versions.clone(),
            enabled_cipher_suites: server_suites.clone(),
            ..SimConfig::default()
        });

        let version = expected_version(&client_versions, &server_versions);
        let suite = client_suites.iter().copied().find(|suite| server_suites.contains(suite));

        let outcome = link.handshake(&mut client, &mut server);
        match (version, suite) {
            (Some(version), Some(suite)) => {
                prop_assert_eq!(outcome, Ok(()));
                prop_assert_eq!(client.driver.engine().negotiated_version(), Some(version));
                prop_assert_eq!(server.driver.engine().negotiated_suite(), Some(suite));
            },
            _ => {
                prop_assert!(outcome.is_err());
                prop_assert!(!client.driver.ready_for_application_writes());
                prop_assert!(!server.driver.ready_for_application_writes());
            },
        }
    });
}
