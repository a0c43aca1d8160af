//! Handshake messages larger than one record or one datagram.

use std::sync::Arc;
use std::time::Instant;

use dtls_cbc::{Client, Config, KeyContext, ProtocolVersion, SeededRng, Server};

use crate::common::*;

#[test]
fn certificate_chain_is_fragmented() {
    init_log();
    let now = Instant::now();
    let config = config(ProtocolVersion::DTLS1_2);

    let mut certificate = CERTIFICATE.clone();
    certificate.chain = vec![certificate.certificate.clone(), certificate.certificate.clone()];
    let keys = Arc::new(KeyContext::new(&certificate, &mut SeededRng::new(None)).unwrap());

    let mut client = Client::new(config.clone(), now);
    client.connect().unwrap();
    let mut server = Server::new(config, keys, peer(), now);

    let result = run_handshake(&mut client, &mut server);
    assert!(result.client_connected);
    assert!(result.server_connected);

    // Only the leaf is surfaced.
    assert_eq!(result.peer_cert.as_deref(), Some(&CERTIFICATE.certificate[..]));

    let flight = &result.server_flights[1];
    assert!(flight.len() > 1, "server flight should span datagrams");
    for datagram in flight {
        assert!(datagram.len() <= 1000 || parse_records(datagram).len() == 1);
    }

    let certificate_records = handshake_types(flight)
        .into_iter()
        .filter(|t| *t == CERTIFICATE_MSG)
        .count();
    // Certificate body: 24-bit list length, then each entry with its own 24-bit length.
    let body_len: usize = 3 + 3 * (3 + CERTIFICATE.certificate.len());
    assert_eq!(certificate_records, body_len.div_ceil(1000));
}

#[test]
fn small_fragments_both_ways() {
    init_log();
    let now = Instant::now();
    let config = Arc::new(
        Config::builder()
            .mtu(300)
            .max_fragment_len(200)
            .max_reassembly(32)
            .build()
            .unwrap(),
    );

    let mut client = Client::new(config.clone(), now);
    client.connect().unwrap();
    let mut server = Server::new(config, key_context(), peer(), now);

    let result = run_handshake(&mut client, &mut server);
    assert!(result.client_connected);
    assert!(result.server_connected);

    for flight in result.client_flights.iter().chain(result.server_flights.iter()) {
        for datagram in flight {
            // Only a single oversized record may exceed the MTU.
            assert!(datagram.len() <= 300 || parse_records(datagram).len() == 1);
        }
    }
}

#[test]
fn reordered_server_flight() {
    init_log();
    let now = Instant::now();
    let config = Arc::new(
        Config::builder()
            .mtu(300)
            .max_fragment_len(200)
            .build()
            .unwrap(),
    );
    let (mut client, mut server) = pair(config, now);

    let hello = collect_packets(&mut client);
    deliver_packets(&hello, &mut server);
    let hvr = collect_packets(&mut server);
    deliver_packets(&hvr, &mut client);
    let hello = collect_packets(&mut client);
    deliver_packets(&hello, &mut server);

    let mut flight = collect_packets(&mut server);
    assert!(flight.len() > 2);
    flight.reverse();
    deliver_packets(&flight, &mut client);

    let key_exchange = drain_outputs(&mut client);
    assert!(key_exchange.peer_cert.is_some());
    deliver_packets(&key_exchange.packets, &mut server);
    assert!(drain_outputs(&mut server).connected);
}
