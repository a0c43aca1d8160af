//! Complete handshakes between Client and Server.

use std::time::{Duration, Instant};

use dtls_cbc::certificate::calculate_fingerprint;
use dtls_cbc::{Error, Output, ProtocolVersion};

use crate::common::*;

fn handshake_with(version: ProtocolVersion) {
    init_log();
    let now = Instant::now();
    let (mut client, mut server) = pair(config(version), now);

    let result = run_handshake(&mut client, &mut server);

    assert!(result.client_connected, "client should connect");
    assert!(result.server_connected, "server should connect");
    assert!(client.is_connected());
    assert!(server.is_connected());

    let cert = result.peer_cert.expect("client should see server certificate");
    assert_eq!(calculate_fingerprint(&cert), CERTIFICATE.fingerprint());

    // ClientHello, HelloVerifyRequest, ClientHello with cookie, server flight.
    let types: Vec<u8> = result
        .client_flights
        .iter()
        .chain(result.server_flights.iter())
        .flat_map(|f| handshake_types(f))
        .collect();
    assert!(types.contains(&HELLO_VERIFY_REQUEST));
    assert_eq!(types.iter().filter(|t| **t == CLIENT_HELLO).count(), 2);
}

#[test]
fn dtls10_handshake() {
    handshake_with(ProtocolVersion::DTLS1_0);
}

#[test]
fn dtls12_handshake() {
    handshake_with(ProtocolVersion::DTLS1_2);
}

#[test]
fn first_flights_are_plaintext_dtls10_records() {
    init_log();
    let now = Instant::now();
    let (mut client, mut server) = pair(config(ProtocolVersion::DTLS1_2), now);

    let result = run_handshake(&mut client, &mut server);
    assert!(result.client_connected);

    // The first ClientHello goes out before any version is agreed.
    let first = collect_headers(&result.client_flights[0]);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].version, 0xFEFF);
    assert_eq!(first[0].epoch, 0);
    assert_eq!(first[0].seq, 1);

    // HelloVerifyRequest echoes the sequence number of the ClientHello.
    let hvr = collect_headers(&result.server_flights[0]);
    assert_eq!(hvr.len(), 1);
    assert_eq!(hvr[0].seq, first[0].seq);

    // The server flight uses the negotiated version.
    let server_hello = collect_headers(&result.server_flights[1]);
    assert!(server_hello.iter().all(|h| h.version == 0xFEFD && h.epoch == 0));
}

#[test]
fn finished_is_sent_in_next_epoch() {
    init_log();
    let now = Instant::now();
    let (mut client, mut server) = pair(config(ProtocolVersion::DTLS1_2), now);

    let result = run_handshake(&mut client, &mut server);

    let key_exchange = collect_headers(&result.client_flights[2]);
    let ctypes: Vec<(u8, u16)> = key_exchange.iter().map(|h| (h.ctype, h.epoch)).collect();
    assert_eq!(
        ctypes,
        vec![(HANDSHAKE, 0), (CHANGE_CIPHER_SPEC, 0), (HANDSHAKE, 1)]
    );

    let server_finished = collect_headers(&result.server_flights[2]);
    let ctypes: Vec<(u8, u16)> = server_finished.iter().map(|h| (h.ctype, h.epoch)).collect();
    assert_eq!(ctypes, vec![(CHANGE_CIPHER_SPEC, 0), (HANDSHAKE, 1)]);

    // The first record of a new epoch has sequence number 1.
    assert_eq!(server_finished[1].seq, 1);
}

#[test]
fn tampered_finished_is_fatal() {
    init_log();
    let now = Instant::now();
    let (mut client, mut server) = pair(config(ProtocolVersion::DTLS1_2), now);

    // ClientHello, HelloVerifyRequest, ClientHello, server flight.
    for _ in 0..2 {
        let c = collect_packets(&mut client);
        deliver_packets(&c, &mut server);
        let s = collect_packets(&mut server);
        deliver_packets(&s, &mut client);
    }

    let mut flight = collect_packets(&mut client);
    assert_eq!(flight.len(), 1);
    let last = flight[0].len() - 1;
    flight[0][last] ^= 0x01;

    let err = server.handle_packet(&flight[0]).unwrap_err();
    assert!(matches!(err, Error::SecurityError(_)), "{:?}", err);
    assert!(!server.is_connected());
}

#[test]
fn no_timers_after_connect() {
    init_log();
    let now = Instant::now();
    let (mut client, mut server) = pair(config(ProtocolVersion::DTLS1_0), now);

    let result = run_handshake(&mut client, &mut server);
    assert!(result.client_connected && result.server_connected);

    for timeout in [drain_outputs(&mut client).timeout, drain_outputs(&mut server).timeout] {
        let timeout = timeout.expect("timeout");
        assert!(timeout > now + Duration::from_secs(3600));
    }
}

#[test]
fn renegotiation_moves_to_next_epoch() {
    init_log();
    let now = Instant::now();
    let (mut client, mut server) = pair(config(ProtocolVersion::DTLS1_2), now);

    let result = run_handshake(&mut client, &mut server);
    assert!(result.client_connected && result.server_connected);

    client.connect().expect("renegotiate");
    let result = run_handshake(&mut client, &mut server);

    assert!(result.client_connected, "client should reconnect");
    assert!(result.server_connected, "server should reconnect");

    // No cookie exchange this time, the client reuses its cookie.
    assert_eq!(result.server_flights.len(), 2);

    client.send_application_data(b"after").unwrap();
    let packets = collect_packets(&mut client);
    let headers = collect_headers(&packets);
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].ctype, APPLICATION_DATA);
    assert_eq!(headers[0].epoch, 2);

    deliver_packets(&packets, &mut server);
    let out = drain_outputs(&mut server);
    assert_eq!(out.app_data, vec![b"after".to_vec()]);
}

#[test]
fn handshake_deadline_fails_client() {
    init_log();
    let now = Instant::now();
    let config = std::sync::Arc::new(
        dtls_cbc::Config::builder()
            .handshake_timeout(Some(Duration::from_secs(3)))
            .build()
            .unwrap(),
    );
    let mut client = dtls_cbc::Client::new(config, now);
    client.connect().unwrap();
    collect_packets(&mut client);

    client.handle_timeout(now + Duration::from_secs(2)).unwrap();
    let err = client.handle_timeout(now + Duration::from_secs(3)).unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(!client.is_connected());

    let mut buf = vec![0u8; 2048];
    while let Output::Packet(_) = client.poll_output(&mut buf) {}
    assert!(matches!(
        client.send_application_data(b"x"),
        Err(Error::NotConnected)
    ));
}
