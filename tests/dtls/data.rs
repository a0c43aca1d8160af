//! Application data after the handshake.

use std::time::Instant;

use dtls_cbc::{Error, ProtocolVersion};

use crate::common::*;

fn connected(version: ProtocolVersion) -> (dtls_cbc::Client, dtls_cbc::Server) {
    init_log();
    let (mut client, mut server) = pair(config(version), Instant::now());
    let result = run_handshake(&mut client, &mut server);
    assert!(result.client_connected && result.server_connected);
    (client, server)
}

#[test]
fn data_both_ways() {
    for version in [ProtocolVersion::DTLS1_0, ProtocolVersion::DTLS1_2] {
        let (mut client, mut server) = connected(version);

        client.send_application_data(b"ping").unwrap();
        let packets = collect_packets(&mut client);
        let headers = collect_headers(&packets);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].ctype, APPLICATION_DATA);
        assert_eq!(headers[0].epoch, 1);

        // Encrypted, the payload is not visible.
        assert!(!packets[0].windows(4).any(|w| w == b"ping"));

        deliver_packets(&packets, &mut server);
        assert_eq!(drain_outputs(&mut server).app_data, vec![b"ping".to_vec()]);

        server.send_application_data(b"pong").unwrap();
        let packets = collect_packets(&mut server);
        deliver_packets(&packets, &mut client);
        assert_eq!(drain_outputs(&mut client).app_data, vec![b"pong".to_vec()]);
    }
}

#[test]
fn one_record_per_call() {
    let (mut client, mut server) = connected(ProtocolVersion::DTLS1_2);

    for i in 0..5u8 {
        client.send_application_data(&[i; 100]).unwrap();
    }
    let packets = collect_packets(&mut client);
    assert_eq!(collect_headers(&packets).len(), 5);

    deliver_packets(&packets, &mut server);
    let out = drain_outputs(&mut server);
    assert_eq!(out.app_data.len(), 5);
    for (i, data) in out.app_data.iter().enumerate() {
        assert_eq!(data, &vec![i as u8; 100]);
    }
}

#[test]
fn empty_and_maximal_payloads() {
    let (mut client, mut server) = connected(ProtocolVersion::DTLS1_0);

    client.send_application_data(&[]).unwrap();
    client.send_application_data(&vec![7u8; 16_384]).unwrap();
    assert!(matches!(
        client.send_application_data(&vec![7u8; 16_385]),
        Err(Error::RecordTooLarge(16_385))
    ));

    let mut buf = vec![0u8; 20_000];
    let mut packets = Vec::new();
    loop {
        match client.poll_output(&mut buf) {
            dtls_cbc::Output::Packet(p) => packets.push(p.to_vec()),
            dtls_cbc::Output::Timeout(_) => break,
            _ => {}
        }
    }
    assert_eq!(packets.len(), 2);
    deliver_packets(&packets, &mut server);

    let mut received = Vec::new();
    loop {
        match server.poll_output(&mut buf) {
            dtls_cbc::Output::ApplicationData(d) => received.push(d.len()),
            dtls_cbc::Output::Timeout(_) => break,
            _ => {}
        }
    }
    assert_eq!(received, vec![0, 16_384]);
}

#[test]
fn tampered_data_is_rejected() {
    let (mut client, mut server) = connected(ProtocolVersion::DTLS1_2);

    client.send_application_data(b"secret").unwrap();
    let mut packets = collect_packets(&mut client);
    packets[0][20] ^= 0x80;

    let err = server.handle_packet(&packets[0]).unwrap_err();
    assert!(matches!(err, Error::SecurityError(_)));

    // The session survives.
    assert!(server.is_connected());
    client.send_application_data(b"again").unwrap();
    let packets = collect_packets(&mut client);
    deliver_packets(&packets, &mut server);
    assert_eq!(drain_outputs(&mut server).app_data, vec![b"again".to_vec()]);
}
