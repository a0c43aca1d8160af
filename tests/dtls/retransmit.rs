//! Retransmission on timeout and on repeated peer flights.

use std::time::{Duration, Instant};

use dtls_cbc::{Client, Config, Error, ProtocolVersion};

use crate::common::*;

#[test]
fn client_hello_is_resent_on_timeout() {
    init_log();
    let mut now = Instant::now();
    let mut client = Client::new(config(ProtocolVersion::DTLS1_2), now);
    client.connect().unwrap();

    let initial = collect_packets(&mut client);
    let timeout = drain_outputs(&mut client).timeout.unwrap();
    assert_eq!(timeout, now + Duration::from_secs(1));

    trigger_timeout(&mut client, &mut now);
    let resend = collect_packets(&mut client);

    assert_eq!(handshake_types(&resend), vec![CLIENT_HELLO]);
    assert_epochs_and_seq_increased(&collect_headers(&initial), &collect_headers(&resend));
}

#[test]
fn each_client_flight_survives_a_loss() {
    init_log();
    let mut now = Instant::now();
    let (mut client, mut server) = pair(config(ProtocolVersion::DTLS1_2), now);

    // ClientHello lost.
    collect_packets(&mut client);
    trigger_timeout(&mut client, &mut now);
    let hello = collect_packets(&mut client);
    deliver_packets(&hello, &mut server);

    let hvr = collect_packets(&mut server);
    deliver_packets(&hvr, &mut client);

    // ClientHello with cookie lost.
    collect_packets(&mut client);
    trigger_timeout(&mut client, &mut now);
    let hello = collect_packets(&mut client);
    deliver_packets(&hello, &mut server);

    // Server flight lost.
    collect_packets(&mut server);
    trigger_timeout(&mut server, &mut now);
    let flight = collect_packets(&mut server);
    assert_eq!(
        handshake_types(&flight),
        vec![SERVER_HELLO, CERTIFICATE_MSG, SERVER_HELLO_DONE]
    );
    deliver_packets(&flight, &mut client);

    // Key exchange flight lost.
    let initial = collect_packets(&mut client);
    trigger_timeout(&mut client, &mut now);
    let resend = collect_packets(&mut client);
    assert_epochs_and_seq_increased(&collect_headers(&initial), &collect_headers(&resend));
    assert!(
        collect_headers(&resend)
            .iter()
            .any(|h| h.ctype == HANDSHAKE && h.epoch == 1),
        "resend should include epoch 1 Finished"
    );
    deliver_packets(&resend, &mut server);

    let out = drain_outputs(&mut server);
    assert!(out.connected);
    deliver_packets(&out.packets, &mut client);

    assert!(drain_outputs(&mut client).connected);
}

#[test]
fn lost_server_finished_is_resent_when_client_repeats() {
    init_log();
    let mut now = Instant::now();
    let (mut client, mut server) = pair(config(ProtocolVersion::DTLS1_0), now);

    for _ in 0..2 {
        let c = collect_packets(&mut client);
        deliver_packets(&c, &mut server);
        let s = collect_packets(&mut server);
        deliver_packets(&s, &mut client);
    }

    let key_exchange = collect_packets(&mut client);
    deliver_packets(&key_exchange, &mut server);

    // Server's ChangeCipherSpec and Finished get lost.
    let out = drain_outputs(&mut server);
    assert!(out.connected);
    assert!(!out.packets.is_empty());

    // The server does not resend on its own.
    trigger_timeout(&mut server, &mut now);
    assert!(collect_packets(&mut server).is_empty());

    // The client does, which makes the server repeat its flight.
    trigger_timeout(&mut client, &mut now);
    let resend = collect_packets(&mut client);
    deliver_packets(&resend, &mut server);

    let repeat = collect_packets(&mut server);
    let ctypes: Vec<u8> = collect_headers(&repeat).iter().map(|h| h.ctype).collect();
    assert_eq!(ctypes, vec![CHANGE_CIPHER_SPEC, HANDSHAKE]);

    deliver_packets(&repeat, &mut client);
    assert!(drain_outputs(&mut client).connected);
    assert!(client.is_connected());
}

#[test]
fn repeated_server_flight_gives_one_key_exchange_resend() {
    init_log();
    let now = Instant::now();
    let (mut client, mut server) = pair(config(ProtocolVersion::DTLS1_2), now);

    let hello = collect_packets(&mut client);
    deliver_packets(&hello, &mut server);
    let hvr = collect_packets(&mut server);
    deliver_packets(&hvr, &mut client);

    let hello = collect_packets(&mut client);
    deliver_packets(&hello, &mut server);
    let flight = collect_packets(&mut server);
    deliver_packets(&flight, &mut client);

    let key_exchange = collect_packets(&mut client);
    let ctypes: Vec<u8> = collect_headers(&key_exchange).iter().map(|h| h.ctype).collect();
    assert_eq!(ctypes, vec![HANDSHAKE, CHANGE_CIPHER_SPEC, HANDSHAKE]);

    // The whole server flight shows up again.
    deliver_packets(&flight, &mut client);
    let resend = collect_packets(&mut client);
    assert_eq!(handshake_types(&resend), vec![CLIENT_KEY_EXCHANGE]);
    assert_epochs_and_seq_increased(&collect_headers(&key_exchange), &collect_headers(&resend));

    // Nothing more until the server answers.
    assert!(collect_packets(&mut client).is_empty());
    assert!(!client.is_connected());

    // The first copy still completes the handshake.
    deliver_packets(&key_exchange, &mut server);
    let out = drain_outputs(&mut server);
    assert!(out.connected);
    deliver_packets(&out.packets, &mut client);
    assert!(drain_outputs(&mut client).connected);
}

#[test]
fn duplicated_client_hello_gives_one_resend() {
    init_log();
    let now = Instant::now();
    let (mut client, mut server) = pair(config(ProtocolVersion::DTLS1_2), now);

    let hello = collect_packets(&mut client);
    deliver_packets(&hello, &mut server);
    let hvr = collect_packets(&mut server);
    deliver_packets(&hvr, &mut client);

    let hello = collect_packets(&mut client);
    deliver_packets(&hello, &mut server);
    let flight = collect_packets(&mut server);
    assert!(!flight.is_empty());

    // Both copies in one datagram.
    let mut twice = hello[0].clone();
    twice.extend_from_slice(&hello[0]);
    server.handle_packet(&twice).unwrap();

    let resend = collect_packets(&mut server);
    assert_eq!(
        handshake_types(&resend),
        vec![SERVER_HELLO, CERTIFICATE_MSG, SERVER_HELLO_DONE]
    );
    assert_epochs_and_seq_increased(&collect_headers(&flight), &collect_headers(&resend));
}

#[test]
fn duplicated_first_hello_repeats_hello_verify_request() {
    init_log();
    let now = Instant::now();
    let (mut client, mut server) = pair(config(ProtocolVersion::DTLS1_2), now);

    let hello = collect_packets(&mut client);
    deliver_packets(&hello, &mut server);
    let hvr = collect_packets(&mut server);

    deliver_packets(&hello, &mut server);
    let again = collect_packets(&mut server);

    // Same bytes, the record sequence follows the ClientHello.
    assert_eq!(hvr, again);
}

#[test]
fn retries_run_out() {
    init_log();
    let mut now = Instant::now();
    let config = std::sync::Arc::new(
        Config::builder()
            .flight_retries(Some(2))
            .build()
            .unwrap(),
    );
    let mut client = Client::new(config, now);
    client.connect().unwrap();

    trigger_timeout(&mut client, &mut now);
    trigger_timeout(&mut client, &mut now);

    now += Duration::from_secs(2);
    let err = client.handle_timeout(now).unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
}
