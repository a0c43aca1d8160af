//! Shared helpers for DTLS integration tests.

#![allow(unused)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dtls_cbc::certificate::{generate_self_signed_certificate, DtlsCertificate};
use dtls_cbc::{Client, Config, Error, KeyContext, Output, ProtocolVersion, SeededRng, Server};
use once_cell::sync::Lazy;

/// RSA key generation is slow, so all tests share one certificate.
pub static CERTIFICATE: Lazy<DtlsCertificate> =
    Lazy::new(|| generate_self_signed_certificate().expect("gen server cert"));

/// Parsed record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecHdr {
    pub ctype: u8,
    pub version: u16,
    pub epoch: u16,
    pub seq: u64,
}

pub const CHANGE_CIPHER_SPEC: u8 = 20;
pub const HANDSHAKE: u8 = 22;
pub const APPLICATION_DATA: u8 = 23;

/// Handshake message types.
pub const CLIENT_HELLO: u8 = 1;
pub const SERVER_HELLO: u8 = 2;
pub const HELLO_VERIFY_REQUEST: u8 = 3;
pub const CERTIFICATE_MSG: u8 = 11;
pub const SERVER_HELLO_DONE: u8 = 14;
pub const CLIENT_KEY_EXCHANGE: u8 = 16;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Parse record headers from a datagram.
pub fn parse_records(datagram: &[u8]) -> Vec<RecHdr> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 13 <= datagram.len() {
        let ctype = datagram[i];
        let version = u16::from_be_bytes([datagram[i + 1], datagram[i + 2]]);
        let epoch = u16::from_be_bytes([datagram[i + 3], datagram[i + 4]]);
        let mut seq_bytes = [0u8; 8];
        seq_bytes[2..].copy_from_slice(&datagram[i + 5..i + 11]);
        let seq = u64::from_be_bytes(seq_bytes);
        let len = u16::from_be_bytes([datagram[i + 11], datagram[i + 12]]) as usize;
        out.push(RecHdr {
            ctype,
            version,
            epoch,
            seq,
        });
        i += 13 + len;
    }
    out
}

/// Collect record headers from a slice of datagrams.
pub fn collect_headers(datagrams: &[Vec<u8>]) -> Vec<RecHdr> {
    datagrams.iter().flat_map(|d| parse_records(d)).collect()
}

/// Handshake message types of the plaintext (epoch 0) handshake records.
pub fn handshake_types(datagrams: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for datagram in datagrams {
        let mut i = 0usize;
        while i + 13 <= datagram.len() {
            let ctype = datagram[i];
            let epoch = u16::from_be_bytes([datagram[i + 3], datagram[i + 4]]);
            let len = u16::from_be_bytes([datagram[i + 11], datagram[i + 12]]) as usize;
            if ctype == HANDSHAKE && epoch == 0 && len > 0 {
                out.push(datagram[i + 13]);
            }
            i += 13 + len;
        }
    }
    out
}

/// Assert that resent records keep their epochs but get new sequence numbers.
pub fn assert_epochs_and_seq_increased(init: &[RecHdr], resend: &[RecHdr]) {
    assert_eq!(
        init.len(),
        resend.len(),
        "record count must match between initial and resend"
    );
    for (a, b) in init.iter().zip(resend.iter()) {
        assert_eq!(a.epoch, b.epoch, "epoch must match on resend");
        assert!(b.seq > a.seq, "sequence must increase on resend: {:?} -> {:?}", a, b);
    }
}

/// Client and server, driven the same way.
pub trait Endpoint {
    fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error>;
    fn handle_timeout(&mut self, now: Instant) -> Result<(), Error>;
    fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Output<'a>;
}

impl Endpoint for Client {
    fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        Client::handle_packet(self, packet)
    }
    fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        Client::handle_timeout(self, now)
    }
    fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Output<'a> {
        Client::poll_output(self, buf)
    }
}

impl Endpoint for Server {
    fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        Server::handle_packet(self, packet)
    }
    fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        Server::handle_timeout(self, now)
    }
    fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Output<'a> {
        Server::poll_output(self, buf)
    }
}

/// Poll until `Timeout`, collecting only packets.
pub fn collect_packets(endpoint: &mut impl Endpoint) -> Vec<Vec<u8>> {
    drain_outputs(endpoint).packets
}

/// Collected outputs from polling an endpoint to `Timeout`.
#[derive(Default, Debug)]
pub struct DrainedOutputs {
    pub packets: Vec<Vec<u8>>,
    pub connected: bool,
    pub peer_cert: Option<Vec<u8>>,
    pub app_data: Vec<Vec<u8>>,
    pub timeout: Option<Instant>,
}

/// Poll until `Timeout`, collecting everything.
pub fn drain_outputs(endpoint: &mut impl Endpoint) -> DrainedOutputs {
    let mut result = DrainedOutputs::default();
    let mut buf = vec![0u8; 4096];
    loop {
        match endpoint.poll_output(&mut buf) {
            Output::Packet(p) => result.packets.push(p.to_vec()),
            Output::Connected => result.connected = true,
            Output::PeerCert(cert) => result.peer_cert = Some(cert.to_vec()),
            Output::ApplicationData(data) => result.app_data.push(data.to_vec()),
            Output::Timeout(t) => {
                result.timeout = Some(t);
                break;
            }
        }
    }
    result
}

/// Deliver a slice of packets to a destination endpoint.
pub fn deliver_packets(packets: &[Vec<u8>], dest: &mut impl Endpoint) {
    for p in packets {
        dest.handle_packet(p).expect("handle_packet");
    }
}

/// Trigger a timeout by advancing time 2 seconds.
pub fn trigger_timeout(ep: &mut impl Endpoint, now: &mut Instant) {
    *now += Duration::from_secs(2);
    ep.handle_timeout(*now).expect("handle_timeout");
}

pub fn config(version: ProtocolVersion) -> Arc<Config> {
    Arc::new(
        Config::builder()
            .protocol_version(version)
            .build()
            .expect("Failed to build config"),
    )
}

pub fn key_context() -> Arc<KeyContext> {
    let mut rng = SeededRng::new(None);
    Arc::new(KeyContext::new(&CERTIFICATE, &mut rng).expect("key context"))
}

pub fn peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

/// A client that has called connect() and a fresh server for it.
pub fn pair(config: Arc<Config>, now: Instant) -> (Client, Server) {
    let mut client = Client::new(config.clone(), now);
    client.connect().expect("connect");
    let server = Server::new(config, key_context(), peer(), now);
    (client, server)
}

/// What each side surfaced during a handshake.
#[derive(Default, Debug)]
pub struct HandshakeResult {
    pub client_connected: bool,
    pub server_connected: bool,
    pub peer_cert: Option<Vec<u8>>,
    pub client_flights: Vec<Vec<Vec<u8>>>,
    pub server_flights: Vec<Vec<Vec<u8>>>,
}

/// Shuttle packets between client and server until neither has anything to send.
pub fn run_handshake(client: &mut Client, server: &mut Server) -> HandshakeResult {
    let mut result = HandshakeResult::default();

    for _ in 0..10 {
        let c = drain_outputs(client);
        result.client_connected |= c.connected;
        if c.peer_cert.is_some() {
            result.peer_cert = c.peer_cert;
        }
        deliver_packets(&c.packets, server);

        let s = drain_outputs(server);
        result.server_connected |= s.connected;
        deliver_packets(&s.packets, client);

        let done = c.packets.is_empty() && s.packets.is_empty();
        if !c.packets.is_empty() {
            result.client_flights.push(c.packets);
        }
        if !s.packets.is_empty() {
            result.server_flights.push(s.packets);
        }
        if done {
            break;
        }
    }

    result
}
