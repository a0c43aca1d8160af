//! Many clients through one Listener.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use dtls_cbc::{Client, Listener, ListenerOutput, Output, ProtocolVersion};

use crate::common::*;

struct Peer {
    addr: SocketAddr,
    client: Client,
    connected: bool,
    app_data: Vec<Vec<u8>>,
}

/// Move datagrams between the listener and the clients until nothing is sent.
fn pump(listener: &mut Listener, peers: &mut [Peer]) -> Vec<SocketAddr> {
    let mut server_connected = Vec::new();
    let mut buf = vec![0u8; 4096];

    for _ in 0..10 {
        let mut sent = false;

        for peer in peers.iter_mut() {
            let out = drain_outputs(&mut peer.client);
            peer.connected |= out.connected;
            peer.app_data.extend(out.app_data);
            for p in &out.packets {
                listener.handle_packet(peer.addr, p).unwrap();
                sent = true;
            }
        }

        loop {
            match listener.poll_output(&mut buf) {
                ListenerOutput::Peer(addr, Output::Packet(p)) => {
                    let p = p.to_vec();
                    let peer = peers.iter_mut().find(|x| x.addr == addr).unwrap();
                    peer.client.handle_packet(&p).unwrap();
                    sent = true;
                }
                ListenerOutput::Peer(addr, Output::Connected) => server_connected.push(addr),
                ListenerOutput::Peer(_, _) => {}
                ListenerOutput::Timeout(_) => break,
            }
        }

        if !sent {
            break;
        }
    }

    server_connected
}

fn listener(now: Instant) -> Listener {
    Listener::new(config(ProtocolVersion::DTLS1_2), CERTIFICATE.clone(), now).unwrap()
}

fn peer(port: u16, now: Instant) -> Peer {
    let mut client = Client::new(config(ProtocolVersion::DTLS1_2), now);
    client.connect().unwrap();
    Peer {
        addr: SocketAddr::from(([127, 0, 0, 1], port)),
        client,
        connected: false,
        app_data: Vec::new(),
    }
}

#[test]
fn two_clients_connect() {
    init_log();
    let now = Instant::now();
    let mut listener = listener(now);
    let mut peers = vec![peer(5001, now), peer(5002, now)];

    let mut connected = pump(&mut listener, &mut peers);
    connected.sort();

    assert_eq!(connected, vec![peers[0].addr, peers[1].addr]);
    assert!(peers.iter().all(|p| p.connected));
    assert!(peers.iter().all(|p| listener.is_connected(p.addr)));
    assert_eq!(listener.len(), 2);

    // Data goes to the right client.
    listener
        .send_application_data(peers[1].addr, b"to second")
        .unwrap();
    pump(&mut listener, &mut peers);
    assert!(peers[0].app_data.is_empty());
    assert_eq!(peers[1].app_data, vec![b"to second".to_vec()]);
}

#[test]
fn data_from_clients_is_tagged_with_address() {
    init_log();
    let now = Instant::now();
    let mut listener = listener(now);
    let mut peers = vec![peer(6001, now)];
    pump(&mut listener, &mut peers);

    peers[0].client.send_application_data(b"hello").unwrap();
    for p in collect_packets(&mut peers[0].client) {
        listener.handle_packet(peers[0].addr, &p).unwrap();
    }

    let mut buf = vec![0u8; 2048];
    match listener.poll_output(&mut buf) {
        ListenerOutput::Peer(addr, Output::ApplicationData(data)) => {
            assert_eq!(addr, peers[0].addr);
            assert_eq!(data, b"hello");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn timed_out_handshakes_are_dropped() {
    init_log();
    let now = Instant::now();
    let config = std::sync::Arc::new(
        dtls_cbc::Config::builder()
            .handshake_timeout(Some(Duration::from_secs(5)))
            .build()
            .unwrap(),
    );
    let mut listener = Listener::new(config, CERTIFICATE.clone(), now).unwrap();
    let mut client = Client::new(config_default(), now);
    client.connect().unwrap();
    let addr = SocketAddr::from(([127, 0, 0, 1], 7001));

    // Get as far as the server flight, then go quiet.
    let mut buf = vec![0u8; 4096];
    for _ in 0..2 {
        for p in collect_packets(&mut client) {
            listener.handle_packet(addr, &p).unwrap();
        }
        while let ListenerOutput::Peer(_, Output::Packet(p)) = listener.poll_output(&mut buf) {
            let p = p.to_vec();
            client.handle_packet(&p).unwrap();
        }
    }
    assert_eq!(listener.len(), 1);

    listener.handle_timeout(now + Duration::from_secs(2)).unwrap();
    assert_eq!(listener.len(), 1);

    listener.handle_timeout(now + Duration::from_secs(6)).unwrap();
    assert!(listener.is_empty());
}

#[test]
fn remove_forgets_session() {
    init_log();
    let now = Instant::now();
    let mut listener = listener(now);
    let mut peers = vec![peer(8001, now)];
    pump(&mut listener, &mut peers);

    assert!(listener.remove(peers[0].addr));
    assert!(!listener.is_connected(peers[0].addr));
    assert!(listener.send_application_data(peers[0].addr, b"x").is_err());
}

fn config_default() -> std::sync::Arc<dtls_cbc::Config> {
    std::sync::Arc::new(dtls_cbc::Config::default())
}
