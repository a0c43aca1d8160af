//! Server side multiplexer: one [`Server`] per client address.
//!
//! A client only gets a session once it echoes a valid cookie. Until then each
//! ClientHello is answered with a HelloVerifyRequest built from the datagram alone,
//! and nothing is kept for the address.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::certificate::DtlsCertificate;
use crate::crypto::KeyContext;
use crate::engine::DISTANT_FUTURE;
use crate::message::{CipherSuite, ClientHello, ContentType, Cookie, DTLSRecord, Handshake};
use crate::message::{Header, HelloVerifyRequest, MessageType, ProtocolVersion};
use crate::server::compute_cookie;
use crate::{Config, Error, Output, SeededRng, Server};

/// Output of [`Listener::poll_output`].
#[derive(Debug)]
pub enum ListenerOutput<'a> {
    /// Output of the session with this peer.
    Peer(SocketAddr, Output<'a>),

    /// Call [`Listener::handle_timeout`] at this instant, unless another
    /// datagram arrives first.
    Timeout(Instant),
}

/// Accepts handshakes from any number of clients over one socket.
///
/// Sessions whose handshake failed, timed out or went quiet for longer than
/// [`Config::session_idle_timeout`] are dropped in [`Listener::handle_timeout`].
pub struct Listener {
    config: Arc<Config>,
    key_context: Arc<KeyContext>,
    sessions: HashMap<SocketAddr, Session>,

    /// HelloVerifyRequests for addresses without a session.
    queue_tx: VecDeque<(SocketAddr, Vec<u8>)>,

    last_now: Instant,
}

struct Session {
    server: Server,
    /// When the client was last heard from.
    last_seen: Instant,
}

impl Session {
    fn is_idle(&self, now: Instant, idle: Duration) -> bool {
        !self.server.is_connected() && now >= self.last_seen + idle
    }

    fn poll_timeout(&self, idle: Duration) -> Instant {
        let timeout = self.server.poll_timeout();
        if self.server.is_connected() {
            timeout
        } else {
            timeout.min(self.last_seen + idle)
        }
    }
}

/// What a datagram from an address without a session holds.
enum Hello {
    /// ClientHello with a valid cookie, at this message sequence number.
    Verified(u16),
    /// ClientHello to be answered with this datagram.
    Verify(Vec<u8>),
    Ignore,
}

impl Listener {
    /// Fails if the certificate or its private key can't be used.
    pub fn new(
        config: Arc<Config>,
        certificate: DtlsCertificate,
        now: Instant,
    ) -> Result<Listener, Error> {
        let mut rng = SeededRng::new(config.rng_seed());
        let key_context = Arc::new(KeyContext::new(&certificate, &mut rng)?);

        Ok(Listener {
            config,
            key_context,
            sessions: HashMap::new(),
            queue_tx: VecDeque::new(),
            last_now: now,
        })
    }

    /// Feed a datagram received from `peer`.
    pub fn handle_packet(&mut self, peer: SocketAddr, packet: &[u8]) -> Result<(), Error> {
        if let Some(session) = self.sessions.get_mut(&peer) {
            session.last_seen = self.last_now;
            return session.server.handle_packet(packet);
        }

        match self.check_hello(peer, packet) {
            Hello::Verified(message_seq) => {
                debug!("New session: {}", peer);
                let mut server = Server::new(
                    self.config.clone(),
                    self.key_context.clone(),
                    peer,
                    self.last_now,
                );
                server.start_at_message_seq(message_seq);

                let session = self.sessions.entry(peer).or_insert(Session {
                    server,
                    last_seen: self.last_now,
                });
                session.server.handle_packet(packet)
            }
            Hello::Verify(datagram) => {
                if self.queue_tx.len() >= self.config.max_queue_tx() {
                    warn!(
                        "Transmit queue full (max {})",
                        self.config.max_queue_tx()
                    );
                    return Err(Error::TransmitQueueFull);
                }
                self.queue_tx.push_back((peer, datagram));
                Ok(())
            }
            Hello::Ignore => Ok(()),
        }
    }

    /// Drive the timers of all sessions.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        self.last_now = now;
        let idle = self.config.session_idle_timeout();

        self.sessions.retain(|peer, session| {
            if session.is_idle(now, idle) {
                debug!("Drop idle session {}", peer);
                return false;
            }
            if let Err(e) = session.server.handle_timeout(now) {
                warn!("Drop session {}: {}", peer, e);
                return false;
            }
            if session.server.is_failed() {
                warn!("Drop failed session {}", peer);
                return false;
            }
            true
        });

        Ok(())
    }

    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> ListenerOutput<'a> {
        if let Some((peer, datagram)) = self.queue_tx.pop_front() {
            let len = datagram.len();
            assert!(
                len <= buf.len(),
                "Output buffer too small for packet {} > {}",
                len,
                buf.len()
            );
            buf[..len].copy_from_slice(&datagram);
            return ListenerOutput::Peer(peer, Output::Packet(&buf[..len]));
        }

        let mut buf = buf;

        for (peer, session) in self.sessions.iter_mut() {
            buf = match session.server.poll_ready(buf) {
                Ok(output) => return ListenerOutput::Peer(*peer, output),
                Err(b) => b,
            };
        }

        let idle = self.config.session_idle_timeout();
        let timeout = self
            .sessions
            .values()
            .map(|s| s.poll_timeout(idle))
            .min()
            .unwrap_or(self.last_now + DISTANT_FUTURE);

        ListenerOutput::Timeout(timeout)
    }

    /// Send application data to a connected peer.
    pub fn send_application_data(&mut self, peer: SocketAddr, data: &[u8]) -> Result<(), Error> {
        let Some(session) = self.sessions.get_mut(&peer) else {
            return Err(Error::NotConnected);
        };
        session.server.send_application_data(data)
    }

    /// Whether the handshake with `peer` has completed.
    pub fn is_connected(&self, peer: SocketAddr) -> bool {
        self.sessions
            .get(&peer)
            .map(|s| s.server.is_connected())
            .unwrap_or(false)
    }

    /// Forget the session with `peer`. Returns whether there was one.
    pub fn remove(&mut self, peer: SocketAddr) -> bool {
        let removed = self.sessions.remove(&peer).is_some();
        if removed {
            debug!("Removed session: {}", peer);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Look for an unfragmented ClientHello in the first record of the datagram.
    fn check_hello(&self, peer: SocketAddr, packet: &[u8]) -> Hello {
        let Ok((_, record)) = DTLSRecord::parse(packet) else {
            trace!("Drop malformed datagram from {}", peer);
            return Hello::Ignore;
        };

        if record.content_type != ContentType::Handshake || record.epoch != 0 {
            trace!(
                "Drop {:?} epoch {} from {} without session",
                record.content_type,
                record.epoch,
                peer
            );
            return Hello::Ignore;
        }

        let Ok((_, handshake)) = Handshake::parse(record.fragment) else {
            trace!("Drop malformed handshake from {}", peer);
            return Hello::Ignore;
        };

        let header = handshake.header;
        if header.msg_type != MessageType::ClientHello || header.is_fragment() {
            trace!(
                "Drop {:?} from {} without session",
                header.msg_type,
                peer
            );
            return Hello::Ignore;
        }

        let Ok((_, client_hello)) = ClientHello::parse(handshake.fragment) else {
            warn!("Drop malformed ClientHello from {}", peer);
            return Hello::Ignore;
        };

        let version = client_hello.client_version;
        if !version.is_supported() {
            warn!("Client {} offered unsupported version: {:04x}", peer, version.as_u16());
            return Hello::Ignore;
        }
        if !client_hello
            .cipher_suites
            .contains(&CipherSuite::RSA_AES128_CBC_SHA)
        {
            warn!("Client {} does not offer TLS_RSA_WITH_AES_128_CBC_SHA", peer);
            return Hello::Ignore;
        }

        let cookie = match compute_cookie(&self.key_context, peer, version, handshake.fragment) {
            Ok(cookie) => cookie,
            Err(e) => {
                warn!("Drop ClientHello from {}: {}", peer, e);
                return Hello::Ignore;
            }
        };

        if client_hello.cookie == cookie {
            return Hello::Verified(header.message_seq);
        }

        debug!("Missing or wrong cookie from {}; sending HelloVerifyRequest", peer);
        Hello::Verify(hello_verify_request(
            version,
            cookie,
            header.message_seq,
            record.sequence_number,
        ))
    }
}

/// HelloVerifyRequest datagram mirroring the message and record sequence numbers of
/// the ClientHello it answers.
fn hello_verify_request(
    version: ProtocolVersion,
    cookie: Cookie,
    message_seq: u16,
    record_seq: u64,
) -> Vec<u8> {
    let mut body = Vec::new();
    HelloVerifyRequest::new(version, cookie).serialize(&mut body);

    let mut fragment = Vec::new();
    Handshake {
        header: Header {
            msg_type: MessageType::HelloVerifyRequest,
            length: body.len() as u32,
            message_seq,
            fragment_offset: 0,
            fragment_length: body.len() as u32,
        },
        fragment: &body,
    }
    .serialize(&mut fragment);

    let mut datagram = Vec::new();
    DTLSRecord {
        content_type: ContentType::Handshake,
        version,
        epoch: 0,
        sequence_number: record_seq,
        length: fragment.len() as u16,
        fragment: &fragment,
    }
    .serialize(&mut datagram);
    datagram
}
