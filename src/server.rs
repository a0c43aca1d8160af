// DTLS Server Handshake Flow (RSA key transport):
//
// 1. Client sends ClientHello (maybe without cookie)
// 2. If the cookie is missing or wrong, Server sends HelloVerifyRequest
//    - Nothing is kept for the handshake, the Client resends ClientHello with cookie
// 3. Server sends ServerHello, Certificate and ServerHelloDone
// 4. Client sends ClientKeyExchange, ChangeCipherSpec and Finished
// 5. Server verifies Finished, then sends ChangeCipherSpec and Finished
// 6. Handshake complete, application data can flow
//
// A ClientHello on a connected session starts a renegotiation over the current epoch.
// Once connected a hello with a bad cookie is ignored, since a HelloVerifyRequest
// would reuse a record sequence number of the live epoch.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tinyvec::ArrayVec;

use crate::buffer::Buf;
use crate::crypto::{prf, KeyContext, RSA_AES128_CBC_SHA};
use crate::engine::{Engine, LocalEvent, Transition};
use crate::message::{Body, Certificate, CipherSuite, ClientHello, ClientKeyExchange, Cookie};
use crate::message::{Finished, Handshake, HelloVerifyRequest, MessageType, ProtocolVersion};
use crate::message::{Random, ServerHello, MAX_CERTIFICATES};
use crate::record_layer::{Outgoing, RecordLayer};
use crate::security::{finished_label, Role, SecurityParameters};
use crate::{Config, Error, Output};

const COOKIE_LEN: usize = 16;

/// DTLS server, one per client address.
pub struct Server {
    /// Current server state.
    state: State,

    /// Engine in common between server and client.
    engine: Engine,

    /// Certificates, private key and cookie secret.
    key_context: Arc<KeyContext>,

    /// Address of the client. Part of the cookie.
    peer: SocketAddr,

    /// Cookie the client must echo. Computed from the first ClientHello.
    cookie: Option<Cookie>,

    /// Epoch of the parameters being negotiated.
    handshake_epoch: Option<u16>,

    /// Set once the first handshake completes.
    connected: bool,

    /// Local events
    local_events: VecDeque<LocalEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitClientHello,
    AwaitClientKeyExchange,
    AwaitFinished,
    Connected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    ClearFlight,
    SendHelloVerifyRequest {
        version: ProtocolVersion,
        record_seq: u64,
    },
    SendServerHello,
    SendFinished,
    Ignore,
    Fail,
}

impl Server {
    pub fn new(
        config: Arc<Config>,
        key_context: Arc<KeyContext>,
        peer: SocketAddr,
        now: Instant,
    ) -> Server {
        Server {
            state: State::AwaitClientHello,
            engine: Engine::new(config, Role::Server, now),
            key_context,
            peer,
            cookie: None,
            handshake_epoch: None,
            connected: false,
            local_events: VecDeque::new(),
        }
    }

    /// Take up the message sequence numbers of a client whose cookie was already
    /// verified statelessly by a [`Listener`][crate::Listener].
    pub(crate) fn start_at_message_seq(&mut self, message_seq: u16) {
        self.engine.start_at_message_seq(message_seq);
    }

    /// Whether a handshake has completed. Stays true while renegotiating.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the first handshake was aborted.
    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }

    pub fn handle_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        let mut resent = false;

        for record in RecordLayer::decode(packet) {
            let result = self
                .engine
                .handle_record(&record, &mut resent)
                .and_then(|_| self.make_progress());

            if let Err(e) = result {
                self.fail();
                return Err(e);
            }
        }

        Ok(())
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        let result = self.engine.handle_timeout(now);
        if result.is_err() {
            self.fail();
        }
        result
    }

    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Output<'a> {
        match self.poll_ready(buf) {
            Ok(output) => output,
            Err(_) => Output::Timeout(self.engine.poll_timeout()),
        }
    }

    /// Pending output other than a timeout, or the buffer back.
    pub(crate) fn poll_ready<'a>(&mut self, buf: &'a mut [u8]) -> Result<Output<'a>, &'a mut [u8]> {
        if let Some(event) = self.local_events.pop_front() {
            return Ok(event.into_output(buf, None));
        }

        self.engine.poll_ready(buf)
    }

    pub(crate) fn poll_timeout(&self) -> Instant {
        self.engine.poll_timeout()
    }

    /// Send application data when the server is connected.
    pub fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.engine.send_application_data(data)
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            trace!("{} {:?} -> {:?}", self.peer, self.state, state);
            self.state = state;
        }
    }

    fn fail(&mut self) {
        if self.state == State::Connected {
            return;
        }
        self.engine.flight_clear();
        self.engine.connect_timer_stop();
        self.set_state(if self.connected {
            State::Connected
        } else {
            State::Failed
        });
    }

    fn make_progress(&mut self) -> Result<(), Error> {
        while let Some((message, record_seq)) = self.engine.next_handshake() {
            self.handle_message(&message, record_seq)?;
        }
        Ok(())
    }

    fn handle_message(&mut self, message: &[u8], record_seq: u64) -> Result<(), Error> {
        let (_, handshake) = Handshake::parse(message)?;
        let msg_type = handshake.header.msg_type;

        let body = match handshake.body() {
            Ok(body) => body,
            Err(e) => {
                warn!("Drop malformed {:?} from {}: {}", msg_type, self.peer, e);
                return Ok(());
            }
        };

        debug!("Processing handshake: {}:{:?}", handshake.header.message_seq, msg_type);

        let transition = match (self.state, body) {
            (State::AwaitClientHello | State::Connected, Body::ClientHello(v)) => {
                self.handle_client_hello(message, handshake.fragment, v, record_seq)?
            }
            (State::AwaitClientKeyExchange, Body::ClientKeyExchange(v)) => {
                self.handle_client_key_exchange(message, v)?
            }
            (State::AwaitFinished, Body::Finished(v)) => self.handle_finished(message, v)?,
            (state, _) => {
                warn!("Ignore {:?} in state {:?}", msg_type, state);
                return Ok(());
            }
        };

        if let Some(digest) = transition.digest {
            self.parameters()?.digest_handshake(&digest);
        }

        self.perform(transition.next)
    }

    fn handle_client_hello(
        &mut self,
        message: &[u8],
        body: &[u8],
        client_hello: ClientHello,
        record_seq: u64,
    ) -> Result<Transition<Action>, Error> {
        let version = client_hello.client_version;

        if !version.is_supported() {
            warn!("Client offered unsupported version: {:04x}", version.as_u16());
            return Ok(Transition::skip(Action::Fail));
        }

        if !client_hello
            .cipher_suites
            .contains(&CipherSuite::RSA_AES128_CBC_SHA)
        {
            warn!("Client does not offer TLS_RSA_WITH_AES_128_CBC_SHA");
            return Ok(Transition::skip(Action::Fail));
        }

        // Records of epoch 0 carry the version of the very first hello.
        self.engine.container.first_mut().finalize_version(version);

        let expected = match self.cookie {
            Some(cookie) => cookie,
            None => {
                let cookie = self.compute_cookie(version, body)?;
                self.cookie = Some(cookie);
                cookie
            }
        };

        if client_hello.cookie != expected {
            if self.connected {
                warn!("Ignore ClientHello with wrong cookie from {}", self.peer);
                return Ok(Transition::skip(Action::Ignore));
            }
            debug!("Missing or wrong cookie; sending HelloVerifyRequest");
            return Ok(Transition::skip(Action::SendHelloVerifyRequest {
                version,
                record_seq,
            }));
        }

        if self.state == State::Connected {
            info!("Renegotiation from {}", self.peer);
        }

        let parameters = self.engine.container.init_new(version);
        parameters.set_client_random(client_hello.random);
        self.handshake_epoch = Some(parameters.epoch());

        self.engine.connect_timer_start();

        self.set_state(State::AwaitClientKeyExchange);
        Ok(Transition::digest(message, Action::SendServerHello))
    }

    fn handle_client_key_exchange(
        &mut self,
        message: &[u8],
        key_exchange: ClientKeyExchange,
    ) -> Result<Transition<Action>, Error> {
        let pre_master = self
            .key_context
            .decrypt_pre_master(key_exchange.encrypted_pre_master, &mut self.engine.rng);

        self.parameters()?.calculate_master_key(&pre_master)?;

        self.set_state(State::AwaitFinished);
        Ok(Transition::digest(message, Action::ClearFlight))
    }

    fn handle_finished(
        &mut self,
        message: &[u8],
        finished: Finished,
    ) -> Result<Transition<Action>, Error> {
        if !self.parameters()?.verify_peer_finished(finished.verify_data)? {
            warn!("Client Finished from {} does not match the transcript", self.peer);
            return Ok(Transition::skip(Action::Fail));
        }

        Ok(Transition::digest(message, Action::SendFinished))
    }

    fn perform(&mut self, action: Action) -> Result<(), Error> {
        match action {
            Action::ClearFlight => self.engine.flight_clear(),
            Action::SendHelloVerifyRequest {
                version,
                record_seq,
            } => self.send_hello_verify_request(version, record_seq)?,
            Action::SendServerHello => self.send_server_hello()?,
            Action::SendFinished => {
                self.send_finished()?;
                self.engine.connect_timer_stop();
                self.set_state(State::Connected);
                self.connected = true;
                info!("Handshake complete with {}", self.peer);
                self.local_events.push_back(LocalEvent::Connected);
            }
            Action::Ignore => {}
            Action::Fail => self.fail(),
        }
        Ok(())
    }

    fn compute_cookie(&self, version: ProtocolVersion, body: &[u8]) -> Result<Cookie, Error> {
        compute_cookie(&self.key_context, self.peer, version, body)
    }

    /// Sent in the client's version, on the record sequence number of its hello.
    fn send_hello_verify_request(
        &mut self,
        version: ProtocolVersion,
        record_seq: u64,
    ) -> Result<(), Error> {
        let Some(cookie) = self.cookie else {
            return Ok(());
        };

        let mut body = Buf::new();
        HelloVerifyRequest::new(version, cookie).serialize(body.as_vec_mut());

        let handshake = self
            .engine
            .create_handshake(MessageType::HelloVerifyRequest, &body);

        let flight = self
            .engine
            .fragment_handshake(&handshake)
            .into_iter()
            .map(|o| o.with_sequence(record_seq))
            .collect();

        self.engine.send_flight(flight, false)
    }

    fn send_server_hello(&mut self) -> Result<(), Error> {
        let parameters = self.parameters()?;
        let version = parameters
            .version()
            .ok_or_else(|| Error::CryptoError("no negotiated version".into()))?;

        let random = Random::new(self.engine.now(), &mut self.engine.rng);

        let parameters = self.parameters()?;
        parameters.set_server_random(random);
        parameters.set_from(RSA_AES128_CBC_SHA);

        let mut body = Buf::new();
        ServerHello::new(version, random, CipherSuite::RSA_AES128_CBC_SHA)
            .serialize(body.as_vec_mut());
        let server_hello = self.engine.create_handshake(MessageType::ServerHello, &body);
        self.parameters()?.digest_handshake(&server_hello);

        let key_context = self.key_context.clone();
        let mut list = ArrayVec::<[&[u8]; MAX_CERTIFICATES]>::new();
        for cert in key_context.certificate_list() {
            if list.try_push(cert.as_slice()).is_some() {
                return Err(Error::CertificateError(format!(
                    "certificate chain longer than {}",
                    MAX_CERTIFICATES
                )));
            }
        }
        let mut body = Buf::new();
        Certificate::new(list).serialize(body.as_vec_mut());
        let certificate = self.engine.create_handshake(MessageType::Certificate, &body);
        self.parameters()?.digest_handshake(&certificate);

        let server_hello_done = self
            .engine
            .create_handshake(MessageType::ServerHelloDone, &[]);
        self.parameters()?.digest_handshake(&server_hello_done);

        debug!("Sending ServerHello, Certificate, ServerHelloDone");
        let mut flight = self.engine.fragment_handshake(&server_hello);
        flight.extend(self.engine.fragment_handshake(&certificate));
        flight.extend(self.engine.fragment_handshake(&server_hello_done));

        self.engine.send_flight(flight, true)
    }

    fn send_finished(&mut self) -> Result<(), Error> {
        let verify_data = self.parameters()?.verify_data(finished_label(Role::Server))?;

        let mut body = Buf::new();
        Finished::new(&verify_data).serialize(body.as_vec_mut());
        let finished = self.engine.create_handshake(MessageType::Finished, &body);
        self.parameters()?.digest_handshake(&finished);

        debug!("Sending ChangeCipherSpec, Finished");
        let mut flight = vec![Outgoing::change_cipher_spec()];
        flight.extend(self.engine.fragment_handshake(&finished));

        // Kept for a client that repeats its last flight, but not resent on timeout.
        self.engine.send_flight(flight, false)
    }

    fn parameters(&mut self) -> Result<&mut SecurityParameters, Error> {
        let epoch = self
            .handshake_epoch
            .ok_or_else(|| Error::UnexpectedMessage("no handshake in progress".into()))?;
        self.engine
            .container
            .get_mut(epoch)
            .ok_or_else(|| Error::CryptoError(format!("no security parameters for epoch {}", epoch)))
    }
}

/// The cookie only depends on the client address and the parts of ClientHello
/// that stay the same when it is repeated.
pub(crate) fn compute_cookie(
    key_context: &KeyContext,
    peer: SocketAddr,
    version: ProtocolVersion,
    body: &[u8],
) -> Result<Cookie, Error> {
    let seed = ClientHello::static_fields(body)
        .ok_or_else(|| Error::ParseError("short ClientHello".into()))?;
    let label = peer.ip().to_string();

    let cookie = prf(version, key_context.cookie_secret(), &label, seed, COOKIE_LEN)?;
    Cookie::try_new(&cookie).map_err(|e| Error::CryptoError(e.to_string()))
}
