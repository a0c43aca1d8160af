// DTLS Client Handshake Flow (RSA key transport):
//
// 1. Client sends ClientHello (epoch 0)
// 2. Server may respond with HelloVerifyRequest carrying a cookie
//    - If so, Client sends ClientHello again with the cookie, starting a fresh transcript
// 3. Server sends ServerHello, Certificate and ServerHelloDone
// 4. Client sends ClientKeyExchange (premaster encrypted to the server's RSA key),
//    ChangeCipherSpec and Finished (encrypted, next epoch)
// 5. Server sends ChangeCipherSpec and Finished (encrypted, next epoch)
// 6. Handshake complete, application data flows in the new epoch
//
// Calling connect() again after step 6 renegotiates over the current epoch.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use zeroize::Zeroizing;

use crate::buffer::Buf;
use crate::crypto::{encrypt_pre_master, PRE_MASTER_LEN, RSA_AES128_CBC_SHA};
use crate::engine::{Engine, LocalEvent, Transition};
use crate::message::{Body, Certificate, CipherSuite, ClientHello, ClientKeyExchange, Cookie};
use crate::message::{Finished, Handshake, HelloVerifyRequest, MessageType, ProtocolVersion};
use crate::message::{Random, ServerHello};
use crate::record_layer::{Outgoing, RecordLayer, DEFAULT_VERSION};
use crate::security::{finished_label, Role, SecurityParameters};
use crate::{Config, Error, Output};

/// DTLS client
pub struct Client {
    /// Current client state.
    state: State,

    /// Engine in common between server and client.
    engine: Engine,

    /// Cookie from the last HelloVerifyRequest. Reused when renegotiating.
    cookie: Cookie,

    /// Epoch of the parameters being negotiated.
    handshake_epoch: Option<u16>,

    /// Leaf certificate of the server.
    server_certificate: Option<Buf>,

    /// Premaster secret between ServerHelloDone and ClientKeyExchange.
    pre_master: Option<Zeroizing<Vec<u8>>>,

    /// Set once the first handshake completes.
    connected: bool,

    /// Local events
    local_events: VecDeque<LocalEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    AwaitServerHello,
    AwaitCertificate,
    AwaitServerHelloDone,
    AwaitFinished,
    Connected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    ClearFlight,
    SendClientHello,
    SendKeyExchange,
    Connected,
    Fail,
}

impl Client {
    pub fn new(config: Arc<Config>, now: Instant) -> Client {
        Client {
            state: State::Idle,
            engine: Engine::new(config, Role::Client, now),
            cookie: Cookie::empty(),
            handshake_epoch: None,
            server_certificate: None,
            pre_master: None,
            connected: false,
            local_events: VecDeque::new(),
        }
    }

    /// Start the handshake, or renegotiate once connected.
    pub fn connect(&mut self) -> Result<(), Error> {
        match self.state {
            State::Idle | State::Connected | State::Failed => {}
            state => {
                debug!("Handshake already in progress: {:?}", state);
                return Ok(());
            }
        }

        if self.state == State::Connected {
            info!("Renegotiating");
        }

        self.engine.connect_timer_start();
        self.set_state(State::AwaitServerHello);
        self.send_client_hello()
    }

    /// Whether a handshake has completed. Stays true while renegotiating.
    pub fn is_connected(&self) -> bool {
        self.connected
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
        if let Some(event) = self.local_events.pop_front() {
            return event.into_output(buf, self.server_certificate.as_deref());
        }

        self.engine.poll_output(buf)
    }

    /// Send application data when the client is connected.
    pub fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.engine.send_application_data(data)
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            trace!("{:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// An aborted handshake. A completed one survives a failed renegotiation.
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
        while let Some((message, _)) = self.engine.next_handshake() {
            self.handle_message(&message)?;
        }
        Ok(())
    }

    fn handle_message(&mut self, message: &[u8]) -> Result<(), Error> {
        let (_, handshake) = Handshake::parse(message)?;
        let msg_type = handshake.header.msg_type;

        let body = match handshake.body() {
            Ok(body) => body,
            Err(e) => {
                warn!("Drop malformed {:?}: {}", msg_type, e);
                return Ok(());
            }
        };

        debug!("Processing handshake: {}:{:?}", handshake.header.message_seq, msg_type);

        let transition = match (self.state, body) {
            (State::AwaitServerHello, Body::HelloVerifyRequest(v)) => {
                self.handle_hello_verify_request(message, v)
            }
            (State::AwaitServerHello, Body::ServerHello(v)) => self.handle_server_hello(message, v),
            (State::AwaitCertificate, Body::Certificate(v)) => self.handle_certificate(message, v),
            (State::AwaitServerHelloDone, Body::ServerHelloDone) => {
                self.handle_server_hello_done(message)?
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

    fn handle_hello_verify_request(
        &mut self,
        message: &[u8],
        hello_verify: HelloVerifyRequest,
    ) -> Transition<Action> {
        debug!("HelloVerifyRequest with {} byte cookie", hello_verify.cookie.len());
        self.cookie = hello_verify.cookie;
        Transition::digest(message, Action::SendClientHello)
    }

    fn handle_server_hello(&mut self, message: &[u8], server_hello: ServerHello) -> Transition<Action> {
        let version = server_hello.server_version;

        if !version.is_supported() {
            warn!("Server chose unsupported version: {:04x}", version.as_u16());
            return Transition::skip(Action::Fail);
        }
        if server_hello.cipher_suite != CipherSuite::RSA_AES128_CBC_SHA {
            warn!("Server chose unsupported suite: {:?}", server_hello.cipher_suite);
            return Transition::skip(Action::Fail);
        }

        debug!("ServerHello received. Server version: {:04x}", version.as_u16());

        let Ok(parameters) = self.parameters() else {
            return Transition::skip(Action::Fail);
        };
        parameters.set_version(version);
        parameters.set_server_random(server_hello.random);
        parameters.set_from(RSA_AES128_CBC_SHA);

        self.engine.container.first_mut().finalize_version(version);

        self.set_state(State::AwaitCertificate);
        Transition::digest(message, Action::ClearFlight)
    }

    fn handle_certificate(&mut self, message: &[u8], certificate: Certificate) -> Transition<Action> {
        let Some(leaf) = certificate.certificate_list.first() else {
            warn!("Server sent no certificate");
            return Transition::skip(Action::Fail);
        };

        self.server_certificate = Some(Buf::from_slice(leaf));
        self.local_events.push_back(LocalEvent::PeerCert);

        self.set_state(State::AwaitServerHelloDone);
        Transition::digest(message, Action::ClearFlight)
    }

    fn handle_server_hello_done(&mut self, message: &[u8]) -> Result<Transition<Action>, Error> {
        // The premaster carries the version we offered, not the negotiated one.
        let mut pre_master = Zeroizing::new(vec![0u8; PRE_MASTER_LEN]);
        let version = self.engine.config().protocol_version();
        pre_master[..2].copy_from_slice(&version.as_u16().to_be_bytes());
        self.engine.rng.fill(&mut pre_master[2..]);

        let parameters = self.parameters()?;
        parameters.calculate_master_key(&pre_master)?;
        parameters.derive_keys()?;

        self.pre_master = Some(pre_master);

        self.set_state(State::AwaitFinished);
        Ok(Transition::digest(message, Action::SendKeyExchange))
    }

    fn handle_finished(&mut self, message: &[u8], finished: Finished) -> Result<Transition<Action>, Error> {
        if !self.parameters()?.verify_peer_finished(finished.verify_data)? {
            warn!("Server Finished does not match the transcript");
            return Ok(Transition::skip(Action::Fail));
        }

        Ok(Transition::digest(message, Action::Connected))
    }

    fn perform(&mut self, action: Action) -> Result<(), Error> {
        match action {
            Action::ClearFlight => self.engine.flight_clear(),
            Action::SendClientHello => self.send_client_hello()?,
            Action::SendKeyExchange => self.send_key_exchange()?,
            Action::Connected => {
                self.engine.flight_clear();
                self.engine.connect_timer_stop();
                self.set_state(State::Connected);
                self.connected = true;
                info!("Handshake complete");
                self.local_events.push_back(LocalEvent::Connected);
            }
            Action::Fail => self.fail(),
        }
        Ok(())
    }

    fn send_client_hello(&mut self) -> Result<(), Error> {
        let version = self.engine.config().protocol_version();
        let random = Random::new(self.engine.now(), &mut self.engine.rng);

        // Records stay DTLS 1.0 until the server has picked a version.
        let parameters = self.engine.container.init_new(DEFAULT_VERSION);
        parameters.set_client_random(random);
        self.handshake_epoch = Some(parameters.epoch());

        let client_hello = ClientHello::new(version, random, self.cookie);
        let mut body = Buf::new();
        client_hello.serialize(body.as_vec_mut());

        debug!("Sending ClientHello");
        let handshake = self.engine.create_handshake(MessageType::ClientHello, &body);
        self.parameters()?.digest_handshake(&handshake);

        let flight = self.engine.fragment_handshake(&handshake);
        self.engine.send_flight(flight, true)
    }

    fn send_key_exchange(&mut self) -> Result<(), Error> {
        let certificate = self
            .server_certificate
            .as_ref()
            .ok_or_else(|| Error::UnexpectedMessage("ServerHelloDone before Certificate".into()))?;
        let pre_master = self
            .pre_master
            .take()
            .ok_or_else(|| Error::CryptoError("no premaster secret".into()))?;

        let encrypted = encrypt_pre_master(certificate, &pre_master, &mut self.engine.rng)?;

        let mut body = Buf::new();
        ClientKeyExchange::new(&encrypted).serialize(body.as_vec_mut());
        let key_exchange = self
            .engine
            .create_handshake(MessageType::ClientKeyExchange, &body);
        self.parameters()?.digest_handshake(&key_exchange);

        let verify_data = self.parameters()?.verify_data(finished_label(Role::Client))?;
        let mut body = Buf::new();
        Finished::new(&verify_data).serialize(body.as_vec_mut());
        let finished = self.engine.create_handshake(MessageType::Finished, &body);
        self.parameters()?.digest_handshake(&finished);

        debug!("Sending ClientKeyExchange, ChangeCipherSpec, Finished");
        let mut flight = self.engine.fragment_handshake(&key_exchange);
        flight.push(Outgoing::change_cipher_spec());
        flight.extend(self.engine.fragment_handshake(&finished));

        self.engine.send_flight(flight, true)
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

    /// The version offered in ClientHello.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.engine.config().protocol_version()
    }
}
