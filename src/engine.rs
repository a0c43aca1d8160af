use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::buffer::{Buf, BufferPool};
use crate::message::{ContentType, DTLSRecord, Handshake, MessageType};
use crate::reassembler::{Added, Reassembler};
use crate::record_layer::{Outgoing, RecordLayer};
use crate::security::{Role, SecurityParameterContainer};
use crate::timer::FlightBackoff;
use crate::{Config, Error, Output, SeededRng};

/// Largest application data payload in one record.
pub const MAX_APPLICATION_DATA: usize = 16_384;

/// Reported as the next timeout when no timer is armed.
pub const DISTANT_FUTURE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Plumbing shared by client and server: records in and out, the last flight and
/// its retransmission timer, and buffered output.
pub struct Engine {
    config: Arc<Config>,

    /// Seedable random number generator for deterministic testing
    pub(crate) rng: SeededRng,

    /// Pool of buffers
    buffers_free: BufferPool,

    /// Datagrams waiting for poll_output.
    queue_tx: VecDeque<Buf>,

    /// Decrypted application data waiting for poll_output.
    queue_app_data: VecDeque<Buf>,

    /// Security parameters per epoch.
    pub(crate) container: SecurityParameterContainer,

    record_layer: RecordLayer,

    reassembler: Reassembler,

    /// Record sequence number of the last handshake record received.
    last_record_seq: u64,

    /// The last flight sent, kept for resends until superseded.
    flight: Vec<Outgoing>,

    /// Flight backoff
    flight_backoff: FlightBackoff,

    /// Timeout for the current flight
    flight_timeout: Timeout,

    /// Deadline for the ongoing handshake.
    connect_timeout: Timeout,

    /// The last now we've seen.
    last_now: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timeout {
    Disabled,
    Armed(Instant),
}

impl Engine {
    pub fn new(config: Arc<Config>, role: Role, now: Instant) -> Self {
        let mut rng = SeededRng::new(config.rng_seed());

        let flight_backoff = FlightBackoff::new(
            config.flight_start_rto(),
            config.flight_backoff(),
            config.flight_retries(),
            &mut rng,
        );

        Engine {
            rng,
            buffers_free: BufferPool::default(),
            queue_tx: VecDeque::new(),
            queue_app_data: VecDeque::new(),
            container: SecurityParameterContainer::new(role),
            record_layer: RecordLayer::new(config.mtu()),
            reassembler: Reassembler::new(config.max_reassembly(), config.max_fragment_len()),
            last_record_seq: 0,
            flight: Vec::new(),
            flight_backoff,
            flight_timeout: Timeout::Disabled,
            connect_timeout: Timeout::Disabled,
            last_now: now,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn now(&self) -> Instant {
        self.last_now
    }

    /// Open one record and feed its content onwards.
    ///
    /// Handshake fragments go to the reassembler. A fragment of an already delivered
    /// flight-starting message resends our last flight, at most once per datagram
    /// (tracked by `resent`).
    pub fn handle_record(&mut self, record: &DTLSRecord, resent: &mut bool) -> Result<(), Error> {
        let Some(record) = self.record_layer.open(&mut self.container, record)? else {
            return Ok(());
        };

        match record.content_type {
            ContentType::Handshake => {
                self.last_record_seq = record.sequence_number;

                let mut input = &record.fragment[..];
                while !input.is_empty() {
                    let (rest, handshake) = match Handshake::parse(input) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("Drop malformed handshake fragment: {:?}", e);
                            break;
                        }
                    };
                    input = rest;

                    trace!(
                        "Handshake fragment {:?} seq {} offset {} len {}",
                        handshake.header.msg_type,
                        handshake.header.message_seq,
                        handshake.header.fragment_offset,
                        handshake.header.fragment_length
                    );

                    let added = self.reassembler.add(&handshake);

                    if added == Added::Retransmit
                        && handshake.header.fragment_offset == 0
                        && handshake.header.msg_type.starts_flight()
                        && !*resent
                    {
                        *resent = true;
                        self.flight_resend_now(handshake.header.msg_type)?;
                    }
                }
            }
            ContentType::ApplicationData => {
                if record.epoch == 0 {
                    warn!("Drop plaintext application data");
                } else {
                    let mut buf = self.buffers_free.pop();
                    buf.extend_from_slice(&record.fragment);
                    self.queue_app_data.push_back(buf);
                }
            }
            ContentType::Alert => {
                warn!("Ignore alert: {:02x?}", record.fragment);
            }
            ContentType::ChangeCipherSpec => {
                // Handled in the record layer.
            }
            ContentType::Unknown(v) => {
                warn!("Drop record of unknown content type: {}", v);
            }
        }

        Ok(())
    }

    /// Next complete handshake message in sequence, with the record sequence number of
    /// the record that completed it.
    pub fn next_handshake(&mut self) -> Option<(Buf, u64)> {
        let message = self.reassembler.next()?;
        Some((message, self.last_record_seq))
    }

    /// Expect the peer's next handshake message at `message_seq` and number ours
    /// from there.
    pub fn start_at_message_seq(&mut self, message_seq: u16) {
        self.reassembler.start_at(message_seq);
    }

    /// Wrap a body into a handshake message with the next message sequence number.
    pub fn create_handshake(&mut self, msg_type: MessageType, body: &[u8]) -> Buf {
        self.reassembler.create_handshake(msg_type, body)
    }

    /// Outgoing records for a complete handshake message, fragmented as configured.
    pub fn fragment_handshake(&self, message: &[u8]) -> Vec<Outgoing> {
        self.reassembler
            .fragment_handshake(message)
            .into_iter()
            .map(Outgoing::handshake)
            .collect()
    }

    /// Send a new flight that supersedes the previous one.
    ///
    /// With `arm` the flight is resent on timeout. Otherwise it's only resent when the
    /// peer repeats its own last flight.
    ///
    /// The flight is kept even if the transmit queue overflows, so the records that
    /// didn't fit go out with the next resend.
    pub fn send_flight(&mut self, mut messages: Vec<Outgoing>, arm: bool) -> Result<(), Error> {
        self.flight_clear();
        self.flight_backoff.reset(&mut self.rng);

        let result = self.transmit(&mut messages);
        self.flight = messages;

        if arm {
            let timeout = self.last_now + self.flight_backoff.rto();
            debug!(
                "Flight timeout in: {:.03}s",
                self.flight_backoff.rto().as_secs_f32()
            );
            self.flight_timeout = Timeout::Armed(timeout);
        }

        match result {
            Err(Error::TransmitQueueFull) => {
                warn!("Flight of {} records kept for resend", self.flight.len());
                Ok(())
            }
            r => r,
        }
    }

    /// Send records that are not part of any flight.
    pub fn send_once(&mut self, mut messages: Vec<Outgoing>) -> Result<(), Error> {
        self.transmit(&mut messages)?;
        for m in messages {
            self.buffers_free.push(m.fragment);
        }
        Ok(())
    }

    /// Forget the last flight. The peer has shown it got it.
    pub fn flight_clear(&mut self) {
        if !self.flight.is_empty() {
            trace!("Clear flight of {} records", self.flight.len());
        }
        for m in self.flight.drain(..) {
            self.buffers_free.push(m.fragment);
        }
        self.flight_timeout = Timeout::Disabled;
    }

    /// Stop resending the last flight on timeout, but keep it for evidence
    /// triggered resends.
    pub fn flight_stop_timer(&mut self) {
        self.flight_timeout = Timeout::Disabled;
    }

    fn flight_resend(&mut self, reason: &str) -> Result<(), Error> {
        debug!("Resending flight due to {}", reason);
        // For lifetime issues, we take the entries out of self
        let mut flight = mem::take(&mut self.flight);
        let result = self.transmit(&mut flight);
        self.flight = flight;

        match result {
            Err(Error::TransmitQueueFull) => Ok(()),
            r => r,
        }
    }

    fn flight_resend_now(&mut self, msg_type: MessageType) -> Result<(), Error> {
        if self.flight.is_empty() {
            return Ok(());
        }

        debug!("Peer repeated {:?}", msg_type);
        self.flight_resend("peer retransmit")?;

        if let Timeout::Armed(_) = self.flight_timeout {
            self.flight_backoff.reset(&mut self.rng);
            self.flight_timeout = Timeout::Armed(self.last_now + self.flight_backoff.rto());
        }

        Ok(())
    }

    /// Arm the overall handshake deadline, if one is configured.
    pub fn connect_timer_start(&mut self) {
        if let Some(timeout) = self.config.handshake_timeout() {
            debug!("Handshake timeout in: {:.03}s", timeout.as_secs_f32());
            self.connect_timeout = Timeout::Armed(self.last_now + timeout);
        }
    }

    pub fn connect_timer_stop(&mut self) {
        self.connect_timeout = Timeout::Disabled;
    }

    fn transmit(&mut self, messages: &mut [Outgoing]) -> Result<(), Error> {
        let mut records = Vec::with_capacity(messages.len());

        for message in messages.iter_mut() {
            let mut record = self.buffers_free.pop();
            self.record_layer.encode(
                &mut self.container,
                &mut self.rng,
                message,
                &mut record,
            )?;
            records.push(record);
        }

        for datagram in self.record_layer.pack(records, &mut self.buffers_free) {
            if self.queue_tx.len() >= self.config.max_queue_tx() {
                warn!(
                    "Transmit queue full (max {})",
                    self.config.max_queue_tx()
                );
                return Err(Error::TransmitQueueFull);
            }
            self.queue_tx.push_back(datagram);
        }

        Ok(())
    }

    /// Send application data in one record at the current send epoch.
    pub fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() > MAX_APPLICATION_DATA {
            return Err(Error::RecordTooLarge(data.len()));
        }

        let mut fragment = self.buffers_free.pop();
        fragment.extend_from_slice(data);

        self.send_once(vec![Outgoing::new(ContentType::ApplicationData, fragment)])
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        self.last_now = now;

        // The connect timeout is the overall timeout for the handshake
        if let Timeout::Armed(connect_timeout) = self.connect_timeout {
            if now >= connect_timeout {
                return Err(Error::Timeout("handshake"));
            }
        }

        let Timeout::Armed(flight_timeout) = self.flight_timeout else {
            return Ok(());
        };

        if now >= flight_timeout {
            if self.flight_backoff.can_retry() {
                self.flight_backoff.attempt(&mut self.rng);
                debug!(
                    "Re-arm flight timeout due to resend in {}",
                    self.flight_backoff.rto().as_secs_f32()
                );
                let timeout = now + self.flight_backoff.rto();
                self.flight_timeout = Timeout::Armed(timeout);
                self.flight_resend("flight timeout")?;
            } else {
                return Err(Error::Timeout("flight"));
            }
        }

        Ok(())
    }

    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Output<'a> {
        match self.poll_ready(buf) {
            Ok(output) => output,
            Err(_) => Output::Timeout(self.poll_timeout()),
        }
    }

    /// Buffered output, or the buffer back when there is none.
    pub fn poll_ready<'a>(&mut self, buf: &'a mut [u8]) -> Result<Output<'a>, &'a mut [u8]> {
        // First check if we have any decrypted app data.
        let buf = match self.poll_app_data(buf) {
            Ok(p) => return Ok(Output::ApplicationData(p)),
            Err(b) => b,
        };

        self.poll_packet_tx(buf).map(Output::Packet)
    }

    fn poll_app_data<'a>(&mut self, buf: &'a mut [u8]) -> Result<&'a [u8], &'a mut [u8]> {
        let Some(data) = self.queue_app_data.pop_front() else {
            return Err(buf);
        };

        let len = data.len();
        assert!(
            len <= buf.len(),
            "Output buffer too small for application data {} > {}",
            len,
            buf.len()
        );

        buf[..len].copy_from_slice(&data);
        self.buffers_free.push(data);

        Ok(&buf[..len])
    }

    fn poll_packet_tx<'a>(&mut self, buf: &'a mut [u8]) -> Result<&'a [u8], &'a mut [u8]> {
        let Some(p) = self.queue_tx.pop_front() else {
            return Err(buf);
        };

        let len = p.len();
        assert!(
            len <= buf.len(),
            "Output buffer too small for packet {} > {}",
            len,
            buf.len()
        );

        buf[..len].copy_from_slice(&p);
        self.buffers_free.push(p);

        Ok(&buf[..len])
    }

    pub fn poll_timeout(&self) -> Instant {
        match (self.connect_timeout, self.flight_timeout) {
            (Timeout::Armed(c), Timeout::Armed(f)) => c.min(f),
            (Timeout::Armed(c), _) => c,
            (_, Timeout::Armed(f)) => f,
            // No timeouts, return a distant future
            _ => self.last_now + DISTANT_FUTURE,
        }
    }
}

/// Result of handling one handshake message.
///
/// `digest` goes into the transcript before `next` is performed, so a response sent
/// by `next` is digested after the message that caused it.
pub struct Transition<A> {
    pub digest: Option<Buf>,
    pub next: A,
}

impl<A> Transition<A> {
    pub fn digest(message: &[u8], next: A) -> Self {
        Transition {
            digest: Some(Buf::from_slice(message)),
            next,
        }
    }

    pub fn skip(next: A) -> Self {
        Transition { digest: None, next }
    }
}

/// Events raised by the handshake, drained before packets in poll_output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalEvent {
    PeerCert,
    Connected,
}

impl LocalEvent {
    pub fn into_output<'a>(self, buf: &'a mut [u8], peer_cert: Option<&[u8]>) -> Output<'a> {
        match self {
            LocalEvent::PeerCert => {
                let cert = peer_cert.unwrap_or_default();
                let l = cert.len();
                assert!(
                    l <= buf.len(),
                    "Output buffer too small for peer certificate"
                );
                buf[..l].copy_from_slice(cert);
                Output::PeerCert(&buf[..l])
            }
            LocalEvent::Connected => Output::Connected,
        }
    }
}
