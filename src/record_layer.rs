//! Records in and out of datagrams.
//!
//! Incoming datagrams are split into records which are then opened one by one, so a
//! ChangeCipherSpec takes effect for the records following it in the same datagram.
//! Outgoing messages are sealed under their epoch and packed into datagrams no
//! larger than the MTU.

use crate::buffer::{Buf, BufferPool};
use crate::crypto::cipher::MacHeader;
use crate::message::{ContentType, DTLSRecord, ProtocolVersion};
use crate::security::SecurityParameterContainer;
use crate::{Error, SeededRng};

/// Version written in records until the epoch has a negotiated version.
pub const DEFAULT_VERSION: ProtocolVersion = ProtocolVersion::DTLS1_0;

/// An opened (decrypted and authenticated) record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub epoch: u16,
    pub sequence_number: u64,
    pub fragment: Vec<u8>,
}

/// A record waiting to be sent, kept as plaintext so a flight can be resent.
///
/// Epoch is fixed on the first send. A pinned sequence number is used for every send.
#[derive(Debug)]
pub struct Outgoing {
    pub content_type: ContentType,
    pub fragment: Buf,
    pub epoch: Option<u16>,
    pub sequence: Option<u64>,
    pub sent: bool,
}

impl Outgoing {
    pub fn new(content_type: ContentType, fragment: Buf) -> Self {
        Outgoing {
            content_type,
            fragment,
            epoch: None,
            sequence: None,
            sent: false,
        }
    }

    pub fn handshake(fragment: Buf) -> Self {
        Self::new(ContentType::Handshake, fragment)
    }

    pub fn change_cipher_spec() -> Self {
        Self::new(ContentType::ChangeCipherSpec, Buf::from_slice(&[1]))
    }

    /// Send with exactly this record sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

#[derive(Debug)]
pub struct RecordLayer {
    send_epoch: u16,
    receive_epoch: u16,
    mtu: usize,
}

impl RecordLayer {
    pub fn new(mtu: usize) -> Self {
        RecordLayer {
            send_epoch: 0,
            receive_epoch: 0,
            mtu,
        }
    }

    pub fn send_epoch(&self) -> u16 {
        self.send_epoch
    }

    pub fn receive_epoch(&self) -> u16 {
        self.receive_epoch
    }

    /// Split a datagram into records. A truncated or malformed tail is dropped.
    pub fn decode(datagram: &[u8]) -> Vec<DTLSRecord<'_>> {
        let mut records = Vec::new();
        let mut input = datagram;

        while !input.is_empty() {
            match DTLSRecord::parse(input) {
                Ok((rest, record)) => {
                    records.push(record);
                    input = rest;
                }
                Err(_) => {
                    warn!("Drop malformed record data: {} bytes", input.len());
                    break;
                }
            }
        }

        records
    }

    /// Epoch gate, decrypt and authenticate a record.
    ///
    /// `Ok(None)` for records that are silently skipped. Authentication failures are
    /// errors.
    pub fn open(
        &mut self,
        container: &mut SecurityParameterContainer,
        record: &DTLSRecord,
    ) -> Result<Option<Record>, Error> {
        if record.epoch > self.receive_epoch {
            trace!(
                "Drop early record epoch {} > {}",
                record.epoch,
                self.receive_epoch
            );
            return Ok(None);
        }

        let Some(parameters) = container.get(record.epoch) else {
            warn!("Record with unknown epoch: {}", record.epoch);
            return Ok(None);
        };

        let fragment = if parameters.has_keys() {
            let header = MacHeader {
                epoch: record.epoch,
                sequence_number: record.sequence_number,
                content_type: record.content_type,
                version: record.version,
            };
            match parameters.decrypt(&header, record.fragment) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    // Never log any key material here.
                    warn!(
                        "Record {:?} epoch {} seq {} failed authentication",
                        record.content_type, record.epoch, record.sequence_number
                    );
                    return Err(e);
                }
            }
        } else {
            record.fragment.to_vec()
        };

        if record.content_type == ContentType::ChangeCipherSpec {
            if record.epoch != self.receive_epoch {
                trace!("Drop stale ChangeCipherSpec in epoch {}", record.epoch);
                return Ok(None);
            }

            container.change_cipher(record.epoch);
            self.receive_epoch = container.current();
            debug!("Receive epoch is {}", self.receive_epoch);
        }

        trace!(
            "Record {:?} epoch {} seq {} len {}",
            record.content_type,
            record.epoch,
            record.sequence_number,
            fragment.len()
        );

        Ok(Some(Record {
            content_type: record.content_type,
            version: record.version,
            epoch: record.epoch,
            sequence_number: record.sequence_number,
            fragment,
        }))
    }

    /// Serialize one outgoing message into a wire record.
    ///
    /// A ChangeCipherSpec moves the send epoch forward the first time it is sent.
    pub fn encode(
        &mut self,
        container: &mut SecurityParameterContainer,
        rng: &mut SeededRng,
        message: &mut Outgoing,
        out: &mut Buf,
    ) -> Result<(), Error> {
        let epoch = *message.epoch.get_or_insert(self.send_epoch);

        let parameters = container.get_mut(epoch).ok_or_else(|| {
            Error::CryptoError(format!("no security parameters for epoch {}", epoch))
        })?;

        if let Some(sequence) = message.sequence {
            parameters.send_sequence().set_next(sequence);
        }
        let sequence_number = parameters.send_sequence().next();
        let version = parameters.version().unwrap_or(DEFAULT_VERSION);

        let mut sealed = Buf::new();
        let fragment: &[u8] = if parameters.has_keys() {
            let header = MacHeader {
                epoch,
                sequence_number,
                content_type: message.content_type,
                version,
            };
            parameters.encrypt(&header, &message.fragment, rng, &mut sealed)?;
            &sealed
        } else {
            &message.fragment
        };

        let record = DTLSRecord {
            content_type: message.content_type,
            version,
            epoch,
            sequence_number,
            length: fragment.len() as u16,
            fragment,
        };

        out.clear();
        record.serialize(out.as_vec_mut());

        trace!(
            "Send {:?} epoch {} seq {} len {}",
            message.content_type,
            epoch,
            sequence_number,
            fragment.len()
        );

        if message.content_type == ContentType::ChangeCipherSpec && !message.sent {
            self.send_epoch = self.send_epoch.wrapping_add(1);
            debug!("Change cipher spec, send epoch is {}", self.send_epoch);
        }
        message.sent = true;

        Ok(())
    }

    /// Pack records into datagrams of at most `mtu` bytes, keeping their order.
    ///
    /// A record larger than the MTU gets a datagram of its own.
    pub fn pack(&self, records: Vec<Buf>, buffers: &mut BufferPool) -> Vec<Buf> {
        let mut datagrams = Vec::new();
        let mut current = buffers.pop();

        for record in records {
            if !current.is_empty() && current.len() + record.len() > self.mtu {
                datagrams.push(current);
                current = buffers.pop();
            }
            current.extend_from_slice(&record);
            buffers.push(record);
        }

        if current.is_empty() {
            buffers.push(current);
        } else {
            datagrams.push(current);
        }

        datagrams
    }
}
