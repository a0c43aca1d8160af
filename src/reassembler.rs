//! Handshake message reassembly and fragmentation.
//!
//! Incoming fragments are merged per message sequence number and released strictly in
//! order. Outgoing messages get sequential message sequence numbers and are split into
//! fragments no larger than [`Config::max_fragment_len`][crate::Config::max_fragment_len].

use std::collections::BTreeMap;

use crate::buffer::Buf;
use crate::message::{Handshake, Header, MessageType};

/// Largest handshake message we reassemble. Room for a long certificate chain.
pub const MAX_MESSAGE_LEN: u32 = 64 * 1024;

/// Outcome of [`Reassembler::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Added {
    /// The fragment was buffered or completed a message.
    Accepted,
    /// Nothing new. The bytes were already buffered or merged.
    Duplicate,
    /// The fragment belongs to a message that was already handed out. The peer is
    /// repeating a flight.
    Retransmit,
    /// Inconsistent with earlier fragments, or over capacity.
    Dropped,
}

#[derive(Debug)]
struct Partial {
    msg_type: MessageType,
    length: u32,
    /// Contiguous bytes from offset 0.
    body: Vec<u8>,
    /// Fragments that don't yet abut `body`, keyed by offset.
    queued: BTreeMap<u32, Vec<u8>>,
    /// Sum of the lengths in `queued`.
    queued_len: usize,
}

impl Partial {
    fn new(header: &Header) -> Self {
        Partial {
            msg_type: header.msg_type,
            length: header.length,
            body: Vec::new(),
            queued: BTreeMap::new(),
            queued_len: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.body.len() == self.length as usize
    }

    /// Append the part of `data` (starting at `offset`) that lies beyond the prefix.
    /// Returns whether the prefix grew.
    fn extend(&mut self, offset: u32, data: &[u8]) -> bool {
        let have = self.body.len();
        let offset = offset as usize;
        let end = offset + data.len();

        if offset > have || end <= have {
            return false;
        }

        self.body.extend_from_slice(&data[have - offset..]);
        true
    }

    fn add(&mut self, offset: u32, data: &[u8]) -> bool {
        if offset as usize > self.body.len() {
            let end = offset as usize + data.len();
            let known = self
                .queued
                .get(&offset)
                .map(|q| offset as usize + q.len() >= end)
                .unwrap_or(false);
            if known {
                return false;
            }
            // Overlapping fragments could otherwise queue many times the message.
            if self.queued_len + data.len() > self.length as usize {
                trace!("Drop queued fragment at offset {}: queue full", offset);
                return false;
            }
            self.queued_len += data.len();
            if let Some(old) = self.queued.insert(offset, data.to_vec()) {
                self.queued_len -= old.len();
            }
            return true;
        }

        if !self.extend(offset, data) {
            return false;
        }

        // Cascade queued fragments that now touch the prefix.
        while let Some((&offset, _)) = self.queued.first_key_value() {
            if offset as usize > self.body.len() {
                break;
            }
            if let Some(data) = self.queued.remove(&offset) {
                self.queued_len -= data.len();
                self.extend(offset, &data);
            }
        }

        true
    }
}

/// Reassembler for the handshake messages of one direction, plus the outgoing message
/// sequence counter of the other.
#[derive(Debug)]
pub struct Reassembler {
    buffers: BTreeMap<u16, Partial>,
    merged: BTreeMap<u16, Buf>,
    next_read_seq: u16,
    next_write_seq: u16,
    max_reassembly: usize,
    max_fragment_len: usize,
}

impl Reassembler {
    pub fn new(max_reassembly: usize, max_fragment_len: usize) -> Self {
        Reassembler {
            buffers: BTreeMap::new(),
            merged: BTreeMap::new(),
            next_read_seq: 0,
            next_write_seq: 0,
            max_reassembly,
            max_fragment_len,
        }
    }

    /// Continue both directions at `message_seq`, as after a ClientHello with that
    /// sequence number.
    pub fn start_at(&mut self, message_seq: u16) {
        self.buffers.clear();
        self.merged.clear();
        self.next_read_seq = message_seq;
        self.next_write_seq = message_seq;
    }

    /// Message sequence number expected next from the peer.
    pub fn next_read_seq(&self) -> u16 {
        self.next_read_seq
    }

    pub fn add(&mut self, handshake: &Handshake) -> Added {
        let header = &handshake.header;
        let seq = header.message_seq;

        if seq < self.next_read_seq {
            trace!(
                "Handshake {:?} seq {} already delivered (next {})",
                header.msg_type,
                seq,
                self.next_read_seq
            );
            return Added::Retransmit;
        }

        if self.merged.contains_key(&seq) {
            return Added::Duplicate;
        }

        // Complete or not, only this many messages ahead are held.
        if (seq - self.next_read_seq) as usize >= self.max_reassembly {
            warn!(
                "Drop handshake {:?} seq {}: more than {} messages ahead of {}",
                header.msg_type, seq, self.max_reassembly, self.next_read_seq
            );
            return Added::Dropped;
        }

        if header.length > MAX_MESSAGE_LEN {
            warn!(
                "Drop handshake {:?} seq {}: length {} over {}",
                header.msg_type, seq, header.length, MAX_MESSAGE_LEN
            );
            return Added::Dropped;
        }

        let partial = self
            .buffers
            .entry(seq)
            .or_insert_with(|| Partial::new(header));

        if partial.msg_type != header.msg_type || partial.length != header.length {
            warn!(
                "Drop handshake fragment seq {}: {:?}/{} does not match {:?}/{}",
                seq, header.msg_type, header.length, partial.msg_type, partial.length
            );
            return Added::Dropped;
        }

        let progressed = partial.add(header.fragment_offset, handshake.fragment);

        // Empty messages are complete on creation.
        if partial.is_complete() {
            if let Some(partial) = self.buffers.remove(&seq) {
                trace!("Handshake {:?} seq {} complete", partial.msg_type, seq);
                let message = assemble(partial.msg_type, seq, &partial.body);
                self.merged.insert(seq, message);
            }
            return Added::Accepted;
        }

        if progressed {
            Added::Accepted
        } else {
            Added::Duplicate
        }
    }

    /// Pop the next complete message in sequence order, header included.
    pub fn next(&mut self) -> Option<Buf> {
        let message = self.merged.remove(&self.next_read_seq)?;
        self.next_read_seq = self.next_read_seq.wrapping_add(1);
        Some(message)
    }

    /// Wrap `body` in a handshake header with the next outgoing message sequence number.
    pub fn create_handshake(&mut self, msg_type: MessageType, body: &[u8]) -> Buf {
        let seq = self.next_write_seq;
        self.next_write_seq = self.next_write_seq.wrapping_add(1);
        assemble(msg_type, seq, body)
    }

    /// Split a complete message into fragments of at most `max_fragment_len` body bytes.
    pub fn fragment_handshake(&self, message: &[u8]) -> Vec<Buf> {
        let (header, body) = match Header::parse(message) {
            Ok((body, header)) => (header, body),
            Err(_) => return Vec::new(),
        };

        if body.is_empty() {
            return vec![Buf::from_slice(message)];
        }

        body.chunks(self.max_fragment_len)
            .enumerate()
            .map(|(i, chunk)| {
                let fragment_header = Header {
                    fragment_offset: (i * self.max_fragment_len) as u32,
                    fragment_length: chunk.len() as u32,
                    ..header
                };

                let mut out = Buf::new();
                fragment_header.serialize(out.as_vec_mut());
                out.extend_from_slice(chunk);
                out
            })
            .collect()
    }
}

fn assemble(msg_type: MessageType, message_seq: u16, body: &[u8]) -> Buf {
    let header = Header {
        msg_type,
        length: body.len() as u32,
        message_seq,
        fragment_offset: 0,
        fragment_length: body.len() as u32,
    };

    let mut out = Buf::new();
    header.serialize(out.as_vec_mut());
    out.extend_from_slice(body);
    out
}
