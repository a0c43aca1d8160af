use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::{Err, IResult};

use super::{
    Certificate, ClientHello, ClientKeyExchange, Finished, HelloVerifyRequest, ServerHello,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub msg_type: MessageType,
    pub length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

impl Header {
    /// type(1) ‖ length(3) ‖ message_seq(2) ‖ fragment_offset(3) ‖ fragment_length(3)
    pub const LEN: usize = 12;

    pub fn parse(input: &[u8]) -> IResult<&[u8], Header> {
        let (input, msg_type) = MessageType::parse(input)?;
        let (input, length) = be_u24(input)?;
        let (input, message_seq) = be_u16(input)?;
        let (input, fragment_offset) = be_u24(input)?;
        let (input, fragment_length) = be_u24(input)?;

        Ok((
            input,
            Header {
                msg_type,
                length,
                message_seq,
                fragment_offset,
                fragment_length,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.msg_type.as_u8());
        output.extend_from_slice(&self.length.to_be_bytes()[1..]);
        output.extend_from_slice(&self.message_seq.to_be_bytes());
        output.extend_from_slice(&self.fragment_offset.to_be_bytes()[1..]);
        output.extend_from_slice(&self.fragment_length.to_be_bytes()[1..]);
    }

    /// Whether this header covers less than the whole message.
    pub fn is_fragment(&self) -> bool {
        self.fragment_offset > 0 || self.fragment_length < self.length
    }
}

/// A handshake message or a fragment of one, as carried in a record.
#[derive(Debug, PartialEq, Eq)]
pub struct Handshake<'a> {
    pub header: Header,
    pub fragment: &'a [u8],
}

impl<'a> Handshake<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Handshake<'a>> {
        let (input, header) = Header::parse(input)?;

        if header.fragment_offset as u64 + header.fragment_length as u64 > header.length as u64 {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }

        let (input, fragment) = take(header.fragment_length as usize)(input)?;

        Ok((input, Handshake { header, fragment }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.header.serialize(output);
        output.extend_from_slice(self.fragment);
    }

    /// Parse the body of a complete (unfragmented) message.
    pub fn body(&self) -> Result<Body<'a>, crate::Error> {
        if self.header.is_fragment() {
            return Err(crate::Error::ParseIncomplete);
        }
        let (rest, body) = Body::parse(self.fragment, self.header.msg_type)?;
        if !rest.is_empty() {
            return Err(crate::Error::ParseError(format!(
                "{} trailing bytes after {:?}",
                rest.len(),
                self.header.msg_type
            )));
        }
        Ok(body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageType {
    HelloRequest, // empty
    ClientHello,
    HelloVerifyRequest,
    ServerHello,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone, // empty
    CertificateVerify,
    ClientKeyExchange,
    Finished,
    Unknown(u8),
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => MessageType::HelloRequest,
            1 => MessageType::ClientHello,
            2 => MessageType::ServerHello,
            3 => MessageType::HelloVerifyRequest,
            11 => MessageType::Certificate,
            12 => MessageType::ServerKeyExchange,
            13 => MessageType::CertificateRequest,
            14 => MessageType::ServerHelloDone,
            15 => MessageType::CertificateVerify,
            16 => MessageType::ClientKeyExchange,
            20 => MessageType::Finished,
            _ => MessageType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::HelloRequest => 0,
            MessageType::ClientHello => 1,
            MessageType::ServerHello => 2,
            MessageType::HelloVerifyRequest => 3,
            MessageType::Certificate => 11,
            MessageType::ServerKeyExchange => 12,
            MessageType::CertificateRequest => 13,
            MessageType::ServerHelloDone => 14,
            MessageType::CertificateVerify => 15,
            MessageType::ClientKeyExchange => 16,
            MessageType::Finished => 20,
            MessageType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], MessageType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }

    /// Messages that open a flight. Seeing one of these again means the peer
    /// is repeating its last flight.
    pub fn starts_flight(&self) -> bool {
        matches!(
            self,
            MessageType::ClientHello
                | MessageType::HelloVerifyRequest
                | MessageType::ServerHelloDone
                | MessageType::ClientKeyExchange
        )
    }
}

#[derive(Debug, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Body<'a> {
    ClientHello(ClientHello<'a>),
    HelloVerifyRequest(HelloVerifyRequest),
    ServerHello(ServerHello<'a>),
    Certificate(Certificate<'a>),
    ServerHelloDone, // empty
    ClientKeyExchange(ClientKeyExchange<'a>),
    Finished(Finished<'a>),
    Unknown(u8),
}

impl<'a> Body<'a> {
    pub fn parse(input: &'a [u8], m: MessageType) -> IResult<&'a [u8], Body<'a>> {
        match m {
            MessageType::ClientHello => {
                let (input, client_hello) = ClientHello::parse(input)?;
                Ok((input, Body::ClientHello(client_hello)))
            }
            MessageType::HelloVerifyRequest => {
                let (input, hello_verify) = HelloVerifyRequest::parse(input)?;
                Ok((input, Body::HelloVerifyRequest(hello_verify)))
            }
            MessageType::ServerHello => {
                let (input, server_hello) = ServerHello::parse(input)?;
                Ok((input, Body::ServerHello(server_hello)))
            }
            MessageType::Certificate => {
                let (input, certificate) = Certificate::parse(input)?;
                Ok((input, Body::Certificate(certificate)))
            }
            MessageType::ServerHelloDone => Ok((input, Body::ServerHelloDone)),
            MessageType::ClientKeyExchange => {
                let (input, key_exchange) = ClientKeyExchange::parse(input)?;
                Ok((input, Body::ClientKeyExchange(key_exchange)))
            }
            MessageType::Finished => {
                let (input, finished) = Finished::parse(input)?;
                Ok((input, Body::Finished(finished)))
            }
            other => Ok((&input[input.len()..], Body::Unknown(other.as_u8()))),
        }
    }

    pub fn msg_type(&self) -> MessageType {
        match self {
            Body::ClientHello(_) => MessageType::ClientHello,
            Body::HelloVerifyRequest(_) => MessageType::HelloVerifyRequest,
            Body::ServerHello(_) => MessageType::ServerHello,
            Body::Certificate(_) => MessageType::Certificate,
            Body::ServerHelloDone => MessageType::ServerHelloDone,
            Body::ClientKeyExchange(_) => MessageType::ClientKeyExchange,
            Body::Finished(_) => MessageType::Finished,
            Body::Unknown(v) => MessageType::Unknown(*v),
        }
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        match self {
            Body::ClientHello(v) => v.serialize(output),
            Body::HelloVerifyRequest(v) => v.serialize(output),
            Body::ServerHello(v) => v.serialize(output),
            Body::Certificate(v) => v.serialize(output),
            Body::ServerHelloDone => {}
            Body::ClientKeyExchange(v) => v.serialize(output),
            Body::Finished(v) => v.serialize(output),
            Body::Unknown(_) => {}
        }
    }
}
