use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u16;
use nom::{Err, IResult};
use tinyvec::ArrayVec;

use super::{CipherSuite, CompressionMethod, Extension, ProtocolVersion, Random, SessionId};
use crate::util::many0;

#[derive(Debug, PartialEq, Eq)]
pub struct ServerHello<'a> {
    pub server_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    pub compression_method: CompressionMethod,
    pub extensions: ArrayVec<[Extension<'a>; 16]>,
}

impl<'a> ServerHello<'a> {
    pub fn new(server_version: ProtocolVersion, random: Random, cipher_suite: CipherSuite) -> Self {
        let mut extensions = ArrayVec::new();
        extensions.push(Extension::heartbeat());

        ServerHello {
            server_version,
            random,
            session_id: SessionId::empty(),
            cipher_suite,
            compression_method: CompressionMethod::Null,
            extensions,
        }
    }

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], ServerHello<'a>> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cipher_suite) = CipherSuite::parse(input)?;
        let (input, compression_method) = CompressionMethod::parse(input)?;

        let (input, extensions) = if input.is_empty() {
            (input, ArrayVec::new())
        } else {
            let (input, extensions_len) = be_u16(input)?;
            let (input, input_ext) = take(extensions_len)(input)?;
            let (rest, extensions) = many0(Extension::parse)(input_ext)?;
            if !rest.is_empty() {
                return Err(Err::Failure(Error::new(rest, ErrorKind::LengthValue)));
            }
            (input, extensions)
        };

        Ok((
            input,
            ServerHello {
                server_version,
                random,
                session_id,
                cipher_suite,
                compression_method,
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.server_version.serialize(output);
        self.random.serialize(output);
        self.session_id.serialize(output);
        self.cipher_suite.serialize(output);
        output.push(self.compression_method.as_u8());

        let mut ext = Vec::new();
        for extension in &self.extensions {
            extension.serialize(&mut ext);
        }
        output.extend_from_slice(&(ext.len() as u16).to_be_bytes());
        output.extend_from_slice(&ext);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = &[
        0xFE, 0xFF, // ProtocolVersion::DTLS1_0
        // Random
        0x00, 0x00, 0x00, 0x07, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05,
        0x05, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05,
        0x05, 0x05, 0x05, 0x05, //
        0x00, // SessionId length
        0x00, 0x2F, // CipherSuite
        0x00, // CompressionMethod::Null
        0x00, 0x05, // Extensions length
        0x00, 0x0F, 0x00, 0x01, 0x01, // Heartbeat
    ];

    #[test]
    fn roundtrip() {
        let random = Random {
            gmt_unix_time: 7,
            random_bytes: [5; 28],
        };
        let server_hello =
            ServerHello::new(ProtocolVersion::DTLS1_0, random, CipherSuite::RSA_AES128_CBC_SHA);

        let mut serialized = Vec::new();
        server_hello.serialize(&mut serialized);
        assert_eq!(serialized, MESSAGE);

        let (rest, parsed) = ServerHello::parse(&serialized).unwrap();
        assert_eq!(parsed, server_hello);
        assert!(rest.is_empty());
    }

    #[test]
    fn truncated_extensions() {
        assert!(ServerHello::parse(&MESSAGE[..MESSAGE.len() - 1]).is_err());
    }
}
