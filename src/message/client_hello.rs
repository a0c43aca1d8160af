use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::multi::many0;
use nom::{Err, IResult};

use super::{CipherSuite, CompressionMethod, ProtocolVersion};
use super::{Cookie, Extension, Random, SessionId};

#[derive(Debug, PartialEq, Eq)]
pub struct ClientHello<'a> {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cookie: Cookie,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<CompressionMethod>,
    pub extensions: Vec<Extension<'a>>,
}

impl<'a> ClientHello<'a> {
    /// A hello offering the one supported suite, null compression and the heartbeat
    /// extension.
    pub fn new(client_version: ProtocolVersion, random: Random, cookie: Cookie) -> Self {
        ClientHello {
            client_version,
            random,
            session_id: SessionId::empty(),
            cookie,
            cipher_suites: vec![CipherSuite::RSA_AES128_CBC_SHA],
            compression_methods: vec![CompressionMethod::Null],
            extensions: vec![Extension::heartbeat()],
        }
    }

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], ClientHello<'a>> {
        let (input, client_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cookie) = Cookie::parse(input)?;

        let (input, cipher_suites_len) = be_u16(input)?;
        if cipher_suites_len % 2 != 0 {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        let (input, input_cipher) = take(cipher_suites_len)(input)?;
        let (rest, cipher_suites) = many0(CipherSuite::parse)(input_cipher)?;
        if !rest.is_empty() {
            return Err(Err::Failure(Error::new(rest, ErrorKind::LengthValue)));
        }

        let (input, compression_methods_len) = be_u8(input)?;
        let (input, input_compression) = take(compression_methods_len)(input)?;
        let (_, compression_methods) = many0(CompressionMethod::parse)(input_compression)?;

        // Extensions are optional.
        let (input, extensions) = if input.is_empty() {
            (input, Vec::new())
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
            ClientHello {
                client_version,
                random,
                session_id,
                cookie,
                cipher_suites,
                compression_methods,
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.client_version.serialize(output);
        self.random.serialize(output);
        self.session_id.serialize(output);
        self.cookie.serialize(output);

        output.extend_from_slice(&(self.cipher_suites.len() as u16 * 2).to_be_bytes());
        for suite in &self.cipher_suites {
            suite.serialize(output);
        }

        output.push(self.compression_methods.len() as u8);
        for method in &self.compression_methods {
            output.push(method.as_u8());
        }

        let mut ext = Vec::new();
        for extension in &self.extensions {
            extension.serialize(&mut ext);
        }
        output.extend_from_slice(&(ext.len() as u16).to_be_bytes());
        output.extend_from_slice(&ext);
    }

    /// The part of a ClientHello body that stays the same when the client repeats
    /// the hello with a cookie: cipher suites, compression methods and extensions.
    pub fn static_fields(body: &[u8]) -> Option<&[u8]> {
        // version(2) ‖ random(32) ‖ session id length(1)
        let sid_len = *body.get(34)? as usize;
        let cookie_len_at = 35 + sid_len;
        let cookie_len = *body.get(cookie_len_at)? as usize;
        body.get(cookie_len_at + 1 + cookie_len..)
    }
}
