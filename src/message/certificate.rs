use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u24;
use nom::{Err, IResult};
use tinyvec::ArrayVec;

/// Most certificates a Certificate message can carry.
pub const MAX_CERTIFICATES: usize = 16;

/// List of DER certificates, leaf first.
#[derive(Debug, PartialEq, Eq)]
pub struct Certificate<'a> {
    pub certificate_list: ArrayVec<[&'a [u8]; 16]>,
}

impl<'a> Certificate<'a> {
    pub fn new(certificate_list: ArrayVec<[&'a [u8]; 16]>) -> Self {
        Certificate { certificate_list }
    }

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Certificate<'a>> {
        let (input, total_len) = be_u24(input)?;
        let (input, mut list) = take(total_len as usize)(input)?;
        let mut certificate_list = ArrayVec::new();

        while !list.is_empty() {
            let (rest, cert_len) = be_u24(list)?;
            let (rest, cert_data) = take(cert_len as usize)(rest)?;
            if certificate_list.try_push(cert_data).is_some() {
                return Err(Err::Failure(Error::new(list, ErrorKind::TooLarge)));
            }
            list = rest;
        }

        Ok((input, Certificate { certificate_list }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        let total_len: usize = self
            .certificate_list
            .iter()
            .map(|cert| 3 + cert.len())
            .sum();
        output.extend_from_slice(&(total_len as u32).to_be_bytes()[1..]);

        for cert in &self.certificate_list {
            output.extend_from_slice(&(cert.len() as u32).to_be_bytes()[1..]);
            output.extend_from_slice(cert);
        }
    }
}
