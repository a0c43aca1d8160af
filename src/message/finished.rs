use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::{Err, IResult};

use crate::crypto::VERIFY_DATA_LEN;

#[derive(Debug, PartialEq, Eq)]
pub struct Finished<'a> {
    pub verify_data: &'a [u8],
}

impl<'a> Finished<'a> {
    pub fn new(verify_data: &'a [u8]) -> Self {
        Finished { verify_data }
    }

    /// The body must be exactly the verify data, nothing shorter or longer.
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Finished<'a>> {
        if input.len() != VERIFY_DATA_LEN {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        let (input, verify_data) = take(VERIFY_DATA_LEN)(input)?;
        Ok((input, Finished { verify_data }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(self.verify_data);
    }
}
