//! Cryptographic building blocks.
//!
//! Only TLS_RSA_WITH_AES_128_CBC_SHA is implemented, so the suite descriptor is a
//! single constant.

pub mod cipher;
pub mod keys;
pub mod prf;

pub use keys::{encrypt_pre_master, KeyContext};
pub use prf::{prf, TranscriptHash};

use crate::message::CipherSuite;

/// AES block size.
pub const BLOCK_LEN: usize = 16;

/// Length of the explicit IV sent in front of every protected record.
pub const RECORD_IV_LEN: usize = 16;

/// HMAC-SHA1 output length.
pub const MAC_LEN: usize = 20;

/// Length of the verify data in Finished.
pub const VERIFY_DATA_LEN: usize = 12;

/// Master secret length.
pub const MASTER_SECRET_LEN: usize = 48;

/// RSA premaster secret length: version(2) ‖ random(46).
pub const PRE_MASTER_LEN: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkCipher {
    Aes128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherType {
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlgorithm {
    HmacSha1,
}

/// Sizes and algorithms of a cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteParams {
    pub suite: CipherSuite,
    pub bulk_cipher: BulkCipher,
    pub cipher_type: CipherType,
    pub enc_key_len: usize,
    pub block_len: usize,
    pub fixed_iv_len: usize,
    pub record_iv_len: usize,
    pub mac: MacAlgorithm,
    pub mac_len: usize,
    pub mac_key_len: usize,
}

impl SuiteParams {
    /// Bytes of key material needed from the key expansion.
    pub fn key_block_len(&self) -> usize {
        2 * self.mac_key_len + 2 * self.enc_key_len + 2 * self.fixed_iv_len
    }
}

pub const RSA_AES128_CBC_SHA: SuiteParams = SuiteParams {
    suite: CipherSuite::RSA_AES128_CBC_SHA,
    bulk_cipher: BulkCipher::Aes128,
    cipher_type: CipherType::Block,
    enc_key_len: 16,
    block_len: BLOCK_LEN,
    fixed_iv_len: 16,
    record_iv_len: RECORD_IV_LEN,
    mac: MacAlgorithm::HmacSha1,
    mac_len: MAC_LEN,
    mac_key_len: 20,
};
