//! Version gated PRF and transcript hash.
//!
//! DTLS 1.0 uses the TLS 1.0/1.1 construction (RFC 2246 section 5): the secret is
//! split in two halves, one fed to P_MD5 and the other to P_SHA1, and the outputs are
//! XORed. The transcript hash is MD5 ‖ SHA1.
//!
//! DTLS 1.2 uses P_SHA256 (RFC 5246 section 5) and a SHA-256 transcript hash.

use hmac::digest::{Digest, KeyInit};
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::crypto_err;
use crate::message::ProtocolVersion;
use crate::Error;

/// Which PRF construction a protocol version uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrfKind {
    /// P_MD5 XOR P_SHA1, for DTLS 1.0 (0xFEFF) and 0xFEFE.
    Legacy,
    /// P_SHA256, for DTLS 1.2 (0xFEFD).
    Sha256,
}

impl PrfKind {
    pub fn for_version(version: ProtocolVersion) -> Result<Self, Error> {
        match version.as_u16() {
            0xFEFF | 0xFEFE => Ok(PrfKind::Legacy),
            0xFEFD => Ok(PrfKind::Sha256),
            v => Err(Error::UnsupportedVersion(v)),
        }
    }
}

/// PRF(secret, label, seed) for `version`, producing exactly `len` bytes.
///
/// The label is prepended to the seed.
pub fn prf(
    version: ProtocolVersion,
    secret: &[u8],
    label: &str,
    seed: &[u8],
    len: usize,
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let kind = PrfKind::for_version(version)?;

    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label.as_bytes());
    label_seed.extend_from_slice(seed);

    match kind {
        PrfKind::Legacy => {
            // Halves overlap by one byte when the secret length is odd.
            let half = secret.len().div_ceil(2);
            let md5_secret = &secret[..half];
            let sha_secret = &secret[secret.len() - half..];

            let mut out = p_hash::<Hmac<Md5>>(md5_secret, &label_seed, len)?;
            let sha = p_hash::<Hmac<Sha1>>(sha_secret, &label_seed, len)?;

            for (o, s) in out.iter_mut().zip(sha.iter()) {
                *o ^= s;
            }

            Ok(out)
        }
        PrfKind::Sha256 => p_hash::<Hmac<Sha256>>(secret, &label_seed, len),
    }
}

/// P_hash(secret, seed) from RFC 5246 section 5.
fn p_hash<M>(secret: &[u8], seed: &[u8], len: usize) -> Result<Zeroizing<Vec<u8>>, Error>
where
    M: Mac + KeyInit + Clone,
{
    let key = <M as Mac>::new_from_slice(secret).map_err(crypto_err)?;

    let mut out = Zeroizing::new(Vec::with_capacity(len));

    // A(1) = HMAC_hash(secret, A(0)) where A(0) = seed
    let mut a = {
        let mut m = key.clone();
        m.update(seed);
        m.finalize().into_bytes()
    };

    while out.len() < len {
        // HMAC_hash(secret, A(i) + seed)
        let mut m = key.clone();
        m.update(&a);
        m.update(seed);
        let output = m.finalize().into_bytes();

        let remaining = len - out.len();
        let to_copy = remaining.min(output.len());
        out.extend_from_slice(&output[..to_copy]);

        if out.len() < len {
            // A(i+1) = HMAC_hash(secret, A(i))
            let mut m = key.clone();
            m.update(&a);
            a = m.finalize().into_bytes();
        }
    }

    Ok(out)
}

/// Streaming transcript hash matching the PRF of a version.
#[derive(Clone)]
pub enum TranscriptHash {
    Legacy(Md5, Sha1),
    Sha256(Sha256),
}

impl TranscriptHash {
    pub fn new(version: ProtocolVersion) -> Result<Self, Error> {
        Ok(match PrfKind::for_version(version)? {
            PrfKind::Legacy => TranscriptHash::Legacy(Md5::new(), Sha1::new()),
            PrfKind::Sha256 => TranscriptHash::Sha256(Sha256::new()),
        })
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            TranscriptHash::Legacy(md5, sha1) => {
                md5.update(data);
                sha1.update(data);
            }
            TranscriptHash::Sha256(sha) => sha.update(data),
        }
    }

    /// 36 bytes (MD5 ‖ SHA1) for the legacy hash, 32 for SHA-256.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            TranscriptHash::Legacy(md5, sha1) => {
                let mut out = md5.finalize().to_vec();
                out.extend_from_slice(&sha1.finalize());
                out
            }
            TranscriptHash::Sha256(sha) => sha.finalize().to_vec(),
        }
    }
}

/// HMAC-SHA1 over the concatenation of `parts`.
pub fn hmac_sha1(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 20], Error> {
    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key).map_err(crypto_err)?;
    for p in parts {
        mac.update(p);
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}
