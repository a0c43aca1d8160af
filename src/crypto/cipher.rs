//! AES-128-CBC with HMAC-SHA1 record protection (MAC-then-encrypt).
//!
//! Wire form of a protected fragment:
//!
//! ```text
//! IV(16) ‖ AES-128-CBC(plaintext ‖ MAC(20) ‖ padding)
//! ```
//!
//! The padding is `p + 1` bytes each holding `p`, bringing the encrypted part to a
//! multiple of the block size. The MAC covers the 13 byte MAC header followed by the
//! plaintext.

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use super::prf::hmac_sha1;
use super::{BLOCK_LEN, MAC_LEN, RECORD_IV_LEN};
use crate::buffer::Buf;
use crate::error::crypto_err;
use crate::message::{ContentType, ProtocolVersion};
use crate::{Error, SeededRng};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Fields of a record that are bound into its MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacHeader {
    pub epoch: u16,
    pub sequence_number: u64,
    pub content_type: ContentType,
    pub version: ProtocolVersion,
}

impl MacHeader {
    /// epoch(2) ‖ sequence(6) ‖ type(1) ‖ version(2) ‖ length(2)
    pub fn to_bytes(&self, plaintext_len: usize) -> [u8; 13] {
        let mut out = [0u8; 13];
        out[0..2].copy_from_slice(&self.epoch.to_be_bytes());
        out[2..8].copy_from_slice(&self.sequence_number.to_be_bytes()[2..]);
        out[8] = self.content_type.as_u8();
        out[9..11].copy_from_slice(&self.version.as_u16().to_be_bytes());
        out[11..13].copy_from_slice(&(plaintext_len as u16).to_be_bytes());
        out
    }
}

/// Protect `plaintext` and write the wire fragment into `out`.
pub fn seal(
    key: &[u8],
    mac_key: &[u8],
    header: &MacHeader,
    plaintext: &[u8],
    rng: &mut SeededRng,
    out: &mut Buf,
) -> Result<(), Error> {
    let mac = hmac_sha1(mac_key, &[&header.to_bytes(plaintext.len()), plaintext])?;

    let mut iv = [0u8; RECORD_IV_LEN];
    rng.fill(&mut iv);

    let mut body = Vec::with_capacity(plaintext.len() + MAC_LEN + BLOCK_LEN);
    body.extend_from_slice(plaintext);
    body.extend_from_slice(&mac);

    // At least one byte of padding (the length byte itself).
    let pad = (BLOCK_LEN - (body.len() + 1) % BLOCK_LEN) % BLOCK_LEN;
    body.resize(body.len() + pad + 1, pad as u8);

    let len = body.len();
    Aes128CbcEnc::new_from_slices(key, &iv)
        .map_err(crypto_err)?
        .encrypt_padded_mut::<NoPadding>(&mut body, len)
        .map_err(|_| Error::CryptoError("CBC encrypt".into()))?;

    out.clear();
    out.extend_from_slice(&iv);
    out.extend_from_slice(&body);

    Ok(())
}

/// Decrypt and authenticate a wire fragment, returning the plaintext.
///
/// Every failure is reported as [`Error::SecurityError`] without any detail about
/// the keys or the decrypted bytes.
pub fn open(
    key: &[u8],
    mac_key: &[u8],
    header: &MacHeader,
    fragment: &[u8],
) -> Result<Vec<u8>, Error> {
    // IV and at least one block holding MAC and padding.
    let min = RECORD_IV_LEN + (MAC_LEN + 1).next_multiple_of(BLOCK_LEN);
    if fragment.len() < min || (fragment.len() - RECORD_IV_LEN) % BLOCK_LEN != 0 {
        return Err(Error::SecurityError("bad record length".into()));
    }

    let (iv, ciphertext) = fragment.split_at(RECORD_IV_LEN);
    let mut body = ciphertext.to_vec();

    let plain_len = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(crypto_err)?
        .decrypt_padded_mut::<NoPadding>(&mut body)
        .map_err(|_| Error::SecurityError("bad record length".into()))?
        .len();
    body.truncate(plain_len);

    let pad = body[body.len() - 1] as usize;
    let padding_ok = pad + 1 + MAC_LEN <= body.len()
        && body[body.len() - pad - 1..].iter().all(|b| *b as usize == pad);

    // Continue to the MAC check with a zero pad so a padding failure takes the
    // same path as a MAC failure.
    let pad = if padding_ok { pad } else { 0 };

    let content_len = body.len() - pad - 1 - MAC_LEN;
    let (content, rest) = body.split_at(content_len);
    let received_mac = &rest[..MAC_LEN];

    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(mac_key).map_err(crypto_err)?;
    mac.update(&header.to_bytes(content_len));
    mac.update(content);
    let mac_ok = mac.verify_slice(received_mac).is_ok();

    if !(padding_ok && mac_ok) {
        return Err(Error::SecurityError("record authentication failed".into()));
    }

    Ok(content.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [7; 16];
    const MAC_KEY: [u8; 20] = [9; 20];

    fn header() -> MacHeader {
        MacHeader {
            epoch: 1,
            sequence_number: 5,
            content_type: ContentType::ApplicationData,
            version: ProtocolVersion::DTLS1_2,
        }
    }

    fn seal_vec(plaintext: &[u8], rng: &mut SeededRng) -> Vec<u8> {
        let mut out = Buf::new();
        seal(&KEY, &MAC_KEY, &header(), plaintext, rng, &mut out).unwrap();
        out.into_vec()
    }

    #[test]
    fn roundtrip_across_block_boundaries() {
        let mut rng = SeededRng::new(Some(1));
        for len in [0, 1, 11, 12, 15, 16, 17, 31, 32, 33, 100, 1000] {
            let plaintext: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let sealed = seal_vec(&plaintext, &mut rng);

            assert_eq!((sealed.len() - RECORD_IV_LEN) % BLOCK_LEN, 0);
            assert!(sealed.len() >= RECORD_IV_LEN + len + MAC_LEN + 1);

            let opened = open(&KEY, &MAC_KEY, &header(), &sealed).unwrap();
            assert_eq!(opened, plaintext, "len {}", len);
        }
    }

    #[test]
    fn fresh_iv_per_record() {
        let mut rng = SeededRng::new(Some(2));
        let a = seal_vec(b"hello", &mut rng);
        let b = seal_vec(b"hello", &mut rng);
        assert_ne!(a[..RECORD_IV_LEN], b[..RECORD_IV_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let mut rng = SeededRng::new(Some(3));
        let mut sealed = seal_vec(b"some application data", &mut rng);
        sealed[RECORD_IV_LEN + 2] ^= 0x01;

        let res = open(&KEY, &MAC_KEY, &header(), &sealed);
        assert!(matches!(res, Err(Error::SecurityError(_))));
    }

    #[test]
    fn header_is_authenticated() {
        let mut rng = SeededRng::new(Some(4));
        let sealed = seal_vec(b"data", &mut rng);

        let mut other = header();
        other.sequence_number = 6;
        assert!(open(&KEY, &MAC_KEY, &other, &sealed).is_err());

        let mut other = header();
        other.content_type = ContentType::Handshake;
        assert!(open(&KEY, &MAC_KEY, &other, &sealed).is_err());
    }

    #[test]
    fn wrong_mac_key_is_rejected() {
        let mut rng = SeededRng::new(Some(5));
        let sealed = seal_vec(b"data", &mut rng);
        assert!(open(&KEY, &[1; 20], &header(), &sealed).is_err());
    }

    #[test]
    fn short_or_misaligned_fragment_is_rejected() {
        assert!(open(&KEY, &MAC_KEY, &header(), &[0; 16]).is_err());
        assert!(open(&KEY, &MAC_KEY, &header(), &[0; 47]).is_err());
    }

    #[test]
    fn mac_header_layout() {
        let h = MacHeader {
            epoch: 0x0102,
            sequence_number: 0x0304_0506_0708,
            content_type: ContentType::Handshake,
            version: ProtocolVersion::DTLS1_0,
        };
        assert_eq!(
            h.to_bytes(0x0a0b),
            [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 22, 0xfe, 0xff, 0x0a, 0x0b]
        );
    }
}
