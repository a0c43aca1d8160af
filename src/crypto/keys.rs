//! RSA key transport of the premaster secret.

use std::fmt;

use der::{Decode, Encode};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use x509_cert::Certificate as X509Certificate;
use zeroize::Zeroizing;

use super::PRE_MASTER_LEN;
use crate::certificate::{CertificateError, DtlsCertificate};
use crate::message::MAX_CERTIFICATES;
use crate::{Error, SeededRng};

const COOKIE_SECRET_LEN: usize = 32;

/// Server side key material: certificate list, RSA private key and cookie secret.
///
/// Shared by all sessions of a [`Listener`][crate::Listener].
pub struct KeyContext {
    certificate_list: Vec<Vec<u8>>,
    private_key: RsaPrivateKey,
    cookie_secret: Zeroizing<[u8; COOKIE_SECRET_LEN]>,
}

impl KeyContext {
    /// Parse and check the certificate and private key.
    ///
    /// Fails if either is missing, unparseable, not RSA, or if they don't belong together.
    pub fn new(certificate: &DtlsCertificate, rng: &mut SeededRng) -> Result<Self, Error> {
        if certificate.certificate.is_empty() {
            return Err(Error::CertificateError("missing certificate".into()));
        }
        if certificate.private_key.is_empty() {
            return Err(Error::CertificateError("missing private key".into()));
        }

        if 1 + certificate.chain.len() > MAX_CERTIFICATES {
            return Err(Error::CertificateError(format!(
                "certificate chain longer than {}",
                MAX_CERTIFICATES
            )));
        }

        let private_key = parse_private_key(&certificate.private_key)?;
        let public_key = public_key_from_certificate(&certificate.certificate)?;

        if private_key.to_public_key() != public_key {
            return Err(Error::CertificateError(
                "private key does not match certificate".into(),
            ));
        }

        let mut cookie_secret = Zeroizing::new([0u8; COOKIE_SECRET_LEN]);
        rng.fill(&mut cookie_secret[..]);

        Ok(KeyContext {
            certificate_list: certificate.certificate_list(),
            private_key,
            cookie_secret,
        })
    }

    /// Leaf certificate first, then the rest of the chain.
    pub fn certificate_list(&self) -> &[Vec<u8>] {
        &self.certificate_list
    }

    pub fn cookie_secret(&self) -> &[u8] {
        &self.cookie_secret[..]
    }

    /// RSA PKCS#1 v1.5 decrypt the client's premaster secret.
    ///
    /// A failed decryption, or a result of the wrong length, yields a random
    /// premaster instead of an error. The handshake then fails at Finished, which
    /// does not tell an attacker which case occurred.
    pub fn decrypt_pre_master(
        &self,
        encrypted: &[u8],
        rng: &mut SeededRng,
    ) -> Zeroizing<Vec<u8>> {
        let mut fallback = Zeroizing::new(vec![0u8; PRE_MASTER_LEN]);
        rng.fill(&mut fallback);

        match self.private_key.decrypt(Pkcs1v15Encrypt, encrypted) {
            Ok(pre_master) if pre_master.len() == PRE_MASTER_LEN => Zeroizing::new(pre_master),
            _ => {
                debug!("Premaster secret rejected, continuing with a random one");
                fallback
            }
        }
    }
}

impl fmt::Debug for KeyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyContext")
            .field("certificates", &self.certificate_list.len())
            .finish()
    }
}

/// RSA PKCS#1 v1.5 encrypt `pre_master` to the public key of `certificate` (DER).
pub fn encrypt_pre_master(
    certificate: &[u8],
    pre_master: &[u8],
    rng: &mut SeededRng,
) -> Result<Vec<u8>, Error> {
    let public_key = public_key_from_certificate(certificate)?;
    Ok(public_key.encrypt(rng, Pkcs1v15Encrypt, pre_master)?)
}

fn public_key_from_certificate(certificate: &[u8]) -> Result<RsaPublicKey, Error> {
    let cert = X509Certificate::from_der(certificate).map_err(|e| {
        Error::CertificateError(format!("{}: {}", CertificateError::InvalidFormat, e))
    })?;

    let spki = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| Error::CertificateError(e.to_string()))?;

    RsaPublicKey::from_public_key_der(&spki)
        .or_else(|_| {
            // Bare PKCS#1 key inside the bit string.
            let bits = &cert.tbs_certificate.subject_public_key_info.subject_public_key;
            RsaPublicKey::from_pkcs1_der(bits.raw_bytes())
        })
        .map_err(|_| Error::CertificateError("certificate key is not RSA".into()))
}

fn parse_private_key(data: &[u8]) -> Result<RsaPrivateKey, Error> {
    if let Ok(key) = RsaPrivateKey::from_pkcs8_der(data) {
        return Ok(key);
    }
    if let Ok(key) = RsaPrivateKey::from_pkcs1_der(data) {
        return Ok(key);
    }

    let pem = std::str::from_utf8(data)
        .map_err(|_| Error::CertificateError("private key is not RSA DER or PEM".into()))?;

    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|_| Error::CertificateError("failed to parse RSA private key".into()))
}
