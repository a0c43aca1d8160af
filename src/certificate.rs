//! Certificate generation and formatting utilities exposed via the public `certificate` module.
//!
//! The only key exchange is RSA, so servers need an RSA key and an X.509 certificate
//! carrying the matching public key. [`generate_self_signed_certificate`] produces such
//! a pair for tests and ad-hoc setups.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use der::{Decode, Encode};
use rsa::pkcs1v15::{Signature, SigningKey};
use pkcs8::{EncodePrivateKey, EncodePublicKey};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use spki::SubjectPublicKeyInfoOwned;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Validity;

use crate::SeededRng;

/// Certificate utility error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    /// Invalid certificate format
    InvalidFormat,
    /// Certificate generation failed
    GenerationFailed,
}

impl fmt::Display for CertificateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateError::InvalidFormat => write!(f, "Invalid certificate format"),
            CertificateError::GenerationFailed => write!(f, "Certificate generation failed"),
        }
    }
}

impl std::error::Error for CertificateError {}

/// Certificate chain and private key of a server.
#[derive(Clone)]
pub struct DtlsCertificate {
    /// Leaf certificate in DER format
    pub certificate: Vec<u8>,
    /// Further certificates (DER) sent after the leaf, closest to the leaf first.
    pub chain: Vec<Vec<u8>>,
    /// RSA private key of the leaf, PKCS#8 or PKCS#1, DER or PEM.
    pub private_key: Vec<u8>,
}

impl DtlsCertificate {
    /// Create from a leaf certificate and its private key, without intermediates.
    pub fn new(certificate: Vec<u8>, private_key: Vec<u8>) -> Self {
        DtlsCertificate {
            certificate,
            chain: Vec::new(),
            private_key,
        }
    }

    /// The certificate list as sent in the Certificate handshake message.
    pub fn certificate_list(&self) -> Vec<Vec<u8>> {
        let mut list = Vec::with_capacity(1 + self.chain.len());
        list.push(self.certificate.clone());
        list.extend(self.chain.iter().cloned());
        list
    }

    /// Returns the SHA-256 fingerprint of the leaf certificate.
    pub fn fingerprint(&self) -> Vec<u8> {
        calculate_fingerprint(&self.certificate)
    }

    /// Returns the leaf fingerprint as uppercase hex pairs separated by colons.
    pub fn fingerprint_str(&self) -> String {
        format_fingerprint(&self.fingerprint())
    }
}

/// Generate a self-signed RSA-2048 certificate for DTLS.
pub fn generate_self_signed_certificate() -> Result<DtlsCertificate, CertificateError> {
    generate_with_rng(&mut SeededRng::new(None), "CN=DTLS Peer")
}

fn generate_with_rng(
    rng: &mut SeededRng,
    subject: &str,
) -> Result<DtlsCertificate, CertificateError> {
    let key = RsaPrivateKey::new(rng, 2048).map_err(|_| CertificateError::GenerationFailed)?;

    let public_der = key
        .to_public_key()
        .to_public_key_der()
        .map_err(|_| CertificateError::GenerationFailed)?;
    let spki = SubjectPublicKeyInfoOwned::from_der(public_der.as_bytes())
        .map_err(|_| CertificateError::GenerationFailed)?;

    // Positive serial, high bit cleared.
    let mut serial = [0u8; 16];
    rng.fill(&mut serial);
    serial[0] &= 0x7f;
    let serial = SerialNumber::new(&serial).map_err(|_| CertificateError::GenerationFailed)?;

    let validity = Validity::from_now(Duration::from_secs(365 * 24 * 3600))
        .map_err(|_| CertificateError::GenerationFailed)?;
    let subject = Name::from_str(subject).map_err(|_| CertificateError::GenerationFailed)?;

    let signer = SigningKey::<Sha256>::new(key.clone());
    let builder = CertificateBuilder::new(Profile::Root, serial, validity, subject, spki, &signer)
        .map_err(|_| CertificateError::GenerationFailed)?;
    let cert = builder
        .build::<Signature>()
        .map_err(|_| CertificateError::GenerationFailed)?;

    let certificate = cert
        .to_der()
        .map_err(|_| CertificateError::GenerationFailed)?;
    let private_key = key
        .to_pkcs8_der()
        .map_err(|_| CertificateError::GenerationFailed)?
        .as_bytes()
        .to_vec();

    Ok(DtlsCertificate::new(certificate, private_key))
}

/// Calculate a certificate fingerprint using SHA-256
pub fn calculate_fingerprint(cert_der: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    hasher.finalize().to_vec()
}

/// Format a fingerprint as a colon-separated hex string
/// Example: "AF:12:F6:..."
pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}

impl fmt::Debug for DtlsCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DtlsCertificate")
            .field("certificate", &self.certificate.len())
            .field("chain", &self.chain.len())
            .field("private_key", &self.private_key.len())
            .finish()
    }
}

/// One generated certificate shared by all unit tests, since RSA key
/// generation is slow.
#[cfg(test)]
pub(crate) static TEST_CERTIFICATE: once_cell::sync::Lazy<DtlsCertificate> =
    once_cell::sync::Lazy::new(|| generate_self_signed_certificate().expect("generate cert"));
