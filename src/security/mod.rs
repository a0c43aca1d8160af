//! Per-epoch cryptographic state.
//!
//! Every epoch has its own [`SecurityParameters`]: negotiated version and suite,
//! randoms, master secret, the derived key block, the handshake transcript and the
//! send sequence counter. The [`SecurityParameterContainer`] owns them all and moves
//! a pending epoch to current on ChangeCipherSpec.

mod container;

pub use container::SecurityParameterContainer;

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::buffer::Buf;
use crate::crypto::cipher::{self, MacHeader};
use crate::crypto::{prf, SuiteParams, TranscriptHash, MASTER_SECRET_LEN, VERIFY_DATA_LEN};
use crate::message::{ProtocolVersion, Random};
use crate::sequence::SequenceNumber;
use crate::{Error, SeededRng};

/// Which end of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Label of the Finished verify data written by `role`.
pub fn finished_label(role: Role) -> &'static str {
    match role {
        Role::Client => "client finished",
        Role::Server => "server finished",
    }
}

struct KeyBlock {
    client_write_mac_key: Zeroizing<Vec<u8>>,
    server_write_mac_key: Zeroizing<Vec<u8>>,
    client_write_key: Zeroizing<Vec<u8>>,
    server_write_key: Zeroizing<Vec<u8>>,
    client_write_iv: Zeroizing<Vec<u8>>,
    server_write_iv: Zeroizing<Vec<u8>>,
}

pub struct SecurityParameters {
    epoch: u16,
    role: Role,
    /// `None` only for epoch 0 before the first hello fixes it.
    version: Option<ProtocolVersion>,
    suite: Option<SuiteParams>,
    master_secret: Option<Zeroizing<Vec<u8>>>,
    client_random: Option<Random>,
    server_random: Option<Random>,
    keys: Option<KeyBlock>,
    handshake_digest: Vec<Buf>,
    send_sequence: SequenceNumber,
}

impl SecurityParameters {
    pub fn new(epoch: u16, role: Role, version: Option<ProtocolVersion>) -> Self {
        SecurityParameters {
            epoch,
            role,
            version,
            suite: None,
            master_secret: None,
            client_random: None,
            server_random: None,
            keys: None,
            handshake_digest: Vec::new(),
            send_sequence: SequenceNumber::new(),
        }
    }

    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = Some(version);
    }

    /// Set the version if it was never set. Returns whether it was set now.
    pub fn finalize_version(&mut self, version: ProtocolVersion) -> bool {
        if self.version.is_some() {
            return false;
        }
        debug!("Epoch {} version fixed to {:?}", self.epoch, version);
        self.version = Some(version);
        true
    }

    fn prf_version(&self) -> Result<ProtocolVersion, Error> {
        self.version
            .ok_or_else(|| Error::CryptoError(format!("epoch {} has no version", self.epoch)))
    }

    pub fn suite(&self) -> Option<&SuiteParams> {
        self.suite.as_ref()
    }

    /// Copy sizes and algorithms from the negotiated suite.
    pub fn set_from(&mut self, suite: SuiteParams) {
        self.suite = Some(suite);
    }

    pub fn client_random(&self) -> Option<&Random> {
        self.client_random.as_ref()
    }

    pub fn set_client_random(&mut self, random: Random) {
        self.client_random = Some(random);
    }

    pub fn server_random(&self) -> Option<&Random> {
        self.server_random.as_ref()
    }

    pub fn set_server_random(&mut self, random: Random) {
        self.server_random = Some(random);
    }

    fn randoms(&self) -> Result<([u8; 32], [u8; 32]), Error> {
        match (&self.client_random, &self.server_random) {
            (Some(c), Some(s)) => Ok((c.to_bytes(), s.to_bytes())),
            _ => Err(Error::CryptoError("randoms not negotiated".into())),
        }
    }

    pub fn has_master_secret(&self) -> bool {
        self.master_secret.is_some()
    }

    /// master = PRF(pre_master, "master secret", client_random ‖ server_random)
    pub fn calculate_master_key(&mut self, pre_master: &[u8]) -> Result<(), Error> {
        let (client_random, server_random) = self.randoms()?;

        let mut seed = [0u8; 64];
        seed[..32].copy_from_slice(&client_random);
        seed[32..].copy_from_slice(&server_random);

        let master = prf(
            self.prf_version()?,
            pre_master,
            "master secret",
            &seed,
            MASTER_SECRET_LEN,
        )?;
        self.master_secret = Some(master);

        Ok(())
    }

    /// Expand the master secret into MAC keys, write keys and IVs for both
    /// directions.
    pub fn derive_keys(&mut self) -> Result<(), Error> {
        let suite = self
            .suite
            .ok_or_else(|| Error::CryptoError("no cipher suite".into()))?;
        let master = self
            .master_secret
            .as_ref()
            .ok_or_else(|| Error::CryptoError("no master secret".into()))?;
        let (client_random, server_random) = self.randoms()?;

        let mut seed = [0u8; 64];
        seed[..32].copy_from_slice(&server_random);
        seed[32..].copy_from_slice(&client_random);

        let block = prf(
            self.prf_version()?,
            master,
            "key expansion",
            &seed,
            suite.key_block_len(),
        )?;

        let mut at = 0;
        let mut take = |n: usize| {
            let v = Zeroizing::new(block[at..at + n].to_vec());
            at += n;
            v
        };

        self.keys = Some(KeyBlock {
            client_write_mac_key: take(suite.mac_key_len),
            server_write_mac_key: take(suite.mac_key_len),
            client_write_key: take(suite.enc_key_len),
            server_write_key: take(suite.enc_key_len),
            client_write_iv: take(suite.fixed_iv_len),
            server_write_iv: take(suite.fixed_iv_len),
        });

        trace!("Derived keys for epoch {}", self.epoch);

        Ok(())
    }

    /// Whether records of this epoch are protected.
    pub fn has_keys(&self) -> bool {
        self.keys.is_some()
    }

    /// Append one complete handshake message (header and body) to the transcript.
    pub fn digest_handshake(&mut self, message: &[u8]) {
        self.handshake_digest.push(Buf::from_slice(message));
    }

    /// Hash of all handshake messages digested so far.
    pub fn transcript_digest(&self) -> Result<Vec<u8>, Error> {
        let mut hash = TranscriptHash::new(self.prf_version()?)?;
        for message in &self.handshake_digest {
            hash.update(message);
        }
        Ok(hash.finalize())
    }

    /// PRF(master, label, transcript digest, 12)
    pub fn verify_data(&self, label: &str) -> Result<Zeroizing<Vec<u8>>, Error> {
        let master = self
            .master_secret
            .as_ref()
            .ok_or_else(|| Error::CryptoError("no master secret".into()))?;
        let digest = self.transcript_digest()?;
        prf(
            self.prf_version()?,
            master,
            label,
            &digest,
            VERIFY_DATA_LEN,
        )
    }

    /// Check a peer's Finished against the current transcript.
    pub fn verify_peer_finished(&self, verify_data: &[u8]) -> Result<bool, Error> {
        let peer = match self.role {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        };
        let expected = self.verify_data(finished_label(peer))?;
        Ok(bool::from(expected.ct_eq(verify_data)))
    }

    pub fn send_sequence(&mut self) -> &mut SequenceNumber {
        &mut self.send_sequence
    }

    fn keys(&self) -> Result<&KeyBlock, Error> {
        self.keys
            .as_ref()
            .ok_or_else(|| Error::CryptoError(format!("epoch {} has no keys", self.epoch)))
    }

    /// Protect an outgoing record with our own write keys.
    pub fn encrypt(
        &self,
        header: &MacHeader,
        plaintext: &[u8],
        rng: &mut SeededRng,
        out: &mut Buf,
    ) -> Result<(), Error> {
        let keys = self.keys()?;
        let (key, mac_key) = match self.role {
            Role::Client => (&keys.client_write_key, &keys.client_write_mac_key),
            Role::Server => (&keys.server_write_key, &keys.server_write_mac_key),
        };
        cipher::seal(key, mac_key, header, plaintext, rng, out)
    }

    /// Open an incoming record with the peer's write keys.
    pub fn decrypt(&self, header: &MacHeader, fragment: &[u8]) -> Result<Vec<u8>, Error> {
        let keys = self.keys()?;
        let (key, mac_key) = match self.role {
            Role::Client => (&keys.server_write_key, &keys.server_write_mac_key),
            Role::Server => (&keys.client_write_key, &keys.client_write_mac_key),
        };
        cipher::open(key, mac_key, header, fragment)
    }

    /// The fixed IVs are derived for completeness. CBC records carry an explicit IV.
    #[cfg(test)]
    fn write_ivs(&self) -> Option<(&[u8], &[u8])> {
        self.keys
            .as_ref()
            .map(|k| (&k.client_write_iv[..], &k.server_write_iv[..]))
    }
}

impl std::fmt::Debug for SecurityParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityParameters")
            .field("epoch", &self.epoch)
            .field("role", &self.role)
            .field("version", &self.version)
            .field("has_master_secret", &self.master_secret.is_some())
            .field("has_keys", &self.keys.is_some())
            .field("digested", &self.handshake_digest.len())
            .finish()
    }
}
