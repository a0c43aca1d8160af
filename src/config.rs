use std::time::Duration;

use crate::message::ProtocolVersion;
use crate::Error;

/// DTLS configuration
#[derive(Debug, Clone)]
pub struct Config {
    mtu: usize,
    max_fragment_len: usize,
    max_queue_tx: usize,
    max_reassembly: usize,
    protocol_version: ProtocolVersion,
    flight_start_rto: Duration,
    flight_backoff: bool,
    flight_retries: Option<usize>,
    handshake_timeout: Option<Duration>,
    session_idle_timeout: Duration,
    rng_seed: Option<u64>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            mtu: 1000,
            max_fragment_len: 1000,
            max_queue_tx: 30,
            max_reassembly: 16,
            protocol_version: ProtocolVersion::DTLS1_2,
            flight_start_rto: Duration::from_secs(1),
            flight_backoff: false,
            flight_retries: None,
            handshake_timeout: None,
            session_idle_timeout: Duration::from_secs(30),
            rng_seed: None,
        }
    }

    /// Max transmission unit.
    ///
    /// Records are packed into datagrams no larger than this, unless a single
    /// record is bigger on its own.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Largest handshake fragment body we produce.
    #[inline(always)]
    pub fn max_fragment_len(&self) -> usize {
        self.max_fragment_len
    }

    /// Max amount of outgoing datagrams to buffer.
    #[inline(always)]
    pub fn max_queue_tx(&self) -> usize {
        self.max_queue_tx
    }

    /// Max number of incomplete handshake messages held for reassembly.
    #[inline(always)]
    pub fn max_reassembly(&self) -> usize {
        self.max_reassembly
    }

    /// Protocol version offered by a client.
    ///
    /// Servers always answer with the version of the ClientHello.
    #[inline(always)]
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    /// Time of first retry.
    ///
    /// Every flight restarts with this value.
    #[inline(always)]
    pub fn flight_start_rto(&self) -> Duration {
        self.flight_start_rto
    }

    /// Whether the retry interval doubles for every resend, with a ±0.25s jitter.
    #[inline(always)]
    pub fn flight_backoff(&self) -> bool {
        self.flight_backoff
    }

    /// Max number of resends per flight. `None` resends forever.
    #[inline(always)]
    pub fn flight_retries(&self) -> Option<usize> {
        self.flight_retries
    }

    /// Timeout for the entire handshake. `None` means no deadline.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout
    }

    /// How long a [`Listener`][crate::Listener] keeps a session that has not
    /// completed its handshake without hearing from the client.
    #[inline(always)]
    pub fn session_idle_timeout(&self) -> Duration {
        self.session_idle_timeout
    }

    /// Seed for the random number generator.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }
}

/// Builder for DTLS configuration.
pub struct ConfigBuilder {
    mtu: usize,
    max_fragment_len: usize,
    max_queue_tx: usize,
    max_reassembly: usize,
    protocol_version: ProtocolVersion,
    flight_start_rto: Duration,
    flight_backoff: bool,
    flight_retries: Option<usize>,
    handshake_timeout: Option<Duration>,
    session_idle_timeout: Duration,
    rng_seed: Option<u64>,
}

impl ConfigBuilder {
    /// Set the max transmission unit (MTU).
    ///
    /// Defaults to 1000.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the largest handshake fragment body.
    ///
    /// Defaults to 1000.
    pub fn max_fragment_len(mut self, len: usize) -> Self {
        self.max_fragment_len = len;
        self
    }

    /// Set the max amount of outgoing datagrams to buffer.
    ///
    /// Defaults to 30.
    pub fn max_queue_tx(mut self, max_queue_tx: usize) -> Self {
        self.max_queue_tx = max_queue_tx;
        self
    }

    /// Set the max number of incomplete handshake messages held for reassembly.
    ///
    /// Defaults to 16.
    pub fn max_reassembly(mut self, max: usize) -> Self {
        self.max_reassembly = max;
        self
    }

    /// Set the protocol version offered by a client.
    ///
    /// Defaults to DTLS 1.2.
    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    /// Set the time of first retry.
    ///
    /// Defaults to 1 second.
    pub fn flight_start_rto(mut self, rto: Duration) -> Self {
        self.flight_start_rto = rto;
        self
    }

    /// Set whether the retry interval doubles for every resend.
    ///
    /// Defaults to false, which resends at a fixed interval.
    pub fn flight_backoff(mut self, backoff: bool) -> Self {
        self.flight_backoff = backoff;
        self
    }

    /// Set the max number of resends per flight.
    ///
    /// Defaults to `None` (unbounded).
    pub fn flight_retries(mut self, retries: Option<usize>) -> Self {
        self.flight_retries = retries;
        self
    }

    /// Set the timeout for the entire handshake.
    ///
    /// Defaults to `None` (no deadline).
    pub fn handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set how long a listener keeps a handshaking session without traffic from
    /// the client. Connected sessions are kept until removed.
    ///
    /// Defaults to 30 seconds.
    pub fn session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    /// Set a seed for deterministic randomness.
    ///
    /// Defaults to `None`.
    pub fn rng_seed(mut self, seed: Option<u64>) -> Self {
        self.rng_seed = seed;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<Config, Error> {
        // Record header (13) + handshake header (12) must fit with some payload.
        if self.mtu < 64 {
            return Err(Error::ConfigError(format!("mtu too small: {}", self.mtu)));
        }
        if self.max_fragment_len == 0 || self.max_fragment_len > 16_384 {
            return Err(Error::ConfigError(format!(
                "max_fragment_len out of range: {}",
                self.max_fragment_len
            )));
        }
        if self.max_reassembly == 0 {
            return Err(Error::ConfigError("max_reassembly must be > 0".into()));
        }
        if self.max_queue_tx == 0 {
            return Err(Error::ConfigError("max_queue_tx must be > 0".into()));
        }
        if self.flight_start_rto.is_zero() {
            return Err(Error::ConfigError("flight_start_rto must be > 0".into()));
        }
        if !self.protocol_version.is_supported() {
            return Err(Error::UnsupportedVersion(self.protocol_version.as_u16()));
        }

        Ok(Config {
            mtu: self.mtu,
            max_fragment_len: self.max_fragment_len,
            max_queue_tx: self.max_queue_tx,
            max_reassembly: self.max_reassembly,
            protocol_version: self.protocol_version,
            flight_start_rto: self.flight_start_rto,
            flight_backoff: self.flight_backoff,
            flight_retries: self.flight_retries,
            handshake_timeout: self.handshake_timeout,
            session_idle_timeout: self.session_idle_timeout,
            rng_seed: self.rng_seed,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("default config is valid")
    }
}
