//! Sans-IO DTLS 1.0/1.2 with TLS_RSA_WITH_AES_128_CBC_SHA.
//!
//! The crate does no networking and reads no clock. Feed datagrams into
//! `handle_packet`, drive timers with `handle_timeout`, and drain
//! [`Output`] with `poll_output` until it returns [`Output::Timeout`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//! use dtls_cbc::{Client, Config, Output};
//!
//! let config = Arc::new(Config::default());
//! let mut client = Client::new(config, Instant::now());
//! client.connect().unwrap();
//!
//! let mut buf = vec![0u8; 2048];
//! loop {
//!     match client.poll_output(&mut buf) {
//!         Output::Packet(_datagram) => { /* send to the server */ }
//!         Output::Timeout(_at) => break, // call handle_timeout at this instant
//!         _ => {}
//!     }
//! }
//! ```
//!
//! Servers accept many clients through a [`Listener`], which keeps one
//! [`Server`] per client address.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
// #![deny(missing_docs)]

#[macro_use]
extern crate log;

use std::time::Instant;

mod buffer;
pub mod certificate;
mod config;
mod crypto;
mod engine;
mod error;
mod listener;
mod message;
mod reassembler;
mod record_layer;
mod rng;
mod security;
mod sequence;
mod time_tricks;
mod timer;
mod util;

mod client;
pub use client::Client;

mod server;
pub use server::Server;

pub use config::{Config, ConfigBuilder};
pub use crypto::KeyContext;
pub use error::Error;
pub use listener::{Listener, ListenerOutput};
pub use message::{CipherSuite, ProtocolVersion};
pub use rng::SeededRng;

/// Output from [`Client::poll_output`] and [`Server::poll_output`].
#[derive(Debug)]
pub enum Output<'a> {
    /// A datagram to send to the peer.
    Packet(&'a [u8]),

    /// Nothing more to do until this instant, or until another datagram arrives.
    Timeout(Instant),

    /// The handshake completed.
    Connected,

    /// Leaf certificate (DER) presented by the server. Client only.
    PeerCert(&'a [u8]),

    /// Decrypted application data.
    ApplicationData(&'a [u8]),
}
