mod common;
mod data;
mod fragmentation;
mod handshake;
mod listener;
mod retransmit;
