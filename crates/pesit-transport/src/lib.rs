//! Session transport (§4.2): TCP/TLS framing of PeSIT inner frames, plus the
//! EBCDIC pre-connection handshake some mainframe partners require before
//! the CONNECT FPDU.
//!
//! This crate has no knowledge of FPDU contents; `pesit-msg::codec` parses
//! what `read_frame` hands back.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
mod handshake;
mod stream;
mod tcp;
mod tls;

pub use config::{SecurityMode, TlsConfig, TransportConfig, DEFAULT_MAX_FRAME_LEN};
pub use error::TransportError;
pub use tcp::{accept, connect, FramedTransport, TlsInfo};
