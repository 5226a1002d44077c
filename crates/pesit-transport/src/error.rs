//! Transport-level errors (§4.2): connection setup, framing and TLS failures
//! that are distinct from protocol-level diagnostics (`pesit_types::DiagnosticCode`).

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("peer closed the connection before completing the EBCDIC handshake")]
    HandshakeClosed,

    #[error("EBCDIC pre-connection handshake failed: {0}")]
    Handshake(String),

    #[error("frame of {len} bytes exceeds the {max} byte maximum")]
    FrameTooLarge { len: usize, max: usize },

    #[error("read timed out after {0:?}")]
    ReadTimeout(std::time::Duration),
}
