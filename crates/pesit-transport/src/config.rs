//! Transport configuration (§4.2, §6 security profile).

use std::path::PathBuf;
use std::time::Duration;

/// Maximum accepted inner frame size, guarding against a peer advertising an
/// unreasonable outer length and exhausting memory before the codec ever
/// sees the frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub security: SecurityMode,
    pub max_frame_len: usize,
    pub read_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { security: SecurityMode::Plain, max_frame_len: DEFAULT_MAX_FRAME_LEN, read_timeout: None }
    }
}

#[derive(Debug, Clone)]
pub enum SecurityMode {
    Plain,
    Tls(TlsConfig),
}

/// PEM-encoded material for a PeSIT-TLS session (§6).
///
/// `client_ca_path` is set on the server side to require and verify a client
/// certificate (mutual TLS); on the client side it names the CA that signs
/// the server's certificate.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub client_ca_path: Option<PathBuf>,
    pub require_client_auth: bool,
}
