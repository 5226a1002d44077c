//! The engine's single public error type (§7).

use pesit_types::DiagnosticCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PesitError {
    #[error("frame codec error: {0}")]
    Codec(#[from] pesit_msg::ParseError),

    #[error("transport error: {0}")]
    Transport(#[from] pesit_transport::TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol violation in state {state:?}: FPDU type {fpdu_type:?} is not admitted")]
    UnexpectedFpdu { state: crate::state::ServerState, fpdu_type: pesit_msg::FpduType },

    #[error("negotiation rejected: {diagnostic}")]
    NegotiationRejected { diagnostic: DiagnosticCode },

    #[error("file selection failed: {diagnostic}")]
    SelectionFailed { diagnostic: DiagnosticCode },

    #[error("data-plane violation: {diagnostic}")]
    DataPlaneViolation { diagnostic: DiagnosticCode },

    #[error("storage error: {diagnostic}")]
    Storage { diagnostic: DiagnosticCode, #[source] source: std::io::Error },

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("peer aborted with diagnostic {0}")]
    PeerAbort(DiagnosticCode),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("session was cancelled")]
    Cancelled,
}

impl PesitError {
    /// The diagnostic this error should be reported to the wire as, if any
    /// (internal-only errors such as `Config` have none, per §7).
    pub fn diagnostic(&self) -> Option<DiagnosticCode> {
        match self {
            PesitError::NegotiationRejected { diagnostic }
            | PesitError::SelectionFailed { diagnostic }
            | PesitError::DataPlaneViolation { diagnostic }
            | PesitError::Storage { diagnostic, .. } => Some(*diagnostic),
            PesitError::PeerAbort(d) => Some(*d),
            PesitError::UnexpectedFpdu { .. } | PesitError::Codec(_) | PesitError::Timeout(_) => {
                Some(DiagnosticCode::PROTOCOL_ERROR)
            }
            _ => None,
        }
    }
}
