#![doc = "PeSIT Hors-SIT protocol engine: negotiation, file-selection lifecycle,\ndata-transfer, server FSM dispatch, the client driver, and the transfer\ntracker. See `pesit-msg` for the wire codec and `pesit-transport` for the\nframed TCP/TLS session layer this crate drives."]
#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fsm;
pub mod leader;
pub mod lifecycle;
pub mod message;
pub mod negotiation;
pub mod registry;
pub mod secrets;
pub mod session;
pub mod state;
pub mod storage;
pub mod tracker;
pub mod transfer;
pub mod transfer_engine;
pub mod validators;

pub use config::{ClientConfig, ServerConfig, TlsSettings};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::PesitError;
pub use fsm::{on_fpdu, Action, Transition};
pub use leader::{AlwaysLeader, LeaderSignal};
pub use registry::{PartnerEntry, Registry, VirtualFileEntry};
pub use secrets::{PlaintextSecretsOracle, SecretsOracle};
pub use session::{AccessType, SessionContext};
pub use state::ServerState;
pub use storage::{LocalFilesystemStorage, StorageConnector};
pub use tracker::{InMemoryTransferTracker, TransferTracker};
pub use transfer::{TransferContext, TransferRecord, TransferStatus};

/// The engine's `Result` alias.
pub type Result<T> = std::result::Result<T, PesitError>;
