use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// PeSIT Hors-SIT client driver: sends or receives a single file against a
/// remote PeSIT server.
#[derive(Parser)]
#[command(name = "pesit-cli", version, about, long_about = None)]
pub struct Cli {
    /// Server address, e.g. `mainframe.example.com:1763`.
    #[arg(long)]
    pub addr: String,

    /// This side's partner identity (PI_03 requester name).
    #[arg(long)]
    pub requester: String,

    /// The remote server's identity (PI_04 server name).
    #[arg(long)]
    pub server_name: String,

    /// Password for the partner, if the remote requires one (PI_05).
    #[arg(long)]
    pub password: Option<String>,

    /// Read/connect timeout in milliseconds.
    #[arg(long, default_value_t = 60_000)]
    pub timeout_ms: u64,

    /// Number of times to retry an interrupted receive before giving up.
    #[arg(long, default_value_t = 3)]
    pub retry_count: u32,

    /// Delay between retries, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub retry_delay_ms: u64,

    /// Protocol version to offer during negotiation.
    #[arg(long, default_value_t = 2)]
    pub protocol_version: u8,

    /// Enables TLS and trusts the given PEM CA/server certificate.
    #[arg(long)]
    pub tls_ca: Option<PathBuf>,

    /// Client certificate, for mutual TLS (requires `--tls-key`).
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,
    /// Client private key, for mutual TLS (requires `--tls-cert`).
    #[arg(long)]
    pub tls_key: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sends a local file to the remote as the given virtual file.
    Send(SendCmd),
    /// Receives the given virtual file from the remote into a local path.
    Receive(ReceiveCmd),
}

#[derive(Parser)]
pub struct SendCmd {
    /// Virtual filename the remote registers this transfer under (PI_12).
    pub virtual_name: String,
    /// Local file to send.
    pub local_path: PathBuf,
    /// Fixed record length, in bytes (PI_32).
    #[arg(long, default_value_t = 512)]
    pub record_length: u32,
    /// Maximum entity size to offer, in bytes (PI_25); may be renegotiated
    /// downward by the server.
    #[arg(long, default_value_t = 8192)]
    pub max_entity_size: u32,
}

#[derive(Parser)]
pub struct ReceiveCmd {
    /// Virtual filename to request from the remote (PI_12).
    pub virtual_name: String,
    /// Local path to write the received file to.
    pub local_path: PathBuf,
}
