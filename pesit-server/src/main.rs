//! `pesit-server`: the accept-loop binary wiring [`pesit::Dispatcher`] to
//! real adapters (local filesystem storage, an in-memory transfer tracker,
//! an always-leader signal) and to the process's config file, environment,
//! and shutdown signal.
//!
//! Parses flags, initializes logging, then runs the async accept loop.

mod registry_file;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use pesit::{AlwaysLeader, Dispatcher, DispatcherConfig, InMemoryTransferTracker, LocalFilesystemStorage, PesitError, ServerConfig};
use pesit_transport::{SecurityMode, TlsConfig, TransportConfig};

/// Run a PeSIT Hors-SIT server.
#[derive(Debug, Parser)]
#[command(name = "pesit-server", version, about)]
struct Cli {
    /// Path to the server's TOML configuration file.
    #[arg(long, short = 'c', default_value = "pesit-server.toml")]
    config: PathBuf,

    /// Path to an optional TOML registry of partners and virtual files.
    #[arg(long)]
    registry: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        log::error!("pesit-server exiting: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), PesitError> {
    let server_cfg = ServerConfig::load(Some(&cli.config))?;
    let registry = registry_file::load(cli.registry.as_deref())?;

    let addr: SocketAddr = format!("{}:{}", server_cfg.bind, server_cfg.port)
        .parse()
        .map_err(|e| PesitError::Config(format!("invalid bind/port: {e}")))?;

    let transport_cfg = transport_config(&server_cfg)?;
    let dispatcher_cfg = DispatcherConfig::from_server_config(&server_cfg);

    let dispatcher = Arc::new(Dispatcher::new(
        dispatcher_cfg,
        registry,
        Arc::new(LocalFilesystemStorage),
        Arc::new(InMemoryTransferTracker::new()),
        Arc::new(AlwaysLeader),
    ));

    let shutdown = CancellationToken::new();
    let shutdown_for_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("received interrupt, shutting down");
        shutdown_for_signal.cancel();
    })
    .map_err(|e| PesitError::Config(format!("installing signal handler: {e}")))?;

    let runtime = tokio::runtime::Runtime::new().map_err(PesitError::Io)?;
    runtime.block_on(dispatcher.serve(addr, transport_cfg, shutdown))
}

/// Builds the transport's security mode from the server's TLS settings
/// (§6). `keystore`/`truststore` are plain PEM files here, not Java
/// keystores; password fields are accepted but unused since PeSIT-TLS
/// deployments here use unencrypted PEM keys.
fn transport_config(cfg: &ServerConfig) -> Result<TransportConfig, PesitError> {
    let security = if cfg.tls.enabled {
        let cert_path = cfg.tls.keystore.clone().ok_or_else(|| PesitError::Config("tls.enabled but no keystore given".into()))?;
        let client_ca_path = cfg.tls.truststore.clone();
        SecurityMode::Tls(TlsConfig {
            cert_path: cert_path.clone(),
            key_path: cert_path,
            client_ca_path,
            require_client_auth: cfg.tls.require_client_auth,
        })
    } else {
        SecurityMode::Plain
    };

    Ok(TransportConfig { security, read_timeout: Some(cfg.read_timeout()), ..TransportConfig::default() })
}
