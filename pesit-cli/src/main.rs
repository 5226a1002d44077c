//! `pesit-cli`: a thin client driver front-end over [`pesit::client`].
//! A shared `Cli` of connection flags, with one module per subcommand.

mod cli;
mod receive;
mod send;

use clap::Parser;

use cli::{Cli, Commands};
use pesit::{ClientConfig, InMemoryTransferTracker, PesitError, TlsSettings};
use pesit_transport::{SecurityMode, TlsConfig, TransportConfig};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        eprintln!("pesit-cli: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), PesitError> {
    let client_cfg = ClientConfig {
        read_timeout_ms: cli.timeout_ms,
        retry_count: cli.retry_count,
        retry_delay_ms: cli.retry_delay_ms,
        protocol_version: cli.protocol_version,
        tls: TlsSettings::default(),
    };
    let transport_cfg = transport_config(&cli)?;
    let tracker = InMemoryTransferTracker::new();

    match &cli.command {
        Commands::Send(cmd) => send::run(&cli, &transport_cfg, &client_cfg, cmd, &tracker).await,
        Commands::Receive(cmd) => receive::run(&cli, &transport_cfg, &client_cfg, cmd, &tracker).await,
    }
}

/// Builds the transport's security mode from the connection's TLS flags.
/// Mutual TLS is unconditional on the client side here (`--tls-cert`/
/// `--tls-key` must accompany `--tls-ca`): the wire layer always presents a
/// client certificate, whether or not the remote chooses to verify it.
fn transport_config(cli: &Cli) -> Result<TransportConfig, PesitError> {
    let security = match &cli.tls_ca {
        None => SecurityMode::Plain,
        Some(ca_path) => {
            let cert_path = cli.tls_cert.clone().ok_or_else(|| PesitError::Config("--tls-ca given without --tls-cert".into()))?;
            let key_path = cli.tls_key.clone().ok_or_else(|| PesitError::Config("--tls-ca given without --tls-key".into()))?;
            SecurityMode::Tls(TlsConfig { cert_path, key_path, client_ca_path: Some(ca_path.clone()), require_client_auth: false })
        }
    };

    Ok(TransportConfig { security, read_timeout: Some(std::time::Duration::from_millis(cli.timeout_ms)), ..TransportConfig::default() })
}
