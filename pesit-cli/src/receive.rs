use indicatif::{ProgressBar, ProgressStyle};

use pesit::{ClientConfig, LocalFilesystemStorage, PesitError, TransferTracker};
use pesit_transport::TransportConfig;

use crate::cli::{Cli, ReceiveCmd};

pub async fn run(cli: &Cli, transport_cfg: &TransportConfig, client_cfg: &ClientConfig, cmd: &ReceiveCmd, tracker: &dyn TransferTracker) -> Result<(), PesitError> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {elapsed_precise} receiving {msg}").unwrap());
    spinner.set_message(cmd.virtual_name.clone());
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let storage = LocalFilesystemStorage;
    let outcome = pesit::client::receive_file(
        &cli.addr,
        transport_cfg,
        client_cfg,
        &cli.requester,
        &cli.server_name,
        cli.password.as_deref(),
        &cmd.virtual_name,
        &cmd.local_path,
        &storage,
        tracker,
    )
    .await;

    match outcome {
        Ok(outcome) => {
            spinner.finish_with_message(format!(
                "{}: received {} bytes ({} records)",
                cmd.virtual_name, outcome.bytes_transferred, outcome.records_transferred
            ));
            Ok(())
        }
        Err(e) => {
            spinner.abandon_with_message(format!("{}: receive failed", cmd.virtual_name));
            Err(e)
        }
    }
}
