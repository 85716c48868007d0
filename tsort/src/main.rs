use std::error::Error;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod checkpoint;
mod cmdline;
mod error;
mod output;
mod pipeline;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let matches = cmdline::root_cli().get_matches();
    let settings = cmdline::Settings::try_from(&matches)?;

    let cln_token = CancellationToken::new();
    let shutdown_token = cln_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, stopping after the current record");
            shutdown_token.cancel();
        }
    });

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let summary = pipeline::run(settings, stdin, cln_token).await?;
    info!(
        read = summary.read,
        written = summary.written,
        stats = ?summary.stats,
        hwm = ?summary.hwm,
        "Classification finished"
    );

    Ok(())
}
