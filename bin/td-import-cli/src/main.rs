//! Command-line importer for Treasure Data.
//!
//! Reads newline-delimited JSON samples and imports them, batch by batch, into a single table.

#![deny(missing_docs)]

use anyhow::{bail, Context as _};
use clap::Parser as _;
use td_import::{config::ConfigurationLoader, Client, TreasureDataConfiguration};
use tracing::{debug, dispatcher, error, info};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

mod cli;
use self::cli::Cli;

mod input;
use self::input::{open_input, SampleReader};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(true)
        .with_target(true)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => info!("td-import stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

fn load_configuration(cli: &Cli) -> anyhow::Result<TreasureDataConfiguration> {
    let mut loader = ConfigurationLoader::default();
    if let Some(path) = &cli.config {
        loader = loader.from_yaml(path)?;
    }

    let config = loader
        .from_environment("TD")?
        .with_overrides(cli.overrides())
        .into_typed()?;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!("td-import starting...");

    let config = load_configuration(&cli).context("Failed to load configuration.")?;
    let logger = dispatcher::get_default(|current| current.clone());
    let client = Client::bootstrap(config, Some(logger))
        .await
        .context("Failed to bootstrap Treasure Data client.")?;

    info!(
        client = client.name(),
        database = client.database(),
        table = client.table(),
        "Destination verified. Importing samples..."
    );

    let batch_size = usize::try_from(cli.batch_size).context("Batch size is too large.")?;
    let mut reader = SampleReader::new(open_input(&cli.input).await?);
    let mut imported = 0;
    let mut failed_batches = 0;

    loop {
        let batch = reader.next_batch(batch_size).await?;
        if batch.is_empty() {
            break;
        }

        match client.write(&batch).await {
            Ok(result) => {
                imported += batch.len();
                debug!(
                    unique_id = %result.unique_id,
                    md5_hex = %result.md5_hex,
                    elapsed_time = result.elapsed_time,
                    "Batch imported."
                );
            }
            Err(e) => {
                failed_batches += 1;
                error!(
                    error = %e,
                    retryable = e.is_retryable(),
                    num_samples = batch.len(),
                    "Failed to import batch."
                );
            }
        }
    }

    info!(imported, failed_batches, "Finished importing samples.");

    if failed_batches > 0 {
        bail!("{} batch(es) failed to import.", failed_batches);
    }

    Ok(())
}
