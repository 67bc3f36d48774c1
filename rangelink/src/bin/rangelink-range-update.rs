//! Force one range extension per counter.
//!
//! Advances the global `nextRange` pointer of the serial counter and then of
//! the request counter, taking ownership of the claimed ranges. Operators run
//! it to pre-provision capacity before adding cluster members.
//!
//! ```bash
//! rangelink-range-update -c /etc/rangelink/cluster.json -f /etc/rangelink/store.pwd
//! ```
//!
//! Exits non-zero if the store cannot be reached, the credential is missing
//! or rejected, or either extension fails.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use rangelink::{
    ClusterConfig, REQUEST_COUNTER, SERIAL_COUNTER, TokioTimeProvider, TracingAuditSink,
};
use secrecy::SecretString;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "rangelink-range-update")]
#[command(about = "Advance the serial and request number ranges by one extension", long_about = None)]
struct Args {
    /// Cluster configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// File holding the range store credential
    #[arg(short = 'f', long)]
    credential_file: Option<PathBuf>,

    /// Log every step
    #[arg(short, long)]
    verbose: bool,
}

fn read_credential(path: &Path) -> Result<SecretString, std::io::Error> {
    let text = std::fs::read_to_string(path)?;
    let secret = text.trim_end_matches(['\r', '\n']);
    if secret.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("credential file {} is empty", path.display()),
        ));
    }
    Ok(SecretString::from(secret.to_string()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "range update failed");
        return Err(e);
    }
    Ok(())
}

async fn run(args: Args) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = ClusterConfig::load(&args.config)?;
    let credential = args
        .credential_file
        .as_ref()
        .map(|path| read_credential(path.as_path()))
        .transpose()?;

    let repository = config.open_repository(credential.as_ref())?;

    let allocator = config.allocator(
        repository,
        TokioTimeProvider::new(),
        Arc::new(TracingAuditSink),
    )?;

    tracing::info!("Updating serial number range");
    let serial = allocator.force_extend(SERIAL_COUNTER).await?;
    tracing::info!(start = %serial.start, end = %serial.end, "serial number range claimed");

    tracing::info!("Updating request number range");
    let request = allocator.force_extend(REQUEST_COUNTER).await?;
    tracing::info!(start = %request.start, end = %request.end, "request number range claimed");

    Ok(())
}
