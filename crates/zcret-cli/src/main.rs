//! `zcret` binary: connects the shell to stdin/stdout and the network.

use std::process::ExitCode;

use clap::Parser;
use tokio::{io::BufReader, sync::watch};
use tracing_subscriber::EnvFilter;
use zcret_app::{Identity, Runtime, SystemEnv};
use zcret_cli::{Args, Shell, shell};
use zcret_client::NetworkTransport;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr so they do not interleave with chat output on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log_filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        },
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.session_config()?;
    let transport = NetworkTransport::new()?;

    let initial =
        if args.auto_connect { Identity::connected(&args.wallet) } else { Identity::disconnected() };
    let (identity, identity_rx) = watch::channel(initial);

    tracing::info!(endpoint = %config.connection.endpoint, "starting session");
    let (runtime, handle) = Runtime::new(SystemEnv, transport, config, identity_rx);
    let task = tokio::spawn(runtime.run());

    let shell = Shell::new(handle, identity, args.wallet, tokio::io::stdout());
    shell::run(shell, BufReader::new(tokio::io::stdin())).await?;

    task.await?;
    Ok(())
}
