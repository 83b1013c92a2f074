use std::sync::Arc;

use anyhow::Result;
use args::{CliArgs, Command, HostConfig};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::frame_loop::FrameLoop;

mod args;
mod client;
mod commands;
mod frame_loop;
mod keygen;
mod shutdown;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::ERROR.into())
        .with_default_directive("alloy_transport_ws=off".parse()?)
        .from_env_lossy()
        .add_directive("alloy=warn".parse()?)
        .add_directive("alloy_pubsub=error".parse()?)
        .add_directive("tilechain_client=info".parse()?)
        .add_directive("tilechain_host=info".parse()?);

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(true))
        .with(filter)
        .init();

    let cli_args = CliArgs::parse();

    if let Command::Keygen = cli_args.command {
        let keys = HostConfig::key_files(&cli_args)?;
        keygen::keygen(&keys)?;
        return Ok(());
    }

    let config = HostConfig::load(&cli_args)?;

    // Setup shutdown handler
    let shutdown_token = CancellationToken::new();
    let shutdown_token_clone = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown::shutdown_signal(shutdown_token_clone).await;
    });

    let client = Arc::new(client::create_client(&config)?);
    client::connect_with_retry(&client, &shutdown_token).await?;

    let result = match cli_args.command {
        Command::Play(play_args) => {
            let frame_loop = FrameLoop::new(client.clone(), play_args, shutdown_token.clone());
            frame_loop.run().await.map(|_| ())
        }
        Command::Inspect => commands::inspect(&client).await.map(|json| println!("{json}")),
        Command::Quickstart => commands::quickstart(&client, &shutdown_token)
            .await
            .map(|_| ()),
        Command::Keygen => Ok(()),
    };

    client.disconnect().await;
    shutdown_token.cancel();
    info!("Shutdown complete");
    result
}
