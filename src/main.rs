//! voicebeacon daemon
//!
//! Reads configuration from the environment, starts the uptime endpoint
//! and the gateway client, and runs until an external termination signal.

use std::process::ExitCode;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voicebeacon::config::Config;
use voicebeacon::constants::SHUTDOWN_GRACE_MS;
use voicebeacon::{discord, uptime};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    // Config decides the default log level, so it is read before the
    // subscriber goes up and reported just after.
    let config = Config::from_env();

    let default_filter = match &config {
        Ok(config) => config.default_log_filter(),
        Err(_) => "info",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::from(1);
        }
    };

    // Last line of defense: nothing in the playback or reconnection paths
    // is supposed to panic, but if something does it must reach the log.
    std::panic::set_hook(Box::new(|info| {
        tracing::error!("Unhandled panic: {}", info);
    }));

    tracing::info!(
        "Starting voicebeacon for channel {} with source {}",
        config.channel_id,
        config.audio_path.display()
    );

    let port = config.http_port;
    tokio::spawn(async move {
        if let Err(e) = uptime::serve(port).await {
            tracing::error!("Uptime endpoint failed: {}", e);
        }
    });

    tokio::select! {
        result = discord::bot::run(config) => match result {
            Ok(()) => {
                tracing::info!("Gateway client exited");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!("{:#}", e);
                ExitCode::from(1)
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received; shutting down");
            tokio::time::sleep(Duration::from_millis(SHUTDOWN_GRACE_MS)).await;
            ExitCode::SUCCESS
        }
    }
}
