use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chorus_common::ChorusError;
use chorus_server::connection::handle_connection;
use chorus_server::Hub;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

#[derive(Parser)]
#[command(name = "chorus-server", about = "Presence and voice-room signaling server")]
struct Args {
    /// Path to config.toml. Defaults to the platform config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket address to listen on, overriding `server.bind`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Log filter directive, overriding `logging.level`.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), ChorusError> {
    let args = Args::parse();
    let config = chorus_config::load_config(args.config.as_deref())?;

    let directive = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| directive.into()),
        )
        .init();

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let hello_timeout = Duration::from_secs(u64::from(config.server.hello_timeout_secs));
    let hub = Arc::new(Hub::from_config(&config.server));

    let listener = TcpListener::bind(&bind).await?;
    tracing::info!("chorus-server listening on {}", bind);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let hub = Arc::clone(&hub);
                    tokio::spawn(async move {
                        match accept_async(stream).await {
                            Ok(ws) => handle_connection(ws, addr, hub, hello_timeout).await,
                            Err(e) => {
                                tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            },

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                hub.shutdown().await;
                // Give connection tasks a moment to flush their close frames.
                tokio::time::sleep(Duration::from_millis(250)).await;
                return Ok(());
            }
        }
    }
}
