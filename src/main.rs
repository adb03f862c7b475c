use clap::Parser;
use frames::ErrorCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mucklet::config::{BotConfig, ConfigError, Overrides};
use mucklet::session::{BootError, EventKind, Session};
use mucklet::transport::{self, TransportError};
use mucklet::Client;

#[derive(Debug, thiserror::Error)]
enum BotError {
    #[error("{0} (or pass --token)")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Boot(#[from] BootError),
    #[error("signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
}

/// Flags override the matching `MUCKLET_*` environment variables.
#[derive(Parser, Debug)]
#[command(name = "mucklet-bot", about = "Connects a Mucklet bot and logs what it hears")]
struct Cli {
    #[arg(long)]
    token: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    origin: Option<String>,

    #[arg(long)]
    protocol: Option<String>,

    #[arg(long)]
    request_timeout_secs: Option<u64>,

    #[arg(long)]
    event_queue: Option<usize>,

    #[arg(long)]
    max_handlers: Option<usize>,
}

impl From<Cli> for Overrides {
    fn from(cli: Cli) -> Self {
        Self {
            token: cli.token,
            host: cli.host,
            origin: cli.origin,
            protocol: cli.protocol,
            request_timeout_secs: cli.request_timeout_secs,
            event_queue: cli.event_queue,
            max_concurrent_handlers: cli.max_handlers,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BotError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = BotConfig::load(Cli::parse().into())?;
    info!(host = %config.host, token = %config.token_hint(), "bot: connecting");

    let link = transport::connect(&config.host, &config.origin).await?;
    let client = Client::start(link, &config).await?;
    let session = Session::new(client, config);

    session.on_each(&EventKind::ALL, |_session, event| async move {
        info!(rid = %event.rid, "{event}");
    });

    if let Err(e) = session.boot().await {
        error!(error = %e, code = e.error_code(), "bot: boot failed");
        return Err(e.into());
    }

    tokio::signal::ctrl_c().await?;
    session.shutdown().await;
    info!("bot: stopped");
    Ok(())
}
