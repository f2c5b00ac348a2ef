use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use geoexplorer_data::DataManager;
use geoexplorer_server::{service_handler, AppState, Config};
use hyper::{server::conn::Http, service::service_fn};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "geoexplorer-server")]
#[command(about = "Dataset retrieval and statistics backend", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Override the listening port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let manager = DataManager::open(&config.storage.database_path, config.manager_config())?;
    info!(database = %config.storage.database_path.display(), "Opened dataset store");
    let state = AppState::new(manager);

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}");

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        stream.set_nodelay(true).ok();

        let state = Arc::clone(&state);
        // Spawn a task per connection.
        tokio::spawn(async move {
            let service = service_fn(move |req| service_handler(Arc::clone(&state), req));
            if let Err(e) = Http::new().serve_connection(stream, service).await {
                error!(%peer_addr, "Error serving connection: {e:?}");
            }
        });
    }
}
