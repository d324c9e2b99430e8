//! HTTP server bootstrap: load configuration, wire up the core engine,
//! and serve the versioned API.
//!
//! Grounded in the teacher's now-superseded `protocol/http.rs` bootstrap
//! (tracing setup, bind-and-serve, graceful shutdown) and
//! `original_source/src/main.py`'s startup sequence (config → directories
//! → router → server).

use std::sync::Arc;

use clap::Parser;
use harmonia_server::config::{self, Config};
use harmonia_server::server::{self, AppState};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "harmonia-server", version, about = "Harmonia memory store HTTP server")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Override the bind host from the config file.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port from the config file.
    #[arg(long)]
    port: Option<u16>,
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::load(&args.config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config.logging);

    for warning in config.validate() {
        tracing::warn!(%warning, "configuration warning");
    }

    std::fs::create_dir_all(&config.database.path)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config));
    let app = server::build_router(state);

    tracing::info!(%addr, "starting harmonia-server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(server::shutdown_signal())
    .await?;

    Ok(())
}
