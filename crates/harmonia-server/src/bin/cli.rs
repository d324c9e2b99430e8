//! Harmonia CLI — operational entry points separate from the HTTP daemon.
//!
//! Grounded in the teacher's `bin/cli.rs` `clap::Parser`/`Subcommand`
//! idiom (doc-comment-derived help text, `#[arg(long, default_value)]`),
//! and `original_source/scripts/init_db.py` /
//! `scripts/validate_environment.py` for the `init-db`/`validate-env`
//! semantics.

use clap::{Parser, Subcommand};
use colored::Colorize;
use harmonia_core::Router;
use harmonia_server::config::Config;

/// Harmonia — local-first per-user memory store
#[derive(Parser)]
#[command(name = "harmonia")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operational CLI for the Harmonia memory store")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or validate a user's per-user database schema
    InitDb {
        /// User id to initialize (creates the directory/db if missing)
        #[arg(long)]
        user_id: String,
    },

    /// Check configuration and required directories
    ValidateEnv,

    /// Start the HTTP server (equivalent to running `harmonia-server`)
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::InitDb { user_id } => init_db(&config, &user_id),
        Commands::ValidateEnv => validate_env(&config),
        Commands::Serve { host, port } => serve(config, host, port),
    }
}

fn init_db(config: &Config, user_id: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.database.path)?;
    let router = Router::new(config.database.path.clone());
    let storage = router.get(user_id)?;
    storage.health_check()?;
    println!(
        "{} initialized database for user {} at {}",
        "ok".green().bold(),
        user_id,
        storage.path().display()
    );
    Ok(())
}

fn validate_env(config: &Config) -> anyhow::Result<()> {
    let warnings = config.validate();
    if warnings.is_empty() {
        println!("{} environment looks good", "ok".green().bold());
    } else {
        for warning in &warnings {
            println!("{} {}", "warning:".yellow().bold(), warning);
        }
    }
    Ok(())
}

fn serve(config: Config, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = config;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(config.logging.level.clone()))
            .init();
        std::fs::create_dir_all(&config.database.path)?;
        let addr = format!("{}:{}", config.server.host, config.server.port);
        let state = std::sync::Arc::new(harmonia_server::server::AppState::new(config));
        let app = harmonia_server::server::build_router(state);

        tracing::info!(%addr, "starting harmonia-server");
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .with_graceful_shutdown(harmonia_server::server::shutdown_signal())
        .await?;
        Ok::<(), anyhow::Error>(())
    })
}
