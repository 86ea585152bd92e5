mod auth;
mod config;
mod error;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use config::AppConfig;
use quill_core::OwnerId;
use routes::{app_router, AppState};

#[derive(Debug, Parser)]
#[command(name = "quill-api")]
#[command(about = "Quill sync authority")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Print a bearer token for an owner (development only)
    MintToken {
        /// Owner id placed in the `sub` claim
        owner: String,
        /// Token lifetime in seconds (defaults to QUILL_TOKEN_TTL_SECS)
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quill_api=info".parse().expect("valid directive"))
                .add_directive("quill_core=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();
    let config = Arc::new(AppConfig::from_env()?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::MintToken { owner, ttl_secs } => {
            let ttl = ttl_secs.map_or(config.token_ttl, Duration::from_secs);
            let verifier = auth::JwtVerifier::new(&config);
            let token = verifier.mint(&OwnerId::new(owner), ttl)?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve(config: Arc<AppConfig>) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting quill-api with config: {:?}", config);

    let state = AppState::from_config(config)?;
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("quill-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
