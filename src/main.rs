use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tokenmgr::cli::{self, Commands, TokenCommands};
use tokenmgr::config::{self, Config};
use tokenmgr::jobs;
use tokenmgr::models::token::{Caller, Principal, TokenKind};
use tokenmgr::store::memory::MemoryStore;
use tokenmgr::store::postgres::PgStore;
use tokenmgr::store::TokenStore;
use tokenmgr::AppState;

/// Principal recorded as the caller of administrative CLI commands.
const CLI_PRINCIPAL: &str = "system:cli";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "tokenmgr=debug,tower_http=debug".into()),
    );
    let json = std::env::var("TOKENMGR_LOG_FORMAT").is_ok_and(|v| v == "json");
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(Commands::Token { command }) => {
            let db_url = cfg
                .database_url
                .clone()
                .context("token commands require DATABASE_URL")?;
            let db = PgStore::connect(&db_url).await?;
            db.migrate().await?;
            let state = AppState::new(cfg, Arc::new(db))?;
            handle_token_command(command, &state).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<dyn TokenStore>> {
    match &cfg.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(url).await?;
            tracing::info!("Running migrations...");
            db.migrate().await?;
            Ok(Arc::new(db))
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, using the in-memory token store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let store = open_store(&cfg).await?;
    let reap_every = cfg.reap_interval_secs;
    let reap_grace = chrono::Duration::seconds(cfg.reap_grace_secs);

    let state = Arc::new(AppState::new(cfg, store)?);

    if reap_every > 0 {
        jobs::reaper::spawn(
            state.manager.clone(),
            std::time::Duration::from_secs(reap_every),
            reap_grace,
        );
        tracing::info!(every_secs = reap_every, "Background token reaper started");
    }

    let app = tokenmgr::api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("tokenmgr listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn handle_token_command(cmd: TokenCommands, state: &AppState) -> anyhow::Result<()> {
    let admin = Caller::new(CLI_PRINCIPAL, true);
    match cmd {
        TokenCommands::Issue {
            principal,
            provider,
            ttl,
            kind,
            description,
        } => {
            let kind: TokenKind = kind.parse().map_err(anyhow::Error::msg)?;
            let issued = state
                .manager
                .create_from_credential(
                    &Principal {
                        principal_id: principal,
                        auth_provider: provider,
                    },
                    ttl,
                    kind,
                    description,
                )
                .await?;
            let encoded = issued.credential().encode();
            println!(
                "Token issued:\n  ID:      {}\n  Kind:    {}\n  Expires: {}\n  Use:     Authorization: Bearer {}",
                issued.token.id,
                kind.as_str(),
                issued
                    .token
                    .expires_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".into()),
                encoded.expose()
            );
            println!("The secret is shown once and cannot be retrieved again.");
        }
        TokenCommands::List { principal } => {
            let mut tokens = state.manager.list(&admin).await?;
            if let Some(p) = principal {
                tokens.retain(|t| t.principal_id == p);
            }
            if tokens.is_empty() {
                println!("No tokens found.");
            } else {
                let now = state.manager.now();
                println!(
                    "{:<40} {:<24} {:<8} {:<8} {:<8} EXPIRES",
                    "ID", "PRINCIPAL", "KIND", "ENABLED", "EXPIRED"
                );
                for t in tokens {
                    println!(
                        "{:<40} {:<24} {:<8} {:<8} {:<8} {}",
                        t.id,
                        t.principal_id,
                        t.kind.as_str(),
                        t.enabled,
                        t.is_expired(now),
                        t.expires_at
                            .map(|e| e.format("%Y-%m-%d %H:%M").to_string())
                            .unwrap_or_else(|| "never".into())
                    );
                }
            }
        }
        TokenCommands::Revoke { id } => {
            state.manager.logout(&id, &admin).await?;
            println!("Token {} disabled.", id);
        }
        TokenCommands::Delete { id } => {
            state.manager.remove(&id, &admin).await?;
            println!("Token {} deleted.", id);
        }
        TokenCommands::Reap => {
            let grace = chrono::Duration::seconds(state.config.reap_grace_secs);
            let removed = state.manager.reap_expired(grace).await?;
            println!("Removed {} expired token(s).", removed);
        }
    }
    Ok(())
}
