use clap::{Parser, ValueEnum};
use hub_core::config::HubConfig;
use hub_core::ledger_store::LedgerStorageConfig;
use hub_service::{build_router, ServiceConfig, ServiceState};
use std::net::SocketAddr;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LedgerStorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "hubd", version, about = "Mutual-credit hub coordinator service")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8091
    #[arg(long, default_value = "127.0.0.1:8091")]
    listen: SocketAddr,
    /// Ledger persistence backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = LedgerStorageMode::Auto, env = "HUB_LEDGER_STORAGE")]
    ledger_storage: LedgerStorageMode,
    /// PostgreSQL url for debt/audit/checkpoint persistence.
    #[arg(long, env = "HUB_LEDGER_DATABASE_URL")]
    ledger_database_url: Option<String>,
    /// Max PostgreSQL pool connections for ledger persistence.
    #[arg(long, default_value_t = 5, env = "HUB_LEDGER_PG_MAX_CONNECTIONS")]
    ledger_pg_max_connections: u32,
    /// HMAC secret used to sign session JWTs.
    #[arg(long, env = "HUB_JWT_SECRET")]
    jwt_secret: Option<String>,
}

fn resolve_ledger_storage(cli: &Cli) -> anyhow::Result<LedgerStorageConfig> {
    let resolved_url = cli
        .ledger_database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.ledger_storage {
        LedgerStorageMode::Memory => LedgerStorageConfig::Memory,
        LedgerStorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!(
                    "ledger_storage=postgres requires --ledger-database-url or DATABASE_URL"
                )
            })?;
            LedgerStorageConfig::postgres(database_url, cli.ledger_pg_max_connections)
        }
        LedgerStorageMode::Auto => {
            if let Some(database_url) = resolved_url {
                LedgerStorageConfig::postgres(database_url, cli.ledger_pg_max_connections)
            } else {
                LedgerStorageConfig::Memory
            }
        }
    };

    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "hub_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let ledger_storage = resolve_ledger_storage(&cli)?;
    let mut config = ServiceConfig {
        hub: HubConfig::default(),
        ledger_storage,
        ..ServiceConfig::default()
    };
    if let Some(secret) = cli.jwt_secret {
        config.jwt_secret = secret.into_bytes();
    }

    let state = ServiceState::bootstrap(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("hub-service REST listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
