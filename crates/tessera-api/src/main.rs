//! Tessera API Server
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use std::sync::Arc;
use tessera_api::auth::keys::KeyProvider;
use tessera_api::auth::repository::{self, PgRefreshLedger, PgUserStore};
use tessera_api::{create_router, state::AppState};
use tessera_core::config::{AppConfig, DatabaseBackend, LoggingConfig};
use tessera_core::{InMemoryRefreshLedger, InMemoryUserStore, RefreshLedger, UserStore};

fn init_tracing(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("tessera_api={level},tower_http={level}", level = config.level).into()
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

type Stores = (Arc<dyn UserStore>, Arc<dyn RefreshLedger>);

async fn build_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    match config.database.backend {
        DatabaseBackend::Postgres => {
            let pool = repository::connect(&config.database)
                .await
                .context("connecting to PostgreSQL")?;
            tracing::info!("Using PostgreSQL stores");
            Ok((
                Arc::new(PgUserStore::new(pool.clone())),
                Arc::new(PgRefreshLedger::new(pool)),
            ))
        }
        DatabaseBackend::Memory => {
            tracing::warn!("Using in-memory stores; accounts and sessions are lost on restart");
            Ok((
                Arc::new(InMemoryUserStore::new()),
                Arc::new(InMemoryRefreshLedger::new()),
            ))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::load().context("loading configuration")?;

    init_tracing(&config.logging);

    let keys = KeyProvider::load(&config.auth)
        .await
        .context("loading token keys")?;
    let (users, ledger) = build_stores(&config).await?;

    let addr = format!("{}:{}", config.server.host, config.server.port);

    // Create application state
    let state = Arc::new(AppState::new(config, keys, users, ledger));
    state
        .auth_service
        .warm_up()
        .await
        .context("preparing password verification")?;

    // Create router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Tessera API Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);
    tracing::info!("OpenAPI document at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
