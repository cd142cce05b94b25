use anyhow::Context;
use tracing_subscriber::EnvFilter;

use yachtops_api::authz::RolePermissionTable;
use yachtops_api::config::config;
use yachtops_api::database::DatabaseManager;
use yachtops_api::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")))
        .init();

    let config = config();
    tracing::info!("Starting YachtOps API in {:?} mode", config.environment);

    if let Some(path) = &config.authz.role_permissions_file {
        let table = RolePermissionTable::from_yaml_file(path).context("loading role permission table")?;
        if RolePermissionTable::install(table).is_err() {
            tracing::warn!("Role permission table was already installed; ignoring {}", path);
        } else {
            tracing::info!(path = %path, "installed role permission table");
        }
    }

    let state = AppState::from_config(config.clone()).await?;
    let app = app(state);

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("YachtOps API listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server")?;

    DatabaseManager::close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
