use anyhow::Context;
use std::sync::Arc;

use crate::auth::{SessionResolver, UserDirectory};
use crate::authz::Guard;
use crate::config::{AppConfig, StoreBackend};
use crate::database::{DatabaseManager, EntityStore, MemoryStore, PgStore};

/// Shared per-process state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn EntityStore>,
    pub sessions: SessionResolver,
    pub guard: Guard,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn EntityStore>) -> Self {
        let sessions = SessionResolver::new(config.security.jwt_secret.as_str(), UserDirectory::new(store.clone()));
        Self {
            config: Arc::new(config),
            store,
            sessions,
            guard: Guard::default(),
        }
    }

    /// Build the configured store backend and wrap it in state.
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        if config.security.jwt_secret.is_empty() {
            anyhow::bail!("JWT_SECRET must be set outside development");
        }

        let store: Arc<dyn EntityStore> = match config.database.backend {
            StoreBackend::Memory => {
                let store = match &config.database.seed_file {
                    Some(path) => MemoryStore::from_seed_file(path)
                        .with_context(|| format!("loading seed file {}", path))?,
                    None => MemoryStore::new(),
                };
                tracing::info!(seed = ?config.database.seed_file, "using in-memory store");
                Arc::new(store)
            }
            StoreBackend::Postgres => {
                let store = PgStore::connect().await.context("connecting to Postgres")?;
                DatabaseManager::apply_schema(store.pool()).await.context("applying schema")?;
                tracing::info!("using Postgres store");
                Arc::new(store)
            }
        };

        Ok(Self::new(config, store))
    }
}
