use sqlx::{postgres::PgPoolOptions, Executor, PgPool};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

use crate::authz::AuthzError;
use crate::filter::FilterError;

const SCHEMA_SQL: &str = include_str!("../../migrations/schema.sql");

/// Errors from the store layer
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Process-wide Postgres pool, created on first use from `DATABASE_URL`.
pub struct DatabaseManager;

static POOL: OnceCell<PgPool> = OnceCell::const_new();

impl DatabaseManager {
    pub async fn pool() -> Result<PgPool, DatabaseError> {
        POOL.get_or_try_init(Self::connect).await.cloned()
    }

    async fn connect() -> Result<PgPool, DatabaseError> {
        let url = std::env::var("DATABASE_URL").map_err(|_| DatabaseError::ConfigMissing("DATABASE_URL"))?;
        let settings = &crate::config::config().database;

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connection_timeout))
            .connect(&url)
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        info!("Created database pool (max {} connections)", settings.max_connections);
        Ok(pool)
    }

    /// Create the yacht-ops tables if they do not exist yet.
    pub async fn apply_schema(pool: &PgPool) -> Result<(), DatabaseError> {
        // Simple-query protocol: the file holds several statements
        pool.execute(SCHEMA_SQL).await?;
        info!("Database schema applied");
        Ok(())
    }

    pub async fn close() {
        if let Some(pool) = POOL.get() {
            pool.close().await;
            info!("Closed database pool");
        }
    }
}
