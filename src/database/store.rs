use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::filter::Filter;

use super::manager::DatabaseError;

/// One row as a JSON object keyed by column name.
pub type Record = Map<String, Value>;

/// Storage backend behind the repositories.
///
/// Implementations execute exactly the filter they are given. Tenant scoping is
/// applied before a filter reaches the store, never after rows come back.
#[async_trait]
pub trait EntityStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Rows matching `filter`, honouring its order, paging and projection.
    async fn select(&self, filter: &Filter) -> Result<Vec<Record>, DatabaseError>;

    async fn count(&self, filter: &Filter) -> Result<i64, DatabaseError>;

    async fn insert(&self, table: &str, record: Record) -> Result<Record, DatabaseError>;

    /// Set `changes` on every row matching the filter's where clause and return
    /// the updated rows.
    async fn update(&self, filter: &Filter, changes: Record) -> Result<Vec<Record>, DatabaseError>;

    /// Remove every row matching the filter's where clause and return them.
    async fn delete(&self, filter: &Filter) -> Result<Vec<Record>, DatabaseError>;

    async fn ping(&self) -> Result<(), DatabaseError>;
}
