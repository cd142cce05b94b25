//! In-process store for development and tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::filter::{Filter, FilterMatcher};

use super::manager::DatabaseError;
use super::store::{EntityStore, Record};

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `{ "table": [ {record}, ... ], ... }`.
    pub fn from_seed(seed: Value) -> Result<Self, DatabaseError> {
        let Value::Object(tables) = seed else {
            return Err(DatabaseError::InvalidRecord("Seed must be an object of tables".to_string()));
        };

        let mut out = HashMap::new();
        for (table, rows) in tables {
            let Value::Array(rows) = rows else {
                return Err(DatabaseError::InvalidRecord(format!("Seed table {} must be an array", table)));
            };
            let records = rows
                .into_iter()
                .map(|row| match row {
                    Value::Object(record) => Ok(record),
                    _ => Err(DatabaseError::InvalidRecord(format!("Seed rows of {} must be objects", table))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            out.insert(table, records);
        }

        Ok(Self { tables: RwLock::new(out) })
    }

    pub fn from_seed_file(path: &str) -> Result<Self, DatabaseError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| DatabaseError::InvalidRecord(format!("Seed file {}: {}", path, e)))?;
        let seed: Value = serde_json::from_str(&source)
            .map_err(|e| DatabaseError::InvalidRecord(format!("Seed file {}: {}", path, e)))?;
        Self::from_seed(seed)
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn select(&self, filter: &Filter) -> Result<Vec<Record>, DatabaseError> {
        let tables = self.tables.read().await;
        let rows = tables.get(filter.table_name()).cloned().unwrap_or_default();
        Ok(FilterMatcher::apply(filter, rows)?)
    }

    async fn count(&self, filter: &Filter) -> Result<i64, DatabaseError> {
        let tables = self.tables.read().await;
        let options = filter.where_options();
        let mut count = 0;
        for row in tables.get(filter.table_name()).into_iter().flatten() {
            if FilterMatcher::matches_with_options(filter.where_data(), row, &options)? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn insert(&self, table: &str, record: Record) -> Result<Record, DatabaseError> {
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();

        if let Some(id) = record.get("id") {
            if rows.iter().any(|r| r.get("id") == Some(id)) {
                return Err(DatabaseError::Conflict(format!("{} already has a record with id {}", table, id)));
            }
        }

        rows.push(record.clone());
        Ok(record)
    }

    async fn update(&self, filter: &Filter, changes: Record) -> Result<Vec<Record>, DatabaseError> {
        let mut tables = self.tables.write().await;
        let options = filter.where_options();
        let mut updated = Vec::new();

        for row in tables.get_mut(filter.table_name()).into_iter().flatten() {
            if FilterMatcher::matches_with_options(filter.where_data(), row, &options)? {
                for (key, value) in &changes {
                    row.insert(key.clone(), value.clone());
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, filter: &Filter) -> Result<Vec<Record>, DatabaseError> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(filter.table_name()) else {
            return Ok(vec![]);
        };

        let options = filter.where_options();
        let mut kept = Vec::with_capacity(rows.len());
        let mut removed = Vec::new();
        for row in rows.drain(..) {
            if FilterMatcher::matches_with_options(filter.where_data(), &row, &options)? {
                removed.push(row);
            } else {
                kept.push(row);
            }
        }
        *rows = kept;
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}
