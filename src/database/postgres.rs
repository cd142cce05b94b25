use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::{PgArguments, PgRow}, PgPool, Postgres, Row};

use crate::filter::{is_identifier, Filter};

use super::manager::{DatabaseError, DatabaseManager};
use super::store::{EntityStore, Record};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Postgres-backed store. Rows travel as JSON (`row_to_json` out,
/// `jsonb_populate_record` in) so one implementation serves every table.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect() -> Result<Self, DatabaseError> {
        Ok(Self::new(DatabaseManager::pool().await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_records(&self, query: &str, params: &[Value]) -> Result<Vec<Record>, DatabaseError> {
        let mut q = sqlx::query(query);
        for p in params {
            q = bind_param(q, p);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(row_record).collect()
    }
}

#[async_trait]
impl EntityStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn select(&self, filter: &Filter) -> Result<Vec<Record>, DatabaseError> {
        let sql = filter.to_sql()?;
        let query = format!("SELECT row_to_json(q) AS row FROM ({}) q", sql.query);
        self.fetch_records(&query, &sql.params).await
    }

    async fn count(&self, filter: &Filter) -> Result<i64, DatabaseError> {
        let sql = filter.to_count_sql()?;
        let mut q = sqlx::query(&sql.query);
        for p in sql.params.iter() {
            q = bind_param(q, p);
        }
        let row = q.fetch_one(&self.pool).await?;
        let count: i64 = row.try_get("count")?;
        Ok(count)
    }

    async fn insert(&self, table: &str, record: Record) -> Result<Record, DatabaseError> {
        // Validates the table name
        Filter::new(table)?;
        let columns = quoted_columns(record.keys())?;

        let query = format!(
            "INSERT INTO \"{t}\" ({c}) SELECT {c} FROM jsonb_populate_record(NULL::\"{t}\", $1) RETURNING row_to_json(\"{t}\".*) AS row",
            t = table,
            c = columns.join(", ")
        );
        let params = [Value::Object(record)];
        self.fetch_records(&query, &params)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DatabaseError::QueryError(format!("Insert into {} returned no row", table)))
    }

    async fn update(&self, filter: &Filter, changes: Record) -> Result<Vec<Record>, DatabaseError> {
        let table = filter.table_name();
        let columns = quoted_columns(changes.keys())?;
        if columns.is_empty() {
            return Err(DatabaseError::InvalidRecord("No fields to update".to_string()));
        }

        // $1 carries the changes; where placeholders follow
        let where_sql = filter.to_where_sql(1)?;
        let assignments: Vec<String> = columns
            .iter()
            .map(|c| format!("{c} = (SELECT {c} FROM jsonb_populate_record(NULL::\"{t}\", $1))", c = c, t = table))
            .collect();

        let query = format!(
            "UPDATE \"{t}\" SET {set} WHERE {w} RETURNING row_to_json(\"{t}\".*) AS row",
            t = table,
            set = assignments.join(", "),
            w = where_sql.query
        );

        let mut params = Vec::with_capacity(where_sql.params.len() + 1);
        params.push(Value::Object(changes));
        params.extend(where_sql.params);
        self.fetch_records(&query, &params).await
    }

    async fn delete(&self, filter: &Filter) -> Result<Vec<Record>, DatabaseError> {
        let table = filter.table_name();
        let where_sql = filter.to_where_sql(0)?;
        let query = format!(
            "DELETE FROM \"{t}\" WHERE {w} RETURNING row_to_json(\"{t}\".*) AS row",
            t = table,
            w = where_sql.query
        );
        self.fetch_records(&query, &where_sql.params).await
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn quoted_columns<'a>(keys: impl Iterator<Item = &'a String>) -> Result<Vec<String>, DatabaseError> {
    keys.map(|k| {
        if is_identifier(k) {
            Ok(format!("\"{}\"", k))
        } else {
            Err(DatabaseError::InvalidRecord(format!("Invalid field name: {}", k)))
        }
    })
    .collect()
}

fn row_record(row: &PgRow) -> Result<Record, DatabaseError> {
    match row.try_get::<Value, _>("row")? {
        Value::Object(record) => Ok(record),
        other => Err(DatabaseError::QueryError(format!("Expected a JSON row, got {}", other))),
    }
}

/// Postgres has no u64; values past `i64::MAX` go over as text.
fn unsigned_param(u: u64) -> Result<i64, String> {
    i64::try_from(u).map_err(|_| u.to_string())
}

fn bind_param<'q>(q: PgQuery<'q>, v: &'q Value) -> PgQuery<'q> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(u) = n.as_u64() {
                match unsigned_param(u) {
                    Ok(i) => q.bind(i),
                    Err(text) => q.bind(text),
                }
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s),
        Value::Array(items) if items.iter().all(Value::is_string) => {
            let strings: Vec<String> = items.iter().filter_map(|i| i.as_str().map(str::to_string)).collect();
            q.bind(strings)
        }
        // Objects and mixed arrays go over as JSONB
        Value::Array(_) | Value::Object(_) => q.bind(v.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_valid_columns_and_rejects_others() {
        let keys = ["title".to_string(), "amount".to_string()];
        assert_eq!(quoted_columns(keys.iter()).unwrap(), vec!["\"title\"", "\"amount\""]);

        let bad = ["title\" = 'x'; --".to_string()];
        assert!(quoted_columns(bad.iter()).is_err());
    }

    #[test]
    fn unsigned_numbers_past_i64_stay_intact() {
        assert_eq!(unsigned_param(42), Ok(42));
        assert_eq!(unsigned_param(i64::MAX as u64), Ok(i64::MAX));
        assert_eq!(unsigned_param(u64::MAX), Err("18446744073709551615".to_string()));
    }
}
