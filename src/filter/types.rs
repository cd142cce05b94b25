use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "$eq")] Eq,
    #[serde(rename = "$ne")] Ne,
    #[serde(rename = "$gt")] Gt,
    #[serde(rename = "$gte")] Gte,
    #[serde(rename = "$lt")] Lt,
    #[serde(rename = "$lte")] Lte,

    #[serde(rename = "$like")] Like,
    #[serde(rename = "$ilike")] ILike,

    #[serde(rename = "$in")] In,
    #[serde(rename = "$nin")] NIn,
    #[serde(rename = "$between")] Between,

    #[serde(rename = "$any")] Any,
    #[serde(rename = "$all")] All,
    #[serde(rename = "$size")] Size,

    #[serde(rename = "$null")] Null,
}

impl FilterOp {
    pub fn parse(op_key: &str) -> Option<Self> {
        Some(match op_key {
            "$eq" => FilterOp::Eq,
            "$ne" | "$neq" => FilterOp::Ne,
            "$gt" => FilterOp::Gt,
            "$gte" => FilterOp::Gte,
            "$lt" => FilterOp::Lt,
            "$lte" => FilterOp::Lte,
            "$like" => FilterOp::Like,
            "$ilike" => FilterOp::ILike,
            "$in" => FilterOp::In,
            "$nin" => FilterOp::NIn,
            "$between" => FilterOp::Between,
            "$any" => FilterOp::Any,
            "$all" => FilterOp::All,
            "$size" => FilterOp::Size,
            "$null" => FilterOp::Null,
            _ => return None,
        })
    }
}

/// Client-facing query description. `where` uses the `{ field: value }` /
/// `{ field: { "$op": value } }` / `$and` `$or` `$not` JSON dialect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterData {
    pub select: Option<Vec<String>>,
    #[serde(rename = "where", alias = "where_clause", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<serde_json::Value>,
    pub order: Option<serde_json::Value>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

impl FilterData {
    pub fn with_where(where_clause: serde_json::Value) -> Self {
        Self { where_clause: Some(where_clause), ..Default::default() }
    }

    pub fn by_id(id: &str) -> Self {
        Self::with_where(serde_json::json!({ "id": id }))
    }
}

#[derive(Debug, Clone)]
pub struct FilterWhereInfo {
    pub column: String,
    pub operator: FilterOp,
    pub data: serde_json::Value,
}

/// Soft-delete handling for the table a filter runs against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterWhereOptions {
    /// Table carries a `deleted_at` column
    pub soft_delete: bool,
    pub include_deleted: bool,
}

impl FilterWhereOptions {
    pub fn excludes_deleted(&self) -> bool {
        self.soft_delete && !self.include_deleted
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterOrderInfo {
    pub column: String,
    pub sort: SortDirection,
}

#[derive(Debug, Clone)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<serde_json::Value>,
}
