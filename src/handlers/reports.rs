// handlers/reports.rs - GET /api/reports/summary

use axum::{extract::State, Extension};
use serde::Serialize;
use serde_json::Value;

use crate::authz::AuthContext;
use crate::database::{Record, ScopedRepository};
use crate::error::ApiError;
use crate::filter::FilterData;
use crate::middleware::{ApiResponse, ApiResult};
use crate::resource::Resource;
use crate::state::AppState;

#[derive(Debug, Default, Serialize)]
pub struct ExpenseSummary {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub amount_total: f64,
    pub amount_pending: f64,
}

#[derive(Debug, Default, Serialize)]
pub struct InventorySummary {
    pub items: usize,
    /// quantity at or below min_level
    pub low_stock: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct TaskSummary {
    pub total: usize,
    pub open: usize,
}

/// Per-tenant dashboard numbers. Sections the caller may not view are omitted.
#[derive(Debug, Default, Serialize)]
pub struct Summary {
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expenses: Option<ExpenseSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<InventorySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<TaskSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance_logs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crew: Option<i64>,
}

fn can_view(ctx: &AuthContext, resource: Resource) -> bool {
    ctx.allows(&format!("{}.view", resource))
}

fn number(record: &Record, field: &str) -> Option<f64> {
    match record.get(field)? {
        Value::Number(n) => n.as_f64(),
        // Postgres NUMERIC may arrive as text
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn summarize_expenses(rows: &[Record]) -> ExpenseSummary {
    let mut summary = ExpenseSummary { total: rows.len(), ..Default::default() };
    for row in rows {
        let amount = number(row, "amount").unwrap_or(0.0);
        summary.amount_total += amount;
        match row.get("status").and_then(Value::as_str) {
            Some("approved") => summary.approved += 1,
            Some("pending") | None => {
                summary.pending += 1;
                summary.amount_pending += amount;
            }
            Some(_) => {}
        }
    }
    summary
}

pub fn summarize_inventory(rows: &[Record]) -> InventorySummary {
    let low_stock = rows
        .iter()
        .filter(|row| match (number(row, "quantity"), number(row, "min_level")) {
            (Some(quantity), Some(min)) => quantity <= min,
            _ => false,
        })
        .count();
    InventorySummary { items: rows.len(), low_stock }
}

pub fn summarize_tasks(rows: &[Record]) -> TaskSummary {
    let open = rows
        .iter()
        .filter(|row| !matches!(row.get("status").and_then(Value::as_str), Some("done") | Some("cancelled")))
        .count();
    TaskSummary { total: rows.len(), open }
}

fn columns(names: &[&str]) -> FilterData {
    FilterData { select: Some(names.iter().map(|s| s.to_string()).collect()), ..Default::default() }
}

/// GET /api/reports/summary
pub async fn summary(State(state): State<AppState>, Extension(ctx): Extension<AuthContext>) -> ApiResult<Summary> {
    let store = state.store.as_ref();
    let repo = |resource| ScopedRepository::new(store, resource, &ctx.scoped);

    let tenant_id = ctx
        .tenant_id()
        .ok_or_else(|| ApiError::from(crate::authz::AuthzError::TenantRequired))?
        .to_string();
    let mut summary = Summary { tenant_id, ..Default::default() };

    if can_view(&ctx, Resource::Expenses) {
        let rows = repo(Resource::Expenses)?.list(columns(&["amount", "status"])).await?;
        summary.expenses = Some(summarize_expenses(&rows));
    }
    if can_view(&ctx, Resource::Inventory) {
        let rows = repo(Resource::Inventory)?.list(columns(&["quantity", "min_level"])).await?;
        summary.inventory = Some(summarize_inventory(&rows));
    }
    if can_view(&ctx, Resource::Tasks) {
        let rows = repo(Resource::Tasks)?.list(columns(&["status"])).await?;
        summary.tasks = Some(summarize_tasks(&rows));
    }
    if can_view(&ctx, Resource::Maintenance) {
        summary.maintenance_logs = Some(repo(Resource::Maintenance)?.count(FilterData::default()).await?);
    }
    if can_view(&ctx, Resource::Documents) {
        summary.documents = Some(repo(Resource::Documents)?.count(FilterData::default()).await?);
    }
    if can_view(&ctx, Resource::Users) {
        summary.crew = Some(repo(Resource::Users)?.count(FilterData::default()).await?);
    }

    Ok(ApiResponse::success(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: Value) -> Vec<Record> {
        values.as_array().unwrap().iter().map(|v| v.as_object().cloned().unwrap()).collect()
    }

    #[test]
    fn expense_totals() {
        let summary = summarize_expenses(&rows(json!([
            { "amount": 100.5, "status": "pending" },
            { "amount": "200", "status": "approved" },
            { "amount": 50, "status": "rejected" },
            { "amount": 10 }
        ])));
        assert_eq!(summary.total, 4);
        assert_eq!(summary.pending, 2);
        assert_eq!(summary.approved, 1);
        assert!((summary.amount_total - 360.5).abs() < f64::EPSILON);
        assert!((summary.amount_pending - 110.5).abs() < f64::EPSILON);
    }

    #[test]
    fn low_stock_needs_a_minimum() {
        let summary = summarize_inventory(&rows(json!([
            { "quantity": 2, "min_level": 4 },
            { "quantity": 4, "min_level": 4 },
            { "quantity": 9, "min_level": 4 },
            { "quantity": 0 }
        ])));
        assert_eq!(summary.items, 4);
        assert_eq!(summary.low_stock, 2);
    }

    #[test]
    fn open_tasks_exclude_finished() {
        let summary = summarize_tasks(&rows(json!([
            { "status": "open" }, { "status": "done" }, { "status": "in_progress" }, { "status": "cancelled" }
        ])));
        assert_eq!(summary.total, 4);
        assert_eq!(summary.open, 2);
    }
}
