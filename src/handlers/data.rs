// handlers/data.rs - /api/data/:resource and /api/find/:resource
//
// The guard has already authorized the route and attached an AuthContext; every
// handler here goes through a ScopedRepository so the tenant constraint is
// applied when the query is built.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::authz::{keys, AuthContext, Role};
use crate::database::{Record, ScopedRepository};
use crate::error::ApiError;
use crate::filter::FilterData;
use crate::middleware::{ApiResponse, ApiResult};
use crate::resource::Resource;
use crate::state::AppState;
use crate::types::Operation;

/// Expense fields only an approver may set.
const APPROVAL_FIELDS: &[&str] = &["approved_by", "approved_at"];

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i32>,
    pub offset: Option<i32>,
    pub order: Option<String>,
}

impl From<ListQuery> for FilterData {
    fn from(query: ListQuery) -> Self {
        FilterData {
            limit: query.limit,
            offset: query.offset,
            order: query.order.map(Value::String),
            ..Default::default()
        }
    }
}

fn repository<'a>(state: &'a AppState, ctx: &'a AuthContext) -> Result<ScopedRepository<'a>, ApiError> {
    Ok(ScopedRepository::new(state.store.as_ref(), ctx.action.resource, &ctx.scoped)?)
}

fn into_record(body: Value) -> Result<Record, ApiError> {
    match body {
        Value::Object(record) => Ok(record),
        _ => Err(ApiError::invalid_json("Request body must be a JSON object")),
    }
}

/// Field-level rules the route-level policy cannot express.
fn check_fields(ctx: &AuthContext, record: &Record) -> Result<(), ApiError> {
    match ctx.action.resource {
        Resource::Expenses => {
            let sets_status = record
                .get("status")
                .is_some_and(|s| s.as_str() != Some("pending"));
            let sets_approval = APPROVAL_FIELDS.iter().any(|f| record.contains_key(*f));
            if (sets_status || sets_approval) && !ctx.allows(keys::EXPENSES_APPROVE) {
                return Err(ApiError::forbidden(format!("Missing permission {}", keys::EXPENSES_APPROVE)));
            }
        }
        Resource::Users => {
            if record.contains_key("permissions") {
                return Err(ApiError::forbidden(
                    "Permission overrides are managed through /api/admin/users/:id/permissions",
                ));
            }
            if let Some(role) = record.get("role") {
                let role = role
                    .as_str()
                    .map(Role::parse)
                    .ok_or_else(|| ApiError::bad_request("role must be a string"))?;
                if let Role::Unknown(name) = &role {
                    return Err(ApiError::bad_request(format!("Unknown role {}", name)));
                }
                if !ctx.allows(keys::ROLES_MANAGE) {
                    return Err(ApiError::forbidden(format!("Missing permission {}", keys::ROLES_MANAGE)));
                }
                if role.is_platform_admin() && !ctx.session().is_platform_admin() {
                    return Err(ApiError::forbidden("Only platform administrators can assign platform roles"));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Accounts holding a platform role are changed by platform administrators only,
/// whichever tenant they call home.
pub(crate) async fn protect_platform_account(
    ctx: &AuthContext,
    repo: &ScopedRepository<'_>,
    user_id: &str,
) -> Result<(), ApiError> {
    if ctx.session().is_platform_admin() {
        return Ok(());
    }
    let target = repo.get(user_id).await?;
    let target_role = target.get("role").and_then(Value::as_str).map(Role::parse);
    if target_role.is_some_and(|role| role.is_platform_admin()) {
        return Err(ApiError::forbidden("Platform administrator accounts are managed by platform administrators"));
    }
    Ok(())
}

/// Ownership stamps taken from the session rather than the client.
fn stamp_creator(ctx: &AuthContext, record: &mut Record) {
    let user_id = json!(ctx.session().user_id);
    match ctx.action.resource {
        Resource::Expenses => {
            record.insert("submitted_by".to_string(), user_id);
            record.entry("status".to_string()).or_insert_with(|| json!("pending"));
        }
        Resource::Messages => {
            record.insert("sender_id".to_string(), user_id);
        }
        _ => {}
    }
}

/// GET /api/data/:resource
pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<Record>> {
    let rows = repository(&state, &ctx)?.list(query.into()).await?;
    Ok(ApiResponse::success(rows))
}

/// POST /api/find/:resource - filtered search with a FilterData body
pub async fn find(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(filter): Json<FilterData>,
) -> ApiResult<Vec<Record>> {
    let rows = repository(&state, &ctx)?.list(filter).await?;
    Ok(ApiResponse::success(rows))
}

/// POST /api/data/:resource
pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<Value>,
) -> ApiResult<Record> {
    let mut record = into_record(body)?;
    check_fields(&ctx, &record)?;
    stamp_creator(&ctx, &mut record);

    let created = repository(&state, &ctx)?.create(record).await?;
    Ok(ApiResponse::created(created))
}

/// GET /api/data/:resource/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((_, id)): Path<(String, String)>,
) -> ApiResult<Record> {
    let record = repository(&state, &ctx)?.get(&id).await?;
    Ok(ApiResponse::success(record))
}

/// PATCH /api/data/:resource/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((_, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<Record> {
    let changes = into_record(body)?;
    check_fields(&ctx, &changes)?;

    let repo = repository(&state, &ctx)?;
    if ctx.action.resource == Resource::Users {
        protect_platform_account(&ctx, &repo, &id).await?;
    }
    let updated = repo.update(&id, changes).await?;
    Ok(ApiResponse::success(updated))
}

/// DELETE /api/data/:resource/:id
pub async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((_, id)): Path<(String, String)>,
) -> ApiResult<Record> {
    if ctx.action.resource == Resource::Users && ctx.session().user_id == id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }
    let repo = repository(&state, &ctx)?;
    if ctx.action.resource == Resource::Users {
        protect_platform_account(&ctx, &repo, &id).await?;
    }
    let deleted = repo.delete(&id).await?;
    Ok(ApiResponse::success(deleted))
}

/// POST /api/data/:resource/:id/:action - restore, approve
pub async fn record_action(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((_, id, _)): Path<(String, String, String)>,
) -> ApiResult<Record> {
    let repo = repository(&state, &ctx)?;

    let record = match ctx.action.operation {
        Operation::Restore => repo.restore(&id).await?,
        Operation::Approve => approve(&ctx, &repo, &id).await?,
        other => return Err(ApiError::not_found(format!("Unknown record action {}", other))),
    };
    Ok(ApiResponse::success(record))
}

/// Approval is a single conditional write, so concurrent approvers cannot both win.
async fn approve(ctx: &AuthContext, repo: &ScopedRepository<'_>, id: &str) -> Result<Record, ApiError> {
    let mut changes = Record::new();
    changes.insert("status".to_string(), json!("approved"));
    changes.insert("approved_by".to_string(), json!(ctx.session().user_id));
    changes.insert("approved_at".to_string(), json!(Utc::now().to_rfc3339()));

    let not_yet_approved = json!({ "$or": [{ "status": null }, { "status": { "$ne": "approved" } }] });
    let Some(approved) = repo.set_fields_if(id, not_yet_approved, changes).await? else {
        // Nothing written: 404 if the row is not visible, otherwise it was already approved
        repo.get(id).await?;
        return Err(ApiError::conflict(format!("Expense {} is already approved", id)));
    };
    tracing::info!(
        expense_id = id,
        approver = %ctx.session().user_id,
        impersonator = ?ctx.session().impersonator_id,
        "expense approved"
    );
    Ok(approved)
}
