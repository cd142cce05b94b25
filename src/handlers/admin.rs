// handlers/admin.rs - tenant administration, permission overrides, impersonation

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::{generate_jwt, minutes_ttl, Claims, UserRecord};
use crate::authz::{keys, AuthContext, OverrideError, PermissionOverride, Role, RolePermissionTable};
use crate::database::{Record, ScopedRepository};
use crate::error::ApiError;
use crate::filter::FilterData;
use crate::middleware::{ApiResponse, ApiResult};
use crate::resource::Resource;
use crate::state::AppState;

use super::data::{protect_platform_account, ListQuery};

/// GET /api/admin/tenants - all tenants for an unscoped platform admin
pub async fn list_tenants(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<Record>> {
    let mut filter: FilterData = query.into();
    if filter.order.is_none() {
        filter.order = Some(json!("name asc"));
    }
    let rows = ScopedRepository::platform(state.store.as_ref(), Resource::Tenants, &ctx.scoped)?
        .list(filter)
        .await?;
    Ok(ApiResponse::success(rows))
}

#[derive(Debug, Deserialize)]
pub struct CreateTenant {
    pub name: String,
    pub vessel_type: Option<String>,
}

/// POST /api/admin/tenants
pub async fn create_tenant(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CreateTenant>,
) -> ApiResult<Record> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Tenant name is required"));
    }

    let mut record = Record::new();
    record.insert("name".to_string(), json!(name));
    if let Some(vessel_type) = body.vessel_type {
        record.insert("vessel_type".to_string(), json!(vessel_type));
    }

    let created = ScopedRepository::platform(state.store.as_ref(), Resource::Tenants, &ctx.scoped)?
        .create(record)
        .await?;
    tracing::info!(tenant = ?created.get("id"), admin = %ctx.session().user_id, "tenant created");
    Ok(ApiResponse::created(created))
}

#[derive(Debug, Deserialize)]
pub struct SetPermissions {
    /// JSON array of keys, a comma separated string, or null to clear
    pub permissions: Value,
}

#[derive(Debug, Serialize)]
pub struct PermissionsView {
    pub user_id: String,
    pub role: Role,
    pub permissions: Option<String>,
    pub effective: Vec<String>,
}

fn parse_override(raw: &Value) -> Result<PermissionOverride, OverrideError> {
    match raw {
        Value::Null => Ok(PermissionOverride::default()),
        Value::String(s) => PermissionOverride::try_parse(s),
        Value::Array(items) => {
            let entries = items
                .iter()
                .map(|item| item.as_str().ok_or(OverrideError::InvalidFormat))
                .collect::<Result<Vec<_>, _>>()?;
            PermissionOverride::from_entries(entries)
        }
        _ => Err(OverrideError::InvalidFormat),
    }
}

/// PUT /api/admin/users/:id/permissions - replace a user's override
pub async fn set_permissions(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(user_id): Path<String>,
    Json(body): Json<SetPermissions>,
) -> ApiResult<PermissionsView> {
    let overrides = parse_override(&body.permissions)?;

    if !ctx.session().is_platform_admin() {
        let platform_key = overrides
            .grants
            .iter()
            .chain(overrides.denials.iter())
            .find(|k| keys::PLATFORM_KEYS.contains(&k.as_str()));
        if let Some(key) = platform_key {
            return Err(ApiError::forbidden(format!("{} can only be changed by a platform administrator", key)));
        }
    }

    let stored = if overrides.is_empty() { Value::Null } else { json!(overrides.to_json()) };
    let mut changes = Record::new();
    changes.insert("permissions".to_string(), stored);

    // Tenant-scoped: users of other tenants are simply not found
    let repo = ScopedRepository::new(state.store.as_ref(), Resource::Users, &ctx.scoped)?;
    protect_platform_account(&ctx, &repo, &user_id).await?;
    let updated = repo.set_fields(&user_id, changes).await?;
    let user: UserRecord = serde_json::from_value(Value::Object(updated))
        .map_err(|e| ApiError::internal_server_error(format!("Malformed user record: {}", e)))?;

    tracing::info!(
        user_id = %user.id,
        changed_by = %ctx.session().user_id,
        permissions = %overrides,
        "permission override replaced"
    );

    let effective = RolePermissionTable::global()
        .effective_permissions(&user.role, &overrides)
        .into_iter()
        .collect();
    Ok(ApiResponse::success(PermissionsView {
        permissions: user.permission_override(),
        user_id: user.id,
        role: user.role,
        effective,
    }))
}

#[derive(Debug, Serialize)]
pub struct ImpersonationToken {
    pub token: String,
    pub expires_at: chrono::DateTime<Utc>,
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub impersonator_id: String,
}

/// POST /api/admin/impersonate/:id - short-lived token acting as a tenant user
pub async fn impersonate(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(user_id): Path<String>,
) -> ApiResult<ImpersonationToken> {
    let admin = ctx.session();
    if admin.is_impersonated() {
        return Err(ApiError::forbidden("Cannot impersonate while impersonating"));
    }

    let record = ScopedRepository::platform(state.store.as_ref(), Resource::Users, &ctx.scoped)?
        .get(&user_id)
        .await?;
    let target: UserRecord = serde_json::from_value(Value::Object(record))
        .map_err(|e| ApiError::internal_server_error(format!("Malformed user record: {}", e)))?;

    if target.role.is_platform_admin() {
        return Err(ApiError::forbidden("Platform administrators cannot be impersonated"));
    }
    if target.id == admin.user_id {
        return Err(ApiError::bad_request("Cannot impersonate yourself"));
    }

    let ttl = minutes_ttl(state.config.security.impersonation_expiry_minutes);
    let claims = Claims::with_ttl(&target.id, &target.email, &target.role, target.tenant_id.clone(), ttl)
        .impersonated_by(&admin.user_id);
    let token = generate_jwt(&claims, &state.config.security.jwt_secret).map_err(|e| {
        tracing::error!("Failed to sign impersonation token: {}", e);
        ApiError::internal_server_error("Failed to issue token")
    })?;

    tracing::warn!(
        impersonator_id = %admin.user_id,
        user_id = %target.id,
        tenant_id = ?target.tenant_id,
        "impersonation token issued"
    );

    Ok(ApiResponse::success(ImpersonationToken {
        token,
        expires_at: chrono::DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now),
        user_id: target.id,
        tenant_id: target.tenant_id,
        impersonator_id: admin.user_id.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_override_payload_shapes() {
        let parsed = parse_override(&json!(["inventory.delete", "-documents.delete"])).unwrap();
        assert!(parsed.grants.contains("inventory.delete"));
        assert!(parsed.denials.contains("documents.delete"));

        let parsed = parse_override(&json!("tasks.delete,-messages.create")).unwrap();
        assert!(parsed.denials.contains("messages.create"));

        assert!(parse_override(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_override_payloads() {
        assert_eq!(parse_override(&json!([1, 2])).unwrap_err(), OverrideError::InvalidFormat);
        assert_eq!(parse_override(&json!({ "a": 1 })).unwrap_err(), OverrideError::InvalidFormat);
        assert!(matches!(parse_override(&json!(["not a key"])), Err(OverrideError::InvalidKey(_))));
    }
}
