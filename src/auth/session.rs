use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::authz::{self, PermissionOverride, Role, RolePermissionTable};
use crate::database::{DatabaseError, EntityStore};
use crate::filter::{Filter, FilterData, FilterWhereOptions};
use crate::resource::Resource;

use super::{decode_jwt, Claims};

/// Authenticated identity for one request. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub tenant_id: Option<String>,
    /// Serialized permission override from the user record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    /// Set when a platform admin is acting as this user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonator_id: Option<String>,
}

impl Session {
    pub fn is_platform_admin(&self) -> bool {
        self.role.is_platform_admin()
    }

    pub fn has_permission(&self, key: &str) -> bool {
        authz::has_permission(&self.role, key, self.permissions.as_deref())
    }

    pub fn effective_permissions(&self) -> BTreeSet<String> {
        let overrides = PermissionOverride::parse(self.permissions.as_deref());
        RolePermissionTable::global().effective_permissions(&self.role, &overrides)
    }

    pub fn is_impersonated(&self) -> bool {
        self.impersonator_id.is_some()
    }
}

/// A row of the users table as the session resolver needs it.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub id: String,
    #[serde(default)]
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    permissions: Option<Value>,
}

impl UserRecord {
    /// The override in its stored form. JSON arrays written by hand into the
    /// store are accepted as well as the canonical string.
    pub fn permission_override(&self) -> Option<String> {
        match &self.permissions {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    fn into_session(self, impersonator_id: Option<String>) -> Session {
        let permissions = self.permission_override();
        Session {
            user_id: self.id,
            email: self.email,
            role: self.role,
            tenant_id: self.tenant_id.filter(|t| !t.trim().is_empty()),
            permissions,
            impersonator_id,
        }
    }
}

/// Identity lookups by primary key. These run before any tenant is known, so they
/// are the one unscoped read of tenant-owned rows.
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn EntityStore>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Active (not soft-deleted) user by id.
    pub async fn find(&self, user_id: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let table = Resource::Users.table().ok_or(DatabaseError::ConfigMissing("users table"))?;

        let mut filter = Filter::new(table.name)?;
        filter
            .options(FilterWhereOptions { soft_delete: table.soft_delete(), include_deleted: false })
            .assign(FilterData { limit: Some(1), ..FilterData::by_id(user_id) })?;

        match self.store.select(&filter).await?.into_iter().next() {
            Some(row) => serde_json::from_value(Value::Object(row))
                .map(Some)
                .map_err(|e| DatabaseError::QueryError(format!("Malformed user record {}: {}", user_id, e))),
            None => Ok(None),
        }
    }
}

/// Turns request credentials into a [`Session`], or nothing.
#[derive(Clone)]
pub struct SessionResolver {
    secret: Arc<str>,
    users: UserDirectory,
}

impl SessionResolver {
    pub fn new(secret: impl Into<Arc<str>>, users: UserDirectory) -> Self {
        Self { secret: secret.into(), users }
    }

    /// Missing, invalid or stale credentials all yield `None`; callers decide
    /// how to reject.
    pub async fn resolve(&self, headers: &HeaderMap) -> Option<Session> {
        let token = bearer_token(headers)?;
        let claims = match decode_jwt(token, &self.secret) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!("Rejecting bearer token: {}", e);
                return None;
            }
        };
        self.session_for(&claims).await
    }

    pub async fn session_for(&self, claims: &Claims) -> Option<Session> {
        let user = self.lookup(&claims.sub).await?;

        let impersonator_id = match &claims.imp {
            None => None,
            Some(admin_id) => {
                let admin = self.lookup(admin_id).await?;
                if !admin.role.is_platform_admin() || user.role.is_platform_admin() {
                    tracing::warn!(
                        user_id = %user.id,
                        impersonator_id = %admin.id,
                        "refusing impersonation token"
                    );
                    return None;
                }
                Some(admin.id)
            }
        };

        Some(user.into_session(impersonator_id))
    }

    async fn lookup(&self, user_id: &str) -> Option<UserRecord> {
        match self.users.find(user_id).await {
            Ok(Some(user)) => Some(user),
            Ok(None) => {
                tracing::debug!(user_id, "token subject not found or deactivated");
                None
            }
            Err(e) => {
                tracing::error!(user_id, "user lookup failed: {}", e);
                None
            }
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
