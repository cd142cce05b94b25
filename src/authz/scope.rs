use serde_json::{Map, Value};

use crate::filter::FilterData;

use super::error::AuthzError;
use super::tenant::ScopedSession;

pub const TENANT_COLUMN: &str = "tenant_id";

/// Which rows a scoped session may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantScope {
    Tenant(String),
    /// Platform admin without a selected tenant. Only admin-facing queries accept it.
    Unscoped,
}

impl TenantScope {
    pub fn of(session: &ScopedSession) -> Self {
        match session.tenant_id() {
            Some(tenant_id) => TenantScope::Tenant(tenant_id.to_string()),
            None => TenantScope::Unscoped,
        }
    }
}

/// Constrain `filter` to the session's tenant. Unscoped sessions are refused.
pub fn with_tenant_scope(session: &ScopedSession, filter: FilterData) -> Result<FilterData, AuthzError> {
    with_tenant_scope_on(session, TENANT_COLUMN, filter)
}

pub fn with_tenant_scope_on(session: &ScopedSession, column: &str, filter: FilterData) -> Result<FilterData, AuthzError> {
    match TenantScope::of(session) {
        TenantScope::Tenant(tenant_id) => Ok(scope_filter(filter, column, &tenant_id)),
        TenantScope::Unscoped => {
            tracing::warn!(
                user_id = %session.session.user_id,
                "refusing unscoped access to tenant-owned rows"
            );
            Err(AuthzError::TenantRequired)
        }
    }
}

/// For admin-facing queries only: a platform admin without a tenant sees every
/// tenant; everyone else is scoped exactly as `with_tenant_scope`.
pub fn with_platform_scope(session: &ScopedSession, filter: FilterData) -> Result<FilterData, AuthzError> {
    with_platform_scope_on(session, TENANT_COLUMN, filter)
}

pub fn with_platform_scope_on(session: &ScopedSession, column: &str, filter: FilterData) -> Result<FilterData, AuthzError> {
    match TenantScope::of(session) {
        TenantScope::Tenant(tenant_id) => Ok(scope_filter(filter, column, &tenant_id)),
        TenantScope::Unscoped if session.is_platform_admin() => {
            tracing::debug!(user_id = %session.session.user_id, "unscoped platform query");
            Ok(filter)
        }
        TenantScope::Unscoped => Err(AuthzError::TenantRequired),
    }
}

/// Merge `column = tenant_id` into the top level of the where clause.
///
/// An existing equal constraint is left alone. A different constraint is moved
/// into `$and` so both must hold; conflicting ids then match no rows.
pub fn scope_filter(mut filter: FilterData, column: &str, tenant_id: &str) -> FilterData {
    let constraint = Value::String(tenant_id.to_string());

    let mut obj = match filter.where_clause.take() {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(obj)) => obj,
        Some(other) => {
            // Not a valid where object; keep it so the filter validator rejects it
            let mut obj = Map::new();
            obj.insert("$and".to_string(), Value::Array(vec![other]));
            obj
        }
    };

    match obj.remove(column) {
        Some(existing) if existing != constraint => {
            let mut conjuncts = match obj.remove("$and") {
                Some(Value::Array(items)) => items,
                Some(other) => vec![other],
                None => vec![],
            };
            let mut moved = Map::new();
            moved.insert(column.to_string(), existing);
            conjuncts.push(Value::Object(moved));
            obj.insert("$and".to_string(), Value::Array(conjuncts));
        }
        _ => {}
    }

    obj.insert(column.to_string(), constraint);
    filter.where_clause = Some(Value::Object(obj));
    filter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Session;
    use crate::authz::tenant::ResolvedTenant;
    use crate::authz::Role;
    use crate::filter::{Filter, FilterMatcher};
    use serde_json::json;

    fn scoped(role: Role, tenant: Option<&str>) -> ScopedSession {
        ScopedSession {
            session: Session {
                user_id: "u-1".to_string(),
                email: "u@example.com".to_string(),
                role,
                tenant_id: tenant.map(str::to_string),
                permissions: None,
                impersonator_id: None,
            },
            tenant: ResolvedTenant { tenant_id: tenant.map(str::to_string), is_overridden: false },
        }
    }

    fn rows() -> Vec<Map<String, Value>> {
        vec![
            json!({ "id": "rec-a", "tenant_id": "A", "status": "pending" }),
            json!({ "id": "rec-b", "tenant_id": "B", "status": "pending" }),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
    }

    fn run(filter: FilterData) -> Vec<Map<String, Value>> {
        let mut compiled = Filter::new("expenses").unwrap();
        compiled.assign(filter).unwrap();
        FilterMatcher::apply(&compiled, rows()).unwrap()
    }

    #[test]
    fn adds_tenant_constraint_to_empty_filter() {
        let filter = with_tenant_scope(&scoped(Role::Crew, Some("A")), FilterData::default()).unwrap();
        assert_eq!(filter.where_clause, Some(json!({ "tenant_id": "A" })));
        let found = run(filter);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], json!("rec-a"));
    }

    #[test]
    fn foreign_record_id_matches_zero_rows() {
        let filter = with_tenant_scope(&scoped(Role::Crew, Some("A")), FilterData::by_id("rec-b")).unwrap();
        assert!(run(filter).is_empty());
    }

    #[test]
    fn conflicting_tenant_constraint_matches_zero_rows() {
        let base = FilterData::with_where(json!({ "tenant_id": "B", "status": "pending" }));
        let filter = with_tenant_scope(&scoped(Role::Owner, Some("A")), base).unwrap();
        assert_eq!(
            filter.where_clause,
            Some(json!({ "$and": [{ "tenant_id": "B" }], "status": "pending", "tenant_id": "A" }))
        );
        assert!(run(filter).is_empty());
    }

    #[test]
    fn operator_constraints_cannot_widen_scope() {
        let base = FilterData::with_where(json!({ "$or": [{ "tenant_id": "B" }, { "status": "pending" }] }));
        let found = run(with_tenant_scope(&scoped(Role::Owner, Some("A")), base).unwrap());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["tenant_id"], json!("A"));

        let base = FilterData::with_where(json!({ "tenant_id": { "$in": ["A", "B"] } }));
        let found = run(with_tenant_scope(&scoped(Role::Owner, Some("A")), base).unwrap());
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn scoping_is_idempotent() {
        let session = scoped(Role::Crew, Some("A"));
        for base in [
            FilterData::default(),
            FilterData::by_id("rec-a"),
            FilterData::with_where(json!({ "tenant_id": "B", "$and": [{ "status": "pending" }] })),
        ] {
            let once = with_tenant_scope(&session, base).unwrap();
            let twice = with_tenant_scope(&session, once.clone()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn unscoped_admin_is_refused_for_tenant_queries() {
        let admin = scoped(Role::SuperAdmin, None);
        assert_eq!(with_tenant_scope(&admin, FilterData::default()).unwrap_err(), AuthzError::TenantRequired);
    }

    #[test]
    fn platform_scope_allows_unscoped_admin_only() {
        let admin = scoped(Role::SuperAdmin, None);
        let filter = with_platform_scope(&admin, FilterData::by_id("rec-b")).unwrap();
        assert_eq!(filter, FilterData::by_id("rec-b"));
        assert_eq!(run(filter).len(), 1);

        let scoped_admin = scoped(Role::Admin, Some("A"));
        let filter = with_platform_scope(&scoped_admin, FilterData::default()).unwrap();
        assert_eq!(filter.where_clause, Some(json!({ "tenant_id": "A" })));
    }

    #[test]
    fn scopes_on_alternate_column() {
        let session = scoped(Role::Admin, Some("A"));
        let filter = with_platform_scope_on(&session, "id", FilterData::default()).unwrap();
        assert_eq!(filter.where_clause, Some(json!({ "id": "A" })));
    }
}
