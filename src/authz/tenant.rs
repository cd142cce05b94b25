use axum::http::{HeaderMap, Uri};
use serde::{Deserialize, Serialize};

use crate::auth::Session;
use crate::error::ApiError;

use super::error::AuthzError;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const TENANT_QUERY_PARAM: &str = "tenant_id";

/// Tenant selection supplied by the request itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TenantParams {
    pub tenant_id: Option<String>,
}

impl TenantParams {
    pub fn new(tenant_id: Option<&str>) -> Self {
        Self { tenant_id: tenant_id.map(str::to_string) }
    }

    /// Query parameter wins over the header. Blank values count as absent.
    pub fn from_request(uri: &Uri, headers: &HeaderMap) -> Self {
        let from_query = axum::extract::Query::<TenantParams>::try_from_uri(uri)
            .ok()
            .and_then(|q| q.0.tenant_id);
        let from_header = headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self { tenant_id: non_blank(from_query).or_else(|| non_blank(from_header)) }
    }

    pub fn explicit(&self) -> Option<&str> {
        self.tenant_id.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Effective tenant for a request. `tenant_id == None` only ever happens for
/// platform admins and means "unscoped".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTenant {
    pub tenant_id: Option<String>,
    pub is_overridden: bool,
}

impl ResolvedTenant {
    pub fn is_unscoped(&self) -> bool {
        self.tenant_id.is_none()
    }
}

/// A session paired with the tenant it acts on for the current request.
#[derive(Debug, Clone, Serialize)]
pub struct ScopedSession {
    pub session: Session,
    pub tenant: ResolvedTenant,
}

impl ScopedSession {
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant.tenant_id.as_deref()
    }

    pub fn is_platform_admin(&self) -> bool {
        self.session.is_platform_admin()
    }
}

pub fn resolve_tenant(session: Option<&Session>, params: &TenantParams) -> Result<ResolvedTenant, AuthzError> {
    let session = session.ok_or(AuthzError::Unauthenticated)?;
    let platform_admin = session.is_platform_admin();

    if platform_admin {
        if let Some(explicit) = params.explicit() {
            return Ok(ResolvedTenant {
                tenant_id: Some(explicit.to_string()),
                is_overridden: true,
            });
        }
    }

    let own = session
        .tenant_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    if own.is_none() && !platform_admin {
        return Err(AuthzError::TenantRequired);
    }

    Ok(ResolvedTenant { tenant_id: own, is_overridden: false })
}

/// Handler-facing form: either a scoped session or the response to return at once.
pub fn resolve_tenant_or_response(session: Option<&Session>, params: &TenantParams) -> Result<ScopedSession, ApiError> {
    let tenant = resolve_tenant(session, params)?;
    let session = session.cloned().ok_or(AuthzError::Unauthenticated)?;

    if tenant.is_overridden {
        tracing::info!(
            user_id = %session.user_id,
            role = %session.role,
            tenant_id = ?tenant.tenant_id,
            "platform admin acting on explicit tenant"
        );
    }

    Ok(ScopedSession { session, tenant })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::Role;

    fn session(role: Role, tenant: Option<&str>) -> Session {
        Session {
            user_id: "u-1".to_string(),
            email: "someone@example.com".to_string(),
            role,
            tenant_id: tenant.map(str::to_string),
            permissions: None,
            impersonator_id: None,
        }
    }

    #[test]
    fn missing_session_is_unauthenticated() {
        let err = resolve_tenant(None, &TenantParams::new(Some("Y1"))).unwrap_err();
        assert_eq!(err, AuthzError::Unauthenticated);
    }

    #[test]
    fn non_admin_is_pinned_to_own_tenant() {
        let crew = session(Role::Crew, Some("Y1"));
        for param in [None, Some("Y2"), Some("Y1"), Some("")] {
            let resolved = resolve_tenant(Some(&crew), &TenantParams::new(param)).unwrap();
            assert_eq!(resolved.tenant_id.as_deref(), Some("Y1"));
            assert!(!resolved.is_overridden);
        }
    }

    #[test]
    fn every_non_admin_role_ignores_the_param() {
        for role in [Role::Owner, Role::Captain, Role::Manager, Role::Crew, Role::parse("DECKHAND")] {
            let s = session(role, Some("Y1"));
            let resolved = resolve_tenant(Some(&s), &TenantParams::new(Some("Y2"))).unwrap();
            assert_eq!(resolved.tenant_id.as_deref(), Some("Y1"));
        }
    }

    #[test]
    fn admin_override_is_honoured() {
        let admin = session(Role::SuperAdmin, None);
        let resolved = resolve_tenant(Some(&admin), &TenantParams::new(Some("Y2"))).unwrap();
        assert_eq!(resolved.tenant_id.as_deref(), Some("Y2"));
        assert!(resolved.is_overridden);

        let admin_with_home = session(Role::Admin, Some("Y1"));
        let resolved = resolve_tenant(Some(&admin_with_home), &TenantParams::new(Some("Y2"))).unwrap();
        assert_eq!(resolved.tenant_id.as_deref(), Some("Y2"));
        assert!(resolved.is_overridden);
    }

    #[test]
    fn admin_without_param_uses_home_tenant() {
        let admin = session(Role::Admin, Some("Y1"));
        let resolved = resolve_tenant(Some(&admin), &TenantParams::default()).unwrap();
        assert_eq!(resolved.tenant_id.as_deref(), Some("Y1"));
        assert!(!resolved.is_overridden);
    }

    #[test]
    fn admin_without_any_tenant_is_unscoped() {
        let admin = session(Role::SuperAdmin, None);
        let resolved = resolve_tenant(Some(&admin), &TenantParams::new(Some("  "))).unwrap();
        assert!(resolved.is_unscoped());
        assert!(!resolved.is_overridden);
    }

    #[test]
    fn non_admin_without_tenant_requires_one() {
        for tenant in [None, Some(""), Some("   ")] {
            let crew = session(Role::Owner, tenant);
            let err = resolve_tenant(Some(&crew), &TenantParams::new(Some("Y2"))).unwrap_err();
            assert_eq!(err, AuthzError::TenantRequired);
        }
    }

    #[test]
    fn reads_param_from_query_then_header() {
        let mut headers = HeaderMap::new();
        headers.insert(TENANT_HEADER, "H1".parse().unwrap());

        let uri: Uri = "/api/data/expenses?tenant_id=Q1&limit=5".parse().unwrap();
        assert_eq!(TenantParams::from_request(&uri, &headers).explicit(), Some("Q1"));

        let uri: Uri = "/api/data/expenses?tenant_id=".parse().unwrap();
        assert_eq!(TenantParams::from_request(&uri, &headers).explicit(), Some("H1"));

        let uri: Uri = "/api/data/expenses".parse().unwrap();
        assert_eq!(TenantParams::from_request(&uri, &HeaderMap::new()).explicit(), None);
    }

    #[test]
    fn short_circuits_with_api_error() {
        let err = resolve_tenant_or_response(None, &TenantParams::default()).unwrap_err();
        assert_eq!(err.status_code(), 401);

        let crew = session(Role::Crew, None);
        let err = resolve_tenant_or_response(Some(&crew), &TenantParams::default()).unwrap_err();
        assert_eq!(err.status_code(), 400);

        let crew = session(Role::Crew, Some("Y1"));
        let scoped = resolve_tenant_or_response(Some(&crew), &TenantParams::default()).unwrap();
        assert_eq!(scoped.tenant_id(), Some("Y1"));
    }
}
