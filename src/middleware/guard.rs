use axum::{
    extract::{MatchedPath, Path, Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;

use crate::authz::{Action, AuthzError, TenantParams};
use crate::error::ApiError;
use crate::resource::Resource;
use crate::state::AppState;
use crate::types::Operation;

use super::session::CurrentSession;

/// Route layer evaluating the policy table once per request. On success the
/// `AuthContext` is inserted for the handler.
pub async fn guard_middleware(
    State(state): State<AppState>,
    matched: MatchedPath,
    params: Option<Path<HashMap<String, String>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let params = params.map(|Path(p)| p).unwrap_or_default();
    let session = request.extensions().get::<CurrentSession>().and_then(|c| c.0.as_ref());

    // Anonymous callers learn nothing about which routes or resources exist
    if session.is_none() {
        tracing::debug!(path = matched.as_str(), "unauthenticated request");
        return Err(AuthzError::Unauthenticated.into());
    }

    let action = route_action(request.method(), matched.as_str(), &params)?;
    let tenant_params = TenantParams::from_request(request.uri(), request.headers());
    let ctx = state.guard.authorize(session, &tenant_params, action)?;

    if state.config.security.enable_audit_logging && action.operation != Operation::View {
        tracing::info!(
            target: "audit",
            user_id = %ctx.session().user_id,
            impersonator_id = ?ctx.session().impersonator_id,
            tenant_id = ?ctx.tenant_id(),
            action = %action,
            "authorized write"
        );
    }

    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

/// The policy action a guarded route performs.
pub fn route_action(method: &Method, matched_path: &str, params: &HashMap<String, String>) -> Result<Action, AuthzError> {
    use Operation::*;

    let data_resource = || {
        params
            .get("resource")
            .and_then(|r| Resource::parse_data(r))
            .ok_or_else(|| AuthzError::not_found("Unknown resource"))
    };

    let action = match (method.as_str(), matched_path) {
        ("GET", "/api/session") => Action::new(Resource::Session, View),

        ("GET", "/api/data/:resource") => Action::new(data_resource()?, View),
        ("POST", "/api/data/:resource") => Action::new(data_resource()?, Create),
        ("GET", "/api/data/:resource/:id") => Action::new(data_resource()?, View),
        ("PATCH" | "PUT", "/api/data/:resource/:id") => Action::new(data_resource()?, Update),
        ("DELETE", "/api/data/:resource/:id") => Action::new(data_resource()?, Delete),
        ("POST", "/api/data/:resource/:id/:action") => {
            let operation = params
                .get("action")
                .and_then(|a| Operation::from_record_action(a))
                .ok_or_else(|| AuthzError::not_found("Unknown record action"))?;
            Action::new(data_resource()?, operation)
        }
        ("POST", "/api/find/:resource") => Action::new(data_resource()?, View),

        ("GET", "/api/reports/summary") => Action::new(Resource::Reports, View),

        ("GET", "/api/admin/tenants") => Action::new(Resource::Tenants, View),
        ("POST", "/api/admin/tenants") => Action::new(Resource::Tenants, Create),
        ("PUT", "/api/admin/users/:id/permissions") => Action::new(Resource::Users, ManagePermissions),
        ("POST", "/api/admin/impersonate/:id") => Action::new(Resource::Users, Impersonate),

        (method, path) => return Err(AuthzError::forbidden(format!("No policy for {} {}", method, path))),
    };
    Ok(action)
}
