// handlers/session.rs - GET /api/session

use axum::Extension;
use serde::Serialize;

use crate::auth::Session;
use crate::authz::{AuthContext, ResolvedTenant};
use crate::middleware::{ApiResponse, ApiResult};

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub user: Session,
    pub tenant: ResolvedTenant,
    pub is_platform_admin: bool,
    pub permissions: Vec<String>,
}

/// Identity, effective tenant and effective permissions of the caller.
pub async fn whoami(Extension(ctx): Extension<AuthContext>) -> ApiResult<WhoAmI> {
    let session = ctx.scoped.session;
    Ok(ApiResponse::success(WhoAmI {
        permissions: session.effective_permissions().into_iter().collect(),
        is_platform_admin: session.is_platform_admin(),
        tenant: ctx.scoped.tenant,
        user: session,
    }))
}
