//! Tenant scoping and permission authorization.

pub mod error;
pub mod permissions;
pub mod policy;
pub mod role;
pub mod scope;
pub mod tenant;

pub use error::AuthzError;
pub use permissions::{has_permission, keys, OverrideError, PermissionOverride, RolePermissionTable, RoleTableError};
pub use policy::{Action, AuthContext, Guard, PolicyRule, PolicyTable, ScopeRequirement};
pub use role::Role;
pub use scope::{scope_filter, with_platform_scope, with_platform_scope_on, with_tenant_scope, with_tenant_scope_on, TenantScope};
pub use tenant::{resolve_tenant, resolve_tenant_or_response, ResolvedTenant, ScopedSession, TenantParams};
