//! Declarative authorization policy.
//!
//! Every guarded route maps to an [`Action`]; the [`PolicyTable`] maps each action
//! to the permission key and tenant scope it needs. The [`Guard`] evaluates that
//! once per request, so handlers never repeat permission checks inline.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::auth::Session;
use crate::resource::Resource;
use crate::types::Operation;

use super::error::AuthzError;
use super::permissions::keys;
use super::tenant::{resolve_tenant, ScopedSession, TenantParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Action {
    pub resource: Resource,
    pub operation: Operation,
}

impl Action {
    pub const fn new(resource: Resource, operation: Operation) -> Self {
        Self { resource, operation }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.operation)
    }
}

/// What the resolved tenant must look like for a rule to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeRequirement {
    /// Any authenticated session, scoped or not
    Session,
    /// A concrete tenant must be resolved
    Tenant,
    /// Platform admins only; an unscoped session is allowed
    Platform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PolicyRule {
    pub permission: Option<&'static str>,
    pub scope: ScopeRequirement,
}

impl PolicyRule {
    const fn tenant(permission: &'static str) -> Self {
        Self { permission: Some(permission), scope: ScopeRequirement::Tenant }
    }

    const fn platform(permission: &'static str) -> Self {
        Self { permission: Some(permission), scope: ScopeRequirement::Platform }
    }
}

#[derive(Debug, Default)]
pub struct PolicyTable {
    rules: BTreeMap<Action, PolicyRule>,
}

static POLICY: Lazy<PolicyTable> = Lazy::new(PolicyTable::defaults);

impl PolicyTable {
    pub fn global() -> &'static PolicyTable {
        &POLICY
    }

    pub fn defaults() -> Self {
        use Operation::*;

        let mut table = Self::default();

        for resource in Resource::DATA {
            let prefix = resource.as_str();
            let key = |verb: &str| permission_key(prefix, verb);
            table.insert(Action::new(resource, View), PolicyRule::tenant(key("view")));
            table.insert(Action::new(resource, Create), PolicyRule::tenant(key("create")));
            table.insert(Action::new(resource, Update), PolicyRule::tenant(key("edit")));
            table.insert(Action::new(resource, Delete), PolicyRule::tenant(key("delete")));
            if resource.table().is_some_and(|t| t.soft_delete()) {
                // Undoing a delete needs the same right as doing it
                table.insert(Action::new(resource, Restore), PolicyRule::tenant(key("delete")));
            }
        }

        table.insert(Action::new(Resource::Expenses, Approve), PolicyRule::tenant(keys::EXPENSES_APPROVE));
        table.insert(Action::new(Resource::Reports, View), PolicyRule::tenant(keys::REPORTS_VIEW));
        table.insert(Action::new(Resource::Users, ManagePermissions), PolicyRule::tenant(keys::ROLES_MANAGE));

        table.insert(Action::new(Resource::Users, Impersonate), PolicyRule::platform(keys::USERS_IMPERSONATE));
        table.insert(Action::new(Resource::Tenants, View), PolicyRule::platform(keys::TENANTS_VIEW));
        table.insert(Action::new(Resource::Tenants, Create), PolicyRule::platform(keys::TENANTS_MANAGE));

        table.insert(
            Action::new(Resource::Session, View),
            PolicyRule { permission: None, scope: ScopeRequirement::Session },
        );

        table
    }

    fn insert(&mut self, action: Action, rule: PolicyRule) {
        self.rules.insert(action, rule);
    }

    pub fn rule(&self, action: &Action) -> Option<&PolicyRule> {
        self.rules.get(action)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Action, &PolicyRule)> {
        self.rules.iter()
    }
}

/// Map a resource prefix and verb to the matching constant in [`keys`].
fn permission_key(prefix: &str, verb: &str) -> &'static str {
    keys::TENANT_KEYS
        .iter()
        .copied()
        .find(|k| k.strip_prefix(prefix).and_then(|rest| rest.strip_prefix('.')) == Some(verb))
        // Unmatched keys never appear in any role set, so the rule denies
        .unwrap_or("unmapped.permission")
}

/// Outcome of a successful authorization, attached to the request for handlers.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    #[serde(flatten)]
    pub scoped: ScopedSession,
    pub action: Action,
}

impl AuthContext {
    pub fn session(&self) -> &Session {
        &self.scoped.session
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.scoped.tenant_id()
    }

    /// Secondary check inside a handler for field-level rules.
    pub fn allows(&self, key: &str) -> bool {
        self.scoped.session.has_permission(key)
    }
}

/// Central guard: one evaluation per request against the policy table.
#[derive(Debug, Clone, Copy)]
pub struct Guard {
    policy: &'static PolicyTable,
}

impl Default for Guard {
    fn default() -> Self {
        Self { policy: PolicyTable::global() }
    }
}

impl Guard {
    pub fn new(policy: &'static PolicyTable) -> Self {
        Self { policy }
    }

    /// Session, then tenant, then rule lookup, scope requirement and permission.
    pub fn authorize(&self, session: Option<&Session>, params: &TenantParams, action: Action) -> Result<AuthContext, AuthzError> {
        let result = self.evaluate(session, params, action);

        match &result {
            Ok(ctx) => tracing::debug!(
                user_id = %ctx.session().user_id,
                tenant_id = ?ctx.tenant_id(),
                action = %action,
                "authorized"
            ),
            Err(err) => tracing::warn!(
                user_id = session.map(|s| s.user_id.as_str()).unwrap_or("-"),
                role = session.map(|s| s.role.as_str()).unwrap_or("-"),
                action = %action,
                reason = %err,
                "authorization denied"
            ),
        }

        result
    }

    fn evaluate(&self, session: Option<&Session>, params: &TenantParams, action: Action) -> Result<AuthContext, AuthzError> {
        let tenant = resolve_tenant(session, params)?;
        let session = session.ok_or(AuthzError::Unauthenticated)?;

        let rule = self
            .policy
            .rule(&action)
            .ok_or_else(|| AuthzError::forbidden(format!("{} is not permitted", action)))?;

        match rule.scope {
            ScopeRequirement::Session => {}
            ScopeRequirement::Tenant => {
                if tenant.is_unscoped() {
                    return Err(AuthzError::TenantRequired);
                }
            }
            ScopeRequirement::Platform => {
                if !session.is_platform_admin() {
                    return Err(AuthzError::forbidden(format!("{} requires a platform administrator", action)));
                }
            }
        }

        if let Some(key) = rule.permission {
            if !session.has_permission(key) {
                return Err(AuthzError::forbidden(format!("Missing permission {}", key)));
            }
        }

        Ok(AuthContext {
            scoped: ScopedSession { session: session.clone(), tenant },
            action,
        })
    }
}
