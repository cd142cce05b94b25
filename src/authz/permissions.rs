//! Role-permission table and per-user permission overrides.
//!
//! The table is process-wide and immutable once installed. Evaluation is pure:
//! `has_permission` never performs I/O and never fails, it only answers yes or no.

use once_cell::sync::OnceCell;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

use super::role::Role;

/// Permission keys, `<resource>.<verb>`.
pub mod keys {
    pub const EXPENSES_VIEW: &str = "expenses.view";
    pub const EXPENSES_CREATE: &str = "expenses.create";
    pub const EXPENSES_EDIT: &str = "expenses.edit";
    pub const EXPENSES_DELETE: &str = "expenses.delete";
    pub const EXPENSES_APPROVE: &str = "expenses.approve";

    pub const INVENTORY_VIEW: &str = "inventory.view";
    pub const INVENTORY_CREATE: &str = "inventory.create";
    pub const INVENTORY_EDIT: &str = "inventory.edit";
    pub const INVENTORY_DELETE: &str = "inventory.delete";

    pub const MAINTENANCE_VIEW: &str = "maintenance.view";
    pub const MAINTENANCE_CREATE: &str = "maintenance.create";
    pub const MAINTENANCE_EDIT: &str = "maintenance.edit";
    pub const MAINTENANCE_DELETE: &str = "maintenance.delete";

    pub const DOCUMENTS_VIEW: &str = "documents.view";
    pub const DOCUMENTS_CREATE: &str = "documents.create";
    pub const DOCUMENTS_EDIT: &str = "documents.edit";
    pub const DOCUMENTS_DELETE: &str = "documents.delete";

    pub const TASKS_VIEW: &str = "tasks.view";
    pub const TASKS_CREATE: &str = "tasks.create";
    pub const TASKS_EDIT: &str = "tasks.edit";
    pub const TASKS_DELETE: &str = "tasks.delete";

    pub const MESSAGES_VIEW: &str = "messages.view";
    pub const MESSAGES_CREATE: &str = "messages.create";
    pub const MESSAGES_EDIT: &str = "messages.edit";
    pub const MESSAGES_DELETE: &str = "messages.delete";

    pub const USERS_VIEW: &str = "users.view";
    pub const USERS_CREATE: &str = "users.create";
    pub const USERS_EDIT: &str = "users.edit";
    pub const USERS_DELETE: &str = "users.delete";

    pub const REPORTS_VIEW: &str = "reports.view";
    pub const ROLES_MANAGE: &str = "roles.manage";

    // Platform-only
    pub const TENANTS_VIEW: &str = "tenants.view";
    pub const TENANTS_MANAGE: &str = "tenants.manage";
    pub const USERS_IMPERSONATE: &str = "users.impersonate";

    /// Every key granted inside a single tenant.
    pub const TENANT_KEYS: &[&str] = &[
        EXPENSES_VIEW, EXPENSES_CREATE, EXPENSES_EDIT, EXPENSES_DELETE, EXPENSES_APPROVE,
        INVENTORY_VIEW, INVENTORY_CREATE, INVENTORY_EDIT, INVENTORY_DELETE,
        MAINTENANCE_VIEW, MAINTENANCE_CREATE, MAINTENANCE_EDIT, MAINTENANCE_DELETE,
        DOCUMENTS_VIEW, DOCUMENTS_CREATE, DOCUMENTS_EDIT, DOCUMENTS_DELETE,
        TASKS_VIEW, TASKS_CREATE, TASKS_EDIT, TASKS_DELETE,
        MESSAGES_VIEW, MESSAGES_CREATE, MESSAGES_EDIT, MESSAGES_DELETE,
        USERS_VIEW, USERS_CREATE, USERS_EDIT, USERS_DELETE,
        REPORTS_VIEW, ROLES_MANAGE,
    ];

    pub const PLATFORM_KEYS: &[&str] = &[TENANTS_VIEW, TENANTS_MANAGE, USERS_IMPERSONATE];
}

/// `true` for `segment(.segment)+` where a segment is `[a-z0-9_]+`.
pub fn is_valid_key(key: &str) -> bool {
    let mut segments = 0;
    for segment in key.split('.') {
        if segment.is_empty()
            || !segment.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return false;
        }
        segments += 1;
    }
    segments >= 2
}

#[derive(Debug, Error)]
pub enum RoleTableError {
    #[error("Failed to read role permission file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid role permission YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid permission key '{key}' for role {role}")]
    InvalidKey { role: String, key: String },
}

/// Static mapping from role to its default permission set.
#[derive(Debug, Clone, Default)]
pub struct RolePermissionTable {
    roles: HashMap<Role, BTreeSet<String>>,
}

static INSTALLED: OnceCell<RolePermissionTable> = OnceCell::new();

impl RolePermissionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in defaults shipped with the service.
    pub fn defaults() -> Self {
        use keys::*;

        let all_tenant: Vec<&str> = TENANT_KEYS.to_vec();
        let everything: Vec<&str> = TENANT_KEYS.iter().chain(PLATFORM_KEYS).copied().collect();

        Self::new()
            .with_role(Role::SuperAdmin, everything.iter().copied())
            .with_role(
                Role::Admin,
                everything.iter().copied().filter(|k| *k != TENANTS_MANAGE),
            )
            .with_role(Role::Owner, all_tenant.iter().copied())
            .with_role(
                Role::Captain,
                all_tenant
                    .iter()
                    .copied()
                    .filter(|k| *k != ROLES_MANAGE && *k != USERS_DELETE),
            )
            .with_role(
                Role::Manager,
                all_tenant
                    .iter()
                    .copied()
                    .filter(|k| k.ends_with(".view"))
                    .chain([EXPENSES_CREATE, EXPENSES_APPROVE, MESSAGES_CREATE, TASKS_CREATE, TASKS_EDIT]),
            )
            .with_role(
                Role::Crew,
                [
                    EXPENSES_VIEW, EXPENSES_CREATE,
                    INVENTORY_VIEW, INVENTORY_EDIT,
                    MAINTENANCE_VIEW, MAINTENANCE_CREATE,
                    DOCUMENTS_VIEW, DOCUMENTS_CREATE,
                    TASKS_VIEW, TASKS_EDIT,
                    MESSAGES_VIEW, MESSAGES_CREATE,
                ],
            )
    }

    pub fn with_role<I, S>(mut self, role: Role, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles
            .entry(role)
            .or_default()
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    /// Parse a YAML document mapping role names to permission key lists.
    ///
    /// ```yaml
    /// OWNER: [expenses.view, expenses.approve]
    /// CREW:
    ///   - expenses.view
    /// ```
    pub fn from_yaml(source: &str) -> Result<Self, RoleTableError> {
        let raw: HashMap<String, Vec<String>> = serde_yaml::from_str(source)?;
        let mut table = Self::new();
        for (role_name, permissions) in raw {
            if let Some(bad) = permissions.iter().find(|k| !is_valid_key(k)) {
                return Err(RoleTableError::InvalidKey { role: role_name, key: bad.clone() });
            }
            table = table.with_role(Role::parse(&role_name), permissions);
        }
        Ok(table)
    }

    pub fn from_yaml_file(path: &str) -> Result<Self, RoleTableError> {
        let source = std::fs::read_to_string(path).map_err(|source| RoleTableError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&source)
    }

    /// Install the process-wide table. Only the first call wins; later calls get
    /// their table handed back.
    pub fn install(table: RolePermissionTable) -> Result<(), RolePermissionTable> {
        INSTALLED.set(table)
    }

    /// The installed table, or the built-in defaults if nothing was installed.
    pub fn global() -> &'static RolePermissionTable {
        INSTALLED.get_or_init(Self::defaults)
    }

    /// Default permissions for a role; unknown roles get nothing.
    pub fn role_permissions(&self, role: &Role) -> impl Iterator<Item = &str> {
        self.roles.get(role).into_iter().flatten().map(String::as_str)
    }

    pub fn effective_permissions(&self, role: &Role, overrides: &PermissionOverride) -> BTreeSet<String> {
        self.role_permissions(role)
            .chain(overrides.grants.iter().map(String::as_str))
            .filter(|key| !overrides.denials.contains(*key))
            .map(str::to_string)
            .collect()
    }

    /// (role defaults ∪ grants) − denials, membership test only.
    pub fn allows(&self, role: &Role, key: &str, overrides: &PermissionOverride) -> bool {
        if overrides.denials.contains(key) {
            return false;
        }
        overrides.grants.contains(key) || self.roles.get(role).is_some_and(|set| set.contains(key))
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.keys()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OverrideError {
    #[error("Permission override must be a JSON array of strings or a comma separated list")]
    InvalidFormat,

    #[error("Invalid permission key in override: '{0}'")]
    InvalidKey(String),
}

/// Per-user additions and denials layered over the role defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionOverride {
    pub grants: BTreeSet<String>,
    pub denials: BTreeSet<String>,
}

impl PermissionOverride {
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty() && self.denials.is_empty()
    }

    /// Lenient parse used on the authorization path: anything malformed is no override.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(raw) => Self::try_parse(raw).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed permission override: {}", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Strict parse used when an administrator writes an override.
    pub fn try_parse(raw: &str) -> Result<Self, OverrideError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }

        let entries: Vec<String> = if trimmed.starts_with('[') {
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Array(items)) => items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(s),
                        _ => Err(OverrideError::InvalidFormat),
                    })
                    .collect::<Result<_, _>>()?,
                _ => return Err(OverrideError::InvalidFormat),
            }
        } else {
            trimmed.split(',').map(|s| s.trim().to_string()).collect()
        };

        Self::from_entries(entries)
    }

    pub fn from_entries<I, S>(entries: I) -> Result<Self, OverrideError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            let (denied, key) = match entry.strip_prefix('-') {
                Some(key) => (true, key),
                None => (false, entry.strip_prefix('+').unwrap_or(entry)),
            };
            if !is_valid_key(key) {
                return Err(OverrideError::InvalidKey(entry.to_string()));
            }
            if denied {
                out.denials.insert(key.to_string());
            } else {
                out.grants.insert(key.to_string());
            }
        }
        Ok(out)
    }

    /// Canonical serialized form stored on the user record.
    pub fn to_json(&self) -> String {
        let entries: Vec<String> = self
            .grants
            .iter()
            .cloned()
            .chain(self.denials.iter().map(|k| format!("-{}", k)))
            .collect();
        serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string())
    }
}

impl fmt::Display for PermissionOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

/// Evaluate `key` for `role` against the process-wide table.
pub fn has_permission(role: &Role, key: &str, permission_override: Option<&str>) -> bool {
    let overrides = PermissionOverride::parse(permission_override);
    RolePermissionTable::global().allows(role, key, &overrides)
}

#[cfg(test)]
mod tests {
    use super::keys::*;
    use super::*;

    #[test]
    fn crew_cannot_approve_expenses_by_default() {
        assert!(!has_permission(&Role::Crew, EXPENSES_APPROVE, None));
    }

    #[test]
    fn owner_can_approve_expenses_by_default() {
        assert!(has_permission(&Role::Owner, EXPENSES_APPROVE, None));
    }

    #[test]
    fn crew_cannot_approve_in_any_table_that_does_not_grant_it() {
        let table = RolePermissionTable::new()
            .with_role(Role::Crew, [EXPENSES_VIEW, EXPENSES_CREATE])
            .with_role(Role::Owner, [EXPENSES_APPROVE]);
        assert!(!table.allows(&Role::Crew, EXPENSES_APPROVE, &PermissionOverride::default()));
        assert!(!RolePermissionTable::new().allows(&Role::Crew, EXPENSES_APPROVE, &PermissionOverride::default()));
    }

    #[test]
    fn denial_overrides_role_default() {
        assert!(has_permission(&Role::Captain, DOCUMENTS_DELETE, None));
        assert!(!has_permission(&Role::Captain, DOCUMENTS_DELETE, Some("[\"-documents.delete\"]")));
        assert!(!has_permission(&Role::Captain, DOCUMENTS_DELETE, Some("-documents.delete")));
    }

    #[test]
    fn denial_beats_grant_in_same_override() {
        let raw = r#"["expenses.approve", "-expenses.approve"]"#;
        assert!(!has_permission(&Role::Crew, EXPENSES_APPROVE, Some(raw)));
    }

    #[test]
    fn grant_extends_role_default() {
        assert!(has_permission(&Role::Crew, EXPENSES_APPROVE, Some(r#"["expenses.approve"]"#)));
        assert!(has_permission(&Role::Crew, INVENTORY_DELETE, Some("inventory.delete, tasks.delete")));
    }

    #[test]
    fn unknown_role_fails_closed() {
        let role = Role::parse("DECKHAND");
        for key in TENANT_KEYS.iter().chain(PLATFORM_KEYS) {
            assert!(!has_permission(&role, key, None), "unknown role allowed {}", key);
        }
    }

    #[test]
    fn malformed_override_is_ignored_not_permissive() {
        for raw in ["{not json", "[1, 2]", "{\"expenses.approve\": true}", "expenses approve", "[\"Expenses.View\"]"] {
            assert!(PermissionOverride::try_parse(raw).is_err(), "accepted {}", raw);
            assert!(PermissionOverride::parse(Some(raw)).is_empty());
            assert!(!has_permission(&Role::Crew, EXPENSES_APPROVE, Some(raw)));
            // Role defaults still apply
            assert!(has_permission(&Role::Crew, EXPENSES_VIEW, Some(raw)));
        }
    }

    #[test]
    fn malformed_entry_discards_whole_override() {
        // A denial next to a broken entry must not be half-applied as a grant set
        let parsed = PermissionOverride::parse(Some(r#"["expenses.approve", 42]"#));
        assert!(parsed.is_empty());
    }

    #[test]
    fn override_serializes_canonically() {
        let parsed = PermissionOverride::try_parse("tasks.delete,-documents.delete,+inventory.delete").unwrap();
        assert_eq!(parsed.to_json(), r#"["inventory.delete","tasks.delete","-documents.delete"]"#);
        assert_eq!(PermissionOverride::try_parse(&parsed.to_json()).unwrap(), parsed);
    }

    #[test]
    fn platform_keys_are_reserved_for_platform_roles() {
        for role in [Role::Owner, Role::Captain, Role::Manager, Role::Crew] {
            for key in PLATFORM_KEYS {
                assert!(!has_permission(&role, key, None), "{} has {}", role, key);
            }
        }
        assert!(has_permission(&Role::SuperAdmin, TENANTS_MANAGE, None));
        assert!(!has_permission(&Role::Admin, TENANTS_MANAGE, None));
        assert!(has_permission(&Role::Admin, USERS_IMPERSONATE, None));
    }

    #[test]
    fn captain_cannot_manage_roles() {
        assert!(!has_permission(&Role::Captain, ROLES_MANAGE, None));
        assert!(has_permission(&Role::Owner, ROLES_MANAGE, None));
    }

    #[test]
    fn effective_set_applies_grants_and_denials() {
        let table = RolePermissionTable::defaults();
        let overrides = PermissionOverride::try_parse("expenses.approve,-messages.create").unwrap();
        let effective = table.effective_permissions(&Role::Crew, &overrides);
        assert!(effective.contains(EXPENSES_APPROVE));
        assert!(!effective.contains(MESSAGES_CREATE));
        assert!(effective.contains(TASKS_EDIT));
    }

    #[test]
    fn loads_table_from_yaml() {
        let yaml = "OWNER: [expenses.view, expenses.approve]\nDECKHAND:\n  - tasks.view\n";
        let table = RolePermissionTable::from_yaml(yaml).unwrap();
        let none = PermissionOverride::default();
        assert!(table.allows(&Role::Owner, EXPENSES_APPROVE, &none));
        assert!(!table.allows(&Role::Owner, EXPENSES_DELETE, &none));
        assert!(table.allows(&Role::parse("DECKHAND"), TASKS_VIEW, &none));
        assert!(!table.allows(&Role::Crew, TASKS_VIEW, &none));
    }

    #[test]
    fn rejects_yaml_with_invalid_keys() {
        let err = RolePermissionTable::from_yaml("OWNER: [\"not a key\"]").unwrap_err();
        assert!(matches!(err, RoleTableError::InvalidKey { .. }));
    }

    #[test]
    fn validates_keys() {
        assert!(is_valid_key("expenses.view"));
        assert!(is_valid_key("crew_documents.v2.view"));
        assert!(!is_valid_key("expenses"));
        assert!(!is_valid_key("expenses."));
        assert!(!is_valid_key(".view"));
        assert!(!is_valid_key("Expenses.view"));
        assert!(!is_valid_key("expenses.*"));
    }
}
