use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse-grained job function carried by every session.
///
/// Parsing never fails: names outside the known set become `Unknown`, which the
/// role-permission table maps to an empty permission set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Owner,
    Captain,
    Manager,
    Crew,
    Admin,
    SuperAdmin,
    Unknown(String),
}

impl Role {
    pub const KNOWN: [Role; 6] = [
        Role::Owner,
        Role::Captain,
        Role::Manager,
        Role::Crew,
        Role::Admin,
        Role::SuperAdmin,
    ];

    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "OWNER" => Role::Owner,
            "CAPTAIN" => Role::Captain,
            "MANAGER" => Role::Manager,
            "CREW" => Role::Crew,
            "ADMIN" => Role::Admin,
            "SUPER_ADMIN" | "SUPERADMIN" => Role::SuperAdmin,
            _ => Role::Unknown(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Owner => "OWNER",
            Role::Captain => "CAPTAIN",
            Role::Manager => "MANAGER",
            Role::Crew => "CREW",
            Role::Admin => "ADMIN",
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::Unknown(name) => name,
        }
    }

    /// Platform administrators may act across tenants.
    pub fn is_platform_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::parse(&value)
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Role::parse(value)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_roles_case_insensitively() {
        assert_eq!(Role::parse("owner"), Role::Owner);
        assert_eq!(Role::parse("Super_Admin"), Role::SuperAdmin);
        assert_eq!(Role::parse("super-admin"), Role::SuperAdmin);
        assert_eq!(Role::parse(" CREW "), Role::Crew);
    }

    #[test]
    fn unknown_roles_are_preserved() {
        let role = Role::parse("DECKHAND");
        assert_eq!(role, Role::Unknown("DECKHAND".to_string()));
        assert_eq!(role.as_str(), "DECKHAND");
        assert!(!role.is_platform_admin());
    }

    #[test]
    fn only_admin_roles_are_platform_admins() {
        assert!(Role::Admin.is_platform_admin());
        assert!(Role::SuperAdmin.is_platform_admin());
        assert!(!Role::Owner.is_platform_admin());
        assert!(!Role::Captain.is_platform_admin());
    }

    #[test]
    fn serializes_as_plain_string() {
        let value = serde_json::to_value(Role::Captain).unwrap();
        assert_eq!(value, serde_json::json!("CAPTAIN"));
        let role: Role = serde_json::from_value(serde_json::json!("super_admin")).unwrap();
        assert_eq!(role, Role::SuperAdmin);
    }
}
