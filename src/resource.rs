//! Tenant-owned resources and how they are stored.

use serde::Serialize;
use std::fmt;

/// How rows of a table are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteConvention {
    /// `deleted_at` timestamp; the row stays and can be restored
    Soft,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    /// Column compared against the resolved tenant id
    pub tenant_column: &'static str,
    pub delete: DeleteConvention,
}

impl TableSpec {
    pub fn soft_delete(&self) -> bool {
        self.delete == DeleteConvention::Soft
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Expenses,
    Inventory,
    Maintenance,
    Documents,
    Tasks,
    Messages,
    Users,
    Reports,
    Tenants,
    Session,
}

impl Resource {
    /// Resources served by the generic `/api/data/:resource` routes.
    pub const DATA: [Resource; 7] = [
        Resource::Expenses,
        Resource::Inventory,
        Resource::Maintenance,
        Resource::Documents,
        Resource::Tasks,
        Resource::Messages,
        Resource::Users,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "expenses" => Resource::Expenses,
            "inventory" => Resource::Inventory,
            "maintenance" => Resource::Maintenance,
            "documents" => Resource::Documents,
            "tasks" => Resource::Tasks,
            "messages" => Resource::Messages,
            "users" => Resource::Users,
            "reports" => Resource::Reports,
            "tenants" => Resource::Tenants,
            "session" => Resource::Session,
            _ => return None,
        })
    }

    /// Data resources only; reports, tenants and session have dedicated routes.
    pub fn parse_data(name: &str) -> Option<Self> {
        Self::parse(name).filter(|r| Self::DATA.contains(r))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Expenses => "expenses",
            Resource::Inventory => "inventory",
            Resource::Maintenance => "maintenance",
            Resource::Documents => "documents",
            Resource::Tasks => "tasks",
            Resource::Messages => "messages",
            Resource::Users => "users",
            Resource::Reports => "reports",
            Resource::Tenants => "tenants",
            Resource::Session => "session",
        }
    }

    pub fn table(&self) -> Option<TableSpec> {
        use DeleteConvention::*;

        let (name, tenant_column, delete) = match self {
            Resource::Expenses => ("expenses", "tenant_id", Soft),
            Resource::Inventory => ("inventory_items", "tenant_id", Hard),
            Resource::Maintenance => ("maintenance_logs", "tenant_id", Soft),
            Resource::Documents => ("crew_documents", "tenant_id", Soft),
            Resource::Tasks => ("tasks", "tenant_id", Hard),
            Resource::Messages => ("messages", "tenant_id", Hard),
            Resource::Users => ("users", "tenant_id", Soft),
            Resource::Tenants => ("tenants", "id", Soft),
            Resource::Reports | Resource::Session => return None,
        };
        Some(TableSpec { name, tenant_column, delete })
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_resources_have_tenant_scoped_tables() {
        for resource in Resource::DATA {
            let table = resource.table().unwrap();
            assert_eq!(table.tenant_column, "tenant_id", "{}", resource);
            assert_eq!(Resource::parse_data(resource.as_str()), Some(resource));
        }
    }

    #[test]
    fn non_data_resources_are_not_routable_generically() {
        assert_eq!(Resource::parse_data("tenants"), None);
        assert_eq!(Resource::parse_data("reports"), None);
        assert_eq!(Resource::parse_data("yachts"), None);
    }

    #[test]
    fn delete_conventions() {
        assert!(Resource::Expenses.table().unwrap().soft_delete());
        assert!(Resource::Documents.table().unwrap().soft_delete());
        assert!(!Resource::Tasks.table().unwrap().soft_delete());
        assert!(!Resource::Inventory.table().unwrap().soft_delete());
    }
}
