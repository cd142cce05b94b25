/// Shared types used across the codebase

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operations a request can perform on a resource.
/// Used by the policy table and the route guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    View,
    Create,
    Update,
    Delete,
    Restore,  // Undo soft-delete by clearing deleted_at
    Approve,
    ManagePermissions,
    Impersonate,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::View => "view",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Restore => "restore",
            Operation::Approve => "approve",
            Operation::ManagePermissions => "manage_permissions",
            Operation::Impersonate => "impersonate",
        }
    }

    /// Record actions addressed as `/api/data/:resource/:id/:action`
    pub fn from_record_action(action: &str) -> Option<Self> {
        match action {
            "restore" => Some(Operation::Restore),
            "approve" => Some(Operation::Approve),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
