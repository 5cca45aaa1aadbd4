use crate::core::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant membership role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Accountant,
    Viewer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Owner => write!(f, "owner"),
            Role::Admin => write!(f, "admin"),
            Role::Accountant => write!(f, "accountant"),
            Role::Viewer => write!(f, "viewer"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "accountant" => Ok(Role::Accountant),
            "viewer" => Ok(Role::Viewer),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Capability an actor must hold to run an engine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "allocations.create")]
    AllocationsCreate,
    #[serde(rename = "allocations.reverse")]
    AllocationsReverse,
    #[serde(rename = "allocations.view")]
    AllocationsView,
    #[serde(rename = "reports.view")]
    ReportsView,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::AllocationsCreate => write!(f, "allocations.create"),
            Permission::AllocationsReverse => write!(f, "allocations.reverse"),
            Permission::AllocationsView => write!(f, "allocations.view"),
            Permission::ReportsView => write!(f, "reports.view"),
        }
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "allocations.create" => Ok(Permission::AllocationsCreate),
            "allocations.reverse" => Ok(Permission::AllocationsReverse),
            "allocations.view" => Ok(Permission::AllocationsView),
            "reports.view" => Ok(Permission::ReportsView),
            _ => Err(format!("Invalid permission: {}", s)),
        }
    }
}

/// The user on whose behalf an operation runs.
///
/// Every engine call receives the actor explicitly together with the tenant
/// it targets; nothing is read from ambient request state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: i64,
    pub company_id: i64,
    pub role: Role,
    pub permissions: Vec<Permission>,
    pub active: bool,
}

impl Actor {
    pub fn new(user_id: i64, company_id: i64, role: Role, permissions: Vec<Permission>) -> Self {
        Self {
            user_id,
            company_id,
            role,
            permissions,
            active: true,
        }
    }

    /// Whether the actor holds a capability (owners and admins hold all)
    pub fn can(&self, permission: Permission) -> bool {
        matches!(self.role, Role::Owner | Role::Admin) || self.permissions.contains(&permission)
    }

    /// Checks tenant membership and capability for a mutation or read
    pub fn authorize(&self, company_id: i64, permission: Permission) -> Result<()> {
        if !self.active {
            return Err(AppError::permission(format!(
                "user {} is not an active member of company {}",
                self.user_id, company_id
            )));
        }

        if self.company_id != company_id {
            return Err(AppError::permission(format!(
                "user {} does not belong to company {}",
                self.user_id, company_id
            )));
        }

        if !self.can(permission) {
            return Err(AppError::permission(format!(
                "user {} lacks the {} permission",
                self.user_id, permission
            )));
        }

        Ok(())
    }
}
