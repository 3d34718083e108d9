use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmployeeId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CostCenter(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    Manager,
    Admin,
}

impl OrgRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manager" => Some(Self::Manager),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Read-only reference record sourced from the organization directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgEmployee {
    pub id: EmployeeId,
    pub cost_center: CostCenter,
    pub display_name: String,
}

/// A manager or admin entry in the directory. Multiple managers may share a
/// cost center; a manager may also appear as a plain employee in the same
/// cost center (the self-approval case).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgManager {
    pub id: EmployeeId,
    pub cost_center: CostCenter,
    pub email: String,
    pub display_name: String,
    pub role: OrgRole,
}
