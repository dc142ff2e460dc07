use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::Role;
use crate::events::{Loggable, Severity};

/// The navigable sections the frontend knows about. Overrides are validated
/// against this set so a typo cannot silently hide or invent a section.
pub const SECTIONS: &[&str] = &[
    "dashboard",
    "employees",
    "attendance",
    "leaves",
    "tasks",
    "payslips",
    "performance",
    "calendar",
    "documents",
    "settings",
];

/// Default visibility per role, used when no admin override is stored.
pub fn default_sections(role: Role) -> Vec<&'static str> {
    match role {
        Role::SuperAdmin | Role::Admin => SECTIONS.to_vec(),
        Role::Hr => vec![
            "dashboard",
            "employees",
            "attendance",
            "leaves",
            "tasks",
            "payslips",
            "performance",
            "calendar",
            "documents",
        ],
        Role::Manager => vec![
            "dashboard",
            "employees",
            "attendance",
            "leaves",
            "tasks",
            "payslips",
            "performance",
            "calendar",
            "documents",
        ],
        _ => vec![
            "dashboard",
            "attendance",
            "leaves",
            "tasks",
            "performance",
            "calendar",
            "documents",
        ],
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MenuResponse {
    pub role: Role,
    pub sections: Vec<String>,
    /// True when the sections come from a stored admin override.
    pub overridden: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MenuOverride {
    pub role: Role,
    pub sections: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for MenuOverride {
    fn entity_type() -> &'static str { "menu_override" }
    fn subject_id(&self) -> Uuid { Uuid::nil() }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbMenuOverride {
    pub role: String,
    pub sections: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MenuOverrideRequest {
    pub sections: Vec<String>,
}
