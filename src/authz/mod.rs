//! Authorization model: the static role table, the permission predicate, and
//! the per-entity access guards layered on top of it.
//!
//! Every protected operation goes through [`has_permission`] (or its UI-guard
//! alias [`has_role_access`]) with one of the named allow-lists below, so the
//! authorization surface is auditable in one place. Roles are not ranked:
//! `Super Admin` has power only where an allow-list names it.

pub mod guards;
mod principal;

pub use principal::Principal;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The closed set of roles. Department roles carry no implicit privileges;
/// they matter only where an allow-list (or a KRA definition) names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Role {
    #[serde(rename = "Super Admin")]
    SuperAdmin,
    #[serde(rename = "Admin")]
    Admin,
    #[serde(rename = "HR")]
    Hr,
    #[serde(rename = "Manager")]
    Manager,
    #[serde(rename = "Employee")]
    Employee,
    #[serde(rename = "Backend Developer")]
    BackendDeveloper,
    #[serde(rename = "Frontend Developer")]
    FrontendDeveloper,
    #[serde(rename = "UI/UX Designer")]
    UiUxDesigner,
    #[serde(rename = "QA Engineer")]
    QaEngineer,
    #[serde(rename = "Marketing Executive")]
    MarketingExecutive,
}

impl Role {
    pub const ALL: [Role; 10] = [
        Role::SuperAdmin,
        Role::Admin,
        Role::Hr,
        Role::Manager,
        Role::Employee,
        Role::BackendDeveloper,
        Role::FrontendDeveloper,
        Role::UiUxDesigner,
        Role::QaEngineer,
        Role::MarketingExecutive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "Super Admin",
            Role::Admin => "Admin",
            Role::Hr => "HR",
            Role::Manager => "Manager",
            Role::Employee => "Employee",
            Role::BackendDeveloper => "Backend Developer",
            Role::FrontendDeveloper => "Frontend Developer",
            Role::UiUxDesigner => "UI/UX Designer",
            Role::QaEngineer => "QA Engineer",
            Role::MarketingExecutive => "Marketing Executive",
        }
    }

    /// Exact, case-sensitive match. Unknown or differently-cased names do not
    /// resolve to a role.
    pub fn parse(s: &str) -> Option<Role> {
        Role::ALL.iter().copied().find(|role| role.as_str() == s)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership test against an explicit allow-list. Pure and total: an absent
/// role (unauthenticated caller) is denied for every list.
pub fn has_permission(role: Option<Role>, allowed: &[Role]) -> bool {
    role.map_or(false, |role| allowed.contains(&role))
}

/// Alias of [`has_permission`] kept for guard call sites that mirror the
/// navigation layer's naming. Must behave identically.
pub fn has_role_access(role: Option<Role>, allowed: &[Role]) -> bool {
    has_permission(role, allowed)
}

/// Named allow-lists. Manager entries grant nothing by themselves for
/// record-scoped entities; the guards additionally require the
/// `manager_id` back-reference to match.
pub mod allow {
    use super::Role::{self, *};

    /// May browse the employee directory (Manager narrowed to direct reports).
    pub const EMPLOYEE_VIEWERS: &[Role] = &[SuperAdmin, Admin, Hr, Manager];
    /// May create, update, and deactivate employee records.
    pub const EMPLOYEE_MANAGERS: &[Role] = &[SuperAdmin, Admin, Hr];
    /// May approve or reject any leave request regardless of reporting line.
    pub const LEAVE_APPROVERS: &[Role] = &[Hr, SuperAdmin, Admin];
    /// May edit, delete, and directly set status on any task.
    pub const TASK_EDITORS: &[Role] = &[SuperAdmin, Admin, Manager, Hr];
    /// May view and update payslips (Manager narrowed to direct reports).
    pub const PAYSLIP_VIEWERS: &[Role] = &[SuperAdmin, Admin, Manager, Hr];
    /// May delete payslips.
    pub const PAYSLIP_DELETERS: &[Role] = &[SuperAdmin, Admin];
    /// May read KRA submissions of any employee.
    pub const KRA_REVIEWERS: &[Role] = &[Hr, Admin, SuperAdmin];
    /// May create and update KRA definitions.
    pub const KRA_DEFINITION_MANAGERS: &[Role] = &[SuperAdmin, Admin, Hr];
    /// May trigger the KPI metric calculation job.
    pub const METRIC_CALCULATORS: &[Role] = &[SuperAdmin, Admin];
    /// May read calculated KPI metrics.
    pub const METRIC_VIEWERS: &[Role] = &[SuperAdmin, Admin, Hr, Manager];
    /// May override per-role menu visibility.
    pub const MENU_ADMINS: &[Role] = &[SuperAdmin, Admin];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_is_membership_over_the_full_role_table() {
        let lists: [&[Role]; 6] = [
            allow::EMPLOYEE_MANAGERS,
            allow::LEAVE_APPROVERS,
            allow::TASK_EDITORS,
            allow::PAYSLIP_DELETERS,
            allow::METRIC_CALCULATORS,
            &[],
        ];

        for role in Role::ALL {
            for list in lists {
                assert_eq!(
                    has_permission(Some(role), list),
                    list.contains(&role),
                    "{role} vs {list:?}"
                );
            }
        }
    }

    #[test]
    fn alias_matches_predicate_everywhere() {
        for role in Role::ALL {
            for list in [allow::TASK_EDITORS, allow::PAYSLIP_VIEWERS, &[][..]] {
                assert_eq!(
                    has_role_access(Some(role), list),
                    has_permission(Some(role), list)
                );
            }
        }
    }

    #[test]
    fn missing_role_is_denied_for_every_list() {
        assert!(!has_permission(None, allow::EMPLOYEE_MANAGERS));
        assert!(!has_permission(None, allow::TASK_EDITORS));
        assert!(!has_permission(None, &Role::ALL));
        assert!(!has_permission(None, &[]));
    }

    #[test]
    fn parse_round_trips_and_is_case_sensitive() {
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("hr"), None);
        assert_eq!(Role::parse("super admin"), None);
        assert_eq!(Role::parse("ADMIN"), None);
        assert_eq!(Role::parse("Intern"), None);
    }

    #[test]
    fn no_implicit_superuser_bypass() {
        // Super Admin is denied wherever the allow-list does not name it.
        assert!(!has_permission(Some(Role::SuperAdmin), &[Role::Hr, Role::Manager]));
    }
}
