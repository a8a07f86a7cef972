// Role-based authorization: one allowed-role set per operation

use crate::auth::token::Claims;
use crate::core::errors::CoreError;
use crate::core::models::Role;

/// Closed set of roles allowed to perform an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleSet(&'static [Role]);

impl RoleSet {
    pub const ANY_AUTHENTICATED: RoleSet = RoleSet(&Role::ALL);
    pub const ADMIN_OR_MANAGER: RoleSet = RoleSet(&[Role::SystemAdmin, Role::Admin, Role::Manager]);
    pub const SYSTEM_ADMIN: RoleSet = RoleSet(&[Role::SystemAdmin]);

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn roles(&self) -> &'static [Role] {
        self.0
    }
}

/// Every protected operation. `required_roles` is the authorization table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    RefreshToken,
    ViewProfile,
    UpdateProfile,
    ListMembers,
    RegenerateInvite,
    SetRole,
    ListChores,
    ViewChore,
    CreateChore,
    UpdateChore,
    DeleteChore,
    ListAssignments,
    ViewAssignment,
    ViewOverdue,
    ReportProgress,
    CompleteAssignment,
    ApproveAssignment,
    RejectAssignment,
    ListRewards,
    ViewReward,
    CreateReward,
    UpdateReward,
    DeleteReward,
    Redeem,
    ListRedemptions,
    ApproveRedemption,
    RejectRedemption,
    ViewLedger,
    ViewBalance,
    ViewHouseholdBalances,
    AdjustBalance,
    ViewAuditLog,
    ViewReports,
}

impl Operation {
    pub fn required_roles(self) -> RoleSet {
        use Operation::*;
        match self {
            RefreshToken | ViewProfile | UpdateProfile => RoleSet::ANY_AUTHENTICATED,
            ListChores | ViewChore => RoleSet::ANY_AUTHENTICATED,
            ListAssignments | ViewAssignment | ViewOverdue => RoleSet::ANY_AUTHENTICATED,
            ReportProgress | CompleteAssignment => RoleSet::ANY_AUTHENTICATED,
            ListRewards | ViewReward | Redeem | ListRedemptions => RoleSet::ANY_AUTHENTICATED,
            ViewLedger | ViewBalance => RoleSet::ANY_AUTHENTICATED,

            ListMembers | RegenerateInvite | SetRole => RoleSet::ADMIN_OR_MANAGER,
            CreateChore | UpdateChore | DeleteChore => RoleSet::ADMIN_OR_MANAGER,
            ApproveAssignment | RejectAssignment => RoleSet::ADMIN_OR_MANAGER,
            CreateReward | UpdateReward | DeleteReward => RoleSet::ADMIN_OR_MANAGER,
            ApproveRedemption | RejectRedemption => RoleSet::ADMIN_OR_MANAGER,
            ViewHouseholdBalances | AdjustBalance | ViewAuditLog | ViewReports => RoleSet::ADMIN_OR_MANAGER,
        }
    }

    pub fn name(self) -> String {
        format!("{:?}", self)
    }
}

/// Succeed iff the caller's role is in the allowed set.
///
/// Missing claims are `Unauthenticated`; a role outside the set is `Forbidden`.
/// Resource ownership is not checked here.
pub fn check(claims: Option<&Claims>, allowed: RoleSet) -> Result<&Claims, CoreError> {
    let claims = claims.ok_or(CoreError::Unauthenticated)?;
    if allowed.contains(claims.role) {
        Ok(claims)
    } else {
        Err(CoreError::Forbidden(format!(
            "role '{}' is not permitted to perform this action",
            claims.role
        )))
    }
}

/// Authorize an operation against its entry in the table
pub fn authorize(claims: &Claims, operation: Operation) -> Result<(), CoreError> {
    check(Some(claims), operation.required_roles()).map(|_| ()).map_err(|e| {
        tracing::debug!(
            user_id = claims.user_id,
            role = %claims.role,
            operation = %operation.name(),
            "Authorization denied"
        );
        e
    })
}

/// True for the roles that manage a household
pub fn is_admin_or_manager(role: Role) -> bool {
    RoleSet::ADMIN_OR_MANAGER.contains(role)
}
