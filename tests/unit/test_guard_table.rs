// Role table: which roles may perform which operations

use chore_ledger::auth::guard::{authorize, check, is_admin_or_manager, Operation, RoleSet};
use chore_ledger::auth::token::{Claims, ISSUER};
use chore_ledger::core::errors::CoreError;
use chore_ledger::core::models::Role;

const MANAGEMENT: [Operation; 16] = [
    Operation::ListMembers,
    Operation::RegenerateInvite,
    Operation::SetRole,
    Operation::CreateChore,
    Operation::UpdateChore,
    Operation::DeleteChore,
    Operation::ApproveAssignment,
    Operation::RejectAssignment,
    Operation::CreateReward,
    Operation::UpdateReward,
    Operation::DeleteReward,
    Operation::ApproveRedemption,
    Operation::RejectRedemption,
    Operation::ViewHouseholdBalances,
    Operation::AdjustBalance,
    Operation::ViewReports,
];

const EVERYONE: [Operation; 16] = [
    Operation::RefreshToken,
    Operation::ViewProfile,
    Operation::UpdateProfile,
    Operation::ListChores,
    Operation::ViewChore,
    Operation::ListAssignments,
    Operation::ViewAssignment,
    Operation::ViewOverdue,
    Operation::ReportProgress,
    Operation::CompleteAssignment,
    Operation::ListRewards,
    Operation::ViewReward,
    Operation::Redeem,
    Operation::ListRedemptions,
    Operation::ViewLedger,
    Operation::ViewBalance,
];

fn claims(role: Role) -> Claims {
    Claims {
        user_id: 7,
        household_id: 3,
        role,
        email: "member@example.com".to_string(),
        iss: ISSUER.to_string(),
        sub: "7".to_string(),
        iat: 0,
        exp: i64::MAX,
    }
}

#[test]
fn test_management_operations_need_admin_or_manager() {
    for role in Role::ALL {
        for operation in MANAGEMENT {
            let result = authorize(&claims(role), operation);
            if is_admin_or_manager(role) {
                assert!(result.is_ok(), "{:?} should allow {}", operation, role);
            } else {
                assert!(
                    matches!(result, Err(CoreError::Forbidden(_))),
                    "{:?} should refuse {}",
                    operation,
                    role
                );
            }
        }
    }
}

#[test]
fn test_audit_log_is_management_only() {
    assert!(authorize(&claims(Role::Worker), Operation::ViewAuditLog).is_err());
    assert!(authorize(&claims(Role::Observer), Operation::ViewAuditLog).is_err());
    assert!(authorize(&claims(Role::Manager), Operation::ViewAuditLog).is_ok());
}

#[test]
fn test_member_operations_open_to_every_role() {
    for role in Role::ALL {
        for operation in EVERYONE {
            assert!(
                authorize(&claims(role), operation).is_ok(),
                "{:?} should allow {}",
                operation,
                role
            );
        }
    }
}

#[test]
fn test_system_admin_counts_as_admin_or_manager() {
    assert!(is_admin_or_manager(Role::SystemAdmin));
    assert!(is_admin_or_manager(Role::Admin));
    assert!(is_admin_or_manager(Role::Manager));
    assert!(!is_admin_or_manager(Role::Worker));
    assert!(!is_admin_or_manager(Role::Observer));
}

#[test]
fn test_check_without_claims() {
    assert!(matches!(
        check(None, RoleSet::ANY_AUTHENTICATED),
        Err(CoreError::Unauthenticated)
    ));
}
