// Ledger invariants, atomicity and audit absorption

use rust_decimal::Decimal;

use chore_ledger::core::errors::CoreError;
use chore_ledger::core::models::*;
use chore_ledger::service::ledger::LedgerQuery;
use chore_ledger::service::max_amount;

use crate::common::*;

#[tokio::test]
async fn test_balance_equals_sum_of_entries() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;

    let (_, first) = app.chore(&admin, worker.id(), dec(12), tomorrow(), |c| c.auto_approve = true).await;
    app.services
        .assignments
        .complete(&worker.claims, first.id, dec(100), None)
        .await
        .unwrap();
    app.credit(&admin, worker.id(), Decimal::new(-250, 2)).await;
    let reward = app.reward(&admin, dec(4)).await;
    app.services.rewards.redeem(&worker.claims, reward.id).await.unwrap();

    let entries = app
        .services
        .ledger
        .entries(&worker.claims, LedgerQuery::default())
        .await
        .unwrap();
    let sum: Decimal = entries.iter().map(|e| e.amount).sum();
    assert_eq!(entries.len(), 3);
    assert_eq!(sum, Decimal::new(550, 2));
    assert_eq!(app.balance(&worker).await, sum);

    let kinds: Vec<LedgerType> = entries.iter().map(|e| e.entry_type).collect();
    assert_eq!(kinds, vec![LedgerType::Earn, LedgerType::Adjust, LedgerType::Spend]);
}

#[tokio::test]
async fn test_failed_ledger_write_rolls_back_approval() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;
    let (_, assignment) = app.chore(&admin, worker.id(), dec(5), tomorrow(), |_| {}).await;
    app.services
        .assignments
        .complete(&worker.claims, assignment.id, dec(100), None)
        .await
        .unwrap();

    app.store.fail_ledger_writes(true);
    let result = app.services.assignments.approve(&admin.claims, assignment.id, None).await;
    assert!(matches!(result, Err(CoreError::StoreUnavailable(_))));
    app.store.fail_ledger_writes(false);

    let view = app.services.assignments.get(&admin.claims, assignment.id).await.unwrap();
    assert_eq!(view.assignment.status, AssignmentStatus::Completed);
    assert!(view.assignment.approved_at.is_none());
    assert_eq!(app.balance(&worker).await, Decimal::ZERO);

    // The same approval goes through once the store recovers
    app.services.assignments.approve(&admin.claims, assignment.id, None).await.unwrap();
    assert_eq!(app.balance(&worker).await, dec(5));
}

#[tokio::test]
async fn test_failed_ledger_write_rolls_back_auto_approve() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;
    let (_, assignment) = app.chore(&admin, worker.id(), dec(5), tomorrow(), |c| c.auto_approve = true).await;

    app.store.fail_ledger_writes(true);
    let result = app
        .services
        .assignments
        .complete(&worker.claims, assignment.id, dec(100), None)
        .await;
    assert!(result.is_err());
    app.store.fail_ledger_writes(false);

    let view = app.services.assignments.get(&worker.claims, assignment.id).await.unwrap();
    assert_eq!(view.assignment.status, AssignmentStatus::Pending);
}

#[tokio::test]
async fn test_audit_failure_does_not_fail_operation() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;
    let (_, assignment) = app.chore(&admin, worker.id(), dec(7), tomorrow(), |_| {}).await;
    app.services
        .assignments
        .complete(&worker.claims, assignment.id, dec(100), None)
        .await
        .unwrap();

    app.store.fail_audit_writes(true);
    let outcome = app.services.assignments.approve(&admin.claims, assignment.id, None).await;
    assert!(outcome.is_ok());
    assert_eq!(app.balance(&worker).await, dec(7));

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    app.store.fail_audit_writes(false);
    assert!(app.wait_for_audit(&admin, "assignment_approved").await.is_empty());
}

#[tokio::test]
async fn test_approval_is_audited() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;
    let (_, assignment) = app.chore(&admin, worker.id(), dec(7), tomorrow(), |_| {}).await;
    app.services
        .assignments
        .complete(&worker.claims, assignment.id, dec(100), None)
        .await
        .unwrap();
    app.services.assignments.approve(&admin.claims, assignment.id, None).await.unwrap();

    let logs = app.wait_for_audit(&admin, "assignment_approved").await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].user_id, admin.id());
    assert_eq!(logs[0].details["assignment_id"], assignment.id);
}

#[tokio::test]
async fn test_adjustment_needs_description_and_amount() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;

    let blank = app
        .services
        .ledger
        .adjust_balance(&admin.claims, worker.id(), dec(3), "   ")
        .await;
    assert!(matches!(blank, Err(CoreError::Validation(_))));

    let zero = app
        .services
        .ledger
        .adjust_balance(&admin.claims, worker.id(), Decimal::ZERO, "nothing")
        .await;
    assert!(matches!(zero, Err(CoreError::Validation(_))));

    let by_worker = app
        .services
        .ledger
        .adjust_balance(&worker.claims, worker.id(), dec(100), "bonus")
        .await;
    assert!(matches!(by_worker, Err(CoreError::Forbidden(_))));
    assert_eq!(app.balance(&worker).await, Decimal::ZERO);
}

#[tokio::test]
async fn test_worker_cannot_read_others_balance() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;
    app.credit(&admin, worker.id(), dec(4)).await;

    let own = app.services.ledger.balance(&worker.claims, Some(worker.id())).await.unwrap();
    assert_eq!(own.balance, dec(4));
    let theirs = app.services.ledger.balance(&worker.claims, Some(admin.id())).await;
    assert!(matches!(theirs, Err(CoreError::Forbidden(_))));

    let by_admin = app.services.ledger.balance(&admin.claims, Some(worker.id())).await.unwrap();
    assert_eq!(by_admin.balance, dec(4));

    let balances = app.services.ledger.household_balances(&admin.claims).await.unwrap();
    assert_eq!(balances.len(), 2);
}

#[tokio::test]
async fn test_unavailable_store_reports_store_unavailable() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;

    app.store.set_unavailable(true);
    let result = app.services.ledger.balance(&admin.claims, None).await;
    assert!(matches!(result, Err(CoreError::StoreUnavailable(_))));
    app.store.set_unavailable(false);
    assert!(app.services.ledger.balance(&admin.claims, None).await.is_ok());
}

#[tokio::test]
async fn test_adjustment_rejects_sub_cent_and_oversized_amounts() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;

    for amount in [
        Decimal::new(1, 3),
        Decimal::new(1005, 3),
        Decimal::new(-25, 3),
        Decimal::new(1_000_000_000_000, 2),
        Decimal::MAX,
    ] {
        let result = app
            .services
            .ledger
            .adjust_balance(&admin.claims, worker.id(), amount, "correction")
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))), "{} accepted", amount);
    }
    assert_eq!(app.balance(&worker).await, Decimal::ZERO);

    // trailing zeros are not extra precision
    let entry = app
        .services
        .ledger
        .adjust_balance(&admin.claims, worker.id(), Decimal::new(12_500, 3), "correction")
        .await
        .unwrap();
    assert_eq!(entry.amount, Decimal::new(1250, 2));
    app.services
        .ledger
        .adjust_balance(&admin.claims, worker.id(), max_amount(), "correction")
        .await
        .unwrap();
}
