// In-memory store: household scoping, filters, ordering

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use chore_ledger::core::models::*;
use chore_ledger::store::memory::MemoryStore;
use chore_ledger::store::{AssignmentFilter, LedgerFilter, Page, Store, StoreError, StoreTx};

async fn household_with_user(tx: &mut dyn StoreTx, name: &str, email: &str) -> (Household, User) {
    let household = tx
        .insert_household(NewHousehold {
            name: name.to_string(),
            invite_code: None,
        })
        .await
        .unwrap();
    let user = tx
        .insert_user(NewUser {
            household_id: household.id,
            name: name.to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            role: Role::Admin,
            notification_pref_email: true,
            notification_pref_push: false,
        })
        .await
        .unwrap();
    (household, user)
}

fn chore_for(household: &Household, user: &User) -> NewChore {
    NewChore {
        household_id: household.id,
        title: "Laundry".to_string(),
        description: None,
        value: Decimal::from(4),
        priority: Priority::Low,
        auto_approve: false,
        proof_required: false,
        late_penalty_pct: Decimal::ZERO,
        expire_days: None,
        created_by: user.id,
    }
}

fn entry(user: &User, entry_type: LedgerType, amount: i64) -> NewLedgerEntry {
    NewLedgerEntry {
        user_id: user.id,
        entry_type,
        amount: Decimal::from(amount),
        description: None,
        assignment_id: None,
        redemption_id: None,
    }
}

#[tokio::test]
async fn test_assignment_filter_stays_in_household() {
    let store = MemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let (home, alice) = household_with_user(tx.as_mut(), "Home", "alice@example.com").await;
    let (other, bob) = household_with_user(tx.as_mut(), "Other", "bob@example.com").await;

    let ours = tx.insert_chore(chore_for(&home, &alice)).await.unwrap();
    let theirs = tx.insert_chore(chore_for(&other, &bob)).await.unwrap();
    let due = Utc::now() + Duration::days(1);
    for (chore, user) in [(&ours, &alice), (&theirs, &bob)] {
        tx.insert_assignment(NewAssignment {
            chore_id: chore.id,
            assigned_to: user.id,
            due_date: due,
        })
        .await
        .unwrap();
    }

    let found = tx
        .assignments(&AssignmentFilter {
            household_id: home.id,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].chore_id, ours.id);
}

#[tokio::test]
async fn test_assignments_ordered_by_due_date() {
    let store = MemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let (home, alice) = household_with_user(tx.as_mut(), "Home", "alice@example.com").await;
    let chore = tx.insert_chore(chore_for(&home, &alice)).await.unwrap();
    let now = Utc::now();
    for days in [3, 1, 2] {
        tx.insert_assignment(NewAssignment {
            chore_id: chore.id,
            assigned_to: alice.id,
            due_date: now + Duration::days(days),
        })
        .await
        .unwrap();
    }

    let found = tx
        .assignments(&AssignmentFilter {
            household_id: home.id,
            page: Page::new(Some(2), None),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
    assert!(found[0].due_date < found[1].due_date);
    assert_eq!(found[0].due_date, now + Duration::days(1));
}

#[tokio::test]
async fn test_overdue_only_open_work() {
    let store = MemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let (home, alice) = household_with_user(tx.as_mut(), "Home", "alice@example.com").await;
    let chore = tx.insert_chore(chore_for(&home, &alice)).await.unwrap();
    let now = Utc::now();

    let late = tx
        .insert_assignment(NewAssignment {
            chore_id: chore.id,
            assigned_to: alice.id,
            due_date: now - Duration::hours(2),
        })
        .await
        .unwrap();
    let mut done = tx
        .insert_assignment(NewAssignment {
            chore_id: chore.id,
            assigned_to: alice.id,
            due_date: now - Duration::hours(2),
        })
        .await
        .unwrap();
    done.status = AssignmentStatus::Completed;
    done.completed_at = Some(now);
    tx.update_assignment(&done).await.unwrap();
    tx.insert_assignment(NewAssignment {
        chore_id: chore.id,
        assigned_to: alice.id,
        due_date: now + Duration::hours(2),
    })
    .await
    .unwrap();

    let overdue = tx.overdue_assignments(home.id, now).await.unwrap();
    assert_eq!(overdue.iter().map(|a| a.id).collect::<Vec<_>>(), vec![late.id]);
}

#[tokio::test]
async fn test_balance_is_sum_of_entries() {
    let store = MemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let (home, alice) = household_with_user(tx.as_mut(), "Home", "alice@example.com").await;
    tx.insert_ledger_entry(entry(&alice, LedgerType::Earn, 10)).await.unwrap();
    tx.insert_ledger_entry(entry(&alice, LedgerType::Spend, -4)).await.unwrap();
    tx.insert_ledger_entry(entry(&alice, LedgerType::Adjust, 1)).await.unwrap();

    assert_eq!(tx.balance(alice.id).await.unwrap(), Decimal::from(7));
    let balances = tx.balances(home.id).await.unwrap();
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].balance, Decimal::from(7));

    let spends = tx
        .ledger_entries(&LedgerFilter {
            household_id: home.id,
            entry_type: Some(LedgerType::Spend),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(spends.len(), 1);
    assert_eq!(spends[0].amount, Decimal::from(-4));
}

#[tokio::test]
async fn test_balance_of_unknown_user_is_zero() {
    let store = MemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    assert_eq!(tx.balance(999).await.unwrap(), Decimal::ZERO);
}

#[tokio::test]
async fn test_invite_code_lookup() {
    let store = MemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let (home, _) = household_with_user(tx.as_mut(), "Home", "alice@example.com").await;
    tx.set_invite_code(home.id, "abcd1234").await.unwrap();

    assert_eq!(tx.household_by_invite_code("abcd1234").await.unwrap().id, home.id);
    tx.set_invite_code(home.id, "ffff0000").await.unwrap();
    assert!(matches!(
        tx.household_by_invite_code("abcd1234").await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_lock_user_missing() {
    let store = MemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    assert!(matches!(tx.lock_user(42).await, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_second_earn_for_assignment_is_unique_violation() {
    let store = MemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let (_, alice) = household_with_user(tx.as_mut(), "Home", "alice@example.com").await;
    let earn = NewLedgerEntry {
        assignment_id: Some(7),
        ..entry(&alice, LedgerType::Earn, 5)
    };
    tx.insert_ledger_entry(earn.clone()).await.unwrap();

    assert!(matches!(
        tx.insert_ledger_entry(earn).await,
        Err(StoreError::UniqueViolation(_))
    ));
    // other entry types may share the assignment reference
    tx.insert_ledger_entry(NewLedgerEntry {
        assignment_id: Some(7),
        ..entry(&alice, LedgerType::Adjust, -1)
    })
    .await
    .unwrap();
    assert_eq!(tx.balance(alice.id).await.unwrap(), Decimal::from(4));
}

#[tokio::test]
async fn test_second_refund_for_redemption_is_unique_violation() {
    let store = MemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let (_, alice) = household_with_user(tx.as_mut(), "Home", "alice@example.com").await;
    let refund = NewLedgerEntry {
        redemption_id: Some(3),
        ..entry(&alice, LedgerType::Adjust, 2)
    };
    tx.insert_ledger_entry(refund.clone()).await.unwrap();
    assert!(matches!(
        tx.insert_ledger_entry(refund).await,
        Err(StoreError::UniqueViolation(_))
    ));
}

#[tokio::test]
async fn test_delete_chore_takes_its_assignments() {
    let store = MemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let (home, alice) = household_with_user(tx.as_mut(), "Home", "alice@example.com").await;
    let chore = tx.insert_chore(chore_for(&home, &alice)).await.unwrap();
    let assignment = tx
        .insert_assignment(NewAssignment {
            chore_id: chore.id,
            assigned_to: alice.id,
            due_date: Utc::now() + Duration::days(1),
        })
        .await
        .unwrap();
    assert_eq!(tx.lock_chore_assignments(chore.id).await.unwrap().len(), 1);

    tx.delete_chore(chore.id).await.unwrap();
    assert!(matches!(tx.chore(chore.id).await, Err(StoreError::NotFound(_))));
    assert!(matches!(
        tx.lock_assignment(assignment.id).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_chore_summaries_count_by_status() {
    let store = MemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let (home, alice) = household_with_user(tx.as_mut(), "Home", "alice@example.com").await;
    let chore = tx.insert_chore(chore_for(&home, &alice)).await.unwrap();
    let now = Utc::now();
    for (hours, status) in [
        (-2, AssignmentStatus::Pending),
        (2, AssignmentStatus::Pending),
        (-2, AssignmentStatus::Approved),
    ] {
        let mut assignment = tx
            .insert_assignment(NewAssignment {
                chore_id: chore.id,
                assigned_to: alice.id,
                due_date: now + Duration::hours(hours),
            })
            .await
            .unwrap();
        assignment.status = status;
        tx.update_assignment(&assignment).await.unwrap();
    }

    let summaries = tx.chore_summaries(home.id, now).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].pending, 2);
    assert_eq!(summaries[0].approved, 1);
    assert_eq!(summaries[0].overdue, 1);
}

#[tokio::test]
async fn test_earnings_split_by_entry_type() {
    let store = MemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let (home, alice) = household_with_user(tx.as_mut(), "Home", "alice@example.com").await;
    tx.insert_ledger_entry(entry(&alice, LedgerType::Earn, 10)).await.unwrap();
    tx.insert_ledger_entry(entry(&alice, LedgerType::Spend, -4)).await.unwrap();
    tx.insert_ledger_entry(entry(&alice, LedgerType::Adjust, -1)).await.unwrap();

    let all = tx.earnings(home.id, None, None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].earned, Decimal::from(10));
    assert_eq!(all[0].spent, Decimal::from(4));
    assert_eq!(all[0].adjusted, Decimal::from(-1));
    assert_eq!(all[0].balance, Decimal::from(5));

    let future = tx
        .earnings(home.id, Some(Utc::now() + Duration::days(1)), None)
        .await
        .unwrap();
    assert_eq!(future[0].earned, Decimal::ZERO);
    assert_eq!(future[0].balance, Decimal::from(5));
}
