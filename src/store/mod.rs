// Persistence boundary: transactional store traits, filters, and backends

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::core::errors::CoreError;
use crate::core::models::*;

pub mod memory;
pub mod postgres;

/// Store-level failures. Converted to `CoreError` before crossing the API boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("unique constraint violated on {0}")]
    UniqueViolation(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("transaction already finished")]
    TransactionClosed,

    #[error("injected fault: {0}")]
    Fault(String),
}

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 200;

/// Pagination window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    /// Clamp caller-supplied values into a sane window
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0).max(0),
        }
    }

    /// Apply the window to an already-ordered iterator
    pub fn slice<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChoreFilter {
    pub household_id: HouseholdId,
    pub priority: Option<Priority>,
    pub created_by: Option<UserId>,
    pub page: Page,
}

#[derive(Debug, Clone, Default)]
pub struct AssignmentFilter {
    pub household_id: HouseholdId,
    pub assigned_to: Option<UserId>,
    pub chore_id: Option<ChoreId>,
    pub status: Option<AssignmentStatus>,
    pub due_after: Option<DateTime<Utc>>,
    pub due_before: Option<DateTime<Utc>>,
    pub page: Page,
}

#[derive(Debug, Clone, Default)]
pub struct LedgerFilter {
    pub household_id: HouseholdId,
    pub user_id: Option<UserId>,
    pub entry_type: Option<LedgerType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Page,
}

#[derive(Debug, Clone, Default)]
pub struct RedemptionFilter {
    pub household_id: HouseholdId,
    pub reward_id: Option<RewardId>,
    pub user_id: Option<UserId>,
    pub status: Option<RedemptionStatus>,
    pub page: Page,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub household_id: HouseholdId,
    pub user_id: Option<UserId>,
    pub action: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Page,
}

/// Entry point to the persistent store
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a unit of work. Dropping it without `commit` rolls it back.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// A single atomic unit of work against the store
#[async_trait]
pub trait StoreTx: Send {
    async fn commit(&mut self) -> Result<(), StoreError>;
    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// Serialize first-user detection across concurrent registrations
    async fn lock_registration(&mut self) -> Result<(), StoreError>;
    /// Lock a user row until the end of the transaction and return it
    async fn lock_user(&mut self, id: UserId) -> Result<User, StoreError>;
    /// Lock an assignment row so its status check and update cannot interleave
    async fn lock_assignment(&mut self, id: AssignmentId) -> Result<Assignment, StoreError>;
    /// Lock every assignment of a chore, in id order
    async fn lock_chore_assignments(&mut self, chore_id: ChoreId) -> Result<Vec<Assignment>, StoreError>;
    async fn lock_redemption(&mut self, id: RedemptionId) -> Result<Redemption, StoreError>;

    // Households
    async fn insert_household(&mut self, new: NewHousehold) -> Result<Household, StoreError>;
    async fn household(&mut self, id: HouseholdId) -> Result<Household, StoreError>;
    async fn household_by_invite_code(&mut self, code: &str) -> Result<Household, StoreError>;
    async fn set_invite_code(&mut self, id: HouseholdId, code: &str) -> Result<(), StoreError>;

    // Users
    async fn count_users(&mut self) -> Result<i64, StoreError>;
    async fn insert_user(&mut self, new: NewUser) -> Result<User, StoreError>;
    async fn user(&mut self, id: UserId) -> Result<User, StoreError>;
    async fn user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError>;
    async fn users_by_household(&mut self, household_id: HouseholdId) -> Result<Vec<User>, StoreError>;
    async fn update_user(&mut self, user: &User) -> Result<(), StoreError>;

    // Chores
    async fn insert_chore(&mut self, new: NewChore) -> Result<Chore, StoreError>;
    async fn chore(&mut self, id: ChoreId) -> Result<Chore, StoreError>;
    async fn chores(&mut self, filter: &ChoreFilter) -> Result<Vec<Chore>, StoreError>;
    async fn update_chore(&mut self, chore: &Chore) -> Result<(), StoreError>;
    /// Remove a chore together with its assignments
    async fn delete_chore(&mut self, id: ChoreId) -> Result<(), StoreError>;

    // Assignments
    async fn insert_assignment(&mut self, new: NewAssignment) -> Result<Assignment, StoreError>;
    async fn assignment(&mut self, id: AssignmentId) -> Result<Assignment, StoreError>;
    async fn assignments(&mut self, filter: &AssignmentFilter) -> Result<Vec<Assignment>, StoreError>;
    async fn update_assignment(&mut self, assignment: &Assignment) -> Result<(), StoreError>;
    async fn overdue_assignments(
        &mut self,
        household_id: HouseholdId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Assignment>, StoreError>;

    // Rewards and redemptions
    async fn insert_reward(&mut self, new: NewReward) -> Result<Reward, StoreError>;
    async fn reward(&mut self, id: RewardId) -> Result<Reward, StoreError>;
    async fn rewards(&mut self, household_id: HouseholdId) -> Result<Vec<Reward>, StoreError>;
    async fn update_reward(&mut self, reward: &Reward) -> Result<(), StoreError>;
    async fn delete_reward(&mut self, id: RewardId) -> Result<(), StoreError>;
    async fn insert_redemption(&mut self, new: NewRedemption) -> Result<Redemption, StoreError>;
    async fn redemption(&mut self, id: RedemptionId) -> Result<Redemption, StoreError>;
    async fn redemptions(&mut self, filter: &RedemptionFilter) -> Result<Vec<Redemption>, StoreError>;
    async fn update_redemption(&mut self, redemption: &Redemption) -> Result<(), StoreError>;

    // Ledger (append-only: there is no update or delete)
    async fn insert_ledger_entry(&mut self, new: NewLedgerEntry) -> Result<LedgerEntry, StoreError>;
    async fn ledger_entries(&mut self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, StoreError>;
    async fn balance(&mut self, user_id: UserId) -> Result<Decimal, StoreError>;
    async fn balances(&mut self, household_id: HouseholdId) -> Result<Vec<UserBalance>, StoreError>;

    // Reports
    async fn chore_summaries(
        &mut self,
        household_id: HouseholdId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChoreSummary>, StoreError>;
    /// Per-member ledger totals. The window bounds earned/spent/adjusted; `balance` is all-time.
    async fn earnings(
        &mut self,
        household_id: HouseholdId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<MemberEarnings>, StoreError>;

    // Audit
    async fn insert_audit_log(&mut self, new: NewAuditLog) -> Result<AuditLog, StoreError>;
    async fn audit_logs(&mut self, filter: &AuditFilter) -> Result<Vec<AuditLog>, StoreError>;
}

/// Run a core operation under a deadline.
///
/// On expiry the operation future is dropped, which drops any open transaction
/// and rolls it back; the caller sees `StoreUnavailable`.
pub async fn with_deadline<F, T>(deadline: Duration, operation: F) -> Result<T, CoreError>
where
    F: Future<Output = Result<T, CoreError>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout_ms = deadline.as_millis() as u64, "Store operation timed out");
            Err(CoreError::StoreUnavailable("operation timed out".to_string()))
        }
    }
}
