// Business operations. Each one authorizes, runs in a single store
// transaction under a deadline, and audits after commit.

use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::audit_logger::AuditLogger;
use crate::auth::token::{Claims, TokenService};
use crate::core::errors::CoreError;
use crate::core::models::*;
use crate::store::{with_deadline, Store, StoreError, StoreTx};

pub mod accounts;
pub mod assignments;
pub mod chores;
pub mod ledger;
pub mod reports;
pub mod rewards;

pub use accounts::AccountService;
pub use assignments::AssignmentService;
pub use chores::ChoreService;
pub use ledger::LedgerService;
pub use reports::ReportService;
pub use rewards::RewardService;

/// Tunables for the core operations
#[derive(Debug, Clone, Copy)]
pub struct CoreSettings {
    /// Deadline for one operation, transaction included
    pub store_timeout: Duration,
    /// Minimum percent accepted by `complete`
    pub completion_threshold: Decimal,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            completion_threshold: Decimal::ONE_HUNDRED,
        }
    }
}

/// Shared dependencies of every service
pub struct Context {
    pub store: Arc<dyn Store>,
    pub tokens: Arc<TokenService>,
    pub audit: AuditLogger,
    pub settings: CoreSettings,
}

impl Context {
    pub async fn begin(&self) -> Result<Box<dyn StoreTx>, CoreError> {
        Ok(self.store.begin().await?)
    }

    /// Run an operation under the store deadline
    pub async fn run<T, F>(&self, operation: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        with_deadline(self.settings.store_timeout, operation).await
    }

    /// Fire-and-forget audit record for the actor's household
    pub fn audit(&self, actor: &Claims, action: &str, details: serde_json::Value) {
        self.audit.log_action(actor.household_id, actor.user_id, action, details);
    }
}

/// All services over one shared context
#[derive(Clone)]
pub struct Services {
    pub accounts: AccountService,
    pub chores: ChoreService,
    pub assignments: AssignmentService,
    pub rewards: RewardService,
    pub ledger: LedgerService,
    pub reports: ReportService,
}

impl Services {
    pub fn new(store: Arc<dyn Store>, tokens: Arc<TokenService>, settings: CoreSettings) -> Self {
        let audit = AuditLogger::new(store.clone(), settings.store_timeout);
        let ctx = Arc::new(Context { store, tokens, audit, settings });
        Self {
            accounts: AccountService::new(ctx.clone()),
            chores: ChoreService::new(ctx.clone()),
            assignments: AssignmentService::new(ctx.clone()),
            rewards: RewardService::new(ctx.clone()),
            ledger: LedgerService::new(ctx.clone()),
            reports: ReportService::new(ctx),
        }
    }
}

// Household-scoped loaders. Anything outside the caller's household is
// reported as missing.

fn not_found(what: &str) -> impl FnOnce(StoreError) -> CoreError + '_ {
    move |e| match e {
        StoreError::NotFound(_) => CoreError::NotFound(what.to_string()),
        other => other.into(),
    }
}

pub(crate) async fn user_in_household(
    tx: &mut dyn StoreTx,
    user_id: UserId,
    household_id: HouseholdId,
) -> Result<User, CoreError> {
    let user = tx.user(user_id).await.map_err(not_found("user"))?;
    if user.household_id != household_id {
        return Err(CoreError::NotFound("user".to_string()));
    }
    Ok(user)
}

pub(crate) async fn chore_in_household(
    tx: &mut dyn StoreTx,
    chore_id: ChoreId,
    household_id: HouseholdId,
) -> Result<Chore, CoreError> {
    let chore = tx.chore(chore_id).await.map_err(not_found("chore"))?;
    if chore.household_id != household_id {
        return Err(CoreError::NotFound("chore".to_string()));
    }
    Ok(chore)
}

pub(crate) async fn assignment_in_household(
    tx: &mut dyn StoreTx,
    assignment_id: AssignmentId,
    household_id: HouseholdId,
) -> Result<(Assignment, Chore), CoreError> {
    let assignment = tx.assignment(assignment_id).await.map_err(not_found("assignment"))?;
    let chore = tx.chore(assignment.chore_id).await.map_err(not_found("assignment"))?;
    if chore.household_id != household_id {
        return Err(CoreError::NotFound("assignment".to_string()));
    }
    Ok((assignment, chore))
}

/// Load and lock an assignment for a lifecycle transition.
///
/// The row stays locked until the transaction ends, so two transitions on
/// one assignment serialize and the second sees the first one's status.
pub(crate) async fn lock_assignment_in_household(
    tx: &mut dyn StoreTx,
    assignment_id: AssignmentId,
    household_id: HouseholdId,
) -> Result<(Assignment, Chore), CoreError> {
    let assignment = tx.lock_assignment(assignment_id).await.map_err(not_found("assignment"))?;
    let chore = tx.chore(assignment.chore_id).await.map_err(not_found("assignment"))?;
    if chore.household_id != household_id {
        return Err(CoreError::NotFound("assignment".to_string()));
    }
    Ok((assignment, chore))
}

pub(crate) async fn reward_in_household(
    tx: &mut dyn StoreTx,
    reward_id: RewardId,
    household_id: HouseholdId,
) -> Result<Reward, CoreError> {
    let reward = tx.reward(reward_id).await.map_err(not_found("reward"))?;
    if reward.household_id != household_id {
        return Err(CoreError::NotFound("reward".to_string()));
    }
    Ok(reward)
}

/// Load and lock a redemption so approve and reject decide it only once
pub(crate) async fn lock_redemption_in_household(
    tx: &mut dyn StoreTx,
    redemption_id: RedemptionId,
    household_id: HouseholdId,
) -> Result<(Redemption, Reward), CoreError> {
    let redemption = tx.lock_redemption(redemption_id).await.map_err(not_found("redemption"))?;
    let reward = tx.reward(redemption.reward_id).await.map_err(not_found("redemption"))?;
    if reward.household_id != household_id {
        return Err(CoreError::NotFound("redemption".to_string()));
    }
    Ok((redemption, reward))
}

/// Decimal places every stored amount and percentage carries
pub const AMOUNT_SCALE: u32 = 2;

/// Largest magnitude an amount column holds: ten integer digits, two decimals
pub fn max_amount() -> Decimal {
    Decimal::new(999_999_999_999, AMOUNT_SCALE)
}

/// Reject amounts the store would round or overflow
pub(crate) fn validate_amount(field: &str, amount: Decimal) -> Result<(), CoreError> {
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(CoreError::Validation(format!(
            "{} must have at most {} decimal places",
            field, AMOUNT_SCALE
        )));
    }
    if amount.abs() > max_amount() {
        return Err(CoreError::Validation(format!("{} is out of range", field)));
    }
    Ok(())
}

/// Percentages are 0 to 100 with at most two decimal places
pub(crate) fn validate_percent(field: &str, percent: Decimal) -> Result<(), CoreError> {
    if percent < Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
        return Err(CoreError::Validation(format!("{} must be between 0 and 100", field)));
    }
    if percent.normalize().scale() > AMOUNT_SCALE {
        return Err(CoreError::Validation(format!(
            "{} must have at most {} decimal places",
            field, AMOUNT_SCALE
        )));
    }
    Ok(())
}

/// Trimmed, non-empty text
pub(crate) fn required_text(field: &str, value: &str) -> Result<String, CoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

/// Trimmed text, `None` when blank
pub(crate) fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
