// In-memory store with serializable transactions
//
// One transaction runs at a time: `begin` takes the state lock, works on a
// snapshot, and `commit` swaps the snapshot in. Dropping the transaction
// discards the snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::*;

#[derive(Debug, Clone, Default)]
struct State {
    next_id: i64,
    households: BTreeMap<HouseholdId, Household>,
    users: BTreeMap<UserId, User>,
    chores: BTreeMap<ChoreId, Chore>,
    assignments: BTreeMap<AssignmentId, Assignment>,
    rewards: BTreeMap<RewardId, Reward>,
    redemptions: BTreeMap<RedemptionId, Redemption>,
    ledger: Vec<LedgerEntry>,
    audit: Vec<AuditLog>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn chore_household(&self, chore_id: ChoreId) -> Option<HouseholdId> {
        self.chores.get(&chore_id).map(|c| c.household_id)
    }

    fn user_household(&self, user_id: UserId) -> Option<HouseholdId> {
        self.users.get(&user_id).map(|u| u.household_id)
    }

    fn reward_household(&self, reward_id: RewardId) -> Option<HouseholdId> {
        self.rewards.get(&reward_id).map(|r| r.household_id)
    }

    fn balance_of(&self, user_id: UserId) -> Decimal {
        self.ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.amount)
            .sum()
    }
}

/// Fault switches used by tests to exercise rollback and audit absorption
#[derive(Debug, Default)]
struct Faults {
    ledger_writes: AtomicBool,
    audit_writes: AtomicBool,
    unavailable: AtomicBool,
}

/// Process-local store, used for development and tests
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every ledger insert fail until switched off
    pub fn fail_ledger_writes(&self, fail: bool) {
        self.faults.ledger_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every audit insert fail until switched off
    pub fn fail_audit_writes(&self, fail: bool) {
        self.faults.audit_writes.store(fail, Ordering::SeqCst);
    }

    /// Refuse new transactions, as a lost connection would
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        let guard = self.state.clone().lock_owned().await;
        let working = State::clone(&guard);
        Ok(Box::new(MemoryTx {
            guard: Some(guard),
            working,
            faults: self.faults.clone(),
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

pub struct MemoryTx {
    guard: Option<OwnedMutexGuard<State>>,
    working: State,
    faults: Arc<Faults>,
}

impl MemoryTx {
    fn state(&mut self) -> Result<&mut State, StoreError> {
        if self.guard.is_none() {
            return Err(StoreError::TransactionClosed);
        }
        Ok(&mut self.working)
    }
}

fn not_found(what: &str, id: i64) -> StoreError {
    StoreError::NotFound(format!("{} {}", what, id))
}

fn in_window(at: DateTime<Utc>, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> bool {
    from.map(|f| at >= f).unwrap_or(true) && to.map(|t| at <= t).unwrap_or(true)
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(&mut self) -> Result<(), StoreError> {
        let mut guard = self.guard.take().ok_or(StoreError::TransactionClosed)?;
        *guard = std::mem::take(&mut self.working);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.guard.take().ok_or(StoreError::TransactionClosed)?;
        self.working = State::default();
        Ok(())
    }

    async fn lock_registration(&mut self) -> Result<(), StoreError> {
        // Already exclusive: the transaction holds the whole-store lock
        self.state().map(|_| ())
    }

    async fn lock_user(&mut self, id: UserId) -> Result<User, StoreError> {
        self.user(id).await
    }

    async fn lock_assignment(&mut self, id: AssignmentId) -> Result<Assignment, StoreError> {
        self.assignment(id).await
    }

    async fn lock_chore_assignments(&mut self, chore_id: ChoreId) -> Result<Vec<Assignment>, StoreError> {
        Ok(self
            .state()?
            .assignments
            .values()
            .filter(|a| a.chore_id == chore_id)
            .cloned()
            .collect())
    }

    async fn lock_redemption(&mut self, id: RedemptionId) -> Result<Redemption, StoreError> {
        self.redemption(id).await
    }

    async fn insert_household(&mut self, new: NewHousehold) -> Result<Household, StoreError> {
        let state = self.state()?;
        if let Some(code) = &new.invite_code {
            if state.households.values().any(|h| h.invite_code.as_deref() == Some(code)) {
                return Err(StoreError::UniqueViolation("invite_code".to_string()));
            }
        }
        let household = Household {
            id: state.next_id(),
            name: new.name,
            invite_code: new.invite_code,
            created_at: Utc::now(),
        };
        state.households.insert(household.id, household.clone());
        Ok(household)
    }

    async fn household(&mut self, id: HouseholdId) -> Result<Household, StoreError> {
        self.state()?
            .households
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("household", id))
    }

    async fn household_by_invite_code(&mut self, code: &str) -> Result<Household, StoreError> {
        self.state()?
            .households
            .values()
            .find(|h| h.invite_code.as_deref() == Some(code))
            .cloned()
            .ok_or_else(|| StoreError::NotFound("invite code".to_string()))
    }

    async fn set_invite_code(&mut self, id: HouseholdId, code: &str) -> Result<(), StoreError> {
        let state = self.state()?;
        if state
            .households
            .values()
            .any(|h| h.id != id && h.invite_code.as_deref() == Some(code))
        {
            return Err(StoreError::UniqueViolation("invite_code".to_string()));
        }
        let household = state.households.get_mut(&id).ok_or_else(|| not_found("household", id))?;
        household.invite_code = Some(code.to_string());
        Ok(())
    }

    async fn count_users(&mut self) -> Result<i64, StoreError> {
        Ok(self.state()?.users.len() as i64)
    }

    async fn insert_user(&mut self, new: NewUser) -> Result<User, StoreError> {
        let state = self.state()?;
        if state.users.values().any(|u| u.email.eq_ignore_ascii_case(&new.email)) {
            return Err(StoreError::UniqueViolation("email".to_string()));
        }
        if !state.households.contains_key(&new.household_id) {
            return Err(not_found("household", new.household_id));
        }
        let now = Utc::now();
        let user = User {
            id: state.next_id(),
            household_id: new.household_id,
            name: new.name,
            email: new.email,
            password_hash: new.password_hash,
            role: new.role,
            notification_pref_email: new.notification_pref_email,
            notification_pref_push: new.notification_pref_push,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user(&mut self, id: UserId) -> Result<User, StoreError> {
        self.state()?
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("user", id))
    }

    async fn user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .state()?
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn users_by_household(&mut self, household_id: HouseholdId) -> Result<Vec<User>, StoreError> {
        Ok(self
            .state()?
            .users
            .values()
            .filter(|u| u.household_id == household_id)
            .cloned()
            .collect())
    }

    async fn update_user(&mut self, user: &User) -> Result<(), StoreError> {
        let state = self.state()?;
        if state
            .users
            .values()
            .any(|u| u.id != user.id && u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(StoreError::UniqueViolation("email".to_string()));
        }
        let stored = state.users.get_mut(&user.id).ok_or_else(|| not_found("user", user.id))?;
        // household membership is immutable here
        let household_id = stored.household_id;
        *stored = User {
            household_id,
            updated_at: Utc::now(),
            ..user.clone()
        };
        Ok(())
    }

    async fn insert_chore(&mut self, new: NewChore) -> Result<Chore, StoreError> {
        let state = self.state()?;
        let now = Utc::now();
        let chore = Chore {
            id: state.next_id(),
            household_id: new.household_id,
            title: new.title,
            description: new.description,
            value: new.value,
            priority: new.priority,
            auto_approve: new.auto_approve,
            proof_required: new.proof_required,
            late_penalty_pct: new.late_penalty_pct,
            expire_days: new.expire_days,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        };
        state.chores.insert(chore.id, chore.clone());
        Ok(chore)
    }

    async fn chore(&mut self, id: ChoreId) -> Result<Chore, StoreError> {
        self.state()?
            .chores
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("chore", id))
    }

    async fn chores(&mut self, filter: &ChoreFilter) -> Result<Vec<Chore>, StoreError> {
        let state = self.state()?;
        Ok(filter.page.slice(
            state
                .chores
                .values()
                .filter(|c| c.household_id == filter.household_id)
                .filter(|c| filter.priority.map(|p| c.priority == p).unwrap_or(true))
                .filter(|c| filter.created_by.map(|u| c.created_by == u).unwrap_or(true))
                .cloned(),
        ))
    }

    async fn update_chore(&mut self, chore: &Chore) -> Result<(), StoreError> {
        let state = self.state()?;
        let stored = state.chores.get_mut(&chore.id).ok_or_else(|| not_found("chore", chore.id))?;
        *stored = Chore {
            household_id: stored.household_id,
            created_by: stored.created_by,
            created_at: stored.created_at,
            updated_at: Utc::now(),
            ..chore.clone()
        };
        Ok(())
    }

    async fn delete_chore(&mut self, id: ChoreId) -> Result<(), StoreError> {
        let state = self.state()?;
        state.chores.remove(&id).ok_or_else(|| not_found("chore", id))?;
        state.assignments.retain(|_, a| a.chore_id != id);
        Ok(())
    }

    async fn insert_assignment(&mut self, new: NewAssignment) -> Result<Assignment, StoreError> {
        let state = self.state()?;
        if !state.chores.contains_key(&new.chore_id) {
            return Err(not_found("chore", new.chore_id));
        }
        let now = Utc::now();
        let assignment = Assignment {
            id: state.next_id(),
            chore_id: new.chore_id,
            assigned_to: new.assigned_to,
            due_date: new.due_date,
            percent_complete: Decimal::ZERO,
            status: AssignmentStatus::Pending,
            proof: None,
            approval_notes: None,
            completed_at: None,
            approved_at: None,
            created_at: now,
            updated_at: now,
        };
        state.assignments.insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    async fn assignment(&mut self, id: AssignmentId) -> Result<Assignment, StoreError> {
        self.state()?
            .assignments
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("assignment", id))
    }

    async fn assignments(&mut self, filter: &AssignmentFilter) -> Result<Vec<Assignment>, StoreError> {
        let state = self.state()?;
        let mut matching: Vec<Assignment> = state
            .assignments
            .values()
            .filter(|a| state.chore_household(a.chore_id) == Some(filter.household_id))
            .filter(|a| filter.assigned_to.map(|u| a.assigned_to == u).unwrap_or(true))
            .filter(|a| filter.chore_id.map(|c| a.chore_id == c).unwrap_or(true))
            .filter(|a| filter.status.map(|s| a.status == s).unwrap_or(true))
            .filter(|a| in_window(a.due_date, filter.due_after, filter.due_before))
            .cloned()
            .collect();
        matching.sort_by_key(|a| (a.due_date, a.id));
        Ok(filter.page.slice(matching))
    }

    async fn update_assignment(&mut self, assignment: &Assignment) -> Result<(), StoreError> {
        let state = self.state()?;
        let stored = state
            .assignments
            .get_mut(&assignment.id)
            .ok_or_else(|| not_found("assignment", assignment.id))?;
        *stored = Assignment {
            updated_at: Utc::now(),
            ..assignment.clone()
        };
        Ok(())
    }

    async fn overdue_assignments(
        &mut self,
        household_id: HouseholdId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Assignment>, StoreError> {
        let state = self.state()?;
        let mut overdue: Vec<Assignment> = state
            .assignments
            .values()
            .filter(|a| state.chore_household(a.chore_id) == Some(household_id))
            .filter(|a| a.is_late_at(now))
            .cloned()
            .collect();
        overdue.sort_by_key(|a| (a.due_date, a.id));
        Ok(overdue)
    }

    async fn insert_reward(&mut self, new: NewReward) -> Result<Reward, StoreError> {
        let state = self.state()?;
        let reward = Reward {
            id: state.next_id(),
            household_id: new.household_id,
            title: new.title,
            description: new.description,
            cost: new.cost,
            is_active: true,
            created_at: Utc::now(),
        };
        state.rewards.insert(reward.id, reward.clone());
        Ok(reward)
    }

    async fn reward(&mut self, id: RewardId) -> Result<Reward, StoreError> {
        self.state()?
            .rewards
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("reward", id))
    }

    async fn rewards(&mut self, household_id: HouseholdId) -> Result<Vec<Reward>, StoreError> {
        Ok(self
            .state()?
            .rewards
            .values()
            .filter(|r| r.household_id == household_id)
            .cloned()
            .collect())
    }

    async fn update_reward(&mut self, reward: &Reward) -> Result<(), StoreError> {
        let state = self.state()?;
        let stored = state.rewards.get_mut(&reward.id).ok_or_else(|| not_found("reward", reward.id))?;
        *stored = reward.clone();
        Ok(())
    }

    async fn delete_reward(&mut self, id: RewardId) -> Result<(), StoreError> {
        let state = self.state()?;
        state.rewards.remove(&id).ok_or_else(|| not_found("reward", id))?;
        Ok(())
    }

    async fn insert_redemption(&mut self, new: NewRedemption) -> Result<Redemption, StoreError> {
        let state = self.state()?;
        let redemption = Redemption {
            id: state.next_id(),
            reward_id: new.reward_id,
            user_id: new.user_id,
            status: RedemptionStatus::Pending,
            cost: new.cost,
            redeemed_at: Utc::now(),
            approved_at: None,
        };
        state.redemptions.insert(redemption.id, redemption.clone());
        Ok(redemption)
    }

    async fn redemption(&mut self, id: RedemptionId) -> Result<Redemption, StoreError> {
        self.state()?
            .redemptions
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("redemption", id))
    }

    async fn redemptions(&mut self, filter: &RedemptionFilter) -> Result<Vec<Redemption>, StoreError> {
        let state = self.state()?;
        Ok(filter.page.slice(
            state
                .redemptions
                .values()
                .filter(|r| state.reward_household(r.reward_id) == Some(filter.household_id))
                .filter(|r| filter.reward_id.map(|id| r.reward_id == id).unwrap_or(true))
                .filter(|r| filter.user_id.map(|u| r.user_id == u).unwrap_or(true))
                .filter(|r| filter.status.map(|s| r.status == s).unwrap_or(true))
                .cloned(),
        ))
    }

    async fn update_redemption(&mut self, redemption: &Redemption) -> Result<(), StoreError> {
        let state = self.state()?;
        let stored = state
            .redemptions
            .get_mut(&redemption.id)
            .ok_or_else(|| not_found("redemption", redemption.id))?;
        *stored = redemption.clone();
        Ok(())
    }

    async fn insert_ledger_entry(&mut self, new: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        if self.faults.ledger_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Fault("ledger write".to_string()));
        }
        let state = self.state()?;
        if !state.users.contains_key(&new.user_id) {
            return Err(not_found("user", new.user_id));
        }
        if state.ledger.iter().any(|e| e.duplicates(&new)) {
            return Err(StoreError::UniqueViolation("ledger entry".to_string()));
        }
        let entry = LedgerEntry {
            id: state.next_id(),
            user_id: new.user_id,
            entry_type: new.entry_type,
            amount: new.amount,
            description: new.description,
            assignment_id: new.assignment_id,
            redemption_id: new.redemption_id,
            created_at: Utc::now(),
        };
        state.ledger.push(entry.clone());
        Ok(entry)
    }

    async fn ledger_entries(&mut self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state()?;
        Ok(filter.page.slice(
            state
                .ledger
                .iter()
                .filter(|e| state.user_household(e.user_id) == Some(filter.household_id))
                .filter(|e| filter.user_id.map(|u| e.user_id == u).unwrap_or(true))
                .filter(|e| filter.entry_type.map(|t| e.entry_type == t).unwrap_or(true))
                .filter(|e| in_window(e.created_at, filter.from, filter.to))
                .cloned(),
        ))
    }

    async fn balance(&mut self, user_id: UserId) -> Result<Decimal, StoreError> {
        Ok(self.state()?.balance_of(user_id))
    }

    async fn balances(&mut self, household_id: HouseholdId) -> Result<Vec<UserBalance>, StoreError> {
        let state = self.state()?;
        Ok(state
            .users
            .values()
            .filter(|u| u.household_id == household_id)
            .map(|u| UserBalance { user_id: u.id, balance: state.balance_of(u.id) })
            .collect())
    }

    async fn chore_summaries(
        &mut self,
        household_id: HouseholdId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChoreSummary>, StoreError> {
        let state = self.state()?;
        Ok(state
            .chores
            .values()
            .filter(|c| c.household_id == household_id)
            .map(|chore| {
                let mut summary = ChoreSummary {
                    chore_id: chore.id,
                    title: chore.title.clone(),
                    value: chore.value,
                    pending: 0,
                    in_progress: 0,
                    completed: 0,
                    approved: 0,
                    rejected: 0,
                    overdue: 0,
                };
                for a in state.assignments.values().filter(|a| a.chore_id == chore.id) {
                    match a.status {
                        AssignmentStatus::Pending => summary.pending += 1,
                        AssignmentStatus::InProgress => summary.in_progress += 1,
                        AssignmentStatus::Completed => summary.completed += 1,
                        AssignmentStatus::Approved => summary.approved += 1,
                        AssignmentStatus::Rejected => summary.rejected += 1,
                    }
                    if a.is_late_at(now) {
                        summary.overdue += 1;
                    }
                }
                summary
            })
            .collect())
    }

    async fn earnings(
        &mut self,
        household_id: HouseholdId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<MemberEarnings>, StoreError> {
        let state = self.state()?;
        Ok(state
            .users
            .values()
            .filter(|u| u.household_id == household_id)
            .map(|user| {
                let mut totals = MemberEarnings {
                    user_id: user.id,
                    name: user.name.clone(),
                    earned: Decimal::ZERO,
                    spent: Decimal::ZERO,
                    adjusted: Decimal::ZERO,
                    balance: state.balance_of(user.id),
                };
                for e in state
                    .ledger
                    .iter()
                    .filter(|e| e.user_id == user.id && in_window(e.created_at, from, to))
                {
                    match e.entry_type {
                        LedgerType::Earn => totals.earned += e.amount,
                        LedgerType::Spend => totals.spent -= e.amount,
                        LedgerType::Adjust => totals.adjusted += e.amount,
                    }
                }
                totals
            })
            .collect())
    }

    async fn insert_audit_log(&mut self, new: NewAuditLog) -> Result<AuditLog, StoreError> {
        if self.faults.audit_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Fault("audit write".to_string()));
        }
        let state = self.state()?;
        let log = AuditLog {
            id: state.next_id(),
            household_id: new.household_id,
            user_id: new.user_id,
            action: new.action,
            details: new.details,
            created_at: Utc::now(),
        };
        state.audit.push(log.clone());
        Ok(log)
    }

    async fn audit_logs(&mut self, filter: &AuditFilter) -> Result<Vec<AuditLog>, StoreError> {
        let state = self.state()?;
        Ok(filter.page.slice(
            state
                .audit
                .iter()
                .filter(|l| l.household_id == filter.household_id)
                .filter(|l| filter.user_id.map(|u| l.user_id == u).unwrap_or(true))
                .filter(|l| filter.action.as_deref().map(|a| l.action == a).unwrap_or(true))
                .filter(|l| in_window(l.created_at, filter.from, filter.to))
                .cloned(),
        ))
    }
}
