// Domain models - plain data, no I/O

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type HouseholdId = i64;
pub type UserId = i64;
pub type ChoreId = i64;
pub type AssignmentId = i64;
pub type RewardId = i64;
pub type RedemptionId = i64;
pub type LedgerEntryId = i64;

/// Error returned when a stored or submitted enum value is not recognised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// User role, highest privilege first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SystemAdmin,
    Admin,
    Manager,
    Worker,
    Observer,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::SystemAdmin,
        Role::Admin,
        Role::Manager,
        Role::Worker,
        Role::Observer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SystemAdmin => "system_admin",
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Worker => "worker",
            Role::Observer => "observer",
        }
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownVariant { kind: "role", value: s.to_string() })
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(UnknownVariant { kind: "priority", value: other.to_string() }),
        }
    }
}

/// Stored assignment status. Lateness is derived from the due date, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    InProgress,
    Completed,
    Approved,
    Rejected,
}

/// Lifecycle event applied to an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Progress report; `started` is true when 0 < percent
    Progress { started: bool },
    Complete,
    Approve,
    Reject,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::InProgress => "in_progress",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Approved => "approved",
            AssignmentStatus::Rejected => "rejected",
        }
    }

    /// Statuses in which work is still open (and lateness can apply)
    pub fn is_open(&self) -> bool {
        matches!(self, AssignmentStatus::Pending | AssignmentStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AssignmentStatus::Approved | AssignmentStatus::Rejected)
    }

    /// The transition table. `None` means the transition is illegal from this status.
    pub fn apply(self, transition: Transition) -> Option<AssignmentStatus> {
        use AssignmentStatus::*;
        match (self, transition) {
            (Pending, Transition::Progress { started: false }) => Some(Pending),
            (Pending, Transition::Progress { started: true }) => Some(InProgress),
            (InProgress, Transition::Progress { .. }) => Some(InProgress),
            (Pending | InProgress, Transition::Complete) => Some(Completed),
            (Completed, Transition::Approve) => Some(Approved),
            (Completed, Transition::Reject) => Some(Rejected),
            _ => None,
        }
    }
}

impl FromStr for AssignmentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AssignmentStatus::Pending),
            "in_progress" => Ok(AssignmentStatus::InProgress),
            "completed" => Ok(AssignmentStatus::Completed),
            "approved" => Ok(AssignmentStatus::Approved),
            "rejected" => Ok(AssignmentStatus::Rejected),
            other => Err(UnknownVariant { kind: "assignment status", value: other.to_string() }),
        }
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerType {
    Earn,
    Spend,
    Adjust,
}

impl LedgerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerType::Earn => "earn",
            LedgerType::Spend => "spend",
            LedgerType::Adjust => "adjust",
        }
    }
}

impl FromStr for LedgerType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earn" => Ok(LedgerType::Earn),
            "spend" => Ok(LedgerType::Spend),
            "adjust" => Ok(LedgerType::Adjust),
            other => Err(UnknownVariant { kind: "ledger type", value: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionStatus {
    Pending,
    Approved,
    Rejected,
}

impl RedemptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedemptionStatus::Pending => "pending",
            RedemptionStatus::Approved => "approved",
            RedemptionStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for RedemptionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RedemptionStatus::Pending),
            "approved" => Ok(RedemptionStatus::Approved),
            "rejected" => Ok(RedemptionStatus::Rejected),
            other => Err(UnknownVariant { kind: "redemption status", value: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Household {
    pub id: HouseholdId,
    pub name: String,
    /// Current invite code; regenerating it supersedes the previous one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub household_id: HouseholdId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    pub notification_pref_email: bool,
    pub notification_pref_push: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chore {
    pub id: ChoreId,
    pub household_id: HouseholdId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value: Decimal,
    pub priority: Priority,
    pub auto_approve: bool,
    pub proof_required: bool,
    /// Percentage (0-100) taken off the earned value when completed after the due date
    pub late_penalty_pct: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_days: Option<i32>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chore {
    /// Value credited on approval, after the late penalty if one applies
    pub fn earned_value(&self, late: bool) -> Decimal {
        if !late || self.late_penalty_pct.is_zero() {
            return self.value;
        }
        let hundred = Decimal::ONE_HUNDRED;
        (self.value * (hundred - self.late_penalty_pct) / hundred).round_dp(2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub chore_id: ChoreId,
    pub assigned_to: UserId,
    pub due_date: DateTime<Utc>,
    pub percent_complete: Decimal,
    pub status: AssignmentStatus,
    #[serde(skip)]
    pub proof: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    /// Time-derived late overlay for open assignments
    pub fn is_late_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && now > self.due_date
    }

    /// Whether the assignment was completed after its due date
    pub fn completed_late(&self) -> bool {
        self.completed_at.map(|at| at > self.due_date).unwrap_or(false)
    }

    pub fn has_proof(&self) -> bool {
        self.proof.as_ref().map(|p| !p.is_empty()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    pub id: RewardId,
    pub household_id: HouseholdId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub cost: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redemption {
    pub id: RedemptionId,
    pub reward_id: RewardId,
    pub user_id: UserId,
    pub status: RedemptionStatus,
    /// Cost charged at redemption time, refunded as-is on rejection
    pub cost: Decimal,
    pub redeemed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

/// Append-only ledger entry. Corrections are new `adjust` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub entry_type: LedgerType,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<AssignmentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redemption_id: Option<RedemptionId>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// True when `new` would be a second credit for the same assignment or a
    /// second refund for the same redemption
    pub fn duplicates(&self, new: &NewLedgerEntry) -> bool {
        match (self.entry_type, new.entry_type) {
            (LedgerType::Earn, LedgerType::Earn) => {
                self.assignment_id.is_some() && self.assignment_id == new.assignment_id
            }
            (LedgerType::Adjust, LedgerType::Adjust) => {
                self.redemption_id.is_some() && self.redemption_id == new.redemption_id
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: i64,
    pub household_id: HouseholdId,
    pub user_id: UserId,
    pub action: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBalance {
    pub user_id: UserId,
    pub balance: Decimal,
}

/// Assignment counts for one chore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoreSummary {
    pub chore_id: ChoreId,
    pub title: String,
    pub value: Decimal,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub approved: i64,
    pub rejected: i64,
    /// Open assignments past their due date
    pub overdue: i64,
}

/// Ledger totals for one member. `spent` is reported as a positive amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberEarnings {
    pub user_id: UserId,
    pub name: String,
    pub earned: Decimal,
    pub spent: Decimal,
    pub adjusted: Decimal,
    pub balance: Decimal,
}

// Insert payloads. Ids and timestamps are assigned by the store.

#[derive(Debug, Clone)]
pub struct NewHousehold {
    pub name: String,
    pub invite_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub household_id: HouseholdId,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub notification_pref_email: bool,
    pub notification_pref_push: bool,
}

#[derive(Debug, Clone)]
pub struct NewChore {
    pub household_id: HouseholdId,
    pub title: String,
    pub description: Option<String>,
    pub value: Decimal,
    pub priority: Priority,
    pub auto_approve: bool,
    pub proof_required: bool,
    pub late_penalty_pct: Decimal,
    pub expire_days: Option<i32>,
    pub created_by: UserId,
}

#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub chore_id: ChoreId,
    pub assigned_to: UserId,
    pub due_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReward {
    pub household_id: HouseholdId,
    pub title: String,
    pub description: Option<String>,
    pub cost: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewRedemption {
    pub reward_id: RewardId,
    pub user_id: UserId,
    pub cost: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub user_id: UserId,
    pub entry_type: LedgerType,
    pub amount: Decimal,
    pub description: Option<String>,
    pub assignment_id: Option<AssignmentId>,
    pub redemption_id: Option<RedemptionId>,
}

#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub household_id: HouseholdId,
    pub user_id: UserId,
    pub action: String,
    pub details: serde_json::Value,
}
