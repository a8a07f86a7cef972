// PostgreSQL-backed store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use super::*;

const SCHEMA: &str = include_str!("../../schema/postgres.sql");

/// Advisory lock key serializing first-user detection during registration
const REGISTRATION_LOCK_KEY: i64 = 0x63_686f_7265;

/// Store backed by a PostgreSQL connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database and create the pool
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(map_err)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables, indexes and the append-only ledger trigger if missing
    pub async fn apply_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await.map_err(map_err)?;
        info!("Database schema applied");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(map_err)?;
        Ok(Box::new(PgTx { tx: Some(tx) }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(map_err)?;
        Ok(())
    }
}

/// Open database transaction. sqlx rolls it back when dropped uncommitted.
pub struct PgTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTx {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx.as_deref_mut().ok_or(StoreError::TransactionClosed)
    }
}

fn map_err(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            let constraint = db.constraint().unwrap_or_default();
            let field = if constraint.contains("email") {
                "email"
            } else if constraint.contains("invite_code") {
                "invite_code"
            } else {
                constraint
            };
            StoreError::UniqueViolation(field.to_string())
        }
        other => StoreError::Unavailable(other.to_string()),
    }
}

fn parse<T: FromStr<Err = UnknownVariant>>(value: &str) -> Result<T, StoreError> {
    value
        .parse()
        .map_err(|e: UnknownVariant| StoreError::Unavailable(format!("corrupt row: {}", e)))
}

fn expect_row(affected: u64, what: &str, id: i64) -> Result<(), StoreError> {
    if affected == 0 {
        return Err(StoreError::NotFound(format!("{} {}", what, id)));
    }
    Ok(())
}

#[derive(FromRow)]
struct UserRow {
    id: i64,
    household_id: i64,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    notification_pref_email: bool,
    notification_pref_push: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: r.id,
            household_id: r.household_id,
            name: r.name,
            email: r.email,
            password_hash: r.password_hash,
            role: parse(&r.role)?,
            notification_pref_email: r.notification_pref_email,
            notification_pref_push: r.notification_pref_push,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(FromRow)]
struct HouseholdRow {
    id: i64,
    name: String,
    invite_code: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<HouseholdRow> for Household {
    fn from(r: HouseholdRow) -> Self {
        Household {
            id: r.id,
            name: r.name,
            invite_code: r.invite_code,
            created_at: r.created_at,
        }
    }
}

#[derive(FromRow)]
struct ChoreRow {
    id: i64,
    household_id: i64,
    title: String,
    description: Option<String>,
    value: Decimal,
    priority: String,
    auto_approve: bool,
    proof_required: bool,
    late_penalty_pct: Decimal,
    expire_days: Option<i32>,
    created_by: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ChoreRow> for Chore {
    type Error = StoreError;

    fn try_from(r: ChoreRow) -> Result<Self, Self::Error> {
        Ok(Chore {
            id: r.id,
            household_id: r.household_id,
            title: r.title,
            description: r.description,
            value: r.value,
            priority: parse(&r.priority)?,
            auto_approve: r.auto_approve,
            proof_required: r.proof_required,
            late_penalty_pct: r.late_penalty_pct,
            expire_days: r.expire_days,
            created_by: r.created_by,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(FromRow)]
struct AssignmentRow {
    id: i64,
    chore_id: i64,
    assigned_to: i64,
    due_date: DateTime<Utc>,
    percent_complete: Decimal,
    status: String,
    proof: Option<Vec<u8>>,
    approval_notes: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AssignmentRow> for Assignment {
    type Error = StoreError;

    fn try_from(r: AssignmentRow) -> Result<Self, Self::Error> {
        Ok(Assignment {
            id: r.id,
            chore_id: r.chore_id,
            assigned_to: r.assigned_to,
            due_date: r.due_date,
            percent_complete: r.percent_complete,
            status: parse(&r.status)?,
            proof: r.proof,
            approval_notes: r.approval_notes,
            completed_at: r.completed_at,
            approved_at: r.approved_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(FromRow)]
struct RewardRow {
    id: i64,
    household_id: i64,
    title: String,
    description: Option<String>,
    cost: Decimal,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<RewardRow> for Reward {
    fn from(r: RewardRow) -> Self {
        Reward {
            id: r.id,
            household_id: r.household_id,
            title: r.title,
            description: r.description,
            cost: r.cost,
            is_active: r.is_active,
            created_at: r.created_at,
        }
    }
}

#[derive(FromRow)]
struct RedemptionRow {
    id: i64,
    reward_id: i64,
    user_id: i64,
    status: String,
    cost: Decimal,
    redeemed_at: DateTime<Utc>,
    approved_at: Option<DateTime<Utc>>,
}

impl TryFrom<RedemptionRow> for Redemption {
    type Error = StoreError;

    fn try_from(r: RedemptionRow) -> Result<Self, Self::Error> {
        Ok(Redemption {
            id: r.id,
            reward_id: r.reward_id,
            user_id: r.user_id,
            status: parse(&r.status)?,
            cost: r.cost,
            redeemed_at: r.redeemed_at,
            approved_at: r.approved_at,
        })
    }
}

#[derive(FromRow)]
struct LedgerRow {
    id: i64,
    user_id: i64,
    #[sqlx(rename = "type")]
    entry_type: String,
    amount: Decimal,
    description: Option<String>,
    assignment_id: Option<i64>,
    redemption_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(r: LedgerRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: r.id,
            user_id: r.user_id,
            entry_type: parse(&r.entry_type)?,
            amount: r.amount,
            description: r.description,
            assignment_id: r.assignment_id,
            redemption_id: r.redemption_id,
            created_at: r.created_at,
        })
    }
}

#[derive(FromRow)]
struct AuditRow {
    id: i64,
    household_id: i64,
    user_id: i64,
    action: String,
    details: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<AuditRow> for AuditLog {
    fn from(r: AuditRow) -> Self {
        AuditLog {
            id: r.id,
            household_id: r.household_id,
            user_id: r.user_id,
            action: r.action,
            details: r.details,
            created_at: r.created_at,
        }
    }
}

#[derive(FromRow)]
struct ChoreSummaryRow {
    chore_id: i64,
    title: String,
    value: Decimal,
    pending: i64,
    in_progress: i64,
    completed: i64,
    approved: i64,
    rejected: i64,
    overdue: i64,
}

impl From<ChoreSummaryRow> for ChoreSummary {
    fn from(r: ChoreSummaryRow) -> Self {
        ChoreSummary {
            chore_id: r.chore_id,
            title: r.title,
            value: r.value,
            pending: r.pending,
            in_progress: r.in_progress,
            completed: r.completed,
            approved: r.approved,
            rejected: r.rejected,
            overdue: r.overdue,
        }
    }
}

#[derive(FromRow)]
struct EarningsRow {
    user_id: i64,
    name: String,
    earned: Decimal,
    spent: Decimal,
    adjusted: Decimal,
    balance: Decimal,
}

impl From<EarningsRow> for MemberEarnings {
    fn from(r: EarningsRow) -> Self {
        MemberEarnings {
            user_id: r.user_id,
            name: r.name,
            earned: r.earned,
            spent: r.spent,
            adjusted: r.adjusted,
            balance: r.balance,
        }
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn push_page(qb: &mut QueryBuilder<'_, Postgres>, page: &Page) {
    qb.push(" LIMIT ").push_bind(page.limit);
    qb.push(" OFFSET ").push_bind(page.offset);
}

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.commit().await.map_err(map_err)
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.rollback().await.map_err(map_err)
    }

    async fn lock_registration(&mut self) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(REGISTRATION_LOCK_KEY)
            .execute(self.conn()?)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn lock_user(&mut self, id: UserId) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(map_err)?
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))?;
        row.try_into()
    }

    async fn lock_assignment(&mut self, id: AssignmentId) -> Result<Assignment, StoreError> {
        sqlx::query_as::<_, AssignmentRow>("SELECT * FROM assignments WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(map_err)?
            .ok_or_else(|| StoreError::NotFound(format!("assignment {}", id)))?
            .try_into()
    }

    async fn lock_chore_assignments(&mut self, chore_id: ChoreId) -> Result<Vec<Assignment>, StoreError> {
        let rows = sqlx::query_as::<_, AssignmentRow>(
            "SELECT * FROM assignments WHERE chore_id = $1 ORDER BY id FOR UPDATE",
        )
        .bind(chore_id)
        .fetch_all(self.conn()?)
        .await
        .map_err(map_err)?;
        convert_all(rows)
    }

    async fn lock_redemption(&mut self, id: RedemptionId) -> Result<Redemption, StoreError> {
        sqlx::query_as::<_, RedemptionRow>("SELECT * FROM redemptions WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(map_err)?
            .ok_or_else(|| StoreError::NotFound(format!("redemption {}", id)))?
            .try_into()
    }

    async fn insert_household(&mut self, new: NewHousehold) -> Result<Household, StoreError> {
        let row = sqlx::query_as::<_, HouseholdRow>(
            "INSERT INTO households (name, invite_code) VALUES ($1, $2) RETURNING *",
        )
        .bind(new.name)
        .bind(new.invite_code)
        .fetch_one(self.conn()?)
        .await
        .map_err(map_err)?;
        Ok(row.into())
    }

    async fn household(&mut self, id: HouseholdId) -> Result<Household, StoreError> {
        sqlx::query_as::<_, HouseholdRow>("SELECT * FROM households WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(map_err)?
            .map(Household::from)
            .ok_or_else(|| StoreError::NotFound(format!("household {}", id)))
    }

    async fn household_by_invite_code(&mut self, code: &str) -> Result<Household, StoreError> {
        sqlx::query_as::<_, HouseholdRow>("SELECT * FROM households WHERE invite_code = $1")
            .bind(code)
            .fetch_optional(self.conn()?)
            .await
            .map_err(map_err)?
            .map(Household::from)
            .ok_or_else(|| StoreError::NotFound("invite code".to_string()))
    }

    async fn set_invite_code(&mut self, id: HouseholdId, code: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE households SET invite_code = $2 WHERE id = $1")
            .bind(id)
            .bind(code)
            .execute(self.conn()?)
            .await
            .map_err(map_err)?;
        expect_row(result.rows_affected(), "household", id)
    }

    async fn count_users(&mut self) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(self.conn()?)
            .await
            .map_err(map_err)
    }

    async fn insert_user(&mut self, new: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (household_id, name, email, password_hash, role, \
             notification_pref_email, notification_pref_push) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(new.household_id)
        .bind(new.name)
        .bind(new.email)
        .bind(new.password_hash)
        .bind(new.role.as_str())
        .bind(new.notification_pref_email)
        .bind(new.notification_pref_push)
        .fetch_one(self.conn()?)
        .await
        .map_err(map_err)?;
        row.try_into()
    }

    async fn user(&mut self, id: UserId) -> Result<User, StoreError> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(map_err)?
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))?
            .try_into()
    }

    async fn user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE lower(email) = lower($1)")
            .bind(email)
            .fetch_optional(self.conn()?)
            .await
            .map_err(map_err)?
            .map(User::try_from)
            .transpose()
    }

    async fn users_by_household(&mut self, household_id: HouseholdId) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE household_id = $1 ORDER BY id")
            .bind(household_id)
            .fetch_all(self.conn()?)
            .await
            .map_err(map_err)?;
        convert_all(rows)
    }

    async fn update_user(&mut self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE users SET name = $2, email = $3, password_hash = $4, role = $5, \
             notification_pref_email = $6, notification_pref_push = $7, updated_at = now() \
             WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.notification_pref_email)
        .bind(user.notification_pref_push)
        .execute(self.conn()?)
        .await
        .map_err(map_err)?;
        expect_row(result.rows_affected(), "user", user.id)
    }

    async fn insert_chore(&mut self, new: NewChore) -> Result<Chore, StoreError> {
        let row = sqlx::query_as::<_, ChoreRow>(
            "INSERT INTO chores (household_id, title, description, value, priority, auto_approve, \
             proof_required, late_penalty_pct, expire_days, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING *",
        )
        .bind(new.household_id)
        .bind(new.title)
        .bind(new.description)
        .bind(new.value)
        .bind(new.priority.as_str())
        .bind(new.auto_approve)
        .bind(new.proof_required)
        .bind(new.late_penalty_pct)
        .bind(new.expire_days)
        .bind(new.created_by)
        .fetch_one(self.conn()?)
        .await
        .map_err(map_err)?;
        row.try_into()
    }

    async fn chore(&mut self, id: ChoreId) -> Result<Chore, StoreError> {
        sqlx::query_as::<_, ChoreRow>("SELECT * FROM chores WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(map_err)?
            .ok_or_else(|| StoreError::NotFound(format!("chore {}", id)))?
            .try_into()
    }

    async fn chores(&mut self, filter: &ChoreFilter) -> Result<Vec<Chore>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM chores WHERE household_id = ");
        qb.push_bind(filter.household_id);
        if let Some(priority) = filter.priority {
            qb.push(" AND priority = ").push_bind(priority.as_str());
        }
        if let Some(created_by) = filter.created_by {
            qb.push(" AND created_by = ").push_bind(created_by);
        }
        qb.push(" ORDER BY id");
        push_page(&mut qb, &filter.page);

        let rows: Vec<ChoreRow> = qb
            .build_query_as()
            .fetch_all(self.conn()?)
            .await
            .map_err(map_err)?;
        convert_all(rows)
    }

    async fn update_chore(&mut self, chore: &Chore) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE chores SET title = $2, description = $3, value = $4, priority = $5, \
             auto_approve = $6, proof_required = $7, late_penalty_pct = $8, expire_days = $9, \
             updated_at = now() WHERE id = $1",
        )
        .bind(chore.id)
        .bind(&chore.title)
        .bind(chore.description.as_deref())
        .bind(chore.value)
        .bind(chore.priority.as_str())
        .bind(chore.auto_approve)
        .bind(chore.proof_required)
        .bind(chore.late_penalty_pct)
        .bind(chore.expire_days)
        .execute(self.conn()?)
        .await
        .map_err(map_err)?;
        expect_row(result.rows_affected(), "chore", chore.id)
    }

    async fn delete_chore(&mut self, id: ChoreId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM assignments WHERE chore_id = $1")
            .bind(id)
            .execute(self.conn()?)
            .await
            .map_err(map_err)?;
        let result = sqlx::query("DELETE FROM chores WHERE id = $1")
            .bind(id)
            .execute(self.conn()?)
            .await
            .map_err(map_err)?;
        expect_row(result.rows_affected(), "chore", id)
    }

    async fn insert_assignment(&mut self, new: NewAssignment) -> Result<Assignment, StoreError> {
        let row = sqlx::query_as::<_, AssignmentRow>(
            "INSERT INTO assignments (chore_id, assigned_to, due_date) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(new.chore_id)
        .bind(new.assigned_to)
        .bind(new.due_date)
        .fetch_one(self.conn()?)
        .await
        .map_err(map_err)?;
        row.try_into()
    }

    async fn assignment(&mut self, id: AssignmentId) -> Result<Assignment, StoreError> {
        sqlx::query_as::<_, AssignmentRow>("SELECT * FROM assignments WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(map_err)?
            .ok_or_else(|| StoreError::NotFound(format!("assignment {}", id)))?
            .try_into()
    }

    async fn assignments(&mut self, filter: &AssignmentFilter) -> Result<Vec<Assignment>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT a.* FROM assignments a JOIN chores c ON c.id = a.chore_id WHERE c.household_id = ",
        );
        qb.push_bind(filter.household_id);
        if let Some(user_id) = filter.assigned_to {
            qb.push(" AND a.assigned_to = ").push_bind(user_id);
        }
        if let Some(chore_id) = filter.chore_id {
            qb.push(" AND a.chore_id = ").push_bind(chore_id);
        }
        if let Some(status) = filter.status {
            qb.push(" AND a.status = ").push_bind(status.as_str());
        }
        if let Some(after) = filter.due_after {
            qb.push(" AND a.due_date >= ").push_bind(after);
        }
        if let Some(before) = filter.due_before {
            qb.push(" AND a.due_date <= ").push_bind(before);
        }
        qb.push(" ORDER BY a.due_date, a.id");
        push_page(&mut qb, &filter.page);

        let rows: Vec<AssignmentRow> = qb
            .build_query_as()
            .fetch_all(self.conn()?)
            .await
            .map_err(map_err)?;
        convert_all(rows)
    }

    async fn update_assignment(&mut self, assignment: &Assignment) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE assignments SET percent_complete = $2, status = $3, proof = $4, \
             approval_notes = $5, completed_at = $6, approved_at = $7, updated_at = now() \
             WHERE id = $1",
        )
        .bind(assignment.id)
        .bind(assignment.percent_complete)
        .bind(assignment.status.as_str())
        .bind(assignment.proof.as_deref())
        .bind(assignment.approval_notes.as_deref())
        .bind(assignment.completed_at)
        .bind(assignment.approved_at)
        .execute(self.conn()?)
        .await
        .map_err(map_err)?;
        expect_row(result.rows_affected(), "assignment", assignment.id)
    }

    async fn overdue_assignments(
        &mut self,
        household_id: HouseholdId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Assignment>, StoreError> {
        let rows = sqlx::query_as::<_, AssignmentRow>(
            "SELECT a.* FROM assignments a JOIN chores c ON c.id = a.chore_id \
             WHERE c.household_id = $1 AND a.status IN ('pending', 'in_progress') \
             AND a.due_date < $2 ORDER BY a.due_date, a.id",
        )
        .bind(household_id)
        .bind(now)
        .fetch_all(self.conn()?)
        .await
        .map_err(map_err)?;
        convert_all(rows)
    }

    async fn insert_reward(&mut self, new: NewReward) -> Result<Reward, StoreError> {
        let row = sqlx::query_as::<_, RewardRow>(
            "INSERT INTO rewards (household_id, title, description, cost) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(new.household_id)
        .bind(new.title)
        .bind(new.description)
        .bind(new.cost)
        .fetch_one(self.conn()?)
        .await
        .map_err(map_err)?;
        Ok(row.into())
    }

    async fn reward(&mut self, id: RewardId) -> Result<Reward, StoreError> {
        sqlx::query_as::<_, RewardRow>("SELECT * FROM rewards WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(map_err)?
            .map(Reward::from)
            .ok_or_else(|| StoreError::NotFound(format!("reward {}", id)))
    }

    async fn rewards(&mut self, household_id: HouseholdId) -> Result<Vec<Reward>, StoreError> {
        let rows = sqlx::query_as::<_, RewardRow>("SELECT * FROM rewards WHERE household_id = $1 ORDER BY id")
            .bind(household_id)
            .fetch_all(self.conn()?)
            .await
            .map_err(map_err)?;
        Ok(rows.into_iter().map(Reward::from).collect())
    }

    async fn update_reward(&mut self, reward: &Reward) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE rewards SET title = $2, description = $3, cost = $4, is_active = $5 WHERE id = $1",
        )
        .bind(reward.id)
        .bind(&reward.title)
        .bind(reward.description.as_deref())
        .bind(reward.cost)
        .bind(reward.is_active)
        .execute(self.conn()?)
        .await
        .map_err(map_err)?;
        expect_row(result.rows_affected(), "reward", reward.id)
    }

    async fn delete_reward(&mut self, id: RewardId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM rewards WHERE id = $1")
            .bind(id)
            .execute(self.conn()?)
            .await
            .map_err(map_err)?;
        expect_row(result.rows_affected(), "reward", id)
    }

    async fn insert_redemption(&mut self, new: NewRedemption) -> Result<Redemption, StoreError> {
        let row = sqlx::query_as::<_, RedemptionRow>(
            "INSERT INTO redemptions (reward_id, user_id, cost) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(new.reward_id)
        .bind(new.user_id)
        .bind(new.cost)
        .fetch_one(self.conn()?)
        .await
        .map_err(map_err)?;
        row.try_into()
    }

    async fn redemption(&mut self, id: RedemptionId) -> Result<Redemption, StoreError> {
        sqlx::query_as::<_, RedemptionRow>("SELECT * FROM redemptions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(map_err)?
            .ok_or_else(|| StoreError::NotFound(format!("redemption {}", id)))?
            .try_into()
    }

    async fn redemptions(&mut self, filter: &RedemptionFilter) -> Result<Vec<Redemption>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT r.* FROM redemptions r JOIN rewards w ON w.id = r.reward_id WHERE w.household_id = ",
        );
        qb.push_bind(filter.household_id);
        if let Some(reward_id) = filter.reward_id {
            qb.push(" AND r.reward_id = ").push_bind(reward_id);
        }
        if let Some(user_id) = filter.user_id {
            qb.push(" AND r.user_id = ").push_bind(user_id);
        }
        if let Some(status) = filter.status {
            qb.push(" AND r.status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY r.id");
        push_page(&mut qb, &filter.page);

        let rows: Vec<RedemptionRow> = qb
            .build_query_as()
            .fetch_all(self.conn()?)
            .await
            .map_err(map_err)?;
        convert_all(rows)
    }

    async fn update_redemption(&mut self, redemption: &Redemption) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE redemptions SET status = $2, approved_at = $3 WHERE id = $1")
            .bind(redemption.id)
            .bind(redemption.status.as_str())
            .bind(redemption.approved_at)
            .execute(self.conn()?)
            .await
            .map_err(map_err)?;
        expect_row(result.rows_affected(), "redemption", redemption.id)
    }

    async fn insert_ledger_entry(&mut self, new: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        let row = sqlx::query_as::<_, LedgerRow>(
            "INSERT INTO ledger_entries (user_id, type, amount, description, assignment_id, redemption_id) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(new.user_id)
        .bind(new.entry_type.as_str())
        .bind(new.amount)
        .bind(new.description)
        .bind(new.assignment_id)
        .bind(new.redemption_id)
        .fetch_one(self.conn()?)
        .await
        .map_err(map_err)?;
        row.try_into()
    }

    async fn ledger_entries(&mut self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT l.* FROM ledger_entries l JOIN users u ON u.id = l.user_id WHERE u.household_id = ",
        );
        qb.push_bind(filter.household_id);
        if let Some(user_id) = filter.user_id {
            qb.push(" AND l.user_id = ").push_bind(user_id);
        }
        if let Some(entry_type) = filter.entry_type {
            qb.push(" AND l.type = ").push_bind(entry_type.as_str());
        }
        if let Some(from) = filter.from {
            qb.push(" AND l.created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            qb.push(" AND l.created_at <= ").push_bind(to);
        }
        qb.push(" ORDER BY l.id");
        push_page(&mut qb, &filter.page);

        let rows: Vec<LedgerRow> = qb
            .build_query_as()
            .fetch_all(self.conn()?)
            .await
            .map_err(map_err)?;
        convert_all(rows)
    }

    async fn balance(&mut self, user_id: UserId) -> Result<Decimal, StoreError> {
        sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(amount), 0) FROM ledger_entries WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(self.conn()?)
        .await
        .map_err(map_err)
    }

    async fn balances(&mut self, household_id: HouseholdId) -> Result<Vec<UserBalance>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, Decimal)>(
            "SELECT u.id, COALESCE(SUM(l.amount), 0) FROM users u \
             LEFT JOIN ledger_entries l ON l.user_id = u.id \
             WHERE u.household_id = $1 GROUP BY u.id ORDER BY u.id",
        )
        .bind(household_id)
        .fetch_all(self.conn()?)
        .await
        .map_err(map_err)?;
        Ok(rows
            .into_iter()
            .map(|(user_id, balance)| UserBalance { user_id, balance })
            .collect())
    }

    async fn chore_summaries(
        &mut self,
        household_id: HouseholdId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChoreSummary>, StoreError> {
        let rows = sqlx::query_as::<_, ChoreSummaryRow>(
            "SELECT c.id AS chore_id, c.title, c.value, \
             COUNT(a.id) FILTER (WHERE a.status = 'pending') AS pending, \
             COUNT(a.id) FILTER (WHERE a.status = 'in_progress') AS in_progress, \
             COUNT(a.id) FILTER (WHERE a.status = 'completed') AS completed, \
             COUNT(a.id) FILTER (WHERE a.status = 'approved') AS approved, \
             COUNT(a.id) FILTER (WHERE a.status = 'rejected') AS rejected, \
             COUNT(a.id) FILTER (WHERE a.status IN ('pending', 'in_progress') AND a.due_date < $2) AS overdue \
             FROM chores c LEFT JOIN assignments a ON a.chore_id = c.id \
             WHERE c.household_id = $1 GROUP BY c.id ORDER BY c.id",
        )
        .bind(household_id)
        .bind(now)
        .fetch_all(self.conn()?)
        .await
        .map_err(map_err)?;
        Ok(rows.into_iter().map(ChoreSummary::from).collect())
    }

    async fn earnings(
        &mut self,
        household_id: HouseholdId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<MemberEarnings>, StoreError> {
        let rows = sqlx::query_as::<_, EarningsRow>(
            "SELECT u.id AS user_id, u.name, \
             COALESCE(SUM(l.amount) FILTER (WHERE l.type = 'earn' AND l.in_window), 0) AS earned, \
             COALESCE(SUM(-l.amount) FILTER (WHERE l.type = 'spend' AND l.in_window), 0) AS spent, \
             COALESCE(SUM(l.amount) FILTER (WHERE l.type = 'adjust' AND l.in_window), 0) AS adjusted, \
             COALESCE(SUM(l.amount), 0) AS balance \
             FROM users u \
             LEFT JOIN (SELECT user_id, type, amount, \
                 ($2::timestamptz IS NULL OR created_at >= $2) \
                 AND ($3::timestamptz IS NULL OR created_at <= $3) AS in_window \
                 FROM ledger_entries) l ON l.user_id = u.id \
             WHERE u.household_id = $1 GROUP BY u.id ORDER BY u.id",
        )
        .bind(household_id)
        .bind(from)
        .bind(to)
        .fetch_all(self.conn()?)
        .await
        .map_err(map_err)?;
        Ok(rows.into_iter().map(MemberEarnings::from).collect())
    }

    async fn insert_audit_log(&mut self, new: NewAuditLog) -> Result<AuditLog, StoreError> {
        let row = sqlx::query_as::<_, AuditRow>(
            "INSERT INTO audit_logs (household_id, user_id, action, details) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(new.household_id)
        .bind(new.user_id)
        .bind(new.action)
        .bind(new.details)
        .fetch_one(self.conn()?)
        .await
        .map_err(map_err)?;
        Ok(row.into())
    }

    async fn audit_logs(&mut self, filter: &AuditFilter) -> Result<Vec<AuditLog>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM audit_logs WHERE household_id = ");
        qb.push_bind(filter.household_id);
        if let Some(user_id) = filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(action) = &filter.action {
            qb.push(" AND action = ").push_bind(action.clone());
        }
        if let Some(from) = filter.from {
            qb.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            qb.push(" AND created_at <= ").push_bind(to);
        }
        qb.push(" ORDER BY id DESC");
        push_page(&mut qb, &filter.page);

        let rows: Vec<AuditRow> = qb
            .build_query_as()
            .fetch_all(self.conn()?)
            .await
            .map_err(map_err)?;
        Ok(rows.into_iter().map(AuditLog::from).collect())
    }
}
