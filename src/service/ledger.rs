// Ledger engine: append-only entries, derived balances, manual adjustments

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::{user_in_household, validate_amount, Context};
use crate::auth::guard::{authorize, is_admin_or_manager, Operation};
use crate::auth::token::Claims;
use crate::core::errors::CoreError;
use crate::core::models::*;
use crate::store::{AuditFilter, LedgerFilter, Page, StoreTx};

/// Append one entry.
///
/// The amount must be non-zero with at most two decimal places, and the user
/// must belong to `household_id`.
/// Prior entries are never touched.
pub(crate) async fn append(
    tx: &mut dyn StoreTx,
    household_id: HouseholdId,
    entry: NewLedgerEntry,
) -> Result<LedgerEntry, CoreError> {
    if entry.amount.is_zero() {
        return Err(CoreError::Validation("amount must be non-zero".to_string()));
    }
    validate_amount("amount", entry.amount)?;
    user_in_household(tx, entry.user_id, household_id).await?;
    let stored = tx.insert_ledger_entry(entry).await?;
    info!(
        user_id = stored.user_id,
        entry_id = stored.id,
        entry_type = stored.entry_type.as_str(),
        amount = %stored.amount,
        "Ledger entry appended"
    );
    Ok(stored)
}

/// Query parameters for ledger listing
#[derive(Debug, Clone, Default)]
pub struct LedgerQuery {
    pub user_id: Option<UserId>,
    pub entry_type: Option<LedgerType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Page,
}

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub user_id: Option<UserId>,
    pub action: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Page,
}

#[derive(Clone)]
pub struct LedgerService {
    ctx: Arc<Context>,
}

impl LedgerService {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Balance of the caller, or of another household member for admin-or-manager
    pub async fn balance(&self, actor: &Claims, user_id: Option<UserId>) -> Result<UserBalance, CoreError> {
        authorize(actor, Operation::ViewBalance)?;
        let user_id = self.target_user(actor, user_id)?;

        self.ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                user_in_household(tx.as_mut(), user_id, actor.household_id).await?;
                let balance = tx.balance(user_id).await?;
                Ok(UserBalance { user_id, balance })
            })
            .await
    }

    /// Entries in creation order. Non-managers only see their own.
    pub async fn entries(&self, actor: &Claims, query: LedgerQuery) -> Result<Vec<LedgerEntry>, CoreError> {
        authorize(actor, Operation::ViewLedger)?;
        let user_id = if is_admin_or_manager(actor.role) {
            query.user_id
        } else {
            Some(self.target_user(actor, query.user_id)?)
        };

        let filter = LedgerFilter {
            household_id: actor.household_id,
            user_id,
            entry_type: query.entry_type,
            from: query.from,
            to: query.to,
            page: query.page,
        };
        self.ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                Ok(tx.ledger_entries(&filter).await?)
            })
            .await
    }

    pub async fn household_balances(&self, actor: &Claims) -> Result<Vec<UserBalance>, CoreError> {
        authorize(actor, Operation::ViewHouseholdBalances)?;
        self.ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                Ok(tx.balances(actor.household_id).await?)
            })
            .await
    }

    /// Manual correction. Always an `adjust` entry with a description.
    pub async fn adjust_balance(
        &self,
        actor: &Claims,
        user_id: UserId,
        amount: Decimal,
        description: &str,
    ) -> Result<LedgerEntry, CoreError> {
        authorize(actor, Operation::AdjustBalance)?;
        let description = description.trim();
        if description.is_empty() {
            return Err(CoreError::Validation("description is required for adjustments".to_string()));
        }

        let entry = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let entry = append(
                    tx.as_mut(),
                    actor.household_id,
                    NewLedgerEntry {
                        user_id,
                        entry_type: LedgerType::Adjust,
                        amount,
                        description: Some(description.to_string()),
                        assignment_id: None,
                        redemption_id: None,
                    },
                )
                .await?;
                tx.commit().await?;
                Ok(entry)
            })
            .await?;

        self.ctx.audit(
            actor,
            "balance_adjusted",
            json!({ "user_id": user_id, "amount": amount, "description": description, "entry_id": entry.id }),
        );
        Ok(entry)
    }

    pub async fn audit_log(&self, actor: &Claims, query: AuditQuery) -> Result<Vec<AuditLog>, CoreError> {
        authorize(actor, Operation::ViewAuditLog)?;
        let filter = AuditFilter {
            household_id: actor.household_id,
            user_id: query.user_id,
            action: query.action,
            from: query.from,
            to: query.to,
            page: query.page,
        };
        self.ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                Ok(tx.audit_logs(&filter).await?)
            })
            .await
    }

    /// Resolve whose data is being read. Only managers may look at others.
    fn target_user(&self, actor: &Claims, requested: Option<UserId>) -> Result<UserId, CoreError> {
        match requested {
            Some(id) if id != actor.user_id && !is_admin_or_manager(actor.role) => Err(
                CoreError::Forbidden("only admins and managers can view other members".to_string()),
            ),
            Some(id) => Ok(id),
            None => Ok(actor.user_id),
        }
    }
}
