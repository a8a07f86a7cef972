// Rewards catalogue and redemptions

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    ledger, lock_redemption_in_household, optional_text, required_text, reward_in_household, validate_amount, Context,
};
use crate::auth::guard::{authorize, is_admin_or_manager, Operation};
use crate::auth::token::Claims;
use crate::core::errors::CoreError;
use crate::core::models::*;
use crate::store::{Page, RedemptionFilter};

#[derive(Debug, Clone)]
pub struct CreateReward {
    pub title: String,
    pub description: Option<String>,
    pub cost: Decimal,
}

/// A redemption together with the spend it produced
#[derive(Debug, Clone, Serialize)]
pub struct RedemptionReceipt {
    pub redemption: Redemption,
    pub ledger_entry: LedgerEntry,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedemptionDecision {
    pub redemption: Redemption,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund: Option<LedgerEntry>,
}

/// Catalogue edits. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct UpdateReward {
    pub title: Option<String>,
    pub description: Option<String>,
    pub cost: Option<Decimal>,
    pub is_active: Option<bool>,
}

/// What `delete_reward` did with the reward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardRemoval {
    Deleted,
    /// Redemptions still point at the reward, so it was only deactivated
    Deactivated,
}

#[derive(Debug, Clone, Default)]
pub struct RedemptionQuery {
    pub user_id: Option<UserId>,
    pub status: Option<RedemptionStatus>,
    pub page: Page,
}

#[derive(Clone)]
pub struct RewardService {
    ctx: Arc<Context>,
}

impl RewardService {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    pub async fn create_reward(&self, actor: &Claims, request: CreateReward) -> Result<Reward, CoreError> {
        authorize(actor, Operation::CreateReward)?;
        let title = required_text("title", &request.title)?;
        validate_cost(request.cost)?;

        let reward = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let reward = tx
                    .insert_reward(NewReward {
                        household_id: actor.household_id,
                        title,
                        description: optional_text(request.description),
                        cost: request.cost,
                    })
                    .await?;
                tx.commit().await?;
                Ok(reward)
            })
            .await?;

        self.ctx.audit(
            actor,
            "reward_created",
            json!({ "reward_id": reward.id, "title": reward.title, "cost": reward.cost }),
        );
        Ok(reward)
    }

    /// Managers see the whole catalogue, everyone else only active rewards
    pub async fn list_rewards(&self, actor: &Claims) -> Result<Vec<Reward>, CoreError> {
        authorize(actor, Operation::ListRewards)?;
        let rewards = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                Ok(tx.rewards(actor.household_id).await?)
            })
            .await?;
        Ok(rewards
            .into_iter()
            .filter(|r| r.is_active || is_admin_or_manager(actor.role))
            .collect())
    }

    /// One reward. Members only see active rewards.
    pub async fn get_reward(&self, actor: &Claims, id: RewardId) -> Result<Reward, CoreError> {
        authorize(actor, Operation::ViewReward)?;
        let reward = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                reward_in_household(tx.as_mut(), id, actor.household_id).await
            })
            .await?;
        if !reward.is_active && !is_admin_or_manager(actor.role) {
            return Err(CoreError::NotFound("reward".to_string()));
        }
        Ok(reward)
    }

    /// Edit a reward. Pending redemptions keep the cost they were charged.
    pub async fn update_reward(&self, actor: &Claims, id: RewardId, changes: UpdateReward) -> Result<Reward, CoreError> {
        authorize(actor, Operation::UpdateReward)?;
        let title = changes.title.as_deref().map(|t| required_text("title", t)).transpose()?;
        if let Some(cost) = changes.cost {
            validate_cost(cost)?;
        }

        let reward = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let mut reward = reward_in_household(tx.as_mut(), id, actor.household_id).await?;
                if let Some(title) = title {
                    reward.title = title;
                }
                if changes.description.is_some() {
                    reward.description = optional_text(changes.description);
                }
                if let Some(cost) = changes.cost {
                    reward.cost = cost;
                }
                if let Some(active) = changes.is_active {
                    reward.is_active = active;
                }
                tx.update_reward(&reward).await?;
                tx.commit().await?;
                Ok(reward)
            })
            .await?;

        self.ctx.audit(
            actor,
            "reward_updated",
            json!({
                "reward_id": id,
                "title": reward.title,
                "cost": reward.cost,
                "is_active": reward.is_active,
            }),
        );
        Ok(reward)
    }

    /// Remove a reward from the catalogue.
    ///
    /// A reward that was ever redeemed is referenced by redemptions and their
    /// ledger entries, so it is deactivated instead of deleted.
    pub async fn delete_reward(&self, actor: &Claims, id: RewardId) -> Result<RewardRemoval, CoreError> {
        authorize(actor, Operation::DeleteReward)?;
        let removal = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let mut reward = reward_in_household(tx.as_mut(), id, actor.household_id).await?;
                let referenced = tx
                    .redemptions(&RedemptionFilter {
                        household_id: actor.household_id,
                        reward_id: Some(id),
                        page: Page::new(Some(1), None),
                        ..Default::default()
                    })
                    .await?;
                let removal = if referenced.is_empty() {
                    tx.delete_reward(id).await?;
                    RewardRemoval::Deleted
                } else {
                    reward.is_active = false;
                    tx.update_reward(&reward).await?;
                    RewardRemoval::Deactivated
                };
                tx.commit().await?;
                Ok(removal)
            })
            .await?;

        info!(reward_id = id, ?removal, removed_by = actor.user_id, "Reward removed");
        self.ctx.audit(actor, "reward_deleted", json!({ "reward_id": id, "removal": removal }));
        Ok(removal)
    }

    /// Spend `cost` from the caller's balance on a reward.
    ///
    /// The user row is locked for the balance check, so concurrent redemptions
    /// by one user serialize and can never jointly overdraw.
    pub async fn redeem(&self, actor: &Claims, reward_id: RewardId) -> Result<RedemptionReceipt, CoreError> {
        authorize(actor, Operation::Redeem)?;

        let receipt = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let reward = reward_in_household(tx.as_mut(), reward_id, actor.household_id).await?;
                if !reward.is_active {
                    return Err(CoreError::InvalidState("reward is not active".to_string()));
                }

                tx.lock_user(actor.user_id).await?;
                let balance = tx.balance(actor.user_id).await?;
                if balance < reward.cost {
                    warn!(
                        user_id = actor.user_id,
                        reward_id,
                        balance = %balance,
                        cost = %reward.cost,
                        "Redemption refused: insufficient balance"
                    );
                    return Err(CoreError::InsufficientBalance);
                }

                let redemption = tx
                    .insert_redemption(NewRedemption {
                        reward_id,
                        user_id: actor.user_id,
                        cost: reward.cost,
                    })
                    .await?;
                let entry = ledger::append(
                    tx.as_mut(),
                    actor.household_id,
                    NewLedgerEntry {
                        user_id: actor.user_id,
                        entry_type: LedgerType::Spend,
                        amount: -reward.cost,
                        description: Some(format!("Redeemed reward: {}", reward.title)),
                        assignment_id: None,
                        redemption_id: Some(redemption.id),
                    },
                )
                .await?;
                tx.commit().await?;

                Ok(RedemptionReceipt {
                    redemption,
                    ledger_entry: entry,
                    balance: balance - reward.cost,
                })
            })
            .await?;

        info!(
            user_id = actor.user_id,
            redemption_id = receipt.redemption.id,
            cost = %receipt.redemption.cost,
            "Reward redeemed"
        );
        self.ctx.audit(
            actor,
            "reward_redeemed",
            json!({
                "reward_id": reward_id,
                "redemption_id": receipt.redemption.id,
                "cost": receipt.redemption.cost,
            }),
        );
        Ok(receipt)
    }

    /// Confirm a pending redemption. The spend already happened at redeem time.
    pub async fn approve_redemption(&self, actor: &Claims, id: RedemptionId) -> Result<RedemptionDecision, CoreError> {
        authorize(actor, Operation::ApproveRedemption)?;
        let redemption = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let (mut redemption, _) = lock_redemption_in_household(tx.as_mut(), id, actor.household_id).await?;
                ensure_pending(&redemption)?;
                redemption.status = RedemptionStatus::Approved;
                redemption.approved_at = Some(chrono::Utc::now());
                tx.update_redemption(&redemption).await?;
                tx.commit().await?;
                Ok(redemption)
            })
            .await?;

        self.ctx.audit(actor, "redemption_approved", json!({ "redemption_id": id }));
        Ok(RedemptionDecision { redemption, refund: None })
    }

    /// Decline a pending redemption and refund its cost with an `adjust` entry
    pub async fn reject_redemption(&self, actor: &Claims, id: RedemptionId) -> Result<RedemptionDecision, CoreError> {
        authorize(actor, Operation::RejectRedemption)?;
        let (redemption, refund) = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let (mut redemption, reward) =
                    lock_redemption_in_household(tx.as_mut(), id, actor.household_id).await?;
                ensure_pending(&redemption)?;
                redemption.status = RedemptionStatus::Rejected;
                tx.update_redemption(&redemption).await?;

                let refund = ledger::append(
                    tx.as_mut(),
                    actor.household_id,
                    NewLedgerEntry {
                        user_id: redemption.user_id,
                        entry_type: LedgerType::Adjust,
                        amount: redemption.cost,
                        description: Some(format!("Refund for rejected redemption: {}", reward.title)),
                        assignment_id: None,
                        redemption_id: Some(redemption.id),
                    },
                )
                .await?;
                tx.commit().await?;
                Ok((redemption, refund))
            })
            .await?;

        self.ctx.audit(
            actor,
            "redemption_rejected",
            json!({ "redemption_id": id, "refund": refund.amount }),
        );
        Ok(RedemptionDecision { redemption, refund: Some(refund) })
    }

    /// Own redemptions, or the household's for managers
    pub async fn list_redemptions(&self, actor: &Claims, query: RedemptionQuery) -> Result<Vec<Redemption>, CoreError> {
        authorize(actor, Operation::ListRedemptions)?;
        let user_id = if is_admin_or_manager(actor.role) {
            query.user_id
        } else {
            Some(actor.user_id)
        };
        let filter = RedemptionFilter {
            household_id: actor.household_id,
            reward_id: None,
            user_id,
            status: query.status,
            page: query.page,
        };
        self.ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                Ok(tx.redemptions(&filter).await?)
            })
            .await
    }
}

fn validate_cost(cost: Decimal) -> Result<(), CoreError> {
    if cost <= Decimal::ZERO {
        return Err(CoreError::Validation("cost must be positive".to_string()));
    }
    validate_amount("cost", cost)
}

fn ensure_pending(redemption: &Redemption) -> Result<(), CoreError> {
    if redemption.status != RedemptionStatus::Pending {
        return Err(CoreError::InvalidState(format!(
            "redemption is already {}",
            redemption.status.as_str()
        )));
    }
    Ok(())
}
