// Chore definitions and their initial assignments

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use super::assignments::AssignmentView;
use super::{
    chore_in_household, optional_text, required_text, user_in_household, validate_amount, validate_percent, Context,
};
use crate::auth::guard::{authorize, Operation};
use crate::auth::token::Claims;
use crate::core::errors::CoreError;
use crate::core::models::*;
use crate::store::{ChoreFilter, Page};

#[derive(Debug, Clone)]
pub struct CreateChore {
    pub title: String,
    pub description: Option<String>,
    pub value: Decimal,
    pub priority: Priority,
    pub auto_approve: bool,
    pub proof_required: bool,
    pub late_penalty_pct: Decimal,
    pub expire_days: Option<i32>,
    pub assignees: Vec<UserId>,
    pub due_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChoreWithAssignments {
    pub chore: Chore,
    pub assignments: Vec<AssignmentView>,
}

#[derive(Debug, Clone, Default)]
pub struct ChoreQuery {
    pub priority: Option<Priority>,
    pub created_by: Option<UserId>,
    pub page: Page,
}

/// Fields a manager may change on an existing chore. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct UpdateChore {
    pub title: Option<String>,
    pub description: Option<String>,
    pub value: Option<Decimal>,
    pub priority: Option<Priority>,
    pub auto_approve: Option<bool>,
    pub proof_required: Option<bool>,
    pub late_penalty_pct: Option<Decimal>,
    pub expire_days: Option<i32>,
}

impl UpdateChore {
    /// Apply the changes to `chore`, validating each one
    fn apply_to(self, chore: &mut Chore) -> Result<(), CoreError> {
        if let Some(title) = self.title {
            chore.title = required_text("title", &title)?;
        }
        if self.description.is_some() {
            chore.description = optional_text(self.description);
        }
        if let Some(value) = self.value {
            validate_value(value)?;
            chore.value = value;
        }
        if let Some(priority) = self.priority {
            chore.priority = priority;
        }
        if let Some(auto_approve) = self.auto_approve {
            chore.auto_approve = auto_approve;
        }
        if let Some(proof_required) = self.proof_required {
            chore.proof_required = proof_required;
        }
        if let Some(pct) = self.late_penalty_pct {
            validate_percent("late_penalty_pct", pct)?;
            chore.late_penalty_pct = pct;
        }
        if self.expire_days.is_some() {
            validate_expire_days(self.expire_days)?;
            chore.expire_days = self.expire_days;
        }
        Ok(())
    }
}

fn validate_value(value: Decimal) -> Result<(), CoreError> {
    if value < Decimal::ZERO {
        return Err(CoreError::Validation("value must not be negative".to_string()));
    }
    validate_amount("value", value)
}

fn validate_expire_days(expire_days: Option<i32>) -> Result<(), CoreError> {
    if matches!(expire_days, Some(days) if days <= 0) {
        return Err(CoreError::Validation("expire_days must be positive".to_string()));
    }
    Ok(())
}

impl CreateChore {
    fn validate(&self) -> Result<(), CoreError> {
        validate_value(self.value)?;
        validate_percent("late_penalty_pct", self.late_penalty_pct)?;
        validate_expire_days(self.expire_days)?;
        if self.assignees.is_empty() {
            return Err(CoreError::Validation("at least one assignee is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ChoreService {
    ctx: Arc<Context>,
}

impl ChoreService {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Create a chore and one pending assignment per assignee, atomically
    pub async fn create_chore(&self, actor: &Claims, request: CreateChore) -> Result<ChoreWithAssignments, CoreError> {
        authorize(actor, Operation::CreateChore)?;
        request.validate()?;
        let title = required_text("title", &request.title)?;
        // Duplicate assignee ids collapse to one assignment
        let assignees: BTreeSet<UserId> = request.assignees.iter().copied().collect();

        let (chore, assignments) = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                for user_id in &assignees {
                    user_in_household(tx.as_mut(), *user_id, actor.household_id).await?;
                }

                let chore = tx
                    .insert_chore(NewChore {
                        household_id: actor.household_id,
                        title,
                        description: optional_text(request.description),
                        value: request.value,
                        priority: request.priority,
                        auto_approve: request.auto_approve,
                        proof_required: request.proof_required,
                        late_penalty_pct: request.late_penalty_pct,
                        expire_days: request.expire_days,
                        created_by: actor.user_id,
                    })
                    .await?;

                let mut assignments = Vec::with_capacity(assignees.len());
                for user_id in &assignees {
                    let assignment = tx
                        .insert_assignment(NewAssignment {
                            chore_id: chore.id,
                            assigned_to: *user_id,
                            due_date: request.due_date,
                        })
                        .await?;
                    assignments.push(assignment);
                }

                tx.commit().await?;
                Ok((chore, assignments))
            })
            .await?;

        info!(
            chore_id = chore.id,
            household_id = actor.household_id,
            assignments = assignments.len(),
            "Chore created"
        );
        self.ctx.audit(
            actor,
            "chore_created",
            json!({
                "chore_id": chore.id,
                "title": chore.title,
                "value": chore.value,
                "assignees": assignees,
            }),
        );

        let now = Utc::now();
        Ok(ChoreWithAssignments {
            chore,
            assignments: assignments.into_iter().map(|a| AssignmentView::at(a, now)).collect(),
        })
    }

    pub async fn list_chores(&self, actor: &Claims, query: ChoreQuery) -> Result<Vec<Chore>, CoreError> {
        authorize(actor, Operation::ListChores)?;
        let filter = ChoreFilter {
            household_id: actor.household_id,
            priority: query.priority,
            created_by: query.created_by,
            page: query.page,
        };
        self.ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                Ok(tx.chores(&filter).await?)
            })
            .await
    }

    pub async fn get_chore(&self, actor: &Claims, id: ChoreId) -> Result<Chore, CoreError> {
        authorize(actor, Operation::ViewChore)?;
        self.ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                chore_in_household(tx.as_mut(), id, actor.household_id).await
            })
            .await
    }

    /// Edit a chore. New values apply to approvals made after the change.
    pub async fn update_chore(&self, actor: &Claims, id: ChoreId, changes: UpdateChore) -> Result<Chore, CoreError> {
        authorize(actor, Operation::UpdateChore)?;
        let chore = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let mut chore = chore_in_household(tx.as_mut(), id, actor.household_id).await?;
                changes.apply_to(&mut chore)?;
                tx.update_chore(&chore).await?;
                tx.commit().await?;
                Ok(chore)
            })
            .await?;

        info!(chore_id = id, updated_by = actor.user_id, "Chore updated");
        self.ctx.audit(
            actor,
            "chore_updated",
            json!({ "chore_id": id, "title": chore.title, "value": chore.value }),
        );
        Ok(chore)
    }

    /// Delete a chore and its assignments.
    ///
    /// A chore with an approved assignment has credited someone's ledger and
    /// is kept; deleting it fails with `Conflict`.
    pub async fn delete_chore(&self, actor: &Claims, id: ChoreId) -> Result<(), CoreError> {
        authorize(actor, Operation::DeleteChore)?;
        let removed = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                chore_in_household(tx.as_mut(), id, actor.household_id).await?;
                let assignments = tx.lock_chore_assignments(id).await?;
                if assignments.iter().any(|a| a.status == AssignmentStatus::Approved) {
                    return Err(CoreError::Conflict(
                        "chore has approved assignments backing ledger entries".to_string(),
                    ));
                }
                tx.delete_chore(id).await?;
                tx.commit().await?;
                Ok(assignments.len())
            })
            .await?;

        info!(chore_id = id, assignments = removed, deleted_by = actor.user_id, "Chore deleted");
        self.ctx.audit(actor, "chore_deleted", json!({ "chore_id": id, "assignments": removed }));
        Ok(())
    }
}
