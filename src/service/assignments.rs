// Assignment lifecycle: progress, completion, approval, rejection

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::{
    assignment_in_household, ledger, lock_assignment_in_household, optional_text, validate_percent, Context,
};
use crate::auth::guard::{authorize, is_admin_or_manager, Operation};
use crate::auth::token::Claims;
use crate::core::errors::CoreError;
use crate::core::models::*;
use crate::store::{AssignmentFilter, Page, StoreTx};

/// Assignment as returned to callers, with the time-derived late flag
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentView {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub late: bool,
}

impl AssignmentView {
    pub fn at(assignment: Assignment, now: DateTime<Utc>) -> Self {
        let late = assignment.is_late_at(now) || assignment.completed_late();
        Self { assignment, late }
    }
}

/// Result of a transition that may credit the assignee
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub assignment: AssignmentView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_entry: Option<LedgerEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct AssignmentQuery {
    pub assigned_to: Option<UserId>,
    pub chore_id: Option<ChoreId>,
    pub status: Option<AssignmentStatus>,
    pub due_after: Option<DateTime<Utc>>,
    pub due_before: Option<DateTime<Utc>>,
    pub page: Page,
}

fn illegal(action: &str, status: AssignmentStatus) -> CoreError {
    CoreError::InvalidState(format!("cannot {} an assignment that is {}", action, status))
}

/// Only the assignee, or a manager of the household, may work an assignment
fn ensure_may_work(actor: &Claims, assignment: &Assignment) -> Result<(), CoreError> {
    if assignment.assigned_to == actor.user_id || is_admin_or_manager(actor.role) {
        Ok(())
    } else {
        Err(CoreError::Forbidden("assignment belongs to another member".to_string()))
    }
}

/// Apply the approve transition and credit the assignee in the caller's transaction.
///
/// The earn amount is the chore value less the late penalty when completion
/// came after the due date. A zero amount writes no entry.
async fn approve_in_tx(
    tx: &mut dyn StoreTx,
    household_id: HouseholdId,
    assignment: &mut Assignment,
    chore: &Chore,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<Option<LedgerEntry>, CoreError> {
    assignment.status = assignment
        .status
        .apply(Transition::Approve)
        .ok_or_else(|| illegal("approve", assignment.status))?;
    assignment.approved_at = Some(now);
    if notes.is_some() {
        assignment.approval_notes = notes;
    }

    let amount = chore.earned_value(assignment.completed_late());
    if amount.is_zero() {
        return Ok(None);
    }
    let entry = ledger::append(
        tx,
        household_id,
        NewLedgerEntry {
            user_id: assignment.assigned_to,
            entry_type: LedgerType::Earn,
            amount,
            description: Some(format!("Completed chore: {}", chore.title)),
            assignment_id: Some(assignment.id),
            redemption_id: None,
        },
    )
    .await?;
    Ok(Some(entry))
}

#[derive(Clone)]
pub struct AssignmentService {
    ctx: Arc<Context>,
}

impl AssignmentService {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Household assignments for managers, own assignments for everyone else
    pub async fn list(&self, actor: &Claims, query: AssignmentQuery) -> Result<Vec<AssignmentView>, CoreError> {
        authorize(actor, Operation::ListAssignments)?;
        let assigned_to = if is_admin_or_manager(actor.role) {
            query.assigned_to
        } else {
            Some(actor.user_id)
        };
        let filter = AssignmentFilter {
            household_id: actor.household_id,
            assigned_to,
            chore_id: query.chore_id,
            status: query.status,
            due_after: query.due_after,
            due_before: query.due_before,
            page: query.page,
        };

        let rows = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                Ok(tx.assignments(&filter).await?)
            })
            .await?;
        let now = Utc::now();
        Ok(rows.into_iter().map(|a| AssignmentView::at(a, now)).collect())
    }

    pub async fn get(&self, actor: &Claims, id: AssignmentId) -> Result<AssignmentView, CoreError> {
        authorize(actor, Operation::ViewAssignment)?;
        let assignment = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let (assignment, _) = assignment_in_household(tx.as_mut(), id, actor.household_id).await?;
                Ok(assignment)
            })
            .await?;
        ensure_may_work(actor, &assignment)?;
        Ok(AssignmentView::at(assignment, Utc::now()))
    }

    /// Open assignments past their due date, computed at read time
    pub async fn overdue(&self, actor: &Claims) -> Result<Vec<AssignmentView>, CoreError> {
        authorize(actor, Operation::ViewOverdue)?;
        let now = Utc::now();
        let rows = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                Ok(tx.overdue_assignments(actor.household_id, now).await?)
            })
            .await?;
        Ok(rows
            .into_iter()
            .filter(|a| is_admin_or_manager(actor.role) || a.assigned_to == actor.user_id)
            .map(|a| AssignmentView::at(a, now))
            .collect())
    }

    /// Record progress. A positive percent starts the work; zero leaves the status alone.
    pub async fn update_progress(
        &self,
        actor: &Claims,
        id: AssignmentId,
        percent: Decimal,
    ) -> Result<AssignmentView, CoreError> {
        authorize(actor, Operation::ReportProgress)?;
        validate_percent("percent_complete", percent)?;

        let assignment = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let (mut assignment, _) = lock_assignment_in_household(tx.as_mut(), id, actor.household_id).await?;
                ensure_may_work(actor, &assignment)?;

                let started = percent > Decimal::ZERO;
                assignment.status = assignment
                    .status
                    .apply(Transition::Progress { started })
                    .ok_or_else(|| illegal("report progress on", assignment.status))?;
                assignment.percent_complete = percent;

                tx.update_assignment(&assignment).await?;
                tx.commit().await?;
                Ok(assignment)
            })
            .await?;

        self.ctx.audit(
            actor,
            "assignment_progress",
            json!({ "assignment_id": id, "percent_complete": percent }),
        );
        Ok(AssignmentView::at(assignment, Utc::now()))
    }

    /// Mark an assignment completed, cascading into approval for auto-approve chores.
    ///
    /// Proof-required chores reject an empty proof with `ProofRequired` and
    /// nothing is written.
    pub async fn complete(
        &self,
        actor: &Claims,
        id: AssignmentId,
        percent: Decimal,
        proof: Option<Vec<u8>>,
    ) -> Result<TransitionOutcome, CoreError> {
        authorize(actor, Operation::CompleteAssignment)?;
        validate_percent("percent_complete", percent)?;
        let threshold = self.ctx.settings.completion_threshold;
        if percent < threshold {
            return Err(CoreError::Validation(format!(
                "percent_complete must be at least {} to complete",
                threshold
            )));
        }

        let now = Utc::now();
        let (assignment, entry, auto_approved) = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let (mut assignment, chore) = lock_assignment_in_household(tx.as_mut(), id, actor.household_id).await?;
                ensure_may_work(actor, &assignment)?;

                let next = assignment
                    .status
                    .apply(Transition::Complete)
                    .ok_or_else(|| illegal("complete", assignment.status))?;
                let proof = proof.filter(|p| !p.is_empty());
                if chore.proof_required && proof.is_none() {
                    return Err(CoreError::ProofRequired);
                }

                assignment.status = next;
                assignment.percent_complete = percent;
                assignment.completed_at = Some(now);
                if proof.is_some() {
                    assignment.proof = proof;
                }

                let mut entry = None;
                if chore.auto_approve {
                    entry = approve_in_tx(tx.as_mut(), actor.household_id, &mut assignment, &chore, None, now).await?;
                }

                tx.update_assignment(&assignment).await?;
                tx.commit().await?;
                Ok((assignment, entry, chore.auto_approve))
            })
            .await?;

        info!(
            assignment_id = id,
            user_id = actor.user_id,
            auto_approved,
            "Assignment completed"
        );
        self.ctx.audit(
            actor,
            "assignment_completed",
            json!({ "assignment_id": id, "auto_approved": auto_approved }),
        );
        if let Some(entry) = &entry {
            self.audit_approval(actor, &assignment, entry);
        }
        Ok(TransitionOutcome {
            assignment: AssignmentView::at(assignment, now),
            ledger_entry: entry,
        })
    }

    /// Approve a completed assignment and credit the assignee exactly once
    pub async fn approve(
        &self,
        actor: &Claims,
        id: AssignmentId,
        notes: Option<String>,
    ) -> Result<TransitionOutcome, CoreError> {
        authorize(actor, Operation::ApproveAssignment)?;
        let notes = optional_text(notes);
        let now = Utc::now();

        let (assignment, entry) = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let (mut assignment, chore) = lock_assignment_in_household(tx.as_mut(), id, actor.household_id).await?;
                let entry = approve_in_tx(tx.as_mut(), actor.household_id, &mut assignment, &chore, notes, now).await?;
                tx.update_assignment(&assignment).await?;
                tx.commit().await?;
                Ok((assignment, entry))
            })
            .await?;

        info!(assignment_id = id, approver = actor.user_id, "Assignment approved");
        match &entry {
            Some(entry) => self.audit_approval(actor, &assignment, entry),
            None => self.ctx.audit(actor, "assignment_approved", json!({ "assignment_id": id, "amount": "0" })),
        }
        Ok(TransitionOutcome {
            assignment: AssignmentView::at(assignment, now),
            ledger_entry: entry,
        })
    }

    /// Reject a completed assignment. No ledger entry is written.
    pub async fn reject(
        &self,
        actor: &Claims,
        id: AssignmentId,
        notes: Option<String>,
    ) -> Result<AssignmentView, CoreError> {
        authorize(actor, Operation::RejectAssignment)?;
        let notes = optional_text(notes);

        let assignment = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let (mut assignment, _) = lock_assignment_in_household(tx.as_mut(), id, actor.household_id).await?;
                assignment.status = assignment
                    .status
                    .apply(Transition::Reject)
                    .ok_or_else(|| illegal("reject", assignment.status))?;
                if notes.is_some() {
                    assignment.approval_notes = notes;
                }
                tx.update_assignment(&assignment).await?;
                tx.commit().await?;
                Ok(assignment)
            })
            .await?;

        info!(assignment_id = id, approver = actor.user_id, "Assignment rejected");
        self.ctx.audit(actor, "assignment_rejected", json!({ "assignment_id": id }));
        Ok(AssignmentView::at(assignment, Utc::now()))
    }

    fn audit_approval(&self, actor: &Claims, assignment: &Assignment, entry: &LedgerEntry) {
        self.ctx.audit(
            actor,
            "assignment_approved",
            json!({
                "assignment_id": assignment.id,
                "assignee": assignment.assigned_to,
                "amount": entry.amount,
                "late": assignment.completed_late(),
            }),
        );
    }
}
