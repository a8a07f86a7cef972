// Household reports built from assignment and ledger aggregates

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::Context;
use crate::auth::guard::{authorize, Operation};
use crate::auth::token::Claims;
use crate::core::errors::CoreError;
use crate::core::models::*;

#[derive(Debug, Clone, Serialize)]
pub struct ChoreReport {
    pub generated_at: DateTime<Utc>,
    pub chores: Vec<ChoreSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EarningsReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
    pub members: Vec<MemberEarnings>,
}

#[derive(Clone)]
pub struct ReportService {
    ctx: Arc<Context>,
}

impl ReportService {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Assignment counts by status for every chore in the household
    pub async fn chores(&self, actor: &Claims) -> Result<ChoreReport, CoreError> {
        authorize(actor, Operation::ViewReports)?;
        let now = Utc::now();
        let chores = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                Ok(tx.chore_summaries(actor.household_id, now).await?)
            })
            .await?;
        Ok(ChoreReport { generated_at: now, chores })
    }

    /// Earned, spent and adjusted totals per member within an optional window
    pub async fn earnings(
        &self,
        actor: &Claims,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<EarningsReport, CoreError> {
        authorize(actor, Operation::ViewReports)?;
        if matches!((from, to), (Some(from), Some(to)) if from > to) {
            return Err(CoreError::Validation("from must not be after to".to_string()));
        }
        let members = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                Ok(tx.earnings(actor.household_id, from, to).await?)
            })
            .await?;
        Ok(EarningsReport { from, to, members })
    }
}
