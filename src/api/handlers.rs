// Request handlers for API endpoints
//
// Handlers only translate between HTTP and the services; every rule lives in
// the service layer.

use axum::{extract::State, http::HeaderMap, http::StatusCode, response::Json, Extension};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::extract::{ApiJson, ApiPath, ApiQuery};
use crate::api::responses::{ApiError, ApiResponse, HealthResponse};
use crate::api::AppState;
use crate::auth::auth_middleware::extract_bearer_token;
use crate::auth::token::Claims;
use crate::core::errors::CoreError;
use crate::core::models::*;
use crate::service::accounts::{AuthResponse, JoinRequest, ProfileUpdate, Registration};
use crate::service::assignments::{AssignmentQuery, AssignmentView, TransitionOutcome};
use crate::service::chores::{ChoreQuery, ChoreWithAssignments, CreateChore, UpdateChore};
use crate::service::ledger::{AuditQuery, LedgerQuery};
use crate::service::reports::{ChoreReport, EarningsReport};
use crate::service::rewards::{
    CreateReward, RedemptionDecision, RedemptionQuery, RedemptionReceipt, RewardRemoval, UpdateReward,
};
use crate::store::Page;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;
type Created<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

fn created<T: Serialize>(data: T) -> Created<T> {
    Ok((StatusCode::CREATED, ApiResponse::ok(data)))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health_handler(State(app_state): State<AppState>) -> Json<HealthResponse> {
    let store = match tokio::time::timeout(Duration::from_millis(500), app_state.store.ping()).await {
        Ok(Ok(())) => "connected".to_string(),
        Ok(Err(e)) => {
            warn!(error = %e, "Store ping failed");
            "unavailable".to_string()
        }
        Err(_) => {
            debug!("Store ping timed out in health check");
            "slow".to_string()
        }
    };
    let status = if store == "connected" { "healthy" } else { "degraded" };
    Json(HealthResponse {
        status: status.to_string(),
        store,
    })
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub household_name: String,
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct JoinHouseholdRequest {
    pub invite_code: String,
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub notification_pref_email: Option<bool>,
    pub notification_pref_push: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: Role,
}

/// POST /api/v1/auth/register
pub async fn register(
    State(app_state): State<AppState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Created<AuthResponse> {
    let response = app_state
        .services
        .accounts
        .register(Registration {
            household_name: request.household_name,
            name: request.name,
            email: request.email,
            password: request.password,
        })
        .await?;
    created(response)
}

/// POST /api/v1/auth/login
pub async fn login(
    State(app_state): State<AppState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> ApiResult<AuthResponse> {
    let response = app_state
        .services
        .accounts
        .login(&request.email, &request.password)
        .await?;
    Ok(ApiResponse::ok(response))
}

/// POST /api/v1/households/join
pub async fn join_household(
    State(app_state): State<AppState>,
    ApiJson(request): ApiJson<JoinHouseholdRequest>,
) -> Created<AuthResponse> {
    let response = app_state
        .services
        .accounts
        .join_household(JoinRequest {
            invite_code: request.invite_code,
            name: request.name,
            email: request.email,
            password: request.password,
        })
        .await?;
    created(response)
}

/// POST /api/v1/auth/refresh
pub async fn refresh_token(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
) -> ApiResult<TokenResponse> {
    let token = extract_bearer_token(&headers).ok_or(CoreError::Unauthenticated)?;
    let token = app_state.services.accounts.refresh_token(&claims, &token)?;
    Ok(ApiResponse::ok(TokenResponse { token }))
}

/// GET /api/v1/users/me
pub async fn current_user(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<User> {
    Ok(ApiResponse::ok(app_state.services.accounts.current_user(&claims).await?))
}

/// PUT /api/v1/users/me
pub async fn update_profile(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(request): ApiJson<UpdateProfileRequest>,
) -> ApiResult<User> {
    let update = ProfileUpdate {
        name: request.name,
        email: request.email,
        notification_pref_email: request.notification_pref_email,
        notification_pref_push: request.notification_pref_push,
    };
    Ok(ApiResponse::ok(
        app_state.services.accounts.update_profile(&claims, update).await?,
    ))
}

/// GET /api/v1/users
pub async fn household_members(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Vec<User>> {
    Ok(ApiResponse::ok(app_state.services.accounts.household_members(&claims).await?))
}

/// PUT /api/v1/users/:id/role
pub async fn set_role(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(user_id): ApiPath<UserId>,
    ApiJson(request): ApiJson<SetRoleRequest>,
) -> ApiResult<User> {
    Ok(ApiResponse::ok(
        app_state.services.accounts.set_role(&claims, user_id, request.role).await?,
    ))
}

/// GET /api/v1/households/me
pub async fn current_household(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Household> {
    Ok(ApiResponse::ok(app_state.services.accounts.household(&claims).await?))
}

/// POST /api/v1/households/invite
pub async fn regenerate_invite(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Household> {
    Ok(ApiResponse::ok(app_state.services.accounts.regenerate_invite(&claims).await?))
}

// ---------------------------------------------------------------------------
// Chores
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateChoreRequest {
    pub title: String,
    pub description: Option<String>,
    pub value: Decimal,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub proof_required: bool,
    #[serde(default)]
    pub late_penalty_pct: Decimal,
    pub expire_days: Option<i32>,
    pub assigned_to: Vec<UserId>,
    pub due_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChoreRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub value: Option<Decimal>,
    pub priority: Option<Priority>,
    pub auto_approve: Option<bool>,
    pub proof_required: Option<bool>,
    pub late_penalty_pct: Option<Decimal>,
    pub expire_days: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct ChoreDeleted {
    pub chore_id: ChoreId,
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChoreParams {
    pub priority: Option<Priority>,
    pub created_by: Option<UserId>,
    // Not flattened: serde_urlencoded cannot parse numbers through flatten
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// POST /api/v1/chores
pub async fn create_chore(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(request): ApiJson<CreateChoreRequest>,
) -> Created<ChoreWithAssignments> {
    let chore = app_state
        .services
        .chores
        .create_chore(
            &claims,
            CreateChore {
                title: request.title,
                description: request.description,
                value: request.value,
                priority: request.priority,
                auto_approve: request.auto_approve,
                proof_required: request.proof_required,
                late_penalty_pct: request.late_penalty_pct,
                expire_days: request.expire_days,
                assignees: request.assigned_to,
                due_date: request.due_date,
            },
        )
        .await?;
    created(chore)
}

/// GET /api/v1/chores
pub async fn list_chores(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiQuery(params): ApiQuery<ChoreParams>,
) -> ApiResult<Vec<Chore>> {
    let query = ChoreQuery {
        priority: params.priority,
        created_by: params.created_by,
        page: Page::new(params.limit, params.offset),
    };
    Ok(ApiResponse::ok(app_state.services.chores.list_chores(&claims, query).await?))
}

/// GET /api/v1/chores/:id
pub async fn get_chore(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(id): ApiPath<ChoreId>,
) -> ApiResult<Chore> {
    Ok(ApiResponse::ok(app_state.services.chores.get_chore(&claims, id).await?))
}

/// PUT /api/v1/chores/:id
pub async fn update_chore(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(id): ApiPath<ChoreId>,
    ApiJson(request): ApiJson<UpdateChoreRequest>,
) -> ApiResult<Chore> {
    let changes = UpdateChore {
        title: request.title,
        description: request.description,
        value: request.value,
        priority: request.priority,
        auto_approve: request.auto_approve,
        proof_required: request.proof_required,
        late_penalty_pct: request.late_penalty_pct,
        expire_days: request.expire_days,
    };
    Ok(ApiResponse::ok(
        app_state.services.chores.update_chore(&claims, id, changes).await?,
    ))
}

/// DELETE /api/v1/chores/:id
pub async fn delete_chore(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(id): ApiPath<ChoreId>,
) -> ApiResult<ChoreDeleted> {
    app_state.services.chores.delete_chore(&claims, id).await?;
    Ok(ApiResponse::ok(ChoreDeleted { chore_id: id, deleted: true }))
}

// ---------------------------------------------------------------------------
// Assignments
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AssignmentParams {
    pub assigned_to: Option<UserId>,
    pub chore_id: Option<ChoreId>,
    pub status: Option<AssignmentStatus>,
    pub due_after: Option<DateTime<Utc>>,
    pub due_before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub percent_complete: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub percent_complete: Decimal,
    /// Base64-encoded proof image
    pub proof_image: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApprovalRequest {
    pub approval_notes: Option<String>,
}

/// GET /api/v1/assignments
pub async fn list_assignments(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiQuery(params): ApiQuery<AssignmentParams>,
) -> ApiResult<Vec<AssignmentView>> {
    let query = AssignmentQuery {
        assigned_to: params.assigned_to,
        chore_id: params.chore_id,
        status: params.status,
        due_after: params.due_after,
        due_before: params.due_before,
        page: Page::new(params.limit, params.offset),
    };
    Ok(ApiResponse::ok(app_state.services.assignments.list(&claims, query).await?))
}

/// GET /api/v1/assignments/overdue
pub async fn overdue_assignments(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Vec<AssignmentView>> {
    Ok(ApiResponse::ok(app_state.services.assignments.overdue(&claims).await?))
}

/// GET /api/v1/assignments/:id
pub async fn get_assignment(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(id): ApiPath<AssignmentId>,
) -> ApiResult<AssignmentView> {
    Ok(ApiResponse::ok(app_state.services.assignments.get(&claims, id).await?))
}

/// PUT /api/v1/assignments/:id/progress
pub async fn update_progress(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(id): ApiPath<AssignmentId>,
    ApiJson(request): ApiJson<ProgressRequest>,
) -> ApiResult<AssignmentView> {
    let view = app_state
        .services
        .assignments
        .update_progress(&claims, id, request.percent_complete)
        .await?;
    Ok(ApiResponse::ok(view))
}

/// POST /api/v1/assignments/:id/complete
pub async fn complete_assignment(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(id): ApiPath<AssignmentId>,
    ApiJson(request): ApiJson<CompleteRequest>,
) -> ApiResult<TransitionOutcome> {
    let proof = match request.proof_image.as_deref().map(str::trim) {
        Some(encoded) if !encoded.is_empty() => Some(
            STANDARD
                .decode(encoded)
                .map_err(|_| ApiError::validation("proof_image must be base64"))?,
        ),
        _ => None,
    };
    let outcome = app_state
        .services
        .assignments
        .complete(&claims, id, request.percent_complete, proof)
        .await?;
    Ok(ApiResponse::ok(outcome))
}

/// POST /api/v1/assignments/:id/approve
pub async fn approve_assignment(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(id): ApiPath<AssignmentId>,
    ApiJson(request): ApiJson<ApprovalRequest>,
) -> ApiResult<TransitionOutcome> {
    let outcome = app_state
        .services
        .assignments
        .approve(&claims, id, request.approval_notes)
        .await?;
    Ok(ApiResponse::ok(outcome))
}

/// POST /api/v1/assignments/:id/reject
pub async fn reject_assignment(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(id): ApiPath<AssignmentId>,
    ApiJson(request): ApiJson<ApprovalRequest>,
) -> ApiResult<AssignmentView> {
    let view = app_state
        .services
        .assignments
        .reject(&claims, id, request.approval_notes)
        .await?;
    Ok(ApiResponse::ok(view))
}

// ---------------------------------------------------------------------------
// Rewards and redemptions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRewardRequest {
    pub title: String,
    pub description: Option<String>,
    pub cost: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRewardRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub cost: Option<Decimal>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct RewardRemoved {
    pub reward_id: RewardId,
    pub removal: RewardRemoval,
}

#[derive(Debug, Deserialize)]
pub struct RedemptionParams {
    pub user_id: Option<UserId>,
    pub status: Option<RedemptionStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/v1/rewards
pub async fn list_rewards(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Vec<Reward>> {
    Ok(ApiResponse::ok(app_state.services.rewards.list_rewards(&claims).await?))
}

/// POST /api/v1/rewards
pub async fn create_reward(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(request): ApiJson<CreateRewardRequest>,
) -> Created<Reward> {
    let reward = app_state
        .services
        .rewards
        .create_reward(
            &claims,
            CreateReward {
                title: request.title,
                description: request.description,
                cost: request.cost,
            },
        )
        .await?;
    created(reward)
}

/// PUT /api/v1/rewards/:id
pub async fn update_reward(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(id): ApiPath<RewardId>,
    ApiJson(request): ApiJson<UpdateRewardRequest>,
) -> ApiResult<Reward> {
    let changes = UpdateReward {
        title: request.title,
        description: request.description,
        cost: request.cost,
        is_active: request.is_active,
    };
    let reward = app_state.services.rewards.update_reward(&claims, id, changes).await?;
    Ok(ApiResponse::ok(reward))
}

/// GET /api/v1/rewards/:id
pub async fn get_reward(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(id): ApiPath<RewardId>,
) -> ApiResult<Reward> {
    Ok(ApiResponse::ok(app_state.services.rewards.get_reward(&claims, id).await?))
}

/// DELETE /api/v1/rewards/:id
pub async fn delete_reward(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(id): ApiPath<RewardId>,
) -> ApiResult<RewardRemoved> {
    let removal = app_state.services.rewards.delete_reward(&claims, id).await?;
    Ok(ApiResponse::ok(RewardRemoved { reward_id: id, removal }))
}

/// POST /api/v1/rewards/:id/redeem
pub async fn redeem_reward(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(id): ApiPath<RewardId>,
) -> Created<RedemptionReceipt> {
    created(app_state.services.rewards.redeem(&claims, id).await?)
}

/// GET /api/v1/redemptions
pub async fn list_redemptions(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiQuery(params): ApiQuery<RedemptionParams>,
) -> ApiResult<Vec<Redemption>> {
    let query = RedemptionQuery {
        user_id: params.user_id,
        status: params.status,
        page: Page::new(params.limit, params.offset),
    };
    Ok(ApiResponse::ok(
        app_state.services.rewards.list_redemptions(&claims, query).await?,
    ))
}

/// POST /api/v1/redemptions/:id/approve
pub async fn approve_redemption(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(id): ApiPath<RedemptionId>,
) -> ApiResult<RedemptionDecision> {
    Ok(ApiResponse::ok(
        app_state.services.rewards.approve_redemption(&claims, id).await?,
    ))
}

/// POST /api/v1/redemptions/:id/reject
pub async fn reject_redemption(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiPath(id): ApiPath<RedemptionId>,
) -> ApiResult<RedemptionDecision> {
    Ok(ApiResponse::ok(
        app_state.services.rewards.reject_redemption(&claims, id).await?,
    ))
}

// ---------------------------------------------------------------------------
// Ledger and audit
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LedgerParams {
    pub user_id: Option<UserId>,
    #[serde(rename = "type")]
    pub entry_type: Option<LedgerType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceParams {
    pub user_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub user_id: UserId,
    pub amount: Decimal,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct AuditParams {
    pub user_id: Option<UserId>,
    pub action: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/v1/ledger
pub async fn ledger_entries(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiQuery(params): ApiQuery<LedgerParams>,
) -> ApiResult<Vec<LedgerEntry>> {
    let query = LedgerQuery {
        user_id: params.user_id,
        entry_type: params.entry_type,
        from: params.from,
        to: params.to,
        page: Page::new(params.limit, params.offset),
    };
    Ok(ApiResponse::ok(app_state.services.ledger.entries(&claims, query).await?))
}

/// GET /api/v1/ledger/balance
pub async fn balance(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiQuery(params): ApiQuery<BalanceParams>,
) -> ApiResult<UserBalance> {
    Ok(ApiResponse::ok(
        app_state.services.ledger.balance(&claims, params.user_id).await?,
    ))
}

/// GET /api/v1/ledger/balances
pub async fn household_balances(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Vec<UserBalance>> {
    Ok(ApiResponse::ok(app_state.services.ledger.household_balances(&claims).await?))
}

/// POST /api/v1/ledger/adjust
pub async fn adjust_balance(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(request): ApiJson<AdjustRequest>,
) -> Created<LedgerEntry> {
    let entry = app_state
        .services
        .ledger
        .adjust_balance(&claims, request.user_id, request.amount, &request.description)
        .await?;
    created(entry)
}

/// GET /api/v1/audit
pub async fn audit_log(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiQuery(params): ApiQuery<AuditParams>,
) -> ApiResult<Vec<AuditLog>> {
    let query = AuditQuery {
        user_id: params.user_id,
        action: params.action,
        from: params.from,
        to: params.to,
        page: Page::new(params.limit, params.offset),
    };
    Ok(ApiResponse::ok(app_state.services.ledger.audit_log(&claims, query).await?))
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct EarningsParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// GET /api/v1/reports/chores
pub async fn chore_report(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<ChoreReport> {
    Ok(ApiResponse::ok(app_state.services.reports.chores(&claims).await?))
}

/// GET /api/v1/reports/earnings
pub async fn earnings_report(
    State(app_state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiQuery(params): ApiQuery<EarningsParams>,
) -> ApiResult<EarningsReport> {
    Ok(ApiResponse::ok(
        app_state
            .services
            .reports
            .earnings(&claims, params.from, params.to)
            .await?,
    ))
}
