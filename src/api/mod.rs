// Axum web server layer

use axum::{
    error_handling::HandleErrorLayer,
    http::StatusCode,
    middleware,
    routing::{delete, get, post, put, MethodRouter},
    BoxError, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub mod extract;
pub mod handlers;
pub mod responses;

use crate::auth::auth_middleware::{auth_middleware, require_roles, AuthState};
use crate::auth::guard::RoleSet;
use crate::core::errors::ErrorKind;
use crate::service::Services;
use crate::store::Store;
use responses::ApiError;

pub use crate::config::Config;

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
}

/// Restrict a route to admins and managers. Runs after `auth_middleware`.
fn managers_only(route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.route_layer(middleware::from_fn_with_state(
        RoleSet::ADMIN_OR_MANAGER,
        require_roles,
    ))
}

/// Create the Axum router with all routes and middleware
///
/// Public routes: health, register, login, join.
/// Everything else requires a bearer token; management routes additionally
/// require the admin-or-manager role set.
///
/// Middleware stack (outermost to innermost):
/// - Request timeout (tower::timeout)
/// - Body size limit (tower-http::limit), sized for proof images
/// - Tracing (tower-http::trace)
/// - Auth middleware and role guard (protected routes only)
pub fn create_router(app_state: AppState, auth_state: Arc<AuthState>) -> Router {
    use handlers::*;

    let public = Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/auth/register", post(register))
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/households/join", post(join_household));

    let protected = Router::new()
        .route("/api/v1/auth/refresh", post(refresh_token))
        // Users and households
        .route("/api/v1/users/me", get(current_user).put(update_profile))
        .route("/api/v1/users", managers_only(get(household_members)))
        .route("/api/v1/users/:id/role", managers_only(put(set_role)))
        .route("/api/v1/households/me", get(current_household))
        .route("/api/v1/households/invite", managers_only(post(regenerate_invite)))
        // Chores
        .route("/api/v1/chores", get(list_chores).merge(managers_only(post(create_chore))))
        .route(
            "/api/v1/chores/:id",
            get(get_chore).merge(managers_only(put(update_chore).merge(delete(delete_chore)))),
        )
        // Assignments
        .route("/api/v1/assignments", get(list_assignments))
        .route("/api/v1/assignments/overdue", get(overdue_assignments))
        .route("/api/v1/assignments/:id", get(get_assignment))
        .route("/api/v1/assignments/:id/progress", put(update_progress))
        .route("/api/v1/assignments/:id/complete", post(complete_assignment))
        .route("/api/v1/assignments/:id/approve", managers_only(post(approve_assignment)))
        .route("/api/v1/assignments/:id/reject", managers_only(post(reject_assignment)))
        // Rewards and redemptions
        .route("/api/v1/rewards", get(list_rewards).merge(managers_only(post(create_reward))))
        .route(
            "/api/v1/rewards/:id",
            get(get_reward).merge(managers_only(put(update_reward).merge(delete(delete_reward)))),
        )
        .route("/api/v1/rewards/:id/redeem", post(redeem_reward))
        .route("/api/v1/redemptions", get(list_redemptions))
        .route("/api/v1/redemptions/:id/approve", managers_only(post(approve_redemption)))
        .route("/api/v1/redemptions/:id/reject", managers_only(post(reject_redemption)))
        // Ledger and audit
        .route("/api/v1/ledger", get(ledger_entries))
        .route("/api/v1/ledger/balance", get(balance))
        .route("/api/v1/ledger/balances", managers_only(get(household_balances)))
        .route("/api/v1/ledger/adjust", managers_only(post(adjust_balance)))
        .route("/api/v1/audit", managers_only(get(audit_log)))
        // Reports
        .route("/api/v1/reports/chores", managers_only(get(chore_report)))
        .route("/api/v1/reports/earnings", managers_only(get(earnings_report)))
        .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    let body_limit = app_state.config.body_size_limit_bytes;
    let timeout_secs = app_state.config.request_timeout_secs;

    // HandleErrorLayer must come before timeout to catch the timeout error
    let timeout_stack = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(|e: BoxError| async move {
            if e.is::<tower::timeout::error::Elapsed>() {
                ApiError::new(StatusCode::REQUEST_TIMEOUT, ErrorKind::Internal, "Request timed out")
            } else {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal, "Internal error")
            }
        }))
        .timeout(Duration::from_secs(timeout_secs))
        .into_inner();

    public
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(timeout_stack)
        .with_state(app_state)
}
