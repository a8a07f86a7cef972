// Accounts: registration, login, invites, profile and roles

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::{required_text, user_in_household, Context};
use crate::auth::guard::{authorize, check, is_admin_or_manager, Operation, RoleSet};
use crate::auth::password::{hash_password_async, verify_password_async, MIN_PASSWORD_LEN};
use crate::auth::token::Claims;
use crate::core::errors::CoreError;
use crate::core::models::*;
use crate::store::{StoreError, StoreTx};

const INVITE_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct Registration {
    pub household_name: String,
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub invite_code: String,
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub notification_pref_email: Option<bool>,
    pub notification_pref_push: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

/// Lowercased, trimmed email with a minimal shape check
pub fn normalize_email(email: &str) -> Result<String, CoreError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') => Ok(email),
        _ => Err(CoreError::Validation("a valid email is required".to_string())),
    }
}

fn validate_password(password: &str) -> Result<(), CoreError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CoreError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Eight lowercase hex characters
fn generate_invite_code() -> String {
    hex::encode(rand::random::<[u8; 4]>())
}

/// A code not held by any other household. Gives up with `Conflict`.
async fn fresh_invite_code(tx: &mut dyn StoreTx) -> Result<String, CoreError> {
    for _ in 0..INVITE_CODE_ATTEMPTS {
        let code = generate_invite_code();
        match tx.household_by_invite_code(&code).await {
            Err(StoreError::NotFound(_)) => return Ok(code),
            Ok(_) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(CoreError::Conflict("could not allocate a unique invite code".to_string()))
}

async fn ensure_email_free(tx: &mut dyn StoreTx, email: &str, except: Option<UserId>) -> Result<(), CoreError> {
    match tx.user_by_email(email).await? {
        Some(existing) if Some(existing.id) != except => {
            Err(CoreError::Conflict("email already registered".to_string()))
        }
        _ => Ok(()),
    }
}

#[derive(Clone)]
pub struct AccountService {
    ctx: Arc<Context>,
}

impl AccountService {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Create a household and its first member.
    ///
    /// The first user in the whole system becomes `system_admin`, every later
    /// registrant `admin` of their new household.
    pub async fn register(&self, request: Registration) -> Result<AuthResponse, CoreError> {
        let household_name = required_text("household_name", &request.household_name)?;
        let name = required_text("name", &request.name)?;
        let email = normalize_email(&request.email)?;
        validate_password(&request.password)?;
        let password_hash = hash_password_async(&request.password).await?;

        let user = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                tx.lock_registration().await?;
                ensure_email_free(tx.as_mut(), &email, None).await?;

                let role = if tx.count_users().await? == 0 {
                    Role::SystemAdmin
                } else {
                    Role::Admin
                };
                let invite_code = fresh_invite_code(tx.as_mut()).await?;
                let household = tx
                    .insert_household(NewHousehold {
                        name: household_name,
                        invite_code: Some(invite_code),
                    })
                    .await?;
                let user = tx
                    .insert_user(NewUser {
                        household_id: household.id,
                        name,
                        email,
                        password_hash,
                        role,
                        notification_pref_email: true,
                        notification_pref_push: true,
                    })
                    .await?;
                tx.commit().await?;
                Ok(user)
            })
            .await?;

        info!(user_id = user.id, household_id = user.household_id, role = %user.role, "User registered");
        let token = self.ctx.tokens.issue(&user)?;
        self.ctx.audit.log_action(
            user.household_id,
            user.id,
            "user_registered",
            json!({ "email": user.email, "role": user.role }),
        );
        Ok(AuthResponse { token, user })
    }

    /// Unknown email and wrong password are indistinguishable to the caller
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, CoreError> {
        let email = email.trim().to_lowercase();
        let user = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                Ok(tx.user_by_email(&email).await?)
            })
            .await?;

        let verified = match &user {
            Some(user) => verify_password_async(password, &user.password_hash).await,
            None => false,
        };
        let user = match user {
            Some(user) if verified => user,
            _ => {
                warn!(email = %email, "Login failed");
                return Err(CoreError::InvalidCredentials);
            }
        };

        let token = self.ctx.tokens.issue(&user)?;
        self.ctx
            .audit
            .log_action(user.household_id, user.id, "user_login", json!({}));
        Ok(AuthResponse { token, user })
    }

    /// Join with the household's current invite code. The new member is a `worker`.
    pub async fn join_household(&self, request: JoinRequest) -> Result<AuthResponse, CoreError> {
        let code = request.invite_code.trim().to_lowercase();
        if code.is_empty() {
            return Err(CoreError::Validation("invite_code is required".to_string()));
        }
        let name = required_text("name", &request.name)?;
        let email = normalize_email(&request.email)?;
        validate_password(&request.password)?;
        let password_hash = hash_password_async(&request.password).await?;

        let user = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let household = tx.household_by_invite_code(&code).await.map_err(|e| match e {
                    StoreError::NotFound(_) => CoreError::NotFound("invite code".to_string()),
                    other => other.into(),
                })?;
                ensure_email_free(tx.as_mut(), &email, None).await?;
                let user = tx
                    .insert_user(NewUser {
                        household_id: household.id,
                        name,
                        email,
                        password_hash,
                        role: Role::Worker,
                        notification_pref_email: true,
                        notification_pref_push: true,
                    })
                    .await?;
                tx.commit().await?;
                Ok(user)
            })
            .await?;

        info!(user_id = user.id, household_id = user.household_id, "User joined household");
        let token = self.ctx.tokens.issue(&user)?;
        self.ctx.audit.log_action(
            user.household_id,
            user.id,
            "user_joined_household",
            json!({ "email": user.email }),
        );
        Ok(AuthResponse { token, user })
    }

    /// Replace the invite code. The previous code stops working immediately.
    pub async fn regenerate_invite(&self, actor: &Claims) -> Result<Household, CoreError> {
        authorize(actor, Operation::RegenerateInvite)?;
        let household = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let code = fresh_invite_code(tx.as_mut()).await?;
                tx.set_invite_code(actor.household_id, &code).await?;
                let household = tx.household(actor.household_id).await?;
                tx.commit().await?;
                Ok(household)
            })
            .await?;

        self.ctx.audit(actor, "invite_regenerated", json!({}));
        Ok(household)
    }

    /// The caller's household. The invite code is only shown to managers.
    pub async fn household(&self, actor: &Claims) -> Result<Household, CoreError> {
        authorize(actor, Operation::ViewProfile)?;
        let mut household = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                Ok(tx.household(actor.household_id).await?)
            })
            .await?;
        if !is_admin_or_manager(actor.role) {
            household.invite_code = None;
        }
        Ok(household)
    }

    pub async fn current_user(&self, actor: &Claims) -> Result<User, CoreError> {
        authorize(actor, Operation::ViewProfile)?;
        self.ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                user_in_household(tx.as_mut(), actor.user_id, actor.household_id).await
            })
            .await
    }

    pub async fn update_profile(&self, actor: &Claims, update: ProfileUpdate) -> Result<User, CoreError> {
        authorize(actor, Operation::UpdateProfile)?;
        let name = update.name.as_deref().map(|n| required_text("name", n)).transpose()?;
        let email = update.email.as_deref().map(normalize_email).transpose()?;

        let user = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let mut user = user_in_household(tx.as_mut(), actor.user_id, actor.household_id).await?;
                if let Some(email) = email {
                    ensure_email_free(tx.as_mut(), &email, Some(user.id)).await?;
                    user.email = email;
                }
                if let Some(name) = name {
                    user.name = name;
                }
                if let Some(pref) = update.notification_pref_email {
                    user.notification_pref_email = pref;
                }
                if let Some(pref) = update.notification_pref_push {
                    user.notification_pref_push = pref;
                }
                tx.update_user(&user).await?;
                let user = tx.user(user.id).await?;
                tx.commit().await?;
                Ok(user)
            })
            .await?;

        self.ctx.audit(actor, "user_updated", json!({ "user_id": user.id }));
        Ok(user)
    }

    pub async fn household_members(&self, actor: &Claims) -> Result<Vec<User>, CoreError> {
        authorize(actor, Operation::ListMembers)?;
        self.ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                Ok(tx.users_by_household(actor.household_id).await?)
            })
            .await
    }

    /// Change a member's role.
    ///
    /// Nobody changes their own role, and only a `system_admin` may grant or
    /// revoke `system_admin`. Tokens already issued keep the old role until
    /// they expire.
    pub async fn set_role(&self, actor: &Claims, user_id: UserId, role: Role) -> Result<User, CoreError> {
        authorize(actor, Operation::SetRole)?;
        if user_id == actor.user_id {
            return Err(CoreError::Forbidden("cannot change your own role".to_string()));
        }

        let (user, previous) = self
            .ctx
            .run(async {
                let mut tx = self.ctx.begin().await?;
                let mut user = user_in_household(tx.as_mut(), user_id, actor.household_id).await?;
                let touches_system_admin = role == Role::SystemAdmin || user.role == Role::SystemAdmin;
                if touches_system_admin {
                    check(Some(actor), RoleSet::SYSTEM_ADMIN).map_err(|_| {
                        CoreError::Forbidden("only a system admin can grant or revoke system admin".to_string())
                    })?;
                }
                let previous = user.role;
                user.role = role;
                tx.update_user(&user).await?;
                tx.commit().await?;
                Ok((user, previous))
            })
            .await?;

        info!(user_id, from = %previous, to = %role, changed_by = actor.user_id, "Role changed");
        self.ctx.audit(
            actor,
            "role_changed",
            json!({ "user_id": user_id, "from": previous, "to": role }),
        );
        Ok(user)
    }

    /// Re-sign the caller's token once it is close to expiry
    pub fn refresh_token(&self, actor: &Claims, token: &str) -> Result<String, CoreError> {
        authorize(actor, Operation::RefreshToken)?;
        Ok(self.ctx.tokens.refresh(token)?)
    }
}
