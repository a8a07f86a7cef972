// Row locking and ledger uniqueness against a real Postgres.
//
// Opt-in: every test returns early unless TEST_DATABASE_URL points at a
// database the suite may create tables in.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::OnceCell;

use chore_ledger::auth::token::{Claims, TokenService};
use chore_ledger::config::Config;
use chore_ledger::core::errors::CoreError;
use chore_ledger::core::models::*;
use chore_ledger::service::accounts::{AuthResponse, JoinRequest, Registration};
use chore_ledger::service::rewards::CreateReward;
use chore_ledger::service::Services;
use chore_ledger::store::postgres::PgStore;
use chore_ledger::store::Store;

use crate::common::{chore_request, dec, TEST_PASSWORD};

static SCHEMA: OnceCell<()> = OnceCell::const_new();

struct PgApp {
    services: Services,
    tokens: Arc<TokenService>,
    tag: u64,
}

struct Signed {
    claims: Claims,
    user: User,
}

async fn pg_app() -> Option<PgApp> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let store = PgStore::connect(&url, 8, std::time::Duration::from_secs(5))
        .await
        .expect("test database reachable");
    SCHEMA
        .get_or_try_init(|| store.apply_schema())
        .await
        .expect("schema applies");

    let config = Config::test_config();
    let tokens = Arc::new(TokenService::new(&config.jwt_secret, config.token_settings()));
    let shared: Arc<dyn Store> = Arc::new(store);
    Some(PgApp {
        services: Services::new(shared, tokens.clone(), config.core_settings()),
        tokens,
        tag: rand::random::<u64>(),
    })
}

impl PgApp {
    fn signed(&self, response: AuthResponse) -> Signed {
        Signed {
            claims: self.tokens.validate(&response.token).expect("fresh token validates"),
            user: response.user,
        }
    }

    async fn household(&self) -> (Signed, Signed) {
        let admin = self
            .services
            .accounts
            .register(Registration {
                household_name: "Home".to_string(),
                name: "Owner".to_string(),
                email: format!("admin-{}@example.com", self.tag),
                password: TEST_PASSWORD.to_string(),
            })
            .await
            .expect("registration succeeds");
        let admin = self.signed(admin);
        let invite_code = self
            .services
            .accounts
            .household(&admin.claims)
            .await
            .expect("household loads")
            .invite_code
            .expect("admins see the invite code");
        let worker = self
            .services
            .accounts
            .join_household(JoinRequest {
                invite_code,
                name: "Worker".to_string(),
                email: format!("worker-{}@example.com", self.tag),
                password: TEST_PASSWORD.to_string(),
            })
            .await
            .expect("join succeeds");
        (admin, self.signed(worker))
    }

    async fn balance(&self, member: &Signed) -> Decimal {
        self.services
            .ledger
            .balance(&member.claims, None)
            .await
            .expect("balance loads")
            .balance
    }

    async fn credit(&self, admin: &Signed, member: &Signed, amount: Decimal) {
        self.services
            .ledger
            .adjust_balance(&admin.claims, member.user.id, amount, "starting balance")
            .await
            .expect("adjustment succeeds");
    }

    async fn reward(&self, admin: &Signed, cost: Decimal) -> Reward {
        self.services
            .rewards
            .create_reward(
                &admin.claims,
                CreateReward {
                    title: "Movie night".to_string(),
                    description: None,
                    cost,
                },
            )
            .await
            .expect("reward created")
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_concurrent_redemptions_never_overdraw() {
    let Some(app) = pg_app().await else { return };
    let (admin, worker) = app.household().await;
    app.credit(&admin, &worker, dec(10)).await;
    let reward = app.reward(&admin, dec(4)).await;

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let rewards = app.services.rewards.clone();
            let claims = worker.claims.clone();
            let id = reward.id;
            tokio::spawn(async move { rewards.redeem(&claims, id).await })
        })
        .collect();
    let mut redeemed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => redeemed += 1,
            Err(err) => assert!(matches!(err, CoreError::InsufficientBalance), "unexpected {:?}", err),
        }
    }

    assert_eq!(redeemed, 2);
    assert_eq!(app.balance(&worker).await, dec(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_concurrent_approvals_credit_once() {
    let Some(app) = pg_app().await else { return };
    let (admin, worker) = app.household().await;
    let created = app
        .services
        .chores
        .create_chore(
            &admin.claims,
            chore_request("Dishes", dec(10), vec![worker.user.id], Utc::now() + Duration::days(1)),
        )
        .await
        .unwrap();
    let id = created.assignments[0].assignment.id;
    app.services
        .assignments
        .complete(&worker.claims, id, dec(100), None)
        .await
        .unwrap();

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let assignments = app.services.assignments.clone();
            let claims = admin.claims.clone();
            tokio::spawn(async move { assignments.approve(&claims, id, None).await })
        })
        .collect();
    let mut approved = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => approved += 1,
            Err(err) => assert!(
                matches!(err, CoreError::InvalidState(_) | CoreError::Conflict(_)),
                "unexpected {:?}",
                err
            ),
        }
    }

    assert_eq!(approved, 1);
    assert_eq!(app.balance(&worker).await, dec(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_concurrent_redemption_decisions_refund_once() {
    let Some(app) = pg_app().await else { return };
    let (admin, worker) = app.household().await;
    app.credit(&admin, &worker, dec(5)).await;
    let reward = app.reward(&admin, dec(5)).await;
    let redemption_id = app
        .services
        .rewards
        .redeem(&worker.claims, reward.id)
        .await
        .unwrap()
        .redemption
        .id;

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let rewards = app.services.rewards.clone();
            let claims = admin.claims.clone();
            tokio::spawn(async move {
                if i % 2 == 0 {
                    rewards.reject_redemption(&claims, redemption_id).await
                } else {
                    rewards.approve_redemption(&claims, redemption_id).await
                }
            })
        })
        .collect();
    let mut decided = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(decision) => decided.push(decision),
            Err(err) => assert!(
                matches!(err, CoreError::InvalidState(_) | CoreError::Conflict(_)),
                "unexpected {:?}",
                err
            ),
        }
    }

    assert_eq!(decided.len(), 1);
    let expected = match decided[0].redemption.status {
        RedemptionStatus::Rejected => dec(5),
        _ => Decimal::ZERO,
    };
    assert_eq!(app.balance(&worker).await, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_sub_cent_adjustment_is_validation() {
    let Some(app) = pg_app().await else { return };
    let (admin, worker) = app.household().await;

    let result = app
        .services
        .ledger
        .adjust_balance(&admin.claims, worker.user.id, Decimal::new(1005, 3), "correction")
        .await;
    assert!(matches!(result, Err(CoreError::Validation(_))));
    assert_eq!(app.balance(&worker).await, Decimal::ZERO);
}
