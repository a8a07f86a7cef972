// Router-level tests: envelopes, auth middleware, role guard

use axum::http::StatusCode;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration, Utc};
use serde_json::json;
use tower::ServiceExt;

use chore_ledger::core::models::Role;

use crate::common::*;

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let response = app
        .router()
        .oneshot(json_request("GET", "/health", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "connected");
}

#[tokio::test]
async fn test_health_degraded_when_store_down() {
    let app = TestApp::new();
    app.store.set_unavailable(true);
    let response = app
        .router()
        .oneshot(json_request("GET", "/health", None, None))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "degraded");
}

#[tokio::test]
async fn test_register_returns_created_envelope() {
    let app = TestApp::new();
    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({
                "household_name": "Home",
                "name": "Ada",
                "email": "ada@example.com",
                "password": TEST_PASSWORD,
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["user"]["role"], "system_admin");
    assert!(body["data"]["user"].get("password_hash").is_none());
    assert!(body["data"]["token"].as_str().is_some());
}

#[tokio::test]
async fn test_missing_token_is_401() {
    let app = TestApp::new();
    let response = app
        .router()
        .oneshot(json_request("GET", "/api/v1/users/me", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["kind"], "unauthenticated");
    assert!(body["request_id"].as_str().is_some());
}

#[tokio::test]
async fn test_expired_token_is_401_token_expired() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let stale = app
        .tokens
        .issue_at(&admin.user, Utc::now() - Duration::hours(30))
        .unwrap();

    let response = app
        .router()
        .oneshot(json_request("GET", "/api/v1/users/me", Some(&stale), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "token_expired");
}

#[tokio::test]
async fn test_worker_forbidden_on_management_route() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;

    let response = app
        .router()
        .oneshot(json_request("GET", "/api/v1/ledger/balances", Some(&worker.token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "forbidden");

    let response = app
        .router()
        .oneshot(json_request("GET", "/api/v1/ledger/balance", Some(&worker.token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["balance"], "0");
}

#[tokio::test]
async fn test_worker_may_list_chores_but_not_create() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;
    let chore = json!({
        "title": "Vacuum",
        "value": "5",
        "assigned_to": [worker.id()],
        "due_date": (Utc::now() + Duration::days(1)).to_rfc3339(),
    });

    let response = app
        .router()
        .oneshot(json_request("POST", "/api/v1/chores", Some(&worker.token), Some(chore.clone())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .router()
        .oneshot(json_request("POST", "/api/v1/chores", Some(&admin.token), Some(chore)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["data"]["chore"]["priority"], "medium");
    assert_eq!(body["data"]["assignments"][0]["status"], "pending");
    assert_eq!(body["data"]["assignments"][0]["late"], false);

    let response = app
        .router()
        .oneshot(json_request("GET", "/api/v1/chores", Some(&worker.token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().map(|a| a.len()), Some(1));
}

#[tokio::test]
async fn test_complete_with_proof_image_over_http() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;
    let (_, assignment) = app
        .chore(&admin, worker.id(), dec(3), tomorrow(), |c| {
            c.proof_required = true;
            c.auto_approve = true;
        })
        .await;
    let uri = format!("/api/v1/assignments/{}/complete", assignment.id);

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            &uri,
            Some(&worker.token),
            Some(json!({ "percent_complete": 100 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "proof_required");

    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            &uri,
            Some(&worker.token),
            Some(json!({ "percent_complete": 100, "proof_image": "not base64!!" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let image = STANDARD.encode([0x89, b'P', b'N', b'G']);
    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            &uri,
            Some(&worker.token),
            Some(json!({ "percent_complete": 100, "proof_image": image })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["assignment"]["status"], "approved");
    assert_eq!(body["data"]["ledger_entry"]["type"], "earn");
    assert!(body["data"]["assignment"].get("proof").is_none());
}

#[tokio::test]
async fn test_invalid_json_uses_error_envelope() {
    let app = TestApp::new();
    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "ada@example.com" })),
        ))
        .await
        .unwrap();
    assert!(response.status().is_client_error());
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["kind"], "validation_error");
}

#[tokio::test]
async fn test_wrong_login_is_401() {
    let app = TestApp::new();
    app.register("Home", "ada@example.com").await;
    let response = app
        .router()
        .oneshot(json_request(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": "wrong-password" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["message"], "Invalid credentials");
}

#[tokio::test]
async fn test_set_role_over_http() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;

    let response = app
        .router()
        .oneshot(json_request(
            "PUT",
            &format!("/api/v1/users/{}/role", worker.id()),
            Some(&admin.token),
            Some(json!({ "role": "observer" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["role"], "observer");

    let observer = app.login("worker@example.com").await;
    assert_eq!(observer.claims.role, Role::Observer);
}

#[tokio::test]
async fn test_unknown_assignment_is_404() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let response = app
        .router()
        .oneshot(json_request("GET", "/api/v1/assignments/999", Some(&admin.token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "not_found");
}

#[tokio::test]
async fn test_edit_and_delete_chore_over_http() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;
    let (chore, _) = app.chore(&admin, worker.id(), dec(5), tomorrow(), |_| {}).await;
    let uri = format!("/api/v1/chores/{}", chore.id);

    let response = app
        .router()
        .oneshot(json_request("PUT", &uri, Some(&worker.token), Some(json!({ "title": "Mine" }))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .router()
        .oneshot(json_request(
            "PUT",
            &uri,
            Some(&admin.token),
            Some(json!({ "value": "7.5", "priority": "high" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["value"], "7.5");
    assert_eq!(body["data"]["priority"], "high");
    assert_eq!(body["data"]["title"], "Dishes");

    let response = app
        .router()
        .oneshot(json_request("PUT", &uri, Some(&admin.token), Some(json!({ "value": "0.001" }))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .router()
        .oneshot(json_request("DELETE", &uri, Some(&worker.token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .router()
        .oneshot(json_request("DELETE", &uri, Some(&admin.token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["deleted"], true);

    let response = app
        .router()
        .oneshot(json_request("GET", &uri, Some(&worker.token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_approved_chore_delete_is_409() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;
    let (chore, assignment) = app
        .chore(&admin, worker.id(), dec(5), tomorrow(), |c| c.auto_approve = true)
        .await;
    app.services
        .assignments
        .complete(&worker.claims, assignment.id, dec(100), None)
        .await
        .unwrap();

    let response = app
        .router()
        .oneshot(json_request(
            "DELETE",
            &format!("/api/v1/chores/{}", chore.id),
            Some(&admin.token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "conflict");
}

#[tokio::test]
async fn test_reward_get_and_delete_over_http() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;
    app.credit(&admin, worker.id(), dec(3)).await;
    let kept = app.reward(&admin, dec(3)).await;
    let dropped = app.reward(&admin, dec(8)).await;
    app.services.rewards.redeem(&worker.claims, kept.id).await.unwrap();

    let response = app
        .router()
        .oneshot(json_request("GET", &format!("/api/v1/rewards/{}", kept.id), Some(&worker.token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["cost"], "3");

    let response = app
        .router()
        .oneshot(json_request(
            "DELETE",
            &format!("/api/v1/rewards/{}", dropped.id),
            Some(&worker.token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    for (id, removal) in [(dropped.id, "deleted"), (kept.id, "deactivated")] {
        let response = app
            .router()
            .oneshot(json_request("DELETE", &format!("/api/v1/rewards/{}", id), Some(&admin.token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["removal"], removal);
    }

    let response = app
        .router()
        .oneshot(json_request("GET", &format!("/api/v1/rewards/{}", kept.id), Some(&worker.token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reward_edit_over_http() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let reward = app.reward(&admin, dec(3)).await;

    let response = app
        .router()
        .oneshot(json_request(
            "PUT",
            &format!("/api/v1/rewards/{}", reward.id),
            Some(&admin.token),
            Some(json!({ "title": "Pizza night", "cost": "12" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["title"], "Pizza night");
    assert_eq!(body["data"]["cost"], "12");
    assert_eq!(body["data"]["is_active"], true);
}

#[tokio::test]
async fn test_reports_over_http() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;
    app.chore(&admin, worker.id(), dec(5), tomorrow(), |_| {}).await;
    app.credit(&admin, worker.id(), dec(2)).await;

    for uri in ["/api/v1/reports/chores", "/api/v1/reports/earnings"] {
        let response = app
            .router()
            .oneshot(json_request("GET", uri, Some(&worker.token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    let response = app
        .router()
        .oneshot(json_request("GET", "/api/v1/reports/chores", Some(&admin.token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["chores"][0]["pending"], 1);

    let response = app
        .router()
        .oneshot(json_request("GET", "/api/v1/reports/earnings", Some(&admin.token), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let members = body["data"]["members"].as_array().cloned().unwrap_or_default();
    let totals = members
        .iter()
        .find(|m| m["user_id"] == worker.id())
        .expect("worker listed");
    assert_eq!(totals["adjusted"], "2");
    assert_eq!(totals["balance"], "2");
}
