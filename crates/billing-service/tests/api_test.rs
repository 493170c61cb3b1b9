//! HTTP integration tests for the billing API

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use billing_service::auth::AuthService;
use billing_service::create_router;
use billing_service::storage::DocumentStore;
use common::*;
use ed25519_dalek::{Signer, SigningKey};
use serde_json::{json, Value};
use std::sync::Arc;
use stellar_strkey::ed25519::PublicKey as StrkeyPublicKey;
use tower::ServiceExt; // for `oneshot`

const WASM_HASH: &str = "8f2d1c0e9b8a7f6e5d4c3b2a1908f7e6d5c4b3a2918f7e6d5c4b3a2918f7e6d5";

struct TestApp {
    router: Router,
    store: Arc<dyn DocumentStore>,
    ledger: Arc<MockLedger>,
}

fn create_test_app() -> TestApp {
    create_test_app_with(settings())
}

fn create_test_app_with(settings: billing_service::ServiceSettings) -> TestApp {
    let store = memory_store();
    let ledger = Arc::new(MockLedger::new());
    let router = create_router(app_state(store.clone(), ledger.clone(), settings));
    TestApp {
        router,
        store,
        ledger,
    }
}

fn owner_token() -> String {
    AuthService::new(JWT_SECRET, PASSPHRASE)
        .issue_token(OWNER)
        .unwrap()
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }
}

fn release_body() -> Value {
    json!({
        "contractName": "sb_subscription",
        "network": "testnet",
        "bucketPath": "releases/sb_subscription/abc",
        "gcsUri": "gs://subfy-wasm/releases/sb_subscription/abc.wasm",
        "wasmHash": WASM_HASH,
        "sha256": WASM_HASH,
        "gitSha": "abc123",
        "uploadedAtUtc": "2026-03-01T12:00:00Z"
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app();

    let (status, json) = app.get("/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "billing-service");
}

#[tokio::test]
async fn test_owner_routes_require_token() {
    let app = create_test_app();

    let (status, json) = app.get("/projects", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Missing authentication token");

    let (status, json) = app.get("/projects", Some("garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Malformed token");
}

#[tokio::test]
async fn test_create_and_list_projects() {
    let app = create_test_app();
    let token = owner_token();

    let (status, created) = app
        .post(
            "/projects",
            Some(&token),
            json!({ "name": "Gym", "treasuryAddress": TREASURY, "paymentCurrency": "eurc" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["ownerPublicKey"], OWNER);
    assert_eq!(created["network"], "testnet");
    assert_eq!(created["paymentCurrency"], "EURC");
    assert_eq!(created["status"], "DRAFT");

    let (status, listed) = app.get("/projects", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], created["id"]);

    let (status, json) = app
        .post("/projects", Some(&token), json!({ "treasuryAddress": TREASURY }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Project name is required");
}

#[tokio::test]
async fn test_project_of_other_owner_is_rejected() {
    let app = create_test_app();
    let project = seed_project(&app.store, None, None).await;
    let intruder = AuthService::new(JWT_SECRET, PASSPHRASE)
        .issue_token(OTHER_OWNER)
        .unwrap();

    let (status, json) = app
        .get(&format!("/projects/{}", project.id), Some(&intruder))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "You do not own this project");

    let (status, _) = app.get("/projects/missing", Some(&owner_token())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_wallet_login_flow() {
    let app = create_test_app();
    let signing = SigningKey::from_bytes(&[9u8; 32]);
    let public_key = StrkeyPublicKey(signing.verifying_key().to_bytes()).to_string();

    let (status, challenge) = app
        .post("/auth/challenge", None, json!({ "publicKey": public_key }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(challenge["networkPassphrase"], PASSPHRASE);

    let message = challenge["challenge"].as_str().unwrap();
    let signature = STANDARD.encode(signing.sign(message.as_bytes()).to_bytes());
    let (status, issued) = app
        .post(
            "/auth/verify",
            None,
            json!({ "publicKey": public_key, "signature": signature }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(issued["publicKey"], public_key);

    let token = issued["token"].as_str().unwrap();
    let (status, me) = app.get("/auth/me", Some(token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["publicKey"], public_key);
}

#[tokio::test]
async fn test_internal_endpoints_check_tokens() {
    let mut settings = settings();
    settings.internal_tasks_token = Some("tasks-secret".into());
    settings.wasm_releases_internal_token = Some("release-secret".into());
    let app = create_test_app_with(settings);

    let (status, json) = app
        .post(
            "/internal/tasks/deploy-contract",
            Some("wrong"),
            json!({ "deploymentId": "d", "projectId": "p" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Invalid internal task token");

    let (status, json) = app
        .post("/internal/wasm-releases/register", None, release_body())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Invalid wasm release internal token");

    let (status, json) = app
        .post(
            "/internal/tasks/deploy-contract",
            Some("tasks-secret"),
            json!({ "deploymentId": "unknown", "projectId": "p" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
}

#[tokio::test]
async fn test_register_release_then_deploy() {
    let app = create_test_app();
    let token = owner_token();
    let project = seed_project(&app.store, None, Some(TOKEN)).await;

    let (status, json) = app
        .post(
            &format!("/projects/{}/deployments/prepare", project.id),
            Some(&token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        json["error"],
        "No deployed wasm release available. Run contracts CD first."
    );

    let mut bad = release_body();
    bad["wasmHash"] = json!("xyz");
    let (status, _) = app
        .post("/internal/wasm-releases/register", None, bad)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, release) = app
        .post("/internal/wasm-releases/register", None, release_body())
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, prepared) = app
        .post(
            &format!("/projects/{}/deployments/prepare", project.id),
            Some(&token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(prepared["wasmReleaseId"], release["id"]);
    assert_eq!(prepared["unsignedXdr"], "unsigned-deploy");

    app.ledger.submission(Ok(soroban_client::SubmittedTx {
        tx_hash: "deploy-hash".into(),
        contract_id: Some("CNEWCONTRACT".into()),
    }));
    let (status, submitted) = app
        .post(
            &format!("/projects/{}/deployments/submit", project.id),
            Some(&token),
            json!({
                "signedXdr": "SIGNED",
                "wasmReleaseId": release["id"],
                "wasmHash": WASM_HASH,
                "saltHex": prepared["saltHex"],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submitted["status"], "SUCCESS");

    let deployment_id = submitted["deploymentId"].as_str().unwrap();
    let (status, deployment) = app
        .get(&format!("/deployments/{}", deployment_id), Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deployment["txHash"], "deploy-hash");

    let (_, project) = app
        .get(&format!("/projects/{}", project.id), Some(&token))
        .await;
    assert_eq!(project["status"], "ACTIVE");
    assert_eq!(project["subscriptionContractId"], "CNEWCONTRACT");
}

#[tokio::test]
async fn test_checkout_is_public() {
    let app = create_test_app();
    let project = seed_project(&app.store, Some(CONTRACT), Some(TOKEN)).await;
    app.ledger.respond(
        "list_plans",
        json!([{ "id": 1, "name": "Basic", "period_ledgers": 100, "price_stroops": "100", "active": true }]),
    );

    let (status, context) = app
        .get(&format!("/checkout/{}", project.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(context["project"]["subscriptionContractId"], CONTRACT);
    assert_eq!(context["plans"].as_array().unwrap().len(), 1);
    assert!(context["subscription"].is_null());
}

#[tokio::test]
async fn test_checkout_submit_requires_xdr() {
    let app = create_test_app();

    let (status, json) = app.post("/checkout/submit", None, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "signedXdr is required");

    let (status, json) = app
        .post("/checkout/submit", None, json!({ "signedXdr": "AAAA" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["txHash"], "tx-submit");
}

#[tokio::test]
async fn test_whitelist_signup_and_stats() {
    let app = create_test_app();

    let (status, json) = app.post("/whitelist", None, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Email is required.");

    let (status, json) = app
        .post("/whitelist", None, json!({ "email": "not-an-email" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Please provide a valid email address.");

    let (status, json) = app
        .post("/whitelist", None, json!({ "email": "Owner@Example.com" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["success"], true);

    let (status, json) = app
        .post("/whitelist", None, json!({ "email": "owner@example.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "This email is already on the whitelist.");

    let (status, stats) = app.get("/whitelist/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 1);
    assert!(stats["entries"][0]["id"].is_string());
    assert!(stats["entries"][0]["createdAt"].is_string());
    assert!(stats["entries"][0].get("email").is_none());
}
