mod helpers;

use axum::http::StatusCode;
use chrono::Duration;
use helpers::{RequestBuilder, TestApp, TestDb};
use pump_warranty::settings::Settings;
use pump_warranty::storage::MemoryStore;
use serde_json::json;
use std::sync::Arc;

async fn request_code(app: &TestApp, role: &str, phone: &str) -> String {
    let response = app
        .send(RequestBuilder::post("/auth/request-code").json(json!({
            "role": role,
            "phone": phone,
            "dealerCode": "D-42"
        })))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    response.body["devCode"]
        .as_str()
        .expect("devCode when codes are disclosed")
        .to_string()
}

#[tokio::test]
async fn test_login_sets_cookie_and_me_reads_it() {
    let app = TestApp::new();
    let response = app
        .send(RequestBuilder::post("/auth/login").json(json!({
            "role": "seller",
            "phone": "+380501112233",
            "firstName": "Olena",
            "lastName": "Koval"
        })))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let token = response.body["token"].as_str().unwrap().to_string();
    assert_eq!(response.body["profile"]["role"], "seller");
    assert_eq!(response.body["profile"]["userId"], "pf_+380501112233");

    let cookie = response.set_cookie().expect("session cookie");
    assert!(cookie.starts_with(&format!("sid={token};")));
    assert!(cookie.contains("HttpOnly"));
    assert!(!cookie.contains("Secure"));

    let response = app
        .send(RequestBuilder::get("/auth/me").session_cookie(&token))
        .await;
    assert_eq!(response.body["ok"], true);
    assert_eq!(response.body["profile"]["phone"], "+380501112233");
}

#[tokio::test]
async fn test_me_without_session() {
    let app = TestApp::new();
    let response = app.send(RequestBuilder::get("/auth/me")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!({ "ok": false, "profile": null }));
}

#[tokio::test]
async fn test_logout_clears_session() {
    let app = TestApp::new();
    let token = app.seller_token().await;

    let response = app
        .send(RequestBuilder::post("/auth/logout").bearer(&token))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.set_cookie().unwrap().contains("Max-Age=0"));

    let response = app.send(RequestBuilder::get("/auth/me").bearer(&token)).await;
    assert_eq!(response.body["ok"], false);

    // Logging out twice is fine
    let response = app
        .send(RequestBuilder::post("/auth/logout").bearer(&token))
        .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_session_expires_after_seven_days() {
    let app = TestApp::new();
    let token = app.seller_token().await;

    app.clock.set(TestApp::start_time() + Duration::days(6) + Duration::hours(23));
    let response = app.send(RequestBuilder::get("/auth/me").bearer(&token)).await;
    assert_eq!(response.body["ok"], true);

    app.clock.set(TestApp::start_time() + Duration::days(7) + Duration::hours(1));
    let response = app.send(RequestBuilder::get("/auth/me").bearer(&token)).await;
    assert_eq!(response.body["ok"], false);

    let response = app
        .send(
            RequestBuilder::post("/warranty/create")
                .bearer(&token)
                .json(json!({ "serial": "SN1", "receiptImage": "r" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_login_validation() {
    let app = TestApp::new();

    let response = app
        .send(RequestBuilder::post("/auth/login").json(json!({
            "role": "admin",
            "login": "admin",
            "password": ""
        })))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "invalid_request");

    let response = app
        .send(RequestBuilder::post("/auth/login").json(json!({ "role": "buyer", "phone": "1" })))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_requires_role_and_names() {
    let app = TestApp::new();

    let response = app
        .send(RequestBuilder::post("/auth/login").json(json!({
            "login": "admin",
            "password": "secret"
        })))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "invalid_request");

    let response = app
        .send(RequestBuilder::post("/auth/login").json(json!({
            "role": "installer",
            "phone": "+380671234567",
            "firstName": "Taras"
        })))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.set_cookie().is_none());
}

#[tokio::test]
async fn test_code_registration_flow() {
    let app = TestApp::new();
    let code = request_code(&app, "installer", "+380671234567").await;

    let response = app
        .send(RequestBuilder::post("/auth/verify-code").json(json!({
            "role": "installer",
            "phone": "+380671234567",
            "code": code
        })))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["profile"]["role"], "installer");
    assert_eq!(response.body["profile"]["dealerCode"], "D-42");
    assert!(response.set_cookie().is_some());
    let token = response.body["token"].as_str().unwrap().to_string();

    let response = app
        .send(
            RequestBuilder::post("/installer/confirm")
                .bearer(&token)
                .json(json!({ "serial": "SN-1", "photos": ["p"] })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    // Consumed on success
    let response = app
        .send(RequestBuilder::post("/auth/verify-code").json(json!({
            "role": "installer",
            "phone": "+380671234567",
            "code": code
        })))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "invalid_or_expired_code");
}

#[tokio::test]
async fn test_only_latest_code_verifies() {
    let app = TestApp::new();
    let mut first = request_code(&app, "seller", "+380001").await;
    let mut second = request_code(&app, "seller", "+380001").await;
    while first == second {
        first = second;
        second = request_code(&app, "seller", "+380001").await;
    }

    let verify = |code: String| {
        RequestBuilder::post("/auth/verify-code").json(json!({
            "role": "seller",
            "phone": "+380001",
            "code": code
        }))
    };
    assert_eq!(
        app.send(verify(first)).await.status,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(app.send(verify(second)).await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_expired_code_is_rejected() {
    let app = TestApp::new();
    let code = request_code(&app, "seller", "+380002").await;

    app.clock.advance(Duration::minutes(5) + Duration::seconds(1));
    let response = app
        .send(RequestBuilder::post("/auth/verify-code").json(json!({
            "role": "seller",
            "phone": "+380002",
            "code": code
        })))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "invalid_or_expired_code");
}

#[tokio::test]
async fn test_codes_hidden_unless_disclosed() {
    let mut settings = Settings::default();
    settings.server.public_base_url = Some("https://warranty.example.com".to_string());
    let app = TestApp::with_settings(settings, Arc::new(MemoryStore::new()));

    let response = app
        .send(RequestBuilder::post("/auth/request-code").json(json!({
            "role": "seller",
            "phone": "+380003"
        })))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!({ "ok": true }));

    let response = app
        .send(RequestBuilder::post("/auth/login").json(json!({
            "role": "seller",
            "phone": "+380003",
            "firstName": "Olena",
            "lastName": "Koval"
        })))
        .await;
    assert!(response.set_cookie().unwrap().contains("Secure"));
}

#[tokio::test]
async fn test_sessions_survive_on_sqlite_store() {
    let db = TestDb::new().await;
    let token = {
        let app = TestApp::with_store(Arc::new(db.store()));
        app.admin_token().await
    };

    // A fresh router over the same database still knows the token
    let app = TestApp::with_store(Arc::new(db.store()));
    let response = app.send(RequestBuilder::get("/auth/me").bearer(&token)).await;
    assert_eq!(response.body["ok"], true);
    assert_eq!(response.body["profile"]["role"], "admin");
}
