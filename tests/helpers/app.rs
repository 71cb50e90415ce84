use super::builders::RequestBuilder;
use axum::http::{header, HeaderMap, StatusCode};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use pump_warranty::clock::ManualClock;
use pump_warranty::settings::Settings;
use pump_warranty::storage::{KvStore, MemoryStore};
use pump_warranty::web::{router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn set_cookie(&self) -> Option<&str> {
        self.headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Router wired to a settable clock
pub struct TestApp {
    router: Router,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn KvStore>) -> Self {
        let mut settings = Settings::default();
        settings.auth.disclose_codes = true;
        Self::with_settings(settings, store)
    }

    pub fn with_settings(settings: Settings, store: Arc<dyn KvStore>) -> Self {
        let clock = Arc::new(ManualClock::new(Self::start_time()));
        let state = AppState::new(settings, store, clock.clone());
        Self {
            router: router(state),
            clock,
        }
    }

    pub async fn send(&self, request: RequestBuilder) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request.build())
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Log in and return the session token.
    pub async fn login(&self, body: Value) -> String {
        let response = self.send(RequestBuilder::post("/auth/login").json(body)).await;
        assert_eq!(response.status, StatusCode::OK, "login failed: {}", response.body);
        response.body["token"]
            .as_str()
            .expect("token in login response")
            .to_string()
    }

    pub async fn admin_token(&self) -> String {
        self.login(json!({ "role": "admin", "login": "admin", "password": "secret" }))
            .await
    }

    pub async fn seller_token(&self) -> String {
        self.login(json!({
            "role": "seller",
            "phone": "+380501112233",
            "firstName": "Olena",
            "lastName": "Koval"
        }))
        .await
    }

    pub async fn installer_token(&self) -> String {
        self.login(json!({
            "role": "installer",
            "phone": "+380671234567",
            "firstName": "Taras",
            "lastName": "Melnyk"
        }))
        .await
    }
}
