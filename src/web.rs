use crate::clock::{Clock, SystemClock};
use crate::errors::WarrantyError;
use crate::otp::{CodeIssuer, CodeRequest, CodeVerification};
use crate::session::{
    token_from_headers, LoginRequest, Profile, Role, Session, SessionAuthority, SessionCookie,
};
use crate::settings::Settings;
use crate::storage::KvStore;
use crate::support::{SupportDesk, SupportRequest};
use crate::warranty::{
    DraftRequest, InstallConfirmation, NewReturn, ReturnDesk, ReturnRequest, SaleConfirmation,
    StatusReport, WarrantyEngine,
};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Duration;
use miette::IntoDiagnostic;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

type ApiResult<T> = Result<T, WarrantyError>;

/// JSON body whose decode failures surface as `invalid_request`.
type JsonBody<T> = Result<Json<T>, JsonRejection>;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub clock: Arc<dyn Clock>,
    pub warranties: WarrantyEngine,
    pub returns: ReturnDesk,
    pub support: SupportDesk,
    pub sessions: SessionAuthority,
    pub codes: CodeIssuer,
}

impl AppState {
    pub fn new(settings: Settings, store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        let warranties = WarrantyEngine::new(
            store.clone(),
            clock.clone(),
            (&settings.warranty).into(),
        );
        let returns = ReturnDesk::new(store.clone(), clock.clone(), warranties.clone());
        let support = SupportDesk::new(store.clone(), clock.clone());
        let sessions = SessionAuthority::new(
            store.clone(),
            clock.clone(),
            Duration::seconds(settings.auth.session_ttl_secs),
        );
        let codes = CodeIssuer::new(
            store,
            clock.clone(),
            Duration::seconds(settings.auth.code_ttl_secs),
        );
        Self {
            settings: Arc::new(settings),
            clock,
            warranties,
            returns,
            support,
            sessions,
            codes,
        }
    }

    async fn authorize(&self, headers: &HeaderMap, allowed: &[Role]) -> ApiResult<Profile> {
        let token = token_from_headers(headers);
        self.sessions.authorize(token.as_deref(), allowed).await
    }
}

// Security headers middleware
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Warranty lifecycle
        .route("/warranty/request", post(create_draft))
        .route("/warranty/create", post(seller_confirm))
        .route("/installer/confirm", post(installer_confirm))
        .route("/warranty/status", get(warranty_status))
        // Returns and support
        .route("/warranty/return-request", post(return_request))
        .route("/warranty/return", post(apply_return))
        .route("/warranty/return/reject", post(reject_return))
        .route("/warranty/return/{id}", get(get_return))
        .route("/warranty/support", post(support_ticket))
        // Sessions and one-time codes
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/auth/logout", post(logout))
        .route("/auth/request-code", post(request_code))
        .route("/auth/verify-code", post(verify_code))
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(settings: Settings, store: Arc<dyn KvStore>) -> miette::Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;
    if settings.auth.disclose_codes {
        tracing::warn!("auth.disclose_codes is enabled; one-time codes are returned to callers");
    }

    let state = AppState::new(settings, store, Arc::new(SystemClock));
    let app = router(state);

    tracing::info!(%addr, "Warranty API listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "ok": true, "ts": state.clock.now().timestamp_millis() }))
}

async fn create_draft(
    State(state): State<AppState>,
    body: JsonBody<DraftRequest>,
) -> ApiResult<Json<Value>> {
    let Json(req) = body?;
    let status = state.warranties.create_draft(req).await?;
    Ok(Json(json!({ "ok": true, "status": status })))
}

async fn seller_confirm(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: JsonBody<SaleConfirmation>,
) -> ApiResult<Json<Value>> {
    let profile = state
        .authorize(&headers, &[Role::Seller, Role::Admin])
        .await?;
    let Json(mut req) = body?;
    if req.seller_identity.is_none() {
        req.seller_identity = profile.phone().map(str::to_string);
    }

    let outcome = state.warranties.confirm_sale(req).await?;
    Ok(Json(json!({
        "ok": true,
        "status": outcome.status,
        "activationDate": outcome.activation_date,
    })))
}

async fn installer_confirm(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: JsonBody<InstallConfirmation>,
) -> ApiResult<Json<Value>> {
    let profile = state
        .authorize(&headers, &[Role::Installer, Role::Admin])
        .await?;
    let Json(mut req) = body?;
    if req.installer_identity.is_none() {
        req.installer_identity = Some(profile.display_name());
    }

    let outcome = state.warranties.confirm_installation(req).await?;
    Ok(Json(json!({
        "ok": true,
        "status": outcome.status,
        "activationDate": outcome.activation_date,
    })))
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    serial: Option<String>,
}

async fn warranty_status(
    State(state): State<AppState>,
    Query(q): Query<StatusQuery>,
) -> ApiResult<Json<StatusReport>> {
    let serial = q.serial.unwrap_or_default();
    Ok(Json(state.warranties.status(&serial).await?))
}

async fn return_request(
    State(state): State<AppState>,
    body: JsonBody<NewReturn>,
) -> ApiResult<Json<Value>> {
    let Json(req) = body?;
    let request = state.returns.file(req).await?;
    Ok(Json(json!({ "ok": true, "request": request })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReturnCommand {
    return_id: Option<String>,
    serial: Option<String>,
}

async fn apply_return(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: JsonBody<ReturnCommand>,
) -> ApiResult<Json<Value>> {
    state.authorize(&headers, &[Role::Admin]).await?;
    let Json(cmd) = body?;

    let status = match (cmd.return_id, cmd.serial) {
        (Some(id), _) if !id.trim().is_empty() => state.returns.approve(&id).await?,
        (_, Some(serial)) => state.warranties.apply_return(&serial).await?,
        _ => return Err(WarrantyError::validation("returnId or serial is required")),
    };
    Ok(Json(json!({ "ok": true, "status": status })))
}

async fn reject_return(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: JsonBody<ReturnCommand>,
) -> ApiResult<Json<Value>> {
    state.authorize(&headers, &[Role::Admin]).await?;
    let Json(cmd) = body?;
    let id = cmd
        .return_id
        .ok_or_else(|| WarrantyError::validation("returnId is required"))?;

    let request = state.returns.reject(&id).await?;
    Ok(Json(json!({ "ok": true, "request": request })))
}

async fn get_return(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<ReturnRequest>> {
    state.authorize(&headers, &[Role::Admin]).await?;
    Ok(Json(state.returns.get(&id).await?))
}

async fn support_ticket(
    State(state): State<AppState>,
    body: JsonBody<SupportRequest>,
) -> ApiResult<Json<Value>> {
    let Json(req) = body?;
    let ticket = state.support.file(req).await?;
    Ok(Json(json!({ "ok": true, "ticket": ticket.id })))
}

/// `{token, profile}` plus the session cookie.
fn session_response(state: &AppState, session: Session) -> Response {
    let cookie = SessionCookie::new(session.token.clone()).to_cookie_header(&state.settings);
    (
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "token": session.token, "profile": session.profile })),
    )
        .into_response()
}

async fn login(State(state): State<AppState>, body: JsonBody<LoginRequest>) -> ApiResult<Response> {
    let Json(req) = body?;
    let session = state.sessions.login(req).await?;
    Ok(session_response(&state, session))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    let profile = match token_from_headers(&headers) {
        Some(token) => state.sessions.lookup(&token).await?,
        None => None,
    };
    Ok(Json(match profile {
        Some(profile) => json!({ "ok": true, "profile": profile }),
        None => json!({ "ok": false, "profile": null }),
    }))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    if let Some(token) = token_from_headers(&headers) {
        state.sessions.logout(&token).await?;
    }
    Ok((
        [(header::SET_COOKIE, SessionCookie::delete_cookie_header())],
        Json(json!({ "ok": true })),
    )
        .into_response())
}

async fn request_code(
    State(state): State<AppState>,
    body: JsonBody<CodeRequest>,
) -> ApiResult<Json<Value>> {
    let Json(req) = body?;
    let issued = state.codes.request_code(req).await?;

    if state.settings.auth.disclose_codes {
        Ok(Json(json!({ "ok": true, "devCode": issued.code })))
    } else {
        Ok(Json(json!({ "ok": true })))
    }
}

async fn verify_code(
    State(state): State<AppState>,
    body: JsonBody<CodeVerification>,
) -> ApiResult<Response> {
    let Json(req) = body?;
    let profile = state.codes.verify_code(req).await?;
    let session = state.sessions.issue(profile).await?;
    Ok(session_response(&state, session))
}
