//! Role-scoped sessions.
//!
//! A session binds an opaque token to one immutable [`Profile`]. Expiry is
//! only checked on lookup; an expired entry is evicted by the lookup that
//! notices it.

use crate::clock::Clock;
use crate::errors::WarrantyError;
use crate::settings::Settings;
use crate::storage::{self, random_id, KvStore, Table};
use crate::warranty::non_empty;
use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SESSION_COOKIE_NAME: &str = "sid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Seller,
    Installer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Seller => "seller",
            Role::Installer => "installer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a seller or installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorProfile {
    pub phone: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub user_id: String,
    pub dealer_code: Option<String>,
    pub manager_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ActorProfile {
    pub fn new(phone: &str, now: DateTime<Utc>) -> Self {
        Self {
            phone: phone.to_string(),
            first_name: None,
            last_name: None,
            user_id: format!("pf_{phone}"),
            dealer_code: None,
            manager_code: None,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Profile {
    Admin { login: String },
    Seller(ActorProfile),
    Installer(ActorProfile),
}

impl Profile {
    /// Wrap an actor identity for a seller or installer role.
    pub fn actor(role: Role, actor: ActorProfile) -> Result<Self, WarrantyError> {
        match role {
            Role::Seller => Ok(Profile::Seller(actor)),
            Role::Installer => Ok(Profile::Installer(actor)),
            Role::Admin => Err(WarrantyError::validation(
                "admin sessions require login and password",
            )),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Profile::Admin { .. } => Role::Admin,
            Profile::Seller(_) => Role::Seller,
            Profile::Installer(_) => Role::Installer,
        }
    }

    pub fn phone(&self) -> Option<&str> {
        match self {
            Profile::Admin { .. } => None,
            Profile::Seller(a) | Profile::Installer(a) => Some(&a.phone),
        }
    }

    /// Login for admins; "First Last" for actors, falling back to the phone.
    pub fn display_name(&self) -> String {
        match self {
            Profile::Admin { login } => login.clone(),
            Profile::Seller(a) | Profile::Installer(a) => {
                let name = [a.first_name.as_deref(), a.last_name.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                if name.is_empty() {
                    a.phone.clone()
                } else {
                    name
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub role: Option<Role>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub profile: Profile,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionAuthority {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionAuthority {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Demo-grade login: any non-empty admin credential pair is accepted;
    /// sellers and installers identify by phone and name without a password.
    pub async fn login(&self, req: LoginRequest) -> Result<Session, WarrantyError> {
        let role = req
            .role
            .ok_or_else(|| WarrantyError::validation("role is required"))?;

        let profile = if role == Role::Admin {
            match (non_empty(req.login), non_empty(req.password)) {
                (Some(login), Some(_)) => Profile::Admin { login },
                _ => return Err(WarrantyError::validation("login and password required")),
            }
        } else {
            match (
                non_empty(req.phone),
                non_empty(req.first_name),
                non_empty(req.last_name),
            ) {
                (Some(phone), Some(first_name), Some(last_name)) => {
                    let mut actor = ActorProfile::new(&phone, self.clock.now());
                    actor.first_name = Some(first_name);
                    actor.last_name = Some(last_name);
                    Profile::actor(role, actor)?
                }
                _ => {
                    return Err(WarrantyError::validation(
                        "phone, firstName, lastName required",
                    ))
                }
            }
        };

        self.issue(profile).await
    }

    /// Mint a fresh token for `profile`.
    pub async fn issue(&self, profile: Profile) -> Result<Session, WarrantyError> {
        let now = self.clock.now();
        for _ in 0..storage::MAX_CAS_ATTEMPTS {
            let session = Session {
                token: random_id(),
                profile: profile.clone(),
                issued_at: now,
                expires_at: now + self.ttl,
            };
            let encoded = serde_json::to_string(&session)?;
            if self
                .store
                .compare_and_swap(Table::Sessions, &session.token, None, Some(encoded))
                .await?
            {
                tracing::info!(
                    role = %session.profile.role(),
                    expires_at = %session.expires_at,
                    "session issued"
                );
                return Ok(session);
            }
        }
        Err(WarrantyError::Conflict("could not allocate a session token".into()))
    }

    /// Profile bound to `token`, or `None` when absent or expired.
    pub async fn lookup(&self, token: &str) -> Result<Option<Profile>, WarrantyError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }
        let Some((session, version)) =
            storage::get_json::<Session>(self.store.as_ref(), Table::Sessions, token).await?
        else {
            return Ok(None);
        };

        if self.clock.now() > session.expires_at {
            // A concurrent logout may already have removed it
            self.store
                .compare_and_swap(Table::Sessions, token, Some(version), None)
                .await?;
            tracing::debug!(role = %session.profile.role(), "expired session evicted");
            return Ok(None);
        }
        Ok(Some(session.profile))
    }

    pub async fn logout(&self, token: &str) -> Result<(), WarrantyError> {
        if self.store.delete(Table::Sessions, token.trim()).await? {
            tracing::info!("session revoked");
        }
        Ok(())
    }

    /// Resolve `token` and require one of `allowed`.
    pub async fn authorize(
        &self,
        token: Option<&str>,
        allowed: &[Role],
    ) -> Result<Profile, WarrantyError> {
        let Some(token) = token else {
            tracing::warn!("request without session token");
            return Err(WarrantyError::Unauthorized("authentication required".into()));
        };
        let Some(profile) = self.lookup(token).await? else {
            tracing::warn!("unknown or expired session token");
            return Err(WarrantyError::Unauthorized(
                "session is missing or expired".into(),
            ));
        };
        if !allowed.contains(&profile.role()) {
            tracing::warn!(role = %profile.role(), "role not permitted for operation");
            return Err(WarrantyError::Forbidden(format!(
                "role {} may not perform this operation",
                profile.role()
            )));
        }
        Ok(profile)
    }
}

#[derive(Clone, Debug)]
pub struct SessionCookie {
    pub token: String,
}

impl SessionCookie {
    pub fn new(token: String) -> Self {
        Self { token }
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;

        for cookie in cookie_header.split(';') {
            let cookie = cookie.trim();
            if let Some(value) = cookie
                .strip_prefix(SESSION_COOKIE_NAME)
                .and_then(|s| s.strip_prefix('='))
            {
                if !value.is_empty() {
                    return Some(Self {
                        token: value.to_string(),
                    });
                }
            }
        }
        None
    }

    pub fn to_cookie_header(&self, settings: &Settings) -> String {
        let secure = settings.public_base_url().starts_with("https://");

        format!(
            "{}={}; HttpOnly; {}SameSite=Lax; Path=/; Max-Age={}",
            SESSION_COOKIE_NAME,
            self.token,
            if secure { "Secure; " } else { "" },
            settings.auth.session_ttl_secs
        )
    }

    pub fn delete_cookie_header() -> String {
        format!(
            "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0",
            SESSION_COOKIE_NAME
        )
    }
}

/// Session token from `Authorization: Bearer`, else from the session cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    match bearer {
        Some(token) => Some(token.to_string()),
        None => SessionCookie::from_headers(headers).map(|c| c.token),
    }
}
