//! One-time registration codes.
//!
//! At most one code is outstanding per `(phone, role)`; requesting again
//! overwrites it. A code is consumed by the first successful verification, or
//! dropped by a verification attempt made after it expired. A wrong guess
//! leaves it in place.

use crate::clock::Clock;
use crate::errors::WarrantyError;
use crate::session::{ActorProfile, Profile, Role};
use crate::storage::{self, random_digits, KvStore, Table};
use crate::warranty::non_empty;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const CODE_DIGITS: u32 = 6;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeRequest {
    pub role: Option<Role>,
    pub phone: Option<String>,
    pub dealer_code: Option<String>,
    pub manager_code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeVerification {
    pub role: Option<Role>,
    pub phone: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OneTimeCode {
    code: String,
    expires_at: DateTime<Utc>,
    dealer_code: Option<String>,
    manager_code: Option<String>,
}

/// Result of a code request. `code` is meant for out-of-band delivery.
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CodeIssuer {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl CodeIssuer {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub async fn request_code(&self, req: CodeRequest) -> Result<IssuedCode, WarrantyError> {
        let (role, phone) = actor_key(req.role, req.phone)?;
        let entry = OneTimeCode {
            code: random_digits(CODE_DIGITS),
            expires_at: self.clock.now() + self.ttl,
            dealer_code: non_empty(req.dealer_code),
            manager_code: non_empty(req.manager_code),
        };
        self.store
            .put(Table::Codes, &code_key(&phone, role), serde_json::to_string(&entry)?)
            .await?;

        tracing::info!(%role, expires_at = %entry.expires_at, "one-time code issued");
        Ok(IssuedCode {
            code: entry.code,
            expires_at: entry.expires_at,
        })
    }

    /// Check and consume a code, returning the profile to open a session for.
    pub async fn verify_code(&self, req: CodeVerification) -> Result<Profile, WarrantyError> {
        let (role, phone) = actor_key(req.role, req.phone)?;
        let supplied = non_empty(req.code)
            .ok_or_else(|| WarrantyError::validation("code is required"))?;
        let key = code_key(&phone, role);

        for _ in 0..storage::MAX_CAS_ATTEMPTS {
            let Some((entry, version)) =
                storage::get_json::<OneTimeCode>(self.store.as_ref(), Table::Codes, &key).await?
            else {
                tracing::warn!(%role, "code verification without outstanding code");
                return Err(WarrantyError::InvalidCode);
            };

            let now = self.clock.now();
            if now > entry.expires_at {
                self.store
                    .compare_and_swap(Table::Codes, &key, Some(version), None)
                    .await?;
                tracing::warn!(%role, "expired one-time code dropped");
                return Err(WarrantyError::InvalidCode);
            }
            if entry.code != supplied {
                tracing::warn!(%role, "one-time code mismatch");
                return Err(WarrantyError::InvalidCode);
            }

            // Losing this race means a newer code replaced it; re-check against that one
            if self
                .store
                .compare_and_swap(Table::Codes, &key, Some(version), None)
                .await?
            {
                let mut actor = ActorProfile::new(&phone, now);
                actor.dealer_code = entry.dealer_code;
                actor.manager_code = entry.manager_code;
                tracing::info!(%role, "one-time code verified");
                return Profile::actor(role, actor);
            }
        }
        Err(WarrantyError::Conflict(
            "too many concurrent code updates".into(),
        ))
    }
}

fn actor_key(role: Option<Role>, phone: Option<String>) -> Result<(Role, String), WarrantyError> {
    let role = match role {
        Some(Role::Admin) => {
            return Err(WarrantyError::validation(
                "one-time codes are only issued to sellers and installers",
            ))
        }
        Some(role) => role,
        None => return Err(WarrantyError::validation("role is required")),
    };
    let phone = non_empty(phone).ok_or_else(|| WarrantyError::validation("phone is required"))?;
    Ok((role, phone))
}

fn code_key(phone: &str, role: Role) -> String {
    format!("{phone}:{role}")
}
