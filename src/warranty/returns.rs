//! Buyer return requests and their admin resolution.
//!
//! Approving a request rolls its warranty back through
//! [`WarrantyEngine::apply_return`]; rejecting leaves the warranty untouched.

use super::{non_empty, WarrantyEngine, WarrantyStatus};
use crate::clock::Clock;
use crate::errors::WarrantyError;
use crate::storage::{self, random_digits, KvStore, Table};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRequest {
    pub id: String,
    pub serial: String,
    pub buyer_name: Option<String>,
    pub reason: String,
    pub status: ReturnStatus,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReturn {
    pub serial: Option<String>,
    pub buyer_name: Option<String>,
    pub reason: Option<String>,
}

#[derive(Clone)]
pub struct ReturnDesk {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    engine: WarrantyEngine,
}

impl ReturnDesk {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, engine: WarrantyEngine) -> Self {
        Self {
            store,
            clock,
            engine,
        }
    }

    pub async fn file(&self, req: NewReturn) -> Result<ReturnRequest, WarrantyError> {
        let serial = non_empty(req.serial)
            .ok_or_else(|| WarrantyError::validation("serial is required"))?;
        let reason = non_empty(req.reason)
            .ok_or_else(|| WarrantyError::validation("reason is required"))?;
        if self.engine.record(&serial).await?.is_none() {
            return Err(WarrantyError::NotFound(format!(
                "no warranty record for serial {serial}"
            )));
        }

        let now = self.clock.now();
        for _ in 0..storage::MAX_CAS_ATTEMPTS {
            let request = ReturnRequest {
                id: format!("R-{}", random_digits(6)),
                serial: serial.clone(),
                buyer_name: non_empty(req.buyer_name.clone()),
                reason: reason.clone(),
                status: ReturnStatus::Pending,
                requested_at: now,
                resolved_at: None,
            };
            let encoded = serde_json::to_string(&request)?;
            // Ids are random; retry on the rare collision
            if self
                .store
                .compare_and_swap(Table::Returns, &request.id, None, Some(encoded))
                .await?
            {
                tracing::info!(id = %request.id, serial = %request.serial, "return request filed");
                return Ok(request);
            }
        }
        Err(WarrantyError::Conflict("could not allocate a return id".into()))
    }

    pub async fn get(&self, id: &str) -> Result<ReturnRequest, WarrantyError> {
        storage::get_json(self.store.as_ref(), Table::Returns, id.trim())
            .await?
            .map(|(request, _)| request)
            .ok_or_else(|| WarrantyError::NotFound(format!("return request {id} not found")))
    }

    /// Approve the request and roll its warranty back.
    pub async fn approve(&self, id: &str) -> Result<WarrantyStatus, WarrantyError> {
        let request = self.resolve(id, ReturnStatus::Approved).await?;
        self.engine.apply_return(&request.serial).await
    }

    pub async fn reject(&self, id: &str) -> Result<ReturnRequest, WarrantyError> {
        self.resolve(id, ReturnStatus::Rejected).await
    }

    async fn resolve(
        &self,
        id: &str,
        outcome: ReturnStatus,
    ) -> Result<ReturnRequest, WarrantyError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(WarrantyError::validation("returnId is required"));
        }
        let now = self.clock.now();
        let resolved = storage::update_json(
            self.store.as_ref(),
            Table::Returns,
            id,
            |current: Option<ReturnRequest>| {
                let mut request = current.ok_or_else(|| {
                    WarrantyError::NotFound(format!("return request {id} not found"))
                })?;
                if request.status != ReturnStatus::Pending {
                    return Err(WarrantyError::Conflict(format!(
                        "return request {id} is already resolved"
                    )));
                }
                request.status = outcome;
                request.resolved_at = Some(now);
                Ok(Some(request))
            },
        )
        .await?
        .ok_or_else(|| WarrantyError::NotFound(format!("return request {id} not found")))?;

        tracing::info!(id, serial = %resolved.serial, ?outcome, "return request resolved");
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;
    use crate::warranty::{LifecyclePolicy, SaleConfirmation};
    use chrono::TimeZone;

    async fn desk_with_sale(serial: &str) -> (ReturnDesk, WarrantyEngine) {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
        ));
        let engine = WarrantyEngine::new(store.clone(), clock.clone(), LifecyclePolicy::default());
        engine
            .confirm_sale(SaleConfirmation {
                serial: Some(serial.to_string()),
                receipt_image: Some("receipt".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        (ReturnDesk::new(store, clock, engine.clone()), engine)
    }

    fn new_return(serial: &str) -> NewReturn {
        NewReturn {
            serial: Some(serial.to_string()),
            buyer_name: Some("Andrii".to_string()),
            reason: Some("Wrong size".to_string()),
        }
    }

    #[tokio::test]
    async fn test_file_and_approve() {
        let (desk, engine) = desk_with_sale("SN1").await;

        let request = desk.file(new_return("SN1")).await.unwrap();
        assert!(request.id.starts_with("R-"));
        assert_eq!(request.status, ReturnStatus::Pending);

        let status = desk.approve(&request.id).await.unwrap();
        assert_eq!(status, WarrantyStatus::Returned);
        assert_eq!(
            engine.record("SN1").await.unwrap().unwrap().status,
            WarrantyStatus::Returned
        );
        assert_eq!(
            desk.get(&request.id).await.unwrap().status,
            ReturnStatus::Approved
        );
    }

    #[tokio::test]
    async fn test_reject_keeps_warranty() {
        let (desk, engine) = desk_with_sale("SN1").await;
        let request = desk.file(new_return("SN1")).await.unwrap();

        let rejected = desk.reject(&request.id).await.unwrap();
        assert_eq!(rejected.status, ReturnStatus::Rejected);
        assert_eq!(
            engine.record("SN1").await.unwrap().unwrap().status,
            WarrantyStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_resolving_twice_conflicts() {
        let (desk, _) = desk_with_sale("SN1").await;
        let request = desk.file(new_return("SN1")).await.unwrap();
        desk.reject(&request.id).await.unwrap();

        assert!(matches!(
            desk.approve(&request.id).await,
            Err(WarrantyError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_file_requires_known_serial_and_reason() {
        let (desk, _) = desk_with_sale("SN1").await;

        assert!(matches!(
            desk.file(new_return("UNKNOWN")).await,
            Err(WarrantyError::NotFound(_))
        ));

        let mut no_reason = new_return("SN1");
        no_reason.reason = Some("   ".to_string());
        assert!(matches!(
            desk.file(no_reason).await,
            Err(WarrantyError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_return_id() {
        let (desk, _) = desk_with_sale("SN1").await;
        assert!(matches!(
            desk.approve("R-000000").await,
            Err(WarrantyError::NotFound(_))
        ));
    }
}
