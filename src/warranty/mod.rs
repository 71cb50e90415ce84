//! Warranty lifecycle engine.
//!
//! Records move DRAFT → PENDING → ACTIVE. A seller confirming a sale or an
//! installer confirming an installation starts the hold period; once the
//! activation date has passed, the next status read flips PENDING to ACTIVE
//! and persists it. There is no timer: a record nobody reads keeps its stored
//! PENDING status until the next read. A return moves any record to RETURNED,
//! which is never re-derived to ACTIVE.

pub mod model;
pub mod returns;

pub use model::*;
pub use returns::{NewReturn, ReturnDesk, ReturnRequest, ReturnStatus};

use crate::clock::Clock;
use crate::errors::WarrantyError;
use crate::settings;
use crate::storage::{self, KvStore, Table};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;

/// Parameters of the lifecycle that come from configuration.
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    pub hold: Duration,
    pub device_model: String,
    pub pdf_url_template: String,
}

impl LifecyclePolicy {
    pub fn pdf_url(&self, serial: &str) -> String {
        self.pdf_url_template.replace("{serial}", serial)
    }
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        (&settings::Warranty::default()).into()
    }
}

impl From<&settings::Warranty> for LifecyclePolicy {
    fn from(cfg: &settings::Warranty) -> Self {
        Self {
            hold: Duration::days(cfg.hold_days),
            device_model: cfg.device_model.clone(),
            pdf_url_template: cfg.pdf_url_template.clone(),
        }
    }
}

/// The status a record should report at `now`.
///
/// Only a stored PENDING with an activation date at or before `now` changes;
/// every other combination reports the stored status.
pub fn effective_status(record: &WarrantyRecord, now: DateTime<Utc>) -> WarrantyStatus {
    match (record.status, record.activation_date) {
        (WarrantyStatus::Pending, Some(at)) if now >= at => WarrantyStatus::Active,
        (status, _) => status,
    }
}

#[derive(Clone)]
pub struct WarrantyEngine {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    policy: Arc<LifecyclePolicy>,
}

impl WarrantyEngine {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, policy: LifecyclePolicy) -> Self {
        Self {
            store,
            clock,
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    /// Stored record as-is, without applying lazy activation.
    pub async fn record(&self, serial: &str) -> Result<Option<WarrantyRecord>, WarrantyError> {
        let serial = serial.trim();
        Ok(storage::get_json(self.store.as_ref(), Table::Warranties, serial)
            .await?
            .map(|(record, _)| record))
    }

    /// Create the record in DRAFT, or force an existing one back to DRAFT,
    /// replacing its buyer details.
    pub async fn create_draft(&self, req: DraftRequest) -> Result<WarrantyStatus, WarrantyError> {
        let serial = require_serial(req.serial.as_deref())?;
        let buyer = BuyerInfo {
            full_name: non_empty(req.buyer_name),
            phone: non_empty(req.buyer_phone),
            address: non_empty(req.buyer_address),
        };
        let now = self.clock.now();
        let model = self.policy.device_model.clone();

        let mut previous = None;
        storage::update_json(
            self.store.as_ref(),
            Table::Warranties,
            &serial,
            |current: Option<WarrantyRecord>| {
                previous = current.as_ref().map(|r| r.status);
                let mut record = current.unwrap_or_else(|| WarrantyRecord::new(&serial, &model, now));
                record.status = WarrantyStatus::Draft;
                record.buyer = Some(buyer.clone());
                record.updated_at = now;
                Ok(Some(record))
            },
        )
        .await?;

        log_transition(&serial, previous, WarrantyStatus::Draft, "create_draft");
        Ok(WarrantyStatus::Draft)
    }

    /// Record a sale: PENDING with `activation = sale date + hold`.
    pub async fn confirm_sale(
        &self,
        req: SaleConfirmation,
    ) -> Result<TransitionOutcome, WarrantyError> {
        let serial = require_serial(req.serial.as_deref())?;
        let receipt = non_empty(req.receipt_image)
            .ok_or_else(|| WarrantyError::validation("receiptImage is required"))?;
        let now = self.clock.now();
        let sale_date = match non_empty(req.purchase_date) {
            Some(raw) => parse_purchase_date(&raw)?,
            None => now,
        };
        let activation = sale_date + self.policy.hold;
        let seller = SellerInfo {
            phone: non_empty(req.seller_identity),
            customer_name: non_empty(req.customer_name),
            customer_phone: non_empty(req.customer_phone),
            purchase_date: sale_date.date_naive(),
            receipt_image: receipt,
        };
        let model = self.policy.device_model.clone();

        let mut previous = None;
        storage::update_json(
            self.store.as_ref(),
            Table::Warranties,
            &serial,
            |current: Option<WarrantyRecord>| {
                previous = current.as_ref().map(|r| r.status);
                let mut record = current.unwrap_or_else(|| WarrantyRecord::new(&serial, &model, now));
                record.status = WarrantyStatus::Pending;
                record.activation_date = Some(activation);
                record.seller = Some(seller.clone());
                record.updated_at = now;
                Ok(Some(record))
            },
        )
        .await?;

        log_transition(&serial, previous, WarrantyStatus::Pending, "confirm_sale");
        Ok(TransitionOutcome {
            status: WarrantyStatus::Pending,
            activation_date: Some(activation),
        })
    }

    /// Attach installation details. A DRAFT (or missing) record is promoted to
    /// PENDING with `activation = now + hold`; any other status is kept.
    pub async fn confirm_installation(
        &self,
        req: InstallConfirmation,
    ) -> Result<TransitionOutcome, WarrantyError> {
        let serial = require_serial(req.serial.as_deref())?;
        let photos: Vec<String> = req
            .photos
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect();
        if photos.is_empty() {
            return Err(WarrantyError::validation("at least one photo is required"));
        }
        let now = self.clock.now();
        let installer = InstallerInfo {
            identity: non_empty(req.installer_identity),
            note: non_empty(req.note),
            photos,
            confirmed_at: now,
        };
        let activation = now + self.policy.hold;
        let model = self.policy.device_model.clone();

        let mut previous = None;
        let stored = storage::update_json(
            self.store.as_ref(),
            Table::Warranties,
            &serial,
            |current: Option<WarrantyRecord>| {
                previous = current.as_ref().map(|r| r.status);
                let mut record = current.unwrap_or_else(|| WarrantyRecord::new(&serial, &model, now));
                record.installer = Some(installer.clone());
                if record.status == WarrantyStatus::Draft {
                    record.status = WarrantyStatus::Pending;
                    record.activation_date = Some(activation);
                }
                record.updated_at = now;
                Ok(Some(record))
            },
        )
        .await?
        .ok_or_else(|| WarrantyError::Other(format!("record {serial} vanished during update")))?;

        log_transition(&serial, previous, stored.status, "confirm_installation");
        Ok(TransitionOutcome {
            status: stored.status,
            activation_date: stored.activation_date,
        })
    }

    /// Read the status of `serial`, persisting PENDING → ACTIVE when due.
    pub async fn status(&self, serial: &str) -> Result<StatusReport, WarrantyError> {
        let serial = serial.trim();
        if serial.is_empty() {
            return Ok(StatusReport::not_found());
        }
        let now = self.clock.now();
        let Some((mut record, _)) =
            storage::get_json::<WarrantyRecord>(self.store.as_ref(), Table::Warranties, serial)
                .await?
        else {
            return Ok(StatusReport::not_found());
        };

        if effective_status(&record, now) != record.status {
            let pdf_url = self.policy.pdf_url(serial);
            let updated = storage::update_json(
                self.store.as_ref(),
                Table::Warranties,
                serial,
                |current: Option<WarrantyRecord>| {
                    Ok(current.map(|mut r| {
                        if effective_status(&r, now) == WarrantyStatus::Active
                            && r.status == WarrantyStatus::Pending
                        {
                            r.status = WarrantyStatus::Active;
                            r.warranty_pdf.get_or_insert_with(|| pdf_url.clone());
                            r.updated_at = now;
                        }
                        r
                    }))
                },
            )
            .await?;
            match updated {
                Some(r) => record = r,
                None => return Ok(StatusReport::not_found()),
            }
            tracing::debug!(serial, "warranty activated on read");
            log_transition(
                serial,
                Some(WarrantyStatus::Pending),
                record.status,
                "lazy_activation",
            );
        }

        Ok(StatusReport::from_record(&record, now))
    }

    /// Roll a record back to RETURNED regardless of its current status. The
    /// activation date is kept.
    pub async fn apply_return(&self, serial: &str) -> Result<WarrantyStatus, WarrantyError> {
        let serial = require_serial(Some(serial))?;
        let now = self.clock.now();

        let mut previous = None;
        storage::update_json(
            self.store.as_ref(),
            Table::Warranties,
            &serial,
            |current: Option<WarrantyRecord>| {
                let mut record = current.ok_or_else(|| {
                    WarrantyError::NotFound(format!("no warranty record for serial {serial}"))
                })?;
                previous = Some(record.status);
                record.status = WarrantyStatus::Returned;
                record.returned_at = Some(now);
                record.updated_at = now;
                Ok(Some(record))
            },
        )
        .await?;

        log_transition(&serial, previous, WarrantyStatus::Returned, "return");
        Ok(WarrantyStatus::Returned)
    }
}

fn log_transition(
    serial: &str,
    from: Option<WarrantyStatus>,
    to: WarrantyStatus,
    action: &'static str,
) {
    let from = from.unwrap_or(WarrantyStatus::NotFound);
    tracing::info!(serial, %from, %to, action, "warranty transition");
}

fn require_serial(raw: Option<&str>) -> Result<String, WarrantyError> {
    match raw.map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(WarrantyError::validation("serial is required")),
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Accepts `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp.
pub fn parse_purchase_date(raw: &str) -> Result<DateTime<Utc>, WarrantyError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        WarrantyError::validation(format!(
            "purchaseDate `{raw}` is not a YYYY-MM-DD date or RFC 3339 timestamp"
        ))
    })?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| WarrantyError::validation("purchaseDate is out of range"))?;
    Ok(Utc.from_utc_datetime(&midnight))
}
