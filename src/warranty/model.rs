use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a warranty record.
///
/// `NotFound` is only ever reported for serials without a record; it is never
/// stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarrantyStatus {
    Draft,
    Pending,
    Active,
    Returned,
    NotFound,
}

impl std::fmt::Display for WarrantyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WarrantyStatus::Draft => "DRAFT",
            WarrantyStatus::Pending => "PENDING",
            WarrantyStatus::Active => "ACTIVE",
            WarrantyStatus::Returned => "RETURNED",
            WarrantyStatus::NotFound => "NOT_FOUND",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyerInfo {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerInfo {
    /// Phone of the seller who registered the sale.
    pub phone: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub purchase_date: NaiveDate,
    pub receipt_image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallerInfo {
    pub identity: Option<String>,
    pub note: Option<String>,
    pub photos: Vec<String>,
    pub confirmed_at: DateTime<Utc>,
}

/// One record per product serial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarrantyRecord {
    pub serial: String,
    pub status: WarrantyStatus,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set whenever the record enters PENDING; kept through returns.
    pub activation_date: Option<DateTime<Utc>>,
    pub buyer: Option<BuyerInfo>,
    pub seller: Option<SellerInfo>,
    pub installer: Option<InstallerInfo>,
    pub warranty_pdf: Option<String>,
    pub returned_at: Option<DateTime<Utc>>,
}

impl WarrantyRecord {
    pub fn new(serial: &str, model: &str, now: DateTime<Utc>) -> Self {
        Self {
            serial: serial.to_string(),
            status: WarrantyStatus::Draft,
            model: model.to_string(),
            created_at: now,
            updated_at: now,
            activation_date: None,
            buyer: None,
            seller: None,
            installer: None,
            warranty_pdf: None,
            returned_at: None,
        }
    }
}

// Commands

/// Buyer-submitted warranty request without proof of purchase.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftRequest {
    pub serial: Option<String>,
    #[serde(alias = "fullName")]
    pub buyer_name: Option<String>,
    #[serde(alias = "phone")]
    pub buyer_phone: Option<String>,
    #[serde(alias = "address")]
    pub buyer_address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleConfirmation {
    pub serial: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    /// `YYYY-MM-DD` or RFC 3339. Defaults to the confirmation time.
    pub purchase_date: Option<String>,
    #[serde(alias = "receiptBase64")]
    pub receipt_image: Option<String>,
    #[serde(alias = "sellerPhone")]
    pub seller_identity: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallConfirmation {
    pub serial: Option<String>,
    #[serde(alias = "installerName")]
    pub installer_identity: Option<String>,
    pub note: Option<String>,
    #[serde(default)]
    pub photos: Vec<String>,
}

// Responses

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub status: WarrantyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub model: String,
    pub serial: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    pub purchase_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallerView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub photo_count: usize,
    pub confirmed_at: DateTime<Utc>,
}

/// Result of a status read. For unknown serials only `status` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: WarrantyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller: Option<SellerView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer: Option<InstallerView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warranty_pdf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_left: Option<i64>,
}

impl StatusReport {
    pub fn not_found() -> Self {
        Self {
            status: WarrantyStatus::NotFound,
            device: None,
            seller: None,
            installer: None,
            warranty_pdf: None,
            activation_date: None,
            days_left: None,
        }
    }

    pub(crate) fn from_record(record: &WarrantyRecord, now: DateTime<Utc>) -> Self {
        let days_left = match (record.status, record.activation_date) {
            (WarrantyStatus::Pending, Some(at)) => Some(days_until(at, now)),
            _ => None,
        };
        Self {
            status: record.status,
            device: Some(DeviceView {
                model: record.model.clone(),
                serial: record.serial.clone(),
                purchase_date: record.seller.as_ref().map(|s| s.purchase_date),
            }),
            seller: record.seller.as_ref().map(|s| SellerView {
                phone: s.phone.clone(),
                customer_name: s.customer_name.clone(),
                customer_phone: s.customer_phone.clone(),
                purchase_date: s.purchase_date,
            }),
            installer: record.installer.as_ref().map(|i| InstallerView {
                identity: i.identity.clone(),
                note: i.note.clone(),
                photo_count: i.photos.len(),
                confirmed_at: i.confirmed_at,
            }),
            warranty_pdf: if record.status == WarrantyStatus::Active {
                record.warranty_pdf.clone()
            } else {
                None
            },
            activation_date: record.activation_date,
            days_left,
        }
    }
}

/// Whole days until `at`, rounded up and never negative.
pub fn days_until(at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    const DAY_MS: i64 = 24 * 60 * 60 * 1000;
    let remaining = (at - now).num_milliseconds();
    if remaining <= 0 {
        return 0;
    }
    (remaining + DAY_MS - 1) / DAY_MS
}
