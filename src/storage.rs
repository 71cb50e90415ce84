//! Keyed record storage.
//!
//! Every piece of state (warranty records, sessions, one-time codes, return
//! requests, support tickets) lives in its own [`Table`] of a [`KvStore`].
//! Values are JSON documents; each write stamps a version that is never reused
//! for that key, even after a delete, and
//! [`KvStore::compare_and_swap`] is the only primitive writers need to make a
//! read-modify-write atomic for one key without locking any other key.

use crate::entities;
use crate::errors::WarrantyError;
use crate::settings::Database as DbCfg;
use async_trait::async_trait;
use base64ct::Encoding;
use chrono::Utc;
use migration::MigratorTrait;
use parking_lot::Mutex;
use rand::{Rng, RngCore};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter, Set,
    SqlErr,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Upper bound on read-modify-write retries for a single key.
pub const MAX_CAS_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Warranties,
    Sessions,
    Codes,
    Returns,
    Tickets,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Warranties => "warranties",
            Table::Sessions => "sessions",
            Table::Codes => "codes",
            Table::Returns => "returns",
            Table::Tickets => "tickets",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: String,
    pub version: i64,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, table: Table, key: &str) -> Result<Option<Versioned>, WarrantyError>;

    /// Replace the value under `key` only if its current version equals
    /// `expected` (`None` meaning the key must be absent). A `new` of `None`
    /// deletes the key. Returns `false` when the precondition did not hold.
    async fn compare_and_swap(
        &self,
        table: Table,
        key: &str,
        expected: Option<i64>,
        new: Option<String>,
    ) -> Result<bool, WarrantyError>;

    async fn put(&self, table: Table, key: &str, value: String) -> Result<(), WarrantyError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let expected = self.get(table, key).await?.map(|v| v.version);
            if self
                .compare_and_swap(table, key, expected, Some(value.clone()))
                .await?
            {
                return Ok(());
            }
        }
        Err(conflict(table, key))
    }

    /// Returns whether a value was removed.
    async fn delete(&self, table: Table, key: &str) -> Result<bool, WarrantyError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(current) = self.get(table, key).await? else {
                return Ok(false);
            };
            if self
                .compare_and_swap(table, key, Some(current.version), None)
                .await?
            {
                return Ok(true);
            }
        }
        Err(conflict(table, key))
    }
}

fn conflict(table: Table, key: &str) -> WarrantyError {
    WarrantyError::Conflict(format!(
        "too many concurrent updates on {}/{}",
        table.as_str(),
        key
    ))
}

/// Open the configured backend. The database backend runs pending migrations.
pub async fn init(cfg: &DbCfg) -> Result<Arc<dyn KvStore>, WarrantyError> {
    if cfg.in_memory {
        tracing::warn!("Using in-memory storage; all state is lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let db = Database::connect(&cfg.url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(Arc::new(DbStore::new(db)))
}

/// Decode the value under `key` together with its version.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    table: Table,
    key: &str,
) -> Result<Option<(T, i64)>, WarrantyError> {
    match store.get(table, key).await? {
        Some(v) => Ok(Some((serde_json::from_str(&v.value)?, v.version))),
        None => Ok(None),
    }
}

/// Atomically transform the value under `key`.
///
/// `apply` sees the current value (or `None`) and returns the value to store
/// (or `None` to delete). When another writer got in between, the closure is
/// re-run against the fresh value. Errors from `apply` abort without writing.
pub async fn update_json<T, F>(
    store: &dyn KvStore,
    table: Table,
    key: &str,
    mut apply: F,
) -> Result<Option<T>, WarrantyError>
where
    T: Serialize + DeserializeOwned + Send,
    F: FnMut(Option<T>) -> Result<Option<T>, WarrantyError> + Send,
{
    for _ in 0..MAX_CAS_ATTEMPTS {
        let (current, expected) = match store.get(table, key).await? {
            Some(v) => (Some(serde_json::from_str::<T>(&v.value)?), Some(v.version)),
            None => (None, None),
        };
        let next = apply(current)?;
        let encoded = match &next {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };
        if store
            .compare_and_swap(table, key, expected, encoded)
            .await?
        {
            return Ok(next);
        }
        tracing::debug!(table = table.as_str(), key, "lost compare-and-swap race, retrying");
    }
    Err(conflict(table, key))
}

// In-process backend

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<(Table, String), Versioned>,
    // Store-wide, so a recreated key never reuses a version
    last_version: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, table: Table, key: &str) -> Result<Option<Versioned>, WarrantyError> {
        Ok(self
            .inner
            .lock()
            .entries
            .get(&(table, key.to_string()))
            .cloned())
    }

    async fn compare_and_swap(
        &self,
        table: Table,
        key: &str,
        expected: Option<i64>,
        new: Option<String>,
    ) -> Result<bool, WarrantyError> {
        let mut inner = self.inner.lock();
        let slot = (table, key.to_string());
        let current = inner.entries.get(&slot).map(|v| v.version);
        if current != expected {
            return Ok(false);
        }
        match new {
            Some(value) => {
                inner.last_version += 1;
                let version = inner.last_version;
                inner.entries.insert(slot, Versioned { value, version });
            }
            None => {
                inner.entries.remove(&slot);
            }
        }
        Ok(true)
    }
}

// SQL backend

#[derive(Debug, Clone)]
pub struct DbStore {
    db: DatabaseConnection,
    last_version: Arc<Mutex<i64>>,
}

impl DbStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            last_version: Arc::new(Mutex::new(0)),
        }
    }

    /// Wall-clock microseconds, forced strictly increasing within the process.
    fn next_version(&self) -> i64 {
        let mut last = self.last_version.lock();
        *last = Utc::now().timestamp_micros().max(*last + 1);
        *last
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl KvStore for DbStore {
    async fn get(&self, table: Table, key: &str) -> Result<Option<Versioned>, WarrantyError> {
        use entities::kv_entry::{Column, Entity};

        let model = Entity::find()
            .filter(Column::Namespace.eq(table.as_str()))
            .filter(Column::Key.eq(key))
            .one(&self.db)
            .await?;

        Ok(model.map(|m| Versioned {
            value: m.value,
            version: m.version,
        }))
    }

    async fn compare_and_swap(
        &self,
        table: Table,
        key: &str,
        expected: Option<i64>,
        new: Option<String>,
    ) -> Result<bool, WarrantyError> {
        use entities::kv_entry::{Column, Entity};

        let now = Utc::now().timestamp();
        match (expected, new) {
            (None, None) => Ok(self.get(table, key).await?.is_none()),
            (None, Some(value)) => {
                let entry = entities::kv_entry::ActiveModel {
                    namespace: Set(table.as_str().to_string()),
                    key: Set(key.to_string()),
                    value: Set(value),
                    version: Set(self.next_version()),
                    updated_at: Set(now),
                };
                match entry.insert(&self.db).await {
                    Ok(_) => Ok(true),
                    // Someone else created the key first
                    Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                        Ok(false)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            (Some(version), Some(value)) => {
                let result = Entity::update_many()
                    .col_expr(Column::Value, Expr::value(value))
                    .col_expr(Column::Version, Expr::value(self.next_version()))
                    .col_expr(Column::UpdatedAt, Expr::value(now))
                    .filter(Column::Namespace.eq(table.as_str()))
                    .filter(Column::Key.eq(key))
                    .filter(Column::Version.eq(version))
                    .exec(&self.db)
                    .await?;
                Ok(result.rows_affected == 1)
            }
            (Some(version), None) => {
                let result = Entity::delete_many()
                    .filter(Column::Namespace.eq(table.as_str()))
                    .filter(Column::Key.eq(key))
                    .filter(Column::Version.eq(version))
                    .exec(&self.db)
                    .await?;
                Ok(result.rows_affected == 1)
            }
        }
    }
}

/// Opaque 192-bit token, URL-safe.
pub(crate) fn random_id() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

/// Decimal string of exactly `len` digits, no leading zero.
pub(crate) fn random_digits(len: u32) -> String {
    let low = 10u64.pow(len.saturating_sub(1));
    let high = 10u64.pow(len);
    rand::thread_rng().gen_range(low..high).to_string()
}
