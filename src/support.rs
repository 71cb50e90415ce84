//! Buyer support tickets.

use crate::clock::Clock;
use crate::errors::WarrantyError;
use crate::storage::{self, random_digits, KvStore, Table};
use crate::warranty::non_empty;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportRequest {
    pub serial: Option<String>,
    pub name: Option<String>,
    pub contacts: Option<String>,
    pub message: Option<String>,
    /// Warranty status the buyer saw when writing in.
    pub status: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub serial: Option<String>,
    pub name: Option<String>,
    pub contacts: Option<String>,
    pub message: String,
    pub reported_status: Option<String>,
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SupportDesk {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl SupportDesk {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn file(&self, req: SupportRequest) -> Result<Ticket, WarrantyError> {
        let message = non_empty(req.message)
            .ok_or_else(|| WarrantyError::validation("message is required"))?;
        let now = self.clock.now();

        for _ in 0..storage::MAX_CAS_ATTEMPTS {
            let ticket = Ticket {
                id: format!("PF-{}", random_digits(5)),
                serial: non_empty(req.serial.clone()),
                name: non_empty(req.name.clone()),
                contacts: non_empty(req.contacts.clone()),
                message: message.clone(),
                reported_status: non_empty(req.status.clone()),
                attachments: req.attachments.clone(),
                created_at: now,
            };
            if self
                .store
                .compare_and_swap(
                    Table::Tickets,
                    &ticket.id,
                    None,
                    Some(serde_json::to_string(&ticket)?),
                )
                .await?
            {
                tracing::info!(ticket = %ticket.id, serial = ?ticket.serial, "support ticket filed");
                return Ok(ticket);
            }
        }
        Err(WarrantyError::Conflict("could not allocate a ticket id".into()))
    }
}
