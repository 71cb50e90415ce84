//! Pump warranty registration service.
//!
//! Warranty records move through DRAFT → PENDING → ACTIVE (or RETURNED),
//! gated by role-scoped sessions and one-time registration codes. All modules
//! are public so the integration tests can drive them directly.

pub mod clock;
pub mod entities;
pub mod errors;
pub mod otp;
pub mod session;
pub mod settings;
pub mod storage;
pub mod support;
pub mod warranty;
pub mod web;
