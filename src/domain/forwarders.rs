//! Freight forwarder accounts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An onboarded logistics partner
#[derive(Debug, Clone, Serialize)]
pub struct ForwarderAccount {
    pub id: Uuid,
    pub company_name: String,
    pub contact_email: String,
    pub is_verified: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Forwarder listing entry with the derived count of routing orders it holds
#[derive(Debug, Clone, Serialize)]
pub struct ForwarderSummary {
    pub id: Uuid,
    pub company_name: String,
    pub contact_email: String,
    pub is_verified: bool,
    pub is_active: bool,
    pub assigned_ro_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetVerificationRequest {
    pub is_verified: bool,
}
