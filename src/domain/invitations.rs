//! Forwarder onboarding invitations
//!
//! Expiry is never stored by a sweep: it is derived from `expires_at` every
//! time an invitation is read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Sent,
    Accepted,
    Expired,
    Revoked,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Accepted => "accepted",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "accepted" => Some(Self::Accepted),
            "expired" => Some(Self::Expired),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invitation {
    pub id: Uuid,
    pub email: String,
    pub company_name: String,
    pub token: Uuid,
    pub status: InvitationStatus,
    pub expires_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    /// True at or after `expires_at`. Accepted and revoked invitations keep their status.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            InvitationStatus::Expired => true,
            InvitationStatus::Pending | InvitationStatus::Sent => now >= self.expires_at,
            InvitationStatus::Accepted | InvitationStatus::Revoked => false,
        }
    }

    /// Stored status with lazy expiry applied
    pub fn effective_status(&self, now: DateTime<Utc>) -> InvitationStatus {
        if self.is_expired(now) {
            InvitationStatus::Expired
        } else {
            self.status
        }
    }

    pub fn to_response(&self, now: DateTime<Utc>) -> InvitationResponse {
        InvitationResponse {
            id: self.id,
            email: self.email.clone(),
            company_name: self.company_name.clone(),
            status: self.status,
            effective_status: self.effective_status(now),
            is_expired: self.is_expired(now),
            expires_at: self.expires_at,
            sent_at: self.sent_at,
            accepted_at: self.accepted_at,
            revoked_at: self.revoked_at,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InviteRequest {
    pub email: String,
    pub company_name: String,
    #[serde(default)]
    pub days_valid: Option<i64>,
    #[serde(default = "default_true")]
    pub send_email: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevokeQuery {
    pub id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcceptInvitationRequest {
    pub token: Uuid,
}

/// Invitation as returned to clients; `is_expired` is computed at read time
#[derive(Debug, Clone, Serialize)]
pub struct InvitationResponse {
    pub id: Uuid,
    pub email: String,
    pub company_name: String,
    pub status: InvitationStatus,
    pub effective_status: InvitationStatus,
    pub is_expired: bool,
    pub expires_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
