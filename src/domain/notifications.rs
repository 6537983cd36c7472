//! Notification requests handed to the dispatcher
//!
//! The core only decides whether and to whom to notify; delivery lives in
//! `services::notifications`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RoutingOrderAssigned,
    RoutingOrderReassigned,
    ForwarderInvitation,
    QuoteCostsRequested,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Who a notification is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Recipient {
    /// An onboarded forwarder; the dispatcher resolves its contact email
    Forwarder(Uuid),
    /// A bare address, e.g. a prospective forwarder
    Email(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationRequest {
    pub recipient: Recipient,
    pub kind: NotificationKind,
    pub subject: String,
    pub body: String,
    pub data: serde_json::Value,
}

impl NotificationRequest {
    pub fn routing_order_assigned(ff_id: Uuid, ro_id: Uuid, order_number: &str) -> Self {
        Self {
            recipient: Recipient::Forwarder(ff_id),
            kind: NotificationKind::RoutingOrderAssigned,
            subject: format!("Routing order {} assigned to you", order_number),
            body: format!(
                "Routing order {} has been assigned to your company. Please review the shipment details in the forwarder portal.",
                order_number
            ),
            data: serde_json::json!({ "ro_id": ro_id, "order_number": order_number }),
        }
    }

    pub fn routing_order_reassigned(ff_id: Uuid, ro_id: Uuid, order_number: &str) -> Self {
        Self {
            recipient: Recipient::Forwarder(ff_id),
            kind: NotificationKind::RoutingOrderReassigned,
            subject: format!("Routing order {} transferred to you", order_number),
            body: format!(
                "Routing order {} has been reassigned to your company and is now your responsibility.",
                order_number
            ),
            data: serde_json::json!({ "ro_id": ro_id, "order_number": order_number }),
        }
    }

    pub fn forwarder_invitation(
        email: &str,
        company_name: &str,
        accept_url: &str,
        days_valid: i64,
    ) -> Self {
        Self {
            recipient: Recipient::Email(email.to_string()),
            kind: NotificationKind::ForwarderInvitation,
            subject: format!("{}: invitation to join our forwarder network", company_name),
            body: format!(
                "You have been invited to onboard {} as a freight forwarding partner. Complete your registration within {} days: {}",
                company_name, days_valid, accept_url
            ),
            data: serde_json::json!({
                "company_name": company_name,
                "accept_url": accept_url,
                "days_valid": days_valid,
            }),
        }
    }

    pub fn quote_costs_requested(ff_id: Uuid, quote_id: Uuid, submission_ref: &str) -> Self {
        Self {
            recipient: Recipient::Forwarder(ff_id),
            kind: NotificationKind::QuoteCostsRequested,
            subject: format!("Cost request for quote {}", submission_ref),
            body: format!(
                "A new shipment quote ({}) is waiting for your origin, freight and destination costs.",
                submission_ref
            ),
            data: serde_json::json!({ "quote_id": quote_id, "submission_ref": submission_ref }),
        }
    }
}
