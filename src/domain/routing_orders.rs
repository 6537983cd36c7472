//! Routing orders and their forwarder assignment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ff_config::RouteDescriptor;
use crate::error::{FieldError, RuleViolation};

/// Assignment sub-state of a routing order.
///
/// `Unassigned -> Assigned(A) -> Assigned(B) -> ...`; nothing in this
/// service moves an order back to `Unassigned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AssignmentState {
    Unassigned,
    Assigned {
        ff_id: Uuid,
        assigned_at: DateTime<Utc>,
    },
}

impl AssignmentState {
    pub fn from_columns(ff_id: Option<Uuid>, assigned_at: Option<DateTime<Utc>>) -> Self {
        match (ff_id, assigned_at) {
            (Some(ff_id), Some(assigned_at)) => Self::Assigned { ff_id, assigned_at },
            _ => Self::Unassigned,
        }
    }

    pub fn ff_id(&self) -> Option<Uuid> {
        match self {
            Self::Assigned { ff_id, .. } => Some(*ff_id),
            Self::Unassigned => None,
        }
    }
}

/// How a forwarder came to hold a routing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSource {
    DefaultForwarder,
    RouteRule,
    Manual,
}

impl AssignmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DefaultForwarder => "default_forwarder",
            Self::RouteRule => "route_rule",
            Self::Manual => "manual",
        }
    }
}

/// A shipment created from an accepted quote
#[derive(Debug, Clone, Serialize)]
pub struct RoutingOrder {
    pub id: Uuid,
    pub order_number: String,
    pub consignee: String,
    pub transport_type: String,
    pub origin_country: String,
    pub origin_port: Option<String>,
    pub destination_city: Option<String>,
    pub carrier_name: Option<String>,
    pub status: String,
    pub assignment: AssignmentState,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoutingOrder {
    pub fn route(&self) -> RouteDescriptor {
        RouteDescriptor {
            transport_type: self.transport_type.clone(),
            origin_country: self.origin_country.clone(),
            origin_port: self.origin_port.clone(),
            destination_city: self.destination_city.clone(),
            carrier_name: self.carrier_name.clone(),
        }
    }
}

/// Append-only record of an assignment change
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AssignmentHistoryEntry {
    pub id: i64,
    pub ro_id: Uuid,
    pub previous_ff_id: Option<Uuid>,
    pub new_ff_id: Uuid,
    pub source: String,
    pub rule_id: Option<i64>,
    pub changed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Request DTO for creating a routing order from an approved quote
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoutingOrderRequest {
    pub order_number: String,
    pub consignee: String,
    pub transport_type: String,
    pub origin_country: String,
    #[serde(default)]
    pub origin_port: Option<String>,
    #[serde(default)]
    pub destination_city: Option<String>,
    #[serde(default)]
    pub carrier_name: Option<String>,
    /// Send the assignment notification when auto-assignment succeeds
    #[serde(default = "default_true")]
    pub notify: bool,
}

fn default_true() -> bool {
    true
}

impl CreateRoutingOrderRequest {
    /// Trimmed copy with blank optional route fields dropped
    pub fn normalized(self) -> Result<Self, RuleViolation> {
        let required = [
            ("order_number", self.order_number.trim()),
            ("consignee", self.consignee.trim()),
            ("transport_type", self.transport_type.trim()),
            ("origin_country", self.origin_country.trim()),
        ];
        let fields: Vec<FieldError> = required
            .iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(name, _)| FieldError::new(*name, "is required"))
            .collect();
        if !fields.is_empty() {
            return Err(RuleViolation::Validation(fields));
        }

        let optional = |v: Option<String>| {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };

        Ok(Self {
            order_number: self.order_number.trim().to_string(),
            consignee: self.consignee.trim().to_string(),
            transport_type: self.transport_type.trim().to_string(),
            origin_country: self.origin_country.trim().to_string(),
            origin_port: optional(self.origin_port),
            destination_city: optional(self.destination_city),
            carrier_name: optional(self.carrier_name),
            notify: self.notify,
        })
    }
}

/// `POST /ff-assignments/`
#[derive(Debug, Clone, Deserialize)]
pub struct AssignRequest {
    pub ro_id: Uuid,
    pub ff_user_id: Uuid,
    #[serde(default = "default_true")]
    pub notify: bool,
    #[serde(default)]
    pub expected_version: Option<i32>,
}

/// `PUT /ff-assignments/`
#[derive(Debug, Clone, Deserialize)]
pub struct ReassignRequest {
    pub ro_id: Uuid,
    pub new_ff_user_id: Uuid,
    #[serde(default = "default_true")]
    pub notify: bool,
    #[serde(default)]
    pub expected_version: Option<i32>,
}

/// `POST /ff-assignments/auto`
#[derive(Debug, Clone, Deserialize)]
pub struct AutoAssignRequest {
    pub ro_id: Uuid,
    #[serde(default = "default_true")]
    pub notify: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_state_requires_both_columns() {
        let now = Utc::now();
        let ff = Uuid::new_v4();

        assert_eq!(AssignmentState::from_columns(None, None), AssignmentState::Unassigned);
        assert_eq!(AssignmentState::from_columns(Some(ff), None), AssignmentState::Unassigned);
        assert_eq!(
            AssignmentState::from_columns(Some(ff), Some(now)).ff_id(),
            Some(ff)
        );
    }

    #[test]
    fn assignment_state_serializes_with_tag() {
        let json = serde_json::to_value(AssignmentState::Unassigned).unwrap();
        assert_eq!(json["state"], "unassigned");
    }

    #[test]
    fn reassign_request_notifies_by_default() {
        let req: ReassignRequest = serde_json::from_value(serde_json::json!({
            "ro_id": Uuid::nil(),
            "new_ff_user_id": Uuid::nil(),
        }))
        .unwrap();
        assert!(req.notify);
        assert!(req.expected_version.is_none());
    }

    #[test]
    fn create_request_requires_core_fields() {
        let req: CreateRoutingOrderRequest = serde_json::from_value(serde_json::json!({
            "order_number": "RO-100",
            "consignee": " ",
            "transport_type": "maritimo",
            "origin_country": "",
            "origin_port": "",
        }))
        .unwrap();

        match req.normalized() {
            Err(RuleViolation::Validation(fields)) => {
                let names: Vec<_> = fields.iter().map(|f| f.field.as_str()).collect();
                assert_eq!(names, ["consignee", "origin_country"]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn create_request_drops_blank_optional_fields() {
        let req: CreateRoutingOrderRequest = serde_json::from_value(serde_json::json!({
            "order_number": " RO-100 ",
            "consignee": "Importadora Andina",
            "transport_type": "maritimo",
            "origin_country": "China",
            "origin_port": " Shanghai ",
            "carrier_name": "  ",
        }))
        .unwrap();

        let req = req.normalized().unwrap();
        assert_eq!(req.order_number, "RO-100");
        assert_eq!(req.origin_port.as_deref(), Some("Shanghai"));
        assert!(req.carrier_name.is_none());
        assert!(req.notify);
    }
}
