//! Forwarder assignment configuration
//!
//! The global assignment mode, route assignment rules and the route
//! descriptor they are matched against.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::forwarders::ForwarderSummary;
use crate::error::{FieldError, RuleViolation};

/// How the assignment engine picks a forwarder
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMode {
    /// Every routing order goes to the configured default forwarder
    Single,
    /// Route assignment rules decide per shipment
    Multi,
    /// Nothing is assigned automatically
    Manual,
}

impl AssignmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multi => "multi",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single" => Some(Self::Single),
            "multi" => Some(Self::Multi),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for AssignmentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Singleton assignment configuration, loaded fresh for every operation
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GlobalAssignmentConfig {
    pub assignment_mode: AssignmentMode,
    pub default_ff_id: Option<Uuid>,
    pub auto_assign_on_ro: bool,
    pub default_margin_percent: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

/// A route assignment rule used in `multi` mode
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RouteAssignmentRule {
    pub id: i64,
    pub ff_id: Uuid,
    pub transport_type: String,
    pub origin_country: String,
    pub origin_port: Option<String>,
    pub destination_city: Option<String>,
    pub carrier_name: Option<String>,
    /// Lower value wins among equally specific rules
    pub priority: i32,
    pub is_active: bool,
}

/// Shipment attributes the route matcher looks at
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteDescriptor {
    pub transport_type: String,
    pub origin_country: String,
    #[serde(default)]
    pub origin_port: Option<String>,
    #[serde(default)]
    pub destination_city: Option<String>,
    #[serde(default)]
    pub carrier_name: Option<String>,
}

impl std::fmt::Display for RouteDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} from {}", self.transport_type, self.origin_country)?;
        if let Some(port) = &self.origin_port {
            write!(f, " ({})", port)?;
        }
        if let Some(city) = &self.destination_city {
            write!(f, " to {}", city)?;
        }
        if let Some(carrier) = &self.carrier_name {
            write!(f, " via {}", carrier)?;
        }
        Ok(())
    }
}

/// Route rule fields as sent by the admin dashboard
#[derive(Debug, Clone, Deserialize)]
pub struct RouteRuleInput {
    /// Present when updating an existing rule
    #[serde(default)]
    pub id: Option<i64>,
    pub ff_id: Uuid,
    pub transport_type: String,
    pub origin_country: String,
    #[serde(default)]
    pub origin_port: Option<String>,
    #[serde(default)]
    pub destination_city: Option<String>,
    #[serde(default)]
    pub carrier_name: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_priority() -> i32 {
    100
}

fn default_true() -> bool {
    true
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RouteRuleInput {
    /// Trim text fields, turn blank optional fields into wildcards and
    /// reject rules missing a required field.
    pub fn normalized(self) -> Result<Self, RuleViolation> {
        let mut fields = Vec::new();

        let transport_type = self.transport_type.trim().to_string();
        if transport_type.is_empty() {
            fields.push(FieldError::new("transport_type", "is required"));
        }
        let origin_country = self.origin_country.trim().to_string();
        if origin_country.is_empty() {
            fields.push(FieldError::new("origin_country", "is required"));
        }
        if self.priority < 0 {
            fields.push(FieldError::new("priority", "must not be negative"));
        }

        if !fields.is_empty() {
            return Err(RuleViolation::Validation(fields));
        }

        Ok(Self {
            transport_type,
            origin_country,
            origin_port: trimmed(self.origin_port),
            destination_city: trimmed(self.destination_city),
            carrier_name: trimmed(self.carrier_name),
            ..self
        })
    }
}

/// Body of `PUT /ff-config/` and `POST /ff-config/`.
///
/// Carries either the global mode fields or a `route_assignment`.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveFfConfigRequest {
    #[serde(default)]
    pub assignment_mode: Option<AssignmentMode>,
    /// `None` keeps the stored default, `Some(None)` clears it
    #[serde(default, deserialize_with = "present")]
    pub default_ff_id: Option<Option<Uuid>>,
    #[serde(default)]
    pub auto_assign_on_ro: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    pub default_margin_percent: Option<Option<Decimal>>,
    #[serde(default)]
    pub route_assignment: Option<RouteRuleInput>,
}

/// Distinguishes a field sent as `null` from one left out of the body
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRouteQuery {
    pub route_id: i64,
}

/// Response for `GET /ff-config/`
#[derive(Debug, Clone, Serialize)]
pub struct FfConfigResponse {
    pub global_config: GlobalAssignmentConfig,
    pub route_assignments: Vec<RouteAssignmentRule>,
    pub available_ffs: Vec<ForwarderSummary>,
}

/// Response for `POST /ff-config/resolve`
#[derive(Debug, Clone, Serialize)]
pub struct ResolvePreviewResponse {
    pub assignment_mode: AssignmentMode,
    pub ff_id: Option<Uuid>,
    pub rule_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_text() {
        for mode in [AssignmentMode::Single, AssignmentMode::Multi, AssignmentMode::Manual] {
            assert_eq!(AssignmentMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(AssignmentMode::parse("round_robin"), None);
    }

    #[test]
    fn config_request_tells_null_from_absent() {
        let id = Uuid::new_v4();

        let absent: SaveFfConfigRequest =
            serde_json::from_value(serde_json::json!({ "assignment_mode": "multi" })).unwrap();
        assert_eq!(absent.default_ff_id, None);
        assert_eq!(absent.default_margin_percent, None);

        let cleared: SaveFfConfigRequest = serde_json::from_value(serde_json::json!({
            "assignment_mode": "manual",
            "default_ff_id": null,
            "default_margin_percent": null,
        }))
        .unwrap();
        assert_eq!(cleared.default_ff_id, Some(None));
        assert_eq!(cleared.default_margin_percent, Some(None));

        let set: SaveFfConfigRequest =
            serde_json::from_value(serde_json::json!({ "default_ff_id": id })).unwrap();
        assert_eq!(set.default_ff_id, Some(Some(id)));
    }

    #[test]
    fn route_rule_input_defaults() {
        let input: RouteRuleInput = serde_json::from_value(serde_json::json!({
            "ff_id": Uuid::nil(),
            "transport_type": "maritimo",
            "origin_country": "China",
        }))
        .unwrap();

        assert_eq!(input.priority, 100);
        assert!(input.is_active);
        assert!(input.id.is_none());
        assert!(input.origin_port.is_none());
    }

    #[test]
    fn descriptor_display_lists_populated_fields() {
        let route = RouteDescriptor {
            transport_type: "maritimo".into(),
            origin_country: "China".into(),
            origin_port: Some("Shanghai".into()),
            destination_city: None,
            carrier_name: Some("COSCO".into()),
        };
        assert_eq!(route.to_string(), "maritimo from China (Shanghai) via COSCO");
    }

    #[test]
    fn normalized_rule_turns_blank_fields_into_wildcards() {
        let input: RouteRuleInput = serde_json::from_value(serde_json::json!({
            "ff_id": Uuid::nil(),
            "transport_type": " aereo ",
            "origin_country": "USA",
            "origin_port": "  ",
            "carrier_name": " LATAM ",
        }))
        .unwrap();

        let rule = input.normalized().unwrap();
        assert_eq!(rule.transport_type, "aereo");
        assert_eq!(rule.origin_port, None);
        assert_eq!(rule.carrier_name.as_deref(), Some("LATAM"));
    }

    #[test]
    fn normalized_rule_requires_transport_and_origin() {
        let input: RouteRuleInput = serde_json::from_value(serde_json::json!({
            "ff_id": Uuid::nil(),
            "transport_type": "",
            "origin_country": " ",
            "priority": -1,
        }))
        .unwrap();

        match input.normalized() {
            Err(RuleViolation::Validation(fields)) => {
                let names: Vec<_> = fields.iter().map(|f| f.field.as_str()).collect();
                assert_eq!(names, ["transport_type", "origin_country", "priority"]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
