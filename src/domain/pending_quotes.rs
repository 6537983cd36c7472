//! Quotes awaiting forwarder-supplied costs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ff_config::RouteDescriptor;
use crate::error::{FieldError, RuleViolation};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PendingQuoteStatus {
    AwaitingCosts,
    CostsReceived,
}

impl PendingQuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingCosts => "awaiting_costs",
            Self::CostsReceived => "costs_received",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "costs_received" => Self::CostsReceived,
            _ => Self::AwaitingCosts,
        }
    }
}

/// Cost record attached to a pending quote; replaced wholesale on resubmission
#[derive(Debug, Clone, Serialize)]
pub struct CostSubmission {
    pub ff_id: Option<Uuid>,
    pub submitted_by: Uuid,
    pub origin_costs_usd: Decimal,
    pub freight_cost_usd: Decimal,
    pub destination_costs_usd: Decimal,
    pub carrier_name: Option<String>,
    pub transit_time: Option<String>,
    pub profit_margin_percent: Decimal,
    pub subtotal_usd: Decimal,
    pub total_with_margin_usd: Decimal,
    pub ff_reference: Option<String>,
    pub notes: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingFfQuote {
    pub id: Uuid,
    pub submission_ref: String,
    pub cbm: Option<Decimal>,
    pub weight_kg: Option<Decimal>,
    pub fob_value_usd: Option<Decimal>,
    pub commodity: Option<String>,
    pub incoterm: String,
    pub transport_type: String,
    pub origin_country: String,
    pub origin_port: Option<String>,
    pub destination_city: Option<String>,
    pub status: PendingQuoteStatus,
    pub notified_ff_id: Option<Uuid>,
    pub notified_at: Option<DateTime<Utc>>,
    pub cost: Option<CostSubmission>,
    pub created_at: DateTime<Utc>,
}

impl PendingFfQuote {
    pub fn route(&self) -> RouteDescriptor {
        RouteDescriptor {
            transport_type: self.transport_type.clone(),
            origin_country: self.origin_country.clone(),
            origin_port: self.origin_port.clone(),
            destination_city: self.destination_city.clone(),
            carrier_name: None,
        }
    }
}

/// `POST /pending-ff-quotes/` from the quote subsystem
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePendingQuoteRequest {
    pub submission_ref: String,
    #[serde(default)]
    pub cbm: Option<Decimal>,
    #[serde(default)]
    pub weight_kg: Option<Decimal>,
    #[serde(default)]
    pub fob_value_usd: Option<Decimal>,
    #[serde(default)]
    pub commodity: Option<String>,
    pub incoterm: String,
    pub transport_type: String,
    pub origin_country: String,
    #[serde(default)]
    pub origin_port: Option<String>,
    #[serde(default)]
    pub destination_city: Option<String>,
}

impl CreatePendingQuoteRequest {
    /// Trimmed copy; FOB shipments are priced without a forwarder and are rejected
    pub fn normalized(self) -> Result<Self, RuleViolation> {
        let mut fields = Vec::new();

        let submission_ref = self.submission_ref.trim().to_string();
        if submission_ref.is_empty() {
            fields.push(FieldError::new("submission_ref", "is required"));
        }
        let incoterm = self.incoterm.trim().to_uppercase();
        if incoterm.is_empty() {
            fields.push(FieldError::new("incoterm", "is required"));
        } else if incoterm == "FOB" {
            fields.push(FieldError::new(
                "incoterm",
                "FOB quotes do not need forwarder pricing",
            ));
        }
        let transport_type = self.transport_type.trim().to_string();
        if transport_type.is_empty() {
            fields.push(FieldError::new("transport_type", "is required"));
        }
        let origin_country = self.origin_country.trim().to_string();
        if origin_country.is_empty() {
            fields.push(FieldError::new("origin_country", "is required"));
        }
        // Column limits: NUMERIC(12, 3) for measures, NUMERIC(14, 2) for money
        let measure_limit = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);
        let money_limit = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);
        for (name, value, limit) in [
            ("cbm", self.cbm, measure_limit),
            ("weight_kg", self.weight_kg, measure_limit),
            ("fob_value_usd", self.fob_value_usd, money_limit),
        ] {
            match value {
                Some(v) if v < Decimal::ZERO => {
                    fields.push(FieldError::new(name, "must not be negative"))
                }
                Some(v) if v >= limit => {
                    fields.push(FieldError::new(name, format!("must be less than {limit}")))
                }
                _ => {}
            }
        }

        if !fields.is_empty() {
            return Err(RuleViolation::Validation(fields));
        }

        let optional = |v: Option<String>| {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };

        Ok(Self {
            submission_ref,
            incoterm,
            transport_type,
            origin_country,
            commodity: optional(self.commodity),
            origin_port: optional(self.origin_port),
            destination_city: optional(self.destination_city),
            ..self
        })
    }
}

/// `POST /pending-ff-quotes/{id}/upload-costs/`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadCostsRequest {
    #[serde(default)]
    pub origin_costs_usd: Option<Decimal>,
    #[serde(default)]
    pub freight_cost_usd: Option<Decimal>,
    #[serde(default)]
    pub carrier_name: Option<String>,
    #[serde(default)]
    pub transit_time: Option<String>,
    #[serde(default)]
    pub destination_costs_usd: Option<Decimal>,
    #[serde(default)]
    pub profit_margin_percent: Option<Decimal>,
    #[serde(default)]
    pub ff_reference: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_request_accepts_numbers_and_strings() {
        let req: UploadCostsRequest = serde_json::from_value(serde_json::json!({
            "origin_costs_usd": 100,
            "freight_cost_usd": "2000.00",
            "destination_costs_usd": 150.5,
        }))
        .unwrap();

        assert_eq!(req.origin_costs_usd, Some(Decimal::from(100)));
        assert_eq!(req.freight_cost_usd, Some(Decimal::new(200000, 2)));
        assert_eq!(req.destination_costs_usd, Some(Decimal::new(1505, 1)));
        assert!(req.profit_margin_percent.is_none());
    }

    #[test]
    fn unknown_status_text_reads_as_awaiting_costs() {
        assert_eq!(PendingQuoteStatus::parse("costs_received"), PendingQuoteStatus::CostsReceived);
        assert_eq!(PendingQuoteStatus::parse("draft"), PendingQuoteStatus::AwaitingCosts);
    }

    fn intake(incoterm: &str) -> CreatePendingQuoteRequest {
        serde_json::from_value(serde_json::json!({
            "submission_ref": "Q-2024-0042",
            "cbm": 12.5,
            "incoterm": incoterm,
            "transport_type": "maritimo",
            "origin_country": "China",
            "origin_port": " Ningbo ",
        }))
        .unwrap()
    }

    #[test]
    fn fob_intake_is_rejected_in_any_case() {
        for incoterm in ["FOB", "fob", " Fob "] {
            match intake(incoterm).normalized() {
                Err(RuleViolation::Validation(fields)) => assert_eq!(fields[0].field, "incoterm"),
                other => panic!("expected FOB rejection, got {:?}", other),
            }
        }
    }

    #[test]
    fn non_fob_intake_is_normalized() {
        let req = intake(" exw ").normalized().unwrap();
        assert_eq!(req.incoterm, "EXW");
        assert_eq!(req.origin_port.as_deref(), Some("Ningbo"));
        assert_eq!(req.cbm, Some(Decimal::new(125, 1)));
    }

    #[test]
    fn intake_measures_must_fit_their_columns() {
        let mut req = intake("CIF");
        req.cbm = Some(Decimal::from(1_000_000_000u64));
        req.fob_value_usd = Some(Decimal::from(1_000_000_000_000u64));
        match req.normalized().unwrap_err() {
            RuleViolation::Validation(fields) => {
                let names: Vec<_> = fields.iter().map(|f| f.field.as_str()).collect();
                assert_eq!(names, ["cbm", "fob_value_usd"]);
                assert_eq!(fields[1].message, "must be less than 1000000000000");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
