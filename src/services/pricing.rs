//! Cost ingestion and margin calculation
//!
//! `subtotal = origin + freight + destination`,
//! `total = subtotal * (1 + margin / 100)`, both rounded half-up to cents.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::domain::pending_quotes::UploadCostsRequest;
use crate::error::{FieldError, RuleViolation};

/// Margin applied when neither the submission nor the global config sets one
pub const FALLBACK_MARGIN_PERCENT: Decimal = Decimal::from_parts(15, 0, 0, false, 0);

const MAX_MARGIN_PERCENT: Decimal = Decimal::from_parts(1000, 0, 0, false, 0);

/// Amounts are stored as NUMERIC(14, 2); anything at or above this does not fit
pub const MAX_AMOUNT_USD: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// Validated and priced cost breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricedCosts {
    pub origin_costs_usd: Decimal,
    pub freight_cost_usd: Decimal,
    pub destination_costs_usd: Decimal,
    pub profit_margin_percent: Decimal,
    pub subtotal_usd: Decimal,
    pub total_with_margin_usd: Decimal,
}

pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a margin to the stored precision and check its range
pub fn validate_margin(field: &str, margin: Decimal) -> Result<Decimal, FieldError> {
    let margin = round_currency(margin);
    if margin < Decimal::ZERO {
        Err(FieldError::new(field, "must not be negative"))
    } else if margin > MAX_MARGIN_PERCENT {
        Err(FieldError::new(field, "must not exceed 1000"))
    } else {
        Ok(margin)
    }
}

fn check_amount(field: &str, value: Decimal) -> Result<Decimal, FieldError> {
    let value = round_currency(value);
    if value < Decimal::ZERO {
        Err(FieldError::new(field, "must not be negative"))
    } else if value >= MAX_AMOUNT_USD {
        Err(FieldError::new(field, "must be less than 1000000000000"))
    } else {
        Ok(value)
    }
}

/// Validate an upload and derive the client-facing total.
///
/// Amounts and margin are rounded to cents before anything is checked or
/// summed, so the stored line items always add up to the stored subtotal.
/// Nothing is partially accepted: any invalid field rejects the whole upload.
pub fn price_costs(
    req: &UploadCostsRequest,
    default_margin: Option<Decimal>,
) -> Result<PricedCosts, RuleViolation> {
    let mut fields = Vec::new();
    let mut amount = |name: &str, value: Decimal| match check_amount(name, value) {
        Ok(v) => v,
        Err(e) => {
            fields.push(e);
            Decimal::ZERO
        }
    };

    let freight = match req.freight_cost_usd {
        None => None,
        Some(v) => Some(amount("freight_cost_usd", v)),
    };
    let origin = amount("origin_costs_usd", req.origin_costs_usd.unwrap_or_default());
    let destination = amount(
        "destination_costs_usd",
        req.destination_costs_usd.unwrap_or_default(),
    );

    match freight {
        None => fields.push(FieldError::new("freight_cost_usd", "is required")),
        Some(v) if v <= Decimal::ZERO && !fields.iter().any(|f| f.field == "freight_cost_usd") => {
            fields.push(FieldError::new("freight_cost_usd", "must be greater than zero"))
        }
        Some(_) => {}
    }
    let freight = freight.unwrap_or_default();

    let margin = match validate_margin(
        "profit_margin_percent",
        req.profit_margin_percent
            .or(default_margin)
            .unwrap_or(FALLBACK_MARGIN_PERCENT),
    ) {
        Ok(m) => m,
        Err(e) => {
            fields.push(e);
            Decimal::ZERO
        }
    };

    if !fields.is_empty() {
        return Err(RuleViolation::Validation(fields));
    }

    let subtotal = origin
        .checked_add(freight)
        .and_then(|s| s.checked_add(destination))
        .filter(|s| *s < MAX_AMOUNT_USD)
        .ok_or_else(|| RuleViolation::validation("subtotal_usd", "is too large"))?;

    let total = (margin / Decimal::ONE_HUNDRED)
        .checked_add(Decimal::ONE)
        .and_then(|factor| subtotal.checked_mul(factor))
        .map(round_currency)
        .filter(|t| *t < MAX_AMOUNT_USD)
        .ok_or_else(|| RuleViolation::validation("total_with_margin_usd", "is too large"))?;

    Ok(PricedCosts {
        origin_costs_usd: origin,
        freight_cost_usd: freight,
        destination_costs_usd: destination,
        profit_margin_percent: margin,
        subtotal_usd: subtotal,
        total_with_margin_usd: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn upload(origin: &str, freight: &str, destination: &str, margin: Option<&str>) -> UploadCostsRequest {
        UploadCostsRequest {
            origin_costs_usd: Some(dec(origin)),
            freight_cost_usd: Some(dec(freight)),
            destination_costs_usd: Some(dec(destination)),
            profit_margin_percent: margin.map(dec),
            ..Default::default()
        }
    }

    #[test]
    fn fifteen_percent_margin_example() {
        let priced = price_costs(&upload("100", "2000", "150", Some("15")), None).unwrap();
        assert_eq!(priced.subtotal_usd, dec("2250.00"));
        assert_eq!(priced.total_with_margin_usd, dec("2587.50"));
    }

    #[test]
    fn zero_margin_total_equals_subtotal() {
        let priced = price_costs(&upload("12.34", "1000.01", "0.65", Some("0")), None).unwrap();
        assert_eq!(priced.subtotal_usd, dec("1013.00"));
        assert_eq!(priced.total_with_margin_usd, priced.subtotal_usd);
    }

    #[test]
    fn rounding_is_half_up_to_cents() {
        // 100.05 * 1.05 = 105.0525 -> 105.05
        let priced = price_costs(&upload("0", "100.05", "0", Some("5")), None).unwrap();
        assert_eq!(priced.total_with_margin_usd, dec("105.05"));

        // 10.10 * 1.125 = 11.3625 -> 11.36 ; 10.30 * 1.125 = 11.5875 -> 11.59
        let priced = price_costs(&upload("0", "10.10", "0", Some("12.5")), None).unwrap();
        assert_eq!(priced.total_with_margin_usd, dec("11.36"));
        let priced = price_costs(&upload("0", "10.30", "0", Some("12.5")), None).unwrap();
        assert_eq!(priced.total_with_margin_usd, dec("11.59"));

        // exact midpoint: 0.01 * 1.5 = 0.015 -> 0.02
        let priced = price_costs(&upload("0", "0.01", "0", Some("50")), None).unwrap();
        assert_eq!(priced.total_with_margin_usd, dec("0.02"));
    }

    #[test]
    fn margin_falls_back_to_config_then_fifteen() {
        let req = upload("100", "2000", "150", None);

        let priced = price_costs(&req, Some(dec("10"))).unwrap();
        assert_eq!(priced.profit_margin_percent, dec("10"));
        assert_eq!(priced.total_with_margin_usd, dec("2475.00"));

        let priced = price_costs(&req, None).unwrap();
        assert_eq!(priced.profit_margin_percent, FALLBACK_MARGIN_PERCENT);
        assert_eq!(priced.total_with_margin_usd, dec("2587.50"));
    }

    #[test]
    fn missing_optional_costs_count_as_zero() {
        let req = UploadCostsRequest {
            freight_cost_usd: Some(dec("500")),
            profit_margin_percent: Some(dec("0")),
            ..Default::default()
        };
        let priced = price_costs(&req, None).unwrap();
        assert_eq!(priced.subtotal_usd, dec("500"));
    }

    #[test]
    fn freight_must_be_present_and_positive() {
        let missing = UploadCostsRequest::default();
        match price_costs(&missing, None).unwrap_err() {
            RuleViolation::Validation(fields) => {
                assert_eq!(fields[0].field, "freight_cost_usd");
                assert_eq!(fields[0].message, "is required");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let zero = upload("100", "0", "150", None);
        assert!(matches!(
            price_costs(&zero, None),
            Err(RuleViolation::Validation(_))
        ));
    }

    #[test]
    fn negative_amounts_are_rejected_together() {
        let req = upload("-1", "-5", "-2", Some("-3"));
        match price_costs(&req, None).unwrap_err() {
            RuleViolation::Validation(fields) => assert_eq!(fields.len(), 4),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn sub_cent_freight_rounds_to_zero_and_is_rejected() {
        match price_costs(&upload("0.004", "0.004", "0.004", Some("0")), None).unwrap_err() {
            RuleViolation::Validation(fields) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].field, "freight_cost_usd");
                assert_eq!(fields[0].message, "must be greater than zero");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn stored_line_items_add_up_to_subtotal() {
        let priced = price_costs(&upload("0.005", "10.004", "0.005", Some("0")), None).unwrap();
        assert_eq!(priced.origin_costs_usd, dec("0.01"));
        assert_eq!(priced.freight_cost_usd, dec("10.00"));
        assert_eq!(priced.destination_costs_usd, dec("0.01"));
        assert_eq!(
            priced.subtotal_usd,
            priced.origin_costs_usd + priced.freight_cost_usd + priced.destination_costs_usd
        );
    }

    #[test]
    fn total_is_derived_from_the_stored_margin() {
        let priced = price_costs(&upload("0", "1000", "0", Some("12.345")), None).unwrap();
        assert_eq!(priced.profit_margin_percent, dec("12.35"));
        assert_eq!(priced.total_with_margin_usd, dec("1123.50"));
        assert_eq!(
            priced.total_with_margin_usd,
            round_currency(
                priced.subtotal_usd * (Decimal::ONE + priced.profit_margin_percent / Decimal::ONE_HUNDRED)
            )
        );
    }

    #[test]
    fn amounts_must_fit_the_stored_column() {
        assert_eq!(MAX_AMOUNT_USD, dec("1000000000000"));

        match price_costs(&upload("0", "1000000000000", "0", None), None).unwrap_err() {
            RuleViolation::Validation(fields) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].field, "freight_cost_usd");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let max = "79228162514264337593543950335";
        match price_costs(&upload(max, max, "0", None), None).unwrap_err() {
            RuleViolation::Validation(fields) => assert_eq!(fields.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn sum_or_total_past_the_column_limit_is_a_validation_error() {
        let req = upload("600000000000", "600000000000", "0", Some("0"));
        match price_costs(&req, None).unwrap_err() {
            RuleViolation::Validation(fields) => assert_eq!(fields[0].field, "subtotal_usd"),
            other => panic!("unexpected error: {other:?}"),
        }

        let req = upload("0", "600000000000", "0", Some("100"));
        match price_costs(&req, None).unwrap_err() {
            RuleViolation::Validation(fields) => {
                assert_eq!(fields[0].field, "total_with_margin_usd")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn margin_is_rounded_before_range_check() {
        assert_eq!(validate_margin("m", dec("7.125")).unwrap(), dec("7.13"));
        assert_eq!(validate_margin("m", dec("1000.004")).unwrap(), dec("1000.00"));
        assert!(validate_margin("m", dec("1000.005")).is_err());
    }
}
