//! Pending forwarder quote routes
//!
//! Non-FOB quotes wait here for a forwarder's cost breakdown. The forwarder
//! notified for a quote (or an admin on their behalf) uploads costs; a new
//! upload replaces the previous one.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{Created, Success};
use crate::app::AppState;
use crate::auth::{admin::is_admin, RequireAdmin, RequireAuth};
use crate::domain::admin::{AdminAction, AuditTargetType};
use crate::domain::notifications::NotificationRequest;
use crate::domain::pending_quotes::*;
use crate::error::{ApiError, ApiResult, RuleViolation};
use crate::services::assignment::{self, AssignmentContext};
use crate::services::{pricing, store};

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct PendingQuoteRow {
    id: Uuid,
    submission_ref: String,
    cbm: Option<Decimal>,
    weight_kg: Option<Decimal>,
    fob_value_usd: Option<Decimal>,
    commodity: Option<String>,
    incoterm: String,
    transport_type: String,
    origin_country: String,
    origin_port: Option<String>,
    destination_city: Option<String>,
    status: String,
    notified_ff_id: Option<Uuid>,
    notified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    // ff_cost_submissions, all NULL until costs arrive
    cost_ff_id: Option<Uuid>,
    submitted_by: Option<Uuid>,
    origin_costs_usd: Option<Decimal>,
    freight_cost_usd: Option<Decimal>,
    destination_costs_usd: Option<Decimal>,
    carrier_name: Option<String>,
    transit_time: Option<String>,
    profit_margin_percent: Option<Decimal>,
    subtotal_usd: Option<Decimal>,
    total_with_margin_usd: Option<Decimal>,
    ff_reference: Option<String>,
    notes: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
}

impl From<PendingQuoteRow> for PendingFfQuote {
    fn from(row: PendingQuoteRow) -> Self {
        let cost = match (
            row.submitted_by,
            row.origin_costs_usd,
            row.freight_cost_usd,
            row.destination_costs_usd,
            row.profit_margin_percent,
            row.subtotal_usd,
            row.total_with_margin_usd,
            row.submitted_at,
        ) {
            (
                Some(submitted_by),
                Some(origin_costs_usd),
                Some(freight_cost_usd),
                Some(destination_costs_usd),
                Some(profit_margin_percent),
                Some(subtotal_usd),
                Some(total_with_margin_usd),
                Some(submitted_at),
            ) => Some(CostSubmission {
                ff_id: row.cost_ff_id,
                submitted_by,
                origin_costs_usd,
                freight_cost_usd,
                destination_costs_usd,
                carrier_name: row.carrier_name,
                transit_time: row.transit_time,
                profit_margin_percent,
                subtotal_usd,
                total_with_margin_usd,
                ff_reference: row.ff_reference,
                notes: row.notes,
                submitted_at,
            }),
            _ => None,
        };

        Self {
            id: row.id,
            submission_ref: row.submission_ref,
            cbm: row.cbm,
            weight_kg: row.weight_kg,
            fob_value_usd: row.fob_value_usd,
            commodity: row.commodity,
            incoterm: row.incoterm,
            transport_type: row.transport_type,
            origin_country: row.origin_country,
            origin_port: row.origin_port,
            destination_city: row.destination_city,
            status: PendingQuoteStatus::parse(&row.status),
            notified_ff_id: row.notified_ff_id,
            notified_at: row.notified_at,
            cost,
            created_at: row.created_at,
        }
    }
}

const QUOTE_SELECT: &str = r#"
    SELECT q.id, q.submission_ref, q.cbm, q.weight_kg, q.fob_value_usd, q.commodity,
           q.incoterm, q.transport_type, q.origin_country, q.origin_port, q.destination_city,
           q.status, q.notified_ff_id, q.notified_at, q.created_at,
           c.ff_id AS cost_ff_id, c.submitted_by, c.origin_costs_usd, c.freight_cost_usd,
           c.destination_costs_usd, c.carrier_name, c.transit_time, c.profit_margin_percent,
           c.subtotal_usd, c.total_with_margin_usd, c.ff_reference, c.notes, c.submitted_at
    FROM pending_ff_quotes q
    LEFT JOIN ff_cost_submissions c ON c.quote_id = q.id
"#;

async fn lock_quote(conn: &mut sqlx::PgConnection, quote_id: Uuid) -> ApiResult<PendingFfQuote> {
    sqlx::query_as::<_, PendingQuoteRow>(&format!("{QUOTE_SELECT} WHERE q.id = $1 FOR UPDATE OF q"))
        .bind(quote_id)
        .fetch_optional(conn)
        .await?
        .map(Into::into)
        .ok_or_else(|| ApiError::not_found("Pending quote not found"))
}

/// Resolve the forwarder to ask for costs under the current configuration
async fn choose_forwarder(
    conn: &mut sqlx::PgConnection,
    quote: &PendingFfQuote,
) -> ApiResult<Option<Uuid>> {
    let config = store::load_global_config(&mut *conn).await?;
    let rules = store::load_active_rules(&mut *conn).await?;
    let active = store::active_forwarder_ids(&mut *conn).await?;

    let ctx = AssignmentContext {
        config: &config,
        rules: &rules,
        active_forwarders: &active,
    };
    Ok(assignment::quote_forwarder(ctx, &quote.route(), quote.notified_ff_id)?)
}

async fn mark_notified(
    conn: &mut sqlx::PgConnection,
    quote: &mut PendingFfQuote,
    ff_id: Uuid,
) -> ApiResult<()> {
    let now = Utc::now();
    sqlx::query(
        "UPDATE pending_ff_quotes SET notified_ff_id = $2, notified_at = $3, updated_at = $3 WHERE id = $1",
    )
    .bind(quote.id)
    .bind(ff_id)
    .bind(now)
    .execute(conn)
    .await?;

    quote.notified_ff_id = Some(ff_id);
    quote.notified_at = Some(now);
    Ok(())
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PendingQuoteList {
    pub quotes: Vec<PendingFfQuote>,
}

#[derive(Debug, Serialize)]
pub struct PendingQuoteBody {
    pub quote: PendingFfQuote,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /admin/pending-ff-quotes/
pub async fn list_pending_quotes(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
) -> ApiResult<Success<PendingQuoteList>> {
    let rows = sqlx::query_as::<_, PendingQuoteRow>(&format!(
        "{QUOTE_SELECT} ORDER BY q.created_at DESC, q.id"
    ))
    .fetch_all(&state.db)
    .await?;

    Ok(Success::new(PendingQuoteList {
        quotes: rows.into_iter().map(Into::into).collect(),
    }))
}

/// POST /pending-ff-quotes/
///
/// Registers a quote that needs forwarder pricing and asks the responsible
/// forwarder for costs. Failing to find one is reported, not fatal.
pub async fn register_pending_quote(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Json(req): Json<CreatePendingQuoteRequest>,
) -> ApiResult<Created<Success<PendingQuoteBody>>> {
    let req = req.normalized()?;
    let now = Utc::now();
    let quote_id = Uuid::new_v4();

    let mut tx = state.db.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO pending_ff_quotes
            (id, submission_ref, cbm, weight_kg, fob_value_usd, commodity, incoterm,
             transport_type, origin_country, origin_port, destination_city, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
        "#,
    )
    .bind(quote_id)
    .bind(&req.submission_ref)
    .bind(req.cbm)
    .bind(req.weight_kg)
    .bind(req.fob_value_usd)
    .bind(&req.commodity)
    .bind(&req.incoterm)
    .bind(&req.transport_type)
    .bind(&req.origin_country)
    .bind(&req.origin_port)
    .bind(&req.destination_city)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let mut quote = lock_quote(&mut tx, quote_id).await?;
    let mut warnings = Vec::new();

    let forwarder = match choose_forwarder(&mut tx, &quote).await {
        Ok(Some(ff_id)) => Some(ff_id),
        Ok(None) => {
            warnings.push("assignment mode is manual; no forwarder was notified".to_string());
            None
        }
        Err(ApiError::Rule(
            rule @ (RuleViolation::NoRouteMatch(_) | RuleViolation::Configuration(_)),
        )) => {
            warnings.push(format!("no forwarder was notified: {}", rule));
            None
        }
        Err(e) => return Err(e),
    };

    if let Some(ff_id) = forwarder {
        mark_notified(&mut tx, &mut quote, ff_id).await?;
    }

    store::log_admin_action(
        &mut tx,
        admin.user_id(),
        AdminAction::RegisterPendingQuote,
        AuditTargetType::PendingQuote,
        Some(quote.id.to_string()),
        serde_json::json!({
            "submission_ref": quote.submission_ref,
            "incoterm": quote.incoterm,
            "notified_ff_id": forwarder,
        }),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        quote_id = %quote.id,
        submission_ref = %quote.submission_ref,
        notified_ff_id = ?forwarder,
        "Pending forwarder quote registered"
    );

    if let Some(ff_id) = forwarder {
        let request =
            NotificationRequest::quote_costs_requested(ff_id, quote.id, &quote.submission_ref);
        warnings.extend(state.notifier.dispatch_all(&state.db, &[request]).await);
    }

    Ok(Created(
        Success::new(PendingQuoteBody { quote })
            .with_message("Pending quote registered")
            .with_warnings(warnings),
    ))
}

/// POST /pending-ff-quotes/:id/upload-costs/
///
/// Open to admins and to the forwarder the quote was sent to.
pub async fn upload_costs(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Path(quote_id): Path<Uuid>,
    Json(req): Json<UploadCostsRequest>,
) -> ApiResult<Success<PendingQuoteBody>> {
    let uploader_is_admin = is_admin(&state.db, auth.user_id).await?;

    let mut tx = state.db.begin().await?;
    let mut quote = lock_quote(&mut tx, quote_id).await?;

    let is_notified_forwarder = quote.notified_ff_id == Some(auth.user_id);
    if !uploader_is_admin && !is_notified_forwarder {
        return Err(ApiError::forbidden(
            "Only the notified forwarder or an admin can upload costs for this quote",
        ));
    }

    let config = store::load_global_config(&mut tx).await?;
    let priced = pricing::price_costs(&req, config.default_margin_percent)?;

    let ff_id = if is_notified_forwarder {
        Some(auth.user_id)
    } else {
        quote.notified_ff_id
    };
    let submitted_at = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO ff_cost_submissions
            (quote_id, ff_id, submitted_by, origin_costs_usd, freight_cost_usd,
             destination_costs_usd, carrier_name, transit_time, profit_margin_percent,
             subtotal_usd, total_with_margin_usd, ff_reference, notes, submitted_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (quote_id) DO UPDATE SET
            ff_id = EXCLUDED.ff_id,
            submitted_by = EXCLUDED.submitted_by,
            origin_costs_usd = EXCLUDED.origin_costs_usd,
            freight_cost_usd = EXCLUDED.freight_cost_usd,
            destination_costs_usd = EXCLUDED.destination_costs_usd,
            carrier_name = EXCLUDED.carrier_name,
            transit_time = EXCLUDED.transit_time,
            profit_margin_percent = EXCLUDED.profit_margin_percent,
            subtotal_usd = EXCLUDED.subtotal_usd,
            total_with_margin_usd = EXCLUDED.total_with_margin_usd,
            ff_reference = EXCLUDED.ff_reference,
            notes = EXCLUDED.notes,
            submitted_at = EXCLUDED.submitted_at
        "#,
    )
    .bind(quote.id)
    .bind(ff_id)
    .bind(auth.user_id)
    .bind(priced.origin_costs_usd)
    .bind(priced.freight_cost_usd)
    .bind(priced.destination_costs_usd)
    .bind(&req.carrier_name)
    .bind(&req.transit_time)
    .bind(priced.profit_margin_percent)
    .bind(priced.subtotal_usd)
    .bind(priced.total_with_margin_usd)
    .bind(&req.ff_reference)
    .bind(&req.notes)
    .bind(submitted_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE pending_ff_quotes SET status = $2, updated_at = $3 WHERE id = $1")
        .bind(quote.id)
        .bind(PendingQuoteStatus::CostsReceived.as_str())
        .bind(submitted_at)
        .execute(&mut *tx)
        .await?;

    if uploader_is_admin {
        store::log_admin_action(
            &mut tx,
            auth.user_id,
            AdminAction::UploadCosts,
            AuditTargetType::PendingQuote,
            Some(quote.id.to_string()),
            serde_json::json!({
                "ff_id": ff_id,
                "replaced_previous": quote.cost.is_some(),
                "total_with_margin_usd": priced.total_with_margin_usd,
            }),
        )
        .await?;
    }

    tx.commit().await?;

    tracing::info!(
        quote_id = %quote.id,
        submitted_by = %auth.user_id,
        subtotal_usd = %priced.subtotal_usd,
        total_with_margin_usd = %priced.total_with_margin_usd,
        replaced_previous = quote.cost.is_some(),
        "Forwarder costs recorded"
    );

    let mut warnings = Vec::new();
    if let Err(warning) = state
        .quote_generator
        .request_generation(quote.id, &quote.submission_ref, &priced)
        .await
    {
        warnings.push(warning);
    }

    quote.status = PendingQuoteStatus::CostsReceived;
    quote.cost = Some(CostSubmission {
        ff_id,
        submitted_by: auth.user_id,
        origin_costs_usd: priced.origin_costs_usd,
        freight_cost_usd: priced.freight_cost_usd,
        destination_costs_usd: priced.destination_costs_usd,
        carrier_name: req.carrier_name,
        transit_time: req.transit_time,
        profit_margin_percent: priced.profit_margin_percent,
        subtotal_usd: priced.subtotal_usd,
        total_with_margin_usd: priced.total_with_margin_usd,
        ff_reference: req.ff_reference,
        notes: req.notes,
        submitted_at,
    });

    Ok(Success::new(PendingQuoteBody { quote })
        .with_message("Costs uploaded")
        .with_warnings(warnings))
}

/// POST /pending-ff-quotes/:id/resend-notification/
pub async fn resend_notification(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(quote_id): Path<Uuid>,
) -> ApiResult<Success<PendingQuoteBody>> {
    let mut tx = state.db.begin().await?;
    let mut quote = lock_quote(&mut tx, quote_id).await?;

    if quote.status == PendingQuoteStatus::CostsReceived {
        return Err(RuleViolation::InvalidState(format!(
            "costs for quote {} have already been received",
            quote.submission_ref
        ))
        .into());
    }

    let previous = quote.notified_ff_id;
    let ff_id = choose_forwarder(&mut tx, &quote).await?.ok_or_else(|| {
        RuleViolation::Configuration(
            "assignment mode is manual and no active forwarder was notified before".to_string(),
        )
    })?;

    mark_notified(&mut tx, &mut quote, ff_id).await?;

    store::log_admin_action(
        &mut tx,
        admin.user_id(),
        AdminAction::ResendQuoteNotification,
        AuditTargetType::PendingQuote,
        Some(quote.id.to_string()),
        serde_json::json!({ "previous_ff_id": previous, "notified_ff_id": ff_id }),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        quote_id = %quote.id,
        previous_ff_id = ?previous,
        notified_ff_id = %ff_id,
        "Quote cost request re-sent"
    );

    let request = NotificationRequest::quote_costs_requested(ff_id, quote.id, &quote.submission_ref);
    let warnings = state.notifier.dispatch_all(&state.db, &[request]).await;

    Ok(Success::new(PendingQuoteBody { quote })
        .with_message("Notification re-sent")
        .with_warnings(warnings))
}
