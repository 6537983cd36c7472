//! Persistence helpers shared by the route handlers
//!
//! Everything here takes a `&mut PgConnection` so it can run inside the
//! caller's transaction.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use super::assignment::{self, AssignmentContext, AssignmentPlan};
use crate::domain::admin::{AdminAction, AuditTargetType};
use crate::domain::ff_config::{AssignmentMode, GlobalAssignmentConfig, RouteAssignmentRule};
use crate::domain::forwarders::{ForwarderAccount, ForwarderSummary};
use crate::domain::routing_orders::{AssignmentState, RoutingOrder};
use crate::error::{ApiError, RuleViolation};

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct GlobalConfigRow {
    assignment_mode: String,
    default_ff_id: Option<Uuid>,
    auto_assign_on_ro: bool,
    default_margin_percent: Option<Decimal>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<GlobalConfigRow> for GlobalAssignmentConfig {
    type Error = ApiError;

    fn try_from(row: GlobalConfigRow) -> Result<Self, Self::Error> {
        let assignment_mode = AssignmentMode::parse(&row.assignment_mode).ok_or_else(|| {
            ApiError::Internal(anyhow::anyhow!(
                "unknown assignment mode in storage: {}",
                row.assignment_mode
            ))
        })?;

        Ok(Self {
            assignment_mode,
            default_ff_id: row.default_ff_id,
            auto_assign_on_ro: row.auto_assign_on_ro,
            default_margin_percent: row.default_margin_percent,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RouteRuleRow {
    id: i64,
    ff_id: Uuid,
    transport_type: String,
    origin_country: String,
    origin_port: Option<String>,
    destination_city: Option<String>,
    carrier_name: Option<String>,
    priority: i32,
    is_active: bool,
}

impl From<RouteRuleRow> for RouteAssignmentRule {
    fn from(row: RouteRuleRow) -> Self {
        Self {
            id: row.id,
            ff_id: row.ff_id,
            transport_type: row.transport_type,
            origin_country: row.origin_country,
            origin_port: row.origin_port,
            destination_city: row.destination_city,
            carrier_name: row.carrier_name,
            priority: row.priority,
            is_active: row.is_active,
        }
    }
}

pub(crate) const RULE_COLUMNS: &str = "id, ff_id, transport_type, origin_country, origin_port, destination_city, carrier_name, priority, is_active";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RoutingOrderRow {
    id: Uuid,
    order_number: String,
    consignee: String,
    transport_type: String,
    origin_country: String,
    origin_port: Option<String>,
    destination_city: Option<String>,
    carrier_name: Option<String>,
    status: String,
    ff_id: Option<Uuid>,
    ff_assigned_at: Option<DateTime<Utc>>,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RoutingOrderRow> for RoutingOrder {
    fn from(row: RoutingOrderRow) -> Self {
        Self {
            id: row.id,
            order_number: row.order_number,
            consignee: row.consignee,
            transport_type: row.transport_type,
            origin_country: row.origin_country,
            origin_port: row.origin_port,
            destination_city: row.destination_city,
            carrier_name: row.carrier_name,
            status: row.status,
            assignment: AssignmentState::from_columns(row.ff_id, row.ff_assigned_at),
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub(crate) const RO_COLUMNS: &str = "id, order_number, consignee, transport_type, origin_country, origin_port, destination_city, carrier_name, status, ff_id, ff_assigned_at, version, created_at, updated_at";

// ============================================================================
// Configuration
// ============================================================================

/// Load the singleton assignment configuration
pub async fn load_global_config(conn: &mut PgConnection) -> Result<GlobalAssignmentConfig, ApiError> {
    let row = sqlx::query_as::<_, GlobalConfigRow>(
        r#"
        SELECT assignment_mode, default_ff_id, auto_assign_on_ro, default_margin_percent, updated_at
        FROM ff_global_config
        WHERE id = 1
        "#,
    )
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| {
        RuleViolation::Configuration("global assignment configuration has not been initialised".to_string())
    })?;

    row.try_into()
}

/// Active route rules, in id order
pub async fn load_active_rules(conn: &mut PgConnection) -> Result<Vec<RouteAssignmentRule>, ApiError> {
    let rows = sqlx::query_as::<_, RouteRuleRow>(&format!(
        "SELECT {RULE_COLUMNS} FROM ff_route_assignments WHERE is_active ORDER BY id"
    ))
    .fetch_all(conn)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// All route rules for the admin listing, most specific groups first
pub async fn load_all_rules(conn: &mut PgConnection) -> Result<Vec<RouteAssignmentRule>, ApiError> {
    let rows = sqlx::query_as::<_, RouteRuleRow>(&format!(
        "SELECT {RULE_COLUMNS} FROM ff_route_assignments ORDER BY transport_type, origin_country, priority, id"
    ))
    .fetch_all(conn)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

// ============================================================================
// Forwarders
// ============================================================================

pub async fn active_forwarder_ids(conn: &mut PgConnection) -> Result<HashSet<Uuid>, ApiError> {
    let ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM forwarder_accounts WHERE is_active")
        .fetch_all(conn)
        .await?;

    Ok(ids.into_iter().collect())
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ForwarderRow {
    id: Uuid,
    company_name: String,
    contact_email: String,
    is_verified: bool,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<ForwarderRow> for ForwarderAccount {
    fn from(row: ForwarderRow) -> Self {
        Self {
            id: row.id,
            company_name: row.company_name,
            contact_email: row.contact_email,
            is_verified: row.is_verified,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

pub(crate) const FORWARDER_COLUMNS: &str =
    "id, company_name, contact_email, is_verified, is_active, created_at";

#[derive(Debug, sqlx::FromRow)]
struct ForwarderSummaryRow {
    id: Uuid,
    company_name: String,
    contact_email: String,
    is_verified: bool,
    is_active: bool,
    assigned_ro_count: i64,
}

/// Forwarders with the number of routing orders each currently holds
pub async fn list_forwarders(
    conn: &mut PgConnection,
    active_only: bool,
) -> Result<Vec<ForwarderSummary>, ApiError> {
    let rows = sqlx::query_as::<_, ForwarderSummaryRow>(
        r#"
        SELECT f.id, f.company_name, f.contact_email, f.is_verified, f.is_active,
               COUNT(ro.id) AS assigned_ro_count
        FROM forwarder_accounts f
        LEFT JOIN routing_orders ro ON ro.ff_id = f.id
        WHERE f.is_active OR NOT $1
        GROUP BY f.id
        ORDER BY f.company_name, f.id
        "#,
    )
    .bind(active_only)
    .fetch_all(conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| ForwarderSummary {
            id: r.id,
            company_name: r.company_name,
            contact_email: r.contact_email,
            is_verified: r.is_verified,
            is_active: r.is_active,
            assigned_ro_count: r.assigned_ro_count,
        })
        .collect())
}

/// 404 unless the forwarder account exists (active or not)
pub async fn ensure_forwarder_exists(conn: &mut PgConnection, ff_id: Uuid) -> Result<(), ApiError> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM forwarder_accounts WHERE id = $1)")
            .bind(ff_id)
            .fetch_one(conn)
            .await?;

    if exists {
        Ok(())
    } else {
        Err(ApiError::not_found(format!("Forwarder {} not found", ff_id)))
    }
}

// ============================================================================
// Routing orders
// ============================================================================

pub async fn fetch_routing_order(conn: &mut PgConnection, ro_id: Uuid) -> Result<RoutingOrder, ApiError> {
    sqlx::query_as::<_, RoutingOrderRow>(&format!(
        "SELECT {RO_COLUMNS} FROM routing_orders WHERE id = $1"
    ))
    .bind(ro_id)
    .fetch_optional(conn)
    .await?
    .map(Into::into)
    .ok_or_else(|| ApiError::not_found("Routing order not found"))
}

/// Row-lock a routing order; a competing lock holder yields a 409 instead of waiting
pub async fn lock_routing_order(
    conn: &mut PgConnection,
    ro_id: Uuid,
    expected_version: Option<i32>,
) -> Result<RoutingOrder, ApiError> {
    let ro: RoutingOrder = sqlx::query_as::<_, RoutingOrderRow>(&format!(
        "SELECT {RO_COLUMNS} FROM routing_orders WHERE id = $1 FOR UPDATE NOWAIT"
    ))
    .bind(ro_id)
    .fetch_optional(conn)
    .await?
    .map(Into::into)
    .ok_or_else(|| ApiError::not_found("Routing order not found"))?;

    match expected_version {
        Some(expected) if expected != ro.version => Err(ApiError::conflict(format!(
            "Routing order {} changed since it was read (version {} != {}); re-fetch and retry",
            ro.order_number, ro.version, expected
        ))),
        _ => Ok(ro),
    }
}

/// Write an assignment plan: swap the assignee and append history in one statement pair
pub async fn persist_assignment(
    conn: &mut PgConnection,
    ro: &RoutingOrder,
    plan: &AssignmentPlan,
    actor: Option<Uuid>,
) -> Result<(), ApiError> {
    let updated = sqlx::query(
        r#"
        UPDATE routing_orders
        SET ff_id = $2, ff_assigned_at = $3, version = version + 1, updated_at = $3
        WHERE id = $1 AND version = $4
        "#,
    )
    .bind(plan.ro_id)
    .bind(plan.new_ff_id)
    .bind(plan.assigned_at)
    .bind(ro.version)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() != 1 {
        return Err(ApiError::conflict(format!(
            "Routing order {} was modified concurrently; re-fetch and retry",
            ro.order_number
        )));
    }

    sqlx::query(
        r#"
        INSERT INTO ro_assignment_history (ro_id, previous_ff_id, new_ff_id, source, rule_id, changed_by, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(plan.ro_id)
    .bind(plan.previous_ff_id)
    .bind(plan.new_ff_id)
    .bind(plan.source.as_str())
    .bind(plan.rule_id)
    .bind(actor)
    .bind(plan.assigned_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Run the engine for an unassigned, already locked routing order and persist the result.
///
/// Manual mode is reported as a configuration error since nothing can be chosen.
pub async fn auto_assign(
    conn: &mut PgConnection,
    ro: &RoutingOrder,
    notify: bool,
    actor: Option<Uuid>,
) -> Result<AssignmentPlan, ApiError> {
    let config = load_global_config(&mut *conn).await?;
    let rules = load_active_rules(&mut *conn).await?;
    let active = active_forwarder_ids(&mut *conn).await?;

    let ctx = AssignmentContext {
        config: &config,
        rules: &rules,
        active_forwarders: &active,
    };
    let resolution = assignment::resolve(ctx, &ro.route())?.ok_or_else(|| {
        RuleViolation::Configuration(
            "assignment mode is manual; choose a forwarder explicitly".to_string(),
        )
    })?;

    let plan = assignment::plan_assignment(ro, resolution, &active, notify, Utc::now())?;
    persist_assignment(conn, ro, &plan, actor).await?;

    tracing::info!(
        ro_id = %ro.id,
        ff_id = %plan.new_ff_id,
        source = plan.source.as_str(),
        rule_id = ?plan.rule_id,
        "Routing order auto-assigned"
    );

    Ok(plan)
}

// ============================================================================
// Audit
// ============================================================================

/// Record an admin mutation in the audit log
pub async fn log_admin_action(
    conn: &mut PgConnection,
    admin_id: Uuid,
    action: AdminAction,
    target_type: AuditTargetType,
    target_id: Option<String>,
    details: serde_json::Value,
) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        INSERT INTO admin_audit_log (id, admin_id, action, target_type, target_id, details)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(admin_id)
    .bind(action.to_string())
    .bind(target_type.to_string())
    .bind(&target_id)
    .bind(&details)
    .execute(conn)
    .await?;

    tracing::info!(
        admin_id = %admin_id,
        action = %action,
        target_type = %target_type,
        target_id = ?target_id,
        "Admin action logged"
    );

    Ok(())
}
