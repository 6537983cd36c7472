//! Forwarder assignment configuration routes
//!
//! - `GET    /ff-config/`          config, all route rules, assignable forwarders
//! - `PUT    /ff-config/`          save the global mode, or update a route rule
//! - `POST   /ff-config/`          create (or update, when `id` is set) a route rule
//! - `DELETE /ff-config/?route_id` delete a route rule
//! - `POST   /ff-config/resolve`   preview the engine's choice for a route
//!
//! All routes require admin privileges.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::api::{Empty, Success};
use crate::app::AppState;
use crate::auth::RequireAdmin;
use crate::domain::admin::{AdminAction, AuditTargetType};
use crate::domain::ff_config::*;
use crate::error::{ApiError, ApiResult, FieldError, RuleViolation};
use crate::services::store::{self, RouteRuleRow, RULE_COLUMNS};
use crate::services::{assignment, pricing};

#[derive(Debug, Serialize)]
pub struct RouteAssignmentBody {
    pub route_assignment: RouteAssignmentRule,
}

#[derive(Debug, Serialize)]
pub struct GlobalConfigBody {
    pub global_config: GlobalAssignmentConfig,
}

/// What a `PUT /ff-config/` saved
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SavedConfig {
    Rule(RouteAssignmentBody),
    Global(GlobalConfigBody),
}

/// GET /ff-config/
pub async fn get_ff_config(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
) -> ApiResult<Success<FfConfigResponse>> {
    let mut conn = state.db.acquire().await?;

    let global_config = store::load_global_config(&mut conn).await?;
    let route_assignments = store::load_all_rules(&mut conn).await?;
    let available_ffs = store::list_forwarders(&mut conn, true).await?;

    Ok(Success::new(FfConfigResponse {
        global_config,
        route_assignments,
        available_ffs,
    }))
}

/// PUT /ff-config/
pub async fn save_ff_config(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Json(mut req): Json<SaveFfConfigRequest>,
) -> ApiResult<Success<SavedConfig>> {
    match req.route_assignment.take() {
        Some(input) => {
            let rule = save_route_rule(&state, &admin, input).await?;
            Ok(Success::new(SavedConfig::Rule(rule)).with_message("Route assignment saved"))
        }
        None => {
            let global_config = save_global_config(&state, &admin, req).await?;
            Ok(Success::new(SavedConfig::Global(GlobalConfigBody { global_config }))
                .with_message("Assignment configuration saved"))
        }
    }
}

/// POST /ff-config/
pub async fn create_route_rule(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Json(req): Json<SaveFfConfigRequest>,
) -> ApiResult<Success<RouteAssignmentBody>> {
    let input = req
        .route_assignment
        .ok_or_else(|| ApiError::bad_request("route_assignment is required"))?;

    let rule = save_route_rule(&state, &admin, input).await?;
    Ok(Success::new(rule).with_message("Route assignment saved"))
}

/// DELETE /ff-config/?route_id=
pub async fn delete_route_rule(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Query(query): Query<DeleteRouteQuery>,
) -> ApiResult<Success<Empty>> {
    let mut tx = state.db.begin().await?;

    let deleted = sqlx::query("DELETE FROM ff_route_assignments WHERE id = $1")
        .bind(query.route_id)
        .execute(&mut *tx)
        .await?;

    if deleted.rows_affected() == 0 {
        return Err(ApiError::not_found("Route assignment not found"));
    }

    store::log_admin_action(
        &mut tx,
        admin.user_id(),
        AdminAction::DeleteRouteRule,
        AuditTargetType::RouteRule,
        Some(query.route_id.to_string()),
        serde_json::json!({}),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(route_id = query.route_id, "Route assignment deleted");

    Ok(Success::message("Route assignment deleted"))
}

/// POST /ff-config/resolve
///
/// Runs the engine against the current configuration without writing anything.
pub async fn resolve_preview(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Json(route): Json<RouteDescriptor>,
) -> ApiResult<Success<ResolvePreviewResponse>> {
    let mut conn = state.db.acquire().await?;

    let config = store::load_global_config(&mut conn).await?;
    let rules = store::load_active_rules(&mut conn).await?;
    let active = store::active_forwarder_ids(&mut conn).await?;

    let ctx = assignment::AssignmentContext {
        config: &config,
        rules: &rules,
        active_forwarders: &active,
    };
    let resolution = assignment::resolve(ctx, &route)?;

    Ok(Success::new(ResolvePreviewResponse {
        assignment_mode: config.assignment_mode,
        ff_id: resolution.map(|r| r.ff_id),
        rule_id: resolution.and_then(|r| r.rule_id),
    }))
}

// ============================================================================
// Helpers
// ============================================================================

async fn save_global_config(
    state: &AppState,
    admin: &RequireAdmin,
    req: SaveFfConfigRequest,
) -> ApiResult<GlobalAssignmentConfig> {
    let mut tx = state.db.begin().await?;

    let current = store::load_global_config(&mut tx).await?;
    let active = store::active_forwarder_ids(&mut tx).await?;

    // Absent fields keep their stored value; an explicit null clears it
    let assignment_mode = req.assignment_mode.unwrap_or(current.assignment_mode);
    let default_ff_id = req.default_ff_id.unwrap_or(current.default_ff_id);
    let auto_assign_on_ro = req.auto_assign_on_ro.unwrap_or(current.auto_assign_on_ro);
    let mut default_margin_percent = req
        .default_margin_percent
        .unwrap_or(current.default_margin_percent);

    if let Some(Some(ff_id)) = req.default_ff_id {
        store::ensure_forwarder_exists(&mut tx, ff_id).await?;
    }

    let mut fields = Vec::new();
    if assignment_mode == AssignmentMode::Single {
        match default_ff_id {
            None => fields.push(FieldError::new(
                "default_ff_id",
                "is required in single assignment mode",
            )),
            Some(ff_id) if !active.contains(&ff_id) => fields.push(FieldError::new(
                "default_ff_id",
                "must reference an active forwarder",
            )),
            Some(_) => {}
        }
    }
    if let Some(margin) = default_margin_percent {
        match pricing::validate_margin("default_margin_percent", margin) {
            Ok(rounded) => default_margin_percent = Some(rounded),
            Err(e) => fields.push(e),
        }
    }
    if !fields.is_empty() {
        return Err(RuleViolation::Validation(fields).into());
    }

    sqlx::query(
        r#"
        UPDATE ff_global_config
        SET assignment_mode = $1, default_ff_id = $2, auto_assign_on_ro = $3,
            default_margin_percent = $4, updated_by = $5, updated_at = NOW()
        WHERE id = 1
        "#,
    )
    .bind(assignment_mode.as_str())
    .bind(default_ff_id)
    .bind(auto_assign_on_ro)
    .bind(default_margin_percent)
    .bind(admin.user_id())
    .execute(&mut *tx)
    .await?;

    store::log_admin_action(
        &mut tx,
        admin.user_id(),
        AdminAction::SaveAssignmentConfig,
        AuditTargetType::AssignmentConfig,
        None,
        serde_json::json!({
            "previous_mode": current.assignment_mode,
            "assignment_mode": assignment_mode,
            "default_ff_id": default_ff_id,
            "auto_assign_on_ro": auto_assign_on_ro,
            "default_margin_percent": default_margin_percent,
        }),
    )
    .await?;

    let saved = store::load_global_config(&mut tx).await?;
    tx.commit().await?;

    tracing::info!(
        assignment_mode = %assignment_mode,
        default_ff_id = ?default_ff_id,
        auto_assign_on_ro,
        "Assignment configuration saved"
    );

    Ok(saved)
}

async fn save_route_rule(
    state: &AppState,
    admin: &RequireAdmin,
    input: RouteRuleInput,
) -> ApiResult<RouteAssignmentBody> {
    let input = input.normalized()?;

    let mut tx = state.db.begin().await?;

    store::ensure_forwarder_exists(&mut tx, input.ff_id).await?;
    if input.is_active && !store::active_forwarder_ids(&mut tx).await?.contains(&input.ff_id) {
        return Err(RuleViolation::validation("ff_id", "must reference an active forwarder").into());
    }

    let (row, action) = match input.id {
        Some(id) => {
            let row = sqlx::query_as::<_, RouteRuleRow>(&format!(
                r#"
                UPDATE ff_route_assignments
                SET ff_id = $2, transport_type = $3, origin_country = $4, origin_port = $5,
                    destination_city = $6, carrier_name = $7, priority = $8, is_active = $9,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING {RULE_COLUMNS}
                "#
            ))
            .bind(id)
            .bind(input.ff_id)
            .bind(&input.transport_type)
            .bind(&input.origin_country)
            .bind(&input.origin_port)
            .bind(&input.destination_city)
            .bind(&input.carrier_name)
            .bind(input.priority)
            .bind(input.is_active)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::not_found("Route assignment not found"))?;
            (row, AdminAction::UpdateRouteRule)
        }
        None => {
            let row = sqlx::query_as::<_, RouteRuleRow>(&format!(
                r#"
                INSERT INTO ff_route_assignments
                    (ff_id, transport_type, origin_country, origin_port, destination_city,
                     carrier_name, priority, is_active)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING {RULE_COLUMNS}
                "#
            ))
            .bind(input.ff_id)
            .bind(&input.transport_type)
            .bind(&input.origin_country)
            .bind(&input.origin_port)
            .bind(&input.destination_city)
            .bind(&input.carrier_name)
            .bind(input.priority)
            .bind(input.is_active)
            .fetch_one(&mut *tx)
            .await?;
            (row, AdminAction::CreateRouteRule)
        }
    };
    let rule: RouteAssignmentRule = row.into();

    store::log_admin_action(
        &mut tx,
        admin.user_id(),
        action,
        AuditTargetType::RouteRule,
        Some(rule.id.to_string()),
        serde_json::json!({
            "ff_id": rule.ff_id,
            "transport_type": rule.transport_type,
            "origin_country": rule.origin_country,
            "priority": rule.priority,
            "is_active": rule.is_active,
        }),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(route_id = rule.id, ff_id = %rule.ff_id, action = %action, "Route assignment saved");

    Ok(RouteAssignmentBody {
        route_assignment: rule,
    })
}
