//! Routing order assignment routes
//!
//! Every mutation runs in one transaction that holds a `FOR UPDATE NOWAIT`
//! lock on the routing order, so a competing request fails with 409 instead
//! of overwriting. Notifications go out after commit; their failures come
//! back as `warnings`.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::api::{Paginated, PaginationParams, Success};
use crate::app::AppState;
use crate::auth::RequireAdmin;
use crate::domain::admin::{AdminAction, AuditTargetType};
use crate::domain::routing_orders::*;
use crate::error::ApiResult;
use crate::services::assignment::{self, AssignmentPlan, Resolution};
use crate::services::store::{self, RoutingOrderRow, RO_COLUMNS};

#[derive(Debug, Serialize)]
pub struct RoutingOrderBody {
    pub routing_order: RoutingOrder,
}

/// Commit-side bookkeeping shared by assign, reassign and auto-assign
async fn audit_plan(
    conn: &mut sqlx::PgConnection,
    admin: &RequireAdmin,
    action: AdminAction,
    ro: &RoutingOrder,
    plan: &AssignmentPlan,
) -> ApiResult<()> {
    store::log_admin_action(
        conn,
        admin.user_id(),
        action,
        AuditTargetType::RoutingOrder,
        Some(ro.id.to_string()),
        serde_json::json!({
            "order_number": ro.order_number,
            "previous_ff_id": plan.previous_ff_id,
            "new_ff_id": plan.new_ff_id,
            "source": plan.source,
            "rule_id": plan.rule_id,
            "notify": !plan.notifications.is_empty(),
        }),
    )
    .await
}

async fn respond(
    state: &AppState,
    mut ro: RoutingOrder,
    plan: AssignmentPlan,
    message: String,
) -> Success<RoutingOrderBody> {
    plan.apply(&mut ro);
    let warnings = state
        .notifier
        .dispatch_all(&state.db, &plan.notifications)
        .await;

    Success::new(RoutingOrderBody { routing_order: ro })
        .with_message(message)
        .with_warnings(warnings)
}

/// POST /ff-assignments/
pub async fn assign_routing_order(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Json(req): Json<AssignRequest>,
) -> ApiResult<Success<RoutingOrderBody>> {
    let mut tx = state.db.begin().await?;

    let ro = store::lock_routing_order(&mut tx, req.ro_id, req.expected_version).await?;
    store::ensure_forwarder_exists(&mut tx, req.ff_user_id).await?;
    let active = store::active_forwarder_ids(&mut tx).await?;

    let plan = assignment::plan_assignment(
        &ro,
        Resolution::manual(req.ff_user_id),
        &active,
        req.notify,
        Utc::now(),
    )?;

    store::persist_assignment(&mut tx, &ro, &plan, Some(admin.user_id())).await?;
    audit_plan(&mut tx, &admin, AdminAction::AssignRoutingOrder, &ro, &plan).await?;

    tx.commit().await?;

    tracing::info!(
        ro_id = %ro.id,
        order_number = %ro.order_number,
        ff_id = %plan.new_ff_id,
        "Routing order assigned"
    );

    let message = format!("Routing order {} assigned", ro.order_number);
    Ok(respond(&state, ro, plan, message).await)
}

/// PUT /ff-assignments/
pub async fn reassign_routing_order(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Json(req): Json<ReassignRequest>,
) -> ApiResult<Success<RoutingOrderBody>> {
    let mut tx = state.db.begin().await?;

    let ro = store::lock_routing_order(&mut tx, req.ro_id, req.expected_version).await?;
    store::ensure_forwarder_exists(&mut tx, req.new_ff_user_id).await?;
    let active = store::active_forwarder_ids(&mut tx).await?;

    let plan = assignment::plan_reassignment(
        &ro,
        req.new_ff_user_id,
        &active,
        req.notify,
        Utc::now(),
    )?;

    store::persist_assignment(&mut tx, &ro, &plan, Some(admin.user_id())).await?;
    audit_plan(&mut tx, &admin, AdminAction::ReassignRoutingOrder, &ro, &plan).await?;

    tx.commit().await?;

    tracing::info!(
        ro_id = %ro.id,
        order_number = %ro.order_number,
        previous_ff_id = ?plan.previous_ff_id,
        ff_id = %plan.new_ff_id,
        "Routing order reassigned"
    );

    let message = format!("Routing order {} reassigned", ro.order_number);
    Ok(respond(&state, ro, plan, message).await)
}

/// POST /ff-assignments/auto
pub async fn auto_assign_routing_order(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Json(req): Json<AutoAssignRequest>,
) -> ApiResult<Success<RoutingOrderBody>> {
    let mut tx = state.db.begin().await?;

    let ro = store::lock_routing_order(&mut tx, req.ro_id, None).await?;
    let plan = store::auto_assign(&mut tx, &ro, req.notify, Some(admin.user_id())).await?;
    audit_plan(&mut tx, &admin, AdminAction::AssignRoutingOrder, &ro, &plan).await?;

    tx.commit().await?;

    let message = format!("Routing order {} assigned", ro.order_number);
    Ok(respond(&state, ro, plan, message).await)
}

/// GET /ff-assignments/unassigned
///
/// Queue of routing orders waiting on a manual decision, oldest first.
pub async fn list_unassigned(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Query(params): Query<PaginationParams>,
) -> ApiResult<Paginated<RoutingOrder>> {
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM routing_orders WHERE ff_id IS NULL")
            .fetch_one(&state.db)
            .await?;

    let rows = sqlx::query_as::<_, RoutingOrderRow>(&format!(
        "SELECT {RO_COLUMNS} FROM routing_orders WHERE ff_id IS NULL ORDER BY created_at, id LIMIT $1 OFFSET $2"
    ))
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(Paginated::new(
        rows.into_iter().map(Into::into).collect(),
        &params,
        total as u64,
    ))
}
