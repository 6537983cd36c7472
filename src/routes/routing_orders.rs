//! Routing order intake and lookup
//!
//! A routing order is created once a quote is approved. When
//! `auto_assign_on_ro` is on, the engine runs inside the creating
//! transaction; a missing route rule or incomplete configuration leaves the
//! order unassigned with a warning instead of failing the intake.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{Created, Success};
use crate::app::AppState;
use crate::auth::RequireAdmin;
use crate::domain::admin::{AdminAction, AuditTargetType};
use crate::domain::ff_config::AssignmentMode;
use crate::domain::routing_orders::*;
use crate::error::{ApiError, ApiResult, RuleViolation};
use crate::routes::ff_assignments::RoutingOrderBody;
use crate::services::store::{self, RoutingOrderRow, RO_COLUMNS};

#[derive(Debug, Serialize)]
pub struct AssignmentHistoryBody {
    pub ro_id: Uuid,
    pub history: Vec<AssignmentHistoryEntry>,
}

/// POST /routing-orders/
pub async fn create_routing_order(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Json(req): Json<CreateRoutingOrderRequest>,
) -> ApiResult<Created<Success<RoutingOrderBody>>> {
    let req = req.normalized()?;
    let now = Utc::now();

    let mut tx = state.db.begin().await?;

    let mut ro: RoutingOrder = sqlx::query_as::<_, RoutingOrderRow>(&format!(
        r#"
        INSERT INTO routing_orders
            (id, order_number, consignee, transport_type, origin_country, origin_port,
             destination_city, carrier_name, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
        RETURNING {RO_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(&req.order_number)
    .bind(&req.consignee)
    .bind(&req.transport_type)
    .bind(&req.origin_country)
    .bind(&req.origin_port)
    .bind(&req.destination_city)
    .bind(&req.carrier_name)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?
    .into();

    store::log_admin_action(
        &mut tx,
        admin.user_id(),
        AdminAction::CreateRoutingOrder,
        AuditTargetType::RoutingOrder,
        Some(ro.id.to_string()),
        serde_json::json!({ "order_number": ro.order_number, "route": ro.route() }),
    )
    .await?;

    let config = store::load_global_config(&mut tx).await?;
    let mut warnings = Vec::new();

    let plan = if config.auto_assign_on_ro && config.assignment_mode != AssignmentMode::Manual {
        match store::auto_assign(&mut tx, &ro, req.notify, Some(admin.user_id())).await {
            Ok(plan) => Some(plan),
            Err(ApiError::Rule(
                rule @ (RuleViolation::NoRouteMatch(_) | RuleViolation::Configuration(_)),
            )) => {
                tracing::warn!(
                    ro_id = %ro.id,
                    order_number = %ro.order_number,
                    error = %rule,
                    "Auto-assignment skipped, routing order left unassigned"
                );
                warnings.push(format!("routing order left unassigned: {}", rule));
                None
            }
            Err(e) => return Err(e),
        }
    } else {
        None
    };

    tx.commit().await?;

    tracing::info!(
        ro_id = %ro.id,
        order_number = %ro.order_number,
        assigned = plan.is_some(),
        "Routing order created"
    );

    if let Some(plan) = plan {
        plan.apply(&mut ro);
        warnings.extend(
            state
                .notifier
                .dispatch_all(&state.db, &plan.notifications)
                .await,
        );
    }

    let message = format!("Routing order {} created", ro.order_number);
    Ok(Created(
        Success::new(RoutingOrderBody { routing_order: ro })
            .with_message(message)
            .with_warnings(warnings),
    ))
}

/// GET /routing-orders/:id
pub async fn get_routing_order(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path(ro_id): Path<Uuid>,
) -> ApiResult<Success<RoutingOrderBody>> {
    let mut conn = state.db.acquire().await?;
    let routing_order = store::fetch_routing_order(&mut conn, ro_id).await?;

    Ok(Success::new(RoutingOrderBody { routing_order }))
}

/// GET /routing-orders/:id/assignment-history
pub async fn get_assignment_history(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path(ro_id): Path<Uuid>,
) -> ApiResult<Success<AssignmentHistoryBody>> {
    let mut conn = state.db.acquire().await?;
    store::fetch_routing_order(&mut conn, ro_id).await?;

    let history = sqlx::query_as::<_, AssignmentHistoryEntry>(
        r#"
        SELECT id, ro_id, previous_ff_id, new_ff_id, source, rule_id, changed_by, created_at
        FROM ro_assignment_history
        WHERE ro_id = $1
        ORDER BY id
        "#,
    )
    .bind(ro_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Success::new(AssignmentHistoryBody { ro_id, history }))
}
