//! Forwarder account management
//!
//! Forwarders are created only by accepting an invitation and are never
//! hard-deleted; deactivation takes them out of assignment.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::Success;
use crate::app::AppState;
use crate::auth::RequireAdmin;
use crate::domain::admin::{AdminAction, AuditTargetType};
use crate::domain::ff_config::AssignmentMode;
use crate::domain::forwarders::*;
use crate::error::{ApiError, ApiResult};
use crate::services::store::{self, ForwarderRow, FORWARDER_COLUMNS};

#[derive(Debug, Serialize)]
pub struct ForwarderList {
    pub forwarders: Vec<ForwarderSummary>,
}

#[derive(Debug, Serialize)]
pub struct ForwarderBody {
    pub forwarder: ForwarderAccount,
}

/// GET /forwarders/
pub async fn list_forwarders(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
) -> ApiResult<Success<ForwarderList>> {
    let mut conn = state.db.acquire().await?;
    let forwarders = store::list_forwarders(&mut conn, false).await?;

    Ok(Success::new(ForwarderList { forwarders }))
}

/// PUT /forwarders/:id/verification
pub async fn set_verification(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(ff_id): Path<Uuid>,
    Json(req): Json<SetVerificationRequest>,
) -> ApiResult<Success<ForwarderBody>> {
    let mut tx = state.db.begin().await?;

    let forwarder: ForwarderAccount = sqlx::query_as::<_, ForwarderRow>(&format!(
        "UPDATE forwarder_accounts SET is_verified = $2, updated_at = NOW() WHERE id = $1 RETURNING {FORWARDER_COLUMNS}"
    ))
    .bind(ff_id)
    .bind(req.is_verified)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Forwarder not found"))?
    .into();

    store::log_admin_action(
        &mut tx,
        admin.user_id(),
        AdminAction::SetForwarderVerification,
        AuditTargetType::Forwarder,
        Some(ff_id.to_string()),
        serde_json::json!({ "is_verified": req.is_verified }),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(ff_id = %ff_id, is_verified = req.is_verified, "Forwarder verification updated");

    Ok(Success::new(ForwarderBody { forwarder }).with_message("Verification updated"))
}

/// POST /forwarders/:id/deactivate
///
/// Routing orders already held stay with the forwarder until reassigned.
/// Configuration that still points at it is reported back, not rewritten.
pub async fn deactivate_forwarder(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(ff_id): Path<Uuid>,
) -> ApiResult<Success<ForwarderBody>> {
    let mut tx = state.db.begin().await?;

    let forwarder: ForwarderAccount = sqlx::query_as::<_, ForwarderRow>(&format!(
        "UPDATE forwarder_accounts SET is_active = FALSE, updated_at = NOW() WHERE id = $1 RETURNING {FORWARDER_COLUMNS}"
    ))
    .bind(ff_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Forwarder not found"))?
    .into();

    let config = store::load_global_config(&mut tx).await?;
    let rule_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ff_route_assignments WHERE ff_id = $1 AND is_active",
    )
    .bind(ff_id)
    .fetch_one(&mut *tx)
    .await?;

    let mut warnings = Vec::new();
    if config.default_ff_id == Some(ff_id) && config.assignment_mode == AssignmentMode::Single {
        warnings.push(
            "forwarder is the single-mode default; automatic assignment will fail until a new default is saved"
                .to_string(),
        );
    }
    if rule_count > 0 {
        warnings.push(format!(
            "{} active route assignment(s) target this forwarder and will be skipped",
            rule_count
        ));
    }

    store::log_admin_action(
        &mut tx,
        admin.user_id(),
        AdminAction::DeactivateForwarder,
        AuditTargetType::Forwarder,
        Some(ff_id.to_string()),
        serde_json::json!({ "active_route_rules": rule_count }),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(ff_id = %ff_id, company_name = %forwarder.company_name, "Forwarder deactivated");

    Ok(Success::new(ForwarderBody { forwarder })
        .with_message("Forwarder deactivated")
        .with_warnings(warnings))
}
