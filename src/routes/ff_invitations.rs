//! Forwarder invitation routes
//!
//! Admins invite, list and revoke; the invited party accepts with the token
//! from the onboarding link. Expiry is derived from `expires_at` on every read.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{Created, Empty, Success};
use crate::app::AppState;
use crate::auth::{RequireAdmin, RequireAuth};
use crate::domain::admin::{AdminAction, AuditTargetType};
use crate::domain::forwarders::ForwarderAccount;
use crate::domain::invitations::*;
use crate::domain::notifications::NotificationRequest;
use crate::error::{ApiError, ApiResult};
use crate::services::invitations;
use crate::services::store::{self, ForwarderRow, FORWARDER_COLUMNS};

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct InvitationRow {
    id: Uuid,
    email: String,
    company_name: String,
    token: Uuid,
    status: String,
    expires_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    accepted_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<InvitationRow> for Invitation {
    type Error = ApiError;

    fn try_from(row: InvitationRow) -> Result<Self, Self::Error> {
        let status = InvitationStatus::parse(&row.status).ok_or_else(|| {
            ApiError::Internal(anyhow::anyhow!("unknown invitation status: {}", row.status))
        })?;

        Ok(Self {
            id: row.id,
            email: row.email,
            company_name: row.company_name,
            token: row.token,
            status,
            expires_at: row.expires_at,
            sent_at: row.sent_at,
            accepted_at: row.accepted_at,
            revoked_at: row.revoked_at,
            created_at: row.created_at,
        })
    }
}

const INVITATION_COLUMNS: &str = "id, email, company_name, token, status, expires_at, sent_at, accepted_at, revoked_at, created_at";

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct InvitationList {
    pub invitations: Vec<InvitationResponse>,
}

#[derive(Debug, Serialize)]
pub struct InvitationCreated {
    pub invitation: InvitationResponse,
    /// Onboarding link, for sharing by hand when no email was sent
    pub accept_url: String,
}

#[derive(Debug, Serialize)]
pub struct ForwarderCreated {
    pub forwarder: ForwarderAccount,
}

fn accept_url(state: &AppState, token: Uuid) -> String {
    format!("{}/ff-onboarding?token={}", state.settings.portal_base_url, token)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /ff-invitations/
pub async fn list_invitations(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
) -> ApiResult<Success<InvitationList>> {
    let rows = sqlx::query_as::<_, InvitationRow>(&format!(
        "SELECT {INVITATION_COLUMNS} FROM ff_invitations ORDER BY created_at DESC"
    ))
    .fetch_all(&state.db)
    .await?;

    let now = Utc::now();
    let invitations = rows
        .into_iter()
        .map(|row| Invitation::try_from(row).map(|inv| inv.to_response(now)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Success::new(InvitationList { invitations }))
}

/// POST /ff-invitations/
pub async fn invite_forwarder(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Json(req): Json<InviteRequest>,
) -> ApiResult<Created<Success<InvitationCreated>>> {
    let days_valid = req.days_valid.unwrap_or(state.settings.default_invitation_days);
    let email = invitations::validate_invite(&req.email, &req.company_name, days_valid)?;
    let now = Utc::now();

    let mut tx = state.db.begin().await?;

    // Two admins inviting the same address must not both pass the duplicate check
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(&email)
        .execute(&mut *tx)
        .await?;

    let existing = sqlx::query_as::<_, InvitationRow>(&format!(
        "SELECT {INVITATION_COLUMNS} FROM ff_invitations WHERE LOWER(email) = $1"
    ))
    .bind(&email)
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .map(Invitation::try_from)
    .collect::<Result<Vec<_>, _>>()?;

    invitations::ensure_no_live_invitation(&existing, &email, now)?;

    let invitation =
        invitations::new_invitation(email, &req.company_name, days_valid, req.send_email, now);

    sqlx::query(
        r#"
        INSERT INTO ff_invitations
            (id, email, company_name, token, status, expires_at, sent_at, invited_by, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(invitation.id)
    .bind(&invitation.email)
    .bind(&invitation.company_name)
    .bind(invitation.token)
    .bind(invitation.status.as_str())
    .bind(invitation.expires_at)
    .bind(invitation.sent_at)
    .bind(admin.user_id())
    .bind(invitation.created_at)
    .execute(&mut *tx)
    .await?;

    store::log_admin_action(
        &mut tx,
        admin.user_id(),
        AdminAction::InviteForwarder,
        AuditTargetType::Invitation,
        Some(invitation.id.to_string()),
        serde_json::json!({
            "email": invitation.email,
            "company_name": invitation.company_name,
            "days_valid": days_valid,
            "send_email": req.send_email,
        }),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        invitation_id = %invitation.id,
        email = %invitation.email,
        days_valid,
        "Forwarder invited"
    );

    let url = accept_url(&state, invitation.token);
    let warnings = if req.send_email {
        let email = NotificationRequest::forwarder_invitation(
            &invitation.email,
            &invitation.company_name,
            &url,
            days_valid,
        );
        state.notifier.dispatch_all(&state.db, &[email]).await
    } else {
        Vec::new()
    };

    let message = if req.send_email {
        "Invitation sent"
    } else {
        "Invitation created"
    };

    Ok(Created(
        Success::new(InvitationCreated {
            invitation: invitation.to_response(now),
            accept_url: url,
        })
        .with_message(message)
        .with_warnings(warnings),
    ))
}

/// DELETE /ff-invitations/?id=
pub async fn revoke_invitation(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Query(query): Query<RevokeQuery>,
) -> ApiResult<Success<Empty>> {
    let mut tx = state.db.begin().await?;

    let invitation: Invitation = sqlx::query_as::<_, InvitationRow>(&format!(
        "SELECT {INVITATION_COLUMNS} FROM ff_invitations WHERE id = $1 FOR UPDATE"
    ))
    .bind(query.id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Invitation not found"))?
    .try_into()?;

    let now = Utc::now();
    invitations::ensure_revocable(&invitation, now)?;

    sqlx::query("UPDATE ff_invitations SET status = 'revoked', revoked_at = $2 WHERE id = $1")
        .bind(invitation.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    store::log_admin_action(
        &mut tx,
        admin.user_id(),
        AdminAction::RevokeInvitation,
        AuditTargetType::Invitation,
        Some(invitation.id.to_string()),
        serde_json::json!({
            "email": invitation.email,
            "status_before": invitation.effective_status(now),
        }),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(invitation_id = %invitation.id, "Invitation revoked");

    Ok(Success::message("Invitation revoked"))
}

/// POST /ff-invitations/accept
///
/// Called by the invited party; the new forwarder account takes their user id.
pub async fn accept_invitation(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<AcceptInvitationRequest>,
) -> ApiResult<Created<Success<ForwarderCreated>>> {
    let mut tx = state.db.begin().await?;

    let invitation: Invitation = sqlx::query_as::<_, InvitationRow>(&format!(
        "SELECT {INVITATION_COLUMNS} FROM ff_invitations WHERE token = $1 FOR UPDATE"
    ))
    .bind(req.token)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Invitation not found"))?
    .try_into()?;

    if let Some(email) = &auth.email {
        if !email.eq_ignore_ascii_case(&invitation.email) {
            return Err(ApiError::forbidden(
                "Invitation was issued to a different email address",
            ));
        }
    }

    let now = Utc::now();
    invitations::ensure_acceptable(&invitation, now)?;

    let forwarder: ForwarderAccount = sqlx::query_as::<_, ForwarderRow>(&format!(
        r#"
        INSERT INTO forwarder_accounts (id, company_name, contact_email, invitation_id, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $5)
        RETURNING {FORWARDER_COLUMNS}
        "#
    ))
    .bind(auth.user_id)
    .bind(&invitation.company_name)
    .bind(&invitation.email)
    .bind(invitation.id)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?
    .into();

    sqlx::query("UPDATE ff_invitations SET status = 'accepted', accepted_at = $2 WHERE id = $1")
        .bind(invitation.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        invitation_id = %invitation.id,
        ff_id = %forwarder.id,
        company_name = %forwarder.company_name,
        "Invitation accepted, forwarder onboarded"
    );

    Ok(Created(
        Success::new(ForwarderCreated { forwarder }).with_message("Welcome aboard"),
    ))
}
