//! Admin extractor
//!
//! Wraps [`RequireAuth`] and additionally checks the `is_admin` flag on the
//! caller's profile. Every back-office route takes this extractor.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::RequireAuth;
use crate::app::AppState;
use crate::error::ErrorResponse;

#[derive(Debug, Clone)]
pub struct RequireAdmin {
    pub auth: RequireAuth,
}

impl RequireAdmin {
    pub fn user_id(&self) -> Uuid {
        self.auth.user_id
    }
}

#[derive(Debug)]
pub enum AdminAuthError {
    NotAuthenticated,
    NotAdmin,
    Database,
}

impl IntoResponse for AdminAuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AdminAuthError::NotAuthenticated => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required",
            ),
            AdminAuthError::NotAdmin => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Admin privileges required",
            ),
            AdminAuthError::Database => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred",
            ),
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}

/// Whether the given user holds admin privileges
pub async fn is_admin(db: &sqlx::PgPool, user_id: Uuid) -> Result<bool, sqlx::Error> {
    let flag: Option<bool> = sqlx::query_scalar("SELECT is_admin FROM profiles WHERE id = $1")
        .bind(user_id)
        .fetch_optional(db)
        .await?;

    Ok(flag == Some(true))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = AdminAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth = RequireAuth::from_request_parts(parts, state)
            .await
            .map_err(|_| AdminAuthError::NotAuthenticated)?;

        let admin = is_admin(&state.db, auth.user_id).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to load admin flag");
            AdminAuthError::Database
        })?;

        if !admin {
            tracing::warn!(user_id = %auth.user_id, "Non-admin user attempted to access admin route");
            return Err(AdminAuthError::NotAdmin);
        }

        Ok(RequireAdmin { auth })
    }
}
