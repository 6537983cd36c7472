//! Notification dispatcher
//!
//! Records every notification in `ff_notifications` and, when an email
//! service is configured, forwards it with exponential backoff. Delivery
//! failures are returned as [`NotificationFailure`] for the caller to report
//! as a warning; they never undo the state change that triggered them.

use std::time::Duration;

use backoff::ExponentialBackoff;
use futures::future::join_all;
use reqwest::StatusCode;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Settings;
use crate::domain::notifications::{NotificationRequest, Recipient};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("notification to {recipient} failed: {reason}")]
pub struct NotificationFailure {
    pub recipient: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
struct EmailPayload<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
    kind: String,
    data: &'a serde_json::Value,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    http: reqwest::Client,
    email_service_url: Option<String>,
    email_service_token: String,
    timeout: Duration,
    max_retry: Duration,
}

/// Server-side and throttling failures are worth retrying; other client errors are not
fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn describe(recipient: &Recipient) -> String {
    match recipient {
        Recipient::Forwarder(id) => format!("forwarder {}", id),
        Recipient::Email(email) => email.clone(),
    }
}

impl NotificationDispatcher {
    pub fn new(http: reqwest::Client, settings: &Settings) -> Self {
        Self {
            http,
            email_service_url: settings.email_service_url.clone(),
            email_service_token: settings.email_service_token.clone(),
            timeout: Duration::from_secs(settings.notification_timeout_seconds),
            max_retry: Duration::from_secs(settings.notification_max_retry_seconds),
        }
    }

    async fn recipient_email(
        &self,
        db: &PgPool,
        recipient: &Recipient,
    ) -> Result<(Option<Uuid>, String), String> {
        match recipient {
            Recipient::Email(email) => Ok((None, email.clone())),
            Recipient::Forwarder(ff_id) => {
                let email: Option<String> = sqlx::query_scalar(
                    "SELECT contact_email FROM forwarder_accounts WHERE id = $1",
                )
                .bind(ff_id)
                .fetch_optional(db)
                .await
                .map_err(|e| format!("failed to load forwarder contact: {}", e))?;

                email
                    .map(|email| (Some(*ff_id), email))
                    .ok_or_else(|| "forwarder has no contact email on file".to_string())
            }
        }
    }

    async fn send_email(&self, to: &str, request: &NotificationRequest) -> Result<(), String> {
        let Some(url) = &self.email_service_url else {
            return Ok(());
        };

        let payload = EmailPayload {
            to,
            subject: &request.subject,
            body: &request.body,
            kind: request.kind.to_string(),
            data: &request.data,
        };

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.max_retry),
            ..ExponentialBackoff::default()
        };

        let http = &self.http;
        let token = self.email_service_token.as_str();
        let timeout = self.timeout;
        let payload = &payload;

        backoff::future::retry(policy, || async move {
            let response = match http
                .post(url)
                .bearer_auth(token)
                .timeout(timeout)
                .json(payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    return Err(backoff::Error::transient(format!(
                        "email service unreachable: {}",
                        e
                    )))
                }
            };

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else if is_transient(status) {
                tracing::debug!(status = %status, "Email service busy, retrying");
                Err(backoff::Error::transient(format!("email service returned {}", status)))
            } else {
                Err(backoff::Error::permanent(format!("email service rejected request: {}", status)))
            }
        })
        .await
    }

    /// Record and deliver one notification
    pub async fn dispatch(
        &self,
        db: &PgPool,
        request: &NotificationRequest,
    ) -> Result<Uuid, NotificationFailure> {
        let failure = |reason: String| NotificationFailure {
            recipient: describe(&request.recipient),
            reason,
        };

        let (ff_id, email) = self
            .recipient_email(db, &request.recipient)
            .await
            .map_err(failure)?;

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO ff_notifications (id, recipient_ff_id, recipient_email, kind, subject, body, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(ff_id)
        .bind(&email)
        .bind(request.kind.to_string())
        .bind(&request.subject)
        .bind(&request.body)
        .bind(&request.data)
        .execute(db)
        .await
        .map_err(|e| failure(format!("failed to record notification: {}", e)))?;

        let delivery = self.send_email(&email, request).await;
        let (status, error) = match (&delivery, &self.email_service_url) {
            (Err(e), _) => ("failed", Some(e.clone())),
            (Ok(()), Some(_)) => ("delivered", None),
            (Ok(()), None) => ("recorded", None),
        };

        if let Err(e) = sqlx::query(
            "UPDATE ff_notifications SET delivery_status = $2, error = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(&error)
        .execute(db)
        .await
        {
            tracing::warn!(notification_id = %id, error = %e, "Failed to record delivery status");
        }

        match delivery {
            Ok(()) => {
                tracing::info!(
                    notification_id = %id,
                    kind = %request.kind,
                    recipient = %email,
                    delivery_status = status,
                    "Notification dispatched"
                );
                Ok(id)
            }
            Err(reason) => {
                tracing::warn!(
                    notification_id = %id,
                    kind = %request.kind,
                    recipient = %email,
                    error = %reason,
                    "Notification delivery failed"
                );
                Err(failure(reason))
            }
        }
    }

    /// Dispatch a batch and collect failures as human-readable warnings
    pub async fn dispatch_all(&self, db: &PgPool, requests: &[NotificationRequest]) -> Vec<String> {
        let results = join_all(requests.iter().map(|request| self.dispatch(db, request))).await;

        results
            .into_iter()
            .filter_map(Result::err)
            .map(|failure| {
                tracing::warn!(error = %failure, "Notification failure reported to caller");
                failure.to_string()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_only_transient_statuses() {
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient(StatusCode::BAD_REQUEST));
        assert!(!is_transient(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn failure_message_names_recipient() {
        let failure = NotificationFailure {
            recipient: describe(&Recipient::Forwarder(Uuid::nil())),
            reason: "email service returned 503".into(),
        };
        assert_eq!(
            failure.to_string(),
            "notification to forwarder 00000000-0000-0000-0000-000000000000 failed: email service returned 503"
        );
    }

    #[test]
    fn email_payload_uses_snake_case_kind() {
        let request = NotificationRequest::routing_order_reassigned(Uuid::nil(), Uuid::nil(), "RO-200");
        let payload = EmailPayload {
            to: "ops@ff.example.com",
            subject: &request.subject,
            body: &request.body,
            kind: request.kind.to_string(),
            data: &request.data,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "routing_order_reassigned");
        assert_eq!(json["data"]["order_number"], "RO-200");
    }
}
