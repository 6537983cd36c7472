//! Hook into the quote subsystem
//!
//! After forwarder costs land, the quote/document generator is asked to build
//! the client-facing quote. The call is fire-and-forget from the caller's
//! point of view: failures become warnings.

use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use super::pricing::PricedCosts;
use crate::config::Settings;

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    quote_id: Uuid,
    submission_ref: &'a str,
    costs: &'a PricedCosts,
}

#[derive(Clone)]
pub struct QuoteGenerator {
    http: reqwest::Client,
    url: Option<String>,
    timeout: Duration,
}

impl QuoteGenerator {
    pub fn new(http: reqwest::Client, settings: &Settings) -> Self {
        Self {
            http,
            url: settings.quote_service_url.clone(),
            timeout: Duration::from_secs(settings.notification_timeout_seconds),
        }
    }

    /// Ask the quote subsystem to regenerate the quote; `Err` carries a warning message
    pub async fn request_generation(
        &self,
        quote_id: Uuid,
        submission_ref: &str,
        costs: &PricedCosts,
    ) -> Result<(), String> {
        let Some(base) = &self.url else {
            tracing::debug!(quote_id = %quote_id, "Quote service not configured, skipping generation");
            return Ok(());
        };

        let url = format!("{}/quotes/{}/generate", base, quote_id);
        let body = GenerationRequest {
            quote_id,
            submission_ref,
            costs,
        };

        let result = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => {
                tracing::info!(quote_id = %quote_id, "Quote generation requested");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(quote_id = %quote_id, error = %e, "Quote generation request failed");
                Err(format!(
                    "costs saved, but quote generation could not be requested: {}",
                    e
                ))
            }
        }
    }
}
