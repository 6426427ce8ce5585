//! HTTP delivery for failure-streak alert webhooks.

use std::time::Duration;

use async_trait::async_trait;
use capstan_application::{AlertWebhook, AlertWebhookRequest};
use capstan_core::{AppError, AppResult};
use reqwest::header;

/// Reqwest-based implementation of the alert webhook port.
pub struct HttpAlertWebhook {
    http_client: reqwest::Client,
}

impl HttpAlertWebhook {
    /// Creates a webhook sender over an existing HTTP client.
    #[must_use]
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// Creates a webhook sender with its own client and the given request
    /// timeout.
    pub fn with_timeout(timeout: Duration) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                AppError::Internal(format!("failed to build alert webhook client: {error}"))
            })?;

        Ok(Self::new(http_client))
    }
}

#[async_trait]
impl AlertWebhook for HttpAlertWebhook {
    async fn post(&self, request: AlertWebhookRequest) -> AppResult<()> {
        let mut builder = self
            .http_client
            .post(request.url.as_str())
            .json(&request.body);

        if let Some(token) = request.bearer_token.as_deref() {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = builder.send().await.map_err(|error| {
            AppError::Internal(format!("failed to call alert webhook: {error}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_owned());
            return Err(AppError::Internal(format!(
                "alert webhook returned status {}: {body}",
                status.as_u16()
            )));
        }

        Ok(())
    }
}
