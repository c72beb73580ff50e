//! Anomaly notification: fire-and-forget, failures are logged and swallowed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

#[derive(Clone, Debug, Serialize)]
pub struct AnomalyEvent {
    pub account_id: String,
    pub account_name: String,
    pub platform: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification dispatch failed: {0}")]
    Dispatch(String),
}

#[async_trait]
pub trait AnomalyNotifier: Send + Sync {
    async fn notify(&self, event: AnomalyEvent) -> Result<(), NotifyError>;
}

/// Drops every event. Default when no webhook is configured.
#[derive(Debug, Default)]
pub struct NullNotifier;

#[async_trait]
impl AnomalyNotifier for NullNotifier {
    async fn notify(&self, _event: AnomalyEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// POSTs the event as JSON to a configured webhook.
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl AnomalyNotifier for WebhookNotifier {
    async fn notify(&self, event: AnomalyEvent) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&event)
            .send()
            .await
            .map_err(|err| NotifyError::Dispatch(err.to_string()))?;
        if !response.status().is_success() {
            return Err(NotifyError::Dispatch(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Dispatch an event without blocking or failing the caller.
pub fn notify_detached(notifier: std::sync::Arc<dyn AnomalyNotifier>, event: AnomalyEvent) {
    tokio::spawn(async move {
        let account = event.account_id.clone();
        if let Err(err) = notifier.notify(event).await {
            warn!(%account, %err, "anomaly notification failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use httpmock::Method::POST;
    use httpmock::MockServer;

    fn event() -> AnomalyEvent {
        AnomalyEvent {
            account_id: "acct-1".to_string(),
            account_name: "prod-east".to_string(),
            platform: "bedrock".to_string(),
            status: "unauthorized".to_string(),
            error_code: Some("401".to_string()),
            reason: "upstream returned 401".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn webhook_posts_event_as_json() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/hooks/anomaly")
                .json_body_includes(r#"{"account_id":"acct-1","status":"unauthorized"}"#);
            then.status(204);
        });

        let notifier = WebhookNotifier::new(server.url("/hooks/anomaly"));
        notifier.notify(event()).await.expect("notify");
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn webhook_failure_surfaces_as_dispatch_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/hooks/anomaly");
            then.status(500);
        });

        let notifier = WebhookNotifier::new(server.url("/hooks/anomaly"));
        let err = notifier.notify(event()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Dispatch(_)));
    }
}
