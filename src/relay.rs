//! Relay execution: one call, one upstream connection.
//!
//! Error classification drives account health (401 unauthorized, 429
//! rate-limited, 529 overloaded); the raw upstream status and body are
//! always relayed to the caller untouched. Health writes are best-effort:
//! a failed bookkeeping write never fails the originating request.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::account::Account;
use crate::clock::{Clock, SystemClock};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::notify::{AnomalyEvent, AnomalyNotifier, NullNotifier, notify_detached};
use crate::quota::QuotaTracker;
use crate::sse::sse_frame_stream_from_response;
use crate::store::AccountStore;
use crate::translate::{
    ProviderTranslator, clamp_max_tokens, resolve_model, usage_from_event,
};
use crate::types::{ChatRequest, ChatResponse, StreamEvent, TokenUsage};

#[derive(Debug)]
pub struct RelayOutcome {
    pub status: u16,
    /// Translated body for the non-streaming path; `None` when the response
    /// was streamed to the sink instead.
    pub response: Option<ChatResponse>,
    /// Merged usage, when the upstream reported any.
    pub usage: Option<TokenUsage>,
}

pub struct RelayExecutor {
    http: reqwest::Client,
    config: RelayConfig,
    accounts: Arc<AccountStore>,
    translator: Arc<dyn ProviderTranslator>,
    quota: Option<Arc<QuotaTracker>>,
    notifier: Arc<dyn AnomalyNotifier>,
    clock: Arc<dyn Clock>,
}

impl RelayExecutor {
    pub fn new(
        config: RelayConfig,
        accounts: Arc<AccountStore>,
        translator: Arc<dyn ProviderTranslator>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            accounts,
            translator,
            quota: None,
            notifier: Arc::new(NullNotifier),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_quota(mut self, quota: Arc<QuotaTracker>) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn AnomalyNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    fn prepare(&self, request: &ChatRequest, account: &Account) -> (ChatRequest, String, String) {
        let resolved = resolve_model(account, request, &self.config);
        let model = self.translator.map_model(resolved);
        let mut request = request.clone();
        request.max_tokens = clamp_max_tokens(request.max_tokens, &self.config);
        let url = self
            .translator
            .endpoint(account, &model, &self.config, request.stream);
        (request, model, url)
    }

    async fn send(
        &self,
        url: &str,
        credential: &str,
        body: &Value,
    ) -> Result<reqwest::Response> {
        let result = self
            .http
            .post(url)
            .bearer_auth(credential)
            .json(body)
            .timeout(self.config.upstream_timeout())
            .send()
            .await;
        match result {
            Ok(response) => Ok(response),
            Err(err) if err.is_timeout() => {
                Err(RelayError::Timeout(self.config.upstream_timeout_secs))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Classify a non-2xx status into a health transition. All writes are
    /// best-effort; the caller still receives the verbatim upstream error.
    async fn classify_failure(&self, account: &Account, status: u16) {
        let transition = match status {
            401 => {
                let result = self.accounts.mark_unauthorized(&account.id).await;
                Some(("unauthorized", result))
            }
            429 => {
                // A 429 may also be a quota signal; the lazy read settles it.
                if let Some(quota) = &self.quota {
                    if let Err(err) = quota.is_exceeded(&account.id).await {
                        warn!(account = %account.id, %err, "quota check after 429 failed");
                    }
                }
                let result = self.accounts.mark_rate_limited(&account.id).await;
                Some(("rate_limited", result))
            }
            529 => {
                let result = self.accounts.mark_overloaded(&account.id).await;
                Some(("overloaded", result))
            }
            _ => None,
        };

        let Some((label, result)) = transition else {
            debug!(account = %account.id, status, "upstream failure without health transition");
            return;
        };
        if let Err(err) = result {
            warn!(account = %account.id, status, %err, "health transition write failed");
        }
        notify_detached(
            self.notifier.clone(),
            AnomalyEvent {
                account_id: account.id.clone(),
                account_name: account.name.clone(),
                platform: self.accounts.provider().to_string(),
                status: label.to_string(),
                error_code: Some(status.to_string()),
                reason: format!("upstream returned {status}"),
                timestamp: self.clock.now(),
            },
        );
    }

    async fn clear_transient(&self, account: &Account) {
        if let Err(err) = self.accounts.clear_transient_errors(&account.id).await {
            warn!(account = %account.id, %err, "transient health clear failed");
        }
    }

    /// Non-streaming relay. Success translates the provider body into the
    /// canonical response; upstream errors surface as
    /// [`RelayError::Upstream`] with status and body preserved.
    pub async fn execute(&self, request: &ChatRequest, account: &Account) -> Result<RelayOutcome> {
        let (request, model, url) = self.prepare(request, account);
        let credential = self.accounts.vault().decrypt(&account.credential)?;
        let body = self.translator.to_wire(&request, &model);

        let response = self.send(&url, &credential, &body).await?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            self.classify_failure(account, status).await;
            return Err(RelayError::Upstream { status, body });
        }

        self.clear_transient(account).await;
        let raw: Value = response.json().await?;
        let translated = self.translator.response_from_wire(raw)?;
        let usage = translated.usage.clone();
        Ok(RelayOutcome {
            status,
            response: Some(translated),
            usage,
        })
    }

    /// Streaming relay. Events are translated and forwarded to `sink` as
    /// they arrive; a dropped sink aborts the upstream read. `usage_tx`
    /// fires exactly once at normal completion, and only if any usage was
    /// observed.
    pub async fn execute_stream(
        &self,
        request: &ChatRequest,
        account: &Account,
        sink: mpsc::Sender<StreamEvent>,
        usage_tx: Option<oneshot::Sender<TokenUsage>>,
    ) -> Result<RelayOutcome> {
        let mut request = request.clone();
        request.stream = true;
        let (request, model, url) = self.prepare(&request, account);
        let credential = self.accounts.vault().decrypt(&account.credential)?;
        let body = self.translator.to_wire(&request, &model);

        let response = self.send(&url, &credential, &body).await?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            self.classify_failure(account, status).await;
            return Err(RelayError::Upstream { status, body });
        }

        let mut frames = sse_frame_stream_from_response(response);
        let mut merged = TokenUsage::default();
        while let Some(frame) = frames.next().await {
            let frame = frame?;
            let Some(event) = self.translator.stream_event_from_wire(&frame) else {
                continue;
            };
            if let Some(usage) = usage_from_event(&event) {
                merged.merge(&usage);
            }
            if sink.send(event).await.is_err() {
                // Dropping `frames` closes the upstream connection.
                debug!(account = %account.id, "client sink closed mid-stream");
                return Err(RelayError::ClientDisconnected);
            }
        }

        self.clear_transient(account).await;
        let usage = (!merged.is_empty()).then_some(merged);
        if let (Some(tx), Some(usage)) = (usage_tx, usage.as_ref()) {
            let _ = tx.send(usage.clone());
        }
        Ok(RelayOutcome {
            status,
            response: None,
            usage,
        })
    }
}
