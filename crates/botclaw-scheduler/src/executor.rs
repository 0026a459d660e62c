//! Action executors: the bridge to the external platform.
//! Supports: HTTP webhook (JSON POST) and dry run (log only).

use std::sync::Arc;

use async_trait::async_trait;
use botclaw_core::config::ExecutorConfig;
use botclaw_core::error::{BotClawError, Result};
use botclaw_core::traits::{ActionExecutor, ActionReceipt, ActionRequest};

/// POSTs each action request as JSON to a platform bridge.
///
/// 2xx → success (body may carry an [`ActionReceipt`]), 408/429/5xx and
/// network errors → transient, any other status → fatal.
pub struct WebhookExecutor {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
}

impl WebhookExecutor {
    pub fn new(url: &str, headers: Vec<(String, String)>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            headers,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Whether an HTTP status is worth another attempt.
pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

#[async_trait]
impl ActionExecutor for WebhookExecutor {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn execute(&self, request: &ActionRequest) -> Result<ActionReceipt> {
        let mut req = self.client.post(&self.url).json(request);
        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        req = req.header("X-Trace-Id", request.trace_id.as_str());

        let resp = req
            .send()
            .await
            .map_err(|e| BotClawError::transient(format!("webhook send failed: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.is_success() {
            tracing::info!("✅ {} {} delivered ({})", request.action, request.bot_id, status);
            let receipt = serde_json::from_str::<ActionReceipt>(&body).unwrap_or_else(|_| ActionReceipt {
                summary: format!("{} accepted by platform ({status})", request.action),
                ..Default::default()
            });
            return Ok(receipt);
        }

        let msg = format!("platform returned {status}: {}", body.chars().take(200).collect::<String>());
        if is_retryable_status(status.as_u16()) {
            Err(BotClawError::transient(msg))
        } else {
            Err(BotClawError::fatal_config(msg))
        }
    }
}

/// Logs the request and reports success without touching any platform.
#[derive(Debug, Default)]
pub struct DryRunExecutor;

#[async_trait]
impl ActionExecutor for DryRunExecutor {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn execute(&self, request: &ActionRequest) -> Result<ActionReceipt> {
        tracing::info!(
            "🧪 [dry run] {} for {} (job {}, attempt {})",
            request.action,
            request.bot_id,
            request.job_id,
            request.attempt
        );
        Ok(ActionReceipt {
            external_ref: None,
            cost: 0.0,
            summary: format!("dry run: {} for {}", request.action, request.bot_id),
        })
    }
}

/// Webhook when a URL is configured, dry run otherwise.
pub fn executor_from_config(config: &ExecutorConfig) -> Arc<dyn ActionExecutor> {
    if config.webhook_url.trim().is_empty() {
        tracing::warn!("⚠️ No executor webhook configured, actions run in dry-run mode");
        Arc::new(DryRunExecutor)
    } else {
        let headers = config
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Arc::new(WebhookExecutor::new(&config.webhook_url, headers))
    }
}
