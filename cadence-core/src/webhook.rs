//! Outbound webhook delivery
//!
//! Session lifecycle and limit events are posted to configured endpoints as
//! JSON. Deliveries are fire-and-forget background tasks: failures are
//! retried with backoff, then logged and dropped: a webhook can never
//! affect the agent's run. When a secret is configured the request carries
//! an `X-Webhook-Signature` header holding the HMAC-SHA256 of the body.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use uuid::Uuid;

use crate::backend::retry::{backoff_delay, RetryConfig};

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Kinds of outbound events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WebhookEventType {
    SessionStarted,
    ToolCompleted,
    TokenLimitWarning,
    CostLimitWarning,
}

/// One outbound event, serialized verbatim as the request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: WebhookEventType,
    pub session_id: String,
    pub data: Value,
}

impl WebhookEvent {
    pub fn new(event_type: WebhookEventType, session_id: impl Into<String>, data: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            session_id: session_id.into(),
            data,
        }
    }
}

/// One delivery target
#[derive(Debug, Clone)]
pub struct WebhookEndpoint {
    pub url: String,
    /// HMAC secret; when set, requests are signed
    pub secret: Option<String>,
    /// Extra headers added verbatim
    pub headers: HashMap<String, String>,
    /// Per-request timeout (default 30 s)
    pub timeout: Duration,
    /// Retries after the initial attempt (default 3)
    pub max_retries: u32,
}

impl WebhookEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: None,
            headers: HashMap::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

/// Compute the signature header value for a request body:
/// `sha256=` followed by the hex HMAC-SHA256 of the body under the secret.
pub fn signature(secret: &[u8], body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Posts events to all configured endpoints in the background
#[derive(Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
    endpoints: Vec<WebhookEndpoint>,
}

impl WebhookSender {
    pub fn new(endpoints: Vec<WebhookEndpoint>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }

    /// Whether any endpoint is configured
    pub fn is_active(&self) -> bool {
        !self.endpoints.is_empty()
    }

    /// Fire-and-forget: spawn a delivery task per endpoint and return.
    pub fn dispatch(&self, event: WebhookEvent) {
        if self.endpoints.is_empty() {
            return;
        }
        let body = match serde_json::to_string(&event) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize webhook event");
                return;
            }
        };
        for endpoint in self.endpoints.clone() {
            let client = self.client.clone();
            let body = body.clone();
            tokio::spawn(async move {
                if let Err(e) = deliver(&client, &endpoint, &body).await {
                    tracing::warn!(
                        url = %endpoint.url,
                        error = %e,
                        "webhook delivery failed; event dropped"
                    );
                }
            });
        }
    }

    /// Deliver an event to every endpoint and wait for the outcome.
    ///
    /// Mostly useful in tests; production callers use [`dispatch`].
    ///
    /// [`dispatch`]: WebhookSender::dispatch
    pub async fn deliver_all(&self, event: &WebhookEvent) -> Result<(), WebhookError> {
        let body = serde_json::to_string(event)?;
        for endpoint in &self.endpoints {
            deliver(&self.client, endpoint, &body).await?;
        }
        Ok(())
    }
}

/// Webhook delivery errors
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("endpoint returned status {0}")]
    Status(u16),
}

async fn deliver(
    client: &reqwest::Client,
    endpoint: &WebhookEndpoint,
    body: &str,
) -> Result<(), WebhookError> {
    let backoff = RetryConfig::default();
    let mut last_err: Option<WebhookError> = None;

    for attempt in 0..=endpoint.max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(attempt as usize, &backoff)).await;
        }
        match post_once(client, endpoint, body).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::debug!(
                    url = %endpoint.url,
                    attempt = attempt + 1,
                    error = %e,
                    "webhook attempt failed"
                );
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("at least one attempt was made"))
}

async fn post_once(
    client: &reqwest::Client,
    endpoint: &WebhookEndpoint,
    body: &str,
) -> Result<(), WebhookError> {
    let mut request = client
        .post(&endpoint.url)
        .timeout(endpoint.timeout)
        .header("Content-Type", "application/json");

    if let Some(secret) = &endpoint.secret {
        request = request.header(SIGNATURE_HEADER, signature(secret.as_bytes(), body.as_bytes()));
    }
    for (name, value) in &endpoint.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request.body(body.to_string()).send().await?;
    if !response.status().is_success() {
        return Err(WebhookError::Status(response.status().as_u16()));
    }
    Ok(())
}
