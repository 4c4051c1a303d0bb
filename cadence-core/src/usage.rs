//! Usage accounting and session limits
//!
//! The [`UsageTracker`] aggregates per-call token counts into running
//! session totals and derives cost from per-model pricing. The
//! [`UsageLimiter`] sits on top, turning totals into Warning/Exceeded
//! signals with one-shot warning webhooks and a sticky stop flag the agent
//! loop checks every turn.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use crate::events::TokenUsage;
use crate::webhook::{WebhookEvent, WebhookEventType, WebhookSender};

/// USD rates per million tokens
#[derive(Debug, Clone, Copy)]
pub struct ModelRate {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl ModelRate {
    pub const fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }

    fn cost(&self, usage: TokenUsage) -> f64 {
        (usage.input_tokens as f64 * self.input_per_mtok
            + usage.output_tokens as f64 * self.output_per_mtok)
            / 1_000_000.0
    }
}

/// Per-model pricing lookup with a fallback for unknown ids
#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: HashMap<String, ModelRate>,
    fallback: ModelRate,
}

impl PricingTable {
    /// An empty table; every model gets the fallback rate
    pub fn new(fallback: ModelRate) -> Self {
        Self {
            rates: HashMap::new(),
            fallback,
        }
    }

    pub fn with_rate(mut self, model_id: impl Into<String>, rate: ModelRate) -> Self {
        self.rates.insert(model_id.into(), rate);
        self
    }

    pub fn rate_for(&self, model_id: &str) -> ModelRate {
        self.rates.get(model_id).copied().unwrap_or(self.fallback)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        // A small seed catalog; deployments extend or replace it.
        Self::new(ModelRate::new(3.0, 15.0))
            .with_rate("sonnet-4-5", ModelRate::new(3.0, 15.0))
            .with_rate("haiku-4-5", ModelRate::new(1.0, 5.0))
            .with_rate("opus-4-5", ModelRate::new(5.0, 25.0))
    }
}

/// Running totals for one session
#[derive(Debug, Clone, Default)]
pub struct SessionUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub request_count: u64,
    pub cost_usd: f64,
    pub model_id: String,
}

impl SessionUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Default)]
struct TrackerInner {
    input_tokens: u64,
    output_tokens: u64,
    request_count: u64,
    cost_usd: f64,
    model_id: String,
}

/// Thread-safe aggregator of token usage.
///
/// Cost is derived at record time from the rate of the model then current,
/// so switching models mid-session prices each request correctly without
/// resetting the counters. A single mutex guards all fields.
pub struct UsageTracker {
    inner: Mutex<TrackerInner>,
    pricing: PricingTable,
}

impl UsageTracker {
    pub fn new(model_id: impl Into<String>, pricing: PricingTable) -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                model_id: model_id.into(),
                ..Default::default()
            }),
            pricing,
        }
    }

    /// Record one backend response's usage
    pub fn record(&self, usage: TokenUsage) {
        let mut inner = self.inner.lock();
        let rate = self.pricing.rate_for(&inner.model_id);
        inner.input_tokens += usage.input_tokens;
        inner.output_tokens += usage.output_tokens;
        inner.request_count += 1;
        inner.cost_usd += rate.cost(usage);
    }

    /// Switch the active model. Counters are not reset; subsequent records
    /// are priced at the new model's rate.
    pub fn set_model(&self, model_id: impl Into<String>) {
        self.inner.lock().model_id = model_id.into();
    }

    /// A consistent snapshot of the running totals
    pub fn snapshot(&self) -> SessionUsage {
        let inner = self.inner.lock();
        SessionUsage {
            input_tokens: inner.input_tokens,
            output_tokens: inner.output_tokens,
            request_count: inner.request_count,
            cost_usd: inner.cost_usd,
            model_id: inner.model_id.clone(),
        }
    }

    /// Zero all counters, keeping the model id
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let model_id = std::mem::take(&mut inner.model_id);
        *inner = TrackerInner {
            model_id,
            ..Default::default()
        };
    }
}

/// Position of a counter relative to its limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStatus {
    Ok,
    Warning,
    Exceeded,
}

/// Combined statuses from one limiter check
#[derive(Debug, Clone, Copy)]
pub struct LimitResult {
    pub tokens: LimitStatus,
    pub cost: LimitStatus,
    pub should_stop: bool,
}

/// Limiter configuration
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Session token cap; `None` disables the token limit
    pub max_session_tokens: Option<u64>,
    /// Session cost cap in USD; `None` disables the cost limit
    pub max_session_cost: Option<f64>,
    /// Fraction of a cap at which a warning fires (default 0.8)
    pub warning_threshold: f64,
    /// Whether exceeding a cap sets the sticky stop flag (default true)
    pub stop_on_limit: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_session_tokens: None,
            max_session_cost: None,
            warning_threshold: 0.8,
            stop_on_limit: true,
        }
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    token_warning_sent: bool,
    cost_warning_sent: bool,
    stopped: bool,
}

/// Enforces session caps over a [`UsageTracker`]
pub struct UsageLimiter {
    config: LimiterConfig,
    tracker: Arc<UsageTracker>,
    state: Mutex<LimiterState>,
    webhooks: Option<WebhookSender>,
    session_id: String,
}

impl UsageLimiter {
    pub fn new(config: LimiterConfig, tracker: Arc<UsageTracker>) -> Self {
        Self {
            config,
            tracker,
            state: Mutex::new(LimiterState::default()),
            webhooks: None,
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_webhooks(mut self, sender: WebhookSender, session_id: impl Into<String>) -> Self {
        self.webhooks = Some(sender);
        self.session_id = session_id.into();
        self
    }

    /// The tracker this limiter observes
    pub fn tracker(&self) -> &Arc<UsageTracker> {
        &self.tracker
    }

    /// Record usage and re-check the limits
    pub fn record(&self, usage: TokenUsage) -> LimitResult {
        self.tracker.record(usage);
        self.check_limits()
    }

    /// Re-evaluate both counters against their caps.
    ///
    /// Warning webhooks fire at most once per counter per session; the stop
    /// flag is sticky once set.
    pub fn check_limits(&self) -> LimitResult {
        let snapshot = self.tracker.snapshot();
        let tokens = status(
            snapshot.total_tokens() as f64,
            self.config.max_session_tokens.map(|v| v as f64),
            self.config.warning_threshold,
        );
        let cost = status(
            snapshot.cost_usd,
            self.config.max_session_cost,
            self.config.warning_threshold,
        );

        let mut state = self.state.lock();

        if tokens != LimitStatus::Ok && !state.token_warning_sent {
            state.token_warning_sent = true;
            self.emit(
                WebhookEventType::TokenLimitWarning,
                json!({
                    "totalTokens": snapshot.total_tokens(),
                    "limit": self.config.max_session_tokens,
                }),
            );
        }
        if cost != LimitStatus::Ok && !state.cost_warning_sent {
            state.cost_warning_sent = true;
            self.emit(
                WebhookEventType::CostLimitWarning,
                json!({
                    "costUsd": snapshot.cost_usd,
                    "limit": self.config.max_session_cost,
                }),
            );
        }

        if self.config.stop_on_limit
            && (tokens == LimitStatus::Exceeded || cost == LimitStatus::Exceeded)
            && !state.stopped
        {
            tracing::info!(
                total_tokens = snapshot.total_tokens(),
                cost_usd = snapshot.cost_usd,
                "session limit exceeded; stopping"
            );
            state.stopped = true;
        }

        LimitResult {
            tokens,
            cost,
            should_stop: state.stopped,
        }
    }

    /// Sticky: once true, stays true until [`reset`](UsageLimiter::reset)
    pub fn should_stop(&self) -> bool {
        self.state.lock().stopped
    }

    /// Clear counters, warning latches, and the stop flag
    pub fn reset(&self) {
        self.tracker.reset();
        *self.state.lock() = LimiterState::default();
    }

    fn emit(&self, event_type: WebhookEventType, data: serde_json::Value) {
        if let Some(sender) = &self.webhooks {
            sender.dispatch(WebhookEvent::new(event_type, self.session_id.clone(), data));
        }
    }
}

fn status(value: f64, limit: Option<f64>, warning_threshold: f64) -> LimitStatus {
    match limit {
        None => LimitStatus::Ok,
        Some(limit) if limit <= 0.0 => LimitStatus::Exceeded,
        Some(limit) => {
            if value >= limit {
                LimitStatus::Exceeded
            } else if value >= limit * warning_threshold {
                LimitStatus::Warning
            } else {
                LimitStatus::Ok
            }
        }
    }
}
