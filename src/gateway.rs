//! Gateway Composition
//!
//! Wires the hot path together: credential validation, cost resolution,
//! rate limiting, quota accounting, and fire-and-forget usage recording.
//!
//! `admit` runs the admission pipeline and returns a verdict with the
//! client-facing rate limit headers; `record` feeds the usage pipeline
//! from the tail of the request.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::auth::validator::{KeyValidator, ValidationOutcome};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::model::{Key, Plan, QuotaState, RateLimitConfig, UsageEvent};
use crate::plan::{cost_multiplier, find_plan, is_unlimited};
use crate::quota::{period_start_for, InMemoryQuotaStore};
use crate::ratelimit::headers::RateLimitHeaders;
use crate::ratelimit::{InMemoryRateLimitStore, RateLimitDecision};
use crate::store::{CredentialStore, QuotaStore, RateLimitStore, UsageStore, UserStore};
use crate::usage::{InMemoryUsageStore, UsageRecorder};

// ============================================================================
// Admission
// ============================================================================

/// Outcome of the admission pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionVerdict {
    /// Request admitted
    Allowed,
    /// Rejected by the rate limiter; respond 429 with the headers
    RateLimited,
    /// Rejected by the monthly quota
    QuotaExceeded,
}

/// Result of admitting one request
#[derive(Debug, Clone)]
pub struct Admission {
    /// The verdict
    pub verdict: AdmissionVerdict,

    /// The validated credential
    pub key: Key,

    /// HTTP method of the request
    pub method: String,

    /// Path of the request
    pub path: String,

    /// Rate limiter decision
    pub decision: RateLimitDecision,

    /// Client-facing rate limit headers
    pub headers: HashMap<String, String>,

    /// Cost multiplier resolved for (method, path)
    pub cost_multiplier: f64,

    /// Quota counters after admission; `None` on rate-limited rejections
    pub quota: Option<QuotaState>,
}

impl Admission {
    /// Whether the request was admitted
    pub fn is_allowed(&self) -> bool {
        self.verdict == AdmissionVerdict::Allowed
    }
}

/// What the backend did with an admitted request
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// Response status code
    pub status_code: u16,
    /// Request latency in milliseconds
    pub latency_ms: u64,
    /// Request body size
    pub request_bytes: u64,
    /// Response body size
    pub response_bytes: u64,
    /// Client address
    pub ip: String,
    /// Client user agent
    pub user_agent: String,
}

// ============================================================================
// Gateway
// ============================================================================

/// The in-process admission-control and metering plane
pub struct Gateway {
    config: GatewayConfig,
    validator: KeyValidator,
    limiter: Arc<dyn RateLimitStore>,
    quotas: Arc<dyn QuotaStore>,
    user_store: Arc<dyn UserStore>,
    recorder: UsageRecorder,
    plans: Vec<Plan>,
}

impl Gateway {
    /// Start building a gateway
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Run the admission pipeline for one request.
    ///
    /// Validation and scope failures surface as errors carrying their
    /// machine code; rate limit and quota rejections come back as verdicts
    /// so the caller can render the 429/402 responses with headers.
    pub async fn admit(
        &self,
        token: &str,
        method: &str,
        path: &str,
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        let outcome = self.validator.validate(token, Some(path), now).await?;
        let key = match outcome {
            ValidationOutcome::Valid(key) => key,
            ValidationOutcome::Invalid(failure) => return Err(failure.into_error()),
        };

        let plan = self.plan_for(&key).await?;
        let cost = cost_multiplier(&plan.endpoints, method, path);
        let limit_config =
            RateLimitConfig::from_plan(&plan, self.config.rate_limit.default_burst_tokens);

        let decision = match self.limiter.check(&key.id, &limit_config, now).await {
            Ok(decision) => decision,
            Err(e) if self.config.fail_open_rate_limit => {
                warn!(error = %e, "rate limit store failed, admitting fail-open");
                RateLimitDecision {
                    allowed: true,
                    remaining: 0,
                    reset_at: now + limit_config.window,
                    reason: None,
                }
            }
            Err(e) => return Err(e),
        };
        let headers = RateLimitHeaders::from_decision(&decision, &limit_config, now).build();

        if !decision.allowed {
            return Ok(Admission {
                verdict: AdmissionVerdict::RateLimited,
                key,
                method: method.to_string(),
                path: path.to_string(),
                decision,
                headers,
                cost_multiplier: cost,
                quota: None,
            });
        }

        let period_start = period_start_for(now);
        let quota = self.quotas.get(&key.user_id, period_start).await?;
        if !is_unlimited(&plan) && quota.request_count >= plan.requests_per_month as u64 {
            return Ok(Admission {
                verdict: AdmissionVerdict::QuotaExceeded,
                key,
                method: method.to_string(),
                path: path.to_string(),
                decision,
                headers,
                cost_multiplier: cost,
                quota: Some(quota),
            });
        }

        let quota = self
            .quotas
            .increment(&key.user_id, period_start, 1, cost, 0)
            .await?;

        Ok(Admission {
            verdict: AdmissionVerdict::Allowed,
            key,
            method: method.to_string(),
            path: path.to_string(),
            decision,
            headers,
            cost_multiplier: cost,
            quota: Some(quota),
        })
    }

    /// Record a served request, fire-and-forget.
    ///
    /// The event enters the batched usage pipeline; transferred bytes are
    /// folded into the quota counters for admitted requests.
    pub async fn record(
        &self,
        admission: &Admission,
        outcome: RequestOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let event = UsageEvent {
            id: uuid::Uuid::new_v4().to_string(),
            key_id: admission.key.id.clone(),
            user_id: admission.key.user_id.clone(),
            method: admission.method.clone(),
            path: admission.path.clone(),
            status_code: outcome.status_code,
            latency_ms: outcome.latency_ms,
            request_bytes: outcome.request_bytes,
            response_bytes: outcome.response_bytes,
            cost_multiplier: admission.cost_multiplier,
            ip: outcome.ip,
            user_agent: outcome.user_agent,
            timestamp: now,
        };
        self.recorder.record(event);

        if admission.is_allowed() {
            let bytes = outcome.request_bytes + outcome.response_bytes;
            if bytes > 0 {
                self.quotas
                    .increment(
                        &admission.key.user_id,
                        period_start_for(now),
                        0,
                        0.0,
                        bytes,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// The configured plans
    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    /// Usage events dropped by the recorder since startup
    pub fn usage_dropped(&self) -> u64 {
        self.recorder.dropped()
    }

    /// Stop every background task owned by the gateway.
    ///
    /// Closing twice is a programmer error.
    pub async fn close(&self) -> Result<()> {
        self.validator.close().await?;
        self.recorder.close().await?;
        self.limiter.close().await?;
        self.quotas.close().await?;
        Ok(())
    }

    async fn plan_for(&self, key: &Key) -> Result<Plan> {
        let user = self
            .user_store
            .get(&key.user_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("user {}", key.user_id)))?;
        find_plan(&self.plans, &user.plan_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("plan {}", user.plan_id)))
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder wiring stores into a gateway; in-memory references fill any
/// store that is not supplied
pub struct GatewayBuilder {
    config: GatewayConfig,
    credentials: Option<Arc<dyn CredentialStore>>,
    users: Option<Arc<dyn UserStore>>,
    limiter: Option<Arc<dyn RateLimitStore>>,
    quotas: Option<Arc<dyn QuotaStore>>,
    usage: Option<Arc<dyn UsageStore>>,
    plans: Vec<Plan>,
}

impl GatewayBuilder {
    /// Create a builder
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            credentials: None,
            users: None,
            limiter: None,
            quotas: None,
            usage: None,
            plans: Vec::new(),
        }
    }

    /// Use a credential store
    pub fn credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    /// Use a user store
    pub fn users(mut self, store: Arc<dyn UserStore>) -> Self {
        self.users = Some(store);
        self
    }

    /// Use a rate limit store
    pub fn rate_limits(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.limiter = Some(store);
        self
    }

    /// Use a quota store
    pub fn quotas(mut self, store: Arc<dyn QuotaStore>) -> Self {
        self.quotas = Some(store);
        self
    }

    /// Use a usage store
    pub fn usage(mut self, store: Arc<dyn UsageStore>) -> Self {
        self.usage = Some(store);
        self
    }

    /// Set the plan table
    pub fn plans(mut self, plans: Vec<Plan>) -> Self {
        self.plans = plans;
        self
    }

    /// Build the gateway and start its background tasks. Must be called
    /// from within a tokio runtime.
    pub fn build(self) -> Gateway {
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(crate::store::memory::InMemoryCredentialStore::new()));
        let users = self
            .users
            .unwrap_or_else(|| Arc::new(crate::store::memory::InMemoryUserStore::new()));
        let usage = self
            .usage
            .unwrap_or_else(|| Arc::new(InMemoryUsageStore::new()));
        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(InMemoryRateLimitStore::new(self.config.rate_limit.clone())));
        let quotas = self.quotas.unwrap_or_else(|| {
            Arc::new(InMemoryQuotaStore::with_usage_store(
                self.config.quota.clone(),
                usage.clone(),
            ))
        });

        let validator = KeyValidator::new(credentials, users.clone(), self.config.auth.clone());
        let recorder = UsageRecorder::new(usage, self.config.recorder.clone());

        Gateway {
            config: self.config,
            validator,
            limiter,
            quotas,
            recorder,
            plans: self.plans,
            user_store: users,
        }
    }
}
