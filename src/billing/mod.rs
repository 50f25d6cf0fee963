//! Payment Provider Port
//!
//! The capability the billing layer consumes. Concrete provider adapters
//! (Stripe, Paddle, ...) live outside the core; the core defines the
//! interface, the `payments_disabled` sentinel for hosts running without a
//! provider, and the webhook signature contract: HMAC-SHA256 over the raw
//! payload, hex-encoded, compared in constant time before any JSON is
//! parsed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::auth::constant_time_compare;
use crate::error::{ErrorCode, GatewayError, Result};
use crate::model::{Plan, User};

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// Provider Types
// ============================================================================

/// A hosted checkout session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider-side session id
    pub id: String,
    /// URL the customer is redirected to
    pub url: String,
}

/// A hosted billing portal session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalSession {
    /// URL the customer is redirected to
    pub url: String,
}

/// Provider-side subscription state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Provider-side subscription id
    pub id: String,
    /// Provider-side status string
    pub status: String,
    /// End of the current billing period
    pub current_period_end: DateTime<Utc>,
    /// Whether cancellation is scheduled for the period end
    pub cancel_at_period_end: bool,
}

/// A verified, parsed webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Provider event type, e.g. `subscription.updated`
    pub event_type: String,
    /// Provider payload
    pub data: serde_json::Value,
}

// ============================================================================
// Provider Capability
// ============================================================================

/// Payment provider capability injected at startup.
///
/// There is no global provider registry: the host constructs one provider
/// value and passes it to [`Payments`].
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Provider name, e.g. `stripe`
    fn name(&self) -> &str;

    /// Create a provider-side customer; returns the customer id
    async fn create_customer(&self, user: &User) -> Result<String>;

    /// Start a checkout session for a plan, optionally with a trial
    async fn create_checkout_session(
        &self,
        customer_id: &str,
        plan: &Plan,
        trial_days: u32,
    ) -> Result<CheckoutSession>;

    /// Start a billing portal session
    async fn create_portal_session(&self, customer_id: &str) -> Result<PortalSession>;

    /// Cancel a subscription, at period end or immediately
    async fn cancel_subscription(&self, subscription_id: &str, immediately: bool) -> Result<()>;

    /// Current subscription state
    async fn get_subscription(&self, subscription_id: &str) -> Result<Subscription>;

    /// Report metered usage for a billing period
    async fn report_usage(&self, subscription_id: &str, quantity: u64) -> Result<()>;

    /// Verify and parse an inbound webhook
    fn parse_webhook(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent>;
}

impl std::fmt::Debug for dyn PaymentProvider + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentProvider")
            .field("name", &self.name())
            .finish()
    }
}

// ============================================================================
// Payments Facade
// ============================================================================

/// Entry point the billing layer holds. When no provider is configured
/// every operation surfaces the `payments_disabled` sentinel.
pub struct Payments {
    provider: Option<std::sync::Arc<dyn PaymentProvider>>,
}

impl Payments {
    /// Payments backed by a provider
    pub fn new(provider: std::sync::Arc<dyn PaymentProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    /// Payments with no provider configured
    pub fn disabled() -> Self {
        Self { provider: None }
    }

    /// Whether a provider is configured
    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// The configured provider, or the `payments_disabled` sentinel
    pub fn provider(&self) -> Result<&dyn PaymentProvider> {
        self.provider
            .as_deref()
            .ok_or_else(GatewayError::payments_disabled)
    }
}

// ============================================================================
// Webhook Signatures
// ============================================================================

/// Verifies webhook signatures for a shared secret.
///
/// The signature is HMAC-SHA256 over the raw payload, hex-encoded. Any
/// mismatch rejects the webhook before the payload is parsed.
pub struct WebhookVerifier {
    secret: String,
}

impl WebhookVerifier {
    /// Create a verifier for a shared secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Compute the expected signature for a payload
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verify a signature in constant time
    pub fn verify(&self, payload: &[u8], signature: &str) -> Result<()> {
        let expected = self.sign(payload);
        if constant_time_compare(&expected, signature) {
            Ok(())
        } else {
            Err(GatewayError::auth(
                ErrorCode::InvalidSignature,
                "webhook signature mismatch",
            ))
        }
    }

    /// Verify, then parse the payload into an event.
    ///
    /// The JSON is only touched after the signature checks out; the event
    /// type is read from the payload's `type` field.
    pub fn parse(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent> {
        self.verify(payload, signature)?;

        let data: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::internal(format!("malformed webhook payload: {e}")))?;
        let event_type = data
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| {
                GatewayError::validation(ErrorCode::InvalidEventType, "webhook payload has no type")
            })?
            .to_string();

        Ok(WebhookEvent { event_type, data })
    }
}
