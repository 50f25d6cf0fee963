//! Credential Validation
//!
//! Translates an opaque bearer token into a verified principal:
//!
//! 1. Format check against the configured wire prefix
//! 2. Prefix-indexed candidate lookup (first twelve characters)
//! 3. Slow-hash verification over every candidate, off the async worker
//! 4. Revocation, expiry, and account-status checks
//! 5. Optional scope check when the request path is known
//! 6. Best-effort last-used touch through the lossy coalescer
//!
//! The candidate loop verifies every loaded candidate and selects the match
//! afterwards, so total work is proportional to the candidate count
//! regardless of match position.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::auth::crypto::{TokenGenerator, TokenHasher, TOKEN_RANDOM_LEN};
use crate::auth::scope::has_scope;
use crate::auth::touch::TouchQueue;
use crate::config::AuthConfig;
use crate::error::{ErrorCode, GatewayError, Result};
use crate::model::{Key, UserStatus};
use crate::store::{CredentialStore, UserStore};

// ============================================================================
// Outcomes
// ============================================================================

/// Why a token was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    /// Token does not match the wire format
    InvalidFormat,
    /// No candidate hash verified
    KeyNotFound,
    /// The matched key was revoked (takes precedence over expiry)
    KeyRevoked,
    /// The matched key is past its expiration
    KeyExpired,
    /// The owning account is suspended
    UserSuspended,
}

impl ValidationFailure {
    /// Stable machine code for this failure
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidFormat => ErrorCode::InvalidTokenFormat,
            Self::KeyNotFound => ErrorCode::KeyNotFound,
            Self::KeyRevoked => ErrorCode::KeyRevoked,
            Self::KeyExpired => ErrorCode::KeyExpired,
            Self::UserSuspended => ErrorCode::UserSuspended,
        }
    }

    /// The corresponding auth error
    pub fn into_error(self) -> GatewayError {
        let detail = match self {
            Self::InvalidFormat => "token does not match the expected format",
            Self::KeyNotFound => "no credential matched the presented token",
            Self::KeyRevoked => "credential has been revoked",
            Self::KeyExpired => "credential has expired",
            Self::UserSuspended => "account is suspended",
        };
        match self {
            Self::InvalidFormat => GatewayError::validation(self.code(), detail),
            _ => GatewayError::auth(self.code(), detail),
        }
    }
}

/// Result of validating a bearer token
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    /// Token verified; the matched credential
    Valid(Key),
    /// Token rejected
    Invalid(ValidationFailure),
}

impl ValidationOutcome {
    /// Whether the token verified
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// The matched key, if any
    pub fn key(&self) -> Option<&Key> {
        match self {
            Self::Valid(key) => Some(key),
            Self::Invalid(_) => None,
        }
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Validates bearer tokens against the credential store
pub struct KeyValidator {
    credentials: Arc<dyn CredentialStore>,
    users: Arc<dyn UserStore>,
    hasher: Arc<TokenHasher>,
    config: AuthConfig,
    touch: TouchQueue,
}

impl KeyValidator {
    /// Create a validator. Must be called from within a tokio runtime: the
    /// last-used coalescer task starts here.
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        users: Arc<dyn UserStore>,
        config: AuthConfig,
    ) -> Self {
        let touch = TouchQueue::new(credentials.clone(), config.touch.clone());
        Self {
            credentials,
            users,
            hasher: Arc::new(TokenHasher::new()),
            config,
            touch,
        }
    }

    /// Pure wire-format check: configured prefix plus 64 token characters
    pub fn validate_format(&self, raw_token: &str) -> bool {
        raw_token.starts_with(&self.config.token_prefix)
            && raw_token.len() >= self.config.token_prefix.len() + TOKEN_RANDOM_LEN
    }

    /// Validate a bearer token.
    ///
    /// When `path` is provided the matched key's scopes must cover it;
    /// a scope mismatch surfaces as an `insufficient_scope` limit error
    /// rather than a validation outcome.
    pub async fn validate(
        &self,
        raw_token: &str,
        path: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ValidationOutcome> {
        if !self.validate_format(raw_token) {
            return Ok(ValidationOutcome::Invalid(ValidationFailure::InvalidFormat));
        }

        let prefix = TokenGenerator::lookup_prefix(raw_token);
        let mut candidates = self.credentials.get_by_prefix(&prefix).await?;
        candidates.truncate(self.config.max_prefix_candidates.max(1));

        let key = match self.verify_candidates(candidates, raw_token).await? {
            Some(key) => key,
            None => return Ok(ValidationOutcome::Invalid(ValidationFailure::KeyNotFound)),
        };

        // Revocation wins over expiry.
        if key.is_revoked() {
            return Ok(ValidationOutcome::Invalid(ValidationFailure::KeyRevoked));
        }
        if key.is_expired(now) {
            return Ok(ValidationOutcome::Invalid(ValidationFailure::KeyExpired));
        }

        if let Some(user) = self.users.get(&key.user_id).await? {
            if user.status == UserStatus::Suspended {
                return Ok(ValidationOutcome::Invalid(ValidationFailure::UserSuspended));
            }
        }

        if let Some(path) = path {
            if !has_scope(&key, path) {
                return Err(GatewayError::limit(
                    ErrorCode::InsufficientScope,
                    format!("credential scopes do not cover {path}"),
                ));
            }
        }

        self.touch.push(&key.id, now);
        Ok(ValidationOutcome::Valid(key))
    }

    /// Run the slow-hash comparison over all candidates on the blocking
    /// pool. Every candidate is verified; the first match is selected after
    /// the loop so the match position is not observable in the timing.
    async fn verify_candidates(
        &self,
        candidates: Vec<Key>,
        raw_token: &str,
    ) -> Result<Option<Key>> {
        if candidates.is_empty() {
            return Ok(None);
        }

        let hasher = self.hasher.clone();
        let raw = raw_token.to_string();
        tokio::task::spawn_blocking(move || {
            let mut matched: Option<Key> = None;
            for key in candidates {
                let verified = hasher.verify(&key.hash, &raw);
                if verified && matched.is_none() {
                    matched = Some(key);
                }
            }
            matched
        })
        .await
        .map_err(|e| GatewayError::internal(format!("hash verification task failed: {e}")))
    }

    /// Touches dropped by the lossy last-used queue
    pub fn touches_dropped(&self) -> u64 {
        self.touch.dropped()
    }

    /// Stop the last-used coalescer. Closing twice is a programmer error.
    pub async fn close(&self) -> Result<()> {
        self.touch.close().await
    }
}
