//! Gateway Error Types
//!
//! This module provides the crate-wide error taxonomy:
//! - Tagged error kinds matched structurally (validation, auth, limit, ...)
//! - Stable machine codes from a fixed enumeration
//! - Human-readable detail alongside every code
//!
//! Client-caused failures (auth, limit) carry enough information to render
//! an HTTP response without string matching on the error message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Machine Codes
// ============================================================================

/// Stable machine codes surfaced to API clients.
///
/// The wire form is the snake_case string from [`ErrorCode::as_str`]; the
/// enumeration is fixed so callers can match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Token does not match the `{prefix}{64 hex}` wire format
    InvalidTokenFormat,
    /// No credential matched the presented token
    KeyNotFound,
    /// Credential was revoked
    KeyRevoked,
    /// Credential expired
    KeyExpired,
    /// Owning user is suspended
    UserSuspended,
    /// Credential scopes do not cover the request path
    InsufficientScope,
    /// Rate limit window is exhausted
    LimitExceeded,
    /// Monthly quota is exhausted
    QuotaExceeded,
    /// Email already registered
    DuplicateEmail,
    /// Usage event id already recorded
    DuplicateEvent,
    /// Unrecognized webhook event type
    InvalidEventType,
    /// Webhook signature did not verify
    InvalidSignature,
    /// No payment provider is configured
    PaymentsDisabled,
    /// Referenced entity does not exist
    NotFound,
    /// State conflict
    Conflict,
    /// Dependency unavailable
    Unavailable,
    /// Unexpected internal failure
    Internal,
}

impl ErrorCode {
    /// Wire representation of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidTokenFormat => "invalid_token_format",
            Self::KeyNotFound => "key_not_found",
            Self::KeyRevoked => "key_revoked",
            Self::KeyExpired => "key_expired",
            Self::UserSuspended => "user_suspended",
            Self::InsufficientScope => "insufficient_scope",
            Self::LimitExceeded => "limit_exceeded",
            Self::QuotaExceeded => "quota_exceeded",
            Self::DuplicateEmail => "duplicate_email",
            Self::DuplicateEvent => "duplicate_event",
            Self::InvalidEventType => "invalid_event_type",
            Self::InvalidSignature => "invalid_signature",
            Self::PaymentsDisabled => "payments_disabled",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Error Type
// ============================================================================

/// Gateway error taxonomy
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Malformed input: token format, quantities, duplicate email
    #[error("validation failed ({code}): {detail}")]
    Validation {
        /// Stable machine code
        code: ErrorCode,
        /// Human-readable detail
        detail: String,
    },

    /// Credential rejected: not found, revoked, expired, suspended user
    #[error("authentication failed ({code}): {detail}")]
    Auth {
        /// Stable machine code
        code: ErrorCode,
        /// Human-readable detail
        detail: String,
    },

    /// Admission rejected: rate limit, quota, scope
    #[error("limit exceeded ({code}): {detail}")]
    Limit {
        /// Stable machine code
        code: ErrorCode,
        /// Human-readable detail
        detail: String,
    },

    /// Referenced user/key/subscription does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// State conflict, e.g. duplicate usage event id
    #[error("conflict: {0}")]
    Conflict(String),

    /// Dependency unavailable, e.g. payments disabled
    #[error("unavailable ({code}): {detail}")]
    Unavailable {
        /// Stable machine code
        code: ErrorCode,
        /// Human-readable detail
        detail: String,
    },

    /// Unexpected store or task failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Build a validation error
    pub fn validation(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self::Validation {
            code,
            detail: detail.into(),
        }
    }

    /// Build an auth error
    pub fn auth(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self::Auth {
            code,
            detail: detail.into(),
        }
    }

    /// Build a limit error
    pub fn limit(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self::Limit {
            code,
            detail: detail.into(),
        }
    }

    /// Build an unavailable error
    pub fn unavailable(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self::Unavailable {
            code,
            detail: detail.into(),
        }
    }

    /// Build an internal error
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    /// The sentinel for an unconfigured payment provider
    pub fn payments_disabled() -> Self {
        Self::unavailable(ErrorCode::PaymentsDisabled, "no payment provider configured")
    }

    /// Stable machine code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { code, .. }
            | Self::Auth { code, .. }
            | Self::Limit { code, .. }
            | Self::Unavailable { code, .. } => *code,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether the failure was caused by the client rather than the gateway.
    ///
    /// Client-caused errors are surfaced with their machine code and are
    /// never logged at error severity.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::Auth { .. } | Self::Limit { .. } | Self::NotFound(_)
        )
    }
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
