//! Credential Cryptographic Utilities
//!
//! Token generation and verification for issued API credentials:
//! - Raw tokens on the wire are `{prefix}{64 hex chars}`
//! - Stored form is `(lookup prefix, Argon2id hash)`
//! - Verification always goes through the slow-hash primitive
//! - Constant-time comparison for signature checks

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use rand::Rng;

use crate::error::{GatewayError, Result};
use crate::model::Key;

/// Number of leading characters of the raw token stored as the lookup index
pub const LOOKUP_PREFIX_LEN: usize = 12;

/// Number of random hex characters following the wire prefix
pub const TOKEN_RANDOM_LEN: usize = 64;

// ============================================================================
// Token Generation
// ============================================================================

/// Generator for raw credential tokens
pub struct TokenGenerator;

impl TokenGenerator {
    /// Generate a raw token: the wire prefix followed by 64 hex characters
    pub fn generate(wire_prefix: &str) -> String {
        let mut bytes = [0u8; TOKEN_RANDOM_LEN / 2];
        rand::thread_rng().fill(&mut bytes);
        format!("{}{}", wire_prefix, hex::encode(bytes))
    }

    /// The non-unique lookup index for a raw token
    pub fn lookup_prefix(raw_token: &str) -> String {
        raw_token.chars().take(LOOKUP_PREFIX_LEN).collect()
    }
}

// ============================================================================
// Token Hashing
// ============================================================================

/// Slow one-way hasher for raw tokens (Argon2id)
pub struct TokenHasher {
    argon2: Argon2<'static>,
}

impl TokenHasher {
    /// Create a hasher with the library's recommended parameters
    pub fn new() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }

    /// Hash a raw token for storage
    pub fn hash(&self, raw_token: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(raw_token.as_bytes(), &salt)
            .map_err(|e| GatewayError::internal(format!("token hashing failed: {e}")))?;
        Ok(hash.to_string())
    }

    /// Verify a raw token against a stored hash.
    ///
    /// A malformed stored hash verifies as false rather than erroring: the
    /// caller must not learn which candidate failed or why.
    pub fn verify(&self, stored_hash: &str, raw_token: &str) -> bool {
        match PasswordHash::new(stored_hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(raw_token.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

impl Default for TokenHasher {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Key Issuance
// ============================================================================

/// Issue a new credential for a user.
///
/// Returns the stored [`Key`] and the raw token. The raw token is shown to
/// the caller exactly once; only its hash and lookup prefix persist.
pub fn generate_key(
    hasher: &TokenHasher,
    wire_prefix: &str,
    user_id: impl Into<String>,
    name: impl Into<String>,
    scopes: Vec<String>,
    now: DateTime<Utc>,
) -> Result<(Key, String)> {
    let raw_token = TokenGenerator::generate(wire_prefix);
    let key = Key {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.into(),
        name: name.into(),
        hash: hasher.hash(&raw_token)?,
        prefix: TokenGenerator::lookup_prefix(&raw_token),
        scopes,
        expires_at: None,
        revoked_at: None,
        created_at: now,
        last_used: None,
    };
    Ok((key, raw_token))
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Constant-time string comparison to prevent timing attacks
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}
