//! Credential Authentication
//!
//! Everything between a raw bearer token on the wire and a verified
//! principal: token generation and hashing, prefix-indexed validation,
//! scope matching, and the best-effort last-used pipeline.

/// Token generation, hashing, and verification
pub mod crypto;

/// Path-pattern scope matching
pub mod scope;

/// Bounded lossy last-used coalescer
pub mod touch;

/// The credential validation pipeline
pub mod validator;

pub use crypto::{
    constant_time_compare, generate_key, TokenGenerator, TokenHasher, LOOKUP_PREFIX_LEN,
    TOKEN_RANDOM_LEN,
};
pub use scope::{has_scope, matches_scope};
pub use touch::TouchQueue;
pub use validator::{KeyValidator, ValidationFailure, ValidationOutcome};
