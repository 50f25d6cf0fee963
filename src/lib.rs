//! # APIGATE - API Gateway Metering Core
//!
//! The in-process control plane that sits on the hot path of every request
//! to a paid HTTP API: credential validation, sharded rate limiting,
//! per-period quota accounting, and a durable usage record suitable for
//! billing against subscription plans.
//!
//! ## Architecture
//!
//! - `auth`: Token generation, hashing, validation, scopes, last-used touch
//! - `ratelimit`: Sharded fixed-window-with-burst limiter and HTTP headers
//! - `quota`: Sharded per-(user, month) counters with read-through backfill
//! - `usage`: Usage event store, monthly history, batched recorder
//! - `plan`: Endpoint cost resolution and plan lookup
//! - `store`: Persistence ports and in-memory reference implementations
//! - `billing`: Payment provider port and webhook signature contract
//! - `gateway`: The composed admission pipeline
//!
//! The HTTP surface, proxying, and concrete payment providers live outside
//! this crate; everything here is callable from any thread at any time.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Error taxonomy and machine codes
pub mod error;

// Configuration shapes and defaults
pub mod config;

// Domain model
pub mod model;

// Credential authentication
pub mod auth;

// Sharded rate limiting
pub mod ratelimit;

// Quota accounting
pub mod quota;

// Usage pipeline
pub mod usage;

// Plan and cost resolution
pub mod plan;

// Persistence ports
pub mod store;

// Payment provider port
pub mod billing;

// Admission pipeline composition
pub mod gateway;

// Re-export commonly used types
pub use config::GatewayConfig;
pub use error::{ErrorCode, GatewayError, Result};
pub use gateway::{Admission, AdmissionVerdict, Gateway, GatewayBuilder, RequestOutcome};
pub use model::{
    EndpointCost, Key, Plan, QuotaState, RateLimitConfig, UsageEvent, UsageSummary, User,
    UserStatus, WindowState,
};

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
