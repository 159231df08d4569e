//! Engine Error Taxonomy
//!
//! Every failure surfaced by account creation or a chat send falls into one
//! of these categories. The split matters to callers: configuration and
//! protocol errors point at a bug or a service contract change, proxy
//! exhaustion is recoverable by loading more proxies or clearing the
//! blacklist, and rate limiting and connection failures are transient.

use thiserror::Error;

/// Errors surfaced by [`ConversationEngine`](crate::ConversationEngine) and
/// [`AccountManager`](crate::AccountManager) operations.
///
/// No variant is fatal to the engine: a failed call leaves it usable, and a
/// later call may succeed once the cause (missing proxies, a rate-limit
/// window, a bad option value) is addressed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// An option value is invalid (e.g. max messages per account below 1).
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// No non-blacklisted proxy remains for account creation.
    #[error("no viable proxy remains after {attempts} attempt(s)")]
    ProxyExhausted {
        /// Account-creation attempts performed before giving up.
        attempts: u32,
    },

    /// The service answered 429 and the retry budget is spent.
    #[error("rate limited by the service after {attempts} attempt(s)")]
    RateLimited {
        /// Account-creation attempts performed before giving up.
        attempts: u32,
    },

    /// Network-level failure: refused, reset, timed out, or unresolvable.
    #[error("connection failed: {message}")]
    Connection {
        /// Transport description of the failure.
        message: String,
    },

    /// The service broke its wire contract (unexpected status code or a
    /// malformed response body).
    #[error("remote protocol violation: {message}")]
    RemoteProtocol {
        /// What the service sent instead of the expected shape.
        message: String,
    },

    /// A send was attempted with auto-rotation disabled and no current
    /// account.
    #[error("no account available and auto-rotation is disabled")]
    NoAccount,
}

impl EngineError {
    /// Whether waiting and retrying the same call unchanged could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Connection { .. } | Self::ProxyExhausted { .. }
        )
    }
}
