//! Upstream chat failures and how the service reacts to them.
//!
//! Each failure is classified once, where the HTTP response is read. The kind
//! decides what happens next:
//! - transient (`RateLimited`, `Upstream`, `Network`): retried against the same
//!   model with backoff
//! - `ModelUnavailable`: the model cannot be served at all; the chat service
//!   re-resolves to another model
//! - everything else is returned to the caller

use std::fmt;
use std::time::Duration;

/// Body fragments OpenRouter uses when a model has no usable provider.
const UNAVAILABLE_MARKERS: &[&str] = &[
    "no endpoints found",
    "is not a valid model id",
    "model not found",
    "no allowed providers",
];

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 429
    RateLimited,
    /// 5xx, or a provider failure relayed by OpenRouter
    Upstream,
    /// 404 or "No endpoints found": retired, renamed or unroutable model
    ModelUnavailable,
    /// 402, the account is out of credit
    InsufficientCredits,
    /// Any other 4xx (bad payload, auth)
    Rejected,
    /// Connect failure or timeout
    Network,
    /// The response could not be decoded
    Malformed,
}

impl LlmErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(self, Self::RateLimited | Self::Upstream | Self::Network)
    }

    /// Another model may succeed where this one cannot.
    pub fn should_fallback(self) -> bool {
        matches!(self, Self::ModelUnavailable)
    }

    fn base_delay(self) -> Duration {
        match self {
            Self::RateLimited => Duration::from_secs(4),
            Self::Upstream => Duration::from_secs(2),
            _ => Duration::from_secs(1),
        }
    }
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RateLimited => "rate limited",
            Self::Upstream => "upstream failure",
            Self::ModelUnavailable => "model unavailable",
            Self::InsufficientCredits => "insufficient credits",
            Self::Rejected => "request rejected",
            Self::Network => "network error",
            Self::Malformed => "malformed response",
        };
        f.write_str(s)
    }
}

/// Classify a failed OpenRouter response from its status and body.
///
/// Unavailability markers win over the status: OpenRouter reports unroutable
/// models with 400, 404 or even 503 depending on the path taken.
pub fn classify(status: u16, body: &str) -> LlmErrorKind {
    let lowered = body.to_lowercase();
    if UNAVAILABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return LlmErrorKind::ModelUnavailable;
    }
    match status {
        429 => LlmErrorKind::RateLimited,
        402 => LlmErrorKind::InsufficientCredits,
        404 => LlmErrorKind::ModelUnavailable,
        400..=499 => LlmErrorKind::Rejected,
        _ => LlmErrorKind::Upstream,
    }
}

#[derive(Debug, Clone)]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub status_code: Option<u16>,
    pub message: String,
    /// From the Retry-After header
    pub retry_after: Option<Duration>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        Self {
            kind: classify(status, body),
            status_code: Some(status),
            message: body.to_string(),
            retry_after,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Malformed, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    pub fn should_fallback(&self) -> bool {
        self.kind.should_fallback()
    }

    /// Delay before retry number `attempt` (0-based): Retry-After when the
    /// server sent one, else a per-kind base doubled per attempt. Capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = match self.retry_after {
            Some(delay) => delay,
            None => self
                .kind
                .base_delay()
                .saturating_mul(2u32.saturating_pow(attempt)),
        };
        delay.min(MAX_BACKOFF)
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(code) = self.status_code {
            write!(f, " (HTTP {})", code)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for LlmError {}

/// Bounds on retrying one model.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Wall-clock budget across all attempts
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            budget: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// How long to wait before retrying after `error`, or `None` when the
    /// error should be surfaced.
    pub fn next_delay(
        &self,
        error: &LlmError,
        attempt: u32,
        elapsed: Duration,
    ) -> Option<Duration> {
        if !error.is_transient() || attempt >= self.max_retries {
            return None;
        }
        let remaining = self.budget.saturating_sub(elapsed);
        if remaining.is_zero() {
            return None;
        }
        Some(error.backoff(attempt).min(remaining))
    }
}
