//! Provider rate-limit usage snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Limit kinds tracked per snapshot.
pub const LIMIT_KINDS: [&str; 4] = ["requests", "input_tokens", "output_tokens", "tokens"];

/// One poll's worth of rate-limit headers for a provider. Append-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSnapshot {
    #[serde(default)]
    pub id: i64,
    pub provider: String,
    pub polled_at: Option<DateTime<Utc>>,

    pub requests_limit: Option<i64>,
    pub requests_remaining: Option<i64>,
    pub requests_reset: Option<String>,

    pub input_tokens_limit: Option<i64>,
    pub input_tokens_remaining: Option<i64>,
    pub input_tokens_reset: Option<String>,

    pub output_tokens_limit: Option<i64>,
    pub output_tokens_remaining: Option<i64>,
    pub output_tokens_reset: Option<String>,

    pub tokens_limit: Option<i64>,
    pub tokens_remaining: Option<i64>,
    pub tokens_reset: Option<String>,

    /// Model named in the minimal poll call.
    pub poll_model: Option<String>,
    /// HTTP status of the poll; 0 means the request never completed.
    pub poll_status_code: i64,
    pub error_message: Option<String>,
}

impl UsageSnapshot {
    /// The `remaining` value for a limit kind.
    #[must_use]
    pub fn remaining(&self, kind: &str) -> Option<i64> {
        match kind {
            "requests" => self.requests_remaining,
            "input_tokens" => self.input_tokens_remaining,
            "output_tokens" => self.output_tokens_remaining,
            "tokens" => self.tokens_remaining,
            _ => None,
        }
    }

    /// Limit kinds whose remaining value is zero.
    #[must_use]
    pub fn kinds_at_limit(&self) -> Vec<&'static str> {
        LIMIT_KINDS
            .iter()
            .filter(|kind| matches!(self.remaining(kind), Some(v) if v <= 0))
            .copied()
            .collect()
    }

    /// Limit kinds whose remaining value strictly increased since `prior`.
    #[must_use]
    pub fn kinds_reset_since(&self, prior: &Self) -> Vec<&'static str> {
        LIMIT_KINDS
            .iter()
            .filter(|kind| {
                matches!(
                    (self.remaining(kind), prior.remaining(kind)),
                    (Some(current), Some(previous)) if current > previous
                )
            })
            .copied()
            .collect()
    }
}
