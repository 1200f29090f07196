//! Per-tenant rate limiting
//!
//! Fixed-window counters keyed by (organization, request class). The counter
//! increments before the admission decision, so two racing requests at the
//! threshold cannot both slip through. Every response carries the standard
//! X-RateLimit headers; a rejection adds Retry-After.

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use axum::http::HeaderMap;
use pbx_core::OrganizationId;
use pbx_store::CacheStore;

const WINDOW: Duration = Duration::from_secs(60);

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Traffic classes with independent budgets per organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// CDR and other non-voice webhook deliveries.
    Webhook,
    /// Live-call voice webhooks.
    Voice,
    /// Failed bearer checks; the tight budget throttles token guessing.
    Auth,
}

impl RequestClass {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Voice => "voice",
            Self::Auth => "auth",
        }
    }

    /// Requests allowed per window.
    pub fn limit(&self) -> u64 {
        match self {
            Self::Webhook => 600,
            Self::Voice => 1200,
            Self::Auth => 10,
        }
    }
}

/// Outcome of one admission check, with everything needed for headers.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_in: Duration,
}

impl RateDecision {
    /// X-RateLimit-* on every response; Retry-After only on rejection.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, int_header(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, int_header(self.remaining));
        headers.insert(X_RATELIMIT_RESET, int_header(reset_secs(self.reset_in)));
        if !self.allowed {
            headers.insert(RETRY_AFTER, int_header(reset_secs(self.reset_in)));
        }
    }
}

fn int_header(v: u64) -> HeaderValue {
    HeaderValue::from_str(&v.to_string()).unwrap_or(HeaderValue::from_static("0"))
}

/// Seconds until reset, rounded up so Retry-After is never zero early.
fn reset_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

pub struct RateLimiter {
    cache: Arc<dyn CacheStore>,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    /// Count this request against the (org, class) window and decide
    /// admission. Counter failure is fail-open with a full-window decision.
    pub async fn check(&self, org: OrganizationId, class: RequestClass) -> RateDecision {
        let key = format!("rate:{}:{}", org, class.as_str());
        let limit = class.limit();

        let window = match self.cache.incr(&key, WINDOW).await {
            Ok(window) => window,
            Err(err) => {
                tracing::warn!(org_id = %org, class = class.as_str(), error = %err, "rate counter failed, admitting");
                return RateDecision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    reset_in: WINDOW,
                };
            }
        };

        let allowed = window.count <= limit;
        if !allowed {
            tracing::warn!(
                org_id = %org,
                class = class.as_str(),
                count = window.count,
                limit,
                "rate limit exceeded"
            );
        }
        RateDecision {
            allowed,
            limit,
            remaining: limit.saturating_sub(window.count),
            reset_in: window.reset_in,
        }
    }
}
