//! Webhook idempotency
//!
//! Voice platforms redeliver webhooks on timeouts and network flaps. A
//! replay within the TTL gets the recorded response verbatim instead of
//! re-executing the routing decision (which may have side effects like
//! advancing a ring group). Cache trouble is fail-open: losing dedup for a
//! window beats dropping live calls.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use pbx_store::CacheStore;
use sha2::{Digest, Sha256};

pub const IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Responses above this size are recorded status-only and replay as an
/// empty 200.
pub const MAX_RECORDED_BODY: usize = 64 * 1024;

const HEADER: &str = "x-idempotency-key";

/// Dedup key precedence: explicit header, then call identity, then a body
/// digest. Event type is part of the call identity so an inbound event and
/// its CDR never collide.
pub fn dedup_key(
    headers: &HeaderMap,
    call_id: Option<&str>,
    event_type: &str,
    body: &[u8],
) -> String {
    if let Some(key) = headers.get(HEADER).and_then(|v| v.to_str().ok()) {
        if !key.is_empty() {
            return format!("idem:hdr:{}", key);
        }
    }
    if let Some(call_id) = call_id.filter(|c| !c.is_empty()) {
        return format!("idem:call:{}:{}", call_id, event_type);
    }
    let digest = Sha256::digest(body);
    format!("idem:body:{:x}", digest)
}

/// A previously recorded response, ready to replay.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RecordedResponse {
    pub status: u16,
    pub content_type: String,
    /// Empty when the original body exceeded [`MAX_RECORDED_BODY`].
    pub body: Vec<u8>,
}

pub struct IdempotencyLayer {
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl IdempotencyLayer {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self {
            cache,
            ttl: IDEMPOTENCY_TTL,
        }
    }

    #[cfg(test)]
    pub fn with_ttl(cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Look up a prior delivery. Cache failure reads as a miss.
    pub async fn replay(&self, key: &str) -> Option<RecordedResponse> {
        match self.cache.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<RecordedResponse>(&bytes) {
                Ok(recorded) => {
                    tracing::info!(key, status = recorded.status, "replaying recorded response");
                    Some(recorded)
                }
                Err(err) => {
                    tracing::warn!(key, error = %err, "unreadable idempotency record, treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(key, error = %err, "idempotency lookup failed, treating as miss");
                None
            }
        }
    }

    /// Record a computed response; if a racing duplicate got there first,
    /// its record stands. Oversized bodies are stored status-only and later
    /// replay as an empty success. Write failure is logged and swallowed.
    pub async fn record(&self, key: &str, status: u16, content_type: &str, body: &[u8]) {
        let recorded = if body.len() > MAX_RECORDED_BODY {
            tracing::debug!(key, size = body.len(), "response too large, recording status only");
            RecordedResponse {
                status: 200,
                content_type: String::new(),
                body: Vec::new(),
            }
        } else {
            RecordedResponse {
                status,
                content_type: content_type.to_string(),
                body: body.to_vec(),
            }
        };

        let bytes = match serde_json::to_vec(&recorded) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to encode idempotency record");
                return;
            }
        };
        // First writer wins: a racing duplicate must replay this record, not
        // overwrite it with its own independently computed response.
        match self.cache.put_if_absent(key, bytes, self.ttl).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(key, "idempotency record already present, keeping the first");
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "idempotency record write failed, continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbx_store::MemoryCache;

    fn layer() -> IdempotencyLayer {
        IdempotencyLayer::new(Arc::new(MemoryCache::new()))
    }

    fn headers_with_key(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-idempotency-key", key.parse().unwrap());
        headers
    }

    #[test]
    fn explicit_header_wins_over_call_identity() {
        let key = dedup_key(&headers_with_key("abc"), Some("CA1"), "voice", b"body");
        assert_eq!(key, "idem:hdr:abc");
    }

    #[test]
    fn call_identity_includes_event_type() {
        let voice = dedup_key(&HeaderMap::new(), Some("CA1"), "voice", b"body");
        let cdr = dedup_key(&HeaderMap::new(), Some("CA1"), "cdr", b"body");
        assert_eq!(voice, "idem:call:CA1:voice");
        assert_ne!(voice, cdr);
    }

    #[test]
    fn anonymous_events_fall_back_to_body_digest() {
        let a = dedup_key(&HeaderMap::new(), None, "voice", b"payload-1");
        let b = dedup_key(&HeaderMap::new(), None, "voice", b"payload-1");
        let c = dedup_key(&HeaderMap::new(), None, "voice", b"payload-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("idem:body:"));
    }

    #[tokio::test]
    async fn replay_returns_recorded_response_verbatim() {
        let layer = layer();
        layer
            .record("idem:call:CA1:voice", 200, "application/xml", b"<Response/>")
            .await;

        let recorded = layer.replay("idem:call:CA1:voice").await.unwrap();
        assert_eq!(recorded.status, 200);
        assert_eq!(recorded.content_type, "application/xml");
        assert_eq!(recorded.body, b"<Response/>");
    }

    #[tokio::test]
    async fn first_delivery_is_a_miss() {
        let layer = layer();
        assert!(layer.replay("idem:call:CA9:voice").await.is_none());
    }

    #[tokio::test]
    async fn duplicate_deliveries_keep_the_first_recorded_response() {
        // Two duplicates racing past replay() can both compute an answer
        // (round-robin picks a random start member); only one may be kept.
        let layer = layer();
        layer
            .record("idem:call:CA1:voice", 200, "application/xml", b"<Dial>alice</Dial>")
            .await;
        layer
            .record("idem:call:CA1:voice", 200, "application/xml", b"<Dial>bob</Dial>")
            .await;

        let recorded = layer.replay("idem:call:CA1:voice").await.unwrap();
        assert_eq!(recorded.body, b"<Dial>alice</Dial>");
    }

    #[tokio::test]
    async fn oversized_body_replays_as_empty_success() {
        let layer = layer();
        let huge = vec![b'x'; MAX_RECORDED_BODY + 1];
        layer
            .record("idem:call:CA1:voice", 200, "application/xml", &huge)
            .await;

        let recorded = layer.replay("idem:call:CA1:voice").await.unwrap();
        assert_eq!(recorded.status, 200);
        assert!(recorded.body.is_empty());
    }

    #[tokio::test]
    async fn records_expire_after_ttl() {
        let layer = IdempotencyLayer::with_ttl(
            Arc::new(MemoryCache::new()),
            Duration::from_millis(10),
        );
        layer
            .record("idem:call:CA1:voice", 200, "application/xml", b"<Response/>")
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(layer.replay("idem:call:CA1:voice").await.is_none());
    }
}
