//! HTTP handlers for the call-router webhook API
//!
//! Every voice endpoint runs the same admission chain: parse the event,
//! identify the tenant, count it against the rate window, check the bearer
//! token, then consult the idempotency cache. Only then does the routing
//! engine run, and its CXML is recorded for replay before being returned.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use pbx_core::OrganizationId;
use pbx_store::Organization;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::cxml::CxmlResponse;
use crate::idempotency::{dedup_key, RecordedResponse};
use crate::rate_limit::{RateDecision, RequestClass};
use crate::webhook::{parse_cdr_domain, parse_voice_event, VoiceEvent};
use crate::{AppState, Error};

const XML_CONTENT_TYPE: &str = "application/xml";

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Ready check response
#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub database: bool,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "call-router".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    // A cheap scoped lookup exercises the store end to end
    let db_ok = state
        .store
        .organization(OrganizationId(Uuid::nil()))
        .await
        .is_ok();
    Json(ReadyResponse {
        ready: db_ok,
        database: db_ok,
    })
}

// ============================================
// Voice webhook admission
// ============================================

struct Admitted {
    org: Organization,
    event: VoiceEvent,
    decision: RateDecision,
    dedup: String,
}

/// Run the trust chain for one voice webhook. `Err` carries the early
/// response (apology CXML, 401, 429, replay) ready to send.
async fn admit_voice(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
    path: &str,
    event_type: &str,
) -> std::result::Result<Admitted, Response> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let event = match parse_voice_event(content_type, body) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(path, error = %err, "unparsable voice webhook");
            return Err(Error::InvalidRequest(err.to_string()).into_response());
        }
    };

    let org = match state
        .trust
        .identify_voice_org(event.to.as_deref(), event.from.as_deref())
        .await
    {
        Ok(Some(org)) => org,
        Ok(None) => {
            // No tenant, no routing: the caller still deserves words
            tracing::info!(path, call_id = event.call_id_str(), "unidentified tenant");
            return Err(xml_response(
                CxmlResponse::unavailable().to_xml(),
                None,
            ));
        }
        Err(err) => {
            tracing::error!(path, error = %err, "tenant identification failed");
            return Err(xml_response(CxmlResponse::unavailable().to_xml(), None));
        }
    };

    let decision = state.rate_limiter.check(org.id, RequestClass::Voice).await;
    if !decision.allowed {
        return Err(too_many_requests(&decision));
    }

    if let Err(failure) = state.trust.authenticate(&org, headers) {
        tracing::warn!(path, org_id = %org.id, ?failure, "webhook auth rejected");
        // Each failed check burns a slot in the much tighter auth window
        let auth_decision = state.rate_limiter.check(org.id, RequestClass::Auth).await;
        if !auth_decision.allowed {
            return Err(too_many_requests(&auth_decision));
        }
        let mut response = Error::from(failure.into_error(org.id)).into_response();
        decision.apply_headers(response.headers_mut());
        return Err(response);
    }

    let dedup = dedup_key(headers, event.call_id.as_ref().map(|c| c.as_str()), event_type, body);
    if let Some(recorded) = state.idempotency.replay(&dedup).await {
        return Err(replayed_response(recorded, &decision));
    }

    Ok(Admitted {
        org,
        event,
        decision,
        dedup,
    })
}

async fn respond_with_cxml(state: &AppState, admitted: &Admitted, cxml: CxmlResponse) -> Response {
    let xml = cxml.to_xml();
    state
        .idempotency
        .record(&admitted.dedup, 200, XML_CONTENT_TYPE, xml.as_bytes())
        .await;
    xml_response(xml, Some(&admitted.decision))
}

// ============================================
// Voice webhook handlers
// ============================================

pub async fn inbound_voice(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let admitted = match admit_voice(&state, &headers, &body, "/webhooks/voice", "voice").await {
        Ok(admitted) => admitted,
        Err(early) => return early,
    };

    let to = admitted.event.to.clone().unwrap_or_default();
    let cxml = state
        .engine
        .route_inbound(admitted.org.id, admitted.event.call_id_str(), &to)
        .await;
    respond_with_cxml(&state, &admitted, cxml).await
}

#[derive(Deserialize)]
pub struct IvrQuery {
    #[serde(default)]
    pub turn: u8,
}

pub async fn ivr_input(
    State(state): State<AppState>,
    Path(menu_id): Path<Uuid>,
    Query(query): Query<IvrQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let event_type = format!("ivr:{}:{}", menu_id, query.turn);
    let admitted =
        match admit_voice(&state, &headers, &body, "/webhooks/voice/ivr", &event_type).await {
            Ok(admitted) => admitted,
            Err(early) => return early,
        };

    let cxml = state
        .engine
        .handle_ivr_input(
            admitted.org.id,
            admitted.event.call_id_str(),
            menu_id,
            admitted.event.digits.as_deref(),
            query.turn,
        )
        .await;
    respond_with_cxml(&state, &admitted, cxml).await
}

#[derive(Deserialize)]
pub struct RingGroupQuery {
    #[serde(default)]
    pub member: usize,
    #[serde(default)]
    pub attempt: u32,
}

pub async fn ring_group_callback(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Query(query): Query<RingGroupQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Each attempt is its own idempotency scope so a redelivered callback
    // replays instead of advancing the plan twice
    let event_type = format!("ring:{}:{}:{}", group_id, query.member, query.attempt);
    let admitted = match admit_voice(
        &state,
        &headers,
        &body,
        "/webhooks/voice/ring-group",
        &event_type,
    )
    .await
    {
        Ok(admitted) => admitted,
        Err(early) => return early,
    };

    let cxml = state
        .engine
        .handle_ring_group_callback(
            admitted.org.id,
            admitted.event.call_id_str(),
            group_id,
            query.member,
            query.attempt,
            admitted.event.dial_status,
        )
        .await;
    respond_with_cxml(&state, &admitted, cxml).await
}

// ============================================
// CDR webhook
// ============================================

/// CDRs are identified by the owning domain UUID carried in the payload; no
/// Authorization header is required. The response is a JSON ack, not CXML.
pub async fn cdr(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let domain = match parse_cdr_domain(&body) {
        Ok(domain) => domain,
        Err(err) => {
            tracing::warn!(error = %err, "unparsable cdr payload");
            return Error::InvalidRequest(err.to_string()).into_response();
        }
    };

    let org = match state.trust.identify_cdr_org(domain).await {
        Ok(Some(org)) => org,
        Ok(None) => {
            // Ack unidentified CDRs so the platform does not retry forever
            tracing::warn!(?domain, "cdr for unknown domain, ignoring");
            return Json(json!({"status": "ignored"})).into_response();
        }
        Err(err) => {
            tracing::error!(error = %err, "cdr tenant identification failed");
            return Error::Database(err).into_response();
        }
    };

    let decision = state.rate_limiter.check(org.id, RequestClass::Webhook).await;
    if !decision.allowed {
        return too_many_requests(&decision);
    }

    let dedup = dedup_key(&headers, None, "cdr", &body);
    if let Some(recorded) = state.idempotency.replay(&dedup).await {
        return replayed_response(recorded, &decision);
    }

    tracing::info!(org_id = %org.id, bytes = body.len(), "cdr accepted");
    let ack = json!({"status": "accepted"});
    let ack_bytes = ack.to_string();
    state
        .idempotency
        .record(&dedup, 200, "application/json", ack_bytes.as_bytes())
        .await;

    let mut response = Json(ack).into_response();
    decision.apply_headers(response.headers_mut());
    response
}

// ============================================
// Response builders
// ============================================

fn xml_response(xml: String, decision: Option<&RateDecision>) -> Response {
    let mut response =
        ([(header::CONTENT_TYPE, XML_CONTENT_TYPE)], xml).into_response();
    if let Some(decision) = decision {
        decision.apply_headers(response.headers_mut());
    }
    response
}

fn replayed_response(recorded: RecordedResponse, decision: &RateDecision) -> Response {
    let status = StatusCode::from_u16(recorded.status).unwrap_or(StatusCode::OK);
    let mut response = if recorded.content_type.is_empty() {
        status.into_response()
    } else {
        (
            status,
            [(header::CONTENT_TYPE, recorded.content_type)],
            recorded.body,
        )
            .into_response()
    };
    decision.apply_headers(response.headers_mut());
    response
}

fn too_many_requests(decision: &RateDecision) -> Response {
    let body = Json(json!({
        "error": "rate limit exceeded",
        "code": 429
    }));
    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    decision.apply_headers(response.headers_mut());
    response
}
