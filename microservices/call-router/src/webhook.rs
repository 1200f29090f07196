//! Webhook payload parsing
//!
//! Voice platforms post either JSON or `application/x-www-form-urlencoded`
//! bodies, and field casing differs between event sources (`To` vs `to`,
//! `CallSid` vs `call_id`). Everything is folded into one [`VoiceEvent`]
//! here so the rest of the router never touches raw payloads.

use pbx_core::CallId;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Outcome of a `<Dial>` attempt, reported back on the action callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialStatus {
    Completed,
    Answered,
    Busy,
    NoAnswer,
    Failed,
    Canceled,
}

impl DialStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace(['-', '_'], "") {
            s if s == "completed" => Some(Self::Completed),
            s if s == "answered" => Some(Self::Answered),
            s if s == "busy" => Some(Self::Busy),
            s if s == "noanswer" => Some(Self::NoAnswer),
            s if s == "failed" => Some(Self::Failed),
            s if s == "canceled" || s == "cancelled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// The called party picked up; the bridge ran to completion.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Completed | Self::Answered)
    }
}

/// One normalized voice webhook event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceEvent {
    pub call_id: Option<CallId>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub digits: Option<String>,
    pub dial_status: Option<DialStatus>,
}

impl VoiceEvent {
    pub fn call_id_str(&self) -> &str {
        self.call_id.as_ref().map(|c| c.as_str()).unwrap_or("-")
    }
}

/// Case-insensitive pick of the first non-empty value among `names`.
fn pick(fields: &[(String, String)], names: &[&str]) -> Option<String> {
    for name in names {
        if let Some((_, v)) = fields.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            if !v.is_empty() {
                return Some(v.clone());
            }
        }
    }
    None
}

fn from_fields(fields: Vec<(String, String)>) -> VoiceEvent {
    VoiceEvent {
        call_id: pick(&fields, &["CallSid", "call_id", "session_id"]).map(CallId::new),
        from: pick(&fields, &["From", "caller"]),
        to: pick(&fields, &["To", "callee", "destination"]),
        digits: pick(&fields, &["Digits", "dtmf"]),
        dial_status: pick(&fields, &["DialCallStatus", "dial_status", "DialStatus"])
            .and_then(|s| DialStatus::parse(&s)),
    }
}

/// Flatten a JSON object into string fields. Nested objects and arrays are
/// skipped; voice events are flat.
fn json_fields(value: &Value) -> Result<Vec<(String, String)>, ParseError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ParseError::Malformed("expected a JSON object".into()))?;
    Ok(obj
        .iter()
        .filter_map(|(k, v)| {
            let s = match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            };
            s.map(|s| (k.clone(), s))
        })
        .collect())
}

/// Parse a voice webhook body. JSON and form encodings are accepted; an
/// absent content type is treated as form, which is what most platforms send.
pub fn parse_voice_event(content_type: Option<&str>, body: &[u8]) -> Result<VoiceEvent, ParseError> {
    let ct = content_type.unwrap_or("application/x-www-form-urlencoded");
    if ct.contains("json") {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ParseError::Malformed(e.to_string()))?;
        Ok(from_fields(json_fields(&value)?))
    } else if ct.contains("x-www-form-urlencoded") {
        let fields: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
            .map_err(|e| ParseError::Malformed(e.to_string()))?;
        Ok(from_fields(fields))
    } else {
        Err(ParseError::UnsupportedContentType(ct.to_string()))
    }
}

/// Pull the owning domain UUID out of a CDR payload. CDRs arrive as JSON
/// with the domain under `owner.domain.uuid`; a flat `domain_uuid` field is
/// accepted as well.
pub fn parse_cdr_domain(body: &[u8]) -> Result<Option<Uuid>, ParseError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| ParseError::Malformed(e.to_string()))?;
    let raw = value
        .pointer("/owner/domain/uuid")
        .or_else(|| value.get("domain_uuid"))
        .and_then(Value::as_str);
    Ok(raw.and_then(|s| Uuid::parse_str(s).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_form_encoded_event() {
        let body = b"CallSid=CA123&From=%2B15550001111&To=%2B15551234567&Digits=1";
        let event = parse_voice_event(Some("application/x-www-form-urlencoded"), body).unwrap();
        assert_eq!(event.call_id, Some(CallId::new("CA123")));
        assert_eq!(event.from.as_deref(), Some("+15550001111"));
        assert_eq!(event.to.as_deref(), Some("+15551234567"));
        assert_eq!(event.digits.as_deref(), Some("1"));
    }

    #[test]
    fn parses_json_event_with_lowercase_keys() {
        let body = br#"{"call_id":"CA123","from":"+15550001111","to":"3001"}"#;
        let event = parse_voice_event(Some("application/json"), body).unwrap();
        assert_eq!(event.call_id, Some(CallId::new("CA123")));
        assert_eq!(event.to.as_deref(), Some("3001"));
    }

    #[test]
    fn field_lookup_ignores_case() {
        let body = b"callsid=CA1&FROM=%2B15550001111&TO=%2B15551234567";
        let event = parse_voice_event(None, body).unwrap();
        assert_eq!(event.call_id, Some(CallId::new("CA1")));
        assert_eq!(event.to.as_deref(), Some("+15551234567"));
    }

    #[test]
    fn dial_status_parses_platform_spellings() {
        assert_eq!(DialStatus::parse("no-answer"), Some(DialStatus::NoAnswer));
        assert_eq!(DialStatus::parse("NoAnswer"), Some(DialStatus::NoAnswer));
        assert_eq!(DialStatus::parse("completed"), Some(DialStatus::Completed));
        assert_eq!(DialStatus::parse("exploded"), None);
        assert!(DialStatus::Answered.is_connected());
        assert!(!DialStatus::Busy.is_connected());
    }

    #[test]
    fn rejects_unsupported_content_type() {
        let err = parse_voice_event(Some("text/xml"), b"<a/>").unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedContentType(_)));
    }

    #[test]
    fn malformed_json_is_an_error_not_a_panic() {
        assert!(parse_voice_event(Some("application/json"), b"{oops").is_err());
        assert!(parse_voice_event(Some("application/json"), b"[1,2]").is_err());
    }

    #[test]
    fn cdr_domain_comes_from_nested_owner_path() {
        let domain = Uuid::new_v4();
        let body = serde_json::to_vec(&serde_json::json!({
            "owner": {"domain": {"uuid": domain.to_string()}},
            "duration": 42
        }))
        .unwrap();
        assert_eq!(parse_cdr_domain(&body).unwrap(), Some(domain));

        let flat = serde_json::to_vec(&serde_json::json!({"domain_uuid": domain.to_string()}))
            .unwrap();
        assert_eq!(parse_cdr_domain(&flat).unwrap(), Some(domain));
        assert_eq!(parse_cdr_domain(b"{}").unwrap(), None);
    }
}
