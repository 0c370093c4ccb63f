use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use rand::Rng;
use sentinel_notify::utils::{redact_sensitive_json, truncate_string};
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write;
use std::time::Instant;
use tracing::Instrument;

pub const TRACE_HEADER: &str = "x-trace-id";

/// Per-request trace id, stored in request extensions and echoed in every
/// response envelope and in the `X-Trace-Id` header.
#[derive(Clone)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    let mut s = String::with_capacity(16);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// A caller's `X-Trace-Id` is kept when it is 8 to 64 ASCII alphanumerics
/// or dashes, so one id follows an alert across services.
fn incoming_trace_id(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(TRACE_HEADER)?.to_str().ok()?.trim();
    let valid = (8..=64).contains(&value.len())
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    valid.then(|| value.to_string())
}

const MAX_BODY_LOG_CHARS: usize = 200;
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// What a request addresses, read from `/v1/<collection>[/<id>][/<action>]`.
#[derive(Debug, PartialEq, Eq)]
struct Target<'a> {
    resource: &'static str,
    id: Option<&'a str>,
    action: Option<String>,
}

fn target(path: &str) -> Target<'_> {
    let mut segments = path.trim_matches('/').split('/');
    let resource = match (segments.next(), segments.next()) {
        (Some("v1"), Some("alerts")) => "alert",
        (Some("v1"), Some("alert-rules")) => "rule",
        (Some("v1"), Some("channels")) => "channel",
        (Some("v1"), Some("monitoring")) => "monitoring",
        (Some("v1"), Some("openapi.json")) => "openapi",
        _ => "-",
    };
    let rest: Vec<&str> = segments.filter(|s| !s.is_empty()).collect();
    // Entity ids are snowflakes; anything else is a sub-route.
    let (id, rest) = match rest.split_first() {
        Some((first, tail)) if first.bytes().all(|b| b.is_ascii_digit()) => (Some(*first), tail),
        _ => (None, rest.as_slice()),
    };
    let action = (!rest.is_empty()).then(|| rest.join("/"));
    Target {
        resource,
        id,
        action,
    }
}

/// Request body as logged: JSON is redacted, channel configs are hidden
/// whole since webhook URLs embed their credentials.
fn request_body_snippet(resource: &str, bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    let text = match serde_json::from_slice::<Value>(bytes) {
        Ok(mut json) => {
            if resource == "channel" {
                if let Some(config) = json.get_mut("config") {
                    *config = Value::String("***".to_string());
                }
            }
            redact_sensitive_json(&json).to_string()
        }
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    };
    truncate_string(&text, MAX_BODY_LOG_CHARS)
}

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    err_code: Option<i64>,
    err_msg: Option<String>,
}

/// Envelope code and message from a JSON response; `data` is never logged.
fn envelope(bytes: &[u8]) -> Envelope {
    serde_json::from_slice(bytes).unwrap_or_default()
}

/// Request/response logging middleware. Everything the handler logs runs
/// inside an `http` span carrying the trace id.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = incoming_trace_id(req.headers()).unwrap_or_else(generate_trace_id);
    req.extensions_mut().insert(TraceId(trace_id.clone()));

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    let Target {
        resource,
        id,
        action,
    } = target(&path);
    let resource_id = id.unwrap_or("-").to_string();
    let action = action.unwrap_or_else(|| "-".to_string());

    let span = tracing::info_span!(
        "http",
        trace_id = %trace_id,
        resource,
        resource_id = %resource_id
    );

    let (req, body_snippet) = if matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
        let (parts, body) = req.into_parts();
        let bytes = axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES)
            .await
            .unwrap_or_default();
        let snippet = request_body_snippet(resource, &bytes);
        (Request::from_parts(parts, Body::from(bytes)), snippet)
    } else {
        (req, String::new())
    };

    span.in_scope(|| {
        tracing::info!(
            method = %method,
            path = %path,
            query = %query,
            action = %action,
            body = %body_snippet,
            "--> request"
        );
    });

    let start = Instant::now();
    let response = next.run(req).instrument(span.clone()).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;
    let status = response.status();

    let (parts, body) = response.into_parts();
    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    let Envelope { err_code, err_msg } = if resource == "openapi" {
        Envelope::default()
    } else {
        envelope(&body_bytes)
    };
    let err_code = err_code.unwrap_or(-1);
    let err_msg = err_msg.unwrap_or_default();

    span.in_scope(|| {
        let status = status.as_u16();
        if (500..600).contains(&status) {
            tracing::error!(status, elapsed_ms, err_code, err_msg = %err_msg, "<-- response");
        } else if (400..500).contains(&status) {
            tracing::warn!(status, elapsed_ms, err_code, err_msg = %err_msg, "<-- response");
        } else {
            tracing::info!(status, elapsed_ms, err_code, "<-- response");
        }
    });

    let mut response = Response::from_parts(parts, Body::from(body_bytes));
    if let Ok(val) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_HEADER, val);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_is_sixteen_hex_chars() {
        let id = generate_trace_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn incoming_trace_id_is_kept_only_when_well_formed() {
        let mut headers = HeaderMap::new();
        assert_eq!(incoming_trace_id(&headers), None);

        headers.insert(TRACE_HEADER, HeaderValue::from_static("upstream-4f2a9c"));
        assert_eq!(incoming_trace_id(&headers).as_deref(), Some("upstream-4f2a9c"));

        headers.insert(TRACE_HEADER, HeaderValue::from_static("short"));
        assert_eq!(incoming_trace_id(&headers), None);

        headers.insert(TRACE_HEADER, HeaderValue::from_static("has spaces in it"));
        assert_eq!(incoming_trace_id(&headers), None);
    }

    #[test]
    fn target_reads_resource_id_and_action() {
        assert_eq!(
            target("/v1/alerts/7301/acknowledge"),
            Target {
                resource: "alert",
                id: Some("7301"),
                action: Some("acknowledge".to_string()),
            }
        );
        assert_eq!(
            target("/v1/alerts/recent"),
            Target {
                resource: "alert",
                id: None,
                action: Some("recent".to_string()),
            }
        );
        assert_eq!(
            target("/v1/alert-rules/42"),
            Target {
                resource: "rule",
                id: Some("42"),
                action: None,
            }
        );
        assert_eq!(
            target("/v1/monitoring/alerts/trend"),
            Target {
                resource: "monitoring",
                id: None,
                action: Some("alerts/trend".to_string()),
            }
        );
        assert_eq!(target("/health").resource, "-");
    }

    #[test]
    fn channel_config_never_reaches_the_log() {
        let body = br#"{"name":"ops","channel_type":"SLACK","config":{"webhook_url":"https://hooks.example/T0/B0/secret"}}"#;
        let snippet = request_body_snippet("channel", body);
        assert!(!snippet.contains("hooks.example"));
        assert!(snippet.contains("\"ops\""));

        let body = br#"{"headers":{"Authorization":"Bearer abc"}}"#;
        let snippet = request_body_snippet("alert", body);
        assert!(!snippet.contains("Bearer abc"));
    }

    #[test]
    fn request_body_is_truncated() {
        let body = format!(r#"{{"description":"{}"}}"#, "é".repeat(300));
        let snippet = request_body_snippet("alert", body.as_bytes());
        assert!(snippet.ends_with("[truncated]"));
        assert_eq!(request_body_snippet("alert", b""), "");
        assert_eq!(request_body_snippet("alert", b"plain"), "plain");
    }

    #[test]
    fn envelope_fields_are_read_without_data() {
        let env = envelope(br#"{"err_code":1004,"err_msg":"Alert '1' not found","trace_id":"t","data":null}"#);
        assert_eq!(env.err_code, Some(1004));
        assert_eq!(env.err_msg.as_deref(), Some("Alert '1' not found"));
        assert_eq!(envelope(b"not json").err_code, None);
    }
}
