//! The request-path proxy: identity, admission, header hygiene, upstream
//! dispatch, and usage classification for everything under `/v1/*`.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::AppState;
use crate::config::RuntimeConfig;
use crate::constants::{
    CLIENT_SENSITIVE_HEADERS, DEFAULT_USER_AGENT, FORWARDED_HEADER_PREFIX, HOP_BY_HOP_HEADERS,
    MAX_BODY_BYTES, OPENROUTER_BASE_URL,
};
use crate::error::GatewayError;
use crate::identity::resolve_identity;
use crate::policy;
use crate::sse::relay_with_usage_capture;
use crate::syslog;
use crate::usage::{RequestLogEvent, RequestLogGuard, enqueue_request_log, process_usage};

pub async fn proxy(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let started = Instant::now();
    let started_at = Utc::now();

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let headers = req.headers().clone();

    let cfg = state.runtime.read().await.clone();

    let recorder = Recorder {
        state: state.clone(),
        path: path.clone(),
        method: method.to_string(),
        started_at,
        started,
    };

    if cfg.openrouter_api_key().is_empty() {
        let err = GatewayError::ConfigMissing(vec!["OPENROUTER_API_KEY".to_string()]);
        syslog::error(err.to_string());
        recorder.record(None, None, err.status().as_u16(), false).await;
        return err.into_response();
    }

    // Model discovery is read-only and identity-free; forward as-is.
    let fast_path = method == Method::GET && path == "/v1/models";

    let user_id = if fast_path {
        None
    } else {
        resolve_identity(&headers)
    };

    if let Some(uid) = &user_id {
        // Lazy provisioning, then warm the cache for the admission check.
        if let Err(e) = state.audit.ensure_user(uid).await {
            syslog::warn(format!("Failed to provision user {uid}: {e}"));
        }
        if let Err(e) = policy::get_user_cached(&state, uid).await {
            syslog::warn(format!("User cache warm failed for {uid}: {e}"));
        }
    }

    let body_bytes = match axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let err = GatewayError::BadRequest(format!("Failed to read request body: {e}"));
            recorder.record(user_id, None, err.status().as_u16(), false).await;
            return err.into_response();
        }
    };

    let is_write = method == Method::POST
        || method == Method::PUT
        || method == Method::PATCH
        || method == Method::DELETE;
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_lowercase().contains("application/json"))
        .unwrap_or(false);

    let mut parsed: Option<Value> = None;
    if !fast_path && is_write && is_json && !body_bytes.is_empty() {
        parsed = serde_json::from_slice(&body_bytes).ok();
    }

    let request_model = parsed
        .as_ref()
        .and_then(|v| v.get("model"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let log_model = parsed.as_ref().map(|_| request_model.clone());

    // Admission applies to identified JSON writes. Infrastructure failures
    // during the check degrade to allow; only explicit denials stop the
    // request here.
    if parsed.is_some()
        && let Some(uid) = &user_id
    {
        match policy::check_access(&state, uid).await {
            Ok(grant) => {
                if !grant.policy.allows_model(&request_model) {
                    let err = GatewayError::ModelNotAllowed;
                    recorder
                        .record(user_id, log_model, err.status().as_u16(), false)
                        .await;
                    return err.into_response();
                }
            }
            Err(err) if err.status() == StatusCode::FORBIDDEN => {
                recorder
                    .record(user_id, log_model, err.status().as_u16(), false)
                    .await;
                return err.into_response();
            }
            Err(e) => {
                syslog::warn(format!("Admission check degraded for {uid}: {e}"));
            }
        }
    }

    // Inject the tracking identity for the upstream, re-serializing the body.
    let body_bytes = match (&user_id, parsed.as_mut()) {
        (Some(uid), Some(value)) if value.is_object() => {
            value["user"] = Value::String(uid.clone());
            match serde_json::to_vec(value) {
                Ok(bytes) => bytes.into(),
                Err(_) => body_bytes,
            }
        }
        _ => body_bytes,
    };

    let suffix = path.strip_prefix("/v1/").unwrap_or("");
    let mut url = format!("{OPENROUTER_BASE_URL}/v1/{suffix}");
    if let Some(q) = &query {
        url.push('?');
        url.push_str(q);
    }

    let forward_headers = build_forward_headers(&headers, &cfg);

    let mut upstream_req = state
        .http_client
        .request(method.clone(), url)
        .headers(forward_headers);
    if !body_bytes.is_empty() {
        upstream_req = upstream_req.body(body_bytes);
    }

    let upstream = match upstream_req.send().await {
        Ok(response) => response,
        Err(e) => {
            syslog::warn(format!("Upstream dispatch failed for {path}: {e}"));
            let err = GatewayError::UpstreamUnavailable(e.to_string());
            recorder
                .record(user_id, log_model, err.status().as_u16(), false)
                .await;
            return err.into_response();
        }
    };

    let status = upstream.status();
    if !status.is_success() {
        syslog::warn(format!("Upstream returned {status} for {method} {path}"));
    }

    let response_headers = clean_response_headers(upstream.headers());

    let is_stream = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false);

    if is_stream {
        let guard = RequestLogGuard::new(
            state.clone(),
            recorder.event(user_id.clone(), log_model, status.as_u16(), true),
            started,
        );
        let relay = relay_with_usage_capture(
            upstream.bytes_stream(),
            state.clone(),
            user_id,
            request_model,
            guard,
        );

        let mut response = Response::new(Body::from_stream(relay));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        return response;
    }

    let body = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            syslog::warn(format!("Upstream body read failed for {path}: {e}"));
            let err = GatewayError::UpstreamUnavailable(e.to_string());
            recorder
                .record(user_id, log_model, err.status().as_u16(), false)
                .await;
            return err.into_response();
        }
    };

    if !fast_path
        && let Ok(value) = serde_json::from_slice::<Value>(&body)
        && let Some(usage) = value.get("usage")
        && usage.is_object()
    {
        let response_model = value
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&request_model);
        process_usage(&state, user_id.as_deref(), response_model, usage).await;
    }

    recorder
        .record(user_id, log_model, status.as_u16(), false)
        .await;

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

/// Per-request log context; every terminated request produces one row.
struct Recorder {
    state: Arc<AppState>,
    path: String,
    method: String,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Recorder {
    fn event(
        &self,
        user_id: Option<String>,
        model: Option<String>,
        status: u16,
        is_stream: bool,
    ) -> RequestLogEvent {
        RequestLogEvent {
            user_id,
            model,
            path: self.path.clone(),
            method: self.method.clone(),
            status,
            is_stream,
            latency_ms: 0,
            started_at: self.started_at,
            completed_at: self.started_at,
        }
    }

    async fn record(
        &self,
        user_id: Option<String>,
        model: Option<String>,
        status: u16,
        is_stream: bool,
    ) {
        let mut event = self.event(user_id, model, status, is_stream);
        event.latency_ms = i64::try_from(self.started.elapsed().as_millis())
            .unwrap_or(i64::MAX)
            .max(0);
        event.completed_at = Utc::now();
        enqueue_request_log(&self.state, &event).await;
    }
}

/// Drop hop-by-hop and client-sensitive headers from the inbound request,
/// then attach the upstream credentials and attribution headers.
fn build_forward_headers(inbound: &HeaderMap, cfg: &RuntimeConfig) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in inbound {
        if strip_from_forward(name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", cfg.openrouter_api_key())) {
        out.insert(header::AUTHORIZATION, value);
    }
    if !cfg.http_referer().is_empty()
        && let Ok(value) = HeaderValue::from_str(cfg.http_referer())
    {
        out.insert(HeaderName::from_static("http-referer"), value);
    }
    if !cfg.x_title().is_empty()
        && let Ok(value) = HeaderValue::from_str(cfg.x_title())
    {
        out.insert(HeaderName::from_static("x-title"), value);
    }
    if !out.contains_key(header::USER_AGENT) {
        out.insert(
            header::USER_AGENT,
            HeaderValue::from_static(DEFAULT_USER_AGENT),
        );
    }

    out
}

fn strip_from_forward(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name)
        || CLIENT_SENSITIVE_HEADERS.contains(&name)
        || name.starts_with(FORWARDED_HEADER_PREFIX)
}

/// Hop-by-hop plus framing headers the relay may invalidate by buffering.
fn clean_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in upstream {
        let lower = name.as_str();
        if HOP_BY_HOP_HEADERS.contains(&lower)
            || lower == "content-length"
            || lower == "content-encoding"
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg() -> RuntimeConfig {
        let mut map = HashMap::new();
        map.insert(
            "OPENROUTER_API_KEY".to_string(),
            "sk-or-test".to_string(),
        );
        map.insert(
            "OPENROUTER_HTTP_REFERER".to_string(),
            "https://chat.example.com".to_string(),
        );
        map.insert("OPENROUTER_X_TITLE".to_string(), "Example Chat".to_string());
        RuntimeConfig::from_map(map)
    }

    #[test]
    fn sensitive_and_hop_by_hop_headers_are_stripped() {
        let mut inbound = HeaderMap::new();
        for (name, value) in [
            ("cookie", "session=abc"),
            ("authorization", "Bearer client-jwt"),
            ("x-forwarded-for", "10.0.0.1"),
            ("x-forwarded-proto", "https"),
            ("x-real-ip", "10.0.0.1"),
            ("accept-encoding", "zstd"),
            ("host", "gateway.internal"),
            ("content-length", "42"),
            ("connection", "keep-alive"),
            ("transfer-encoding", "chunked"),
            ("content-type", "application/json"),
            ("x-openwebui-user-email", "a@x.com"),
        ] {
            inbound.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }

        let out = build_forward_headers(&inbound, &cfg());

        assert!(!out.contains_key("cookie"));
        assert!(!out.contains_key("x-forwarded-for"));
        assert!(!out.contains_key("x-forwarded-proto"));
        assert!(!out.contains_key("x-real-ip"));
        assert!(!out.contains_key("accept-encoding"));
        assert!(!out.contains_key("host"));
        assert!(!out.contains_key("content-length"));
        assert!(!out.contains_key("connection"));
        assert!(!out.contains_key("transfer-encoding"));

        // The client bearer is replaced by the upstream credential.
        assert_eq!(out["authorization"], "Bearer sk-or-test");
        assert_eq!(out["http-referer"], "https://chat.example.com");
        assert_eq!(out["x-title"], "Example Chat");
        assert_eq!(out["user-agent"], DEFAULT_USER_AGENT);

        // Benign headers pass through.
        assert_eq!(out["content-type"], "application/json");
        assert_eq!(out["x-openwebui-user-email"], "a@x.com");
    }

    #[test]
    fn client_user_agent_is_preserved() {
        let mut inbound = HeaderMap::new();
        inbound.insert(
            header::USER_AGENT,
            HeaderValue::from_static("some-client/2.0"),
        );
        let out = build_forward_headers(&inbound, &cfg());
        assert_eq!(out["user-agent"], "some-client/2.0");
    }

    #[test]
    fn optional_attribution_headers_are_omitted_when_unset() {
        let mut map = HashMap::new();
        map.insert("OPENROUTER_API_KEY".to_string(), "sk-or-test".to_string());
        let cfg = RuntimeConfig::from_map(map);

        let out = build_forward_headers(&HeaderMap::new(), &cfg);
        assert!(!out.contains_key("http-referer"));
        assert!(!out.contains_key("x-title"));
    }

    #[test]
    fn response_headers_drop_framing_and_hop_by_hop() {
        let mut upstream = HeaderMap::new();
        for (name, value) in [
            ("content-type", "text/event-stream"),
            ("content-length", "1234"),
            ("content-encoding", "br"),
            ("transfer-encoding", "chunked"),
            ("connection", "keep-alive"),
            ("x-request-id", "req-1"),
        ] {
            upstream.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }

        let out = clean_response_headers(&upstream);
        assert_eq!(out["content-type"], "text/event-stream");
        assert_eq!(out["x-request-id"], "req-1");
        assert!(!out.contains_key("content-length"));
        assert!(!out.contains_key("content-encoding"));
        assert!(!out.contains_key("transfer-encoding"));
        assert!(!out.contains_key("connection"));
    }
}
