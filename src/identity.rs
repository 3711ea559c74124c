//! End-user identity resolution.
//!
//! Sources, first match wins: the `x-openwebui-user-email` header, the
//! `x-openwebui-user-id` header, then the payload of a bearer JWT. The
//! resolver never fails; malformed input yields `None`.

use axum::http::HeaderMap;
use base64::Engine;
use serde_json::Value;

/// Resolve a normalized user identifier from the inbound headers.
pub fn resolve_identity(headers: &HeaderMap) -> Option<String> {
    if let Some(id) = header_value(headers, "x-openwebui-user-email").and_then(normalize) {
        return Some(id);
    }
    if let Some(id) = header_value(headers, "x-openwebui-user-id").and_then(normalize) {
        return Some(id);
    }

    let auth = header_value(headers, "authorization")?;
    let token = auth.strip_prefix("Bearer ")?;
    user_from_jwt(token).and_then(normalize)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// Lowercase, trim, reject empty.
fn normalize(raw: String) -> Option<String> {
    let id = raw.trim().to_lowercase();
    if id.is_empty() { None } else { Some(id) }
}

/// Decode the JWT payload segment without verifying the signature; the
/// gateway only needs the claimed identity, the UI already authenticated it.
/// Prefers `email`, then `id`, then `sub`.
fn user_from_jwt(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;

    let mut padded = payload.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }

    let decoded = base64::engine::general_purpose::URL_SAFE.decode(padded).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;

    ["email", "id", "sub"]
        .iter()
        .find_map(|k| claims.get(k).and_then(Value::as_str))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    fn bearer_for(claims: &Value) -> String {
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(claims).unwrap());
        format!("Bearer xx.{payload}.yy")
    }

    #[test]
    fn email_header_wins() {
        let h = headers(&[
            ("x-openwebui-user-email", " Alice@Example.COM "),
            ("x-openwebui-user-id", "u-123"),
        ]);
        assert_eq!(resolve_identity(&h).as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn id_header_is_second() {
        let h = headers(&[("x-openwebui-user-id", "U-123")]);
        assert_eq!(resolve_identity(&h).as_deref(), Some("u-123"));
    }

    #[test]
    fn jwt_email_claim() {
        let token = bearer_for(&serde_json::json!({ "email": "B@X.com" }));
        let h = headers(&[("authorization", token.as_str())]);
        assert_eq!(resolve_identity(&h).as_deref(), Some("b@x.com"));
    }

    #[test]
    fn jwt_falls_back_to_id_then_sub() {
        let token = bearer_for(&serde_json::json!({ "id": "ID-1", "sub": "sub-1" }));
        let h = headers(&[("authorization", token.as_str())]);
        assert_eq!(resolve_identity(&h).as_deref(), Some("id-1"));

        let token = bearer_for(&serde_json::json!({ "sub": "Sub-Only" }));
        let h = headers(&[("authorization", token.as_str())]);
        assert_eq!(resolve_identity(&h).as_deref(), Some("sub-only"));
    }

    #[test]
    fn malformed_token_yields_none() {
        for tok in [
            "Bearer not-a-jwt",
            "Bearer a.!!!.c",
            "Bearer a.eyJ4Ijox.c", // truncated JSON
            "Basic abc",
        ] {
            let h = headers(&[("authorization", tok)]);
            assert_eq!(resolve_identity(&h), None, "token {tok:?}");
        }
    }

    #[test]
    fn blank_header_yields_none() {
        let h = headers(&[("x-openwebui-user-email", "   ")]);
        assert_eq!(resolve_identity(&h), None);
    }
}
