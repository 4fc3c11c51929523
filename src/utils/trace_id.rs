use http::HeaderMap;
use uuid::Uuid;

/// Reuse an inbound `X-Trace-Id` or `X-Request-Id` when it is 16 to 64 hex
/// characters; otherwise mint a new 32-character id.
pub fn resolve_trace_id(headers: &HeaderMap) -> String {
    ["x-trace-id", "x-request-id"]
        .iter()
        .filter_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .find(|candidate| is_valid_trace_id(candidate))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(generate_trace_id)
}

pub fn is_valid_trace_id(candidate: &str) -> bool {
    (16..=64).contains(&candidate.len()) && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}

pub fn generate_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    #[test]
    fn generated_ids_are_valid() {
        let id = generate_trace_id();
        assert_eq!(id.len(), 32);
        assert!(is_valid_trace_id(&id));
    }

    #[test]
    fn inbound_ids_are_reused_when_well_formed() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("ABCDEF0123456789"));
        assert_eq!(resolve_trace_id(&headers), "abcdef0123456789");

        headers.insert("x-trace-id", HeaderValue::from_static("not-hex-at-all!!"));
        assert_eq!(resolve_trace_id(&headers), "abcdef0123456789");
    }

    #[test]
    fn short_ids_are_replaced() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace-id", HeaderValue::from_static("abc"));
        let id = resolve_trace_id(&headers);
        assert_ne!(id, "abc");
        assert_eq!(id.len(), 32);
    }
}
