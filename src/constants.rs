use std::time::Duration;

/// OpenRouter API base URL. The inbound path suffix after `/v1/` is appended
/// verbatim.
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api";

/// Pub/sub channel for configuration reload notices.
pub const CONFIG_CHANNEL: &str = "middleware:config:updated";

/// Durable list drained into `usage_logs`.
pub const USAGE_QUEUE_KEY: &str = "usage_queue";

/// Durable list drained into `request_logs`.
pub const REQUEST_PERF_QUEUE_KEY: &str = "request_perf_queue";

/// TTL on per-user usage counters: 40 days, comfortably past a monthly window.
pub const USAGE_COUNTER_TTL_SECS: i64 = 3_456_000;

/// Max items pulled from each queue per worker iteration.
pub const DRAIN_BATCH_SIZE: usize = 100;

/// Worker sleep when both queues are empty, and backoff after an error.
pub const WORKER_IDLE_SLEEP: Duration = Duration::from_secs(1);

/// TTL for the in-process user/group/policy caches.
pub const CACHE_TTL: Duration = Duration::from_secs(60);

/// Ring buffer capacity for `/admin/system-logs`.
pub const SYSTEM_LOG_CAPACITY: usize = 500;

/// The immortal fallback policy.
pub const DEFAULT_POLICY_ID: &str = "default";

/// User-Agent attached upstream when the client did not send one.
pub const DEFAULT_USER_AGENT: &str =
    concat!("openrouter-gateway/", env!("CARGO_PKG_VERSION"));

/// Upstream request timeout. Long to accommodate slow streamed completions.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Cap on buffered inbound request bodies.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Hop-by-hop headers, stripped in both directions (RFC 9110 §7.6.1).
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Client-side headers never forwarded upstream. `x-forwarded-*` is matched
/// by prefix separately.
pub const CLIENT_SENSITIVE_HEADERS: [&str; 6] = [
    "cookie",
    "authorization",
    "x-real-ip",
    "accept-encoding",
    "host",
    "content-length",
];

/// Prefix for the forwarded-chain headers stripped from inbound requests.
pub const FORWARDED_HEADER_PREFIX: &str = "x-forwarded-";
