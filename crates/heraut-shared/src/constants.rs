/// Application name
pub const APP_NAME: &str = "Héraut";

/// Media type used for ActivityPub payloads
pub const ACTIVITY_JSON: &str = "application/activity+json";

/// `User-Agent` sent with outgoing federation requests
pub const USER_AGENT: &str = concat!("heraut/", env!("CARGO_PKG_VERSION"));

/// Cached remote actors older than this are refetched on access (24 h)
pub const ACTOR_CACHE_FRESHNESS_SECS: u64 = 24 * 60 * 60;

/// Upper bound for one remote fetch or delivery attempt
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 10;

/// Concurrent home-stream writes per fan-out
pub const DEFAULT_DELIVERY_CONCURRENCY: usize = 8;

/// Maximum nesting of mediated activities (Undo of an Accept of a Follow ...)
pub const MAX_MEDIATION_DEPTH: usize = 4;

/// Maximum accepted inbox payload in bytes (1 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
