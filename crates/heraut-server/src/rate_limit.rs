//! Per-client request budget for the HTTP surface.
//!
//! The budget is shared by inbox deliveries, account and status creation,
//! timeline reads and `/actors/resolve`, so a peer flooding `/inbox` also
//! loses its budget for everything else.  Each client address gets a
//! token bucket refilled at `rate_limit_per_sec` up to `rate_limit_burst`.
//! A refused request gets `429` with a `Retry-After` hint in seconds.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;
use tracing::warn;

const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Take one token, or report how long until one is available.
    fn take(&mut self, rate: f64, capacity: f64) -> Result<(), Duration> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else if rate > 0.0 {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / rate))
        } else {
            Err(Duration::from_secs(60))
        }
    }
}

/// Buckets keyed by client address, cheap to clone into router state.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity: capacity.max(1.0),
        }
    }

    pub async fn check(&self, client: &str) -> Result<(), Duration> {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(client.to_string())
            .or_insert_with(|| TokenBucket::full(self.capacity));
        bucket.take(self.rate, self.capacity)
    }

    /// Forget buckets untouched for `max_idle`.
    pub async fn purge_stale(&self, max_idle: Duration) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) < max_idle);
    }

    pub async fn tracked_clients(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

/// Spend one token for the calling client before the route handler runs.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let client = client_key(&req);

    if let Err(wait) = limiter.check(&client).await {
        warn!(client = %client, retry_after_secs = wait.as_secs_f64(), "Rate limit exceeded");
        let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
        let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        return response;
    }

    next.run(req).await
}

/// Connection address first, then the first valid `X-Forwarded-For` entry,
/// then `X-Real-IP`.  Clients without one share the anonymous bucket.
fn client_key<B>(req: &Request<B>) -> String {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next());
    let real_ip = req
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok());

    forwarded
        .into_iter()
        .chain(real_ip)
        .map(str::trim)
        .find(|candidate| candidate.parse::<std::net::IpAddr>().is_ok())
        .map(str::to_string)
        .unwrap_or_else(|| ANONYMOUS.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_then_refusal_with_wait() {
        let limiter = RateLimiter::new(2.0, 3.0);
        for _ in 0..3 {
            assert!(limiter.check("10.0.0.1").await.is_ok());
        }
        let wait = limiter.check("10.0.0.1").await.unwrap_err();
        assert!(wait <= Duration::from_millis(500));
        assert!(limiter.check("10.0.0.2").await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let limiter = RateLimiter::new(10.0, 5.0);
        limiter.check("192.168.1.1").await.unwrap();
        assert_eq!(limiter.tracked_clients().await, 1);
        limiter.purge_stale(Duration::ZERO).await;
        assert_eq!(limiter.tracked_clients().await, 0);
    }

    #[test]
    fn test_client_key_sources() {
        let forwarded = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(client_key(&forwarded), "203.0.113.7");

        let real = Request::builder()
            .header("x-forwarded-for", "garbage")
            .header("x-real-ip", "198.51.100.2")
            .body(())
            .unwrap();
        assert_eq!(client_key(&real), "198.51.100.2");

        let bare = Request::builder().body(()).unwrap();
        assert_eq!(client_key(&bare), ANONYMOUS);
    }
}
