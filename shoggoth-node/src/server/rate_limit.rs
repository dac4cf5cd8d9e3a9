//! Per-client token-bucket rate limiting over the whole server.
//!
//! Each client IP owns a bucket holding `rate_limiter_requests` tokens
//! that refills proportionally to elapsed time over
//! `rate_limiter_duration` milliseconds, capped at the maximum. A janitor
//! task sweeps buckets idle for longer than the cleanup timeout.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::{watch, RwLock};
use tracing::debug;

/// Idle clients are dropped after this long without a request.
const CLEANUP_TIMEOUT_MS: u64 = 5_000;

/// Sweep interval of the janitor task.
const JANITOR_INTERVAL: Duration = Duration::from_secs(5);

/// One client's bucket. Time is passed in explicitly so refill behavior is
/// deterministic under test.
#[derive(Debug, Clone, Copy)]
pub struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_interval_ms: f64,
    last_refill_ms: u64,
}

impl TokenBucket {
    pub fn new(max_tokens: f64, refill_interval_ms: f64, now_ms: u64) -> Self {
        Self { tokens: max_tokens, max_tokens, refill_interval_ms, last_refill_ms: now_ms }
    }

    fn refill(&mut self, now_ms: u64) {
        let elapsed = now_ms.saturating_sub(self.last_refill_ms) as f64;
        let tokens_to_add = self.max_tokens * elapsed / self.refill_interval_ms;

        self.tokens = (self.tokens + tokens_to_add).min(self.max_tokens);
        self.last_refill_ms = now_ms;
    }

    /// Takes `tokens` from the bucket if available.
    pub fn try_acquire(&mut self, now_ms: u64, tokens: f64) -> bool {
        self.refill(now_ms);

        if tokens <= self.tokens {
            self.tokens -= tokens;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct ClientBucket {
    bucket: TokenBucket,
    last_request_ms: u64,
}

/// Shared limiter state handed to the middleware and the janitor.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    clients: Arc<RwLock<HashMap<IpAddr, ClientBucket>>>,
    max_tokens: f64,
    refill_interval_ms: f64,
    message: Arc<String>,
}

impl RateLimiter {
    pub fn new(requests: u64, duration_ms: u64, message: &str) -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            max_tokens: requests as f64,
            refill_interval_ms: duration_ms as f64,
            message: Arc::new(message.to_string()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Takes one token from the client's bucket, creating it on first
    /// contact.
    pub async fn check(&self, ip: IpAddr, now_ms: u64) -> bool {
        let mut clients = self.clients.write().await;

        let client = clients.entry(ip).or_insert_with(|| ClientBucket {
            bucket: TokenBucket::new(self.max_tokens, self.refill_interval_ms, now_ms),
            last_request_ms: now_ms,
        });

        client.last_request_ms = now_ms;
        client.bucket.try_acquire(now_ms, 1.0)
    }

    /// Drops buckets idle for longer than the cleanup timeout.
    pub async fn sweep(&self, now_ms: u64) {
        let mut clients = self.clients.write().await;
        let before = clients.len();

        clients.retain(|_, client| now_ms.saturating_sub(client.last_request_ms) <= CLEANUP_TIMEOUT_MS);

        let evicted = before - clients.len();
        if evicted > 0 {
            debug!(evicted, "rate limiter swept idle clients");
        }
    }

    /// Spawns the janitor task; it exits on the shutdown signal.
    pub fn start_janitor(&self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(JANITOR_INTERVAL) => {
                        limiter.sweep(now_ms()).await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}

pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// Axum middleware applying the limiter to every request.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !limiter.check(addr.ip(), now_ms()).await {
        return (StatusCode::TOO_MANY_REQUESTS, limiter.message().to_string()).into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn bucket_empties_and_refills_proportionally() {
        // 10 tokens refilled over 1000ms
        let mut bucket = TokenBucket::new(10.0, 1000.0, 0);

        for _ in 0..10 {
            assert!(bucket.try_acquire(0, 1.0));
        }
        assert!(!bucket.try_acquire(0, 1.0));

        // Half the window refills half the bucket.
        for _ in 0..5 {
            assert!(bucket.try_acquire(500, 1.0));
        }
        assert!(!bucket.try_acquire(500, 1.0));
    }

    #[test]
    fn bucket_is_capped_at_its_maximum() {
        let mut bucket = TokenBucket::new(5.0, 1000.0, 0);

        // A long idle period must not overfill the bucket.
        assert!(bucket.try_acquire(1_000_000, 1.0));
        for _ in 0..4 {
            assert!(bucket.try_acquire(1_000_000, 1.0));
        }
        assert!(!bucket.try_acquire(1_000_000, 1.0));
    }

    #[tokio::test]
    async fn limiter_blocks_excess_and_sweeps_idle_clients() {
        let limiter = RateLimiter::new(3, 60_000, "you are being rate limited.");
        let ip = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));

        assert!(limiter.check(ip, 0).await);
        assert!(limiter.check(ip, 0).await);
        assert!(limiter.check(ip, 0).await);
        assert!(!limiter.check(ip, 0).await);

        // The client is swept after the cleanup timeout and starts fresh.
        limiter.sweep(CLEANUP_TIMEOUT_MS + 1).await;
        assert!(limiter.check(ip, CLEANUP_TIMEOUT_MS + 1).await);
    }
}
