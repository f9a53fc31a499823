//! Per-IP rate limiting over three independent action families.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(60);

/// A rate-limited action. Each action carries its own per-window threshold;
/// actions in the same family share one window per client IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateAction {
    OtmPost,
    OtmGet,
    FileUpload,
    FileDownload,
    ChatInvite,
    ChatMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateFamily {
    Otm,
    File,
    Chat,
}

impl RateAction {
    pub fn family(self) -> RateFamily {
        match self {
            RateAction::OtmPost | RateAction::OtmGet => RateFamily::Otm,
            RateAction::FileUpload | RateAction::FileDownload => RateFamily::File,
            RateAction::ChatInvite | RateAction::ChatMessage => RateFamily::Chat,
        }
    }

    fn limit(self) -> u32 {
        match self {
            RateAction::OtmPost => 30,
            RateAction::OtmGet => 60,
            RateAction::FileUpload => 10,
            RateAction::FileDownload => 30,
            RateAction::ChatInvite => 10,
            RateAction::ChatMessage => 60,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    window_start: Instant,
    counts: HashMap<RateAction, u32>,
}

/// Fixed-window limiter: the window starts at the first request for a
/// `(family, ip)` pair and resets lazily on the next request after expiry.
/// Rejected requests do not consume budget.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<(RateFamily, String), Bucket>>>,
    window: Duration,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_window(WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            window,
        }
    }

    /// Returns true when the request is admitted.
    pub async fn check(&self, ip: &str, action: RateAction) -> bool {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();

        let bucket = buckets
            .entry((action.family(), ip.to_string()))
            .or_insert_with(|| Bucket {
                window_start: now,
                counts: HashMap::new(),
            });

        if now.duration_since(bucket.window_start) >= self.window {
            bucket.window_start = now;
            bucket.counts.clear();
        }

        let count = bucket.counts.entry(action).or_insert(0);
        if *count >= action.limit() {
            return false;
        }
        *count += 1;
        true
    }

    /// Drop buckets whose window has been idle longer than `max_idle`.
    pub async fn purge_stale(&self, max_idle: Duration) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| now.duration_since(bucket.window_start) < max_idle);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the client IP: first comma-separated `X-Forwarded-For` value if
/// present, then the socket's remote address, then the literal "unknown".
pub fn client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }

    match remote {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limit_boundary() {
        let limiter = RateLimiter::new();

        for _ in 0..10 {
            assert!(limiter.check("10.0.0.1", RateAction::FileUpload).await);
        }
        assert!(!limiter.check("10.0.0.1", RateAction::FileUpload).await);

        // A different IP has its own budget.
        assert!(limiter.check("10.0.0.2", RateAction::FileUpload).await);
    }

    #[tokio::test]
    async fn test_families_are_independent() {
        let limiter = RateLimiter::new();

        for _ in 0..10 {
            assert!(limiter.check("10.0.0.1", RateAction::ChatInvite).await);
        }
        assert!(!limiter.check("10.0.0.1", RateAction::ChatInvite).await);

        // Exhausting the chat family leaves otm and file untouched.
        assert!(limiter.check("10.0.0.1", RateAction::OtmPost).await);
        assert!(limiter.check("10.0.0.1", RateAction::FileUpload).await);
    }

    #[tokio::test]
    async fn test_actions_share_family_window_but_not_counters() {
        let limiter = RateLimiter::new();

        for _ in 0..30 {
            assert!(limiter.check("10.0.0.1", RateAction::OtmPost).await);
        }
        assert!(!limiter.check("10.0.0.1", RateAction::OtmPost).await);

        // Same family, separate counter.
        assert!(limiter.check("10.0.0.1", RateAction::OtmGet).await);
    }

    #[tokio::test]
    async fn test_window_resets() {
        let limiter = RateLimiter::with_window(Duration::from_millis(30));

        for _ in 0..10 {
            assert!(limiter.check("10.0.0.1", RateAction::FileUpload).await);
        }
        assert!(!limiter.check("10.0.0.1", RateAction::FileUpload).await);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(limiter.check("10.0.0.1", RateAction::FileUpload).await);
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let limiter = RateLimiter::new();
        assert!(limiter.check("192.168.1.1", RateAction::OtmPost).await);

        limiter.purge_stale(Duration::from_secs(0)).await;

        let buckets = limiter.buckets.lock().await;
        assert!(buckets.is_empty());
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        let remote: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        assert_eq!(client_ip(&headers, Some(remote)), "203.0.113.9");
    }

    #[test]
    fn test_client_ip_falls_back_to_remote_then_unknown() {
        let headers = HeaderMap::new();
        let remote: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        assert_eq!(client_ip(&headers, Some(remote)), "127.0.0.1");
        assert_eq!(client_ip(&headers, None), "unknown");
    }
}
