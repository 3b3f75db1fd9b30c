use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

// ── Configuration ──

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

struct Tier {
    config: RateLimitConfig,
    /// Request timestamps per client IP, pruned on access.
    hits: DashMap<IpAddr, Vec<Instant>>,
}

// ── Core Rate Limiter ──

/// In-memory per-IP sliding-window limiter with named tiers.
#[derive(Clone)]
pub struct RateLimiter {
    tiers: Arc<DashMap<&'static str, Tier>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            tiers: Arc::new(DashMap::new()),
        }
    }

    pub fn add_tier(&self, name: &'static str, config: RateLimitConfig) {
        self.tiers.insert(
            name,
            Tier {
                config,
                hits: DashMap::new(),
            },
        );
    }

    /// `Ok(())` if allowed, `Err(retry_after_secs)` if over the limit.
    pub fn check(&self, tier: &'static str, ip: IpAddr) -> Result<(), u64> {
        let tier = self.tiers.get(tier).expect("unknown rate limit tier");
        let now = Instant::now();
        let window_start = now - tier.config.window;

        let mut timestamps = tier.hits.entry(ip).or_default();
        timestamps.retain(|t| *t > window_start);

        if timestamps.len() >= tier.config.max_requests as usize {
            let oldest = timestamps[0];
            let retry_after = (oldest + tier.config.window)
                .saturating_duration_since(now)
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        timestamps.push(now);
        Ok(())
    }

    /// Drops IPs with no requests in the last 2× window. Run periodically.
    pub fn cleanup(&self) {
        let now = Instant::now();
        for tier in self.tiers.iter() {
            let cutoff = tier.config.window * 2;
            tier.hits.retain(|_ip, timestamps| {
                timestamps.retain(|t| now.duration_since(*t) < cutoff);
                !timestamps.is_empty()
            });
        }
    }
}

// ── IP Extraction ──

/// Client IP from X-Forwarded-For (reverse proxy) or the socket address.
pub fn extract_client_ip(req: &Request) -> IpAddr {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or_else(|| "127.0.0.1".parse().unwrap())
}

fn too_many_requests(retry_after: u64) -> Response {
    let body = ApiResponse::<()>::error(format!(
        "Слишком много запросов. Повторите через {} с",
        retry_after
    ));
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after.to_string())],
        Json(body),
    )
        .into_response()
}

// ── Middleware Functions (one per tier) ──

/// Public read-only endpoints.
pub async fn rate_limit_public(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = extract_client_ip(&req);
    limiter.check("public", ip).map_err(too_many_requests)?;
    Ok(next.run(req).await)
}

/// Booking creation — the strictest tier.
pub async fn rate_limit_booking(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = extract_client_ip(&req);
    limiter.check("booking", ip).map_err(too_many_requests)?;
    Ok(next.run(req).await)
}

/// Everything mutating or account-scoped.
pub async fn rate_limit_auth(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = extract_client_ip(&req);
    limiter.check("auth", ip).map_err(too_many_requests)?;
    Ok(next.run(req).await)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn limiter(max_requests: u32, window_secs: u64) -> RateLimiter {
        let limiter = RateLimiter::new();
        limiter.add_tier(
            "test",
            RateLimitConfig {
                max_requests,
                window: Duration::from_secs(window_secs),
            },
        );
        limiter
    }

    fn test_ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_allows_under_limit() {
        let limiter = limiter(3, 60);
        let ip = test_ip(1);
        for _ in 0..3 {
            assert!(limiter.check("test", ip).is_ok());
        }
    }

    #[test]
    fn test_rejects_over_limit() {
        let limiter = limiter(2, 60);
        let ip = test_ip(1);
        assert!(limiter.check("test", ip).is_ok());
        assert!(limiter.check("test", ip).is_ok());
        assert!(limiter.check("test", ip).is_err());
    }

    #[test]
    fn test_retry_after_within_window() {
        let limiter = limiter(1, 60);
        let ip = test_ip(1);
        limiter.check("test", ip).unwrap();
        let retry_after = limiter.check("test", ip).unwrap_err();
        assert!((1..=60).contains(&retry_after));
    }

    #[test]
    fn test_ips_are_independent() {
        let limiter = limiter(1, 60);
        assert!(limiter.check("test", test_ip(1)).is_ok());
        assert!(limiter.check("test", test_ip(2)).is_ok());
        assert!(limiter.check("test", test_ip(1)).is_err());
    }

    #[test]
    fn test_cleanup_keeps_recent_entries() {
        let limiter = limiter(5, 60);
        let ip = test_ip(1);
        limiter.check("test", ip).unwrap();
        limiter.cleanup();
        // entry is still within the window, second request allowed
        assert!(limiter.check("test", ip).is_ok());
    }
}
