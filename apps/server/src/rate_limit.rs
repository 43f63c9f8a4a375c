//! Per-IP rate limiting with sliding window counters.
//!
//! Tiers are registered once at startup; routes opt in by layering the
//! [`rate_limit`] middleware with a `(RateLimiter, tier)` state tuple.

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

/// Per-tier state: window config plus request timestamps keyed by client IP.
type TierMap = DashMap<&'static str, (TierConfig, DashMap<IpAddr, Vec<Instant>>)>;

/// Configuration for a single rate limit tier.
#[derive(Debug, Clone, Copy)]
pub struct TierConfig {
    /// Maximum requests allowed within the sliding window.
    pub max_requests: u32,
    /// Duration of the sliding window.
    pub window: Duration,
}

/// Shared in-memory limiter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    tiers: Arc<TierMap>,
}

impl RateLimiter {
    /// Create an empty limiter. Call `add_tier()` to configure.
    pub fn new() -> Self {
        Self {
            tiers: Arc::new(DashMap::new()),
        }
    }

    /// Register a named tier with its configuration.
    pub fn add_tier(&self, name: &'static str, config: TierConfig) {
        self.tiers.insert(name, (config, DashMap::new()));
    }

    /// Check if a request from `ip` is allowed under the given tier.
    ///
    /// Returns `Ok(())` if allowed, `Err(retry_after_secs)` if rate limited.
    pub fn check(&self, tier: &'static str, ip: IpAddr) -> Result<(), u64> {
        let tier_entry = self.tiers.get(tier).expect("unknown rate limit tier");
        let (config, ip_map) = tier_entry.value();
        let now = Instant::now();
        let window_start = now - config.window;

        let mut timestamps = ip_map.entry(ip).or_insert_with(Vec::new);

        // Evict timestamps that slid out of the window.
        timestamps.retain(|t| *t > window_start);

        if timestamps.len() >= config.max_requests as usize {
            // Seconds until the oldest request leaves the window.
            let oldest = timestamps[0];
            let retry_after = (oldest + config.window)
                .saturating_duration_since(now)
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        timestamps.push(now);
        Ok(())
    }

    /// Remove entries idle for longer than twice their tier's window.
    /// Call periodically from a background task.
    pub fn cleanup(&self) {
        let now = Instant::now();
        for tier_entry in self.tiers.iter() {
            let (config, ip_map) = tier_entry.value();
            let cutoff = config.window * 2;
            ip_map.retain(|_ip, timestamps| {
                timestamps.retain(|t| now.duration_since(*t) < cutoff);
                !timestamps.is_empty()
            });
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

// ── IP extraction ──

/// Client IP: X-Forwarded-For when behind the reverse proxy, else peer address.
fn client_ip(req: &Request) -> IpAddr {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first_ip) = forwarded.split(',').next() {
            if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or_else(|| "127.0.0.1".parse().unwrap())
}

// ── Middleware ──

/// Tier-parameterized rate limit middleware; the tier name travels in the
/// layer state so each route group declares its own limit.
pub async fn rate_limit(
    State((limiter, tier)): State<(RateLimiter, &'static str)>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = client_ip(&req);
    if let Err(retry_after) = limiter.check(tier, ip) {
        let body = ApiResponse::<()>::error(format!(
            "Too many requests. Try again in {} seconds",
            retry_after
        ));
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", retry_after.to_string())],
            Json(body),
        )
            .into_response());
    }
    Ok(next.run(req).await)
}

// ── Tests ──
