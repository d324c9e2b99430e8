//! Per-client sliding-window rate limiting.
//!
//! Grounded in `original_source/src/api/middleware/rate_limit.py`'s
//! `RateLimitMiddleware`: an in-memory window keyed by `api_key:<key>` or
//! `ip:<addr>`, default 100 requests per 60s, public paths exempt,
//! `X-RateLimit-*` headers on success and `429` + `Retry-After` on
//! rejection. `tower::limit` bounds concurrency, not a per-client request
//! rate over a rolling window, so this is hand-rolled the same way the
//! source middleware is.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::rate_limited;
use crate::server::AppState;

const PUBLIC_PATHS: &[&str] = &["/api/v1/health", "/api/v1/health/simple", "/", "/health"];

pub struct RateLimiter {
    window: Duration,
    limit: u32,
    clients: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        RateLimiter {
            window: Duration::from_secs(60),
            limit: requests_per_minute,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Records one hit for `key` at `now`, evicting entries outside the
    /// window, and reports how many requests remain in the current window.
    fn check(&self, key: &str, now: Instant) -> (bool, u32, Duration) {
        let mut clients = self.clients.lock().expect("rate limiter lock poisoned");
        let entry = clients.entry(key.to_string()).or_default();
        while let Some(&oldest) = entry.front() {
            if now.duration_since(oldest) > self.window {
                entry.pop_front();
            } else {
                break;
            }
        }

        let retry_after = entry
            .front()
            .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
            .unwrap_or(self.window);

        if entry.len() as u32 >= self.limit {
            return (false, 0, retry_after);
        }

        entry.push_back(now);
        let remaining = self.limit.saturating_sub(entry.len() as u32);
        (true, remaining, retry_after)
    }
}

fn client_key(state: &AppState, req: &Request) -> String {
    if let Some(v) = req.headers().get("x-api-key") {
        if let Ok(s) = v.to_str() {
            return format!("api_key:{s}");
        }
    }
    let _ = state;
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return format!("ip:{}", addr.ip());
    }
    "ip:unknown".to_string()
}

pub async fn enforce(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    if !state.config.security.rate_limit.enabled || PUBLIC_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let key = client_key(&state, &req);
    let (allowed, remaining, retry_after) = state.rate_limiter.check(&key, Instant::now());

    if !allowed {
        return rate_limited("rate limit exceeded", retry_after.as_secs().max(1));
    }

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        "X-RateLimit-Limit",
        HeaderValue::from_str(&state.rate_limiter.limit.to_string()).unwrap(),
    );
    headers.insert(
        "X-RateLimit-Remaining",
        HeaderValue::from_str(&remaining.to_string()).unwrap(),
    );
    headers.insert(
        "X-RateLimit-Reset",
        HeaderValue::from_str(&state.rate_limiter.window.as_secs().to_string()).unwrap(),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(2);
        let now = Instant::now();
        assert!(limiter.check("a", now).0);
        assert!(limiter.check("a", now).0);
        assert!(!limiter.check("a", now).0);
    }

    #[test]
    fn distinct_clients_have_independent_windows() {
        let limiter = RateLimiter::new(1);
        let now = Instant::now();
        assert!(limiter.check("a", now).0);
        assert!(limiter.check("b", now).0);
    }
}
