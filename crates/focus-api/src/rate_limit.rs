use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use focus_core::util::user_fingerprint;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;

/// Fixed-window request limits per user and endpoint class
#[derive(Clone)]
pub struct EndpointRateLimiter {
    state: Arc<Mutex<RateState>>,
    window: Duration,
    sync_limit: u32,
    admin_limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Clone, Copy)]
pub enum ProtectedEndpoint {
    /// The sync exchange itself
    Sync,
    /// Device listing, stats, conflict history and resets
    Admin,
}

#[derive(Default)]
struct RateLimitMetrics {
    sync_allowed: AtomicU64,
    sync_limited: AtomicU64,
    admin_allowed: AtomicU64,
    admin_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub sync_allowed: u64,
    pub sync_limited: u64,
    pub admin_allowed: u64,
    pub admin_limited: u64,
}

/// Open windows keyed by endpoint and user
struct RateState {
    windows: HashMap<String, RateWindow>,
    last_swept: Instant,
}

impl RateState {
    /// Drop windows that have expired, at most once per window length
    fn sweep(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.last_swept) < window {
            return;
        }
        self.windows
            .retain(|_, entry| now.duration_since(entry.started_at) < window);
        self.last_swept = now;
    }
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.sync_rate_limit_per_window,
            config.admin_rate_limit_per_window,
        )
    }

    fn new(window: Duration, sync_limit: u32, admin_limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(RateState {
                windows: HashMap::new(),
                last_swept: Instant::now(),
            })),
            window,
            sync_limit,
            admin_limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(&self, endpoint: ProtectedEndpoint, user_id: &str) -> Result<(), AppError> {
        let limit = match endpoint {
            ProtectedEndpoint::Sync => self.sync_limit,
            ProtectedEndpoint::Admin => self.admin_limit,
        };

        let key = format!("{}:{user_id}", endpoint.label());
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        guard.sweep(now, self.window);
        let entry = guard.windows.entry(key).or_insert(RateWindow {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= limit {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs()
                .max(1);
            self.counter(endpoint, false).fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                endpoint = endpoint.label(),
                user = user_fingerprint(user_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                "Rate limit exceeded for protected endpoint",
                retry_after_secs,
            ));
        }

        entry.count += 1;
        self.counter(endpoint, true).fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            sync_allowed: self.metrics.sync_allowed.load(Ordering::Relaxed),
            sync_limited: self.metrics.sync_limited.load(Ordering::Relaxed),
            admin_allowed: self.metrics.admin_allowed.load(Ordering::Relaxed),
            admin_limited: self.metrics.admin_limited.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    async fn tracked_windows(&self) -> usize {
        self.state.lock().await.windows.len()
    }

    fn counter(&self, endpoint: ProtectedEndpoint, allowed: bool) -> &AtomicU64 {
        match (endpoint, allowed) {
            (ProtectedEndpoint::Sync, true) => &self.metrics.sync_allowed,
            (ProtectedEndpoint::Sync, false) => &self.metrics.sync_limited,
            (ProtectedEndpoint::Admin, true) => &self.metrics.admin_allowed,
            (ProtectedEndpoint::Admin, false) => &self.metrics.admin_limited,
        }
    }
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Admin => "sync_admin",
        }
    }
}
