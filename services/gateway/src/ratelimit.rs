//! Per-client sliding-window rate limiter
//!
//! One window per client key. Within a window the decision is monotone:
//! once a client is over the cap it stays denied until the window expires.
//! A GC loop prunes windows idle longer than twice the window length; the
//! prune takes the same lock as the hot path, so it never observes a
//! half-updated entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use infermesh_core::config::RateLimitSettings;
use infermesh_core::{Error, Result};

/// GC cadence
const GC_INTERVAL: Duration = Duration::from_secs(60);

struct RateWindow {
    requests: u32,
    window_start: Instant,
}

/// Sliding-count limiter keyed by client
pub struct RateLimiter {
    enabled: bool,
    window: Duration,
    max_requests: u32,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            enabled: settings.enabled,
            window: Duration::from_millis(settings.window_ms),
            max_requests: settings.max_requests,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count one request for `client`; denies when the window is full
    pub fn check(&self, client: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let now = Instant::now();
        let mut windows = self.windows.lock().expect("rate windows poisoned");
        let window = windows.entry(client.to_string()).or_insert(RateWindow {
            requests: 0,
            window_start: now,
        });

        if now.duration_since(window.window_start) > self.window {
            window.requests = 1;
            window.window_start = now;
            return Ok(());
        }

        if window.requests >= self.max_requests {
            return Err(Error::RateLimited(format!(
                "{} exceeded {} requests per {}ms",
                client,
                self.max_requests,
                self.window.as_millis()
            )));
        }

        window.requests += 1;
        Ok(())
    }

    /// Drop windows idle longer than twice the window length
    pub fn gc(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("rate windows poisoned");
        let before = windows.len();
        windows.retain(|_, w| now.duration_since(w.window_start) <= self.window * 2);
        before - windows.len()
    }

    /// Number of live windows
    pub fn window_count(&self) -> usize {
        self.windows.lock().expect("rate windows poisoned").len()
    }

    /// Spawn the periodic GC loop
    pub fn spawn_gc_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GC_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let pruned = limiter.gc();
                if pruned > 0 {
                    tracing::debug!(pruned, "rate limiter windows pruned");
                }
            }
        })
    }
}
