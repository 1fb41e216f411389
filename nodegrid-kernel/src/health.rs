use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub active_sessions: u32,
    pub memory_usage_mb: f32,
    pub refreshes_completed: u64,
    pub refreshes_failed: u64,
    /// RFC3339, absent tant qu'aucun rafraîchissement n'a abouti
    pub last_refresh: Option<String>,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    refreshes: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
    last_refresh: Arc<parking_lot::Mutex<Option<OffsetDateTime>>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            refreshes: Arc::new(AtomicU64::new(0)),
            failures: Arc::new(AtomicU64::new(0)),
            last_refresh: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        *self.last_refresh.lock() = Some(OffsetDateTime::now_utc());
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self, active_sessions: usize) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            active_sessions: active_sessions as u32,
            memory_usage_mb: get_memory_usage_mb(),
            refreshes_completed: self.refreshes.load(Ordering::Relaxed),
            refreshes_failed: self.failures.load(Ordering::Relaxed),
            last_refresh: self.last_refresh.lock().and_then(|at| at.format(&Rfc3339).ok()),
        }
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }

    // approximation hors Linux
    12.0
}
