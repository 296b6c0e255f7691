use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Counters shared by the scheduler and the queue consumer.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    pub ticks: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    pub deleted: AtomicU64,
    pub rejected: AtomicU64,
    pub last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub delivered: u64,
    pub failed: u64,
    pub deleted: u64,
    pub rejected: u64,
    pub last_error: Option<String>,
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self, err: impl Into<String>) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        self.record_error(err);
    }

    pub fn record_failure(&self, err: impl Into<String>) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.record_error(err);
    }

    fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            last_error: self.last_error.lock().ok().and_then(|guard| guard.clone()),
        }
    }
}
