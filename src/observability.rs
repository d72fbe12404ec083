//! Lightweight harvesting counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording counters across a run
#[derive(Debug, Default)]
pub struct Metrics {
    requests_sent: AtomicU64,
    bot_challenges: AtomicU64,
    files_fetched: AtomicU64,
    chains_failed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bot_challenge(&self) {
        self.bot_challenges.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "bot_challenges", "Metric incremented");
    }

    pub fn file_fetched(&self) {
        self.files_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chain_failed(&self) {
        self.chains_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "chains_failed", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            bot_challenges: self.bot_challenges.load(Ordering::Relaxed),
            files_fetched: self.files_fetched.load(Ordering::Relaxed),
            chains_failed: self.chains_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests_sent: u64,
    pub bot_challenges: u64,
    pub files_fetched: u64,
    pub chains_failed: u64,
}
