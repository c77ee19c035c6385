use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

/// `requests`, `tokens_consumed`, `failures_by_class`. A plain
/// struct behind an `Arc`, updated with atomic ops — no global singleton, in
/// the same shape the teacher would use for an in-process counter.
#[derive(Default)]
pub struct Counters {
    requests: AtomicU64,
    tokens_consumed: AtomicU64,
    failures_by_class: DashMap<&'static str, AtomicU64>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CountersSnapshot {
    pub requests: u64,
    pub tokens_consumed: u64,
    pub failures_by_class: Vec<(String, u64)>,
}

impl Counters {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tokens(&self, tokens: u64) {
        self.tokens_consumed.fetch_add(tokens, Ordering::Relaxed);
    }

    pub fn record_failure(&self, class: &'static str) {
        self.failures_by_class
            .entry(class)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            tokens_consumed: self.tokens_consumed.load(Ordering::Relaxed),
            failures_by_class: self
                .failures_by_class
                .iter()
                .map(|entry| (entry.key().to_string(), entry.value().load(Ordering::Relaxed)))
                .collect(),
        }
    }
}
