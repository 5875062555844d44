//! Eviction policy
//!
//! Scores combine exponential recency decay with a log-scaled access count.
//! Victim selection is a pure function over a snapshot of resident entries so
//! it can be exercised without a store.

use chrono::{DateTime, TimeZone, Utc};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

use super::EntryKey;
use crate::config::MemoryConfig;

/// Source of "now" for recency scoring
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        self.millis.fetch_add(secs * 1000, AtomicOrdering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(AtomicOrdering::SeqCst);
        Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
    }
}

/// Weights and budget for scoring and eviction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionPolicy {
    pub recency_weight: f64,
    pub frequency_weight: f64,
    pub half_life_secs: f64,
    pub budget: Budget,
}

impl EvictionPolicy {
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            recency_weight: config.recency_weight,
            frequency_weight: config.frequency_weight,
            half_life_secs: config.recency_half_life_secs.max(1) as f64,
            budget: Budget {
                capacity_bytes: config.capacity_bytes,
                max_entries: config.max_entries,
            },
        }
    }

    /// `w_r * exp(-ln2 * idle / half_life) + w_f * ln(1 + accesses)`
    pub fn score(&self, idle_secs: f64, access_count: u64) -> f64 {
        let idle = idle_secs.max(0.0);
        let recency = (-std::f64::consts::LN_2 * idle / self.half_life_secs).exp();
        let frequency = (1.0 + access_count as f64).ln();
        self.recency_weight * recency + self.frequency_weight * frequency
    }
}

/// Resident size limits shared by every entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub capacity_bytes: usize,
    pub max_entries: usize,
}

impl Budget {
    pub fn admits(&self, total_bytes: usize, entries: usize) -> bool {
        total_bytes <= self.capacity_bytes && entries <= self.max_entries
    }
}

/// Snapshot of one resident entry
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub key: EntryKey,
    pub size: usize,
    pub score: f64,
    pub pinned: bool,
}

/// Choose the entries to evict
///
/// Non-pinned entries are taken lowest score first (ties by key) until the
/// remainder fits the budget. The result is the shortest such prefix; if even
/// evicting every non-pinned entry cannot fit, all of them are returned.
pub fn select_victims(candidates: &[Candidate], budget: Budget) -> Vec<EntryKey> {
    let mut total: usize = candidates.iter().map(|c| c.size).sum();
    let mut count = candidates.len();

    if budget.admits(total, count) {
        return Vec::new();
    }

    let mut evictable: Vec<&Candidate> = candidates.iter().filter(|c| !c.pinned).collect();
    evictable.sort_by(|a, b| compare(a, b));

    let mut victims = Vec::new();
    for candidate in evictable {
        if budget.admits(total, count) {
            break;
        }
        total = total.saturating_sub(candidate.size);
        count -= 1;
        victims.push(candidate.key.clone());
    }
    victims
}

fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then_with(|| a.key.cmp(&b.key))
}
