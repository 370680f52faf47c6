//! Count-bounded history of per-cycle threat levels and the pattern queries over it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::assessment::RecurringThreat;

/// Per-type threat levels observed in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatSample {
    pub at: DateTime<Utc>,
    pub levels: BTreeMap<String, f64>,
}

impl ThreatSample {
    pub fn level(&self, kind: &str) -> f64 {
        self.levels.get(kind).copied().unwrap_or(0.0)
    }
}

/// Rolling buffer of the last `capacity` samples.
#[derive(Debug, Clone)]
pub struct ThreatHistory {
    samples: VecDeque<ThreatSample>,
    capacity: usize,
}

impl ThreatHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, sample: ThreatSample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&ThreatSample> {
        self.samples.back()
    }

    /// The last `n` samples, oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &ThreatSample> {
        self.samples.iter().skip(self.samples.len().saturating_sub(n))
    }

    /// The last `n` samples before the latest one, oldest first.
    pub fn tail_before_latest(&self, n: usize) -> Vec<&ThreatSample> {
        let prior = self.samples.len().saturating_sub(1);
        self.samples
            .iter()
            .take(prior)
            .skip(prior.saturating_sub(n))
            .collect()
    }

    /// Levels of `kind` over the last `n` samples, 0 where the type was absent.
    pub fn series(&self, kind: &str, n: usize) -> Vec<f64> {
        self.tail(n).map(|s| s.level(kind)).collect()
    }

    /// Every type seen in the last `n` samples.
    pub fn kinds(&self, n: usize) -> BTreeSet<String> {
        self.tail(n)
            .flat_map(|s| s.levels.keys().cloned())
            .collect()
    }

    /// Types that exceeded `significant` in more than `min_count` retained samples.
    pub fn recurring(&self, significant: f64, min_count: usize) -> Vec<RecurringThreat> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for sample in &self.samples {
            for (kind, level) in &sample.levels {
                if *level > significant {
                    *counts.entry(kind.as_str()).or_insert(0) += 1;
                }
            }
        }
        counts
            .into_iter()
            .filter(|(_, count)| *count > min_count)
            .map(|(kind, count)| RecurringThreat {
                kind: kind.to_string(),
                count,
            })
            .collect()
    }

    /// Types whose last `window` levels never decrease.
    pub fn escalating(&self, window: usize) -> Vec<String> {
        if window < 2 || self.samples.len() < window {
            return Vec::new();
        }
        self.kinds(window)
            .into_iter()
            .filter(|kind| {
                let levels = self.series(kind, window);
                levels.windows(2).all(|w| w[0] <= w[1])
            })
            .collect()
    }
}
