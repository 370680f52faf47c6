//! Historical hotspot aggregation.
//!
//! Scored events are bucketed into square zones; zones with many events or a high mean
//! severity are reported as hotspots and feed the optimizer's priority zones.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::config::AnalyticsConfig;
use crate::threat::ThreatAssessment;
use crate::types::{Point, Priority};

/// A scored event as seen by the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub severity: f64,
    pub location: Point,
}

/// A zone with notable historical activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    /// Center of the zone.
    pub location: Point,
    pub avg_severity: f64,
    pub event_count: usize,
    #[serde(default)]
    pub event_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

/// An operator-facing note derived from history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryNote {
    pub priority: Priority,
    pub message: String,
}

/// Hotspots and notes handed to the optimizer each cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalAnalytics {
    #[serde(default)]
    pub hotspots: Vec<Hotspot>,
    #[serde(default)]
    pub notes: Vec<AdvisoryNote>,
}

#[derive(Default)]
struct ZoneStats {
    count: usize,
    severity_sum: f64,
    types: BTreeSet<String>,
    last: Option<DateTime<Utc>>,
}

/// Rolling, time-bounded event history bucketed into zones.
#[derive(Debug, Clone)]
pub struct HotspotTracker {
    config: AnalyticsConfig,
    events: VecDeque<AnalyticsEvent>,
}

impl HotspotTracker {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            events: VecDeque::new(),
        }
    }

    /// Rebuild a tracker from retained events.
    pub fn from_events(config: AnalyticsConfig, events: Vec<AnalyticsEvent>) -> Self {
        Self {
            config,
            events: events.into(),
        }
    }

    fn retention(&self) -> Duration {
        Duration::days(self.config.lookback_days.max(1))
    }

    pub fn record(&mut self, event: AnalyticsEvent) {
        let now = event.timestamp;
        self.events.push_back(event);
        self.evict(now);
    }

    /// Record every immediate threat of an assessment, with its level as severity.
    pub fn record_assessment(&mut self, assessment: &ThreatAssessment) {
        for threat in &assessment.immediate_threats {
            self.events.push_back(AnalyticsEvent {
                kind: threat.kind.clone(),
                timestamp: assessment.assessed_at,
                severity: threat.level,
                location: threat.location,
            });
        }
        self.evict(assessment.assessed_at);
    }

    pub fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.retention();
        self.events.retain(|e| e.timestamp >= cutoff);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.iter().cloned().collect()
    }

    fn zone_of(&self, p: Point) -> (i64, i64) {
        let size = self.config.zone_size;
        ((p.x / size).floor() as i64, (p.y / size).floor() as i64)
    }

    /// Zones over the event-count or severity threshold, busiest first.
    pub fn hotspots(&self) -> Vec<Hotspot> {
        let mut zones: BTreeMap<(i64, i64), ZoneStats> = BTreeMap::new();
        for event in &self.events {
            let zone = zones.entry(self.zone_of(event.location)).or_default();
            zone.count += 1;
            zone.severity_sum += event.severity;
            zone.types.insert(event.kind.clone());
            zone.last = zone.last.max(Some(event.timestamp));
        }

        let size = self.config.zone_size;
        let mut hotspots: Vec<Hotspot> = zones
            .into_iter()
            .filter_map(|((zx, zy), stats)| {
                let avg_severity = stats.severity_sum / stats.count as f64;
                let hot = stats.count > self.config.hotspot_min_events
                    || avg_severity > self.config.hotspot_severity;
                hot.then(|| Hotspot {
                    location: Point::new((zx as f64 + 0.5) * size, (zy as f64 + 0.5) * size),
                    avg_severity,
                    event_count: stats.count,
                    event_types: stats.types.into_iter().collect(),
                    last_activity: stats.last,
                })
            })
            .collect();
        hotspots.sort_by(|a, b| b.event_count.cmp(&a.event_count));
        hotspots
    }

    /// Hotspots plus advisory notes over the lookback window ending at `now`.
    pub fn report(&self, now: DateTime<Utc>) -> HistoricalAnalytics {
        let hotspots = self.hotspots();
        let mut notes = Vec::new();
        if !hotspots.is_empty() {
            notes.push(AdvisoryNote {
                priority: Priority::High,
                message: format!("Increase monitoring in {} identified hotspots", hotspots.len()),
            });
        }

        let cutoff = now - self.retention();
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for event in self.events.iter().filter(|e| e.timestamp >= cutoff) {
            *counts.entry(event.kind.as_str()).or_insert(0) += 1;
        }
        for (kind, count) in counts {
            if count > self.config.frequent_type_count {
                notes.push(AdvisoryNote {
                    priority: Priority::Medium,
                    message: format!(
                        "High frequency of {kind} events - review prevention measures"
                    ),
                });
            }
        }
        HistoricalAnalytics { hotspots, notes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(kind: &str, severity: f64, x: f64, y: f64, at: DateTime<Utc>) -> AnalyticsEvent {
        AnalyticsEvent {
            kind: kind.into(),
            timestamp: at,
            severity,
            location: Point::new(x, y),
        }
    }

    #[test]
    fn test_severe_zone_is_hotspot() {
        let now = Utc::now();
        let mut tracker = HotspotTracker::new(AnalyticsConfig::default());
        tracker.record(event("weapon", 0.81, 5.0, 5.0, now));
        tracker.record(event("motion", 0.1, 450.0, 450.0, now));
        let hotspots = tracker.hotspots();
        assert_eq!(hotspots.len(), 1);
        assert_eq!(hotspots[0].location, Point::new(50.0, 50.0));
        assert_eq!(hotspots[0].event_types, vec!["weapon".to_string()]);
    }

    #[test]
    fn test_busy_zone_is_hotspot_and_sorted_first() {
        let now = Utc::now();
        let mut tracker = HotspotTracker::new(AnalyticsConfig::default());
        for _ in 0..11 {
            tracker.record(event("motion", 0.1, 250.0, 250.0, now));
        }
        tracker.record(event("fire", 0.9, 10.0, 10.0, now));
        let hotspots = tracker.hotspots();
        assert_eq!(hotspots.len(), 2);
        assert_eq!(hotspots[0].event_count, 11);
        assert!(hotspots[0].avg_severity < 0.2);
    }

    #[test]
    fn test_old_events_evicted() {
        let now = Utc::now();
        let mut tracker = HotspotTracker::new(AnalyticsConfig::default());
        tracker.record(event("fire", 0.9, 0.0, 0.0, now - Duration::days(8)));
        tracker.record(event("motion", 0.1, 0.0, 0.0, now));
        assert_eq!(tracker.len(), 1);
        assert!(tracker.hotspots().is_empty());
    }

    #[test]
    fn test_report_notes() {
        let now = Utc::now();
        let mut tracker = HotspotTracker::new(AnalyticsConfig::default());
        for i in 0..21 {
            tracker.record(event("motion", 0.1, i as f64 * 200.0, 0.0, now));
        }
        let report = tracker.report(now);
        assert!(report.hotspots.is_empty());
        assert_eq!(report.notes.len(), 1);
        assert_eq!(report.notes[0].priority, Priority::Medium);

        tracker.record(event("fire", 0.9, 5000.0, 5000.0, now));
        let report = tracker.report(now);
        assert_eq!(report.notes[0].priority, Priority::High);
        assert_eq!(
            report.notes[0].message,
            "Increase monitoring in 1 identified hotspots"
        );
    }
}
