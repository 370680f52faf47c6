//! The per-cycle threat assessment produced by the scorer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BoundingBox, DetectionEvent, Point, Priority, Recommendation};

/// A threat present in the current cycle that needs attention now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImmediateThreat {
    pub kind: String,
    /// Weighted contribution (weight x confidence), in [0, 1].
    pub level: f64,
    pub priority: Priority,
    pub required_action: String,
    /// Center of the detection region.
    pub location: Point,
    pub region: BoundingBox,
}

/// A threat predicted from the recent trend of its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentialThreat {
    pub kind: String,
    /// In [0, 1].
    pub likelihood: f64,
    pub timeframe: String,
    pub basis: String,
}

/// Historical distribution a flagged value was compared against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalRange {
    pub mean: f64,
    pub std: f64,
    /// `mean + k * std`; the flagged value exceeded this.
    pub upper: f64,
}

/// A threat type whose current level is a statistical outlier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub kind: String,
    pub value: f64,
    pub normal_range: NormalRange,
}

/// A type that was significant more often than the recurrence count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringThreat {
    pub kind: String,
    pub count: usize,
}

/// Patterns found in the retained history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub recurring: Vec<RecurringThreat>,
    pub escalating: Vec<String>,
    /// Types concurrently significant in this cycle (empty unless enough of them).
    pub correlated: Vec<String>,
}

impl PatternSummary {
    pub fn is_empty(&self) -> bool {
        self.recurring.is_empty() && self.escalating.is_empty() && self.correlated.is_empty()
    }
}

/// Scored snapshot of current and predicted danger for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatAssessment {
    pub assessed_at: DateTime<Utc>,
    /// Aggregate level in [0, 1].
    pub threat_level: f64,
    pub immediate_threats: Vec<ImmediateThreat>,
    pub potential_threats: Vec<PotentialThreat>,
    pub anomalies: Vec<AnomalyRecord>,
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub patterns: PatternSummary,
    /// Normalised detections this assessment was computed from.
    #[serde(default)]
    pub detections: Vec<DetectionEvent>,
    /// `false` when part of the computation failed and was zeroed out.
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

impl ThreatAssessment {
    /// Assessment of a cycle with no detections.
    pub fn empty(at: DateTime<Utc>) -> Self {
        Self {
            assessed_at: at,
            threat_level: 0.0,
            immediate_threats: Vec::new(),
            potential_threats: Vec::new(),
            anomalies: Vec::new(),
            recommendations: Vec::new(),
            patterns: PatternSummary::default(),
            detections: Vec::new(),
            complete: true,
            failures: Vec::new(),
        }
    }

    /// Detection event of the given type, if present this cycle.
    pub fn detection(&self, kind: &str) -> Option<&DetectionEvent> {
        self.detections.iter().find(|d| d.kind == kind)
    }

    pub fn urgent_recommendations(&self) -> impl Iterator<Item = &Recommendation> {
        self.recommendations.iter().filter(|r| r.priority.is_urgent())
    }
}
