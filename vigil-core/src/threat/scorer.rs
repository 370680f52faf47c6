//! Threat scorer: weighted aggregation, pattern analysis, anomaly detection and
//! trend prediction over a bounded history of cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use super::assessment::{
    AnomalyRecord, ImmediateThreat, NormalRange, PatternSummary, PotentialThreat,
    ThreatAssessment,
};
use super::history::{ThreatHistory, ThreatSample};
use super::normalize::{DetectionBatch, DetectionLog};
use crate::anomaly::{self, OutlierStrategy};
use crate::config::ScoringConfig;
use crate::error::ScoringError;
use crate::types::{DetectionEvent, Priority, Recommendation};

/// Retained detections above this count suggest the host is falling behind.
const CAPACITY_ADVISORY_EVENTS: usize = 100;
/// A type seen more often than this within the retention window is flagged.
const FREQUENT_DETECTION_COUNT: usize = 20;

/// Category of a system-level advisory in the status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryCategory {
    System,
    Security,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemAdvisory {
    pub category: AdvisoryCategory,
    pub message: String,
}

/// Snapshot of the scorer's view of the site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub current_threat_level: f64,
    pub active_threats: Vec<ImmediateThreat>,
    /// Retained detections per type.
    pub detection_summary: BTreeMap<String, usize>,
    pub advisories: Vec<SystemAdvisory>,
}

/// Turns detection batches into threat assessments.
pub struct ThreatScorer {
    config: ScoringConfig,
    strategy: Box<dyn OutlierStrategy>,
    history: ThreatHistory,
    detections: DetectionLog,
    last: Option<ThreatAssessment>,
}

impl std::fmt::Debug for ThreatScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreatScorer")
            .field("strategy", &self.strategy.name())
            .field("history", &self.history.len())
            .field("detections", &self.detections.len())
            .finish()
    }
}

impl ThreatScorer {
    /// Create a scorer using the outlier method named in `config`.
    pub fn new(config: ScoringConfig) -> Self {
        let strategy = config.anomaly.method.clone().into_strategy();
        Self::with_strategy(config, strategy)
    }

    /// Create a scorer with a custom outlier strategy.
    pub fn with_strategy(config: ScoringConfig, strategy: Box<dyn OutlierStrategy>) -> Self {
        Self {
            history: ThreatHistory::new(config.history_capacity),
            detections: DetectionLog::new(config.detection_retention_secs),
            strategy,
            config,
            last: None,
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn history(&self) -> &ThreatHistory {
        &self.history
    }

    pub fn detection_log(&self) -> &DetectionLog {
        &self.detections
    }

    /// The most recent assessment, if any cycle has run.
    pub fn last_assessment(&self) -> Option<&ThreatAssessment> {
        self.last.as_ref()
    }

    /// Score one cycle's detections.
    ///
    /// The cycle's per-type levels are appended to the history before pattern analysis
    /// and prediction run, so the current cycle takes part in its own trends. The outlier
    /// model, however, is fitted on the cycles before it.
    pub fn assess(&mut self, batch: &DetectionBatch, now: DateTime<Utc>) -> ThreatAssessment {
        let events = batch.normalize(now);
        self.detections.record(&events, now);

        let levels = self.levels(&events);
        self.history.push(ThreatSample {
            at: now,
            levels: levels.clone(),
        });

        if events.is_empty() {
            debug!("Empty detection batch");
            let assessment = ThreatAssessment::empty(now);
            self.last = Some(assessment.clone());
            return assessment;
        }

        let mut failures = Vec::new();
        let patterns = self.analyze_patterns(&levels);
        let anomalies = match self.detect_anomalies(&levels) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Anomaly detection failed; continuing without it");
                failures.push(format!("anomaly detection: {e}"));
                Vec::new()
            }
        };
        let potential_threats = self.predict(&levels);

        let threat_level = self.aggregate(&levels, &anomalies, &patterns);
        let immediate_threats = self.immediate_threats(&events, &levels);
        let recommendations =
            self.recommendations(&events, &immediate_threats, &anomalies, &potential_threats);

        debug!(
            threat_level,
            immediate = immediate_threats.len(),
            anomalies = anomalies.len(),
            potential = potential_threats.len(),
            "Threat assessment complete"
        );

        let assessment = ThreatAssessment {
            assessed_at: now,
            threat_level,
            immediate_threats,
            potential_threats,
            anomalies,
            recommendations,
            patterns,
            detections: events,
            complete: failures.is_empty(),
            failures,
        };
        self.last = Some(assessment.clone());
        assessment
    }

    /// Weighted contribution per detector type.
    fn levels(&self, events: &[DetectionEvent]) -> BTreeMap<String, f64> {
        events
            .iter()
            .map(|e| {
                let level = (self.config.weight_for(&e.kind) * e.confidence).clamp(0.0, 1.0);
                (e.kind.clone(), level)
            })
            .collect()
    }

    fn aggregate(
        &self,
        levels: &BTreeMap<String, f64>,
        anomalies: &[AnomalyRecord],
        patterns: &PatternSummary,
    ) -> f64 {
        let adj = &self.config.adjustments;
        let mut level = levels.values().copied().fold(0.0, f64::max);
        if !anomalies.is_empty() {
            level += adj.anomaly;
        }
        if !patterns.recurring.is_empty() {
            level += adj.recurring;
        }
        if !patterns.escalating.is_empty() {
            level += adj.escalating;
        }
        if !patterns.correlated.is_empty() {
            level += adj.correlated;
        }
        level.clamp(0.0, 1.0)
    }

    fn analyze_patterns(&self, levels: &BTreeMap<String, f64>) -> PatternSummary {
        let c = &self.config;
        let significant: Vec<String> = levels
            .iter()
            .filter(|(_, level)| **level > c.significant_level)
            .map(|(kind, _)| kind.clone())
            .collect();
        let correlated = if significant.len() >= c.correlation_min_types.max(2) {
            significant
        } else {
            Vec::new()
        };
        PatternSummary {
            recurring: self.history.recurring(c.significant_level, c.recurrence_count),
            escalating: self.history.escalating(c.escalation_window),
            correlated,
        }
    }

    /// Fit the outlier model on the prior window and classify the current levels.
    fn detect_anomalies(
        &self,
        levels: &BTreeMap<String, f64>,
    ) -> Result<Vec<AnomalyRecord>, ScoringError> {
        let cfg = &self.config.anomaly;
        // History already holds the current sample.
        if self.history.len() < cfg.min_history {
            return Ok(Vec::new());
        }
        let prior = self.history.tail_before_latest(cfg.window);
        if prior.is_empty() {
            return Ok(Vec::new());
        }

        let kinds: BTreeSet<&str> = prior
            .iter()
            .flat_map(|s| s.levels.keys().map(String::as_str))
            .chain(levels.keys().map(String::as_str))
            .collect();
        let matrix: Vec<Vec<f64>> = prior
            .iter()
            .map(|s| kinds.iter().map(|k| s.level(k)).collect())
            .collect();
        let current: Vec<f64> = kinds
            .iter()
            .map(|k| levels.get(*k).copied().unwrap_or(0.0))
            .collect();

        let model = self.strategy.fit(&matrix)?;
        if !model.classify(&current) {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for (dim, kind) in kinds.iter().enumerate() {
            let column: Vec<f64> = matrix.iter().map(|row| row[dim]).collect();
            let mean = anomaly::mean(&column);
            let std = anomaly::std_deviation(&column, mean);
            let upper = mean + cfg.std_multiplier * std;
            let value = current[dim];
            if value > upper {
                records.push(AnomalyRecord {
                    kind: (*kind).to_string(),
                    value,
                    normal_range: NormalRange { mean, std, upper },
                });
            }
        }
        Ok(records)
    }

    fn predict(&self, levels: &BTreeMap<String, f64>) -> Vec<PotentialThreat> {
        let p = &self.config.prediction;
        if self.history.len() < p.window {
            return Vec::new();
        }
        levels
            .keys()
            .filter_map(|kind| {
                let slope = anomaly::linear_slope(&self.history.series(kind, p.window));
                (slope > p.min_slope).then(|| PotentialThreat {
                    kind: kind.clone(),
                    likelihood: (slope * p.likelihood_scale).clamp(0.0, 1.0),
                    timeframe: p.timeframe.clone(),
                    basis: p.basis.clone(),
                })
            })
            .collect()
    }

    fn immediate_threats(
        &self,
        events: &[DetectionEvent],
        levels: &BTreeMap<String, f64>,
    ) -> Vec<ImmediateThreat> {
        let c = &self.config;
        events
            .iter()
            .filter_map(|event| {
                let level = levels.get(&event.kind).copied().unwrap_or(0.0);
                let priority = if level > c.high_threat_level {
                    Priority::High
                } else if level > c.medium_threat_level {
                    Priority::Medium
                } else {
                    return None;
                };
                Some(ImmediateThreat {
                    kind: event.kind.clone(),
                    level,
                    priority,
                    required_action: c.action_for(&event.kind).to_string(),
                    location: event.location(),
                    region: event.region,
                })
            })
            .collect()
    }

    fn recommendations(
        &self,
        events: &[DetectionEvent],
        immediate: &[ImmediateThreat],
        anomalies: &[AnomalyRecord],
        potential: &[PotentialThreat],
    ) -> Vec<Recommendation> {
        let mut recs = Vec::new();
        for threat in immediate {
            recs.push(Recommendation::new(
                threat.priority,
                threat.required_action.clone(),
                format!("Threat Level: {:.2}", threat.level),
            ));
        }
        for anomaly in anomalies {
            recs.push(Recommendation::new(
                Priority::High,
                format!("Investigate anomalous {} activity", anomaly.kind),
                format!(
                    "Value: {:.2}, Expected: {:.2}",
                    anomaly.value, anomaly.normal_range.mean
                ),
            ));
        }
        for threat in potential {
            recs.push(Recommendation::new(
                Priority::Medium,
                format!("Prepare for potential {} incident", threat.kind),
                format!(
                    "Likelihood: {:.2}, Timeframe: {}",
                    threat.likelihood, threat.timeframe
                ),
            ));
        }
        for event in events.iter().filter(|e| e.kind == "crowd") {
            let count = event.metadata.get("count").and_then(serde_json::Value::as_u64);
            if let Some(count) = count
                && count > self.config.crowd_advisory_size
            {
                recs.push(Recommendation::new(
                    Priority::Medium,
                    "Monitor crowd density",
                    format!("Large crowd of {count} people detected"),
                ));
            }
        }
        recs
    }

    /// Current level, active threats, retained detections and system advisories.
    pub fn status_report(&self) -> StatusReport {
        let detection_summary = self.detections.summary();
        let mut advisories = Vec::new();
        if self.detections.len() > CAPACITY_ADVISORY_EVENTS {
            advisories.push(SystemAdvisory {
                category: AdvisoryCategory::System,
                message: "Consider increasing processing capacity".into(),
            });
        }
        for (kind, count) in &detection_summary {
            if *count > FREQUENT_DETECTION_COUNT {
                advisories.push(SystemAdvisory {
                    category: AdvisoryCategory::Security,
                    message: format!("High frequency of {kind} detections - investigate area"),
                });
            }
        }
        let (current_threat_level, active_threats) = match &self.last {
            Some(a) => (a.threat_level, a.immediate_threats.clone()),
            None => (0.0, Vec::new()),
        };
        StatusReport {
            current_threat_level,
            active_threats,
            detection_summary,
            advisories,
        }
    }
}
