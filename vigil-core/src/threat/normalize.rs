//! Detection boundary: lenient parsing of perception payloads into typed events.
//!
//! Perception output arrives as a loosely-shaped JSON object mapping detector names to
//! either one detection or a list of them. It is normalised here into a closed set of
//! variants, after which everything downstream is fully typed. Malformed fields fall
//! back to defaults (score 0, zero-area box) and never fail the cycle.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};

use crate::types::{BoundingBox, DetectionEvent};

/// A single detection as reported by a detector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDetection {
    pub score: f64,
    #[serde(rename = "box")]
    pub region: BoundingBox,
    /// Every field other than `score` and `box`.
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl RawDetection {
    /// Parse one detection record, substituting defaults for anything malformed.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let score = obj
            .get("score")
            .and_then(Value::as_f64)
            .map(clamp_score)
            .unwrap_or(0.0);
        let region = obj.get("box").and_then(parse_box).unwrap_or_default();
        let metadata = obj
            .iter()
            .filter(|(k, _)| k.as_str() != "score" && k.as_str() != "box")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Some(Self {
            score,
            region,
            metadata,
        })
    }
}

/// Non-finite scores become 0; everything else is clamped into [0, 1].
fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn parse_box(value: &Value) -> Option<BoundingBox> {
    let items = value.as_array()?;
    if items.len() != 4 {
        return None;
    }
    let mut coords = [0.0; 4];
    for (slot, item) in coords.iter_mut().zip(items) {
        *slot = item.as_f64().filter(|v| v.is_finite())?;
    }
    Some(BoundingBox::from(coords))
}

/// Payload of one detector for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionPayload {
    Single(RawDetection),
    Multiple(Vec<RawDetection>),
}

impl DetectionPayload {
    /// Returns `None` for payloads that carry no detection at all.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => {
                let detections: Vec<RawDetection> =
                    items.iter().filter_map(RawDetection::from_value).collect();
                if detections.is_empty() {
                    None
                } else {
                    Some(DetectionPayload::Multiple(detections))
                }
            }
            Value::Object(_) => RawDetection::from_value(value).map(DetectionPayload::Single),
            _ => None,
        }
    }

    /// Collapse the payload into one event: highest score, first region.
    pub fn normalize(&self, kind: &str, now: DateTime<Utc>) -> DetectionEvent {
        match self {
            DetectionPayload::Single(d) => DetectionEvent {
                kind: kind.to_string(),
                confidence: clamp_score(d.score),
                timestamp: now,
                region: d.region,
                metadata: d.metadata.clone(),
            },
            DetectionPayload::Multiple(all) => {
                let confidence = all
                    .iter()
                    .map(|d| clamp_score(d.score))
                    .fold(0.0, f64::max);
                // Only the first region is kept; the others are counted.
                let (region, mut metadata) = all
                    .first()
                    .map(|d| (d.region, d.metadata.clone()))
                    .unwrap_or_default();
                metadata.insert("detection_count".into(), Value::from(all.len()));
                DetectionEvent {
                    kind: kind.to_string(),
                    confidence,
                    timestamp: now,
                    region,
                    metadata,
                }
            }
        }
    }
}

/// All payloads of one cycle, keyed by detector name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionBatch {
    payloads: BTreeMap<String, DetectionPayload>,
}

impl DetectionBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a detector-name to payload(s) object. Anything that is not an object
    /// yields an empty batch; unusable entries are skipped.
    pub fn from_json(value: &Value) -> Self {
        let mut batch = Self::new();
        let Some(obj) = value.as_object() else {
            tracing::debug!("Detection batch is not an object; treating as empty");
            return batch;
        };
        for (name, payload) in obj {
            match DetectionPayload::from_value(payload) {
                Some(p) => {
                    batch.payloads.insert(name.clone(), p);
                }
                None => tracing::debug!(detector = %name, "Skipping empty or malformed payload"),
            }
        }
        batch
    }

    pub fn insert(&mut self, kind: impl Into<String>, payload: DetectionPayload) {
        self.payloads.insert(kind.into(), payload);
    }

    /// Convenience for a single detection with the given score and box.
    pub fn with_single(mut self, kind: &str, score: f64, region: [f64; 4]) -> Self {
        self.insert(
            kind,
            DetectionPayload::Single(RawDetection {
                score: clamp_score(score),
                region: region.into(),
                metadata: Map::new(),
            }),
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    /// Normalise every payload into one event per detector.
    pub fn normalize(&self, now: DateTime<Utc>) -> Vec<DetectionEvent> {
        self.payloads
            .iter()
            .map(|(kind, payload)| payload.normalize(kind, now))
            .collect()
    }
}

impl<'de> Deserialize<'de> for DetectionBatch {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_json(&value))
    }
}

/// Time-bounded rolling history of normalised detection events.
#[derive(Debug, Clone)]
pub struct DetectionLog {
    events: VecDeque<DetectionEvent>,
    retention: Duration,
}

impl DetectionLog {
    pub fn new(retention_secs: i64) -> Self {
        Self {
            events: VecDeque::new(),
            retention: Duration::seconds(retention_secs),
        }
    }

    /// Append events, then evict everything older than the retention window.
    pub fn record(&mut self, events: &[DetectionEvent], now: DateTime<Utc>) {
        self.events.extend(events.iter().cloned());
        self.evict(now);
    }

    pub fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        self.events.retain(|e| e.timestamp >= cutoff);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectionEvent> {
        self.events.iter()
    }

    /// Number of retained events per detector type.
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for event in &self.events {
            *counts.entry(event.kind.clone()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_payload() {
        let batch = DetectionBatch::from_json(&json!({
            "weapon": {"score": 0.9, "box": [0, 0, 10, 10], "label": "pistol"}
        }));
        let events = batch.normalize(Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "weapon");
        assert_eq!(events[0].confidence, 0.9);
        assert_eq!(events[0].region, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        assert_eq!(events[0].metadata.get("label"), Some(&json!("pistol")));
    }

    #[test]
    fn test_empty_multiple_payload_normalizes_to_zero() {
        let mut batch = DetectionBatch::new();
        batch.insert("weapon", DetectionPayload::Multiple(Vec::new()));
        let events = batch.normalize(Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].confidence, 0.0);
        assert_eq!(events[0].region, BoundingBox::default());
        assert_eq!(events[0].metadata.get("detection_count"), Some(&json!(0)));
    }

    #[test]
    fn test_non_finite_scores_become_zero() {
        let batch = DetectionBatch::new()
            .with_single("fire", f64::NAN, [0.0, 0.0, 1.0, 1.0])
            .with_single("weapon", f64::INFINITY, [0.0, 0.0, 1.0, 1.0]);
        let events = batch.normalize(Utc::now());
        assert!(events.iter().all(|e| e.confidence == 0.0));

        let mut batch = DetectionBatch::new();
        batch.insert(
            "crowd",
            DetectionPayload::Single(RawDetection {
                score: f64::NAN,
                ..Default::default()
            }),
        );
        assert_eq!(batch.normalize(Utc::now())[0].confidence, 0.0);
    }

    #[test]
    fn test_multiple_payload_takes_max_score_and_first_box() {
        let batch = DetectionBatch::from_json(&json!({
            "fire": [
                {"score": 0.4, "box": [1, 2, 3, 4]},
                {"score": 0.8, "box": [50, 50, 5, 5]}
            ]
        }));
        let events = batch.normalize(Utc::now());
        assert_eq!(events[0].confidence, 0.8);
        assert_eq!(events[0].region, BoundingBox::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(events[0].metadata.get("detection_count"), Some(&json!(2)));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let batch = DetectionBatch::from_json(&json!({
            "motion": {"box": "bogus"},
            "crowd": {"score": "high", "count": 40}
        }));
        let events = batch.normalize(Utc::now());
        assert_eq!(events.len(), 2);
        for event in &events {
            assert_eq!(event.confidence, 0.0);
            assert_eq!(event.region.area(), 0.0);
        }
    }

    #[test]
    fn test_scores_are_clamped() {
        let batch = DetectionBatch::from_json(&json!({"weapon": {"score": 7.5}}));
        assert_eq!(batch.normalize(Utc::now())[0].confidence, 1.0);
    }

    #[test]
    fn test_empty_and_malformed_payloads_skipped() {
        let batch = DetectionBatch::from_json(&json!({
            "weapon": [],
            "fire": 3,
            "motion": null
        }));
        assert!(batch.is_empty());
        assert!(DetectionBatch::from_json(&json!([1, 2])).is_empty());
    }

    #[test]
    fn test_batch_deserializes_leniently() {
        let batch: DetectionBatch =
            serde_json::from_str(r#"{"weapon": {"score": 0.5}, "junk": "x"}"#).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_detection_log_evicts_old_events() {
        let now = Utc::now();
        let mut log = DetectionLog::new(3600);
        let old = DetectionBatch::new()
            .with_single("motion", 0.3, [0.0, 0.0, 1.0, 1.0])
            .normalize(now - Duration::seconds(7200));
        log.record(&old, now - Duration::seconds(7200));
        assert_eq!(log.len(), 1);

        let fresh = DetectionBatch::new()
            .with_single("fire", 0.9, [0.0, 0.0, 1.0, 1.0])
            .normalize(now);
        log.record(&fresh, now);
        assert_eq!(log.len(), 1);
        assert_eq!(log.summary().get("fire"), Some(&1));
        assert!(log.summary().get("motion").is_none());
    }
}
