//! Incident lifecycle: records, state machine, response templates and statistics.
//!
//! Incidents live in exactly one of two stores. The active store is mutable through
//! [`IncidentManager`]; resolving or closing moves a record into the append-only
//! archive, after which it never changes.

pub mod manager;
pub mod playbook;
pub mod stats;

pub use manager::{IncidentLedger, IncidentManager};
pub use playbook::{ResponseStep, default_templates};
pub use stats::{IncidentStatistics, ResponseEffectiveness};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::threat::{ImmediateThreat, ThreatAssessment};
use crate::types::{DetectionEvent, Point, Priority, Recommendation};

/// Incident lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    New,
    Investigating,
    Responding,
    Resolved,
    Closed,
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentStatus::New => write!(f, "NEW"),
            IncidentStatus::Investigating => write!(f, "INVESTIGATING"),
            IncidentStatus::Responding => write!(f, "RESPONDING"),
            IncidentStatus::Resolved => write!(f, "RESOLVED"),
            IncidentStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

impl std::str::FromStr for IncidentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NEW" => Ok(IncidentStatus::New),
            "INVESTIGATING" => Ok(IncidentStatus::Investigating),
            "RESPONDING" => Ok(IncidentStatus::Responding),
            "RESOLVED" => Ok(IncidentStatus::Resolved),
            "CLOSED" => Ok(IncidentStatus::Closed),
            other => Err(format!("unknown incident status: {other}")),
        }
    }
}

impl IncidentStatus {
    /// RESOLVED and CLOSED admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IncidentStatus::Resolved | IncidentStatus::Closed)
    }
}

/// Transitions allowed through `update`. RESOLVED and CLOSED are reached only
/// through `resolve` and `close`.
pub(crate) fn is_valid_transition(from: IncidentStatus, to: IncidentStatus) -> bool {
    matches!(
        (from, to),
        (IncidentStatus::New, IncidentStatus::Investigating)
            | (IncidentStatus::New, IncidentStatus::Responding)
            | (IncidentStatus::Investigating, IncidentStatus::Responding)
            | (IncidentStatus::Responding, IncidentStatus::Investigating)
    )
}

/// One action taken on an incident. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentResponse {
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub responder: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Priority the responder assigned at the time of this action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl IncidentResponse {
    pub fn new(
        action: impl Into<String>,
        responder: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            timestamp: Utc::now(),
            responder: responder.into(),
            outcome: outcome.into(),
            notes: None,
            priority: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// How an incident left the active store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

/// The part of the originating assessment kept with an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatSnapshot {
    pub assessed_at: DateTime<Utc>,
    pub threat_level: f64,
    pub immediate_threats: Vec<ImmediateThreat>,
    pub recommendations: Vec<Recommendation>,
}

impl From<&ThreatAssessment> for ThreatSnapshot {
    fn from(a: &ThreatAssessment) -> Self {
        Self {
            assessed_at: a.assessed_at,
            threat_level: a.threat_level,
            immediate_threats: a.immediate_threats.clone(),
            recommendations: a.recommendations.clone(),
        }
    }
}

/// A tracked threat requiring human response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub kind: String,
    pub priority: Priority,
    pub status: IncidentStatus,
    pub location: Point,
    pub detection: DetectionEvent,
    pub threat: ThreatSnapshot,
    pub responses: Vec<IncidentResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    /// Cycles in which the same threat type was seen again while this incident was open.
    #[serde(default)]
    pub observations: u32,
    pub last_seen: DateTime<Utc>,
}

impl Incident {
    /// The threat level recorded when the incident was opened.
    pub fn threat_level(&self) -> f64 {
        self.threat.threat_level
    }

    /// True when the last response carries a strictly more severe priority than the first.
    pub fn escalated(&self) -> bool {
        let first = self.responses.first().and_then(|r| r.priority);
        let last = self.responses.last().and_then(|r| r.priority);
        matches!((first, last), (Some(f), Some(l)) if l > f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use IncidentStatus::*;
        assert!(is_valid_transition(New, Investigating));
        assert!(is_valid_transition(New, Responding));
        assert!(is_valid_transition(Investigating, Responding));
        assert!(is_valid_transition(Responding, Investigating));
        assert!(!is_valid_transition(Investigating, New));
        assert!(!is_valid_transition(New, Resolved));
        assert!(!is_valid_transition(Resolved, Investigating));
        assert!(!is_valid_transition(Closed, New));
    }

    #[test]
    fn test_status_parse_and_display() {
        for status in [
            IncidentStatus::New,
            IncidentStatus::Investigating,
            IncidentStatus::Responding,
            IncidentStatus::Resolved,
            IncidentStatus::Closed,
        ] {
            let parsed: IncidentStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!("investigating".parse::<IncidentStatus>(), Ok(IncidentStatus::Investigating));
        assert!("bogus".parse::<IncidentStatus>().is_err());
        assert!(IncidentStatus::Closed.is_terminal());
        assert!(!IncidentStatus::Responding.is_terminal());
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&IncidentStatus::Investigating).unwrap();
        assert_eq!(json, "\"INVESTIGATING\"");
    }
}
