//! Active incident store plus append-only archive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::playbook::{self, ResponseStep};
use super::stats::{self, IncidentStatistics};
use super::{
    Incident, IncidentResponse, IncidentStatus, Resolution, ThreatSnapshot, is_valid_transition,
};
use crate::error::IncidentError;
use crate::threat::ThreatAssessment;
use crate::types::{DetectionEvent, Priority};

/// Serializable form of both stores, used for persistence across restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentLedger {
    /// Next id sequence number. Never reused.
    pub next_seq: u64,
    pub active: Vec<Incident>,
    pub archived: Vec<Incident>,
}

/// Creates, updates and archives incidents.
#[derive(Debug, Clone)]
pub struct IncidentManager {
    active: BTreeMap<String, Incident>,
    archive: Vec<Incident>,
    templates: BTreeMap<String, Vec<ResponseStep>>,
    next_seq: u64,
}

impl IncidentManager {
    pub fn new(templates: BTreeMap<String, Vec<ResponseStep>>) -> Self {
        Self {
            active: BTreeMap::new(),
            archive: Vec::new(),
            templates,
            next_seq: 0,
        }
    }

    /// Restore both stores from a ledger.
    pub fn from_ledger(
        ledger: IncidentLedger,
        templates: BTreeMap<String, Vec<ResponseStep>>,
    ) -> Self {
        let total = (ledger.active.len() + ledger.archived.len()) as u64;
        Self {
            active: ledger
                .active
                .into_iter()
                .map(|i| (i.id.clone(), i))
                .collect(),
            archive: ledger.archived,
            templates,
            next_seq: ledger.next_seq.max(total),
        }
    }

    pub fn ledger(&self) -> IncidentLedger {
        IncidentLedger {
            next_seq: self.next_seq,
            active: self.active().into_iter().cloned().collect(),
            archived: self.archive.clone(),
        }
    }

    fn next_id(&mut self, at: DateTime<Utc>) -> String {
        let id = format!("INC-{}-{:04}", at.format("%Y%m%d%H%M%S"), self.next_seq);
        self.next_seq += 1;
        id
    }

    /// Open an incident for `detection`, created at the assessment's time.
    ///
    /// Priority follows the assessment's aggregate threat level; status starts at NEW.
    pub fn create(&mut self, detection: &DetectionEvent, assessment: &ThreatAssessment) -> String {
        let created_at = assessment.assessed_at;
        let id = self.next_id(created_at);
        let priority = Priority::from_threat_level(assessment.threat_level);
        let incident = Incident {
            id: id.clone(),
            created_at,
            kind: detection.kind.clone(),
            priority,
            status: IncidentStatus::New,
            location: detection.location(),
            detection: detection.clone(),
            threat: ThreatSnapshot::from(assessment),
            responses: Vec::new(),
            resolution: None,
            observations: 0,
            last_seen: created_at,
        };
        info!(id = %id, kind = %incident.kind, %priority, "Incident created");
        self.active.insert(id.clone(), incident);
        id
    }

    /// Set a new status and/or append a response on an active incident.
    ///
    /// The transition is checked before anything is written, so a rejected update
    /// leaves the incident untouched.
    pub fn update(
        &mut self,
        id: &str,
        status: Option<IncidentStatus>,
        response: Option<IncidentResponse>,
    ) -> Result<(), IncidentError> {
        let incident = self
            .active
            .get_mut(id)
            .ok_or_else(|| IncidentError::NotFound(id.to_string()))?;

        if let Some(to) = status
            && to != incident.status
            && !is_valid_transition(incident.status, to)
        {
            return Err(IncidentError::InvalidTransition {
                from: incident.status,
                to,
            });
        }

        if let Some(to) = status {
            debug!(id, from = %incident.status, %to, "Incident status changed");
            incident.status = to;
        }
        if let Some(response) = response {
            incident.responses.push(response);
        }
        Ok(())
    }

    /// Mark an active incident RESOLVED and move it to the archive.
    pub fn resolve(&mut self, id: &str, details: impl Into<String>) -> Result<(), IncidentError> {
        self.archive_with(id, IncidentStatus::Resolved, details.into(), Utc::now())
    }

    /// Dismiss an active incident without resolution; it is archived as CLOSED.
    pub fn close(&mut self, id: &str, reason: impl Into<String>) -> Result<(), IncidentError> {
        self.archive_with(id, IncidentStatus::Closed, reason.into(), Utc::now())
    }

    fn archive_with(
        &mut self,
        id: &str,
        status: IncidentStatus,
        details: String,
        now: DateTime<Utc>,
    ) -> Result<(), IncidentError> {
        let mut incident = self
            .active
            .remove(id)
            .ok_or_else(|| IncidentError::NotFound(id.to_string()))?;
        incident.status = status;
        incident.resolution = Some(Resolution {
            timestamp: now.max(incident.created_at),
            details,
        });
        info!(id, %status, "Incident archived");
        self.archive.push(incident);
        Ok(())
    }

    /// Note that the incident's threat type was seen again.
    pub fn record_observation(&mut self, id: &str, at: DateTime<Utc>) -> Result<(), IncidentError> {
        let incident = self
            .active
            .get_mut(id)
            .ok_or_else(|| IncidentError::NotFound(id.to_string()))?;
        incident.observations += 1;
        incident.last_seen = incident.last_seen.max(at);
        Ok(())
    }

    /// Applicable template steps for an active incident, most severe first.
    pub fn get_response_plan(&self, id: &str) -> Result<Vec<ResponseStep>, IncidentError> {
        let incident = self
            .active
            .get(id)
            .ok_or_else(|| IncidentError::NotFound(id.to_string()))?;
        Ok(self
            .templates
            .get(&incident.kind)
            .map(|t| playbook::plan_for(t, incident.threat_level()))
            .unwrap_or_default())
    }

    /// Look up an incident in the active store, then the archive.
    pub fn get(&self, id: &str) -> Option<&Incident> {
        self.active
            .get(id)
            .or_else(|| self.archive.iter().find(|i| i.id == id))
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    /// The open incident of the given type, if one exists.
    pub fn active_of_kind(&self, kind: &str) -> Option<&Incident> {
        self.active.values().find(|i| i.kind == kind)
    }

    /// Active incidents in creation order.
    pub fn active(&self) -> Vec<&Incident> {
        let mut incidents: Vec<&Incident> = self.active.values().collect();
        incidents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        incidents
    }

    pub fn archived(&self) -> &[Incident] {
        &self.archive
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn archived_count(&self) -> usize {
        self.archive.len()
    }

    pub fn statistics(&self) -> IncidentStatistics {
        stats::compute(self.active.values(), &self.archive)
    }
}

impl Default for IncidentManager {
    fn default() -> Self {
        Self::new(playbook::default_templates())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threat::DetectionBatch;
    use pretty_assertions::assert_eq;

    fn assessment(level: f64) -> (DetectionEvent, ThreatAssessment) {
        let now = Utc::now();
        let events = DetectionBatch::new()
            .with_single("weapon", 0.9, [0.0, 0.0, 10.0, 10.0])
            .normalize(now);
        let mut a = ThreatAssessment::empty(now);
        a.threat_level = level;
        a.detections = events.clone();
        (events[0].clone(), a)
    }

    #[test]
    fn test_create_incident() {
        let mut mgr = IncidentManager::default();
        let (det, a) = assessment(0.81);
        let id = mgr.create(&det, &a);
        let incident = mgr.get(&id).unwrap();
        assert_eq!(incident.status, IncidentStatus::New);
        assert_eq!(incident.priority, Priority::Critical);
        assert!(incident.responses.is_empty());
        assert!(id.starts_with("INC-"));
        assert!(id.ends_with("-0000"));
    }

    #[test]
    fn test_priority_thresholds() {
        let mut mgr = IncidentManager::default();
        for (level, expected) in [
            (0.85, Priority::Critical),
            (0.65, Priority::High),
            (0.45, Priority::Medium),
            (0.2, Priority::Low),
        ] {
            let (det, a) = assessment(level);
            let id = mgr.create(&det, &a);
            assert_eq!(mgr.get(&id).unwrap().priority, expected);
        }
    }

    #[test]
    fn test_ids_never_repeat() {
        let mut mgr = IncidentManager::default();
        let (det, a) = assessment(0.5);
        let first = mgr.create(&det, &a);
        mgr.resolve(&first, "done").unwrap();
        let second = mgr.create(&det, &a);
        assert_ne!(first, second);
    }

    #[test]
    fn test_update_status_and_response() {
        let mut mgr = IncidentManager::default();
        let (det, a) = assessment(0.7);
        let id = mgr.create(&det, &a);
        mgr.update(
            &id,
            Some(IncidentStatus::Investigating),
            Some(IncidentResponse::new("Dispatch guard", "guard-1", "en route")),
        )
        .unwrap();
        let incident = mgr.get(&id).unwrap();
        assert_eq!(incident.status, IncidentStatus::Investigating);
        assert_eq!(incident.responses.len(), 1);
    }

    #[test]
    fn test_update_unknown_id() {
        let mut mgr = IncidentManager::default();
        let err = mgr.update("INC-missing", Some(IncidentStatus::Investigating), None);
        assert!(matches!(err, Err(IncidentError::NotFound(_))));
    }

    #[test]
    fn test_update_rejects_terminal_status() {
        let mut mgr = IncidentManager::default();
        let (det, a) = assessment(0.7);
        let id = mgr.create(&det, &a);
        let err = mgr
            .update(
                &id,
                Some(IncidentStatus::Resolved),
                Some(IncidentResponse::new("x", "y", "z")),
            )
            .unwrap_err();
        assert!(matches!(err, IncidentError::InvalidTransition { .. }));
        // Nothing was written.
        let incident = mgr.get(&id).unwrap();
        assert_eq!(incident.status, IncidentStatus::New);
        assert!(incident.responses.is_empty());
    }

    #[test]
    fn test_resolve_moves_to_archive() {
        let mut mgr = IncidentManager::default();
        let (det, a) = assessment(0.9);
        let id = mgr.create(&det, &a);
        mgr.resolve(&id, "Suspect detained").unwrap();
        assert_eq!(mgr.active_count(), 0);
        assert_eq!(mgr.archived_count(), 1);
        let archived = mgr.get(&id).unwrap();
        assert_eq!(archived.status, IncidentStatus::Resolved);
        let resolution = archived.resolution.as_ref().unwrap();
        assert!(resolution.timestamp >= archived.created_at);
        assert_eq!(resolution.details, "Suspect detained");
    }

    #[test]
    fn test_resolve_unknown_leaves_stores_unchanged() {
        let mut mgr = IncidentManager::default();
        let (det, a) = assessment(0.9);
        let id = mgr.create(&det, &a);
        mgr.resolve(&id, "done").unwrap();
        let before = mgr.ledger();
        assert!(mgr.resolve(&id, "again").is_err());
        assert!(mgr.resolve("INC-nope", "x").is_err());
        assert_eq!(mgr.ledger(), before);
    }

    #[test]
    fn test_archived_incident_is_immutable() {
        let mut mgr = IncidentManager::default();
        let (det, a) = assessment(0.9);
        let id = mgr.create(&det, &a);
        mgr.close(&id, "false alarm").unwrap();
        assert!(
            mgr.update(&id, None, Some(IncidentResponse::new("a", "b", "c")))
                .is_err()
        );
        assert!(mgr.record_observation(&id, Utc::now()).is_err());
        assert_eq!(mgr.get(&id).unwrap().status, IncidentStatus::Closed);
    }

    #[test]
    fn test_response_plan() {
        let mut mgr = IncidentManager::default();
        let (det, a) = assessment(0.81);
        let id = mgr.create(&det, &a);
        let plan = mgr.get_response_plan(&id).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].priority, Priority::Critical);

        mgr.resolve(&id, "done").unwrap();
        assert!(mgr.get_response_plan(&id).is_err());
    }

    #[test]
    fn test_response_plan_without_template() {
        let mut mgr = IncidentManager::new(BTreeMap::new());
        let (det, a) = assessment(0.9);
        let id = mgr.create(&det, &a);
        assert!(mgr.get_response_plan(&id).unwrap().is_empty());
    }

    #[test]
    fn test_record_observation() {
        let mut mgr = IncidentManager::default();
        let (det, a) = assessment(0.6);
        let id = mgr.create(&det, &a);
        let later = a.assessed_at + chrono::Duration::seconds(30);
        mgr.record_observation(&id, later).unwrap();
        let incident = mgr.get(&id).unwrap();
        assert_eq!(incident.observations, 1);
        assert_eq!(incident.last_seen, later);
        assert_eq!(mgr.active_of_kind("weapon").map(|i| i.id.as_str()), Some(id.as_str()));
    }

    #[test]
    fn test_ledger_roundtrip_keeps_sequence() {
        let mut mgr = IncidentManager::default();
        let (det, a) = assessment(0.6);
        let first = mgr.create(&det, &a);
        let ledger = mgr.ledger();
        let json = serde_json::to_string(&ledger).unwrap();
        let restored: IncidentLedger = serde_json::from_str(&json).unwrap();
        let mut mgr = IncidentManager::from_ledger(restored, playbook::default_templates());
        assert!(mgr.is_active(&first));
        let second = mgr.create(&det, &a);
        assert_ne!(first, second);
    }
}
