//! The cycle engine: scorer, then incidents, then allocation, once per detection batch.
//!
//! Each store sits behind its own mutex. A whole cycle additionally holds the cycle
//! counter lock, so cycles never interleave while readers can still take snapshots of
//! any store between stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::allocation::{
    CoverageMap, OptimizationPlan, Resource, ResourceOptimizer, ResourcePool, ResourceStatus,
};
use crate::analytics::{AdvisoryNote, HistoricalAnalytics, HotspotTracker};
use crate::config::VigilConfig;
use crate::error::{ConfigError, IncidentError, ResourceError};
use crate::incident::{
    Incident, IncidentManager, IncidentResponse, IncidentStatistics, IncidentStatus,
    ResponseStep,
};
use crate::store::PersistedState;
use crate::threat::{DetectionBatch, StatusReport, ThreatAssessment, ThreatScorer};
use crate::types::{Point, Recommendation};

/// Which stage produced a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOrigin {
    Threat,
    Allocation,
}

/// An urgent recommendation dispatched after a cycle commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub cycle: u64,
    pub issued_at: DateTime<Utc>,
    pub origin: NotificationOrigin,
    pub recommendation: Recommendation,
}

/// Everything one cycle produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub assessment: ThreatAssessment,
    /// Ids of incidents opened this cycle.
    pub opened: Vec<String>,
    /// Ids of already-open incidents whose threat type was seen again.
    pub observed: Vec<String>,
    pub plan: OptimizationPlan,
    /// Advisory notes of the historical analytics used for allocation.
    pub analytics_notes: Vec<AdvisoryNote>,
    /// `false` when any stage returned a partial result.
    pub complete: bool,
    pub failures: Vec<String>,
}

/// Read-only copy of both incident stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentSnapshot {
    pub active: Vec<Incident>,
    pub archived: Vec<Incident>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every store and runs detection cycles.
pub struct Engine {
    config: VigilConfig,
    cycle: Mutex<u64>,
    scorer: Mutex<ThreatScorer>,
    incidents: Mutex<IncidentManager>,
    pool: Mutex<ResourcePool>,
    hotspots: Mutex<HotspotTracker>,
    optimizer: ResourceOptimizer,
    notifier: Option<mpsc::UnboundedSender<Notification>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("notifications", &self.notifier.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine with empty stores. Fails if the configuration is invalid.
    pub fn new(config: VigilConfig) -> Result<Self, ConfigError> {
        Self::from_state(config, PersistedState::default())
    }

    /// Build an engine resuming from persisted state.
    pub fn from_state(config: VigilConfig, state: PersistedState) -> Result<Self, ConfigError> {
        config.validate()?;
        let al = &config.allocation;
        let pool = ResourcePool::from_resources(state.resources, al.influence_radii, al.grid_cell);
        let incidents =
            IncidentManager::from_ledger(state.incidents, config.incidents.templates.clone());
        let hotspots =
            HotspotTracker::from_events(config.analytics.clone(), state.analytics_events);
        info!(
            cycle = state.cycle,
            resources = pool.len(),
            active_incidents = incidents.active_count(),
            "Engine initialized"
        );
        Ok(Self {
            cycle: Mutex::new(state.cycle),
            scorer: Mutex::new(ThreatScorer::new(config.scoring.clone())),
            incidents: Mutex::new(incidents),
            pool: Mutex::new(pool),
            hotspots: Mutex::new(hotspots),
            optimizer: ResourceOptimizer::new(config.allocation.clone()),
            notifier: None,
            config,
        })
    }

    /// Open the notification channel. Replaces any previous receiver.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.notifier = Some(tx);
        rx
    }

    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    /// Number of cycles run so far.
    pub fn cycles(&self) -> u64 {
        *lock(&self.cycle)
    }

    /// Run one cycle now. Uses the engine's own hotspot history when `analytics` is `None`.
    pub fn run_cycle(
        &self,
        batch: &DetectionBatch,
        analytics: Option<&HistoricalAnalytics>,
    ) -> CycleReport {
        self.run_cycle_at(batch, analytics, Utc::now())
    }

    /// Run one cycle with an explicit clock reading.
    pub fn run_cycle_at(
        &self,
        batch: &DetectionBatch,
        analytics: Option<&HistoricalAnalytics>,
        now: DateTime<Utc>,
    ) -> CycleReport {
        let mut cycle_guard = lock(&self.cycle);
        let cycle = *cycle_guard + 1;
        debug!(cycle, detectors = batch.len(), "Cycle started");

        let assessment = lock(&self.scorer).assess(batch, now);
        let failures = assessment.failures.clone();
        if !assessment.complete {
            warn!(cycle, failures = ?failures, "Threat assessment is partial");
        }

        let (opened, observed) = self.apply_incident_policy(&assessment, now);

        let own_report;
        let analytics = match analytics {
            Some(a) => a,
            None => {
                own_report = lock(&self.hotspots).report(now);
                &own_report
            }
        };
        let plan = {
            let mut pool = lock(&self.pool);
            self.optimizer.optimize(&mut pool, &assessment, analytics)
        };

        lock(&self.hotspots).record_assessment(&assessment);
        *cycle_guard = cycle;
        drop(cycle_guard);

        let complete = failures.is_empty();
        if !plan.fulfillment.iter().all(|f| f.is_complete()) {
            debug!(cycle, "Some zone needs were only partially met");
        }
        let report = CycleReport {
            cycle,
            opened,
            observed,
            plan,
            analytics_notes: analytics.notes.clone(),
            complete,
            failures,
            assessment,
        };
        info!(
            cycle,
            threat_level = report.assessment.threat_level,
            opened = report.opened.len(),
            assignments = report.plan.assignments.len(),
            complete,
            "Cycle committed"
        );
        self.notify(&report, now);
        report
    }

    fn apply_incident_policy(
        &self,
        assessment: &ThreatAssessment,
        now: DateTime<Utc>,
    ) -> (Vec<String>, Vec<String>) {
        let threshold = self.config.incidents.open_threshold;
        let mut opened = Vec::new();
        let mut observed = Vec::new();
        let mut incidents = lock(&self.incidents);

        for threat in assessment
            .immediate_threats
            .iter()
            .filter(|t| t.level > threshold)
        {
            if let Some(existing) = incidents.active_of_kind(&threat.kind).map(|i| i.id.clone()) {
                if let Err(e) = incidents.record_observation(&existing, now) {
                    warn!(id = %existing, error = %e, "Could not record observation");
                } else {
                    observed.push(existing);
                }
                continue;
            }
            let Some(detection) = assessment.detection(&threat.kind) else {
                warn!(kind = %threat.kind, "Immediate threat without a detection");
                continue;
            };
            opened.push(incidents.create(detection, assessment));
        }
        (opened, observed)
    }

    fn notify(&self, report: &CycleReport, now: DateTime<Utc>) {
        let Some(tx) = &self.notifier else {
            return;
        };
        let min = self.config.engine.notify_min_priority;
        let urgent = report
            .assessment
            .recommendations
            .iter()
            .map(|r| (NotificationOrigin::Threat, r))
            .chain(
                report
                    .plan
                    .recommendations
                    .iter()
                    .map(|r| (NotificationOrigin::Allocation, r)),
            )
            .filter(|(_, r)| r.priority >= min);

        for (origin, recommendation) in urgent {
            let notification = Notification {
                cycle: report.cycle,
                issued_at: now,
                origin,
                recommendation: recommendation.clone(),
            };
            if tx.send(notification).is_err() {
                warn!(cycle = report.cycle, "Notification receiver closed; dropping notifications");
                return;
            }
        }
    }

    // Incident operations for operators and responders.

    pub fn update_incident(
        &self,
        id: &str,
        status: Option<IncidentStatus>,
        response: Option<IncidentResponse>,
    ) -> Result<(), IncidentError> {
        lock(&self.incidents).update(id, status, response).inspect_err(|e| {
            warn!(id, error = %e, "Incident update rejected");
        })
    }

    pub fn resolve_incident(&self, id: &str, details: &str) -> Result<(), IncidentError> {
        lock(&self.incidents).resolve(id, details)
    }

    pub fn close_incident(&self, id: &str, reason: &str) -> Result<(), IncidentError> {
        lock(&self.incidents).close(id, reason)
    }

    pub fn response_plan(&self, id: &str) -> Result<Vec<ResponseStep>, IncidentError> {
        lock(&self.incidents).get_response_plan(id)
    }

    pub fn incident(&self, id: &str) -> Option<Incident> {
        lock(&self.incidents).get(id).cloned()
    }

    pub fn incidents_snapshot(&self) -> IncidentSnapshot {
        let incidents = lock(&self.incidents);
        IncidentSnapshot {
            active: incidents.active().into_iter().cloned().collect(),
            archived: incidents.archived().to_vec(),
        }
    }

    pub fn statistics(&self) -> IncidentStatistics {
        lock(&self.incidents).statistics()
    }

    // Fleet registry operations.

    pub fn add_resource(&self, resource: Resource) -> Result<(), ResourceError> {
        lock(&self.pool).add(resource)
    }

    pub fn remove_resource(&self, id: &str) -> Result<Resource, ResourceError> {
        lock(&self.pool).remove(id)
    }

    pub fn update_resource_status(
        &self,
        id: &str,
        status: ResourceStatus,
        location: Option<Point>,
    ) -> Result<(), ResourceError> {
        lock(&self.pool).update_status(id, status, location)
    }

    pub fn resources_snapshot(&self) -> Vec<Resource> {
        lock(&self.pool).resources()
    }

    pub fn coverage_map(&self) -> CoverageMap {
        lock(&self.pool).coverage_map().clone()
    }

    pub fn status_report(&self) -> StatusReport {
        lock(&self.scorer).status_report()
    }

    /// Historical analytics as the engine would use them for the next cycle.
    pub fn analytics_report(&self) -> HistoricalAnalytics {
        lock(&self.hotspots).report(Utc::now())
    }

    /// Copy of everything needed to resume after a restart. Holds the cycle lock so the
    /// export never straddles a running cycle.
    pub fn export_state(&self) -> PersistedState {
        let cycle = lock(&self.cycle);
        PersistedState {
            saved_at: Some(Utc::now()),
            cycle: *cycle,
            incidents: lock(&self.incidents).ledger(),
            resources: lock(&self.pool).resources(),
            analytics_events: lock(&self.hotspots).events(),
        }
    }
}
