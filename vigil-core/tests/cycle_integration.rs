//! End-to-end cycle tests: detections through scoring, incidents and allocation.

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;

use vigil_core::allocation::{PerKind, Resource, ResourceKind, ResourceStatus};
use vigil_core::analytics::{HistoricalAnalytics, Hotspot};
use vigil_core::config::VigilConfig;
use vigil_core::engine::Engine;
use vigil_core::incident::{IncidentResponse, IncidentStatus};
use vigil_core::store::{JsonFileStore, StateStore};
use vigil_core::threat::DetectionBatch;
use vigil_core::types::{Point, Priority};

fn engine() -> Engine {
    Engine::new(VigilConfig::default()).unwrap()
}

#[test]
fn weapon_detection_without_history() {
    let engine = engine();
    let batch = DetectionBatch::from_json(&json!({
        "weapon": {"score": 0.9, "box": [0, 0, 10, 10]}
    }));
    let report = engine.run_cycle(&batch, None);

    let a = &report.assessment;
    assert!((a.threat_level - 0.81).abs() < 1e-9);
    assert_eq!(a.immediate_threats.len(), 1);
    assert_eq!(a.immediate_threats[0].kind, "weapon");
    assert_eq!(a.immediate_threats[0].priority, Priority::High);
    assert!(a.potential_threats.is_empty());
    assert!(a.anomalies.is_empty());

    assert_eq!(report.opened.len(), 1);
    let incident = engine.incident(&report.opened[0]).unwrap();
    assert_eq!(incident.priority, Priority::Critical);
    assert_eq!(incident.status, IncidentStatus::New);
    assert_eq!(incident.location, Point::new(5.0, 5.0));

    let plan = engine.response_plan(&incident.id).unwrap();
    let actions: Vec<&str> = plan.iter().map(|s| s.action.as_str()).collect();
    assert_eq!(actions, vec!["Immediate lockdown", "Evacuate area"]);
}

#[test]
fn partial_allocation_leaves_gap() {
    let engine = engine();
    engine
        .add_resource(Resource::new("guard-1", ResourceKind::Guard, Point::new(10.0, 10.0)))
        .unwrap();
    for i in 0..5 {
        engine
            .add_resource(Resource::new(
                format!("cam-{i}"),
                ResourceKind::Camera,
                Point::new(20.0 * i as f64, 0.0),
            ))
            .unwrap();
    }
    let analytics = HistoricalAnalytics {
        hotspots: vec![Hotspot {
            location: Point::new(0.0, 0.0),
            avg_severity: 0.85,
            event_count: 14,
            event_types: vec!["weapon".into()],
            last_activity: None,
        }],
        notes: vec![],
    };

    let report = engine.run_cycle(&DetectionBatch::new(), Some(&analytics));
    let plan = &report.plan;
    assert_eq!(plan.zones.len(), 1);
    let f = &plan.fulfillment[0];
    assert_eq!(f.requested, PerKind::new(2, 3, 4, 1));
    assert_eq!(f.assigned, PerKind::new(1, 3, 0, 0));

    let resources = engine.resources_snapshot();
    let idle_cameras = resources
        .iter()
        .filter(|r| r.kind == ResourceKind::Camera && r.status == ResourceStatus::Available)
        .count();
    assert_eq!(idle_cameras, 2);

    assert_eq!(plan.coverage.gaps.len(), 1);
    assert!(plan.coverage.gaps[0].coverage < 0.7);
    assert!(
        plan.recommendations
            .iter()
            .any(|r| r.action == "Increase coverage" && r.priority == Priority::High)
    );
}

#[test]
fn engine_hotspots_feed_next_cycles() {
    let engine = engine();
    let start = Utc::now();
    let batch = DetectionBatch::new().with_single("fire", 0.9, [100.0, 100.0, 20.0, 20.0]);
    engine.run_cycle_at(&batch, None, start);

    // The fire zone becomes a hotspot in the engine's own analytics.
    let report = engine.run_cycle_at(&DetectionBatch::new(), None, start + Duration::seconds(5));
    assert_eq!(report.plan.zones.len(), 1);
    assert_eq!(report.plan.zones[0].reason, "Historical hotspot");
    assert_eq!(report.analytics_notes.len(), 1);
}

#[test]
fn incident_lifecycle_through_engine() {
    let engine = engine();
    let batch = DetectionBatch::new().with_single("fire", 0.95, [0.0, 0.0, 4.0, 4.0]);
    let id = engine.run_cycle(&batch, None).opened[0].clone();

    engine
        .update_incident(
            &id,
            Some(IncidentStatus::Responding),
            Some(
                IncidentResponse::new("Fire response", "team-1", "dispatched")
                    .with_priority(Priority::High),
            ),
        )
        .unwrap();
    assert!(
        engine
            .update_incident(&id, Some(IncidentStatus::New), None)
            .is_err()
    );
    engine.resolve_incident(&id, "Extinguished").unwrap();
    assert!(engine.resolve_incident(&id, "again").is_err());

    let stats = engine.statistics();
    assert_eq!(stats.archived, 1);
    assert_eq!(stats.response_effectiveness.resolution_rate, 1.0);
    assert_eq!(stats.by_type["fire"], 1);
}

#[test]
fn state_survives_restart_through_json_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("state.json"));

    let engine = engine();
    engine
        .add_resource(Resource::new("guard-1", ResourceKind::Guard, Point::new(0.0, 0.0)))
        .unwrap();
    let batch = DetectionBatch::new().with_single("weapon", 0.9, [0.0, 0.0, 10.0, 10.0]);
    let first = engine.run_cycle(&batch, None).opened[0].clone();
    store.save(&engine.export_state()).unwrap();

    let state = store.load().unwrap().unwrap();
    let resumed = Engine::from_state(VigilConfig::default(), state).unwrap();
    assert_eq!(resumed.incidents_snapshot().active.len(), 1);

    resumed.resolve_incident(&first, "cleared").unwrap();
    let second = resumed.run_cycle(&batch, None).opened[0].clone();
    assert_ne!(first, second);
    assert_eq!(resumed.cycles(), 2);
}
