//! # Vigil Core
//!
//! Core library for Vigil, a per-cycle decision engine for monitored sites.
//! Turns raw detection batches into a scored threat assessment, a lifecycle-tracked
//! incident record and a deployment plan for guards, cameras, sensors and response teams.

pub mod allocation;
pub mod analytics;
pub mod anomaly;
pub mod config;
pub mod engine;
pub mod error;
pub mod incident;
pub mod store;
pub mod threat;
pub mod types;

// Re-export commonly used types at the crate root.
pub use allocation::{
    OptimizationPlan, PerKind, Resource, ResourceKind, ResourceOptimizer, ResourcePool,
    ResourceStatus,
};
pub use analytics::{HistoricalAnalytics, Hotspot, HotspotTracker};
pub use anomaly::{OutlierMethod, OutlierModel, OutlierStrategy};
pub use config::{VigilConfig, load_config};
pub use engine::{CycleReport, Engine, IncidentSnapshot, Notification, NotificationOrigin};
pub use error::{Result, VigilError};
pub use incident::{
    Incident, IncidentManager, IncidentResponse, IncidentStatistics, IncidentStatus,
};
pub use store::{JsonFileStore, MemoryStore, PersistedState, StateStore};
pub use threat::{DetectionBatch, ThreatAssessment, ThreatScorer};
pub use types::{DetectionEvent, Point, Priority, Recommendation};
