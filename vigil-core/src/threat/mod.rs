//! Detection normalisation and threat scoring.

pub mod assessment;
pub mod history;
pub mod normalize;
pub mod scorer;

pub use assessment::{
    AnomalyRecord, ImmediateThreat, NormalRange, PatternSummary, PotentialThreat,
    RecurringThreat, ThreatAssessment,
};
pub use history::{ThreatHistory, ThreatSample};
pub use normalize::{DetectionBatch, DetectionLog, DetectionPayload, RawDetection};
pub use scorer::{AdvisoryCategory, StatusReport, SystemAdvisory, ThreatScorer};
