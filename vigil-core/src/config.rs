//! Configuration system for Vigil.
//!
//! Uses `figment` for layered configuration: defaults -> user file -> workspace file ->
//! explicit file -> environment. Configuration is loaded from `~/.config/vigil/config.toml`
//! and/or `.vigil/config.toml` in the workspace directory.
//!
//! Every table the engine decides with (threat weights, response templates, resource
//! needs, coverage weights) lives here rather than in the algorithms, and is validated
//! once at startup.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::allocation::{PerKind, ResourceKind};
use crate::anomaly::OutlierMethod;
use crate::error::ConfigError;
use crate::incident::ResponseStep;
use crate::types::Priority;

/// Top-level configuration for the Vigil engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub scoring: ScoringConfig,
    pub incidents: IncidentConfig,
    pub allocation: AllocationConfig,
    pub analytics: AnalyticsConfig,
    pub engine: EngineConfig,
}

/// Threat scoring: weights, pattern thresholds and history bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Per-type threat weight applied to detection confidence.
    pub weights: BTreeMap<String, f64>,
    /// Weight for detector types missing from `weights`.
    pub default_weight: f64,
    /// Per-type action attached to immediate threats.
    pub required_actions: BTreeMap<String, String>,
    pub default_action: String,
    /// Levels above this are HIGH immediate threats.
    pub high_threat_level: f64,
    /// Levels above this (and not above `high_threat_level`) are MEDIUM immediate threats.
    pub medium_threat_level: f64,
    /// Level a type must exceed to count toward recurrence and correlation.
    pub significant_level: f64,
    /// A type is recurring once it was significant more than this many times.
    pub recurrence_count: usize,
    /// Number of most recent samples that must be non-decreasing for escalation.
    pub escalation_window: usize,
    /// Concurrent significant types needed for a correlation.
    pub correlation_min_types: usize,
    /// Number of per-cycle samples retained for pattern analysis.
    pub history_capacity: usize,
    /// Detection events older than this are evicted every cycle.
    pub detection_retention_secs: i64,
    /// Crowd detections reporting more people than this produce an advisory.
    pub crowd_advisory_size: u64,
    pub adjustments: ThreatAdjustments,
    pub anomaly: AnomalyConfig,
    pub prediction: PredictionConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let weights = [
            ("weapon", 0.9),
            ("fire", 0.8),
            ("accident", 0.7),
            ("crowd", 0.5),
            ("motion", 0.2),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let required_actions = [
            ("weapon", "Alert security and law enforcement immediately"),
            ("fire", "Activate emergency protocols and contact fire department"),
            ("accident", "Alert emergency services and secure the area"),
            ("crowd", "Monitor crowd movement and ensure adequate security"),
            ("motion", "Investigate suspicious activity"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            weights,
            default_weight: 0.3,
            required_actions,
            default_action: "Investigate and assess situation".into(),
            high_threat_level: 0.7,
            medium_threat_level: 0.4,
            significant_level: 0.5,
            recurrence_count: 5,
            escalation_window: 5,
            correlation_min_types: 2,
            history_capacity: 100,
            detection_retention_secs: 3600,
            crowd_advisory_size: 20,
            adjustments: ThreatAdjustments::default(),
            anomaly: AnomalyConfig::default(),
            prediction: PredictionConfig::default(),
        }
    }
}

impl ScoringConfig {
    pub fn weight_for(&self, kind: &str) -> f64 {
        self.weights.get(kind).copied().unwrap_or(self.default_weight)
    }

    pub fn action_for(&self, kind: &str) -> &str {
        self.required_actions
            .get(kind)
            .map(String::as_str)
            .unwrap_or(&self.default_action)
    }
}

/// Additive terms applied on top of the strongest per-type contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatAdjustments {
    pub anomaly: f64,
    pub recurring: f64,
    pub escalating: f64,
    pub correlated: f64,
}

impl Default for ThreatAdjustments {
    fn default() -> Self {
        Self {
            anomaly: 0.1,
            recurring: 0.1,
            escalating: 0.2,
            correlated: 0.15,
        }
    }
}

/// Outlier detection over the per-cycle feature vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub method: OutlierMethod,
    /// Cycles of history required before the model is fitted at all.
    pub min_history: usize,
    /// Number of most recent vectors the model is fitted on.
    pub window: usize,
    /// A type is reported when its value exceeds mean + this many standard deviations.
    pub std_multiplier: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            method: OutlierMethod::default(),
            min_history: 10,
            window: 100,
            std_multiplier: 2.0,
        }
    }
}

/// Linear-trend prediction of near-term threats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub window: usize,
    pub min_slope: f64,
    pub likelihood_scale: f64,
    pub timeframe: String,
    pub basis: String,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            window: 10,
            min_slope: 0.1,
            likelihood_scale: 5.0,
            timeframe: "next 30 minutes".into(),
            basis: "Increasing trend in activity".into(),
        }
    }
}

/// Incident lifecycle settings and per-type response templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentConfig {
    /// Immediate threats above this level open an incident.
    pub open_threshold: f64,
    /// Ordered response steps per incident type, most severe first.
    pub templates: BTreeMap<String, Vec<ResponseStep>>,
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            open_threshold: 0.4,
            templates: crate::incident::playbook::default_templates(),
        }
    }
}

/// A resource-needs band: zones whose priority exceeds `above` need `needs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeedBand {
    pub above: f64,
    pub needs: PerKind<usize>,
}

/// Resource allocation and coverage analysis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Immediate threats above this level become priority zones.
    pub threat_zone_level: f64,
    /// Hotspots with mean severity above this become priority zones.
    pub hotspot_severity: f64,
    /// Need bands in descending `above` order.
    pub need_bands: Vec<NeedBand>,
    /// Needs for zones below every band.
    pub base_needs: PerKind<usize>,
    /// Per-type contribution to zone coverage.
    pub coverage_weights: PerKind<f64>,
    /// Assignments within this distance of a zone count toward its coverage.
    pub coverage_radius: f64,
    /// Zones below this coverage are gaps.
    pub gap_threshold: f64,
    /// Overall coverage below this produces an extra recommendation.
    pub overall_target: f64,
    /// Zones carrying more than this many resources are redundant.
    pub redundancy_limit: usize,
    /// Disc of influence stamped into the diagnostic coverage map.
    pub influence_radii: PerKind<f64>,
    /// Cell edge length of the diagnostic coverage map.
    pub grid_cell: f64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            threat_zone_level: 0.6,
            hotspot_severity: 0.5,
            need_bands: vec![
                NeedBand {
                    above: 0.8,
                    needs: PerKind::new(2, 3, 4, 1),
                },
                NeedBand {
                    above: 0.6,
                    needs: PerKind::new(1, 2, 3, 1),
                },
            ],
            base_needs: PerKind::new(1, 1, 2, 0),
            coverage_weights: PerKind::new(0.3, 0.25, 0.15, 0.3),
            coverage_radius: 100.0,
            gap_threshold: 0.7,
            overall_target: 0.8,
            redundancy_limit: 3,
            influence_radii: PerKind::new(50.0, 100.0, 75.0, 150.0),
            grid_cell: 10.0,
        }
    }
}

impl AllocationConfig {
    /// Resource needs for a zone of the given priority score.
    pub fn needs_for(&self, priority: f64) -> &PerKind<usize> {
        self.need_bands
            .iter()
            .find(|band| priority > band.above)
            .map(|band| &band.needs)
            .unwrap_or(&self.base_needs)
    }
}

/// Historical hotspot aggregation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub zone_size: f64,
    pub hotspot_min_events: usize,
    pub hotspot_severity: f64,
    pub frequent_type_count: usize,
    pub lookback_days: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            zone_size: 100.0,
            hotspot_min_events: 10,
            hotspot_severity: 0.6,
            frequent_type_count: 20,
            lookback_days: 7,
        }
    }
}

/// Cycle engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Recommendations at or above this priority are dispatched as notifications.
    pub notify_min_priority: Priority,
    /// Identity stamped on engine-generated observations.
    pub engine_identity: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            notify_min_priority: Priority::High,
            engine_identity: "vigil-engine".into(),
        }
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::invalid(field, format!("{value} is outside [0, 1]")));
    }
    Ok(())
}

fn check_nonzero(field: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    Ok(())
}

impl VigilConfig {
    /// Validate every table and threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scoring;
        check_unit("scoring.default_weight", s.default_weight)?;
        for (kind, weight) in &s.weights {
            check_unit(&format!("scoring.weights.{kind}"), *weight)?;
        }
        check_unit("scoring.high_threat_level", s.high_threat_level)?;
        check_unit("scoring.medium_threat_level", s.medium_threat_level)?;
        if s.medium_threat_level > s.high_threat_level {
            return Err(ConfigError::invalid(
                "scoring.medium_threat_level",
                "must not exceed high_threat_level",
            ));
        }
        check_unit("scoring.significant_level", s.significant_level)?;
        check_nonzero("scoring.history_capacity", s.history_capacity)?;
        check_nonzero("scoring.escalation_window", s.escalation_window)?;
        check_nonzero("scoring.anomaly.window", s.anomaly.window)?;
        check_nonzero("scoring.prediction.window", s.prediction.window)?;
        if s.prediction.window < 2 {
            return Err(ConfigError::invalid(
                "scoring.prediction.window",
                "a trend needs at least two samples",
            ));
        }
        if s.detection_retention_secs <= 0 {
            return Err(ConfigError::invalid(
                "scoring.detection_retention_secs",
                "must be positive",
            ));
        }
        let a = &s.adjustments;
        for (field, value) in [
            ("scoring.adjustments.anomaly", a.anomaly),
            ("scoring.adjustments.recurring", a.recurring),
            ("scoring.adjustments.escalating", a.escalating),
            ("scoring.adjustments.correlated", a.correlated),
        ] {
            check_unit(field, value)?;
        }

        check_unit("incidents.open_threshold", self.incidents.open_threshold)?;
        for (kind, steps) in &self.incidents.templates {
            for step in steps {
                check_unit(
                    &format!("incidents.templates.{kind}.min_threat_level"),
                    step.min_threat_level,
                )?;
            }
            if steps.windows(2).any(|w| w[0].priority < w[1].priority) {
                return Err(ConfigError::invalid(
                    format!("incidents.templates.{kind}"),
                    "steps must be ordered most severe first",
                ));
            }
        }

        let al = &self.allocation;
        check_unit("allocation.threat_zone_level", al.threat_zone_level)?;
        check_unit("allocation.hotspot_severity", al.hotspot_severity)?;
        check_unit("allocation.gap_threshold", al.gap_threshold)?;
        check_unit("allocation.overall_target", al.overall_target)?;
        if al.need_bands.windows(2).any(|w| w[0].above <= w[1].above) {
            return Err(ConfigError::invalid(
                "allocation.need_bands",
                "bands must be in strictly descending threshold order",
            ));
        }
        for kind in ResourceKind::ALL {
            check_unit(
                &format!("allocation.coverage_weights.{}", kind.key()),
                *al.coverage_weights.get(kind),
            )?;
            if *al.influence_radii.get(kind) < 0.0 {
                return Err(ConfigError::invalid(
                    format!("allocation.influence_radii.{}", kind.key()),
                    "must not be negative",
                ));
            }
        }
        if al.coverage_radius <= 0.0 {
            return Err(ConfigError::invalid("allocation.coverage_radius", "must be positive"));
        }
        if al.grid_cell <= 0.0 {
            return Err(ConfigError::invalid("allocation.grid_cell", "must be positive"));
        }

        if self.analytics.zone_size <= 0.0 {
            return Err(ConfigError::invalid("analytics.zone_size", "must be positive"));
        }
        check_unit("analytics.hotspot_severity", self.analytics.hotspot_severity)?;

        Ok(())
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Load configuration from layered sources and validate it.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `VIGIL_`, nested with `__`)
/// 2. Explicit config file (must exist when given)
/// 3. Workspace-local config (`.vigil/config.toml`)
/// 4. User config (`~/.config/vigil/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<VigilConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(VigilConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "vigil", "vigil") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".vigil").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    // VIGIL_SCORING__DEFAULT_WEIGHT, VIGIL_ALLOCATION__GAP_THRESHOLD, etc.
    figment = figment.merge(Env::prefixed("VIGIL_").split("__"));

    let config: VigilConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}
