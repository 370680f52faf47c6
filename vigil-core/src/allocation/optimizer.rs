//! Greedy nearest-first resource allocation with coverage and redundancy analysis.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::resource::{PerKind, ResourceKind, ResourcePool};
use crate::analytics::HistoricalAnalytics;
use crate::config::AllocationConfig;
use crate::threat::ThreatAssessment;
use crate::types::{Point, Priority, Recommendation};

/// Why a zone needs attention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ZoneSource {
    Threat { kind: String },
    Hotspot,
}

/// An area to cover this cycle. Recomputed every cycle, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityZone {
    pub location: Point,
    /// In [0, 1].
    pub priority: f64,
    pub reason: String,
    #[serde(flatten)]
    pub source: ZoneSource,
}

/// A resource placed at a zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub resource_id: String,
    pub kind: ResourceKind,
    pub zone_location: Point,
    pub priority: f64,
    pub reason: String,
}

/// Requested versus assigned resources of one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneFulfillment {
    pub location: Point,
    pub priority: f64,
    pub requested: PerKind<usize>,
    pub assigned: PerKind<usize>,
}

impl ZoneFulfillment {
    pub fn is_complete(&self) -> bool {
        ResourceKind::ALL
            .iter()
            .all(|k| self.assigned.get(*k) >= self.requested.get(*k))
    }

    /// Missing resources per kind.
    pub fn shortfall(&self) -> PerKind<usize> {
        let mut missing = PerKind::default();
        for kind in ResourceKind::ALL {
            *missing.get_mut(kind) = self.requested.get(kind).saturating_sub(*self.assigned.get(kind));
        }
        missing
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneCoverage {
    pub location: Point,
    pub priority: f64,
    /// In [0, 1].
    pub coverage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageGap {
    pub location: Point,
    pub coverage: f64,
    pub priority: f64,
}

/// A zone location carrying more resources than the redundancy limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redundancy {
    pub location: Point,
    pub resource_count: usize,
    pub resource_types: BTreeMap<ResourceKind, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageAnalysis {
    /// Mean zone coverage; 0 when there are no zones.
    pub overall_coverage: f64,
    pub zone_coverage: Vec<ZoneCoverage>,
    pub gaps: Vec<CoverageGap>,
    pub redundancies: Vec<Redundancy>,
}

/// Output of one optimization pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationPlan {
    pub zones: Vec<PriorityZone>,
    pub assignments: Vec<Assignment>,
    pub fulfillment: Vec<ZoneFulfillment>,
    pub coverage: CoverageAnalysis,
    pub recommendations: Vec<Recommendation>,
    /// Assignments from the previous cycle that were released before allocating.
    pub released: usize,
}

/// Derives priority zones and assigns resources to them.
#[derive(Debug, Clone)]
pub struct ResourceOptimizer {
    config: AllocationConfig,
}

impl ResourceOptimizer {
    pub fn new(config: AllocationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    /// Recompute every assignment for this cycle.
    ///
    /// Previous assignments are released first, so each cycle starts from the whole
    /// available fleet.
    pub fn optimize(
        &self,
        pool: &mut ResourcePool,
        assessment: &ThreatAssessment,
        analytics: &HistoricalAnalytics,
    ) -> OptimizationPlan {
        let released = pool.release_assignments();
        let zones = self.priority_zones(assessment, analytics);
        let (assignments, fulfillment) = self.allocate(pool, &zones);
        let coverage = self.analyze_coverage(&zones, &assignments, &fulfillment);
        let recommendations = self.recommendations(&coverage, zones.is_empty());

        debug!(
            zones = zones.len(),
            assigned = assignments.len(),
            released,
            overall = coverage.overall_coverage,
            "Allocation complete"
        );

        OptimizationPlan {
            zones,
            assignments,
            fulfillment,
            coverage,
            recommendations,
            released,
        }
    }

    /// Live threats above the zone level, then qualifying hotspots, sorted by priority.
    ///
    /// The sort is stable, so on equal priority live threats stay ahead of hotspots.
    pub fn priority_zones(
        &self,
        assessment: &ThreatAssessment,
        analytics: &HistoricalAnalytics,
    ) -> Vec<PriorityZone> {
        let threats = assessment
            .immediate_threats
            .iter()
            .filter(|t| t.level > self.config.threat_zone_level)
            .map(|t| PriorityZone {
                location: t.location,
                priority: t.level.clamp(0.0, 1.0),
                reason: format!("Active {} threat", t.kind),
                source: ZoneSource::Threat {
                    kind: t.kind.clone(),
                },
            });
        let hotspots = analytics
            .hotspots
            .iter()
            .filter(|h| h.avg_severity > self.config.hotspot_severity)
            .map(|h| PriorityZone {
                location: h.location,
                priority: h.avg_severity.clamp(0.0, 1.0),
                reason: "Historical hotspot".to_string(),
                source: ZoneSource::Hotspot,
            });

        let mut zones: Vec<PriorityZone> = threats.chain(hotspots).collect();
        zones.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        zones
    }

    fn allocate(
        &self,
        pool: &mut ResourcePool,
        zones: &[PriorityZone],
    ) -> (Vec<Assignment>, Vec<ZoneFulfillment>) {
        let mut candidates: Vec<(String, ResourceKind, Point)> = pool
            .available()
            .into_iter()
            .map(|r| (r.id.clone(), r.kind, r.location))
            .collect();
        let mut assignments = Vec::new();
        let mut fulfillment = Vec::with_capacity(zones.len());

        for zone in zones {
            let requested = self.config.needs_for(zone.priority).clone();
            let mut assigned = PerKind::<usize>::default();

            for (kind, needed) in requested.iter() {
                if *needed == 0 {
                    continue;
                }
                let mut nearest: Vec<(f64, usize)> = candidates
                    .iter()
                    .enumerate()
                    .filter(|(_, (_, k, _))| *k == kind)
                    .map(|(i, (_, _, loc))| (loc.distance(&zone.location), i))
                    .collect();
                nearest.sort_by(|a, b| {
                    a.0.partial_cmp(&b.0)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| candidates[a.1].0.cmp(&candidates[b.1].0))
                });

                let mut taken: Vec<usize> = nearest.iter().take(*needed).map(|(_, i)| *i).collect();
                // Remove from the highest index down so earlier indices stay valid.
                taken.sort_unstable_by(|a, b| b.cmp(a));
                let mut picked = Vec::with_capacity(taken.len());
                for i in taken {
                    picked.push(candidates.swap_remove(i));
                }
                picked.sort_by(|a, b| a.0.cmp(&b.0));

                for (id, kind, _) in picked {
                    if let Err(e) = pool.assign(&id, zone.location) {
                        warn!(resource = %id, error = %e, "Skipping assignment");
                        continue;
                    }
                    *assigned.get_mut(kind) += 1;
                    assignments.push(Assignment {
                        resource_id: id,
                        kind,
                        zone_location: zone.location,
                        priority: zone.priority,
                        reason: zone.reason.clone(),
                    });
                }
            }

            let entry = ZoneFulfillment {
                location: zone.location,
                priority: zone.priority,
                requested,
                assigned,
            };
            if !entry.is_complete() {
                debug!(zone = %zone.location, "Zone needs only partially met");
            }
            fulfillment.push(entry);
        }
        (assignments, fulfillment)
    }

    /// Coverage of one zone: each requested kind contributes its weight scaled by how much
    /// of the zone's need for that kind is met within the coverage radius, normalised by
    /// the total weight of the requested kinds.
    fn zone_coverage(&self, zone: &PriorityZone, needs: &PerKind<usize>, assignments: &[Assignment]) -> f64 {
        let mut within = PerKind::<usize>::default();
        for a in assignments {
            if a.zone_location.distance(&zone.location) < self.config.coverage_radius {
                *within.get_mut(a.kind) += 1;
            }
        }
        let weights = &self.config.coverage_weights;
        let (covered, requested) = ResourceKind::ALL
            .iter()
            .filter(|k| *needs.get(**k) > 0)
            .fold((0.0, 0.0), |(covered, requested), k| {
                let need = *needs.get(*k) as f64;
                let met = (*within.get(*k) as f64 / need).min(1.0);
                let w = *weights.get(*k);
                (covered + w * met, requested + w)
            });
        if requested <= 0.0 {
            return 0.0;
        }
        (covered / requested).clamp(0.0, 1.0)
    }

    fn analyze_coverage(
        &self,
        zones: &[PriorityZone],
        assignments: &[Assignment],
        fulfillment: &[ZoneFulfillment],
    ) -> CoverageAnalysis {
        let mut zone_coverage = Vec::with_capacity(zones.len());
        let mut gaps = Vec::new();
        for (zone, f) in zones.iter().zip(fulfillment) {
            let coverage = self.zone_coverage(zone, &f.requested, assignments);
            if coverage < self.config.gap_threshold {
                gaps.push(CoverageGap {
                    location: zone.location,
                    coverage,
                    priority: zone.priority,
                });
            }
            zone_coverage.push(ZoneCoverage {
                location: zone.location,
                priority: zone.priority,
                coverage,
            });
        }
        let overall_coverage = if zone_coverage.is_empty() {
            0.0
        } else {
            zone_coverage.iter().map(|z| z.coverage).sum::<f64>() / zone_coverage.len() as f64
        };

        CoverageAnalysis {
            overall_coverage,
            zone_coverage,
            gaps,
            redundancies: self.redundancies(assignments),
        }
    }

    fn redundancies(&self, assignments: &[Assignment]) -> Vec<Redundancy> {
        let mut by_location: Vec<(Point, BTreeMap<ResourceKind, usize>, usize)> = Vec::new();
        for a in assignments {
            match by_location.iter_mut().find(|(loc, _, _)| *loc == a.zone_location) {
                Some((_, types, count)) => {
                    *types.entry(a.kind).or_insert(0) += 1;
                    *count += 1;
                }
                None => {
                    by_location.push((a.zone_location, BTreeMap::from([(a.kind, 1)]), 1));
                }
            }
        }
        by_location
            .into_iter()
            .filter(|(_, _, count)| *count > self.config.redundancy_limit)
            .map(|(location, resource_types, resource_count)| Redundancy {
                location,
                resource_count,
                resource_types,
            })
            .collect()
    }

    fn recommendations(&self, coverage: &CoverageAnalysis, no_zones: bool) -> Vec<Recommendation> {
        let mut recs = Vec::new();
        for gap in &coverage.gaps {
            recs.push(Recommendation::new(
                Priority::High,
                "Increase coverage",
                format!(
                    "Coverage gap detected at {} (current coverage: {:.2}%)",
                    gap.location,
                    gap.coverage * 100.0
                ),
            ));
        }
        for r in &coverage.redundancies {
            recs.push(Recommendation::new(
                Priority::Medium,
                "Optimize resource distribution",
                format!(
                    "Resource redundancy at {} ({} resources)",
                    r.location, r.resource_count
                ),
            ));
        }
        if !no_zones && coverage.overall_coverage < self.config.overall_target {
            recs.push(Recommendation::new(
                Priority::High,
                "Increase overall coverage",
                format!(
                    "Overall coverage is below target ({:.2}%)",
                    coverage.overall_coverage * 100.0
                ),
            ));
        }
        recs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::{Resource, ResourceStatus};
    use crate::analytics::Hotspot;
    use crate::threat::ImmediateThreat;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn pool_with(resources: &[(&str, ResourceKind, f64, f64)]) -> ResourcePool {
        let config = AllocationConfig::default();
        let mut pool = ResourcePool::new(config.influence_radii, config.grid_cell);
        for (id, kind, x, y) in resources {
            pool.add(Resource::new(*id, *kind, Point::new(*x, *y))).unwrap();
        }
        pool
    }

    fn threat(kind: &str, level: f64, x: f64, y: f64) -> ImmediateThreat {
        ImmediateThreat {
            kind: kind.into(),
            level,
            priority: Priority::High,
            required_action: "act".into(),
            location: Point::new(x, y),
            region: Default::default(),
        }
    }

    fn assessment(threats: Vec<ImmediateThreat>) -> ThreatAssessment {
        let mut a = ThreatAssessment::empty(Utc::now());
        a.immediate_threats = threats;
        a
    }

    fn hotspot(severity: f64, x: f64, y: f64) -> Hotspot {
        Hotspot {
            location: Point::new(x, y),
            avg_severity: severity,
            event_count: 3,
            event_types: vec!["fire".into()],
            last_activity: None,
        }
    }

    #[test]
    fn test_priority_zone_selection_and_order() {
        let optimizer = ResourceOptimizer::new(AllocationConfig::default());
        let a = assessment(vec![
            threat("weapon", 0.81, 0.0, 0.0),
            threat("crowd", 0.5, 10.0, 10.0),
            threat("fire", 0.7, 20.0, 20.0),
        ]);
        let analytics = HistoricalAnalytics {
            hotspots: vec![hotspot(0.7, 300.0, 300.0), hotspot(0.4, 500.0, 500.0)],
            notes: vec![],
        };
        let zones = optimizer.priority_zones(&a, &analytics);
        let priorities: Vec<f64> = zones.iter().map(|z| z.priority).collect();
        assert_eq!(priorities, vec![0.81, 0.7, 0.7]);
        // Tie: the live threat comes before the hotspot.
        assert_eq!(zones[1].source, ZoneSource::Threat { kind: "fire".into() });
        assert_eq!(zones[2].source, ZoneSource::Hotspot);
        assert_eq!(zones[0].reason, "Active weapon threat");
    }

    #[test]
    fn test_partial_fulfillment_scenario() {
        let optimizer = ResourceOptimizer::new(AllocationConfig::default());
        let mut pool = pool_with(&[
            ("g1", ResourceKind::Guard, 5.0, 5.0),
            ("c1", ResourceKind::Camera, 10.0, 0.0),
            ("c2", ResourceKind::Camera, 20.0, 0.0),
            ("c3", ResourceKind::Camera, 30.0, 0.0),
            ("c4", ResourceKind::Camera, 40.0, 0.0),
            ("c5", ResourceKind::Camera, 50.0, 0.0),
        ]);
        let a = assessment(vec![threat("weapon", 0.85, 0.0, 0.0)]);
        let plan = optimizer.optimize(&mut pool, &a, &HistoricalAnalytics::default());

        let f = &plan.fulfillment[0];
        assert_eq!(f.requested, PerKind::new(2, 3, 4, 1));
        assert_eq!(f.assigned, PerKind::new(1, 3, 0, 0));
        assert!(!f.is_complete());
        assert_eq!(f.shortfall(), PerKind::new(1, 0, 4, 1));

        let ids: Vec<&str> = plan.assignments.iter().map(|a| a.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["g1", "c1", "c2", "c3"]);
        assert_eq!(pool.available_count(ResourceKind::Camera), 2);

        assert_eq!(plan.coverage.gaps.len(), 1);
        assert!((plan.coverage.overall_coverage - 0.40).abs() < 1e-9);
        assert!(
            plan.recommendations
                .iter()
                .any(|r| r.action == "Increase coverage" && r.priority == Priority::High)
        );
        // Four resources at one location exceed the redundancy limit.
        assert_eq!(plan.coverage.redundancies.len(), 1);
        assert_eq!(plan.coverage.redundancies[0].resource_count, 4);
        assert!(
            plan.recommendations
                .iter()
                .any(|r| r.action == "Increase overall coverage")
        );
    }

    #[test]
    fn test_full_fulfillment_has_full_coverage() {
        let optimizer = ResourceOptimizer::new(AllocationConfig::default());
        let mut resources = Vec::new();
        for i in 0..2 {
            resources.push((format!("g{i}"), ResourceKind::Guard));
        }
        for i in 0..3 {
            resources.push((format!("c{i}"), ResourceKind::Camera));
        }
        for i in 0..4 {
            resources.push((format!("s{i}"), ResourceKind::Sensor));
        }
        resources.push(("t0".to_string(), ResourceKind::ResponseTeam));
        let specs: Vec<(&str, ResourceKind, f64, f64)> = resources
            .iter()
            .map(|(id, k)| (id.as_str(), *k, 1.0, 1.0))
            .collect();
        let mut pool = pool_with(&specs);
        let a = assessment(vec![threat("weapon", 0.9, 0.0, 0.0)]);
        let plan = optimizer.optimize(&mut pool, &a, &HistoricalAnalytics::default());
        assert!(plan.fulfillment[0].is_complete());
        assert!((plan.coverage.overall_coverage - 1.0).abs() < 1e-9);
        assert!(plan.coverage.gaps.is_empty());
    }

    #[test]
    fn test_staffed_lower_band_zone_is_fully_covered() {
        let optimizer = ResourceOptimizer::new(AllocationConfig::default());
        let mut pool = pool_with(&[
            ("g1", ResourceKind::Guard, 1.0, 1.0),
            ("c1", ResourceKind::Camera, 2.0, 2.0),
            ("s1", ResourceKind::Sensor, 3.0, 3.0),
            ("s2", ResourceKind::Sensor, 4.0, 4.0),
        ]);
        let analytics = HistoricalAnalytics {
            hotspots: vec![hotspot(0.55, 0.0, 0.0)],
            notes: vec![],
        };
        let plan = optimizer.optimize(&mut pool, &assessment(vec![]), &analytics);

        let f = &plan.fulfillment[0];
        assert_eq!(f.requested, PerKind::new(1, 1, 2, 0));
        assert!(f.is_complete());
        assert!((plan.coverage.overall_coverage - 1.0).abs() < 1e-9);
        assert!(plan.coverage.gaps.is_empty());
        assert!(
            !plan
                .recommendations
                .iter()
                .any(|r| r.action == "Increase overall coverage")
        );
    }

    #[test]
    fn test_nearest_resources_are_chosen() {
        let optimizer = ResourceOptimizer::new(AllocationConfig::default());
        let mut pool = pool_with(&[
            ("far", ResourceKind::Guard, 900.0, 900.0),
            ("near", ResourceKind::Guard, 1.0, 1.0),
        ]);
        let a = assessment(vec![threat("fire", 0.7, 0.0, 0.0)]);
        let plan = optimizer.optimize(&mut pool, &a, &HistoricalAnalytics::default());
        assert_eq!(plan.assignments[0].resource_id, "near");
        assert!(pool.get("far").unwrap().is_available());
    }

    #[test]
    fn test_unavailable_resources_are_skipped() {
        let optimizer = ResourceOptimizer::new(AllocationConfig::default());
        let mut pool = pool_with(&[("g1", ResourceKind::Guard, 0.0, 0.0)]);
        pool.update_status("g1", ResourceStatus::Unavailable, None)
            .unwrap();
        let a = assessment(vec![threat("fire", 0.7, 0.0, 0.0)]);
        let plan = optimizer.optimize(&mut pool, &a, &HistoricalAnalytics::default());
        assert!(plan.assignments.is_empty());
        assert_eq!(plan.coverage.zone_coverage[0].coverage, 0.0);
    }

    #[test]
    fn test_each_cycle_recomputes_assignments() {
        let optimizer = ResourceOptimizer::new(AllocationConfig::default());
        let mut pool = pool_with(&[("g1", ResourceKind::Guard, 0.0, 0.0)]);
        let first = assessment(vec![threat("fire", 0.7, 0.0, 0.0)]);
        optimizer.optimize(&mut pool, &first, &HistoricalAnalytics::default());

        let second = assessment(vec![threat("weapon", 0.9, 400.0, 400.0)]);
        let plan = optimizer.optimize(&mut pool, &second, &HistoricalAnalytics::default());
        assert_eq!(plan.released, 1);
        assert_eq!(
            pool.get("g1").unwrap().assignment,
            Some(Point::new(400.0, 400.0))
        );
    }

    #[test]
    fn test_no_zones_no_recommendations() {
        let optimizer = ResourceOptimizer::new(AllocationConfig::default());
        let mut pool = pool_with(&[("g1", ResourceKind::Guard, 0.0, 0.0)]);
        let plan = optimizer.optimize(
            &mut pool,
            &ThreatAssessment::empty(Utc::now()),
            &HistoricalAnalytics::default(),
        );
        assert!(plan.zones.is_empty());
        assert!(plan.recommendations.is_empty());
        assert_eq!(plan.coverage.overall_coverage, 0.0);
    }
}
