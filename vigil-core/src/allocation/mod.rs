//! Resource pool and allocation optimizer.

pub mod optimizer;
pub mod resource;

pub use optimizer::{
    Assignment, CoverageAnalysis, CoverageGap, OptimizationPlan, PriorityZone, Redundancy,
    ResourceOptimizer, ZoneCoverage, ZoneFulfillment, ZoneSource,
};
pub use resource::{CoverageMap, PerKind, Resource, ResourceKind, ResourcePool, ResourceStatus};
