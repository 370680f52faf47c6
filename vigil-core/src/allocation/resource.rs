//! Physical resources, the fleet-facing pool and its diagnostic coverage map.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::ResourceError;
use crate::types::Point;

/// Kind of deployable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Guard,
    Camera,
    Sensor,
    ResponseTeam,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Guard,
        ResourceKind::Camera,
        ResourceKind::Sensor,
        ResourceKind::ResponseTeam,
    ];

    /// Lowercase configuration key.
    pub fn key(&self) -> &'static str {
        match self {
            ResourceKind::Guard => "guard",
            ResourceKind::Camera => "camera",
            ResourceKind::Sensor => "sensor",
            ResourceKind::ResponseTeam => "response_team",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Guard => write!(f, "GUARD"),
            ResourceKind::Camera => write!(f, "CAMERA"),
            ResourceKind::Sensor => write!(f, "SENSOR"),
            ResourceKind::ResponseTeam => write!(f, "RESPONSE_TEAM"),
        }
    }
}

/// One value per resource kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerKind<T> {
    pub guard: T,
    pub camera: T,
    pub sensor: T,
    #[serde(default)]
    pub response_team: T,
}

impl<T> PerKind<T> {
    pub const fn new(guard: T, camera: T, sensor: T, response_team: T) -> Self {
        Self {
            guard,
            camera,
            sensor,
            response_team,
        }
    }

    pub fn get(&self, kind: ResourceKind) -> &T {
        match kind {
            ResourceKind::Guard => &self.guard,
            ResourceKind::Camera => &self.camera,
            ResourceKind::Sensor => &self.sensor,
            ResourceKind::ResponseTeam => &self.response_team,
        }
    }

    pub fn get_mut(&mut self, kind: ResourceKind) -> &mut T {
        match kind {
            ResourceKind::Guard => &mut self.guard,
            ResourceKind::Camera => &mut self.camera,
            ResourceKind::Sensor => &mut self.sensor,
            ResourceKind::ResponseTeam => &mut self.response_team,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, &T)> {
        ResourceKind::ALL.into_iter().map(move |k| (k, self.get(k)))
    }
}

/// Resource availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Available,
    Assigned,
    Unavailable,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Available => write!(f, "available"),
            ResourceStatus::Assigned => write!(f, "assigned"),
            ResourceStatus::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// A guard, camera, sensor or response team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub kind: ResourceKind,
    pub location: Point,
    pub status: ResourceStatus,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Location of the zone this resource is assigned to. Only set while `Assigned`.
    #[serde(default)]
    pub assignment: Option<Point>,
}

impl Resource {
    pub fn new(id: impl Into<String>, kind: ResourceKind, location: Point) -> Self {
        Self {
            id: id.into(),
            kind,
            location,
            status: ResourceStatus::Available,
            capabilities: Vec::new(),
            assignment: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn is_available(&self) -> bool {
        self.status == ResourceStatus::Available && self.assignment.is_none()
    }
}

/// Overlap counts of resource influence discs over a square grid.
///
/// Diagnostic only; allocation never reads it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoverageMap {
    cell: f64,
    cells: BTreeMap<(i64, i64), u32>,
}

impl CoverageMap {
    pub fn new(cell: f64) -> Self {
        Self {
            cell,
            cells: BTreeMap::new(),
        }
    }

    fn cell_of(&self, p: Point) -> (i64, i64) {
        (
            (p.x / self.cell).floor() as i64,
            (p.y / self.cell).floor() as i64,
        )
    }

    /// Stamp a disc: every cell whose center lies within `radius` of `center`, plus the
    /// cell containing `center`.
    fn stamp(&mut self, center: Point, radius: f64) {
        let (cx, cy) = self.cell_of(center);
        let span = (radius / self.cell).ceil() as i64 + 1;
        for ix in (cx - span)..=(cx + span) {
            for iy in (cy - span)..=(cy + span) {
                let cell_center = Point::new(
                    (ix as f64 + 0.5) * self.cell,
                    (iy as f64 + 0.5) * self.cell,
                );
                if (ix, iy) == (cx, cy) || cell_center.distance(&center) <= radius {
                    *self.cells.entry((ix, iy)).or_insert(0) += 1;
                }
            }
        }
    }

    fn rebuild<'a>(&mut self, resources: impl Iterator<Item = &'a Resource>, radii: &PerKind<f64>) {
        self.cells.clear();
        for resource in resources.filter(|r| r.status != ResourceStatus::Unavailable) {
            self.stamp(resource.location, *radii.get(resource.kind));
        }
    }

    /// Number of influence discs covering `point`.
    pub fn count_at(&self, point: Point) -> u32 {
        self.cells.get(&self.cell_of(point)).copied().unwrap_or(0)
    }

    /// Number of cells covered at least once.
    pub fn covered_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn max_overlap(&self) -> u32 {
        self.cells.values().copied().max().unwrap_or(0)
    }

    pub fn cell_size(&self) -> f64 {
        self.cell
    }
}

/// The resource store shared between the fleet registry and the optimizer.
///
/// The fleet side adds, removes and moves resources; the optimizer only flips status and
/// assignment through [`ResourcePool::assign`] and [`ResourcePool::release_assignments`].
#[derive(Debug, Clone)]
pub struct ResourcePool {
    resources: BTreeMap<String, Resource>,
    radii: PerKind<f64>,
    coverage: CoverageMap,
}

impl ResourcePool {
    pub fn new(radii: PerKind<f64>, grid_cell: f64) -> Self {
        Self {
            resources: BTreeMap::new(),
            radii,
            coverage: CoverageMap::new(grid_cell),
        }
    }

    /// Build a pool from a resource snapshot.
    pub fn from_resources(
        resources: Vec<Resource>,
        radii: PerKind<f64>,
        grid_cell: f64,
    ) -> Self {
        let mut pool = Self::new(radii, grid_cell);
        pool.resources = resources.into_iter().map(|r| (r.id.clone(), r)).collect();
        pool.refresh_coverage();
        pool
    }

    fn refresh_coverage(&mut self) {
        self.coverage.rebuild(self.resources.values(), &self.radii);
        debug!(
            resources = self.resources.len(),
            cells = self.coverage.covered_cells(),
            "Coverage map rebuilt"
        );
    }

    pub fn add(&mut self, resource: Resource) -> Result<(), ResourceError> {
        if self.resources.contains_key(&resource.id) {
            return Err(ResourceError::AlreadyRegistered(resource.id));
        }
        self.resources.insert(resource.id.clone(), resource);
        self.refresh_coverage();
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<Resource, ResourceError> {
        let removed = self
            .resources
            .remove(id)
            .ok_or_else(|| ResourceError::NotFound(id.to_string()))?;
        self.refresh_coverage();
        Ok(removed)
    }

    /// Fleet-side status and location change. Leaving the assigned state drops any
    /// assignment.
    pub fn update_status(
        &mut self,
        id: &str,
        status: ResourceStatus,
        location: Option<Point>,
    ) -> Result<(), ResourceError> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or_else(|| ResourceError::NotFound(id.to_string()))?;
        resource.status = status;
        if status != ResourceStatus::Assigned {
            resource.assignment = None;
        }
        if let Some(location) = location {
            resource.location = location;
        }
        self.refresh_coverage();
        Ok(())
    }

    /// Assign an available resource to a zone.
    pub(crate) fn assign(&mut self, id: &str, zone: Point) -> Result<(), ResourceError> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or_else(|| ResourceError::NotFound(id.to_string()))?;
        resource.status = ResourceStatus::Assigned;
        resource.assignment = Some(zone);
        Ok(())
    }

    /// Return every optimizer-assigned resource to the available state.
    pub(crate) fn release_assignments(&mut self) -> usize {
        let mut released = 0;
        for resource in self.resources.values_mut() {
            if resource.status == ResourceStatus::Assigned && resource.assignment.is_some() {
                resource.status = ResourceStatus::Available;
                resource.assignment = None;
                released += 1;
            }
        }
        released
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Resources ready to be assigned, ordered by id.
    pub fn available(&self) -> Vec<&Resource> {
        self.resources.values().filter(|r| r.is_available()).collect()
    }

    pub fn available_count(&self, kind: ResourceKind) -> usize {
        self.available().iter().filter(|r| r.kind == kind).count()
    }

    /// Snapshot of every resource, ordered by id.
    pub fn resources(&self) -> Vec<Resource> {
        self.resources.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn coverage_map(&self) -> &CoverageMap {
        &self.coverage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ResourcePool {
        ResourcePool::new(PerKind::new(50.0, 100.0, 75.0, 150.0), 10.0)
    }

    #[test]
    fn test_kind_serde_and_key() {
        let json = serde_json::to_string(&ResourceKind::ResponseTeam).unwrap();
        assert_eq!(json, "\"RESPONSE_TEAM\"");
        assert_eq!(ResourceKind::ResponseTeam.key(), "response_team");
        assert_eq!(ResourceKind::Guard.to_string(), "GUARD");
    }

    #[test]
    fn test_per_kind_access() {
        let mut needs = PerKind::new(2, 3, 4, 1);
        assert_eq!(*needs.get(ResourceKind::Sensor), 4);
        *needs.get_mut(ResourceKind::Guard) += 1;
        let collected: Vec<usize> = needs.iter().map(|(_, n)| *n).collect();
        assert_eq!(collected, vec![3, 3, 4, 1]);
    }

    #[test]
    fn test_add_and_duplicate() {
        let mut pool = pool();
        pool.add(Resource::new("g1", ResourceKind::Guard, Point::new(0.0, 0.0)))
            .unwrap();
        let err = pool
            .add(Resource::new("g1", ResourceKind::Guard, Point::new(5.0, 5.0)))
            .unwrap_err();
        assert!(matches!(err, ResourceError::AlreadyRegistered(_)));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_update_unknown_resource() {
        let mut pool = pool();
        let err = pool
            .update_status("ghost", ResourceStatus::Unavailable, None)
            .unwrap_err();
        assert!(matches!(err, ResourceError::NotFound(_)));
    }

    #[test]
    fn test_coverage_map_tracks_changes() {
        let mut pool = pool();
        pool.add(Resource::new("g1", ResourceKind::Guard, Point::new(0.0, 0.0)))
            .unwrap();
        pool.add(Resource::new("c1", ResourceKind::Camera, Point::new(20.0, 0.0)))
            .unwrap();
        assert_eq!(pool.coverage_map().count_at(Point::new(5.0, 5.0)), 2);
        assert_eq!(pool.coverage_map().count_at(Point::new(95.0, 5.0)), 1);
        assert_eq!(pool.coverage_map().count_at(Point::new(500.0, 500.0)), 0);

        pool.update_status("c1", ResourceStatus::Unavailable, None)
            .unwrap();
        assert_eq!(pool.coverage_map().count_at(Point::new(5.0, 5.0)), 1);

        pool.update_status("g1", ResourceStatus::Available, Some(Point::new(500.0, 500.0)))
            .unwrap();
        assert_eq!(pool.coverage_map().count_at(Point::new(5.0, 5.0)), 0);
        assert_eq!(pool.coverage_map().count_at(Point::new(505.0, 505.0)), 1);

        pool.remove("g1").unwrap();
        assert_eq!(pool.coverage_map().covered_cells(), 0);
    }

    #[test]
    fn test_assign_and_release() {
        let mut pool = pool();
        pool.add(Resource::new("s1", ResourceKind::Sensor, Point::new(0.0, 0.0)))
            .unwrap();
        pool.assign("s1", Point::new(10.0, 10.0)).unwrap();
        assert!(pool.available().is_empty());
        assert_eq!(pool.get("s1").unwrap().assignment, Some(Point::new(10.0, 10.0)));

        assert_eq!(pool.release_assignments(), 1);
        let s1 = pool.get("s1").unwrap();
        assert_eq!(s1.status, ResourceStatus::Available);
        assert!(s1.assignment.is_none());
    }

    #[test]
    fn test_leaving_assigned_clears_assignment() {
        let mut pool = pool();
        pool.add(Resource::new("t1", ResourceKind::ResponseTeam, Point::new(0.0, 0.0)))
            .unwrap();
        pool.assign("t1", Point::new(1.0, 1.0)).unwrap();
        pool.update_status("t1", ResourceStatus::Unavailable, None)
            .unwrap();
        assert!(pool.get("t1").unwrap().assignment.is_none());
    }
}
