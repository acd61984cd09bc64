//! Spatial culling of effect cells and patches.
//!
//! Candidates are evaluated in priority order (highest first, nearer first
//! on ties). Each one is dropped for the first reason that applies:
//!
//! 1. **Frustum**: its bounds do not intersect the viewport bounds.
//! 2. **Distance**: its center is beyond the level's culling distance.
//! 3. **Performance**: the level's visible-cell budget is already used.

use std::cmp::Ordering;

use serde::Serialize;

use super::ladder::LodLevel;
use crate::geo::{GeoBounds, GeoPoint};

/// Why a candidate was not drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CullReason {
    /// Outside the visible area.
    Frustum,
    /// Too far from the camera for the active level.
    Distance,
    /// Over the visible-cell budget.
    Performance,
}

impl std::fmt::Display for CullReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CullReason::Frustum => write!(f, "frustum"),
            CullReason::Distance => write!(f, "distance"),
            CullReason::Performance => write!(f, "performance"),
        }
    }
}

/// Something that may be drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct CullCandidate<K> {
    /// Caller's identifier.
    pub id: K,
    /// Geographic extent.
    pub bounds: GeoBounds,
    /// Larger is more important.
    pub priority: f64,
}

impl<K> CullCandidate<K> {
    /// Create a candidate.
    pub fn new(id: K, bounds: GeoBounds, priority: f64) -> Self {
        Self {
            id,
            bounds,
            priority,
        }
    }
}

/// Outcome of a culling pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CullResult<K> {
    /// Candidates to draw, in evaluation order.
    pub visible: Vec<K>,
    /// Candidates dropped, with the reason.
    pub culled: Vec<(K, CullReason)>,
}

impl<K> CullResult<K> {
    /// Number of candidates dropped for `reason`.
    pub fn culled_for(&self, reason: CullReason) -> usize {
        self.culled.iter().filter(|(_, r)| *r == reason).count()
    }
}

impl<K> Default for CullResult<K> {
    fn default() -> Self {
        Self {
            visible: Vec::new(),
            culled: Vec::new(),
        }
    }
}

/// Split `candidates` into visible and culled for the given level.
pub fn cull<K: Clone>(
    candidates: &[CullCandidate<K>],
    viewport_bounds: &GeoBounds,
    camera: &GeoPoint,
    level: &LodLevel,
) -> CullResult<K> {
    let mut ordered: Vec<(&CullCandidate<K>, f64)> = candidates
        .iter()
        .map(|c| (c, c.bounds.center().distance_to(camera)))
        .collect();

    ordered.sort_by(|(a, da), (b, db)| {
        b.priority
            .partial_cmp(&a.priority)
            .unwrap_or(Ordering::Equal)
            .then_with(|| da.total_cmp(db))
    });

    let budget = level.max_visible_cells as usize;
    let mut result = CullResult {
        visible: Vec::with_capacity(budget.min(candidates.len())),
        culled: Vec::new(),
    };

    for (candidate, distance) in ordered {
        let reason = if !candidate.bounds.intersects(viewport_bounds) {
            Some(CullReason::Frustum)
        } else if distance > level.culling_distance_meters {
            Some(CullReason::Distance)
        } else if result.visible.len() >= budget {
            Some(CullReason::Performance)
        } else {
            None
        };

        match reason {
            Some(r) => result.culled.push((candidate.id.clone(), r)),
            None => result.visible.push(candidate.id.clone()),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lod::ladder::default_ladder;

    fn level_with_budget(cells: u32) -> LodLevel {
        let mut level = (*default_ladder()[2]).clone();
        level.max_visible_cells = cells;
        level
    }

    fn patch_at(center: GeoPoint, north_km: f64) -> GeoBounds {
        GeoBounds::around(center.offset_meters(north_km * 1000.0, 0.0), 500.0, 500.0)
    }

    #[test]
    fn test_budget_keeps_nearest() {
        let camera = GeoPoint::new(47.0, 8.0);
        let viewport = GeoBounds::around(camera, 50_000.0, 50_000.0);
        let level = level_with_budget(5);

        let candidates: Vec<CullCandidate<u32>> = (0..10)
            .map(|i| {
                let d = (i + 1) as f64;
                CullCandidate::new(i, patch_at(camera, d), 1.0 / (1.0 + d * 1000.0))
            })
            .collect();

        let result = cull(&candidates, &viewport, &camera, &level);
        assert_eq!(result.visible, vec![0, 1, 2, 3, 4]);
        assert_eq!(result.culled_for(CullReason::Performance), 5);
    }

    #[test]
    fn test_frustum_before_distance() {
        let camera = GeoPoint::new(0.0, 0.0);
        let viewport = GeoBounds::around(camera, 1_000.0, 1_000.0);
        let level = level_with_budget(10);

        let far_outside = CullCandidate::new("far", patch_at(camera, 500.0), 1.0);
        let result = cull(&[far_outside], &viewport, &camera, &level);
        assert_eq!(result.culled, vec![("far", CullReason::Frustum)]);
    }

    #[test]
    fn test_distance_culling() {
        let camera = GeoPoint::new(0.0, 0.0);
        let viewport = GeoBounds::around(camera, 300_000.0, 300_000.0);
        let level = level_with_budget(10);

        let near = CullCandidate::new("near", patch_at(camera, 10.0), 0.5);
        let far = CullCandidate::new("far", patch_at(camera, 150.0), 0.9);
        let result = cull(&[near, far], &viewport, &camera, &level);

        assert_eq!(result.visible, vec!["near"]);
        assert_eq!(result.culled, vec![("far", CullReason::Distance)]);
    }

    #[test]
    fn test_priority_ties_prefer_nearer() {
        let camera = GeoPoint::new(10.0, 10.0);
        let viewport = GeoBounds::around(camera, 50_000.0, 50_000.0);
        let level = level_with_budget(1);

        let a = CullCandidate::new("a", patch_at(camera, 20.0), 1.0);
        let b = CullCandidate::new("b", patch_at(camera, 5.0), 1.0);
        let result = cull(&[a, b], &viewport, &camera, &level);

        assert_eq!(result.visible, vec!["b"]);
        assert_eq!(result.culled, vec![("a", CullReason::Performance)]);
    }

    #[test]
    fn test_empty_input() {
        let camera = GeoPoint::new(0.0, 0.0);
        let viewport = GeoBounds::around(camera, 1.0, 1.0);
        let result: CullResult<u8> = cull(&[], &viewport, &camera, &level_with_budget(3));
        assert!(result.visible.is_empty());
        assert!(result.culled.is_empty());
    }
}
