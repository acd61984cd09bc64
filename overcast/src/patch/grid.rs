//! Patch grid in spherical Web Mercator meters.
//!
//! Patch `(x, y)` covers `[x * size, (x + 1) * size)` by
//! `[y * size, (y + 1) * size)` in projected meters, so patch edges line up
//! with map tiles of the same projection. `y` grows northwards.

use serde::{Deserialize, Serialize};

use crate::geo::{project, unproject, GeoBounds, GeoPoint};

/// Default patch edge in projected meters.
pub const DEFAULT_PATCH_SIZE_METERS: f64 = 5_000.0;

/// Upper bound on the ids returned by one coverage query.
pub const MAX_COVERING_PATCHES: usize = 4_096;

/// Grid-aligned patch identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PatchId {
    /// Column, eastwards.
    pub x: i64,
    /// Row, northwards.
    pub y: i64,
}

impl PatchId {
    /// Create an id.
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for PatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.x, self.y)
    }
}

/// Maps geographic areas onto patch ids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchGrid {
    patch_size: f64,
}

impl PatchGrid {
    /// Create a grid with the given patch edge (projected meters, at least 1).
    pub fn new(patch_size_meters: f64) -> Self {
        let patch_size = if patch_size_meters.is_finite() {
            patch_size_meters.max(1.0)
        } else {
            DEFAULT_PATCH_SIZE_METERS
        };
        Self { patch_size }
    }

    /// Patch edge in projected meters.
    pub fn patch_size_meters(&self) -> f64 {
        self.patch_size
    }

    /// The patch containing `point`.
    pub fn patch_at(&self, point: GeoPoint) -> PatchId {
        let (x, y) = project(point);
        PatchId::new(
            (x / self.patch_size).floor() as i64,
            (y / self.patch_size).floor() as i64,
        )
    }

    /// Geographic extent of a patch.
    pub fn bounds_of(&self, id: PatchId) -> GeoBounds {
        let sw = unproject(id.x as f64 * self.patch_size, id.y as f64 * self.patch_size);
        let ne = unproject(
            (id.x + 1) as f64 * self.patch_size,
            (id.y + 1) as f64 * self.patch_size,
        );
        GeoBounds::new(sw.lat, ne.lat, sw.lon, ne.lon)
    }

    /// Geographic center of a patch.
    pub fn center_of(&self, id: PatchId) -> GeoPoint {
        unproject(
            (id.x as f64 + 0.5) * self.patch_size,
            (id.y as f64 + 0.5) * self.patch_size,
        )
    }

    /// Ids of every patch intersecting `bounds`, widened by `buffer` patches
    /// on each side.
    ///
    /// When the area would exceed [`MAX_COVERING_PATCHES`], the result is the
    /// largest square window centered on the area's center.
    pub fn patches_covering(&self, bounds: &GeoBounds, buffer: u32) -> Vec<PatchId> {
        let sw = self.patch_at(GeoPoint::new(bounds.min_lat, bounds.min_lon));
        let ne = self.patch_at(GeoPoint::new(bounds.max_lat, bounds.max_lon));
        let buffer = buffer as i64;

        let (mut x0, mut x1) = (sw.x.min(ne.x) - buffer, sw.x.max(ne.x) + buffer);
        let (mut y0, mut y1) = (sw.y.min(ne.y) - buffer, sw.y.max(ne.y) + buffer);

        let width = (x1 - x0 + 1) as u128;
        let height = (y1 - y0 + 1) as u128;
        if width * height > MAX_COVERING_PATCHES as u128 {
            let half = ((MAX_COVERING_PATCHES as f64).sqrt() as i64 - 1) / 2;
            let center = self.patch_at(bounds.center());
            x0 = x0.max(center.x - half);
            x1 = x1.min(center.x + half);
            y0 = y0.max(center.y - half);
            y1 = y1.min(center.y + half);
        }

        let mut ids = Vec::with_capacity(((x1 - x0 + 1) * (y1 - y0 + 1)).max(0) as usize);
        for y in y0..=y1 {
            for x in x0..=x1 {
                ids.push(PatchId::new(x, y));
            }
        }
        ids
    }
}

impl Default for PatchGrid {
    fn default() -> Self {
        Self::new(DEFAULT_PATCH_SIZE_METERS)
    }
}
