//! Geographic primitives shared by culling, patch scheduling and spatial
//! cache maintenance.
//!
//! Distances use the haversine great-circle formula. Patch grids are laid out
//! in spherical Web Mercator (EPSG:3857) meters, the projection map tiles are
//! cut in, so a patch lines up with the basemap underneath it.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// WGS84 equatorial radius in meters (also the Web Mercator sphere radius).
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Maximum latitude representable in Web Mercator.
pub const MAX_LAT: f64 = 85.05112878;

/// Minimum latitude representable in Web Mercator.
pub const MIN_LAT: f64 = -85.05112878;

/// Meters per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_319.490_793;

/// Ground resolution at zoom 0 on the equator for 256px map tiles.
const METERS_PER_PIXEL_Z0: f64 = 156_543.033_928;

/// Maximum camera pitch used when widening the visible area (degrees).
const MAX_PITCH_DEG: f64 = 60.0;

/// A geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, positive north.
    pub lat: f64,
    /// Longitude in degrees, positive east.
    pub lon: f64,
}

impl GeoPoint {
    /// Create a new point.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }

    /// Returns a copy clamped to the Web Mercator latitude range and
    /// the [-180, 180] longitude range.
    pub fn clamped(&self) -> Self {
        Self {
            lat: self.lat.clamp(MIN_LAT, MAX_LAT),
            lon: self.lon.clamp(-180.0, 180.0),
        }
    }

    /// Returns the point displaced by the given offsets in meters.
    pub fn offset_meters(&self, north_m: f64, east_m: f64) -> Self {
        let lat = self.lat + north_m / METERS_PER_DEGREE;
        let lon = self.lon + east_m / meters_per_degree_lon(self.lat);
        Self { lat, lon }.clamped()
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.5}, {:.5})", self.lat, self.lon)
    }
}

/// Axis-aligned geographic bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    /// Minimum (southernmost) latitude
    pub min_lat: f64,
    /// Maximum (northernmost) latitude
    pub max_lat: f64,
    /// Minimum (westernmost) longitude
    pub min_lon: f64,
    /// Maximum (easternmost) longitude
    pub max_lon: f64,
}

impl GeoBounds {
    /// Create a bounding box. Swapped edges are normalized.
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat: min_lat.min(max_lat),
            max_lat: min_lat.max(max_lat),
            min_lon: min_lon.min(max_lon),
            max_lon: min_lon.max(max_lon),
        }
    }

    /// Bounding box extending `half_height_m` north/south and `half_width_m`
    /// east/west of `center`.
    pub fn around(center: GeoPoint, half_width_m: f64, half_height_m: f64) -> Self {
        let sw = center.offset_meters(-half_height_m, -half_width_m);
        let ne = center.offset_meters(half_height_m, half_width_m);
        Self::new(sw.lat, ne.lat, sw.lon, ne.lon)
    }

    /// Geographic center of the box.
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// Whether `point` lies inside the box (edges inclusive).
    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lon..=self.max_lon).contains(&point.lon)
    }

    /// Whether the two boxes overlap (touching edges count as overlap).
    pub fn intersects(&self, other: &GeoBounds) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
    }

    /// Grow the box by `margin_m` meters on every side.
    pub fn expanded(&self, margin_m: f64) -> Self {
        let sw = GeoPoint::new(self.min_lat, self.min_lon).offset_meters(-margin_m, -margin_m);
        let ne = GeoPoint::new(self.max_lat, self.max_lon).offset_meters(margin_m, margin_m);
        Self::new(sw.lat, ne.lat, sw.lon, ne.lon)
    }
}

/// The camera state the host reports every frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Map center under the camera.
    pub center: GeoPoint,
    /// Fractional map zoom level (0 = whole world).
    pub zoom: f64,
    /// Map rotation in degrees clockwise from north.
    pub bearing: f64,
    /// Camera tilt in degrees (0 = looking straight down).
    pub pitch: f64,
    /// Screen width in pixels.
    pub width_px: u32,
    /// Screen height in pixels.
    pub height_px: u32,
}

impl Viewport {
    /// Create a north-up, untilted viewport.
    pub fn new(center: GeoPoint, zoom: f64, width_px: u32, height_px: u32) -> Self {
        Self {
            center,
            zoom,
            bearing: 0.0,
            pitch: 0.0,
            width_px,
            height_px,
        }
    }

    /// Ground resolution at the viewport center in meters per pixel.
    pub fn meters_per_pixel(&self) -> f64 {
        let lat = self.center.lat.clamp(MIN_LAT, MAX_LAT).to_radians();
        METERS_PER_PIXEL_Z0 * lat.cos() / 2f64.powf(self.zoom.clamp(0.0, 25.0))
    }

    /// Geographic box covering everything visible on screen.
    ///
    /// Rotation is folded into an axis-aligned envelope and pitch stretches
    /// the vertical extent (capped at 60°, beyond which the horizon would
    /// make the box unbounded).
    pub fn bounds(&self) -> GeoBounds {
        let mpp = self.meters_per_pixel();
        let half_w = self.width_px as f64 * mpp / 2.0;
        let pitch = self.pitch.clamp(0.0, MAX_PITCH_DEG).to_radians();
        let half_h = self.height_px as f64 * mpp / 2.0 / pitch.cos();

        let bearing = self.bearing.to_radians();
        let (sin_b, cos_b) = (bearing.sin().abs(), bearing.cos().abs());
        let env_w = half_w * cos_b + half_h * sin_b;
        let env_h = half_w * sin_b + half_h * cos_b;

        GeoBounds::around(self.center, env_w, env_h)
    }
}

/// Meters per degree of longitude at the given latitude.
fn meters_per_degree_lon(lat: f64) -> f64 {
    (METERS_PER_DEGREE * lat.to_radians().cos()).max(1.0)
}

/// Project a point to spherical Web Mercator meters `(x, y)`.
pub fn project(point: GeoPoint) -> (f64, f64) {
    let p = point.clamped();
    let x = EARTH_RADIUS_M * p.lon.to_radians();
    let y = EARTH_RADIUS_M * (PI / 4.0 + p.lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

/// Inverse of [`project`].
pub fn unproject(x: f64, y: f64) -> GeoPoint {
    let lon = (x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - PI / 2.0).to_degrees();
    GeoPoint::new(lat, lon).clamped()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_degree_latitude_distance() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(1.0, 0.0);
        let d = a.distance_to(&b);
        assert!((d - 111_319.0).abs() < 200.0, "got {d}");
    }

    #[test]
    fn test_distance_is_symmetric_and_zero_on_self() {
        let a = GeoPoint::new(53.55, 9.99);
        let b = GeoPoint::new(51.50, -0.12);
        assert!((a.distance_to(&b) - b.distance_to(&a)).abs() < 1e-6);
        assert_eq!(a.distance_to(&a), 0.0);
    }

    #[test]
    fn test_offset_meters_roundtrip_distance() {
        let origin = GeoPoint::new(47.0, 8.0);
        let moved = origin.offset_meters(12_000.0, 0.0);
        assert!((origin.distance_to(&moved) - 12_000.0).abs() < 50.0);
    }

    #[test]
    fn test_bounds_normalizes_edges() {
        let b = GeoBounds::new(10.0, 5.0, 3.0, -3.0);
        assert_eq!(b.min_lat, 5.0);
        assert_eq!(b.max_lat, 10.0);
        assert_eq!(b.min_lon, -3.0);
        assert_eq!(b.max_lon, 3.0);
    }

    #[test]
    fn test_bounds_intersection() {
        let a = GeoBounds::new(0.0, 1.0, 0.0, 1.0);
        let b = GeoBounds::new(0.5, 1.5, 0.5, 1.5);
        let c = GeoBounds::new(2.0, 3.0, 2.0, 3.0);
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_bounds_contains_center() {
        let b = GeoBounds::around(GeoPoint::new(40.0, -74.0), 5_000.0, 5_000.0);
        assert!(b.contains(&b.center()));
        assert!(!b.contains(&GeoPoint::new(41.0, -74.0)));
    }

    #[test]
    fn test_viewport_bounds_shrink_with_zoom() {
        let center = GeoPoint::new(48.85, 2.35);
        let wide = Viewport::new(center, 8.0, 1024, 768).bounds();
        let narrow = Viewport::new(center, 14.0, 1024, 768).bounds();
        assert!(wide.max_lat - wide.min_lat > narrow.max_lat - narrow.min_lat);
        assert!(wide.contains(&center));
        assert!(narrow.contains(&center));
    }

    #[test]
    fn test_viewport_rotation_widens_envelope() {
        let center = GeoPoint::new(0.0, 0.0);
        let mut vp = Viewport::new(center, 12.0, 1600, 400);
        let north_up = vp.bounds();
        vp.bearing = 90.0;
        let rotated = vp.bounds();
        assert!(rotated.max_lat - rotated.min_lat > north_up.max_lat - north_up.min_lat);
    }

    #[test]
    fn test_project_origin() {
        let (x, y) = project(GeoPoint::new(0.0, 0.0));
        assert!(x.abs() < 1e-6);
        assert!(y.abs() < 1e-6);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_mercator_roundtrip(lat in -85.0..85.0_f64, lon in -180.0..180.0_f64) {
                let (x, y) = project(GeoPoint::new(lat, lon));
                let back = unproject(x, y);
                prop_assert!((back.lat - lat).abs() < 1e-7);
                prop_assert!((back.lon - lon).abs() < 1e-7);
            }
        }
    }
}
