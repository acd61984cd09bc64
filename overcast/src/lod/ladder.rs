//! The LOD ladder.
//!
//! Five levels, lowest complexity first. Zoom ranges overlap so that a
//! zoom near a boundary has two candidates and the selector can pick the
//! one the device affords.
//!
//! | Level   | Zoom  | Cell   | Texture | Cells | Culling  |
//! |---------|-------|--------|---------|-------|----------|
//! | minimal | 0-8   | 50 km  | 128     | 25    | 2000 km  |
//! | low     | 6-12  | 10 km  | 256     | 50    | 500 km   |
//! | medium  | 10-16 | 2 km   | 512     | 150   | 100 km   |
//! | high    | 14-20 | 500 m  | 1024    | 300   | 25 km    |
//! | ultra   | 18-25 | 100 m  | 2048    | 400   | 5 km     |

use std::sync::Arc;

use serde::Serialize;

use crate::tier::{AnimationQuality, ShaderComplexity};

/// Inclusive zoom range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZoomRange {
    /// Lowest zoom (inclusive).
    pub min: f64,
    /// Highest zoom (inclusive).
    pub max: f64,
}

impl ZoomRange {
    /// Create a range.
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Whether `zoom` lies within the range.
    pub fn contains(&self, zoom: f64) -> bool {
        zoom >= self.min && zoom <= self.max
    }

    /// Middle of the range.
    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

/// One rung of the LOD ladder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LodLevel {
    /// Level name.
    pub name: &'static str,
    /// Zoom levels this level is intended for.
    pub zoom_range: ZoomRange,
    /// Ground size of one effect cell.
    pub cell_size_meters: f64,
    /// Edge length of effect textures.
    pub texture_resolution: u32,
    /// Cell budget per frame.
    pub max_visible_cells: u32,
    /// Cells farther than this from the camera are culled.
    pub culling_distance_meters: f64,
    /// Animation detail.
    pub animation_quality: AnimationQuality,
    /// Shader variant.
    pub shader_complexity: ShaderComplexity,
}

/// Build the default five-level ladder, lowest complexity first.
pub fn default_ladder() -> Vec<Arc<LodLevel>> {
    vec![
        Arc::new(LodLevel {
            name: "minimal",
            zoom_range: ZoomRange::new(0.0, 8.0),
            cell_size_meters: 50_000.0,
            texture_resolution: 128,
            max_visible_cells: 25,
            culling_distance_meters: 2_000_000.0,
            animation_quality: AnimationQuality::Low,
            shader_complexity: ShaderComplexity::Simple,
        }),
        Arc::new(LodLevel {
            name: "low",
            zoom_range: ZoomRange::new(6.0, 12.0),
            cell_size_meters: 10_000.0,
            texture_resolution: 256,
            max_visible_cells: 50,
            culling_distance_meters: 500_000.0,
            animation_quality: AnimationQuality::Low,
            shader_complexity: ShaderComplexity::Simple,
        }),
        Arc::new(LodLevel {
            name: "medium",
            zoom_range: ZoomRange::new(10.0, 16.0),
            cell_size_meters: 2_000.0,
            texture_resolution: 512,
            max_visible_cells: 150,
            culling_distance_meters: 100_000.0,
            animation_quality: AnimationQuality::Medium,
            shader_complexity: ShaderComplexity::Standard,
        }),
        Arc::new(LodLevel {
            name: "high",
            zoom_range: ZoomRange::new(14.0, 20.0),
            cell_size_meters: 500.0,
            texture_resolution: 1024,
            max_visible_cells: 300,
            culling_distance_meters: 25_000.0,
            animation_quality: AnimationQuality::High,
            shader_complexity: ShaderComplexity::Complex,
        }),
        Arc::new(LodLevel {
            name: "ultra",
            zoom_range: ZoomRange::new(18.0, 25.0),
            cell_size_meters: 100.0,
            texture_resolution: 2048,
            max_visible_cells: 400,
            culling_distance_meters: 5_000.0,
            animation_quality: AnimationQuality::High,
            shader_complexity: ShaderComplexity::Complex,
        }),
    ]
}
