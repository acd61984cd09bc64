//! GPU allocation boundary.
//!
//! The host's drawing context implements [`ResourceAllocator`]; the pool
//! only ever sees opaque [`ResourceHandle`]s. [`HeadlessAllocator`] tracks
//! allocations in memory and is used when no GPU is attached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ResourceError;

/// Opaque handle to a GPU-side allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceHandle(pub u64);

impl std::fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Texel format of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureFormat {
    /// 8-bit RGBA.
    #[default]
    Rgba8,
    /// Half-float RGBA.
    Rgba16F,
    /// Float RGBA.
    Rgba32F,
    /// Single 8-bit channel.
    R8,
}

impl TextureFormat {
    /// Bytes per texel.
    pub fn bytes_per_pixel(&self) -> u64 {
        match self {
            TextureFormat::Rgba8 => 4,
            TextureFormat::Rgba16F => 8,
            TextureFormat::Rgba32F => 16,
            TextureFormat::R8 => 1,
        }
    }

    /// Whether the format needs float texture support.
    pub fn is_float(&self) -> bool {
        matches!(self, TextureFormat::Rgba16F | TextureFormat::Rgba32F)
    }
}

impl std::fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextureFormat::Rgba8 => write!(f, "RGBA"),
            TextureFormat::Rgba16F => write!(f, "RGBA16F"),
            TextureFormat::Rgba32F => write!(f, "RGBA32F"),
            TextureFormat::R8 => write!(f, "R8"),
        }
    }
}

impl std::str::FromStr for TextureFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_uppercase().as_str() {
            "RGBA16F" => Self::Rgba16F,
            "RGBA32F" => Self::Rgba32F,
            "R8" | "RED" | "LUMINANCE" => Self::R8,
            _ => Self::Rgba8,
        })
    }
}

/// Shape of a texture allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Texel format.
    pub format: TextureFormat,
}

impl TextureDescriptor {
    /// Square texture of edge `resolution`.
    pub fn square(resolution: u32, format: TextureFormat) -> Self {
        Self {
            width: resolution,
            height: resolution,
            format,
        }
    }

    /// GPU memory the texture occupies.
    pub fn size_bytes(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.bytes_per_pixel()
    }
}

/// Allocates and destroys GPU resources on behalf of the pool.
pub trait ResourceAllocator: Send + Sync {
    /// Allocate a texture.
    fn allocate_texture(&self, desc: &TextureDescriptor) -> Result<ResourceHandle, ResourceError>;

    /// Release a resource. Unknown handles are ignored.
    fn destroy(&self, handle: ResourceHandle);
}

/// In-memory allocator that only does bookkeeping.
#[derive(Debug, Default)]
pub struct HeadlessAllocator {
    next_handle: AtomicU64,
    total_allocations: AtomicU64,
    live: Mutex<HashMap<ResourceHandle, u64>>,
    max_live: Option<usize>,
}

impl HeadlessAllocator {
    /// Create an unbounded allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an allocator that refuses to hold more than `max_live`
    /// allocations at once.
    pub fn with_limit(max_live: usize) -> Self {
        Self {
            max_live: Some(max_live),
            ..Self::default()
        }
    }

    /// Allocations currently alive.
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Bytes currently allocated.
    pub fn live_bytes(&self) -> u64 {
        self.live.lock().values().sum()
    }

    /// Allocations made since creation, including destroyed ones.
    pub fn total_allocations(&self) -> u64 {
        self.total_allocations.load(Ordering::Relaxed)
    }

    /// Whether `handle` is still alive.
    pub fn is_live(&self, handle: ResourceHandle) -> bool {
        self.live.lock().contains_key(&handle)
    }

    /// Hand out a handle for a non-texture resource created elsewhere.
    pub fn register(&self, size_bytes: u64) -> ResourceHandle {
        let handle = ResourceHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        self.live.lock().insert(handle, size_bytes);
        self.total_allocations.fetch_add(1, Ordering::Relaxed);
        handle
    }
}

impl ResourceAllocator for HeadlessAllocator {
    fn allocate_texture(&self, desc: &TextureDescriptor) -> Result<ResourceHandle, ResourceError> {
        if let Some(max) = self.max_live {
            if self.live.lock().len() >= max {
                return Err(ResourceError::AllocationFailed(format!(
                    "{}x{} {}: allocator limit of {} reached",
                    desc.width, desc.height, desc.format, max
                )));
            }
        }
        Ok(self.register(desc.size_bytes()))
    }

    fn destroy(&self, handle: ResourceHandle) {
        self.live.lock().remove(&handle);
    }
}
