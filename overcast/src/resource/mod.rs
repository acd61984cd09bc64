//! GPU resource pooling and caching under a memory budget.
//!
//! Two stores share one budget:
//!
//! - **Pooled textures** are keyed by id and reused when the same id,
//!   resolution and format is requested again. Released textures stay
//!   allocated until reclaimed.
//! - **Cached resources** are tagged with a kind and a 0-10 priority and
//!   evicted lowest priority first. Entries at or above the protected
//!   priority survive every cleanup.
//!
//! Allocation goes through the host's [`ResourceAllocator`].

mod backend;
mod cache;
mod manager;
mod pool;
mod stats;

pub use backend::{
    HeadlessAllocator, ResourceAllocator, ResourceHandle, TextureDescriptor, TextureFormat,
};
pub use cache::{
    CacheEntry, CachedResource, ResourceCache, ResourceKind, DEFAULT_PRIORITY, MAX_PRIORITY,
};
pub use manager::{ResourcePool, ResourcePoolConfig};
pub use pool::{PooledTexture, TexturePool, DEFAULT_POOL_CAPACITY};
pub use stats::{CleanupKind, CleanupReport, MemoryStats};
