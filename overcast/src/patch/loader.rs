//! Patch content source.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use super::grid::PatchId;
use crate::error::PatchLoadError;
use crate::geo::GeoBounds;

/// Boxed future returned by [`PatchLoader::load`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Produces the renderer-facing content of a patch.
///
/// Uses `Pin<Box<dyn Future>>` so schedulers can hold `Arc<dyn PatchLoader>`.
pub trait PatchLoader: Send + Sync + 'static {
    /// Generate or fetch the payload for one patch.
    fn load(&self, id: PatchId, bounds: GeoBounds) -> BoxFuture<'_, Result<Bytes, PatchLoadError>>;
}

/// A loaded patch, as handed to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchPayload {
    /// Grid id.
    pub id: PatchId,
    /// Geographic extent.
    pub bounds: GeoBounds,
    /// Loader output (density field, vertex data, ...).
    pub data: Bytes,
}
