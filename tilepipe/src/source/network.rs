//! HTTP tile fetching.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::coord::TileKey;
use crate::provider::{FetchError, HttpClient, ProviderDescriptor};

/// Fetches tiles from the provider's tile servers.
///
/// The source only downloads: on success the bytes are returned to the
/// caller, and the provider chain decides which cache tiers to populate.
/// Keeping the source free of cache writes keeps it testable in isolation.
pub struct NetworkSource {
    descriptor: ProviderDescriptor,
    http_client: Arc<dyn HttpClient>,
}

impl NetworkSource {
    /// Creates a network source for one provider.
    pub fn new(descriptor: ProviderDescriptor, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            descriptor,
            http_client,
        }
    }

    /// The provider this source downloads from.
    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    /// Whether this source can serve the given zoom level.
    pub fn supports_zoom(&self, zoom: u8) -> bool {
        self.descriptor.supports_zoom(zoom)
    }

    /// Downloads one tile.
    ///
    /// Failures are terminal for this resolve attempt; the pipeline does
    /// not retry on its own.
    pub fn fetch(&self, key: &TileKey) -> Result<Bytes, FetchError> {
        let url = self.descriptor.tile_url(key);
        debug!(tile = %key, %url, "fetching tile");
        let body = self.http_client.get(&url)?;
        Ok(Bytes::from(body))
    }
}
