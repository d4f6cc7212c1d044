//! Decoded tile representation.

use bytes::Bytes;
use image::RgbaImage;
use tracing::trace;

use crate::coord::TileKey;

/// One tile held by the memory cache: the decoded raster plus the encoded
/// bytes it was produced from.
///
/// The encoded bytes are kept so a memory hit can hand observers the same
/// payload a disk or network hit would; the raster is what the eviction
/// policy must release promptly.
#[derive(Debug)]
pub struct DecodedTile {
    key: TileKey,
    bytes: Bytes,
    image: RgbaImage,
}

impl DecodedTile {
    /// Decodes encoded tile bytes into a resident tile.
    ///
    /// Fails on malformed input; the partially-allocated decode buffers are
    /// freed before returning, so a bad tile costs nothing beyond the
    /// attempt.
    pub fn decode(key: TileKey, bytes: Bytes) -> Result<Self, image::ImageError> {
        let image = image::load_from_memory(&bytes)?.to_rgba8();
        Ok(Self { key, bytes, image })
    }

    /// The tile this raster belongs to.
    pub fn key(&self) -> TileKey {
        self.key
    }

    /// The encoded payload the tile was decoded from.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Decoded raster width in pixels.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Decoded raster height in pixels.
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Approximate resident size: encoded payload plus raster.
    pub fn resident_bytes(&self) -> usize {
        self.bytes.len() + self.image.as_raw().len()
    }

    /// Releases the tile's raster.
    ///
    /// Called by the pipeline when the memory cache evicts the entry, so
    /// the raster's lifetime ends at a known point instead of whenever the
    /// last reference happens to drop.
    pub fn release(self) {
        trace!(tile = %self.key, "releasing decoded tile");
        drop(self.image);
        drop(self.bytes);
    }
}
