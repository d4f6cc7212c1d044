//! Tile provider descriptors and URL construction.
//!
//! A [`ProviderDescriptor`] captures the static facts about one tile set:
//! its name, supported zoom range, tile size, file extension, and how tile
//! URLs are addressed. Behavioral differences between XYZ-addressed and
//! quadkey-addressed servers reduce to the [`UrlScheme`] tag; there is no
//! per-provider type hierarchy.

mod http;

pub use http::{FetchError, HttpClient, ReqwestClient};

#[cfg(test)]
pub use http::tests::MockHttpClient;

use crate::coord::{TileKey, MAX_ZOOM};

/// How a provider's URL template addresses tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlScheme {
    /// Template with `{zoom}`, `{x}` and `{y}` placeholders.
    Xyz,
    /// Template with a single `{quadkey}` placeholder.
    QuadKey,
}

/// Static description of one tile source.
///
/// Read by the provider chain to decide whether a source can serve a given
/// zoom level, and by the network source to build tile URLs.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    name: String,
    min_zoom: u8,
    max_zoom: u8,
    uses_network: bool,
    tile_size_px: u32,
    extension: String,
    url_template: String,
    scheme: UrlScheme,
}

impl ProviderDescriptor {
    /// Creates a descriptor for an XYZ-addressed provider.
    ///
    /// The template must contain `{zoom}`, `{x}` and `{y}` placeholders,
    /// e.g. `https://tile.example.org/{zoom}/{x}/{y}.png`.
    pub fn xyz(name: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_zoom: 0,
            max_zoom: MAX_ZOOM,
            uses_network: true,
            tile_size_px: 256,
            extension: ".png".to_string(),
            url_template: url_template.into(),
            scheme: UrlScheme::Xyz,
        }
    }

    /// Creates a descriptor for a quadkey-addressed provider.
    ///
    /// The template must contain a `{quadkey}` placeholder, e.g.
    /// `https://ecn.t0.tiles.example.net/tiles/a{quadkey}.jpeg?g=1`.
    /// Quadkey addressing has no zoom-0 representation, so the minimum
    /// zoom defaults to 1.
    pub fn quadkey(name: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_zoom: 1,
            max_zoom: MAX_ZOOM,
            uses_network: true,
            tile_size_px: 256,
            extension: ".jpg".to_string(),
            url_template: url_template.into(),
            scheme: UrlScheme::QuadKey,
        }
    }

    /// Creates a descriptor for a purely offline tile set (archives only).
    pub fn offline(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_zoom: 0,
            max_zoom: MAX_ZOOM,
            uses_network: false,
            tile_size_px: 256,
            extension: ".png".to_string(),
            url_template: String::new(),
            scheme: UrlScheme::Xyz,
        }
    }

    /// Restricts the supported zoom range.
    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    /// Sets the tile edge length in pixels.
    pub fn with_tile_size(mut self, tile_size_px: u32) -> Self {
        self.tile_size_px = tile_size_px;
        self
    }

    /// Sets the on-disk file extension (including the leading dot).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Provider name; also the top-level disk cache directory segment.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Minimum supported zoom level.
    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    /// Maximum supported zoom level.
    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    /// Whether this provider fetches over the network.
    pub fn uses_network(&self) -> bool {
        self.uses_network
    }

    /// Tile edge length in pixels.
    pub fn tile_size_px(&self) -> u32 {
        self.tile_size_px
    }

    /// File extension used for disk cache entries.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// URL addressing scheme.
    pub fn scheme(&self) -> UrlScheme {
        self.scheme
    }

    /// Whether `zoom` falls inside this provider's supported range.
    pub fn supports_zoom(&self, zoom: u8) -> bool {
        (self.min_zoom..=self.max_zoom).contains(&zoom)
    }

    /// Builds the download URL for a tile.
    pub fn tile_url(&self, key: &TileKey) -> String {
        match self.scheme {
            UrlScheme::Xyz => self
                .url_template
                .replace("{zoom}", &key.zoom().to_string())
                .replace("{x}", &key.x().to_string())
                .replace("{y}", &key.y().to_string()),
            UrlScheme::QuadKey => self.url_template.replace("{quadkey}", &key.quadkey()),
        }
    }
}
