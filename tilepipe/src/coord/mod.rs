//! Tile coordinate types and conversions.
//!
//! Provides the canonical tile identifier ([`TileKey`]), conversions between
//! geographic coordinates (latitude/longitude) and Web Mercator tile
//! coordinates, quadkey derivation for hierarchically-addressed providers,
//! and the packed numeric index used by SQLite tile archives.

mod area;

pub use area::{possible_tiles_in_area, BoundingBox, TileAreaIterator, TileRange};

use std::f64::consts::PI;
use std::fmt;

use thiserror::Error;

/// Maximum zoom level supported by the coordinate system.
///
/// Bounded by the packed archive index, which must stay within a signed
/// 64-bit SQLite INTEGER for every valid `(zoom, x, y)` triple.
pub const MAX_ZOOM: u8 = 23;

/// Minimum latitude representable in Web Mercator.
pub const MIN_LAT: f64 = -85.05112878;

/// Maximum latitude representable in Web Mercator.
pub const MAX_LAT: f64 = 85.05112878;

/// Minimum longitude.
pub const MIN_LON: f64 = -180.0;

/// Maximum longitude.
pub const MAX_LON: f64 = 180.0;

/// Errors produced by coordinate validation and conversion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    /// Latitude outside the Web Mercator range.
    #[error("latitude {0} outside the Web Mercator range")]
    InvalidLatitude(f64),

    /// Longitude outside [-180, 180].
    #[error("longitude {0} outside the valid range")]
    InvalidLongitude(f64),

    /// Zoom level beyond [`MAX_ZOOM`].
    #[error("unsupported zoom level {0}")]
    InvalidZoom(u8),

    /// Tile coordinates outside the `2^zoom x 2^zoom` grid.
    #[error("tile ({x}, {y}) outside grid for zoom {zoom}")]
    InvalidTile { zoom: u8, x: u32, y: u32 },

    /// A packed archive index that does not decode to a valid tile.
    #[error("packed index {0} does not correspond to a valid tile")]
    InvalidIndex(i64),
}

/// Canonical identifier for one raster map tile.
///
/// Coordinates follow the slippy-map scheme: `x` increases eastward from the
/// antimeridian, `y` increases southward from the north edge of the Web
/// Mercator square, and the grid at `zoom` is `2^zoom x 2^zoom` tiles.
///
/// Invariant: `x < 2^zoom` and `y < 2^zoom`. [`TileKey::new`] enforces this;
/// the fields are read-only to keep the invariant from being bypassed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TileKey {
    zoom: u8,
    x: u32,
    y: u32,
}

impl TileKey {
    /// Creates a tile key, validating that the coordinates fit the grid.
    pub fn new(zoom: u8, x: u32, y: u32) -> Result<Self, CoordError> {
        if zoom > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(zoom));
        }
        let extent = 1u32 << zoom;
        if x >= extent || y >= extent {
            return Err(CoordError::InvalidTile { zoom, x, y });
        }
        Ok(Self { zoom, x, y })
    }

    /// Converts geographic coordinates to the containing tile.
    ///
    /// `x` derives from longitude linearly; `y` from the Web Mercator
    /// forward projection of latitude, clipped to `[0, 2^zoom - 1]`.
    pub fn from_lat_lon(lat: f64, lon: f64, zoom: u8) -> Result<Self, CoordError> {
        if !(MIN_LAT..=MAX_LAT).contains(&lat) {
            return Err(CoordError::InvalidLatitude(lat));
        }
        if !(MIN_LON..=MAX_LON).contains(&lon) {
            return Err(CoordError::InvalidLongitude(lon));
        }
        if zoom > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(zoom));
        }

        let n = 2.0_f64.powi(zoom as i32);
        let max_index = (1u32 << zoom) - 1;

        let x = (((lon + 180.0) / 360.0 * n) as u32).min(max_index);

        let lat_rad = lat * PI / 180.0;
        let y_raw = (1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n;
        let y = (y_raw.max(0.0) as u32).min(max_index);

        Ok(Self { zoom, x, y })
    }

    /// Returns the zoom level.
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// Returns the tile column.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Returns the tile row.
    pub fn y(&self) -> u32 {
        self.y
    }

    /// Packs the key into the numeric index used by SQLite tile archives.
    ///
    /// The layout is `(((zoom << zoom) + x) << zoom) + y`. Existing archive
    /// files were produced with exactly this formula, so it must not change.
    pub fn pack(&self) -> i64 {
        let z = self.zoom as i64;
        (((z << self.zoom) + self.x as i64) << self.zoom) + self.y as i64
    }

    /// Recovers a tile key from a packed archive index.
    ///
    /// The packed ranges for consecutive zoom levels are disjoint
    /// (`[z * 4^z, (z + 1) * 4^z)`), so the zoom can be recovered by
    /// scanning the levels.
    pub fn unpack(index: i64) -> Result<Self, CoordError> {
        if index < 0 {
            return Err(CoordError::InvalidIndex(index));
        }
        for zoom in 0..=MAX_ZOOM {
            let z = zoom as i64;
            let cell = 1i64 << (2 * zoom);
            let low = z * cell;
            let high = (z + 1) * cell;
            if index >= low && index < high {
                let rest = index - low;
                let x = (rest >> zoom) as u32;
                let y = (rest & ((1i64 << zoom) - 1)) as u32;
                return Self::new(zoom, x, y).map_err(|_| CoordError::InvalidIndex(index));
            }
        }
        Err(CoordError::InvalidIndex(index))
    }

    /// Derives the quadkey string for this tile.
    ///
    /// Digit `i` (counting from the most significant) combines bit `zoom - i`
    /// of `x` and `y`: `digit = x_bit + 2 * y_bit`. The root tile at zoom 0
    /// has the empty quadkey.
    pub fn quadkey(&self) -> String {
        let mut key = String::with_capacity(self.zoom as usize);
        for level in (1..=self.zoom).rev() {
            let mask = 1u32 << (level - 1);
            let mut digit = b'0';
            if self.x & mask != 0 {
                digit += 1;
            }
            if self.y & mask != 0 {
                digit += 2;
            }
            key.push(digit as char);
        }
        key
    }

    /// Returns the latitude/longitude of this tile's northwest corner.
    pub fn northwest(&self) -> (f64, f64) {
        let n = 2.0_f64.powi(self.zoom as i32);
        let lon = self.x as f64 / n * 360.0 - 180.0;
        let lat_rad = (PI * (1.0 - 2.0 * self.y as f64 / n)).sinh().atan();
        (lat_rad * 180.0 / PI, lon)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}
