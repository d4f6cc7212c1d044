//! Geographic bounding boxes and bulk tile enumeration.
//!
//! A [`BoundingBox`] selects a rectangular region by its edge coordinates;
//! [`TileRange`] is its projection onto one zoom level's tile grid, and
//! [`TileAreaIterator`] walks every tile of a zoom span in row-major order.
//! These drive the bulk download/clean operations and progress sizing.

use super::{CoordError, TileKey, MAX_LAT, MAX_LON, MIN_LAT, MIN_LON, MAX_ZOOM};

/// A geographic bounding box in degrees.
///
/// `north > south` is required; boxes crossing the antimeridian are not
/// supported (split them into two boxes instead).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    north: f64,
    south: f64,
    east: f64,
    west: f64,
}

impl BoundingBox {
    /// Creates a bounding box, validating edge ordering and ranges.
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Result<Self, CoordError> {
        for lat in [north, south] {
            if !(MIN_LAT..=MAX_LAT).contains(&lat) {
                return Err(CoordError::InvalidLatitude(lat));
            }
        }
        for lon in [east, west] {
            if !(MIN_LON..=MAX_LON).contains(&lon) {
                return Err(CoordError::InvalidLongitude(lon));
            }
        }
        if south > north {
            return Err(CoordError::InvalidLatitude(south));
        }
        if west > east {
            return Err(CoordError::InvalidLongitude(west));
        }
        Ok(Self {
            north,
            south,
            east,
            west,
        })
    }

    /// Northern edge latitude.
    pub fn north(&self) -> f64 {
        self.north
    }

    /// Southern edge latitude.
    pub fn south(&self) -> f64 {
        self.south
    }

    /// Eastern edge longitude.
    pub fn east(&self) -> f64 {
        self.east
    }

    /// Western edge longitude.
    pub fn west(&self) -> f64 {
        self.west
    }

    /// Projects the box onto the tile grid at `zoom`.
    ///
    /// The northwest corner yields the minimum x/y and the southeast corner
    /// the maximum, because tile rows grow southward.
    pub fn tile_range(&self, zoom: u8) -> Result<TileRange, CoordError> {
        let nw = TileKey::from_lat_lon(self.north, self.west, zoom)?;
        let se = TileKey::from_lat_lon(self.south, self.east, zoom)?;
        Ok(TileRange {
            zoom,
            x_min: nw.x(),
            x_max: se.x(),
            y_min: nw.y(),
            y_max: se.y(),
        })
    }
}

/// The tiles of one zoom level intersecting a bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    /// Zoom level of this range.
    pub zoom: u8,
    /// Minimum (westmost) tile column.
    pub x_min: u32,
    /// Maximum (eastmost) tile column.
    pub x_max: u32,
    /// Minimum (northmost) tile row.
    pub y_min: u32,
    /// Maximum (southmost) tile row.
    pub y_max: u32,
}

impl TileRange {
    /// Number of tiles in the range.
    pub fn count(&self) -> u64 {
        (self.x_max - self.x_min + 1) as u64 * (self.y_max - self.y_min + 1) as u64
    }
}

/// Total number of tiles a bulk operation over `bbox` would touch.
///
/// Pure sizing function: the sum over each zoom in `[zoom_min, zoom_max]`
/// of the tile count of the box's range at that zoom.
pub fn possible_tiles_in_area(
    bbox: &BoundingBox,
    zoom_min: u8,
    zoom_max: u8,
) -> Result<u64, CoordError> {
    if zoom_max > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom_max));
    }
    let mut total = 0u64;
    for zoom in zoom_min..=zoom_max {
        total += bbox.tile_range(zoom)?.count();
    }
    Ok(total)
}

/// Iterator over every tile of a bounding box across a zoom span.
///
/// Yields tiles zoom by zoom, each level in row-major order (north to
/// south, west to east within a row).
pub struct TileAreaIterator {
    bbox: BoundingBox,
    zoom_max: u8,
    current: Option<RangeCursor>,
}

struct RangeCursor {
    range: TileRange,
    x: u32,
    y: u32,
}

impl TileAreaIterator {
    /// Creates an iterator over `[zoom_min, zoom_max]`.
    pub fn new(bbox: BoundingBox, zoom_min: u8, zoom_max: u8) -> Result<Self, CoordError> {
        if zoom_max > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(zoom_max));
        }
        if zoom_min > zoom_max {
            return Err(CoordError::InvalidZoom(zoom_min));
        }
        let range = bbox.tile_range(zoom_min)?;
        Ok(Self {
            bbox,
            zoom_max,
            current: Some(RangeCursor {
                range,
                x: range.x_min,
                y: range.y_min,
            }),
        })
    }
}

impl Iterator for TileAreaIterator {
    type Item = TileKey;

    fn next(&mut self) -> Option<TileKey> {
        let (key, exhausted_zoom) = {
            let cursor = self.current.as_mut()?;
            let range = cursor.range;

            // Tiles inside the range are valid by construction.
            let key = TileKey::new(range.zoom, cursor.x, cursor.y).ok()?;

            if cursor.x < range.x_max {
                cursor.x += 1;
                (key, None)
            } else if cursor.y < range.y_max {
                cursor.x = range.x_min;
                cursor.y += 1;
                (key, None)
            } else {
                (key, Some(range.zoom))
            }
        };

        if let Some(zoom) = exhausted_zoom {
            self.current = if zoom < self.zoom_max {
                self.bbox.tile_range(zoom + 1).ok().map(|next| RangeCursor {
                    range: next,
                    x: next.x_min,
                    y: next.y_min,
                })
            } else {
                None
            };
        }

        Some(key)
    }
}
