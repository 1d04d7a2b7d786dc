//! Partitioning of raster requests into tiles within a pixel budget.
//!
//! The remote service rejects exports above a maximum pixel count and
//! requests that do not align to whole pixels. [`compute_tiles`] grows an
//! extent to whole pixels and, when it is still too large, splits it into a
//! grid of square tiles of `floor(sqrt(max_pixel_count))` pixels per side.

use serde::{Deserialize, Serialize};

use crate::bbox::Extent;
use crate::error::{LizardError, LizardResult};
use crate::item::{Raster, Scenario};

/// Default per-request pixel budget of the remote service.
pub const DEFAULT_MAX_PIXEL_COUNT: u64 = 100_000_000;

/// Tiles covering one requested extent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    /// Tile extents, column-major (all rows of column 0 first).
    pub tiles: Vec<Extent>,
    /// Width of every tile in pixels.
    pub tile_width: u64,
    /// Height of every tile in pixels.
    pub tile_height: u64,
}

impl TileGrid {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn is_chunked(&self) -> bool {
        self.tiles.len() > 1
    }

    pub fn pixels_per_tile(&self) -> u64 {
        self.tile_width * self.tile_height
    }
}

/// Split `extent` into tiles of at most `max_pixel_count` pixels.
///
/// Pixel sizes are used as absolute values. Tiles on the far edges may
/// extend past the requested extent.
pub fn compute_tiles(
    extent: &Extent,
    pixel_size_x: f64,
    pixel_size_y: f64,
    max_pixel_count: u64,
) -> LizardResult<TileGrid> {
    if max_pixel_count == 0 {
        return Err(LizardError::invalid_parameter(
            "max_pixel_count",
            "must be greater than zero",
        ));
    }

    let pixel_size_x = pixel_size_x.abs();
    let pixel_size_y = pixel_size_y.abs();
    if !(pixel_size_x.is_finite() && pixel_size_x > 0.0) {
        return Err(LizardError::invalid_parameter(
            "pixel_size_x",
            format!("must be non-zero, got {}", pixel_size_x),
        ));
    }
    if !(pixel_size_y.is_finite() && pixel_size_y > 0.0) {
        return Err(LizardError::invalid_parameter(
            "pixel_size_y",
            format!("must be non-zero, got {}", pixel_size_y),
        ));
    }

    let Extent { x1, y1, mut x2, mut y2 } = *extent;

    let mut width = ((x2 - x1) / pixel_size_x).abs();
    let mut height = ((y2 - y1) / pixel_size_y).abs();

    if width.fract() != 0.0 {
        width = width.ceil();
        x2 = width * pixel_size_x + x1;
    }
    if height.fract() != 0.0 {
        height = height.ceil();
        y2 = height * pixel_size_y + y1;
    }

    if width * height <= max_pixel_count as f64 {
        return Ok(TileGrid {
            tiles: vec![Extent::new(x1, y1, x2, y2)],
            tile_width: width as u64,
            tile_height: height as u64,
        });
    }

    let max_pixel_per_axis = (max_pixel_count as f64).sqrt().floor() as u64;
    let columns = (width / max_pixel_per_axis as f64).ceil() as u64;
    let rows = (height / max_pixel_per_axis as f64).ceil() as u64;
    let sub_width = max_pixel_per_axis as f64 * pixel_size_x;
    let sub_height = max_pixel_per_axis as f64 * pixel_size_y;

    let mut tiles = Vec::with_capacity((columns * rows) as usize);
    for column in 0..columns {
        let sub_x1 = x1 + column as f64 * sub_width;
        let sub_x2 = sub_x1 + sub_width;
        for row in 0..rows {
            let sub_y1 = y1 + row as f64 * sub_height;
            let sub_y2 = sub_y1 + sub_height;
            tiles.push(Extent::new(sub_x1, sub_y1, sub_x2, sub_y2));
        }
    }

    Ok(TileGrid {
        tiles,
        tile_width: max_pixel_per_axis,
        tile_height: max_pixel_per_axis,
    })
}

/// Tile a scenario's full extent at its native pixel size.
pub fn compute_scenario_tiles(scenario: &Scenario, max_pixel_count: u64) -> LizardResult<TileGrid> {
    let extent = scenario.grid.extent()?;
    let (pixel_size_x, pixel_size_y) = scenario.grid.pixel_size()?;
    compute_tiles(&extent, pixel_size_x, pixel_size_y, max_pixel_count)
}

/// Tile `bbox` clamped to the raster's bounds.
///
/// `resolution`, when given, replaces the raster's native pixel size on
/// both axes.
pub fn compute_raster_tiles(
    raster: &Raster,
    bbox: &Extent,
    resolution: Option<f64>,
    max_pixel_count: u64,
) -> LizardResult<TileGrid> {
    let clamped = bbox.clamp_to(&raster.grid.extent()?);
    let (pixel_size_x, pixel_size_y) = match resolution {
        Some(resolution) => (resolution.abs(), resolution.abs()),
        None => raster.grid.pixel_size()?,
    };
    compute_tiles(&clamped, pixel_size_x, pixel_size_y, max_pixel_count)
}
