//! Test data generators for synthetic raster tiles.
//!
//! Downloaded tiles are single-band Float32 GeoTIFFs. The generators write
//! files carrying the same georeferencing tags the remote service emits, so
//! headers can be read back by the mosaic builder.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

/// GeoTIFF ModelPixelScaleTag
pub const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
/// GeoTIFF ModelTiepointTag
pub const MODEL_TIEPOINT_TAG: u16 = 33922;
/// GeoTIFF GeoKeyDirectoryTag
pub const GEO_KEY_DIRECTORY_TAG: u16 = 34735;
/// GDAL_NODATA
pub const GDAL_NODATA_TAG: u16 = 42113;

/// Geometry and fill of a generated tile.
#[derive(Debug, Clone, Copy)]
pub struct GeoTiffSpec {
    /// West edge.
    pub x1: f64,
    /// North edge.
    pub y2: f64,
    pub pixel_size_x: f64,
    pub pixel_size_y: f64,
    pub width: u32,
    pub height: u32,
    pub fill: f32,
    pub nodata: Option<f64>,
    /// Projected CRS code written to the GeoKey directory.
    pub epsg: Option<u16>,
}

impl GeoTiffSpec {
    /// Tile covering `(x1, y1, x2, y2)` at the given absolute pixel size.
    pub fn covering(extent: (f64, f64, f64, f64), pixel_size: f64) -> Self {
        let (x1, y1, x2, y2) = extent;
        Self {
            x1,
            y2,
            pixel_size_x: pixel_size,
            pixel_size_y: pixel_size,
            width: ((x2 - x1) / pixel_size).round() as u32,
            height: ((y2 - y1) / pixel_size).round() as u32,
            fill: 1.0,
            nodata: Some(-9999.0),
            epsg: Some(28992),
        }
    }
}

/// Write a Float32 GeoTIFF described by `spec`.
pub fn write_geotiff(path: &Path, spec: &GeoTiffSpec) -> Result<(), tiff::TiffError> {
    let file = File::create(path)?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
    let mut image = encoder.new_image::<colortype::Gray32Float>(spec.width, spec.height)?;

    let scale = [spec.pixel_size_x, spec.pixel_size_y, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, spec.x1, spec.y2, 0.0];
    image
        .encoder()
        .write_tag(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE_TAG), &scale[..])?;
    image
        .encoder()
        .write_tag(Tag::from_u16_exhaustive(MODEL_TIEPOINT_TAG), &tiepoint[..])?;
    if let Some(epsg) = spec.epsg {
        // Header, then ProjectedCSTypeGeoKey stored inline.
        let directory = [1u16, 1, 0, 1, 3072, 0, 1, epsg];
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY_TAG), &directory[..])?;
    }
    if let Some(nodata) = spec.nodata {
        let nodata = nodata.to_string();
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(GDAL_NODATA_TAG), nodata.as_str())?;
    }

    let data = vec![spec.fill; spec.width as usize * spec.height as usize];
    image.write_data(&data)?;
    Ok(())
}

/// Scratch directory removed when dropped.
pub fn scratch_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("lizard-test-")
        .tempdir()
        .expect("failed to create scratch dir")
}
