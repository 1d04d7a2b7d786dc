//! Virtual mosaics (GDAL VRT) over downloaded raster tiles.
//!
//! Tiles come from exports of one raster at one resolution, so the mosaic
//! is a plain GDAL VRT with one `ComplexSource` per tile and band. Tile
//! georeferencing is read from the GeoTIFF tags; pixel data is untouched.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tiff::decoder::Decoder;
use tiff::tags::Tag;
use tracing::{debug, info, instrument};

use lizard_common::{Extent, LizardError, LizardResult};

const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
const MODEL_TIEPOINT_TAG: u16 = 33922;
const GEO_KEY_DIRECTORY_TAG: u16 = 34735;
const GDAL_NODATA_TAG: u16 = 42113;

const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

/// Settings applied to every source of a mosaic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MosaicOptions {
    /// Overrides the nodata value stored in the tiles.
    pub src_nodata: Option<f64>,
    /// Spatial reference used when the tiles carry no EPSG code.
    pub srs: Option<String>,
}

/// Georeferencing and layout of one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileHeader {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub pixel_size_x: f64,
    pub pixel_size_y: f64,
    /// West edge.
    pub origin_x: f64,
    /// North edge.
    pub origin_y: f64,
    pub bands: u32,
    /// GDAL data type name.
    pub data_type: &'static str,
    pub nodata: Option<f64>,
    pub epsg: Option<u16>,
}

impl TileHeader {
    pub fn extent(&self) -> Extent {
        Extent::new(
            self.origin_x,
            self.origin_y - self.height as f64 * self.pixel_size_y,
            self.origin_x + self.width as f64 * self.pixel_size_x,
            self.origin_y,
        )
    }
}

fn tiff_error(path: &Path, e: tiff::TiffError) -> LizardError {
    LizardError::Mosaic(format!("{}: {}", path.display(), e))
}

fn xml_error(e: quick_xml::Error) -> LizardError {
    LizardError::Mosaic(format!("writing VRT failed: {}", e))
}

fn gdal_data_type(sample_format: u32, bits: u32) -> Option<&'static str> {
    match (sample_format, bits) {
        (1, 8) => Some("Byte"),
        (1, 16) => Some("UInt16"),
        (1, 32) => Some("UInt32"),
        (2, 8) => Some("Int8"),
        (2, 16) => Some("Int16"),
        (2, 32) => Some("Int32"),
        (3, 32) => Some("Float32"),
        (3, 64) => Some("Float64"),
        _ => None,
    }
}

/// EPSG code from a GeoKeyDirectory, projected CRS first.
fn epsg_from_geo_keys(directory: &[u32]) -> Option<u16> {
    let entries = directory.get(4..)?;
    let mut geographic = None;
    for entry in entries.chunks_exact(4) {
        let (key, location, value) = (entry[0] as u16, entry[1], entry[3]);
        if location != 0 || value == 0 || value > u16::MAX as u32 {
            continue;
        }
        match key {
            PROJECTED_CS_TYPE_GEO_KEY => return Some(value as u16),
            GEOGRAPHIC_TYPE_GEO_KEY => geographic = Some(value as u16),
            _ => {}
        }
    }
    geographic
}

/// Read the header of a GeoTIFF tile.
pub fn read_tile_header(path: &Path) -> LizardResult<TileHeader> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file)).map_err(|e| tiff_error(path, e))?;
    let (width, height) = decoder.dimensions().map_err(|e| tiff_error(path, e))?;

    let scale = decoder
        .get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE_TAG))
        .map_err(|e| tiff_error(path, e))?;
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TIEPOINT_TAG))
        .map_err(|e| tiff_error(path, e))?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(LizardError::Mosaic(format!(
            "{}: incomplete GeoTIFF georeferencing",
            path.display()
        )));
    }
    let (pixel_size_x, pixel_size_y) = (scale[0].abs(), scale[1].abs());
    // The tiepoint maps raster (i, j) to model (x, y).
    let origin_x = tiepoint[3] - tiepoint[0] * pixel_size_x;
    let origin_y = tiepoint[4] + tiepoint[1] * pixel_size_y;

    let bits = decoder
        .get_tag_u32_vec(Tag::BitsPerSample)
        .ok()
        .and_then(|bits| bits.first().copied())
        .unwrap_or(8);
    let sample_format = decoder
        .get_tag_u32_vec(Tag::SampleFormat)
        .ok()
        .and_then(|formats| formats.first().copied())
        .unwrap_or(1);
    let data_type = gdal_data_type(sample_format, bits).ok_or_else(|| {
        LizardError::Mosaic(format!(
            "{}: unsupported sample format {} with {} bits",
            path.display(),
            sample_format,
            bits
        ))
    })?;
    let bands = decoder.get_tag_u32(Tag::SamplesPerPixel).unwrap_or(1);

    let nodata = decoder
        .get_tag_ascii_string(Tag::from_u16_exhaustive(GDAL_NODATA_TAG))
        .ok()
        .and_then(|s| s.trim_end_matches('\0').trim().parse().ok());
    let epsg = decoder
        .get_tag_u32_vec(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY_TAG))
        .ok()
        .and_then(|directory| epsg_from_geo_keys(&directory));

    Ok(TileHeader {
        path: path.to_path_buf(),
        width,
        height,
        pixel_size_x,
        pixel_size_y,
        origin_x,
        origin_y,
        bands,
        data_type,
        nodata,
        epsg,
    })
}

/// Path of the mosaic over a tile group, derived from its first tile:
/// `dem_01.tif` becomes `dem.vrt`.
pub fn mosaic_path_for(first_tile: &Path) -> PathBuf {
    let stem = first_tile
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = stem.strip_suffix("_01").unwrap_or(&stem);
    first_tile.with_file_name(format!("{}.vrt", stem))
}

type XmlWriter = Writer<Vec<u8>>;

fn start(writer: &mut XmlWriter, name: &str, attributes: &[(&str, &str)]) -> LizardResult<()> {
    let element = BytesStart::new(name).with_attributes(attributes.iter().copied());
    writer.write_event(Event::Start(element)).map_err(xml_error)
}

fn end(writer: &mut XmlWriter, name: &str) -> LizardResult<()> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_error)
}

fn empty(writer: &mut XmlWriter, name: &str, attributes: &[(&str, &str)]) -> LizardResult<()> {
    let element = BytesStart::new(name).with_attributes(attributes.iter().copied());
    writer.write_event(Event::Empty(element)).map_err(xml_error)
}

fn text_element(
    writer: &mut XmlWriter,
    name: &str,
    attributes: &[(&str, &str)],
    text: &str,
) -> LizardResult<()> {
    start(writer, name, attributes)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_error)?;
    end(writer, name)
}

/// Source file reference, relative when the tile sits next to the VRT.
fn source_filename(vrt_path: &Path, tile_path: &Path) -> (String, &'static str) {
    match (vrt_path.parent(), tile_path.parent(), tile_path.file_name()) {
        (Some(vrt_dir), Some(tile_dir), Some(name)) if vrt_dir == tile_dir => {
            (name.to_string_lossy().into_owned(), "1")
        }
        _ => (tile_path.to_string_lossy().into_owned(), "0"),
    }
}

/// Render the VRT document for `tiles`.
///
/// The mosaic covers the union of the tile extents at the average tile
/// resolution. Each tile is placed with nearest neighbour resampling.
pub fn render_vrt(vrt_path: &Path, tiles: &[TileHeader], options: &MosaicOptions) -> LizardResult<String> {
    let first = tiles
        .first()
        .ok_or_else(|| LizardError::Mosaic("no tiles to build a mosaic from".to_string()))?;
    for tile in tiles {
        if tile.bands != first.bands || tile.data_type != first.data_type {
            return Err(LizardError::Mosaic(format!(
                "{} does not match the band layout of {}",
                tile.path.display(),
                first.path.display()
            )));
        }
    }

    let extent = tiles
        .iter()
        .skip(1)
        .fold(first.extent(), |acc, tile| acc.union(&tile.extent()));
    let count = tiles.len() as f64;
    let res_x = tiles.iter().map(|t| t.pixel_size_x).sum::<f64>() / count;
    let res_y = tiles.iter().map(|t| t.pixel_size_y).sum::<f64>() / count;
    let raster_x_size = (extent.width() / res_x).round() as u64;
    let raster_y_size = (extent.height() / res_y).round() as u64;

    let srs = first
        .epsg
        .map(|code| format!("EPSG:{}", code))
        .or_else(|| options.srs.clone());
    let nodata = options.src_nodata.or(first.nodata);

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    start(
        &mut writer,
        "VRTDataset",
        &[
            ("rasterXSize", raster_x_size.to_string().as_str()),
            ("rasterYSize", raster_y_size.to_string().as_str()),
        ],
    )?;
    if let Some(srs) = &srs {
        text_element(&mut writer, "SRS", &[], srs)?;
    }
    let geo_transform = format!(
        "{}, {}, 0, {}, 0, {}",
        extent.x1, res_x, extent.y2, -res_y
    );
    text_element(&mut writer, "GeoTransform", &[], &geo_transform)?;

    for band in 1..=first.bands {
        let band = band.to_string();
        start(
            &mut writer,
            "VRTRasterBand",
            &[("dataType", first.data_type), ("band", band.as_str())],
        )?;
        if let Some(nodata) = nodata {
            text_element(&mut writer, "NoDataValue", &[], &nodata.to_string())?;
        }

        for tile in tiles {
            let tile_extent = tile.extent();
            let src_width = tile.width.to_string();
            let src_height = tile.height.to_string();
            let dst_x = ((tile_extent.x1 - extent.x1) / res_x).to_string();
            let dst_y = ((extent.y2 - tile_extent.y2) / res_y).to_string();
            let dst_width = (tile_extent.width() / res_x).to_string();
            let dst_height = (tile_extent.height() / res_y).to_string();
            let (source, relative) = source_filename(vrt_path, &tile.path);

            start(&mut writer, "ComplexSource", &[("resampling", "nearest")])?;
            text_element(
                &mut writer,
                "SourceFilename",
                &[("relativeToVRT", relative)],
                &source,
            )?;
            text_element(&mut writer, "SourceBand", &[], &band)?;
            empty(
                &mut writer,
                "SourceProperties",
                &[
                    ("RasterXSize", src_width.as_str()),
                    ("RasterYSize", src_height.as_str()),
                    ("DataType", tile.data_type),
                ],
            )?;
            empty(
                &mut writer,
                "SrcRect",
                &[
                    ("xOff", "0"),
                    ("yOff", "0"),
                    ("xSize", src_width.as_str()),
                    ("ySize", src_height.as_str()),
                ],
            )?;
            empty(
                &mut writer,
                "DstRect",
                &[
                    ("xOff", dst_x.as_str()),
                    ("yOff", dst_y.as_str()),
                    ("xSize", dst_width.as_str()),
                    ("ySize", dst_height.as_str()),
                ],
            )?;
            if let Some(nodata) = nodata {
                text_element(&mut writer, "NODATA", &[], &nodata.to_string())?;
            }
            end(&mut writer, "ComplexSource")?;
        }

        end(&mut writer, "VRTRasterBand")?;
    }
    end(&mut writer, "VRTDataset")?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| LizardError::Mosaic(format!("VRT is not valid UTF-8: {}", e)))
}

/// Write a VRT over `tile_paths` to `vrt_path`.
#[instrument(skip(tile_paths, options), fields(vrt = %vrt_path.display(), tiles = tile_paths.len()))]
pub fn build_vrt(vrt_path: &Path, tile_paths: &[PathBuf], options: &MosaicOptions) -> LizardResult<()> {
    let headers = tile_paths
        .iter()
        .map(|path| read_tile_header(path))
        .collect::<LizardResult<Vec<_>>>()?;
    let document = render_vrt(vrt_path, &headers, options)?;
    std::fs::write(vrt_path, document)?;
    debug!("VRT written");
    Ok(())
}

/// Replace a tile group in `files` with a mosaic over it.
///
/// Tiles are ordered by file name. The mosaic entry is keyed by its file
/// name and the tile entries are removed; the tile files stay on disk
/// since the mosaic references them.
pub fn apply_mosaic(
    files: &mut BTreeMap<String, PathBuf>,
    tile_paths: &[PathBuf],
    options: &MosaicOptions,
) -> LizardResult<PathBuf> {
    let mut tiles = tile_paths.to_vec();
    tiles.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    let first = tiles
        .first()
        .ok_or_else(|| LizardError::Mosaic("no tiles to build a mosaic from".to_string()))?;

    let vrt_path = mosaic_path_for(first);
    build_vrt(&vrt_path, &tiles, options)?;

    for tile in &tiles {
        if let Some(name) = tile.file_name() {
            files.remove(name.to_string_lossy().as_ref());
        }
    }
    let vrt_name = vrt_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    files.insert(vrt_name, vrt_path.clone());

    info!(vrt = %vrt_path.display(), tiles = tiles.len(), "Built mosaic");
    Ok(vrt_path)
}
