//! Clipping of downloaded rasters to their request polygon.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use lizard_common::{LizardError, LizardResult};

/// Polygon written to a vector file that GDAL can read as a cutline.
///
/// The file is a one-row CSV with a `WKT` geometry column. It is removed
/// when the cutline is dropped.
#[derive(Debug)]
pub struct Cutline {
    path: PathBuf,
    layer: String,
}

impl Cutline {
    /// Write `wkt` to a uniquely named file in `dir`.
    pub async fn write_in(dir: &Path, wkt: &str) -> LizardResult<Self> {
        let layer = format!("clip_polygon_{}", uuid::Uuid::new_v4().simple());
        let path = dir.join(format!("{}.csv", layer));
        let body = format!("id,WKT\n1,\"{}\"\n", wkt.replace('"', ""));
        fs::write(&path, body).await?;
        debug!(path = %path.display(), "Wrote clip polygon");
        Ok(Self { path, layer })
    }

    /// Write `wkt` to the system temp directory.
    pub async fn write(wkt: &str) -> LizardResult<Self> {
        Self::write_in(&std::env::temp_dir(), wkt).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Layer name GDAL assigns to the file.
    pub fn layer(&self) -> &str {
        &self.layer
    }
}

impl Drop for Cutline {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove clip polygon");
        }
    }
}

/// `clip_<name>` next to `raster`.
pub fn clip_output_path(raster: &Path) -> PathBuf {
    let name = raster
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    raster.with_file_name(format!("clip_{}", name))
}

/// Crops a raster in place to a cutline.
#[async_trait]
pub trait RasterClipper: Send + Sync {
    async fn clip(&self, raster: &Path, cutline: &Cutline, nodata: Option<f64>) -> LizardResult<()>;
}

/// Clips with the `gdalwarp` command line tool.
#[derive(Debug, Clone)]
pub struct GdalWarpClipper {
    program: PathBuf,
}

impl GdalWarpClipper {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn arguments(&self, source: &Path, target: &Path, cutline: &Cutline, nodata: Option<f64>) -> Vec<String> {
        let mut args = vec![
            "-overwrite".to_string(),
            "-cutline".to_string(),
            cutline.path().to_string_lossy().into_owned(),
            "-cl".to_string(),
            cutline.layer().to_string(),
            "-crop_to_cutline".to_string(),
            "-multi".to_string(),
            "-wo".to_string(),
            "NUM_THREADS=ALL_CPUS".to_string(),
        ];
        if let Some(nodata) = nodata {
            args.push("-dstnodata".to_string());
            args.push(nodata.to_string());
        }
        args.push(source.to_string_lossy().into_owned());
        args.push(target.to_string_lossy().into_owned());
        args
    }
}

impl Default for GdalWarpClipper {
    fn default() -> Self {
        Self::new("gdalwarp")
    }
}

#[async_trait]
impl RasterClipper for GdalWarpClipper {
    #[instrument(skip(self, cutline), fields(raster = %raster.display()))]
    async fn clip(&self, raster: &Path, cutline: &Cutline, nodata: Option<f64>) -> LizardResult<()> {
        let target = clip_output_path(raster);
        let output = Command::new(&self.program)
            .args(self.arguments(raster, &target, cutline, nodata))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| LizardError::Clip(format!("failed to run {}: {}", self.program.display(), e)))?;

        if !output.status.success() {
            fs::remove_file(&target).await.ok();
            return Err(LizardError::Clip(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        fs::remove_file(raster).await?;
        fs::rename(&target, raster).await?;
        debug!("Raster clipped");
        Ok(())
    }
}
