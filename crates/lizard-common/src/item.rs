//! Scenario and raster metadata, and the per-run download item.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bbox::Extent;
use crate::error::{LizardError, LizardResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Organisation {
    #[serde(default)]
    pub name: String,
}

/// Grid geometry fields shared by scenarios and rasters.
///
/// The service returns `null` for datasets without a grid, so every field
/// is optional and checked on use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    #[serde(default)]
    pub origin_x: Option<f64>,
    #[serde(default)]
    pub origin_y: Option<f64>,
    #[serde(default)]
    pub upper_bound_x: Option<f64>,
    #[serde(default)]
    pub upper_bound_y: Option<f64>,
    #[serde(default)]
    pub pixelsize_x: Option<f64>,
    #[serde(default)]
    pub pixelsize_y: Option<f64>,
}

impl GridGeometry {
    pub fn extent(&self) -> LizardResult<Extent> {
        match (
            self.origin_x,
            self.origin_y,
            self.upper_bound_x,
            self.upper_bound_y,
        ) {
            (Some(x1), Some(y1), Some(x2), Some(y2)) => Ok(Extent::new(x1, y1, x2, y2)),
            _ => Err(LizardError::invalid_parameter(
                "extent",
                "dataset has no spatial bounds",
            )),
        }
    }

    /// Absolute pixel sizes.
    pub fn pixel_size(&self) -> LizardResult<(f64, f64)> {
        match (self.pixelsize_x, self.pixelsize_y) {
            (Some(x), Some(y)) => Ok((x.abs(), y.abs())),
            _ => Err(LizardError::invalid_parameter(
                "pixel_size",
                "dataset has no pixel size",
            )),
        }
    }
}

/// A simulation result set on the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub uuid: String,
    pub name: String,
    #[serde(flatten)]
    pub grid: GridGeometry,
    #[serde(default)]
    pub projection: Option<String>,
    #[serde(default)]
    pub model_identifier: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub organisation: Organisation,
    #[serde(default)]
    pub supplier: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

/// A geospatial grid dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raster {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub grid: GridGeometry,
    #[serde(default)]
    pub projection: Option<String>,
    #[serde(default)]
    pub temporal: bool,
    #[serde(default)]
    pub organisation: Organisation,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

/// One item of a scenario: a raw attachment or a raster layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub attachment_url: Option<String>,
    /// URL of the raster resource for raster results.
    #[serde(default)]
    pub raster: Option<String>,
    /// Local file name, assigned once the result is listed.
    #[serde(default)]
    pub filename: String,
    /// Set when the referenced raster is temporal, assigned once the result
    /// is listed.
    #[serde(default)]
    pub temporal: bool,
}

impl ScenarioResult {
    pub fn is_raster(&self) -> bool {
        self.raster.is_some()
    }

    /// File name the result is stored under locally.
    ///
    /// `temporal` is only consulted for raster results.
    pub fn local_filename(&self, temporal: bool) -> String {
        if self.is_raster() {
            let lowered = self.name.to_lowercase();
            let base = if temporal {
                lowered.replace("(timeseries)", "").trim().to_string()
            } else {
                lowered
            };
            format!("{}.tif", base.replace(' ', "_"))
        } else {
            self.attachment_url
                .as_deref()
                .and_then(|url| url.rsplit('/').next())
                .unwrap_or_default()
                .to_string()
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_temporal(mut self, temporal: bool) -> Self {
        self.temporal = temporal;
        self
    }

    /// Temporal raster results have no single grid to export over the
    /// scenario extent.
    pub fn is_downloadable(&self) -> bool {
        !(self.is_raster() && self.temporal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Scenario,
    Raster,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::Scenario => f.write_str("scenario"),
            ItemKind::Raster => f.write_str("raster"),
        }
    }
}

/// Identity of the item a worker run belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub kind: ItemKind,
    pub uuid: String,
    pub name: String,
}

impl ItemRef {
    pub fn scenario(scenario: &Scenario) -> Self {
        Self {
            kind: ItemKind::Scenario,
            uuid: scenario.uuid.clone(),
            name: scenario.name.clone(),
        }
    }

    pub fn raster(raster: &Raster, name: impl Into<String>) -> Self {
        Self {
            kind: ItemKind::Raster,
            uuid: raster.uuid.clone(),
            name: name.into(),
        }
    }
}

/// Download target of one worker run and the files it produced so far.
#[derive(Debug, Clone)]
pub struct DownloadItem {
    pub item: ItemRef,
    pub download_dir: PathBuf,
    files: BTreeMap<String, PathBuf>,
}

impl DownloadItem {
    /// The item downloads into `<download_root>/<item name>`.
    pub fn new(item: ItemRef, download_root: &Path) -> Self {
        let download_dir = download_root.join(&item.name);
        Self {
            item,
            download_dir,
            files: BTreeMap::new(),
        }
    }

    pub fn target_path(&self, filename: &str) -> PathBuf {
        self.download_dir.join(filename)
    }

    pub fn record(&mut self, filename: impl Into<String>, path: PathBuf) {
        self.files.insert(filename.into(), path);
    }

    pub fn files_mut(&mut self) -> &mut BTreeMap<String, PathBuf> {
        &mut self.files
    }

    pub fn into_files(self) -> BTreeMap<String, PathBuf> {
        self.files
    }
}
