//! Download workers.
//!
//! A worker run downloads one scenario or one raster into its own
//! directory. Oversized raster requests are tiled, submitted as remote
//! tasks, polled until done, downloaded and recombined into a mosaic.
//! Runs report through [`crate::events::DownloadEvent`] only; errors never
//! leave `run()`.

pub mod progress;
mod raster;
mod scenario;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use metrics::counter;
use tracing::{error, info};

use lizard_common::{LizardError, LizardResult, Raster, TileGrid, DEFAULT_MAX_PIXEL_COUNT};

use crate::client::{RasterExtraction, RemoteTaskClient};
use crate::config::DownloaderConfig;
use crate::poller::DEFAULT_POLL_INTERVAL;

pub use progress::{ProgressReporter, TOTAL_PROGRESS};
pub use raster::{RasterDownloadRequest, RasterDownloader};
pub use scenario::{select_results, ScenarioDownloadRequest, ScenarioItemsDownloader};

/// Tuning shared by all runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadSettings {
    pub poll_interval: Duration,
    pub max_pixel_count: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_pixel_count: DEFAULT_MAX_PIXEL_COUNT,
        }
    }
}

impl From<&DownloaderConfig> for DownloadSettings {
    fn from(config: &DownloaderConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_pixel_count: config.max_pixel_count,
        }
    }
}

/// Split `name.ext` at its last dot. A name without a dot has an empty
/// extension.
fn split_extension(filename: &str) -> (&str, &str) {
    filename.rsplit_once('.').unwrap_or((filename, ""))
}

/// File name of tile `index` (1-based) of a result.
///
/// Only chunked results get the `_NN` suffix.
fn tile_filename(stem: &str, extension: &str, index: usize, chunked: bool) -> String {
    let stem = if chunked {
        format!("{}_{:02}", stem, index)
    } else {
        stem.to_string()
    };
    if extension.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, extension)
    }
}

/// Export options shared by every tile of a run.
#[derive(Debug, Clone, Default)]
struct ExportOptions {
    projection: Option<String>,
    nodata: Option<f64>,
    start_time: Option<String>,
}

/// Submit one export per tile of `grid`, returning task ids in tile order.
async fn submit_tiles(
    client: &dyn RemoteTaskClient,
    raster: &Raster,
    grid: &TileGrid,
    options: &ExportOptions,
) -> LizardResult<Vec<String>> {
    let mut task_ids = Vec::with_capacity(grid.len());
    for tile in &grid.tiles {
        let request = RasterExtraction {
            raster_id: raster.uuid.clone(),
            bbox: *tile,
            width: grid.tile_width,
            height: grid.tile_height,
            projection: options.projection.clone(),
            nodata: options.nodata,
            start_time: options.start_time.clone(),
        };
        task_ids.push(client.submit_raster_extraction(&request).await?);
    }
    Ok(task_ids)
}

/// Download the result of a finished task to `target`.
async fn download_task_result(
    client: &dyn RemoteTaskClient,
    task_id: &str,
    target: &Path,
) -> LizardResult<u64> {
    let url = client.get_task_download_url(task_id).await?;
    client.download_file(&url, target).await
}

/// Report the outcome of a run.
fn report_outcome(
    progress: &ProgressReporter,
    outcome: LizardResult<BTreeMap<String, PathBuf>>,
    finished_message: String,
) {
    let item = progress.item();
    match outcome {
        Ok(files) => {
            counter!("lizard_downloads_finished_total", "kind" => item.kind.to_string()).increment(1);
            info!(kind = %item.kind, item = %item.name, files = files.len(), "Download finished");
            progress.finished(files, finished_message);
        }
        Err(e) => {
            counter!("lizard_downloads_failed_total", "kind" => item.kind.to_string()).increment(1);
            error!(kind = %item.kind, item = %item.name, error = %e, "Download failed");
            progress.failed(e.failure_message());
        }
    }
}

/// Wrap a raw file download error with the name of the file.
fn raw_download_error(filename: &str, e: LizardError) -> LizardError {
    LizardError::Download {
        filename: filename.to_string(),
        message: e.to_string(),
    }
}
