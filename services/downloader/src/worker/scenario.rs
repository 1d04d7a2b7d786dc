//! Download of selected scenario results.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, instrument};

use lizard_common::{
    compute_scenario_tiles, DownloadItem, ItemRef, LizardError, LizardResult, RemoteTask, Scenario,
    ScenarioResult,
};

use super::{
    download_task_result, raw_download_error, report_outcome, split_extension, submit_tiles,
    tile_filename, DownloadSettings, ExportOptions, ProgressReporter,
};
use crate::client::RemoteTaskClient;
use crate::events::EventSender;
use crate::mosaic::{apply_mosaic, mosaic_path_for, MosaicOptions};
use crate::poller::poll_until_resolved;
use crate::pool::DownloadJob;

/// What to download from one scenario.
#[derive(Debug, Clone)]
pub struct ScenarioDownloadRequest {
    pub scenario: Scenario,
    /// Attachment results, downloaded as-is.
    pub raw_results: Vec<ScenarioResult>,
    /// Raster results, exported over the scenario extent.
    pub raster_results: Vec<ScenarioResult>,
    /// Files land in `<download_root>/<scenario name>`.
    pub download_root: PathBuf,
    pub projection: Option<String>,
    pub nodata: Option<f64>,
}

/// Split listed results into `(raster, raw)` download selections.
///
/// An empty `only` selects every downloadable result. Temporal raster
/// results are left out, and naming one in `only` is an error.
pub fn select_results(
    results: Vec<ScenarioResult>,
    only: &[String],
) -> LizardResult<(Vec<ScenarioResult>, Vec<ScenarioResult>)> {
    let mut selected = Vec::with_capacity(results.len());
    for result in results {
        let wanted = only.is_empty() || only.contains(&result.filename);
        if !wanted {
            continue;
        }
        if result.is_downloadable() {
            selected.push(result);
        } else if !only.is_empty() {
            return Err(LizardError::invalid_parameter(
                "only",
                format!(
                    "'{}' is a temporal raster and can't be downloaded with its scenario",
                    result.filename
                ),
            ));
        } else {
            debug!(result = %result.filename, "Skipping temporal raster result");
        }
    }
    Ok(selected.into_iter().partition(|r| r.is_raster()))
}

/// Raster tile task with the result code it belongs to.
#[derive(Debug, Clone)]
struct ResultTile {
    task: RemoteTask,
    code: String,
}

pub struct ScenarioItemsDownloader {
    client: Arc<dyn RemoteTaskClient>,
    request: ScenarioDownloadRequest,
    settings: DownloadSettings,
    item: DownloadItem,
    progress: ProgressReporter,
}

impl ScenarioItemsDownloader {
    pub fn new(
        client: Arc<dyn RemoteTaskClient>,
        request: ScenarioDownloadRequest,
        settings: DownloadSettings,
        events: EventSender,
    ) -> Self {
        let item_ref = ItemRef::scenario(&request.scenario);
        let item = DownloadItem::new(item_ref.clone(), &request.download_root);

        // One step per raw file, plus one per raster and one for spawning
        // the raster tasks.
        let mut number_of_steps = request.raw_results.len();
        if !request.raster_results.is_empty() {
            number_of_steps += request.raster_results.len() + 1;
        }
        let progress = ProgressReporter::new(item_ref, events, number_of_steps as u32);

        Self {
            client,
            request,
            settings,
            item,
            progress,
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.item.download_dir
    }

    /// Run the download, reporting the outcome as an event.
    pub async fn run(mut self) {
        let outcome = self.execute().await;
        let message = format!(
            "Scenario items download finished. Downloaded items are in: {}",
            self.item.download_dir.display()
        );
        report_outcome(&self.progress, outcome.map(|_| self.item.into_files()), message);
    }

    #[instrument(skip(self), fields(scenario = %self.request.scenario.uuid))]
    async fn execute(&mut self) -> LizardResult<()> {
        self.progress.report(None, false);
        fs::create_dir_all(&self.item.download_dir).await?;
        self.download_raw_results().await?;
        if !self.request.raster_results.is_empty() {
            self.download_raster_results().await?;
        }
        Ok(())
    }

    async fn download_raw_results(&mut self) -> LizardResult<()> {
        let scenario_name = self.request.scenario.name.clone();
        for result in &self.request.raw_results {
            let filename = if result.filename.is_empty() {
                result.local_filename(false)
            } else {
                result.filename.clone()
            };
            let target = self.item.target_path(&filename);
            self.progress.report(
                Some(format!(
                    "Downloading '{}' (scenario: '{}')...",
                    filename, scenario_name
                )),
                true,
            );

            let url = result.attachment_url.as_deref().unwrap_or_default();
            self.client
                .download_file(url, &target)
                .await
                .map_err(|e| raw_download_error(&filename, e))?;
            self.item.record(filename, target);
        }
        Ok(())
    }

    async fn download_raster_results(&mut self) -> LizardResult<()> {
        let scenario_name = self.request.scenario.name.clone();
        self.progress.report(
            Some(format!(
                "Spawning raster tasks and preparing for download (scenario: '{}')...",
                scenario_name
            )),
            true,
        );

        let grid = compute_scenario_tiles(&self.request.scenario, self.settings.max_pixel_count)?;
        let options = ExportOptions {
            projection: self.request.projection.clone(),
            nodata: self.request.nodata,
            start_time: None,
        };

        let mut tiles = Vec::new();
        for result in &self.request.raster_results {
            let raster_url = result.raster.as_deref().unwrap_or_default();
            let raster = self.client.get_raster(raster_url).await?;
            let filename = if result.filename.is_empty() {
                result.local_filename(raster.temporal)
            } else {
                result.filename.clone()
            };
            let (stem, extension) = split_extension(&filename);

            let task_ids = submit_tiles(self.client.as_ref(), &raster, &grid, &options).await?;
            let chunked = task_ids.len() > 1;
            for (index, task_id) in task_ids.into_iter().enumerate() {
                tiles.push(ResultTile {
                    task: RemoteTask::new(task_id, tile_filename(stem, extension, index + 1, chunked)),
                    code: result.code.clone(),
                });
            }
        }
        debug!(tasks = tiles.len(), tiles_per_raster = grid.len(), "Raster tasks submitted");

        let task_ids: Vec<String> = tiles.iter().map(|t| t.task.task_id.clone()).collect();
        poll_until_resolved(self.client.as_ref(), &task_ids, self.settings.poll_interval).await?;

        tiles.sort_by(|a, b| a.task.filename.cmp(&b.task.filename));
        let mut paths_per_code: Vec<(String, Vec<PathBuf>)> = Vec::new();
        let mut last_message = None;
        for tile in &tiles {
            let message = format!(
                "Downloading '{}' (scenario: '{}')...",
                tile.task.filename, scenario_name
            );
            let group = paths_per_code.iter().position(|(code, _)| *code == tile.code);
            self.progress.report(Some(message.clone()), group.is_none());
            last_message = Some(message);

            let target = self.item.target_path(&tile.task.filename);
            download_task_result(self.client.as_ref(), &tile.task.task_id, &target).await?;
            self.item.record(tile.task.filename.clone(), target.clone());
            match group {
                Some(index) => paths_per_code[index].1.push(target),
                None => paths_per_code.push((tile.code.clone(), vec![target])),
            }
        }
        self.progress.report(last_message, false);

        let mosaic_options = MosaicOptions {
            src_nodata: self.request.nodata,
            srs: self
                .request
                .projection
                .clone()
                .or_else(|| self.request.scenario.projection.clone()),
        };
        for (code, paths) in &paths_per_code {
            if paths.len() < 2 {
                continue;
            }
            let mut sorted = paths.clone();
            sorted.sort();
            let vrt_path = mosaic_path_for(&sorted[0]);
            self.progress.report(
                Some(format!("Building VRT: '{}'...", vrt_path.display())),
                false,
            );
            apply_mosaic(self.item.files_mut(), &sorted, &mosaic_options)?;
            info!(code = %code, tiles = sorted.len(), "Raster result mosaicked");
        }
        Ok(())
    }
}

#[async_trait]
impl DownloadJob for ScenarioItemsDownloader {
    fn item(&self) -> &ItemRef {
        &self.item.item
    }

    async fn run(self) {
        ScenarioItemsDownloader::run(self).await
    }
}
