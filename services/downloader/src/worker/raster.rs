//! Download of one raster, cut by a set of extent polygons.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, instrument};

use lizard_common::{
    compute_raster_tiles, DownloadItem, ItemRef, LizardResult, NamedExtentPolygons, Raster,
    RemoteTask,
};

use super::{
    download_task_result, report_outcome, submit_tiles, tile_filename, DownloadSettings,
    ExportOptions, ProgressReporter,
};
use crate::client::RemoteTaskClient;
use crate::clip::{Cutline, RasterClipper};
use crate::events::EventSender;
use crate::mosaic::{apply_mosaic, mosaic_path_for, MosaicOptions};
use crate::poller::poll_until_resolved;
use crate::pool::DownloadJob;

#[derive(Debug, Clone)]
pub struct RasterDownloadRequest {
    pub raster: Raster,
    /// Output base name; also names the download directory.
    pub name: String,
    pub download_root: PathBuf,
    pub polygons: NamedExtentPolygons,
    /// Clip each downloaded tile to its polygon geometry.
    pub crop_to_polygons: bool,
    pub nodata: Option<f64>,
    /// Pixel size in the output projection, defaults to the raster's own.
    pub resolution: Option<f64>,
    pub projection: Option<String>,
    /// Timestamp for temporal rasters.
    pub start_time: Option<String>,
}

pub struct RasterDownloader {
    client: Arc<dyn RemoteTaskClient>,
    clipper: Arc<dyn RasterClipper>,
    request: RasterDownloadRequest,
    settings: DownloadSettings,
    item: DownloadItem,
    progress: ProgressReporter,
}

impl RasterDownloader {
    pub fn new(
        client: Arc<dyn RemoteTaskClient>,
        clipper: Arc<dyn RasterClipper>,
        request: RasterDownloadRequest,
        settings: DownloadSettings,
        events: EventSender,
    ) -> Self {
        let item_ref = ItemRef::raster(&request.raster, request.name.clone());
        let item = DownloadItem::new(item_ref.clone(), &request.download_root);
        let number_of_steps = request.polygons.len() as u32 + 1;
        let progress = ProgressReporter::new(item_ref, events, number_of_steps);

        Self {
            client,
            clipper,
            request,
            settings,
            item,
            progress,
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.item.download_dir
    }

    pub async fn run(mut self) {
        let outcome = self.execute().await;
        let message = format!(
            "Raster download finished. Downloaded files are in: {}",
            self.item.download_dir.display()
        );
        report_outcome(&self.progress, outcome.map(|_| self.item.into_files()), message);
    }

    #[instrument(skip(self), fields(raster = %self.request.raster.uuid))]
    async fn execute(&mut self) -> LizardResult<()> {
        let raster_name = self.request.name.clone();
        self.progress.report(None, false);
        self.progress.report(
            Some(format!(
                "Spawning raster tasks and preparing for download (raster: '{}')...",
                raster_name
            )),
            true,
        );
        fs::create_dir_all(&self.item.download_dir).await?;

        let options = ExportOptions {
            projection: self.request.projection.clone(),
            nodata: self.request.nodata,
            start_time: self.request.start_time.clone(),
        };

        let mut submitted: Vec<Vec<RemoteTask>> = Vec::with_capacity(self.request.polygons.len());
        for polygon in self.request.polygons.iter() {
            let output_name = polygon.output_name(&raster_name);
            let bbox = polygon.bounding_box()?;
            let grid = compute_raster_tiles(
                &self.request.raster,
                &bbox,
                self.request.resolution,
                self.settings.max_pixel_count,
            )?;
            let chunked = grid.is_chunked();
            let task_ids = submit_tiles(self.client.as_ref(), &self.request.raster, &grid, &options).await?;
            let tasks = task_ids
                .into_iter()
                .enumerate()
                .map(|(i, task_id)| {
                    RemoteTask::new(task_id, tile_filename(&output_name, "tif", i + 1, chunked))
                })
                .collect::<Vec<_>>();
            debug!(polygon = %polygon.key.name, tiles = tasks.len(), "Raster tasks submitted");
            submitted.push(tasks);
        }

        let task_ids: Vec<String> = submitted
            .iter()
            .flat_map(|tasks| tasks.iter().map(|t| t.task_id.clone()))
            .collect();
        poll_until_resolved(self.client.as_ref(), &task_ids, self.settings.poll_interval).await?;

        for (polygon, tasks) in self.request.polygons.iter().zip(&submitted) {
            let mut paths = Vec::with_capacity(tasks.len());
            let mut last_message = None;
            for task in tasks {
                let message = format!(
                    "Downloading '{}' (raster: '{}')...",
                    task.filename, raster_name
                );
                self.progress.report(Some(message.clone()), false);
                last_message = Some(message);

                let target = self.item.target_path(&task.filename);
                download_task_result(self.client.as_ref(), &task.task_id, &target).await?;
                self.item.record(task.filename.clone(), target.clone());
                paths.push(target);
            }
            self.progress.report(last_message, true);

            if self.request.crop_to_polygons {
                let cutline = Cutline::write(&polygon.wkt).await?;
                for path in &paths {
                    self.clipper.clip(path, &cutline, self.request.nodata).await?;
                }
            }

            if paths.len() > 1 {
                let vrt_path = mosaic_path_for(&paths[0]);
                self.progress.report(
                    Some(format!("Building VRT: '{}'...", vrt_path.display())),
                    false,
                );
                let mosaic_options = MosaicOptions {
                    src_nodata: self.request.nodata,
                    srs: self
                        .request
                        .projection
                        .clone()
                        .or_else(|| self.request.raster.projection.clone()),
                };
                apply_mosaic(self.item.files_mut(), &paths, &mosaic_options)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DownloadJob for RasterDownloader {
    fn item(&self) -> &ItemRef {
        &self.item.item
    }

    async fn run(self) {
        RasterDownloader::run(self).await
    }
}
