//! Test doubles for the remote service and the clipper.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use downloader::client::{RasterExtraction, RemoteTaskClient};
use downloader::clip::{Cutline, RasterClipper};
use downloader::events::{DownloadEvent, EventReceiver};
use lizard_common::{LizardError, LizardResult, Raster, Scenario, ScenarioResult, TaskStatus};
use test_utils::{write_geotiff, GeoTiffSpec};

const TASK_RESULT_PREFIX: &str = "fake://tasks/";

/// In-memory remote service.
///
/// Task ids are `task-N` in submission order. Status scripts replay in
/// order and the last status repeats; unscripted tasks succeed at once.
/// Task results are written as GeoTIFFs covering the submitted bbox; any
/// other URL is written as a small text file.
#[derive(Default)]
pub struct FakeTaskClient {
    rasters: HashMap<String, Raster>,
    scripts: Mutex<HashMap<String, VecDeque<TaskStatus>>>,
    failing_urls: HashSet<String>,
    submissions: Mutex<Vec<RasterExtraction>>,
    polls: Mutex<Vec<String>>,
    downloads: Mutex<Vec<(String, PathBuf)>>,
}

impl FakeTaskClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raster(mut self, url: &str, raster: Raster) -> Self {
        self.rasters.insert(url.to_string(), raster);
        self
    }

    pub fn with_statuses(self, task_id: &str, statuses: &[&str]) -> Self {
        self.scripts.lock().unwrap().insert(
            task_id.to_string(),
            statuses.iter().map(|s| TaskStatus::parse(s)).collect(),
        );
        self
    }

    pub fn with_failing_url(mut self, url: &str) -> Self {
        self.failing_urls.insert(url.to_string());
        self
    }

    pub fn submissions(&self) -> Vec<RasterExtraction> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn polls(&self) -> Vec<String> {
        self.polls.lock().unwrap().clone()
    }

    pub fn downloads(&self) -> Vec<(String, PathBuf)> {
        self.downloads.lock().unwrap().clone()
    }

    fn task_index(task_id: &str) -> Option<usize> {
        task_id.strip_prefix("task-")?.parse::<usize>().ok()?.checked_sub(1)
    }
}

#[async_trait]
impl RemoteTaskClient for FakeTaskClient {
    async fn get_raster(&self, raster_url: &str) -> LizardResult<Raster> {
        self.rasters
            .get(raster_url)
            .cloned()
            .ok_or_else(|| LizardError::HttpStatus {
                status: 404,
                url: raster_url.to_string(),
            })
    }

    async fn submit_raster_extraction(&self, request: &RasterExtraction) -> LizardResult<String> {
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(request.clone());
        Ok(format!("task-{}", submissions.len()))
    }

    async fn get_task_status(&self, task_id: &str) -> LizardResult<TaskStatus> {
        self.polls.lock().unwrap().push(task_id.to_string());
        let mut scripts = self.scripts.lock().unwrap();
        let status = match scripts.get_mut(task_id) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().cloned(),
            None => None,
        };
        Ok(status.unwrap_or(TaskStatus::Success))
    }

    async fn get_task_download_url(&self, task_id: &str) -> LizardResult<String> {
        Ok(format!("{}{}", TASK_RESULT_PREFIX, task_id))
    }

    async fn download_file(&self, url: &str, target: &Path) -> LizardResult<u64> {
        if self.failing_urls.contains(url) {
            return Err(LizardError::Transport("connection reset by peer".to_string()));
        }
        self.downloads
            .lock()
            .unwrap()
            .push((url.to_string(), target.to_path_buf()));

        if let Some(task_id) = url.strip_prefix(TASK_RESULT_PREFIX) {
            let request = Self::task_index(task_id)
                .and_then(|index| self.submissions.lock().unwrap().get(index).cloned())
                .ok_or_else(|| LizardError::InvalidResponse(format!("unknown task {}", task_id)))?;
            let spec = GeoTiffSpec {
                x1: request.bbox.x1,
                y2: request.bbox.y2,
                pixel_size_x: request.bbox.width() / request.width as f64,
                pixel_size_y: request.bbox.height() / request.height as f64,
                width: request.width as u32,
                height: request.height as u32,
                fill: 1.0,
                nodata: request.nodata.or(Some(-9999.0)),
                epsg: Some(28992),
            };
            write_geotiff(target, &spec).map_err(|e| LizardError::Mosaic(e.to_string()))?;
        } else {
            std::fs::write(target, b"raw result")?;
        }
        Ok(std::fs::metadata(target)?.len())
    }
}

/// Clipper that records its calls and leaves files untouched.
#[derive(Default)]
pub struct FakeClipper {
    calls: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeClipper {
    pub fn calls(&self) -> Vec<(PathBuf, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RasterClipper for FakeClipper {
    async fn clip(&self, raster: &Path, cutline: &Cutline, _nodata: Option<f64>) -> LizardResult<()> {
        let wkt = std::fs::read_to_string(cutline.path())?;
        self.calls.lock().unwrap().push((raster.to_path_buf(), wkt));
        Ok(())
    }
}

pub fn scenario(name: &str, extent: (f64, f64, f64, f64), pixel_size: f64) -> Scenario {
    serde_json::from_value(test_utils::scenario_json(name, extent, pixel_size)).unwrap()
}

pub fn raster(name: &str, extent: (f64, f64, f64, f64), pixel_size: f64) -> Raster {
    serde_json::from_value(test_utils::raster_json(name, extent, pixel_size, false)).unwrap()
}

pub fn raw_result(id: i64, name: &str, filename: &str) -> ScenarioResult {
    let result: ScenarioResult =
        serde_json::from_value(test_utils::raw_result_json(id, name, filename)).unwrap();
    result.with_filename(filename)
}

pub fn raster_result(id: i64, name: &str, code: &str) -> ScenarioResult {
    let result: ScenarioResult =
        serde_json::from_value(test_utils::raster_result_json(id, name, code)).unwrap();
    let filename = result.local_filename(false);
    result.with_filename(filename)
}

/// Drain every event a finished run emitted.
pub fn drain(events: &mut EventReceiver) -> Vec<DownloadEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// `current` value of every progress event.
pub fn progress_values(events: &[DownloadEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|event| match event {
            DownloadEvent::Progress { current, .. } => Some(*current),
            _ => None,
        })
        .collect()
}
