//! End-to-end worker runs against the fake remote service.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{drain, progress_values, raster, raster_result, raw_result, scenario, FakeClipper, FakeTaskClient};
use downloader::events::{self, DownloadEvent};
use downloader::{
    select_results, DownloadSettings, RasterDownloadRequest, RasterDownloader, ScenarioDownloadRequest,
    ScenarioItemsDownloader,
};
use lizard_common::{Extent, LizardError, NamedExtentPolygon, NamedExtentPolygons, ScenarioResult};
use test_utils::{crs, extent, scratch_dir, RASTER_UUID};

fn settings(max_pixel_count: u64) -> DownloadSettings {
    DownloadSettings {
        poll_interval: Duration::from_millis(10),
        max_pixel_count,
    }
}

fn raster_url() -> String {
    format!("https://demo.lizard.net/api/v4/rasters/{}/", RASTER_UUID)
}

fn terminal(events: &[DownloadEvent]) -> &DownloadEvent {
    let last = events.last().expect("no events emitted");
    assert!(last.is_terminal());
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    last
}

// ============================================================================
// Scenario downloads
// ============================================================================

#[tokio::test]
async fn test_scenario_raw_results_only() {
    let root = scratch_dir();
    let client = Arc::new(FakeTaskClient::new());
    let request = ScenarioDownloadRequest {
        scenario: scenario("Polder run", extent::TINY, 1.0),
        raw_results: vec![
            raw_result(1, "Results 3Di", "results_3di.nc"),
            raw_result(2, "Log files", "log_files.zip"),
        ],
        raster_results: vec![],
        download_root: root.path().to_path_buf(),
        projection: None,
        nodata: None,
    };
    let (tx, mut rx) = events::channel();
    let worker = ScenarioItemsDownloader::new(client.clone(), request, settings(400), tx);
    let download_dir = worker.download_dir().to_path_buf();
    worker.run().await;

    let events = drain(&mut rx);
    assert_eq!(progress_values(&events), vec![0, 0, 50]);
    match terminal(&events) {
        DownloadEvent::Finished { files, message, .. } => {
            assert_eq!(files.len(), 2);
            assert_eq!(files["results_3di.nc"], download_dir.join("results_3di.nc"));
            assert!(download_dir.join("log_files.zip").exists());
            assert!(message.starts_with("Scenario items download finished."));
        }
        other => panic!("unexpected terminal event: {:?}", other),
    }
    assert!(download_dir.ends_with("Polder run"));
    assert!(client.submissions().is_empty());
}

#[tokio::test]
async fn test_scenario_tiled_raster_is_mosaicked() {
    let root = scratch_dir();
    let client = Arc::new(
        FakeTaskClient::new().with_raster(&raster_url(), raster("Max water depth", extent::TINY, 1.0)),
    );
    let request = ScenarioDownloadRequest {
        scenario: scenario("Polder run", extent::TINY, 1.0),
        raw_results: vec![],
        raster_results: vec![raster_result(3, "Max water depth", "depth-max-dtri")],
        download_root: root.path().to_path_buf(),
        projection: Some(crs::RD_NEW.to_string()),
        nodata: Some(-9999.0),
    };
    let (tx, mut rx) = events::channel();
    let worker = ScenarioItemsDownloader::new(client.clone(), request, settings(400), tx);
    let download_dir = worker.download_dir().to_path_buf();
    worker.run().await;

    let submissions = client.submissions();
    assert_eq!(submissions.len(), 4);
    for submission in &submissions {
        assert_eq!((submission.width, submission.height), (20, 20));
        assert_eq!(submission.projection.as_deref(), Some(crs::RD_NEW));
        assert_eq!(submission.nodata, Some(-9999.0));
    }
    assert_eq!(submissions[0].bbox, Extent::new(0.0, 0.0, 20.0, 20.0));

    let events = drain(&mut rx);
    // Only the first tile of a result advances progress.
    assert_eq!(progress_values(&events), vec![0, 0, 50, 100, 100, 100, 100, 100]);
    match terminal(&events) {
        DownloadEvent::Finished { files, .. } => {
            assert_eq!(files.keys().collect::<Vec<_>>(), vec!["max_water_depth.vrt"]);
            let vrt = std::fs::read_to_string(&files["max_water_depth.vrt"]).unwrap();
            assert!(vrt.contains("max_water_depth_04.tif"));
            assert!(vrt.contains("<NoDataValue>-9999</NoDataValue>"));
        }
        other => panic!("unexpected terminal event: {:?}", other),
    }
    for index in 1..=4 {
        assert!(download_dir.join(format!("max_water_depth_{:02}.tif", index)).exists());
    }
}

#[tokio::test]
async fn test_scenario_single_tile_raster_keeps_plain_name() {
    let root = scratch_dir();
    let client = Arc::new(
        FakeTaskClient::new().with_raster(&raster_url(), raster("Max water depth", extent::TINY, 1.0)),
    );
    let request = ScenarioDownloadRequest {
        scenario: scenario("Polder run", extent::TINY, 1.0),
        raw_results: vec![raw_result(1, "Results 3Di", "results_3di.nc")],
        raster_results: vec![raster_result(3, "Max water depth", "depth-max-dtri")],
        download_root: root.path().to_path_buf(),
        projection: None,
        nodata: None,
    };
    let (tx, mut rx) = events::channel();
    ScenarioItemsDownloader::new(client.clone(), request, settings(10_000), tx)
        .run()
        .await;

    let events = drain(&mut rx);
    match terminal(&events) {
        DownloadEvent::Finished { files, .. } => {
            assert_eq!(
                files.keys().collect::<Vec<_>>(),
                vec!["max_water_depth.tif", "results_3di.nc"]
            );
        }
        other => panic!("unexpected terminal event: {:?}", other),
    }
    // Three steps: one raw file, the spawn step and one raster.
    assert_eq!(progress_values(&events), vec![0, 0, 33, 66, 100]);
}

#[tokio::test]
async fn test_scenario_task_failure_reports_failed() {
    let root = scratch_dir();
    let client = Arc::new(
        FakeTaskClient::new()
            .with_raster(&raster_url(), raster("Max water depth", extent::TINY, 1.0))
            .with_statuses("task-2", &["PENDING", "FAILURE"]),
    );
    let request = ScenarioDownloadRequest {
        scenario: scenario("Polder run", extent::TINY, 1.0),
        raw_results: vec![],
        raster_results: vec![raster_result(3, "Max water depth", "depth-max-dtri")],
        download_root: root.path().to_path_buf(),
        projection: None,
        nodata: None,
    };
    let (tx, mut rx) = events::channel();
    ScenarioItemsDownloader::new(client.clone(), request, settings(400), tx)
        .run()
        .await;

    let events = drain(&mut rx);
    match terminal(&events) {
        DownloadEvent::Failed { message, .. } => {
            assert_eq!(message, "Task task-2 failed, status was: FAILURE");
        }
        other => panic!("unexpected terminal event: {:?}", other),
    }
    assert!(client.downloads().is_empty());
}

#[tokio::test]
async fn test_scenario_raw_download_failure_names_the_file() {
    let root = scratch_dir();
    let failing = raw_result(1, "Results 3Di", "results_3di.nc");
    let client = Arc::new(
        FakeTaskClient::new().with_failing_url(failing.attachment_url.as_deref().unwrap()),
    );
    let request = ScenarioDownloadRequest {
        scenario: scenario("Polder run", extent::TINY, 1.0),
        raw_results: vec![failing],
        raster_results: vec![],
        download_root: root.path().to_path_buf(),
        projection: None,
        nodata: None,
    };
    let (tx, mut rx) = events::channel();
    ScenarioItemsDownloader::new(client, request, settings(400), tx)
        .run()
        .await;

    let events = drain(&mut rx);
    match terminal(&events) {
        DownloadEvent::Failed { message, .. } => assert_eq!(
            message,
            "Download of the results_3di.nc failed due to the following error: \
             Request failed: connection reset by peer"
        ),
        other => panic!("unexpected terminal event: {:?}", other),
    }
}

#[tokio::test]
async fn test_scenario_unknown_raster_fails_with_generic_prefix() {
    let root = scratch_dir();
    let client = Arc::new(FakeTaskClient::new());
    let request = ScenarioDownloadRequest {
        scenario: scenario("Polder run", extent::TINY, 1.0),
        raw_results: vec![],
        raster_results: vec![raster_result(3, "Max water depth", "depth-max-dtri")],
        download_root: root.path().to_path_buf(),
        projection: None,
        nodata: None,
    };
    let (tx, mut rx) = events::channel();
    ScenarioItemsDownloader::new(client, request, settings(400), tx)
        .run()
        .await;

    let events = drain(&mut rx);
    match terminal(&events) {
        DownloadEvent::Failed { message, .. } => {
            assert!(message.starts_with("Download failed due to the following error: HTTP error 404"));
        }
        other => panic!("unexpected terminal event: {:?}", other),
    }
}

// ============================================================================
// Result selection
// ============================================================================

fn listed_results() -> Vec<ScenarioResult> {
    vec![
        raw_result(1, "Results 3Di", "results_3di.nc"),
        raster_result(2, "Max water depth", "max-water-depth"),
        raster_result(3, "Water depth (timeseries)", "water-depth")
            .with_filename("water_depth.tif")
            .with_temporal(true),
    ]
}

#[test]
fn test_selection_skips_temporal_rasters() {
    let (rasters, raw) = select_results(listed_results(), &[]).unwrap();
    assert_eq!(
        rasters.iter().map(|r| r.filename.as_str()).collect::<Vec<_>>(),
        vec!["max_water_depth.tif"]
    );
    assert_eq!(
        raw.iter().map(|r| r.filename.as_str()).collect::<Vec<_>>(),
        vec!["results_3di.nc"]
    );
}

#[test]
fn test_selection_honours_only() {
    let only = vec!["results_3di.nc".to_string()];
    let (rasters, raw) = select_results(listed_results(), &only).unwrap();
    assert!(rasters.is_empty());
    assert_eq!(raw.len(), 1);
}

#[test]
fn test_selecting_temporal_raster_is_rejected() {
    let only = vec!["water_depth.tif".to_string()];
    let err = select_results(listed_results(), &only).unwrap_err();
    match err {
        LizardError::InvalidParameter { param, message } => {
            assert_eq!(param, "only");
            assert!(message.contains("'water_depth.tif' is a temporal raster"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

// ============================================================================
// Raster downloads
// ============================================================================

fn polygons() -> NamedExtentPolygons {
    NamedExtentPolygons::new(vec![
        NamedExtentPolygon::new(1, "north", Extent::new(0.0, 0.0, 20.0, 20.0).to_wkt_polygon()),
        NamedExtentPolygon::new(2, "south", Extent::new(10.0, 10.0, 40.0, 40.0).to_wkt_polygon()),
    ])
    .unwrap()
}

fn raster_request(root: &std::path::Path, crop: bool) -> RasterDownloadRequest {
    RasterDownloadRequest {
        raster: raster("DEM", extent::TINY, 1.0),
        name: "DEM".to_string(),
        download_root: root.to_path_buf(),
        polygons: polygons(),
        crop_to_polygons: crop,
        nodata: Some(-9999.0),
        resolution: None,
        projection: None,
        start_time: Some("2024-01-01T00:00:00Z".to_string()),
    }
}

#[tokio::test]
async fn test_raster_per_polygon_outputs() {
    let root = scratch_dir();
    let client = Arc::new(FakeTaskClient::new());
    let clipper = Arc::new(FakeClipper::default());
    let (tx, mut rx) = events::channel();
    let worker = RasterDownloader::new(
        client.clone(),
        clipper.clone(),
        raster_request(root.path(), false),
        settings(400),
        tx,
    );
    let download_dir = worker.download_dir().to_path_buf();
    worker.run().await;

    // One tile for the first polygon, four for the second.
    let submissions = client.submissions();
    assert_eq!(submissions.len(), 5);
    assert!(submissions
        .iter()
        .all(|s| s.start_time.as_deref() == Some("2024-01-01T00:00:00Z")));

    let events = drain(&mut rx);
    assert_eq!(
        progress_values(&events),
        vec![0, 0, 33, 33, 66, 66, 66, 66, 66, 100]
    );
    match terminal(&events) {
        DownloadEvent::Finished { files, message, .. } => {
            assert_eq!(
                files.keys().collect::<Vec<_>>(),
                vec!["DEM 1 north.tif", "DEM 2 south.vrt"]
            );
            assert!(message.starts_with("Raster download finished."));
        }
        other => panic!("unexpected terminal event: {:?}", other),
    }
    assert!(download_dir.join("DEM 2 south_03.tif").exists());
    assert!(clipper.calls().is_empty());
}

#[tokio::test]
async fn test_raster_crop_clips_every_tile_to_its_polygon() {
    let root = scratch_dir();
    let client = Arc::new(FakeTaskClient::new());
    let clipper = Arc::new(FakeClipper::default());
    let (tx, mut rx) = events::channel();
    RasterDownloader::new(
        client.clone(),
        clipper.clone(),
        raster_request(root.path(), true),
        settings(400),
        tx,
    )
    .run()
    .await;

    let calls = clipper.calls();
    assert_eq!(calls.len(), 5);
    assert!(calls[0].0.ends_with("DEM 1 north.tif"));
    assert!(calls[0].1.contains("POLYGON"));
    assert!(calls[1..].iter().all(|(path, _)| path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("DEM 2 south_")));
    assert!(matches!(terminal(&drain(&mut rx)), DownloadEvent::Finished { .. }));
}

#[tokio::test]
async fn test_raster_bbox_is_clamped_to_raster() {
    let root = scratch_dir();
    let client = Arc::new(FakeTaskClient::new());
    let mut request = raster_request(root.path(), false);
    request.polygons = NamedExtentPolygons::single(NamedExtentPolygon::from_extent(&Extent::new(
        -100.0, -100.0, 30.0, 30.0,
    )));
    let (tx, mut rx) = events::channel();
    RasterDownloader::new(client.clone(), Arc::new(FakeClipper::default()), request, settings(10_000), tx)
        .run()
        .await;

    let submissions = client.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].bbox, Extent::new(0.0, 0.0, 30.0, 30.0));
    match terminal(&drain(&mut rx)) {
        DownloadEvent::Finished { files, .. } => {
            assert_eq!(files.keys().collect::<Vec<_>>(), vec!["DEM.tif"]);
        }
        other => panic!("unexpected terminal event: {:?}", other),
    }
}

#[tokio::test]
async fn test_raster_run_opens_with_bare_progress() {
    let root = scratch_dir();
    let client = Arc::new(FakeTaskClient::new());
    let mut request = raster_request(root.path(), false);
    request.polygons = NamedExtentPolygons::single(NamedExtentPolygon::from_extent(&Extent::new(
        0.0, 0.0, 20.0, 20.0,
    )));
    let (tx, mut rx) = events::channel();
    RasterDownloader::new(client, Arc::new(FakeClipper::default()), request, settings(10_000), tx)
        .run()
        .await;

    let events = drain(&mut rx);
    match &events[0] {
        DownloadEvent::Progress { message, current, .. } => {
            assert_eq!(*message, None);
            assert_eq!(*current, 0);
        }
        other => panic!("unexpected first event: {:?}", other),
    }
    match &events[1] {
        DownloadEvent::Progress { message, current, .. } => {
            assert_eq!(
                message.as_deref(),
                Some("Spawning raster tasks and preparing for download (raster: 'DEM')...")
            );
            assert_eq!(*current, 0);
        }
        other => panic!("unexpected second event: {:?}", other),
    }
    assert_eq!(progress_values(&events), vec![0, 0, 50, 50]);
}

// ============================================================================
// Pool
// ============================================================================

#[tokio::test]
async fn test_pool_of_one_runs_workers_in_order() {
    let root = scratch_dir();
    let client = Arc::new(FakeTaskClient::new());
    let (tx, mut rx) = events::channel();
    let pool = downloader::DownloaderPool::single();

    let mut handles = Vec::new();
    for name in ["First run", "Second run"] {
        let request = ScenarioDownloadRequest {
            scenario: scenario(name, extent::TINY, 1.0),
            raw_results: vec![raw_result(1, "Results 3Di", "results_3di.nc")],
            raster_results: vec![],
            download_root: root.path().to_path_buf(),
            projection: None,
            nodata: None,
        };
        let worker = ScenarioItemsDownloader::new(client.clone(), request, settings(400), tx.clone());
        handles.push(pool.start(worker));
    }
    assert_eq!(handles[1].item().name, "Second run");
    for handle in handles {
        handle.finished().await;
    }

    let events = drain(&mut rx);
    let first_terminal = events
        .iter()
        .position(|e| e.is_terminal())
        .unwrap();
    assert!(events[..=first_terminal]
        .iter()
        .all(|e| e.item().name == "First run"));
    assert!(events[first_terminal + 1..]
        .iter()
        .all(|e| e.item().name == "Second run"));
    assert!(root.path().join("Second run").join("results_3di.nc").exists());
}
