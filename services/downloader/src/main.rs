//! Lizard bulk downloader.
//!
//! Browses scenarios and rasters and downloads them with:
//! - Tiled raster exports within the service's pixel budget
//! - Polling of the asynchronous export tasks
//! - VRT mosaics over tiled results
//! - Optional clipping to extent polygons

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use downloader::{
    ensure_writable, select_results, DownloadEvent, DownloadSettings, DownloaderConfig,
    DownloaderPool, GdalWarpClipper, LizardClient, RasterDownloadRequest, RasterDownloader,
    ScenarioDownloadRequest, ScenarioItemsDownloader,
};
use lizard_common::{Extent, ItemKind, NamedExtentPolygon, NamedExtentPolygons};

#[derive(Parser, Debug)]
#[command(name = "lizard-downloader")]
#[command(about = "Download Lizard scenario results and rasters")]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "LIZARD_DOWNLOADER_CONFIG")]
    config: Option<PathBuf>,

    /// Lizard host, e.g. demo.lizard.net
    #[arg(long)]
    base_url: Option<String>,

    /// Personal API key
    #[arg(long, env = "LIZARD_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Seconds between task status sweeps
    #[arg(long)]
    poll_interval: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List scenarios
    Scenarios {
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, default_value = "1")]
        page: u64,
    },
    /// List the results of a scenario
    Results { scenario: String },
    /// List rasters
    Rasters {
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, default_value = "1")]
        page: u64,
    },
    /// List the WMS layers of a scenario or raster
    WmsLayers { kind: KindArg, uuid: String },
    /// Download scenario results
    DownloadScenario {
        scenario: String,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        projection: Option<String>,
        #[arg(long)]
        nodata: Option<f64>,
        /// Only download results with these file names
        #[arg(long, num_args = 1..)]
        only: Vec<String>,
    },
    /// Download a raster, optionally cut by extent polygons
    DownloadRaster {
        raster: String,
        #[arg(long)]
        output: PathBuf,
        /// Output name, defaults to the raster name
        #[arg(long)]
        name: Option<String>,
        /// x1,y1,x2,y2 in the target projection
        #[arg(long, conflicts_with = "polygons")]
        extent: Option<String>,
        /// JSON array of {"fid", "name", "wkt"} objects
        #[arg(long)]
        polygons: Option<PathBuf>,
        /// Clip the output to the polygons
        #[arg(long)]
        crop: bool,
        #[arg(long)]
        nodata: Option<f64>,
        #[arg(long)]
        resolution: Option<f64>,
        #[arg(long)]
        projection: Option<String>,
        /// Timestamp for temporal rasters
        #[arg(long)]
        start: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Scenario,
    Raster,
}

impl From<KindArg> for ItemKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Scenario => ItemKind::Scenario,
            KindArg::Raster => ItemKind::Raster,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    if args.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    let mut config = DownloaderConfig::resolve(args.config.as_deref())?;
    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(api_key) = &args.api_key {
        config.api_key = Some(api_key.clone());
    }
    if let Some(poll_interval) = args.poll_interval {
        config.poll_interval_secs = poll_interval;
    }
    config.validate()?;

    let client = Arc::new(LizardClient::new(&config)?);
    info!(api = %client.api_url(), "Using Lizard instance");

    match args.command {
        Command::Scenarios { search, page } => list_scenarios(&client, &search, page).await,
        Command::Results { scenario } => list_results(&client, &scenario).await,
        Command::Rasters { search, page } => list_rasters(&client, &search, page).await,
        Command::WmsLayers { kind, uuid } => list_wms_layers(&client, kind.into(), &uuid).await,
        Command::DownloadScenario {
            scenario,
            output,
            projection,
            nodata,
            only,
        } => {
            preflight(&output).await?;
            let scenario = client.get_scenario(&scenario).await?;
            let results = client.scenario_results(&scenario.uuid).await?;
            let (raster_results, raw_results) = select_results(results, &only)?;
            if raw_results.is_empty() && raster_results.is_empty() {
                bail!("No results selected for scenario '{}'", scenario.name);
            }

            let request = ScenarioDownloadRequest {
                scenario,
                raw_results,
                raster_results,
                download_root: output,
                projection,
                nodata,
            };
            let (events_tx, events) = downloader::events::channel();
            let job = ScenarioItemsDownloader::new(
                client,
                request,
                DownloadSettings::from(&config),
                events_tx,
            );
            run_job(&config, job, events).await
        }
        Command::DownloadRaster {
            raster,
            output,
            name,
            extent,
            polygons,
            crop,
            nodata,
            resolution,
            projection,
            start,
        } => {
            let start_time = start.as_deref().map(parse_start).transpose()?;
            preflight(&output).await?;
            let raster = client.get_raster_by_uuid(&raster).await?;
            let polygons = match (extent, polygons) {
                (Some(bbox), _) => NamedExtentPolygons::single(NamedExtentPolygon::from_extent(
                    &Extent::from_bbox_string(&bbox)?,
                )),
                (None, Some(path)) => read_polygons(&path)?,
                (None, None) => {
                    NamedExtentPolygons::single(NamedExtentPolygon::from_extent(&raster.grid.extent()?))
                }
            };

            let request = RasterDownloadRequest {
                name: name.unwrap_or_else(|| raster.name.clone()),
                raster,
                download_root: output,
                polygons,
                crop_to_polygons: crop,
                nodata,
                resolution,
                projection,
                start_time,
            };
            let (events_tx, events) = downloader::events::channel();
            let clipper = Arc::new(GdalWarpClipper::new(config.gdalwarp_path.clone()));
            let job = RasterDownloader::new(
                client,
                clipper,
                request,
                DownloadSettings::from(&config),
                events_tx,
            );
            run_job(&config, job, events).await
        }
    }
}

async fn preflight(output: &Path) -> Result<()> {
    tokio::fs::create_dir_all(output)
        .await
        .with_context(|| format!("Failed to create {}", output.display()))?;
    if let Err(e) = ensure_writable(output).await {
        warn!(dir = %output.display(), error = %e, "Preflight write failed");
        bail!(
            "Can't write to the selected location. Please select a folder to which you have write permission."
        );
    }
    Ok(())
}

/// Normalize an RFC 3339 timestamp to UTC.
fn parse_start(value: &str) -> Result<String> {
    let parsed = chrono::DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid --start timestamp: {}", value))?;
    Ok(parsed
        .with_timezone(&chrono::Utc)
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
}

fn read_polygons(path: &Path) -> Result<NamedExtentPolygons> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read polygons file: {}", path.display()))?;
    let polygons: Vec<NamedExtentPolygon> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse polygons file: {}", path.display()))?;
    Ok(NamedExtentPolygons::new(polygons)?)
}

/// Run `job` on the pool, printing its events until it ends.
async fn run_job<J: downloader::DownloadJob>(
    config: &DownloaderConfig,
    job: J,
    mut events: downloader::EventReceiver,
) -> Result<()> {
    let pool = DownloaderPool::new(config.max_concurrent_downloads);
    let handle = pool.start(job);

    let mut outcome = Ok(());
    while let Some(event) = events.recv().await {
        match &event {
            DownloadEvent::Progress {
                message, current, total, ..
            } => match message {
                Some(message) => println!("[{:>3}/{}] {}", current, total, message),
                None => println!("[{:>3}/{}]", current, total),
            },
            DownloadEvent::Finished { files, message, .. } => {
                println!("{}", message);
                for (name, path) in files {
                    println!("  {}  {}", name, path.display());
                }
            }
            DownloadEvent::Failed { message, .. } => {
                outcome = Err(anyhow::anyhow!("{}", message));
            }
        }
        if event.is_terminal() {
            break;
        }
    }
    handle.finished().await;
    outcome
}

async fn list_scenarios(client: &LizardClient, search: &str, page: u64) -> Result<()> {
    let page = client.search_scenarios(search, page).await?;
    println!("Page {}/{} ({} scenarios)", page.page, page.page_count, page.count);
    for scenario in &page.items {
        println!(
            "{}  {}  {}  {}",
            scenario.uuid,
            scenario.name,
            scenario.organisation.name,
            scenario
                .created
                .map(|c| c.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default()
        );
    }
    Ok(())
}

async fn list_results(client: &LizardClient, scenario: &str) -> Result<()> {
    for result in client.scenario_results(scenario).await? {
        let kind = if result.is_raster() { "raster" } else { "raw" };
        println!(
            "{:>8}  {:<6}  {:<24}  {}{}",
            result.id,
            kind,
            result.code,
            result.filename,
            if result.is_downloadable() { "" } else { "  (temporal, not downloadable)" }
        );
    }
    Ok(())
}

async fn list_rasters(client: &LizardClient, search: &str, page: u64) -> Result<()> {
    let page = client.search_rasters(search, page).await?;
    println!("Page {}/{} ({} rasters)", page.page, page.page_count, page.count);
    for raster in &page.items {
        println!(
            "{}  {}  {}{}",
            raster.uuid,
            raster.name,
            raster.organisation.name,
            if raster.temporal { "  (temporal)" } else { "" }
        );
    }
    Ok(())
}

async fn list_wms_layers(client: &LizardClient, kind: ItemKind, uuid: &str) -> Result<()> {
    let url = lizard_wms::capabilities_url(client.wms_url(), kind, uuid);
    let xml = client.get_capabilities_xml(&url).await?;
    let layers = lizard_wms::layer_uris(&xml, &url, client.authcfg())?;
    for layer in layers {
        println!("{}\n  {}", layer.title, layer.uri);
    }
    Ok(())
}
