//! Bulk download of Lizard scenario results and rasters.
//!
//! Large raster exports are split into tiles within the service's pixel
//! budget, submitted as asynchronous tasks, polled to completion,
//! downloaded and recombined into a VRT mosaic.

pub mod client;
pub mod clip;
pub mod config;
pub mod download;
pub mod events;
pub mod mosaic;
pub mod poller;
pub mod pool;
pub mod preflight;
pub mod worker;

pub use client::{LizardClient, RasterExtraction, RemoteTaskClient, SearchPage};
pub use clip::{Cutline, GdalWarpClipper, RasterClipper};
pub use config::DownloaderConfig;
pub use events::{DownloadEvent, EventReceiver, EventSender};
pub use poller::poll_until_resolved;
pub use pool::{DownloadJob, DownloaderPool, JobHandle};
pub use preflight::ensure_writable;
pub use worker::{
    select_results, DownloadSettings, RasterDownloadRequest, RasterDownloader,
    ScenarioDownloadRequest, ScenarioItemsDownloader,
};
