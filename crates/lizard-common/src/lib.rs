//! Common types shared by the Lizard downloader crates.

pub mod bbox;
pub mod error;
pub mod item;
pub mod polygon;
pub mod task;
pub mod tiling;

pub use bbox::Extent;
pub use error::{LizardError, LizardResult};
pub use item::{DownloadItem, ItemKind, ItemRef, Raster, Scenario, ScenarioResult};
pub use polygon::{NamedExtentPolygon, NamedExtentPolygons, PolygonKey};
pub use task::{RemoteTask, TaskStatus};
pub use tiling::{
    compute_raster_tiles, compute_scenario_tiles, compute_tiles, TileGrid, DEFAULT_MAX_PIXEL_COUNT,
};
