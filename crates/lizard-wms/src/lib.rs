//! WMS support for previewing Lizard scenarios and rasters.
//!
//! Lizard publishes one WMS endpoint per scenario (`scenario_<uuid>`) and
//! per raster (`raster_<uuid>`). The capabilities document of such an
//! endpoint lists a group layer followed by the actual layers, which are
//! turned into data source URIs here.

pub mod capabilities;
pub mod error;

pub use capabilities::{capabilities_url, layer_uris, WmsLayerUri};
pub use error::{WmsError, WmsResult};
