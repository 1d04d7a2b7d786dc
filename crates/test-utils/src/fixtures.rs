//! Common test fixtures mirroring Lizard API responses.
//!
//! Fixtures are plain `serde_json::Value`s so that any crate can
//! deserialize them into its own types.

use serde_json::{json, Value};

/// Common extents in RD New (EPSG:28992) meters.
pub mod extent {
    /// 100 x 100 km square at the origin.
    pub const SQUARE_100KM: (f64, f64, f64, f64) = (0.0, 0.0, 100_000.0, 100_000.0);

    /// A polder-sized area around Amsterdam.
    pub const AMSTERDAM: (f64, f64, f64, f64) = (110_000.0, 476_000.0, 135_000.0, 497_000.0);

    /// Tiny 40 x 40 m area, 4 x 4 pixels at 10 m.
    pub const TINY: (f64, f64, f64, f64) = (0.0, 0.0, 40.0, 40.0);

    /// Degenerate extent (single point).
    pub const POINT: (f64, f64, f64, f64) = (5.0, 5.0, 5.0, 5.0);
}

/// Common projection identifiers.
pub mod crs {
    /// Dutch national grid
    pub const RD_NEW: &str = "EPSG:28992";

    /// WGS84 geographic
    pub const EPSG_4326: &str = "EPSG:4326";
}

pub const SCENARIO_UUID: &str = "0f5a7d2e-4a1b-4d67-9bb2-0c1f3c1e9a10";
pub const RASTER_UUID: &str = "6e0c2b57-9b8e-4a8f-a3f4-1f2d3c4b5a69";

/// Scenario instance as returned by `GET scenarios/{uuid}/`.
pub fn scenario_json(name: &str, extent: (f64, f64, f64, f64), pixel_size: f64) -> Value {
    json!({
        "url": format!("https://demo.lizard.net/api/v4/scenarios/{}/", SCENARIO_UUID),
        "uuid": SCENARIO_UUID,
        "name": name,
        "origin_x": extent.0,
        "origin_y": extent.1,
        "upper_bound_x": extent.2,
        "upper_bound_y": extent.3,
        "pixelsize_x": pixel_size,
        "pixelsize_y": -pixel_size,
        "projection": crs::RD_NEW,
        "model_identifier": "1234",
        "model_name": "Polder model",
        "organisation": { "name": "Nelen & Schuurmans", "uuid": "a1b2" },
        "supplier": "jdoe",
        "created": "2024-01-15T12:00:00Z",
    })
}

/// Raster instance as returned by `GET rasters/{uuid}/`.
pub fn raster_json(name: &str, extent: (f64, f64, f64, f64), pixel_size: f64, temporal: bool) -> Value {
    json!({
        "url": format!("https://demo.lizard.net/api/v4/rasters/{}/", RASTER_UUID),
        "uuid": RASTER_UUID,
        "name": name,
        "description": "Digital elevation model",
        "origin_x": extent.0,
        "origin_y": extent.1,
        "upper_bound_x": extent.2,
        "upper_bound_y": extent.3,
        "pixelsize_x": pixel_size,
        "pixelsize_y": -pixel_size,
        "projection": crs::RD_NEW,
        "temporal": temporal,
        "organisation": { "name": "Nelen & Schuurmans" },
        "created": "2023-06-01T08:30:00.123456Z",
        "last_modified": "2024-02-01T10:00:00Z",
    })
}

/// A raw (attachment) scenario result.
pub fn raw_result_json(id: i64, name: &str, filename: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "code": format!("raw-{}", id),
        "attachment_url": format!(
            "https://demo.lizard.net/api/v4/scenarios/{}/results/{}/{}",
            SCENARIO_UUID, id, filename
        ),
        "raster": null,
    })
}

/// A raster scenario result pointing at [`RASTER_UUID`].
pub fn raster_result_json(id: i64, name: &str, code: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "code": code,
        "attachment_url": null,
        "raster": format!("https://demo.lizard.net/api/v4/rasters/{}/", RASTER_UUID),
    })
}

/// Paginated list response wrapper.
pub fn page_json(count: u64, results: Vec<Value>) -> Value {
    json!({
        "count": count,
        "next": null,
        "previous": null,
        "results": results,
    })
}

/// Task resource as returned by `GET tasks/{id}/`.
pub fn task_json(task_id: &str, status: &str, result: Option<&str>) -> Value {
    json!({
        "uuid": task_id,
        "status": status,
        "result": result,
    })
}
