//! Named extent polygons used to request and clip raster downloads.

use serde::{Deserialize, Serialize};

use crate::bbox::Extent;
use crate::error::{LizardError, LizardResult};

/// Feature id and display name identifying one polygon of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolygonKey {
    pub fid: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedExtentPolygon {
    #[serde(flatten)]
    pub key: PolygonKey,
    /// Polygon or multipolygon in the target projection.
    pub wkt: String,
}

impl NamedExtentPolygon {
    pub fn new(fid: i64, name: impl Into<String>, wkt: impl Into<String>) -> Self {
        Self {
            key: PolygonKey {
                fid,
                name: name.into(),
            },
            wkt: wkt.into(),
        }
    }

    /// Polygon covering a plain extent, with no name.
    pub fn from_extent(extent: &Extent) -> Self {
        Self::new(0, "", extent.normalized().to_wkt_polygon())
    }

    pub fn is_multipolygon(&self) -> bool {
        self.wkt.trim_start().to_lowercase().starts_with("multi")
    }

    pub fn bounding_box(&self) -> LizardResult<Extent> {
        wkt_bounding_box(&self.wkt)
    }

    /// Output name for rasters cut by this polygon.
    pub fn output_name(&self, raster_name: &str) -> String {
        if self.key.name.is_empty() {
            raster_name.to_string()
        } else {
            format!("{} {} {}", raster_name, self.key.fid, self.key.name)
        }
    }
}

/// Validated, ordered set of polygons for one raster download.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedExtentPolygons(Vec<NamedExtentPolygon>);

impl NamedExtentPolygons {
    /// Reject empty sets and duplicate keys. With more than one polygon,
    /// every polygon also needs a distinct non-empty name.
    pub fn new(polygons: Vec<NamedExtentPolygon>) -> LizardResult<Self> {
        if polygons.is_empty() {
            return Err(LizardError::InvalidPolygons(
                "there are no clip features defined".to_string(),
            ));
        }

        if polygons.len() > 1 && polygons.iter().any(|p| p.key.name.is_empty()) {
            return Err(LizardError::InvalidPolygons(
                "cannot download rasters for multiple polygons if name field is not specified"
                    .to_string(),
            ));
        }

        // Output names embed both fid and name, so unique keys also mean
        // unique file names.
        let mut seen = std::collections::HashSet::new();
        for polygon in &polygons {
            if !seen.insert(&polygon.key) {
                return Err(LizardError::InvalidPolygons(format!(
                    "duplicate polygon key ({}, '{}')",
                    polygon.key.fid, polygon.key.name
                )));
            }
        }

        Ok(Self(polygons))
    }

    pub fn single(polygon: NamedExtentPolygon) -> Self {
        Self(vec![polygon])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NamedExtentPolygon> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a NamedExtentPolygons {
    type Item = &'a NamedExtentPolygon;
    type IntoIter = std::slice::Iter<'a, NamedExtentPolygon>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Bounding box of every coordinate in a WKT geometry.
///
/// Only the first two ordinates of each position are used, so Z/M
/// geometries are accepted.
pub fn wkt_bounding_box(wkt: &str) -> LizardResult<Extent> {
    let body = match wkt.find('(') {
        Some(start) => &wkt[start..],
        None => return Err(LizardError::InvalidWkt(wkt.to_string())),
    };

    let cleaned: String = body
        .chars()
        .map(|c| if c == '(' || c == ')' { ' ' } else { c })
        .collect();

    let mut extent: Option<Extent> = None;
    for position in cleaned.split(',') {
        let mut ordinates = position.split_whitespace();
        let (x, y) = match (ordinates.next(), ordinates.next()) {
            (Some(x), Some(y)) => (x, y),
            (None, None) => continue,
            _ => return Err(LizardError::InvalidWkt(format!("incomplete position '{}'", position.trim()))),
        };
        let x: f64 = x
            .parse()
            .map_err(|_| LizardError::InvalidWkt(format!("invalid ordinate '{}'", x)))?;
        let y: f64 = y
            .parse()
            .map_err(|_| LizardError::InvalidWkt(format!("invalid ordinate '{}'", y)))?;

        let point = Extent::new(x, y, x, y);
        extent = Some(match extent {
            Some(e) => e.union(&point),
            None => point,
        });
    }

    extent.ok_or_else(|| LizardError::InvalidWkt(format!("no coordinates in '{}'", wkt)))
}
