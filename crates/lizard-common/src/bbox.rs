//! Extent type and operations.

use serde::{Deserialize, Serialize};

use crate::error::{LizardError, LizardResult};

/// An axis-aligned bounding box in the units of a named projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Extent {
    /// Create a new extent from corner coordinates.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Swap corners where needed so that x1 <= x2 and y1 <= y2.
    pub fn normalized(&self) -> Self {
        Self {
            x1: self.x1.min(self.x2),
            y1: self.y1.min(self.y2),
            x2: self.x1.max(self.x2),
            y2: self.y1.max(self.y2),
        }
    }

    /// Parse a bbox parameter string: "x1,y1,x2,y2"
    pub fn from_bbox_string(s: &str) -> LizardResult<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(LizardError::InvalidBbox(format!(
                "{}. Expected 'x1,y1,x2,y2'",
                s
            )));
        }

        let mut coords = [0.0f64; 4];
        for (coord, part) in coords.iter_mut().zip(&parts) {
            *coord = part
                .parse()
                .map_err(|_| LizardError::InvalidBbox(format!("invalid number '{}'", part)))?;
        }

        Ok(Self::new(coords[0], coords[1], coords[2], coords[3]))
    }

    /// Format as the remote `bbox` query parameter.
    pub fn to_bbox_string(&self) -> String {
        format!("{},{},{},{}", self.x1, self.y1, self.x2, self.y2)
    }

    /// Closed WKT polygon ring around this extent.
    pub fn to_wkt_polygon(&self) -> String {
        format!(
            "POLYGON(({x1} {y1},{x2} {y1},{x2} {y2},{x1} {y2},{x1} {y1}))",
            x1 = self.x1,
            y1 = self.y1,
            x2 = self.x2,
            y2 = self.y2
        )
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// Clamp each side to `bounds`.
    ///
    /// Sides are clamped independently, so a request entirely outside of
    /// `bounds` yields an inverted extent rather than `None`.
    pub fn clamp_to(&self, bounds: &Extent) -> Extent {
        Extent {
            x1: self.x1.max(bounds.x1),
            y1: self.y1.max(bounds.y1),
            x2: self.x2.min(bounds.x2),
            y2: self.y2.min(bounds.y2),
        }
    }

    /// Smallest extent covering both.
    pub fn union(&self, other: &Extent) -> Extent {
        Extent {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }
}
