//! Test support for the downloader workspace.
//!
//! [`fixtures`] holds JSON bodies shaped like the Lizard REST API and
//! [`generators`] writes small georeferenced GeoTIFF tiles. Both are
//! re-exported at the crate root:
//!
//! ```ignore
//! use test_utils::{extent, scenario_json, write_geotiff, GeoTiffSpec};
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::*;
pub use generators::*;

/// Assert that two numbers differ by at most `epsilon`.
///
/// ```ignore
/// test_utils::assert_approx_eq!(2.5000001, 2.5, 1e-6);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let (left, right, epsilon) = ($left as f64, $right as f64, $epsilon as f64);
        assert!(
            (left - right).abs() <= epsilon,
            "assertion failed: {} and {} differ by more than {}",
            left,
            right,
            epsilon
        );
    }};
}

/// [`assert_approx_eq!`] on each corner of two `(x1, y1, x2, y2)` extents.
#[macro_export]
macro_rules! assert_extent_approx_eq {
    (($ax1:expr, $ay1:expr, $ax2:expr, $ay2:expr), ($bx1:expr, $by1:expr, $bx2:expr, $by2:expr), $epsilon:expr) => {{
        $crate::assert_approx_eq!($ax1, $bx1, $epsilon);
        $crate::assert_approx_eq!($ay1, $by1, $epsilon);
        $crate::assert_approx_eq!($ax2, $bx2, $epsilon);
        $crate::assert_approx_eq!($ay2, $by2, $epsilon);
    }};
}
