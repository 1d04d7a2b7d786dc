//! Error types for WMS capabilities handling.

use thiserror::Error;

pub type WmsResult<T> = Result<T, WmsError>;

#[derive(Debug, Error)]
pub enum WmsError {
    /// The service answered with an exception report instead of layers.
    #[error("{0}")]
    ServiceException(String),

    #[error("XML parsing error at position {position}: {message}")]
    Xml { position: usize, message: String },

    #[error("Layer '{layer}' has no {element} element")]
    MissingElement { layer: String, element: &'static str },
}
