//! Error types for the Lizard downloader.

use thiserror::Error;

/// Result type alias using LizardError.
pub type LizardResult<T> = Result<T, LizardError>;

/// Primary error type for remote calls and download orchestration.
#[derive(Debug, Error)]
pub enum LizardError {
    // === Transport Errors ===
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("HTTP error {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    // === Remote Task Errors ===
    #[error("Task {task_id} failed, status was: {status}")]
    TaskFailed { task_id: String, status: String },

    #[error("Download of the {filename} failed due to the following error: {message}")]
    Download { filename: String, message: String },

    // === Input Errors ===
    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Invalid extent polygons: {0}")]
    InvalidPolygons(String),

    #[error("Invalid WKT geometry: {0}")]
    InvalidWkt(String),

    #[error("Invalid BBOX: {0}")]
    InvalidBbox(String),

    // === Local Processing Errors ===
    #[error("Mosaic build failed: {0}")]
    Mosaic(String),

    #[error("Raster clip failed: {0}")]
    Clip(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LizardError {
    /// Whether this error already carries a complete, user-facing message.
    ///
    /// Other errors get a generic prefix when reported as a run failure.
    pub fn is_download_error(&self) -> bool {
        matches!(
            self,
            LizardError::TaskFailed { .. } | LizardError::Download { .. }
        )
    }

    /// Message reported to the consumer when a worker run fails.
    pub fn failure_message(&self) -> String {
        if self.is_download_error() {
            self.to_string()
        } else {
            format!("Download failed due to the following error: {}", self)
        }
    }

    pub fn invalid_parameter(param: &str, message: impl Into<String>) -> Self {
        LizardError::InvalidParameter {
            param: param.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_failed_message() {
        let err = LizardError::TaskFailed {
            task_id: "abc".to_string(),
            status: "FAILURE".to_string(),
        };
        assert_eq!(err.to_string(), "Task abc failed, status was: FAILURE");
        assert_eq!(err.failure_message(), "Task abc failed, status was: FAILURE");
    }

    #[test]
    fn test_generic_failure_message_is_prefixed() {
        let err = LizardError::HttpStatus {
            status: 500,
            url: "https://example.com/api/v4/tasks/1/".to_string(),
        };
        assert_eq!(
            err.failure_message(),
            "Download failed due to the following error: HTTP error 500 for https://example.com/api/v4/tasks/1/"
        );
    }
}
