//! Remote task status tracking.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of an asynchronous task as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Started,
    Retry,
    Unknown,
    Success,
    /// Any status outside the known set, kept verbatim.
    Other(String),
}

impl TaskStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "PENDING" => Self::Pending,
            "STARTED" => Self::Started,
            "RETRY" => Self::Retry,
            "UNKNOWN" => Self::Unknown,
            "SUCCESS" => Self::Success,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Retry => "RETRY",
            Self::Unknown => "UNKNOWN",
            Self::Success => "SUCCESS",
            Self::Other(s) => s,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Statuses that mean "keep waiting".
    ///
    /// UNKNOWN belongs here: the service reports it for tasks it has not
    /// picked up yet.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Started | Self::Retry | Self::Unknown
        )
    }

    /// Terminal status that is not a success.
    pub fn is_failure(&self) -> bool {
        !self.is_success() && !self.is_in_progress()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// A submitted remote task and the file its result will be saved as.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTask {
    pub task_id: String,
    pub filename: String,
}

impl RemoteTask {
    pub fn new(task_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            filename: filename.into(),
        }
    }
}
