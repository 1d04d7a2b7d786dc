//! Messages from download workers to their consumer.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::mpsc;

use lizard_common::ItemRef;

/// Progress, completion or failure of one worker run.
///
/// Every run emits zero or more `Progress` events followed by exactly one
/// `Finished` or `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    Progress {
        item: ItemRef,
        message: Option<String>,
        current: u32,
        total: u32,
    },
    Finished {
        item: ItemRef,
        /// File name to local path of every produced file.
        files: BTreeMap<String, PathBuf>,
        message: String,
    },
    Failed {
        item: ItemRef,
        message: String,
    },
}

impl DownloadEvent {
    pub fn item(&self) -> &ItemRef {
        match self {
            DownloadEvent::Progress { item, .. }
            | DownloadEvent::Finished { item, .. }
            | DownloadEvent::Failed { item, .. } => item,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadEvent::Progress { .. })
    }
}

pub type EventSender = mpsc::UnboundedSender<DownloadEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<DownloadEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
