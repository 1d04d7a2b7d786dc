//! Step based progress accounting for a worker run.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::debug;

use lizard_common::ItemRef;

use crate::events::{DownloadEvent, EventSender};

/// Progress is reported on a fixed scale of this many units.
pub const TOTAL_PROGRESS: u32 = 100;

/// Splits [`TOTAL_PROGRESS`] evenly over a number of steps.
///
/// A report carries the progress reached *before* its own step, so the
/// first step of a run reports 0.
#[derive(Debug)]
pub struct ProgressReporter {
    item: ItemRef,
    events: EventSender,
    current_step: u32,
    percentage_per_step: f64,
}

impl ProgressReporter {
    /// `number_of_steps` of zero is treated as one step.
    pub fn new(item: ItemRef, events: EventSender, number_of_steps: u32) -> Self {
        Self {
            item,
            events,
            current_step: 0,
            percentage_per_step: TOTAL_PROGRESS as f64 / number_of_steps.max(1) as f64,
        }
    }

    pub fn item(&self) -> &ItemRef {
        &self.item
    }

    pub fn current_progress(&self) -> u32 {
        (self.current_step as f64 * self.percentage_per_step).floor() as u32
    }

    /// Emit the current progress, then advance one step if `increase`.
    pub fn report(&mut self, message: Option<String>, increase: bool) {
        let current = self.current_progress();
        if increase {
            self.current_step += 1;
        }
        self.send(DownloadEvent::Progress {
            item: self.item.clone(),
            message,
            current,
            total: TOTAL_PROGRESS,
        });
    }

    pub fn finished(&self, files: BTreeMap<String, PathBuf>, message: String) {
        self.send(DownloadEvent::Finished {
            item: self.item.clone(),
            files,
            message,
        });
    }

    pub fn failed(&self, message: String) {
        self.send(DownloadEvent::Failed {
            item: self.item.clone(),
            message,
        });
    }

    fn send(&self, event: DownloadEvent) {
        if self.events.send(event).is_err() {
            debug!(item = %self.item.name, "Event receiver dropped");
        }
    }
}
