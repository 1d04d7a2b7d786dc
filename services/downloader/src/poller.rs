//! Polling of remote tasks until all succeed or one fails.

use std::time::Duration;

use metrics::counter;
use tracing::{debug, info, instrument, warn};

use lizard_common::{LizardError, LizardResult};

use crate::client::RemoteTaskClient;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll every id until all report SUCCESS.
///
/// Each sweep queries the unresolved ids in order. In-progress statuses
/// keep a task waiting, any other status ends the poll with
/// [`LizardError::TaskFailed`]. The poller sleeps `interval` only between
/// sweeps that left something unresolved. There is no deadline.
#[instrument(skip(client, task_ids), fields(tasks = task_ids.len()))]
pub async fn poll_until_resolved<C>(
    client: &C,
    task_ids: &[String],
    interval: Duration,
) -> LizardResult<()>
where
    C: RemoteTaskClient + ?Sized,
{
    let mut resolved = vec![false; task_ids.len()];
    let mut sweeps = 0u64;

    loop {
        sweeps += 1;
        for (task_id, done) in task_ids.iter().zip(resolved.iter_mut()) {
            if *done {
                continue;
            }
            let status = client.get_task_status(task_id).await?;
            if status.is_success() {
                *done = true;
            } else if status.is_failure() {
                counter!("lizard_tasks_failed_total").increment(1);
                warn!(task_id = %task_id, status = %status, "Remote task failed");
                return Err(LizardError::TaskFailed {
                    task_id: task_id.clone(),
                    status: status.to_string(),
                });
            }
        }

        let pending = resolved.iter().filter(|done| !**done).count();
        debug!(sweep = sweeps, pending = pending, "Task status sweep");
        if pending == 0 {
            info!(sweeps = sweeps, "All remote tasks finished");
            return Ok(());
        }

        tokio::time::sleep(interval).await;
    }
}
