//! Bounded pool that runs download jobs in submission order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use lizard_common::ItemRef;

/// A unit of work for the pool.
///
/// `run` reports its own outcome, so the pool only learns that it ended.
#[async_trait]
pub trait DownloadJob: Send + 'static {
    fn item(&self) -> &ItemRef;

    async fn run(self);
}

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct QueuedJob {
    item: ItemRef,
    future: JobFuture,
    done: oneshot::Sender<()>,
}

/// Handle to a job started on a [`DownloaderPool`].
#[derive(Debug)]
pub struct JobHandle {
    item: ItemRef,
    done: oneshot::Receiver<()>,
}

impl JobHandle {
    pub fn item(&self) -> &ItemRef {
        &self.item
    }

    /// Wait until the job has run to completion.
    pub async fn finished(self) {
        // A dropped sender means the job task panicked or the runtime is
        // shutting down; either way it will not run any further.
        self.done.await.ok();
    }
}

/// Runs at most `max_concurrent` jobs at a time, strictly FIFO.
///
/// Must be created inside a Tokio runtime. Jobs already queued keep
/// running after the pool is dropped.
pub struct DownloaderPool {
    queue: mpsc::UnboundedSender<QueuedJob>,
    max_concurrent: usize,
    _dispatcher: JoinHandle<()>,
}

impl DownloaderPool {
    /// A limit of zero is raised to one.
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let (queue, jobs) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let dispatcher = tokio::spawn(dispatch(jobs, semaphore));
        Self {
            queue,
            max_concurrent,
            _dispatcher: dispatcher,
        }
    }

    /// The pool used by the command line: one download at a time.
    pub fn single() -> Self {
        Self::new(1)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Queue `job`; it starts once every earlier job holds or has released
    /// a slot.
    pub fn start<J: DownloadJob>(&self, job: J) -> JobHandle {
        let item = job.item().clone();
        let (done_tx, done_rx) = oneshot::channel();
        let queued = QueuedJob {
            item: item.clone(),
            future: job.run(),
            done: done_tx,
        };
        debug!(kind = %item.kind, item = %item.name, "Job queued");
        if let Err(mpsc::error::SendError(queued)) = self.queue.send(queued) {
            // The dispatcher is gone; run the job directly.
            tokio::spawn(run_job(queued));
        }
        JobHandle {
            item,
            done: done_rx,
        }
    }
}

async fn dispatch(mut jobs: mpsc::UnboundedReceiver<QueuedJob>, semaphore: Arc<Semaphore>) {
    while let Some(queued) = jobs.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        tokio::spawn(async move {
            let _permit = permit;
            run_job(queued).await;
        });
    }
}

async fn run_job(queued: QueuedJob) {
    info!(kind = %queued.item.kind, item = %queued.item.name, "Job started");
    queued.future.await;
    debug!(item = %queued.item.name, "Job ended");
    queued.done.send(()).ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use lizard_common::ItemKind;

    struct RecordingJob {
        item: ItemRef,
        log: Arc<Mutex<Vec<String>>>,
        delay: Duration,
    }

    impl RecordingJob {
        fn new(name: &str, log: &Arc<Mutex<Vec<String>>>, delay_ms: u64) -> Self {
            Self {
                item: ItemRef {
                    kind: ItemKind::Scenario,
                    uuid: name.to_string(),
                    name: name.to_string(),
                },
                log: log.clone(),
                delay: Duration::from_millis(delay_ms),
            }
        }
    }

    #[async_trait]
    impl DownloadJob for RecordingJob {
        fn item(&self) -> &ItemRef {
            &self.item
        }

        async fn run(self) {
            self.log.lock().unwrap().push(format!("start {}", self.item.name));
            tokio::time::sleep(self.delay).await;
            self.log.lock().unwrap().push(format!("end {}", self.item.name));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_slot_runs_jobs_one_after_another() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pool = DownloaderPool::single();

        let slow = pool.start(RecordingJob::new("a", &log, 50));
        let fast = pool.start(RecordingJob::new("b", &log, 1));
        slow.finished().await;
        fast.finished().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start a", "end a", "start b", "end b"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_slots_overlap() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pool = DownloaderPool::new(2);

        let slow = pool.start(RecordingJob::new("a", &log, 50));
        let fast = pool.start(RecordingJob::new("b", &log, 1));
        assert_eq!(fast.item().name, "b");
        slow.finished().await;
        fast.finished().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start a", "start b", "end b", "end a"]
        );
    }

    #[tokio::test]
    async fn test_zero_limit_is_one() {
        assert_eq!(DownloaderPool::new(0).max_concurrent(), 1);
    }
}
