use crate::planner::ExecutionPlan;
use async_trait::async_trait;
use pipecore::{BrandId, PipelineError, PipelineId, RunId};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Background work for one Pending run.
///
/// The plan is computed when the run is created, so later edits to the
/// pipeline do not change what the worker executes.
#[derive(Debug, Clone)]
pub struct RunJob {
    pub run_id: RunId,
    pub pipeline_id: PipelineId,
    pub brand_id: BrandId,
    pub plan: ExecutionPlan,
}

/// Hands long executions to a background worker.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn enqueue(&self, job: RunJob) -> Result<(), PipelineError>;
}

/// Processes jobs pulled off the queue.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: RunJob);

    /// Called for every job still queued when the worker stops.
    async fn abandon(&self, job: RunJob, reason: &str);
}

const WORKER_STOPPED: &str = "worker stopped";

/// In-process dispatcher backed by an unbounded tokio channel.
pub struct QueueDispatcher {
    sender: mpsc::UnboundedSender<RunJob>,
}

/// Receiving half of [`QueueDispatcher`]; turned into a worker with [`JobQueue::spawn_worker`].
pub struct JobQueue {
    receiver: mpsc::UnboundedReceiver<RunJob>,
}

impl QueueDispatcher {
    pub fn channel() -> (Self, JobQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, JobQueue { receiver })
    }
}

#[async_trait]
impl JobDispatcher for QueueDispatcher {
    async fn enqueue(&self, job: RunJob) -> Result<(), PipelineError> {
        let run_id = job.run_id;
        self.sender
            .send(job)
            .map_err(|_| PipelineError::Dispatch("worker queue is closed".to_string()))?;
        tracing::debug!(run_id = %run_id, "Run queued for background execution");
        Ok(())
    }
}

impl JobQueue {
    /// Drain the queue until `shutdown` fires, running up to
    /// `max_concurrent` jobs at once, each on its own task.
    ///
    /// On shutdown, jobs not yet started are handed to
    /// [`JobHandler::abandon`] and the worker returns once the jobs
    /// already executing have finished.
    pub fn spawn_worker<H: JobHandler>(
        mut self,
        handler: Arc<H>,
        max_concurrent: usize,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let max_concurrent = max_concurrent.max(1);
        let semaphore = Arc::new(Semaphore::new(max_concurrent));

        tokio::spawn(async move {
            tracing::info!(max_concurrent, "Run worker started");
            loop {
                let job = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    job = self.receiver.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };

                let permit = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        handler.abandon(job, WORKER_STOPPED).await;
                        break;
                    }
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            handler.abandon(job, WORKER_STOPPED).await;
                            break;
                        }
                    },
                };

                let handler = handler.clone();
                tokio::spawn(async move {
                    handler.handle(job).await;
                    drop(permit);
                });
            }

            self.receiver.close();
            let mut abandoned = 0usize;
            while let Ok(job) = self.receiver.try_recv() {
                handler.abandon(job, WORKER_STOPPED).await;
                abandoned += 1;
            }
            if abandoned > 0 {
                tracing::warn!(abandoned, "Queued runs abandoned at shutdown");
            }

            // Every permit back means every in-flight job has returned.
            let _ = semaphore.acquire_many(max_concurrent as u32).await;
            tracing::info!("Run worker stopped");
        })
    }
}
