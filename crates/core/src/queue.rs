use crate::error::{IngestError, QueueError};
use crate::ingest::IngestionPipeline;
use crate::models::{IngestionJob, StoredDocument};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Work executed for each dequeued job.
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    async fn process(&self, job: &IngestionJob) -> Result<StoredDocument, IngestError>;
}

#[async_trait]
impl JobProcessor for IngestionPipeline {
    async fn process(&self, job: &IngestionJob) -> Result<StoredDocument, IngestError> {
        self.run(job).await
    }
}

pub type CompletionHandler = Arc<dyn Fn(&IngestionJob, &StoredDocument) + Send + Sync>;
pub type FailureHandler = Arc<dyn Fn(&IngestionJob, &IngestError) + Send + Sync>;

/// FIFO of ingestion jobs with completion and failure callbacks.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: IngestionJob) -> Result<(), QueueError>;
    fn on_complete(&self, handler: CompletionHandler);
    fn on_failed(&self, handler: FailureHandler);
}

#[derive(Default)]
struct Handlers {
    complete: Vec<CompletionHandler>,
    failed: Vec<FailureHandler>,
}

/// In-process queue drained by a single worker task, so at most one job
/// runs at a time. Failed jobs are reported, never retried.
pub struct InMemoryJobQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<IngestionJob>>>,
    handlers: Arc<RwLock<Handlers>>,
    pending: Arc<AtomicUsize>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl InMemoryJobQueue {
    /// Spawns the worker on the current tokio runtime.
    pub fn start(processor: Arc<dyn JobProcessor>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<IngestionJob>();
        let handlers = Arc::new(RwLock::new(Handlers::default()));
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_handlers = Arc::clone(&handlers);
        let worker_pending = Arc::clone(&pending);
        let worker = tokio::spawn(async move {
            info!("ingestion worker started");
            while let Some(job) = receiver.recv().await {
                let outcome = processor.process(&job).await;
                worker_pending.fetch_sub(1, Ordering::SeqCst);

                let (complete, failed) = {
                    let handlers = worker_handlers.read();
                    (handlers.complete.clone(), handlers.failed.clone())
                };
                match outcome {
                    Ok(document) => complete.iter().for_each(|handler| handler(&job, &document)),
                    Err(error) => failed.iter().for_each(|handler| handler(&job, &error)),
                }
            }
            info!("ingestion worker stopped");
        });

        Self {
            sender: Mutex::new(Some(sender)),
            handlers,
            pending,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Jobs enqueued but not yet finished, including the running one.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stops accepting jobs and waits for the queued ones to drain.
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(error) = worker.await {
                warn!(%error, "ingestion worker ended abnormally");
            }
        }
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&self, job: IngestionJob) -> Result<(), QueueError> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(QueueError::Closed)?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        info!(job_id = %job.job_id, file = %job.filename, "job queued");
        sender.send(job).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            QueueError::Closed
        })
    }

    fn on_complete(&self, handler: CompletionHandler) {
        self.handlers.write().complete.push(handler);
    }

    fn on_failed(&self, handler: FailureHandler) {
        self.handlers.write().failed.push(handler);
    }
}
