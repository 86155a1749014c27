//! Status of upload jobs, fed by the ingestion queue callbacks.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pdf_buddy_core::{IngestError, IngestionJob, JobQueue, StoredDocument};
use serde::Serialize;
use tracing::{error, info};

const MAX_FINISHED_JOBS: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    pub filename: String,
    pub status: JobStatus,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct JobTracker {
    jobs: RwLock<HashMap<String, JobRecord>>,
}

impl JobTracker {
    /// Registers completion and failure callbacks on `queue`.
    pub fn attach(self: &Arc<Self>, queue: &dyn JobQueue) {
        let tracker = Arc::clone(self);
        queue.on_complete(Arc::new(move |job: &IngestionJob, document: &StoredDocument| {
            tracker.complete(job, document)
        }));
        let tracker = Arc::clone(self);
        queue.on_failed(Arc::new(move |job: &IngestionJob, failure: &IngestError| {
            tracker.fail(job, &failure.to_string())
        }));
    }

    pub fn queued(&self, job: &IngestionJob) {
        self.jobs.write().insert(
            job.job_id.clone(),
            JobRecord {
                job_id: job.job_id.clone(),
                filename: job.filename.clone(),
                status: JobStatus::Queued,
                uploaded_at: job.uploaded_at,
                document_id: None,
                error: None,
                finished_at: None,
            },
        );
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.read().get(job_id).cloned()
    }

    fn complete(&self, job: &IngestionJob, document: &StoredDocument) {
        info!(job_id = %job.job_id, document = %document.id, "job completed");
        self.finish(job, JobStatus::Completed, Some(document.id.clone()), None);
    }

    pub fn fail(&self, job: &IngestionJob, failure: &str) {
        error!(job_id = %job.job_id, file = %job.filename, error = failure, "job failed");
        self.finish(job, JobStatus::Failed, None, Some(failure.to_string()));
    }

    fn finish(
        &self,
        job: &IngestionJob,
        status: JobStatus,
        document_id: Option<String>,
        failure: Option<String>,
    ) {
        let mut jobs = self.jobs.write();
        let record = jobs.entry(job.job_id.clone()).or_insert_with(|| JobRecord {
            job_id: job.job_id.clone(),
            filename: job.filename.clone(),
            status,
            uploaded_at: job.uploaded_at,
            document_id: None,
            error: None,
            finished_at: None,
        });
        record.status = status;
        record.document_id = document_id;
        record.error = failure;
        record.finished_at = Some(Utc::now());

        prune_finished(&mut jobs);
    }
}

fn prune_finished(jobs: &mut HashMap<String, JobRecord>) {
    let mut finished = jobs
        .values()
        .filter_map(|job| job.finished_at.map(|at| (at, job.job_id.clone())))
        .collect::<Vec<_>>();
    if finished.len() <= MAX_FINISHED_JOBS {
        return;
    }

    finished.sort();
    let excess = finished.len() - MAX_FINISHED_JOBS;
    for (_, job_id) in finished.into_iter().take(excess) {
        jobs.remove(&job_id);
    }
}
