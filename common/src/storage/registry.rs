use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    error::AppError,
    storage::types::build_job::{BuildJob, Platform},
};

/// Process-wide job table. The map lock serializes structural changes;
/// field updates on a job come only from the task that owns it.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, BuildJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a queued job and returns a snapshot of it.
    pub async fn create(
        &self,
        platform: Platform,
        display_name: String,
        size_bytes: u64,
    ) -> BuildJob {
        let job = BuildJob::new(platform, display_name, size_bytes);
        self.jobs.write().await.insert(job.id.clone(), job.clone());

        debug!(job_id = %job.id, %platform, size_bytes, "job registered");
        job
    }

    pub async fn get(&self, job_id: &str) -> Result<BuildJob, AppError> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| not_found(job_id))
    }

    /// All jobs, oldest first.
    pub async fn list(&self) -> Vec<BuildJob> {
        let mut jobs: Vec<BuildJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Applies `mutator` to the job. The job is left untouched when the
    /// mutator returns an error.
    pub async fn update<F, T>(&self, job_id: &str, mutator: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut BuildJob) -> Result<T, AppError>,
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(job_id).ok_or_else(|| not_found(job_id))?;

        let mut draft = job.clone();
        let outcome = mutator(&mut draft)?;
        *job = draft;
        Ok(outcome)
    }

    /// Removes terminal jobs that finished before `cutoff` and returns them.
    pub async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Vec<BuildJob> {
        let mut jobs = self.jobs.write().await;
        let expired: Vec<String> = jobs
            .values()
            .filter(|job| job.is_terminal() && job.finished_at.is_some_and(|at| at < cutoff))
            .map(|job| job.id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|job_id| jobs.remove(job_id))
            .collect()
    }
}

fn not_found(job_id: &str) -> AppError {
    AppError::NotFound(format!("build {job_id}"))
}
