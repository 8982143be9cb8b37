use std::path::{Path, PathBuf};

use common::{
    error::AppError,
    storage::{
        layout::StorageLayout,
        registry::JobRegistry,
        types::build_job::{BuildJob, Platform},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::config::{BuildConfig, ProgressMilestones};
use crate::{stager::ArchiveStager, toolchain::ToolchainInvoker};

pub struct PipelineContext<'a> {
    pub job_id: String,
    pub platform: Platform,
    pub display_name: String,
    pub registry: &'a JobRegistry,
    pub layout: &'a StorageLayout,
    pub config: &'a BuildConfig,
    pub invoker: &'a ToolchainInvoker,
    pub stager: &'a ArchiveStager,
    pub cancel: &'a CancellationToken,
    pub milestones: ProgressMilestones,
    pub workspace: PathBuf,
    /// File produced by the build, waiting to be published.
    pub output: Option<PathBuf>,
    pub artifact: Option<PathBuf>,
}

impl<'a> PipelineContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job: &BuildJob,
        registry: &'a JobRegistry,
        layout: &'a StorageLayout,
        config: &'a BuildConfig,
        invoker: &'a ToolchainInvoker,
        stager: &'a ArchiveStager,
        cancel: &'a CancellationToken,
        workspace: PathBuf,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            platform: job.platform,
            display_name: job.display_name.clone(),
            registry,
            layout,
            config,
            invoker,
            stager,
            cancel,
            milestones: ProgressMilestones::for_platform(job.platform),
            workspace,
            output: None,
            artifact: None,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn output(&self) -> Result<&Path, AppError> {
        self.output
            .as_deref()
            .ok_or_else(|| AppError::InternalError("build output expected to be available".into()))
    }

    pub fn take_artifact(&mut self) -> Result<PathBuf, AppError> {
        self.artifact.take().ok_or_else(|| {
            AppError::InternalError("published artifact expected to be available".into())
        })
    }

    /// Publishes a milestone to the registry.
    pub async fn report(&self, progress: u8, step: &str) -> Result<(), AppError> {
        self.registry
            .update(&self.job_id, |job| job.record_progress(progress, step))
            .await?;
        debug!(job_id = %self.job_id, progress, step, "build progress");
        Ok(())
    }

    /// Fails fast once shutdown has been requested.
    pub fn ensure_active(&self, stage: &str) -> Result<(), AppError> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled(format!(
                "build interrupted before {stage}"
            )));
        }
        Ok(())
    }

    pub fn abort(&self, err: AppError) -> AppError {
        error!(
            job_id = %self.job_id,
            platform = %self.platform,
            error = %err,
            "build pipeline aborted"
        );
        err
    }
}
