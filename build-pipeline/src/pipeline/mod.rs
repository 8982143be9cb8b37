mod config;
mod context;
mod profile;
mod stages;
mod state;

pub use config::{BuildConfig, BuildTuning, MobileProfile, ProgressMilestones};
pub use profile::{DEBUG_PACKAGE_PATH, NATIVE_BUILD_STEP, PACKAGING_CONFIG_FILE};

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{layout::StorageLayout, registry::JobRegistry, types::build_job::BuildJob},
};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use self::{
    context::PipelineContext,
    stages::{partial_path, prepare_project, publish_artifact, run_toolchain, stage_archive},
    state::ready,
};
use crate::{
    stager::ArchiveStager,
    toolchain::{StepRunner, ToolchainInvoker},
};

pub use self::stages::{STEP_BUILDING, STEP_PREPARING, STEP_PUBLISHING, STEP_STAGING};

/// Everything the pipeline needs to pick up a registered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub job_id: String,
    /// Persisted upload, owned by the job from here on.
    pub upload_path: PathBuf,
    /// File name as the client supplied it.
    pub declared_name: String,
}

#[allow(clippy::module_name_repetitions)]
pub struct BuildPipeline {
    registry: JobRegistry,
    layout: StorageLayout,
    config: BuildConfig,
    invoker: ToolchainInvoker,
    stager: ArchiveStager,
}

impl BuildPipeline {
    pub fn new(
        registry: JobRegistry,
        layout: StorageLayout,
        config: BuildConfig,
        runner: Arc<dyn StepRunner>,
    ) -> Self {
        let stager = ArchiveStager::new(config.tuning.max_extracted_bytes);
        Self {
            registry,
            layout,
            config,
            invoker: ToolchainInvoker::new(runner),
            stager,
        }
    }

    /// Runs one job to a terminal state. The returned error has already been
    /// recorded on the job.
    #[tracing::instrument(skip_all, fields(job_id = %request.job_id))]
    pub async fn process_job(
        &self,
        request: BuildRequest,
        cancel: CancellationToken,
    ) -> Result<(), AppError> {
        let job = self
            .registry
            .update(&request.job_id, |job| {
                let staging = ProgressMilestones::for_platform(job.platform).staging;
                job.mark_processing(staging, STEP_STAGING)?;
                Ok(job.clone())
            })
            .await?;

        let Some(workspace) = self.layout.workspace_path(&job.id) else {
            let err = AppError::InternalError(format!("invalid workspace key {}", job.id));
            self.record_failure(&job, &request, None, &err).await;
            return Err(err);
        };

        let started = Instant::now();
        match self
            .drive_pipeline(&job, &request, workspace.clone(), &cancel)
            .await
        {
            Ok(artifact) => {
                self.registry
                    .update(&job.id, |job| job.mark_completed(artifact))
                    .await?;
                info!(
                    job_id = %job.id,
                    platform = %job.platform,
                    elapsed_ms = duration_millis(started.elapsed()),
                    "build completed"
                );
                remove_dir_best_effort(&workspace).await;
                remove_file_best_effort(&request.upload_path).await;
                Ok(())
            }
            Err(err) => {
                self.record_failure(&job, &request, Some(&workspace), &err)
                    .await;
                warn!(
                    job_id = %job.id,
                    platform = %job.platform,
                    elapsed_ms = duration_millis(started.elapsed()),
                    error = %err,
                    "build failed"
                );
                Err(err)
            }
        }
    }

    async fn drive_pipeline(
        &self,
        job: &BuildJob,
        request: &BuildRequest,
        workspace: PathBuf,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, AppError> {
        let mut ctx = PipelineContext::new(
            job,
            &self.registry,
            &self.layout,
            &self.config,
            &self.invoker,
            &self.stager,
            cancel,
            workspace,
        );

        let machine = ready();
        let machine = stage_archive(machine, &mut ctx, &request.upload_path, &request.declared_name)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = prepare_project(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = run_toolchain(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let _machine = publish_artifact(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;

        ctx.take_artifact()
    }

    async fn record_failure(
        &self,
        job: &BuildJob,
        request: &BuildRequest,
        workspace: Option<&Path>,
        err: &AppError,
    ) {
        let detail = err.to_string();
        if let Err(record_err) = self
            .registry
            .update(&job.id, |job| job.mark_failed(detail))
            .await
        {
            warn!(job_id = %job.id, error = %record_err, "failed to record build failure");
        }

        if let Some(target) = self.layout.artifact_path(&job.id, job.platform) {
            remove_file_best_effort(&partial_path(&target)).await;
        }

        if !self.config.tuning.preserve_failed_workspaces {
            if let Some(workspace) = workspace {
                remove_dir_best_effort(workspace).await;
            }
            remove_file_best_effort(&request.upload_path).await;
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn remove_dir_best_effort(path: &Path) {
    match fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove workspace"),
    }
}

async fn remove_file_best_effort(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove file"),
    }
}
