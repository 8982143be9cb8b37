use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use common::{error::AppError, storage::types::build_job::Platform};
use state_machines::core::GuardError;
use tokio::fs;
use tracing::{debug, info, instrument};

use super::{
    context::PipelineContext,
    profile::{
        mirror_web_assets, mobile_toolchain_steps, repack_directory, write_packaging_config,
        DEBUG_PACKAGE_PATH, NATIVE_BUILD_STEP,
    },
    state::{BuildMachine, Built, Prepared, Published, Ready, Staged},
};

pub const STEP_STAGING: &str = "staging";
pub const STEP_PREPARING: &str = "preparing";
pub const STEP_BUILDING: &str = "building";
pub const STEP_PUBLISHING: &str = "publishing";

/// Step ids reported when the in-process packaging work fails.
pub const STEP_DESKTOP_REPACK: &str = "desktop-repack";
pub const STEP_PUBLISH_ARTIFACT: &str = "publish-artifact";

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, platform = %ctx.platform)
)]
pub async fn stage_archive(
    machine: BuildMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
    upload: &Path,
    declared_name: &str,
) -> Result<BuildMachine<(), Staged>, AppError> {
    ctx.ensure_active(STEP_STAGING)?;

    let staged = ctx.stager.stage(upload, declared_name, ctx.workspace()).await?;

    info!(
        job_id = %ctx.job_id,
        display_name = %ctx.display_name,
        entries = staged.entries,
        bytes = staged.bytes,
        "build input staged"
    );

    machine
        .stage()
        .map_err(|(_, guard)| map_guard_error("stage", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, platform = %ctx.platform)
)]
pub async fn prepare_project(
    machine: BuildMachine<(), Staged>,
    ctx: &mut PipelineContext<'_>,
) -> Result<BuildMachine<(), Prepared>, AppError> {
    ctx.ensure_active(STEP_PREPARING)?;
    ctx.report(ctx.milestones.preparing, STEP_PREPARING).await?;

    if ctx.platform == Platform::Mobile {
        let profile = ctx.config.mobile.clone();
        let root = ctx.workspace().to_path_buf();
        let mirrored = tokio::task::spawn_blocking(move || {
            write_packaging_config(&profile, &root)?;
            mirror_web_assets(&profile, &root)
        })
        .await??;

        debug!(job_id = %ctx.job_id, mirrored, "web assets mirrored for packaging");
    }

    machine
        .prepare()
        .map_err(|(_, guard)| map_guard_error("prepare", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, platform = %ctx.platform)
)]
pub async fn run_toolchain(
    machine: BuildMachine<(), Prepared>,
    ctx: &mut PipelineContext<'_>,
) -> Result<BuildMachine<(), Built>, AppError> {
    match ctx.platform {
        Platform::Mobile => build_mobile_package(ctx).await?,
        Platform::Desktop => build_desktop_bundle(ctx).await?,
    }

    machine
        .build()
        .map_err(|(_, guard)| map_guard_error("build", &guard))
}

async fn build_mobile_package(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let steps = mobile_toolchain_steps(&ctx.config.mobile, ctx.workspace());
    let total = steps.len();

    for (index, step) in steps.iter().enumerate() {
        ctx.ensure_active(&step.id)?;
        ctx.report(
            ctx.milestones.building_at(index, total),
            &format!("{STEP_BUILDING}: {}", step.id),
        )
        .await?;
        ctx.invoker.run_step(step, ctx.cancel).await?;
    }

    let package = ctx.workspace().join(DEBUG_PACKAGE_PATH);
    if !fs::try_exists(&package).await.unwrap_or(false) {
        return Err(AppError::BuildStep {
            step: NATIVE_BUILD_STEP.to_string(),
            diagnostics: format!("expected output {DEBUG_PACKAGE_PATH} was not produced"),
        });
    }

    ctx.output = Some(package);
    Ok(())
}

async fn build_desktop_bundle(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    ctx.ensure_active(STEP_BUILDING)?;
    ctx.report(ctx.milestones.building_start, STEP_BUILDING).await?;

    let target = artifact_target(ctx)?;
    fs::create_dir_all(ctx.layout.artifacts_dir())
        .await
        .map_err(|err| step_failure(STEP_DESKTOP_REPACK, err))?;
    let partial = partial_path(&target);

    let root = ctx.workspace().to_path_buf();
    let destination = partial.clone();
    let files = tokio::task::spawn_blocking(move || repack_directory(&root, &destination))
        .await?
        .map_err(|err| step_failure(STEP_DESKTOP_REPACK, err))?;

    debug!(job_id = %ctx.job_id, files, "desktop bundle repacked");
    ctx.output = Some(partial);
    Ok(())
}

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, platform = %ctx.platform)
)]
pub async fn publish_artifact(
    machine: BuildMachine<(), Built>,
    ctx: &mut PipelineContext<'_>,
) -> Result<BuildMachine<(), Published>, AppError> {
    ctx.ensure_active(STEP_PUBLISHING)?;
    ctx.report(ctx.milestones.publishing, STEP_PUBLISHING).await?;

    let target = artifact_target(ctx)?;
    let partial = partial_path(&target);
    let output = ctx.output()?.to_path_buf();

    fs::create_dir_all(ctx.layout.artifacts_dir())
        .await
        .map_err(|err| step_failure(STEP_PUBLISH_ARTIFACT, err))?;
    if output != partial {
        fs::copy(&output, &partial)
            .await
            .map_err(|err| step_failure(STEP_PUBLISH_ARTIFACT, err))?;
    }
    // The final name only appears once the file is complete.
    fs::rename(&partial, &target)
        .await
        .map_err(|err| step_failure(STEP_PUBLISH_ARTIFACT, err))?;

    info!(
        job_id = %ctx.job_id,
        artifact = %target.display(),
        "build artifact published"
    );
    ctx.artifact = Some(target);

    machine
        .publish()
        .map_err(|(_, guard)| map_guard_error("publish", &guard))
}

fn artifact_target(ctx: &PipelineContext<'_>) -> Result<PathBuf, AppError> {
    ctx.layout
        .artifact_path(&ctx.job_id, ctx.platform)
        .ok_or_else(|| AppError::InternalError(format!("invalid artifact key {}", ctx.job_id)))
}

/// Sibling path used while an artifact is still being written.
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

fn step_failure(step: &str, err: impl std::fmt::Display) -> AppError {
    AppError::BuildStep {
        step: step.to_string(),
        diagnostics: err.to_string(),
    }
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid build pipeline transition during {event}: {guard:?}"
    ))
}
