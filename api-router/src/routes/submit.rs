use std::path::Path;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use build_pipeline::BuildRequest;
use common::{
    error::AppError,
    storage::types::build_job::Platform,
    utils::upload_limits::{display_name_for, validate_upload},
};
use serde_json::json;
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, TryFromMultipart)]
pub struct SubmitBuildParams {
    #[form_data(limit = "unlimited")]
    pub file: FieldData<NamedTempFile>,
    pub platform: Option<String>,
}

pub async fn submit_build(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<SubmitBuildParams>,
) -> Result<impl IntoResponse, ApiError> {
    let file_name = input.file.metadata.file_name.clone();
    let size_bytes = input
        .file
        .contents
        .as_file()
        .metadata()
        .map_err(AppError::from)?
        .len();

    validate_upload(&state.config, file_name.as_deref(), size_bytes)?;
    let declared_name = file_name.unwrap_or_default();
    let platform = parse_platform(input.platform.as_deref())?;

    // Claim capacity first so a rejected submission leaves no job behind.
    let reservation = state.dispatcher.try_reserve()?;

    let upload_id = Uuid::new_v4().to_string();
    let upload_path = state
        .layout
        .upload_path(&upload_id)
        .ok_or_else(|| AppError::InternalError(format!("invalid upload key {upload_id}")))?;
    persist_upload(input.file.contents, &upload_path).await?;

    let job = state
        .registry
        .create(platform, display_name_for(&declared_name), size_bytes)
        .await;

    info!(
        job_id = %job.id,
        %platform,
        size_bytes,
        file_name = %declared_name,
        "build submitted"
    );

    state.dispatcher.dispatch(
        reservation,
        BuildRequest {
            job_id: job.id.clone(),
            upload_path,
            declared_name,
        },
    );

    Ok((StatusCode::CREATED, Json(json!({ "jobId": job.id }))))
}

fn parse_platform(raw: Option<&str>) -> Result<Platform, AppError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => value.parse(),
        None => Ok(Platform::default()),
    }
}

async fn persist_upload(temp: NamedTempFile, destination: &Path) -> Result<(), AppError> {
    match temp.persist(destination) {
        Ok(_) => Ok(()),
        Err(err) => {
            // The temp dir may sit on another filesystem.
            debug!(error = %err.error, "renaming upload failed, copying instead");
            if fs::copy(err.file.path(), destination).await.is_err() {
                return Err(AppError::Persist(err));
            }
            Ok(())
        }
    }
}
