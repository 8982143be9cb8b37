use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use common::{error::AppError, storage::artifacts::locate};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::{api_state::ApiState, error::ApiError};

/// Streams a completed build's artifact as an attachment.
pub async fn download_build(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let artifact = locate(&state.registry, &job_id).await?;

    let file = File::open(&artifact.path).await.map_err(|err| {
        debug!(%job_id, error = %err, "artifact vanished before it could be opened");
        AppError::ArtifactMissing(format!("artifact for build {job_id} is missing"))
    })?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(artifact.content_type),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(artifact.size_bytes),
    );
    let disposition =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", artifact.download_name))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    Ok((StatusCode::OK, headers, body).into_response())
}
