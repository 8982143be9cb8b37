use axum::{
    extract::{Path, State},
    Json,
};
use common::storage::types::build_job::{BuildJob, BuildStatusView};

use crate::{api_state::ApiState, error::ApiError};

pub async fn get_build_status(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<BuildStatusView>, ApiError> {
    let job = state.registry.get(&job_id).await?;
    Ok(Json(job.status_view()))
}

pub async fn get_build(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<BuildJob>, ApiError> {
    Ok(Json(state.registry.get(&job_id).await?))
}

pub async fn list_builds(State(state): State<ApiState>) -> Json<Vec<BuildJob>> {
    Json(state.registry.list().await)
}
