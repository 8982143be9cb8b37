use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Map, Value};
use tokio::fs;

use crate::api_state::ApiState;

/// Liveness probe: the process is up and serving.
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// Readiness probe: returns 200 if the storage roots are usable, else 503.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    let roots = [
        ("uploads", state.layout.uploads_dir()),
        ("workspaces", state.layout.workspaces_dir()),
        ("artifacts", state.layout.artifacts_dir()),
    ];

    let mut checks = Map::new();
    let mut failures = Vec::new();
    for (name, path) in roots {
        let healthy = fs::metadata(&path).await.is_ok_and(|meta| meta.is_dir());
        checks.insert(
            name.to_string(),
            Value::from(if healthy { "ok" } else { "fail" }),
        );
        if !healthy {
            failures.push(format!("{} is not a directory", path.display()));
        }
    }

    if failures.is_empty() {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "checks": checks
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": checks,
                "reason": failures.join("; ")
            })),
        )
    }
}
