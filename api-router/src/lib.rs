use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use routes::{
    download::download_build,
    probes::{live, ready},
    status::{get_build, get_build_status, list_builds},
    submit::submit_build,
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for the build API. Mount it under `/api`.
pub fn api_routes<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probes
    let probes = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let upload_limit = DefaultBodyLimit::max(app_state.config.upload_max_bytes);
    let builds = Router::new()
        .route(
            "/builds",
            post(submit_build)
                .layer(upload_limit)
                .get(list_builds),
        )
        .route("/builds/upload", post(submit_build).layer(upload_limit))
        .route("/builds/{id}", get(get_build))
        .route("/builds/{id}/status", get(get_build_status))
        .route("/builds/{id}/download", get(download_build));

    probes.merge(builds)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use build_pipeline::ProcessRunner;
    use common::utils::config::AppConfig;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    fn app(data_dir: &std::path::Path) -> (Router, ApiState) {
        let config = AppConfig {
            data_dir: data_dir.to_string_lossy().into_owned(),
            ..AppConfig::default()
        };
        let state = ApiState::new(&config, Arc::new(ProcessRunner::default()));
        let router = Router::new()
            .merge(api_routes(&state))
            .with_state(state.clone());
        (router, state)
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    #[tokio::test]
    async fn unknown_builds_are_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (router, _) = app(dir.path());

        for uri in [
            "/builds/missing",
            "/builds/missing/status",
            "/builds/missing/download",
        ] {
            let (status, body) = get_json(router.clone(), uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(body["status"], "error");
        }
    }

    #[tokio::test]
    async fn readiness_tracks_storage_roots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (router, state) = app(dir.path());

        let (status, body) = get_json(router.clone(), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["checks"]["uploads"], "fail");

        state.layout.ensure().await.expect("roots");
        let (status, body) = get_json(router.clone(), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["artifacts"], "ok");

        let (status, body) = get_json(router, "/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn listing_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (router, _) = app(dir.path());

        let (status, body) = get_json(router, "/builds").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }
}
