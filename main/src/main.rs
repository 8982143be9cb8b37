use std::sync::Arc;

use api_router::{api_routes, api_state::ApiState};
use axum::Router;
use build_pipeline::{retention::spawn_retention_sweeper, ProcessRunner};
use common::{storage::layout::StorageLayout, utils::config::get_config};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    let layout = StorageLayout::from_config(&config);
    layout.ensure().await?;
    info!(data_dir = %layout.root().display(), "storage roots ready");

    let runner = Arc::new(ProcessRunner::new(config.step_timeout()));
    let api_state = ApiState::new(&config, runner);
    info!(
        max_concurrent = config.max_concurrent_builds,
        capacity = api_state.dispatcher.capacity(),
        "build dispatcher ready"
    );

    let sweeper = config.job_retention().map(|max_age| {
        info!(max_age_secs = max_age.as_secs(), "job retention enabled");
        spawn_retention_sweeper(
            api_state.registry.clone(),
            api_state.layout.clone(),
            max_age,
            std::time::Duration::from_secs(config.retention_sweep_interval_secs),
            api_state.dispatcher.shutdown_token(),
        )
    });

    let app = app(api_state.clone());

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    // In-flight builds are cancelled and end failed.
    api_state.dispatcher.shutdown().await;
    if let Some(handle) = sweeper {
        handle.await.ok();
    }
    info!("Server stopped");

    Ok(())
}

fn app(api_state: ApiState) -> Router {
    Router::new()
        .nest("/api", api_routes(&api_state))
        .with_state(api_state)
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use common::utils::config::AppConfig;
    use tower::ServiceExt;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn smoke_startup_with_temp_storage() {
        let data_dir = tempfile::tempdir().expect("failed to create temp data directory");
        let config = AppConfig {
            data_dir: data_dir.path().to_string_lossy().into_owned(),
            http_port: 0,
            ..Default::default()
        };
        StorageLayout::from_config(&config)
            .ensure()
            .await
            .expect("storage roots");

        let api_state = ApiState::new(&config, Arc::new(ProcessRunner::default()));
        let app = app(api_state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/live")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::OK);

        let ready_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/ready")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("ready response");
        assert_eq!(ready_response.status(), StatusCode::OK);

        let list_response = app
            .oneshot(
                Request::builder()
                    .uri("/api/builds")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("list response");
        assert_eq!(list_response.status(), StatusCode::OK);
    }
}
