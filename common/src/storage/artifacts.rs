use std::path::PathBuf;

use tokio::fs;
use tracing::warn;

use crate::{
    error::AppError,
    storage::{registry::JobRegistry, types::build_job::BuildStatus},
};

/// A finished artifact ready to be streamed to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub path: PathBuf,
    pub download_name: String,
    pub content_type: &'static str,
    pub size_bytes: u64,
}

/// Maps a job to its artifact on disk.
///
/// Only `completed` jobs resolve. The file is checked on every call because
/// the artifact store can change underneath the registry.
pub async fn locate(registry: &JobRegistry, job_id: &str) -> Result<ArtifactLocation, AppError> {
    let job = registry.get(job_id).await?;

    if job.status != BuildStatus::Completed {
        return Err(AppError::NotFound(format!(
            "build {job_id} is {}",
            job.status.as_str()
        )));
    }

    let Some(path) = job.artifact_path.clone() else {
        return Err(AppError::ArtifactMissing(format!(
            "build {job_id} has no artifact recorded"
        )));
    };

    match fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Ok(ArtifactLocation {
            download_name: job.download_name(),
            content_type: job.platform.artifact_content_type(),
            size_bytes: meta.len(),
            path,
        }),
        Ok(_) => Err(AppError::ArtifactMissing(format!(
            "artifact for build {job_id} is not a regular file"
        ))),
        Err(err) => {
            warn!(
                job_id,
                path = %path.display(),
                error = %err,
                "artifact for completed build is missing"
            );
            Err(AppError::ArtifactMissing(format!(
                "artifact for build {job_id} is missing"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::build_job::Platform;

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let registry = JobRegistry::new();

        let err = locate(&registry, "nope").await.expect_err("not found");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn in_flight_job_is_not_exposed_even_if_file_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = JobRegistry::new();
        let job = registry.create(Platform::Desktop, "game".into(), 1).await;
        let eventual = dir.path().join(format!("{}.zip", job.id));
        tokio::fs::write(&eventual, b"partial").await.expect("write");

        assert!(matches!(
            locate(&registry, &job.id).await,
            Err(AppError::NotFound(_))
        ));

        registry
            .update(&job.id, |job| job.mark_processing(20, "staging"))
            .await
            .expect("start");

        assert!(matches!(
            locate(&registry, &job.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn completed_job_resolves_with_download_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = JobRegistry::new();
        let job = registry.create(Platform::Mobile, "space".into(), 1).await;
        let artifact = dir.path().join(format!("{}.apk", job.id));
        tokio::fs::write(&artifact, b"apk-bytes").await.expect("write");

        let artifact_for_job = artifact.clone();
        registry
            .update(&job.id, move |job| {
                job.mark_processing(10, "staging")?;
                job.mark_completed(artifact_for_job)
            })
            .await
            .expect("complete");

        let location = locate(&registry, &job.id).await.expect("located");
        assert_eq!(location.path, artifact);
        assert_eq!(location.download_name, "space.apk");
        assert_eq!(location.size_bytes, 9);
        assert_eq!(
            location.content_type,
            "application/vnd.android.package-archive"
        );
    }

    #[tokio::test]
    async fn vanished_artifact_is_reported_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = JobRegistry::new();
        let job = registry.create(Platform::Desktop, "game".into(), 1).await;
        let artifact = dir.path().join("gone.zip");

        registry
            .update(&job.id, move |job| {
                job.mark_processing(10, "staging")?;
                job.mark_completed(artifact)
            })
            .await
            .expect("complete");

        let err = locate(&registry, &job.id).await.expect_err("missing");
        assert!(matches!(err, AppError::ArtifactMissing(_)));
        assert!(err.is_not_found());
    }
}
