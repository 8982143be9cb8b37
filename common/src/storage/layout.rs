use std::path::{Component, Path, PathBuf};

use tokio::fs;

use crate::{storage::types::build_job::Platform, utils::config::AppConfig};

const UPLOADS_DIR: &str = "uploads";
const WORKSPACES_DIR: &str = "workspaces";
const ARTIFACTS_DIR: &str = "artifacts";

/// On-disk layout: an uploads staging root, per-job extraction workspaces
/// and an artifact store keyed by job id.
#[derive(Clone, Debug)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.data_dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.root.join(WORKSPACES_DIR)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join(ARTIFACTS_DIR)
    }

    /// Creates the three storage roots if they are missing.
    pub async fn ensure(&self) -> std::io::Result<()> {
        for dir in [self.uploads_dir(), self.workspaces_dir(), self.artifacts_dir()] {
            fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    pub fn upload_path(&self, upload_id: &str) -> Option<PathBuf> {
        Self::keyed(&self.uploads_dir(), &format!("{upload_id}.zip"))
    }

    pub fn workspace_path(&self, job_id: &str) -> Option<PathBuf> {
        Self::keyed(&self.workspaces_dir(), job_id)
    }

    pub fn artifact_path(&self, job_id: &str, platform: Platform) -> Option<PathBuf> {
        Self::keyed(
            &self.artifacts_dir(),
            &format!("{job_id}.{}", platform.artifact_extension()),
        )
    }

    /// Resolve a single path segment below `base`, refusing anything that is
    /// not a plain file name.
    fn keyed(base: &Path, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        let mut components = relative.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Some(base.join(relative)),
            _ => None,
        }
    }
}
