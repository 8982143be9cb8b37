use std::{fmt, path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use state_machines::state_machine;
use uuid::Uuid;

use crate::error::AppError;

/// Highest progress value a job can report.
pub const PROGRESS_COMPLETE: u8 = 100;

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(alias = "android")]
    #[default]
    Mobile,
    #[serde(alias = "pc")]
    Desktop,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Mobile => "mobile",
            Platform::Desktop => "desktop",
        }
    }

    pub fn artifact_extension(self) -> &'static str {
        match self {
            Platform::Mobile => "apk",
            Platform::Desktop => "zip",
        }
    }

    pub fn artifact_content_type(self) -> &'static str {
        match self {
            Platform::Mobile => "application/vnd.android.package-archive",
            Platform::Desktop => "application/zip",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mobile" | "android" => Ok(Platform::Mobile),
            "desktop" | "pc" => Ok(Platform::Desktop),
            other => Err(AppError::InvalidInput(format!(
                "Unknown platform '{other}', expected 'mobile' or 'desktop'"
            ))),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    #[default]
    Queued,
    Processing,
    Completed,
    Failed,
}

impl BuildStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Queued => "queued",
            BuildStatus::Processing => "processing",
            BuildStatus::Completed => "completed",
            BuildStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BuildStatus::Completed | BuildStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy)]
enum JobTransition {
    Start,
    Complete,
    Fail,
}

impl JobTransition {
    fn as_str(self) -> &'static str {
        match self {
            JobTransition::Start => "start",
            JobTransition::Complete => "complete",
            JobTransition::Fail => "fail",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: JobLifecycleMachine,
        initial: Queued,
        states: [Queued, Processing, Completed, Failed],
        events {
            start {
                transition: { from: Queued, to: Processing }
            }
            complete {
                transition: { from: Processing, to: Completed }
            }
            fail {
                transition: { from: Processing, to: Failed }
            }
        }
    }

    pub(super) fn queued() -> JobLifecycleMachine<(), Queued> {
        JobLifecycleMachine::new(())
    }
}

fn invalid_transition(status: BuildStatus, event: JobTransition) -> AppError {
    AppError::InvalidTransition {
        from: status.as_str().to_string(),
        event: event.as_str().to_string(),
    }
}

fn compute_next_status(
    status: BuildStatus,
    event: JobTransition,
) -> Result<BuildStatus, AppError> {
    use lifecycle::queued;
    match (status, event) {
        (BuildStatus::Queued, JobTransition::Start) => queued()
            .start()
            .map(|_| BuildStatus::Processing)
            .map_err(|_| invalid_transition(status, event)),
        (BuildStatus::Processing, JobTransition::Complete) => queued()
            .start()
            .map_err(|_| invalid_transition(status, event))?
            .complete()
            .map(|_| BuildStatus::Completed)
            .map_err(|_| invalid_transition(status, event)),
        (BuildStatus::Processing, JobTransition::Fail) => queued()
            .start()
            .map_err(|_| invalid_transition(status, event))?
            .fail()
            .map(|_| BuildStatus::Failed)
            .map_err(|_| invalid_transition(status, event)),
        _ => Err(invalid_transition(status, event)),
    }
}

/// One build request and its tracked lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildJob {
    pub id: String,
    pub display_name: String,
    pub platform: Platform,
    pub status: BuildStatus,
    pub progress: u8,
    pub step: Option<String>,
    pub error_detail: Option<String>,
    /// Exposed by file name only; the storage root stays private.
    #[serde(serialize_with = "serialize_artifact_name", skip_deserializing)]
    pub artifact_path: Option<PathBuf>,
    pub download_url: Option<String>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

fn serialize_artifact_name<S>(path: &Option<PathBuf>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let name = path
        .as_deref()
        .and_then(|path| path.file_name())
        .map(|name| name.to_string_lossy().into_owned());
    name.serialize(serializer)
}

/// Polling view returned by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildStatusView {
    pub status: BuildStatus,
    pub progress: u8,
    pub step: Option<String>,
    pub error: Option<String>,
    pub platform: Platform,
}

impl BuildJob {
    pub fn new(platform: Platform, display_name: String, size_bytes: u64) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            display_name,
            platform,
            status: BuildStatus::Queued,
            progress: 0,
            step: None,
            error_detail: None,
            artifact_path: None,
            download_url: None,
            size_bytes,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn download_name(&self) -> String {
        format!("{}.{}", self.display_name, self.platform.artifact_extension())
    }

    pub fn status_view(&self) -> BuildStatusView {
        BuildStatusView {
            status: self.status,
            progress: self.progress,
            step: self.step.clone(),
            error: self.error_detail.clone(),
            platform: self.platform,
        }
    }

    pub fn mark_processing(&mut self, progress: u8, step: &str) -> Result<(), AppError> {
        self.status = compute_next_status(self.status, JobTransition::Start)?;
        self.progress = progress.min(PROGRESS_COMPLETE);
        self.step = Some(step.to_string());
        self.touch();
        Ok(())
    }

    /// Records a milestone. Progress never moves backwards.
    pub fn record_progress(&mut self, progress: u8, step: &str) -> Result<(), AppError> {
        if self.status != BuildStatus::Processing {
            return Err(AppError::InvalidTransition {
                from: self.status.as_str().to_string(),
                event: "progress".to_string(),
            });
        }

        self.progress = self.progress.max(progress.min(PROGRESS_COMPLETE));
        self.step = Some(step.to_string());
        self.touch();
        Ok(())
    }

    pub fn mark_completed(&mut self, artifact_path: PathBuf) -> Result<(), AppError> {
        self.status = compute_next_status(self.status, JobTransition::Complete)?;
        self.progress = PROGRESS_COMPLETE;
        self.step = None;
        self.error_detail = None;
        self.artifact_path = Some(artifact_path);
        self.download_url = Some(format!("/api/builds/{}/download", self.id));
        self.finish();
        Ok(())
    }

    pub fn mark_failed(&mut self, detail: String) -> Result<(), AppError> {
        self.status = compute_next_status(self.status, JobTransition::Fail)?;
        self.step = None;
        self.error_detail = Some(detail);
        self.artifact_path = None;
        self.download_url = None;
        self.finish();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.updated_at = now;
        self.finished_at = Some(now);
    }
}
