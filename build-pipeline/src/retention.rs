use std::time::Duration;

use chrono::{DateTime, Utc};
use common::storage::{layout::StorageLayout, registry::JobRegistry};
use tokio::{fs, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Purges terminal jobs that finished more than `max_age` before `now`,
/// deleting their artifacts. Returns how many jobs were removed.
pub async fn sweep_expired(
    registry: &JobRegistry,
    layout: &StorageLayout,
    max_age: Duration,
    now: DateTime<Utc>,
) -> usize {
    let Ok(max_age) = chrono::Duration::from_std(max_age) else {
        return 0;
    };
    let Some(cutoff) = now.checked_sub_signed(max_age) else {
        return 0;
    };

    let purged = registry.purge_finished_before(cutoff).await;
    for job in &purged {
        let path = job
            .artifact_path
            .clone()
            .or_else(|| layout.artifact_path(&job.id, job.platform));
        let Some(path) = path else { continue };

        match fs::remove_file(&path).await {
            Ok(()) => debug!(job_id = %job.id, path = %path.display(), "expired artifact removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                job_id = %job.id,
                path = %path.display(),
                error = %err,
                "failed to remove expired artifact"
            ),
        }
    }

    if !purged.is_empty() {
        info!(purged = purged.len(), "expired builds purged");
    }
    purged.len()
}

/// Runs [`sweep_expired`] every `interval` until `shutdown` fires.
pub fn spawn_retention_sweeper(
    registry: JobRegistry,
    layout: StorageLayout,
    max_age: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    sweep_expired(&registry, &layout, max_age, Utc::now()).await;
                }
            }
        }
        debug!("retention sweeper stopped");
    })
}
