use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use common::error::AppError;
use tokio::sync::Semaphore;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info};

use crate::pipeline::{BuildPipeline, BuildRequest};

struct DispatcherInner {
    pipeline: Arc<BuildPipeline>,
    slots: Arc<Semaphore>,
    in_flight: AtomicUsize,
    capacity: usize,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Hands registered jobs to the pipeline on background tasks.
///
/// At most `max_concurrent` builds run at once and at most `max_queued` more
/// may wait for a slot. Capacity is reserved before a job is created, so a
/// rejected submission never leaves a record behind.
#[derive(Clone)]
pub struct BuildDispatcher {
    inner: Arc<DispatcherInner>,
}

/// A claimed place in the dispatcher. Released when dropped.
pub struct DispatchReservation {
    inner: Arc<DispatcherInner>,
}

impl Drop for DispatchReservation {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl BuildDispatcher {
    pub fn new(pipeline: Arc<BuildPipeline>, max_concurrent: usize, max_queued: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            inner: Arc::new(DispatcherInner {
                pipeline,
                slots: Arc::new(Semaphore::new(max_concurrent)),
                in_flight: AtomicUsize::new(0),
                capacity: max_concurrent.saturating_add(max_queued),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn try_reserve(&self) -> Result<DispatchReservation, AppError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(AppError::Capacity("server is shutting down".into()));
        }

        let capacity = self.inner.capacity;
        self.inner
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < capacity).then_some(current.saturating_add(1))
            })
            .map_err(|current| {
                AppError::Capacity(format!("{current} builds already pending, try again later"))
            })?;

        Ok(DispatchReservation {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Starts the job in the background. Returns immediately.
    pub fn dispatch(&self, reservation: DispatchReservation, request: BuildRequest) {
        let inner = Arc::clone(&self.inner);
        let cancel = inner.shutdown.child_token();

        self.inner.tracker.spawn(async move {
            let _reservation = reservation;
            let job_id = request.job_id.clone();

            // A job still waiting at shutdown runs with a cancelled token and
            // fails at its first checkpoint.
            let permit = tokio::select! {
                permit = Arc::clone(&inner.slots).acquire_owned() => permit.ok(),
                () = cancel.cancelled() => None,
            };
            debug!(%job_id, has_slot = permit.is_some(), "build dispatched");

            if let Err(err) = inner.pipeline.process_job(request, cancel).await {
                error!(%job_id, error = %err, "build job ended with an error");
            }
            drop(permit);
        });
    }

    /// Cancels running builds and waits for every task to settle.
    pub async fn shutdown(&self) {
        info!(in_flight = self.in_flight(), "stopping build dispatcher");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write, time::Duration};

    use async_trait::async_trait;
    use common::storage::{
        layout::StorageLayout,
        registry::JobRegistry,
        types::build_job::{BuildJob, BuildStatus, Platform},
    };
    use zip::{write::FileOptions, ZipWriter};

    use super::*;
    use crate::{
        pipeline::BuildConfig,
        toolchain::{CommandStep, StepOutcome, StepRunner},
    };

    /// Blocks every step until the build is cancelled.
    struct HangingRunner;

    #[async_trait]
    impl StepRunner for HangingRunner {
        async fn run(
            &self,
            step: &CommandStep,
            cancel: &CancellationToken,
        ) -> Result<StepOutcome, AppError> {
            cancel.cancelled().await;
            Err(AppError::Cancelled(format!("step '{}' interrupted", step.id)))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: JobRegistry,
        layout: StorageLayout,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let layout = StorageLayout::new(dir.path());
            layout.ensure().await.expect("storage roots");
            Self {
                _dir: dir,
                registry: JobRegistry::new(),
                layout,
            }
        }

        fn dispatcher(&self, max_concurrent: usize, max_queued: usize) -> BuildDispatcher {
            let pipeline = BuildPipeline::new(
                self.registry.clone(),
                self.layout.clone(),
                BuildConfig::default(),
                Arc::new(HangingRunner),
            );
            BuildDispatcher::new(Arc::new(pipeline), max_concurrent, max_queued)
        }

        async fn request(&self, platform: Platform) -> (BuildJob, BuildRequest) {
            let upload = self
                .layout
                .upload_path(&uuid::Uuid::new_v4().to_string())
                .expect("upload path");
            let mut writer = ZipWriter::new(File::create(&upload).expect("zip"));
            writer
                .start_file("index.html", FileOptions::default())
                .expect("entry");
            writer.write_all(b"<html></html>").expect("body");
            writer.finish().expect("finish");

            let job = self.registry.create(platform, "game".into(), 1).await;
            let request = BuildRequest {
                job_id: job.id.clone(),
                upload_path: upload,
                declared_name: "game.zip".into(),
            };
            (job, request)
        }

        async fn wait_for(&self, job_id: &str, status: BuildStatus) -> BuildJob {
            for _ in 0..200 {
                let job = self.registry.get(job_id).await.expect("job");
                if job.status == status {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("job {job_id} never reached {status:?}");
        }
    }

    #[tokio::test]
    async fn reservations_are_bounded_and_released_on_drop() {
        let fixture = Fixture::new().await;
        let dispatcher = fixture.dispatcher(1, 1);

        let first = dispatcher.try_reserve().expect("first slot");
        let _second = dispatcher.try_reserve().expect("queued slot");
        assert!(matches!(
            dispatcher.try_reserve(),
            Err(AppError::Capacity(_))
        ));
        assert_eq!(dispatcher.in_flight(), 2);

        drop(first);
        assert_eq!(dispatcher.in_flight(), 1);
        assert!(dispatcher.try_reserve().is_ok());
    }

    #[tokio::test]
    async fn dispatched_desktop_job_completes_and_frees_its_slot() {
        let fixture = Fixture::new().await;
        let dispatcher = fixture.dispatcher(1, 0);
        let (job, request) = fixture.request(Platform::Desktop).await;

        let reservation = dispatcher.try_reserve().expect("slot");
        dispatcher.dispatch(reservation, request);

        let finished = fixture.wait_for(&job.id, BuildStatus::Completed).await;
        assert_eq!(finished.progress, 100);

        for _ in 0..100 {
            if dispatcher.in_flight() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn shutdown_fails_running_and_waiting_jobs() {
        let fixture = Fixture::new().await;
        let dispatcher = fixture.dispatcher(1, 1);
        let (running, running_request) = fixture.request(Platform::Mobile).await;
        let (waiting, waiting_request) = fixture.request(Platform::Mobile).await;

        dispatcher.dispatch(dispatcher.try_reserve().expect("slot"), running_request);
        fixture
            .wait_for(&running.id, BuildStatus::Processing)
            .await;
        dispatcher.dispatch(dispatcher.try_reserve().expect("slot"), waiting_request);

        dispatcher.shutdown().await;

        for job_id in [&running.id, &waiting.id] {
            let job = fixture.registry.get(job_id).await.expect("job");
            assert_eq!(job.status, BuildStatus::Failed);
            assert!(job
                .error_detail
                .is_some_and(|detail| detail.contains("cancelled")));
        }
        assert_eq!(dispatcher.in_flight(), 0);
        assert!(dispatcher.try_reserve().is_err());
    }
}
