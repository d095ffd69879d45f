mod support;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use facevote_core::cohort::Cohort;
use facevote_core::errors::{AppError, AppResult};
use facevote_core::faces::enrollment::RegistrationRequest;
use facevote_core::faces::index::EnrollmentIndex;
use facevote_core::faces::liveness::LivenessMode;
use facevote_core::faces::store::{FilesystemIndexStore, IndexStore};
use facevote_core::faces::matcher::MatchStrategy;
use facevote_core::trainer::RebuildOutcome;
use tempfile::TempDir;
use tokio::sync::mpsc;

use support::{face_image, Eyes, Harness};

/// Fails the first `failures` saves, then delegates.
struct FlakyStore {
    inner: FilesystemIndexStore,
    failures: AtomicU32,
}

impl IndexStore for FlakyStore {
    fn load(&self, cohort: Cohort) -> AppResult<Option<EnrollmentIndex>> {
        self.inner.load(cohort)
    }

    fn save(&self, index: &EnrollmentIndex) -> AppResult<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::StorageUnavailable("disk full".into()));
        }
        self.inner.save(index)
    }
}

/// Delays every save so overlapping rebuilds interleave.
struct SlowStore {
    inner: FilesystemIndexStore,
    delay: Duration,
}

impl IndexStore for SlowStore {
    fn load(&self, cohort: Cohort) -> AppResult<Option<EnrollmentIndex>> {
        self.inner.load(cohort)
    }

    fn save(&self, index: &EnrollmentIndex) -> AppResult<()> {
        thread::sleep(self.delay);
        self.inner.save(index)
    }
}

fn flaky_harness(failures: u32) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FlakyStore {
        inner: FilesystemIndexStore::new(dir.path().join("indexes")),
        failures: AtomicU32::new(failures),
    });
    Harness::with_store(LivenessMode::Blink, dir, store)
}

#[tokio::test]
async fn registrations_coalesce_into_one_rebuild_per_cohort() {
    let mut harness = Harness::new(LivenessMode::Blink);
    let receipt = harness.register(Cohort::Voters, "V1", 1);
    assert!(receipt.rebuild_queued);
    harness.register(Cohort::Voters, "V2", 2);
    harness.register(Cohort::Candidates, "C1", 3);

    let reports = harness.worker.run_until_idle().await;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|report| report.succeeded()));

    let decision = harness
        .service
        .identify(Cohort::Voters, &face_image(2, Eyes::Open))
        .unwrap();
    assert_eq!(decision.identity_id, "V2");
    assert_eq!(decision.strategy, MatchStrategy::Index);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let mut harness = flaky_harness(2);
    harness.register(Cohort::Candidates, "C1", 3);

    let reports = harness.worker.run_until_idle().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].attempts, 3);
    assert!(reports[0].succeeded());
    assert!(harness.trainer.handle(Cohort::Candidates).snapshot().is_trained());
}

#[tokio::test]
async fn exhausted_retries_keep_registration_and_previous_index() {
    let mut harness = flaky_harness(10);
    harness.register(Cohort::Voters, "V1", 1);
    let before = harness.trainer.handle(Cohort::Voters).snapshot();

    let reports = harness.worker.run_until_idle().await;
    assert_eq!(reports[0].attempts, 3);
    assert!(matches!(reports[0].outcome, RebuildOutcome::Failed { .. }));

    let after = harness.trainer.handle(Cohort::Voters).snapshot();
    assert_eq!(after.build_id, before.build_id);
    assert!(harness.service.voter("V1").unwrap().is_some());
}

#[tokio::test]
async fn background_worker_reports_each_job() {
    let harness = Harness::new(LivenessMode::Blink);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let Harness {
        service,
        trainer,
        worker,
        dir: _dir,
        ..
    } = harness;
    let task = tokio::spawn(worker.with_reports(tx).run());

    let receipt = service
        .register(facevote_core::faces::enrollment::RegistrationRequest {
            cohort: Cohort::Candidates,
            identity_id: "C1".into(),
            display_name: "Candidate One".into(),
            image: face_image(3, Eyes::Open),
            enrollment_image: None,
        })
        .unwrap();
    assert!(receipt.rebuild_queued);

    let report = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.cohort, Cohort::Candidates);
    assert!(report.succeeded());
    assert!(trainer.handle(Cohort::Candidates).snapshot().is_trained());

    drop(service);
    task.await.unwrap();
}

#[test]
fn overlapping_rebuilds_of_one_cohort_install_the_newest_enrollment_set() {
    const VOTERS: u8 = 8;
    let dir = TempDir::new().unwrap();
    let indexes = dir.path().join("indexes");
    let store = Arc::new(SlowStore {
        inner: FilesystemIndexStore::new(indexes.clone()),
        delay: Duration::from_millis(20),
    });
    let harness = Harness::with_store(LivenessMode::Blink, dir, store);

    thread::scope(|scope| {
        for marker in 1..=VOTERS {
            let service = harness.service.clone();
            let trainer = harness.trainer.clone();
            scope.spawn(move || {
                service
                    .register(RegistrationRequest {
                        cohort: Cohort::Voters,
                        identity_id: format!("V{marker}"),
                        display_name: format!("Voter {marker}"),
                        image: face_image(marker, Eyes::Open),
                        enrollment_image: None,
                    })
                    .unwrap();
                trainer.rebuild(Cohort::Voters).unwrap();
            });
        }
    });

    let serving = harness.trainer.handle(Cohort::Voters).snapshot();
    assert_eq!(serving.len(), usize::from(VOTERS));
    let persisted = FilesystemIndexStore::new(indexes)
        .load(Cohort::Voters)
        .unwrap()
        .unwrap();
    assert_eq!(persisted.build_id, serving.build_id);
    assert_eq!(persisted.len(), usize::from(VOTERS));
}
