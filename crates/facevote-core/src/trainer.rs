use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cohort::{Cohort, CohortSettings};
use crate::errors::{AppError, AppResult};
use crate::faces::index::EnrollmentIndex;
use crate::faces::matcher::IndexHandle;
use crate::faces::store::IndexStore;
use crate::registry::IdentityRegistry;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

struct CohortSlot {
    settings: CohortSettings,
    handle: Arc<IndexHandle>,
    /// Held from registry read to handle swap so rebuilds of one cohort
    /// install in the order they read. Readers go through `handle` only.
    rebuild_lock: Mutex<()>,
}

impl CohortSlot {
    fn new(cohort: Cohort, settings: CohortSettings) -> Self {
        let handle = Arc::new(IndexHandle::untrained(cohort, &settings));
        Self {
            settings,
            handle,
            rebuild_lock: Mutex::new(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebuildSummary {
    pub cohort: Cohort,
    pub build_id: String,
    pub samples: usize,
    pub dimension: usize,
}

/// Rebuilds cohort indexes from the registry, persists them, and swaps them
/// into the serving handles.
#[derive(Clone)]
pub struct Trainer {
    registry: Arc<dyn IdentityRegistry>,
    store: Arc<dyn IndexStore>,
    voters: Arc<CohortSlot>,
    candidates: Arc<CohortSlot>,
}

impl Trainer {
    pub fn new(
        registry: Arc<dyn IdentityRegistry>,
        store: Arc<dyn IndexStore>,
        voters: CohortSettings,
        candidates: CohortSettings,
    ) -> Self {
        Self {
            registry,
            store,
            voters: Arc::new(CohortSlot::new(Cohort::Voters, voters)),
            candidates: Arc::new(CohortSlot::new(Cohort::Candidates, candidates)),
        }
    }

    fn slot(&self, cohort: Cohort) -> &CohortSlot {
        match cohort {
            Cohort::Voters => &self.voters,
            Cohort::Candidates => &self.candidates,
        }
    }

    pub fn handle(&self, cohort: Cohort) -> Arc<IndexHandle> {
        Arc::clone(&self.slot(cohort).handle)
    }

    pub fn settings(&self, cohort: Cohort) -> &CohortSettings {
        &self.slot(cohort).settings
    }

    pub fn registry(&self) -> Arc<dyn IdentityRegistry> {
        Arc::clone(&self.registry)
    }

    /// Trains from the full current enrollment set. The handle only changes
    /// after the artifact is on disk. Concurrent rebuilds of one cohort run
    /// one at a time; other cohorts and match lookups are not blocked.
    pub fn rebuild(&self, cohort: Cohort) -> AppResult<RebuildSummary> {
        let slot = self.slot(cohort);
        let _serialized = slot
            .rebuild_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let identities = self.registry.enrolled(cohort)?;
        debug!(cohort = %cohort, identities = identities.len(), "training index");
        let index = EnrollmentIndex::train(cohort, &identities, &slot.settings)?;
        self.store.save(&index)?;

        let summary = RebuildSummary {
            cohort,
            build_id: index.build_id.clone(),
            samples: index.len(),
            dimension: index.dimension,
        };
        let previous = slot.handle.swap(index);
        info!(
            cohort = %cohort,
            build_id = %summary.build_id,
            previous = %previous.build_id,
            samples = summary.samples,
            "index swapped"
        );
        Ok(summary)
    }

    /// Installs persisted artifacts; cohorts without one stay untrained.
    pub fn load_all(&self) -> AppResult<()> {
        for cohort in Cohort::ALL {
            match self.store.load(cohort)? {
                Some(index) => {
                    debug!(
                        cohort = %cohort,
                        build_id = %index.build_id,
                        samples = index.len(),
                        "loaded index artifact"
                    );
                    self.slot(cohort).handle.swap(index);
                }
                None => debug!(cohort = %cohort, "no index artifact; cohort untrained"),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RebuildOutcome {
    Rebuilt(RebuildSummary),
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebuildReport {
    pub cohort: Cohort,
    pub attempts: u32,
    pub outcome: RebuildOutcome,
}

impl RebuildReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RebuildOutcome::Rebuilt(_))
    }
}

/// Producer side of the rebuild queue. Never blocks.
#[derive(Clone)]
pub struct RebuildQueue {
    tx: mpsc::UnboundedSender<Cohort>,
}

impl RebuildQueue {
    /// Returns false when no worker is listening any more.
    pub fn enqueue(&self, cohort: Cohort) -> bool {
        match self.tx.send(cohort) {
            Ok(()) => true,
            Err(_) => {
                warn!(cohort = %cohort, "rebuild worker stopped; job dropped");
                false
            }
        }
    }
}

pub fn rebuild_channel(trainer: Trainer, policy: RetryPolicy) -> (RebuildQueue, RebuildWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        RebuildQueue { tx },
        RebuildWorker {
            trainer,
            rx,
            policy,
            reports: None,
        },
    )
}

pub struct RebuildWorker {
    trainer: Trainer,
    rx: mpsc::UnboundedReceiver<Cohort>,
    policy: RetryPolicy,
    reports: Option<mpsc::UnboundedSender<RebuildReport>>,
}

impl RebuildWorker {
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<RebuildReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Runs until every queue handle is dropped.
    pub async fn run(mut self) {
        while let Some(first) = self.rx.recv().await {
            for cohort in self.coalesce(first) {
                process_job(&self.trainer, self.policy, self.reports.as_ref(), cohort).await;
            }
        }
        debug!("rebuild queue closed");
    }

    /// Processes whatever is queued right now and returns the reports.
    pub async fn run_until_idle(&mut self) -> Vec<RebuildReport> {
        let mut reports = Vec::new();
        while let Ok(first) = self.rx.try_recv() {
            for cohort in self.coalesce(first) {
                reports.push(
                    process_job(&self.trainer, self.policy, self.reports.as_ref(), cohort).await,
                );
            }
        }
        reports
    }

    fn coalesce(&mut self, first: Cohort) -> BTreeSet<Cohort> {
        let mut batch = BTreeSet::from([first]);
        while let Ok(next) = self.rx.try_recv() {
            batch.insert(next);
        }
        batch
    }
}

async fn process_job(
    trainer: &Trainer,
    policy: RetryPolicy,
    reports: Option<&mpsc::UnboundedSender<RebuildReport>>,
    cohort: Cohort,
) -> RebuildReport {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;
    let outcome = loop {
        attempts += 1;
        let trainer = trainer.clone();
        let result = tokio::task::spawn_blocking(move || trainer.rebuild(cohort))
            .await
            .unwrap_or_else(|err| {
                Err(AppError::Rebuild {
                    cohort,
                    message: format!("rebuild task failed: {err}"),
                })
            });

        match result {
            Ok(summary) => break RebuildOutcome::Rebuilt(summary),
            Err(err) if attempts < max_attempts => {
                warn!(
                    cohort = %cohort,
                    attempt = attempts,
                    error = %err,
                    "index rebuild failed; retrying"
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(err) => {
                error!(
                    cohort = %cohort,
                    attempts,
                    error = %err,
                    "index rebuild failed; serving previous index"
                );
                break RebuildOutcome::Failed {
                    message: err.to_string(),
                };
            }
        }
    };

    let report = RebuildReport {
        cohort,
        attempts,
        outcome,
    };
    if let Some(reports) = reports {
        let _ = reports.send(report.clone());
    }
    report
}
