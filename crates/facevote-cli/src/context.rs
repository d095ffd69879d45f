use std::path::PathBuf;
use std::sync::Arc;

use facevote_config::{load_resolved_config, load_resolved_from_paths, ResolvedConfig};
use facevote_core::cohort::{Cohort, CohortSettings};
use facevote_core::db::Database;
use facevote_core::errors::{AppError, AppResult};
use facevote_core::faces::extractor::{
    EmbeddingExtractor, ExtractorSettings, FaceEmbeddingBackend,
};
use facevote_core::faces::liveness::LivenessSettings;
use facevote_core::faces::store::{
    read_index_key, EnvIndexDirResolver, FilesystemIndexStore, IndexDirResolver,
};
use facevote_core::ledger::SqliteVoteLedger;
use facevote_core::registry::SqliteRegistry;
use facevote_core::service::VotingService;
use facevote_core::trainer::{
    rebuild_channel, RebuildReport, RebuildWorker, RetryPolicy, Trainer,
};
use tracing::{debug, info};

use crate::cli::ConfigArgs;

/// Everything a command needs to talk to the election state.
pub struct AppContext {
    pub config: ResolvedConfig,
    pub service: VotingService,
    pub trainer: Trainer,
    pub worker: RebuildWorker,
}

pub fn load_config(args: &ConfigArgs) -> AppResult<ResolvedConfig> {
    let loaded = match &args.config {
        Some(path) => load_resolved_from_paths(std::slice::from_ref(path)),
        None => load_resolved_config(),
    }
    .map_err(|err| AppError::Config(err.to_string()))?;

    match &loaded.source {
        Some(path) => debug!(path = %path.display(), "loaded configuration"),
        None => debug!("no configuration file found; using defaults"),
    }
    Ok(loaded.resolved)
}

pub fn index_dir(config: &ResolvedConfig) -> PathBuf {
    EnvIndexDirResolver.resolve(config.index_dir.as_deref())
}

#[cfg(feature = "dlib")]
pub fn face_backend(config: &ResolvedConfig) -> AppResult<Arc<dyn FaceEmbeddingBackend>> {
    use facevote_core::faces::extractor::{EnvModelPathResolver, ModelPathResolver};
    use facevote_core::faces::DlibBackend;

    let models = EnvModelPathResolver.resolve(
        config.landmark_model.clone(),
        config.encoder_model.clone(),
    )?;
    Ok(Arc::new(DlibBackend::new(&models)?))
}

#[cfg(not(feature = "dlib"))]
pub fn face_backend(_config: &ResolvedConfig) -> AppResult<Arc<dyn FaceEmbeddingBackend>> {
    Err(AppError::BackendUnavailable(
        "facevote was built without the `dlib` feature".into(),
    ))
}

impl AppContext {
    pub fn open(args: &ConfigArgs) -> AppResult<Self> {
        let config = load_config(args)?;
        let backend = face_backend(&config)?;
        Self::with_backend(config, backend)
    }

    /// Opens the database and indexes with the given face backend.
    pub fn with_backend(
        config: ResolvedConfig,
        backend: Arc<dyn FaceEmbeddingBackend>,
    ) -> AppResult<Self> {
        let db = Database::open(&config.database_path)?;
        let trainer = open_trainer(&config, db.clone())?;
        trainer.load_all()?;
        for cohort in Cohort::ALL {
            debug!(
                cohort = %cohort,
                samples = trainer.handle(cohort).snapshot().len(),
                "index loaded"
            );
        }
        let ledger = Arc::new(SqliteVoteLedger::new(db));
        let (queue, worker) = rebuild_channel(
            trainer.clone(),
            RetryPolicy {
                max_attempts: config.rebuild.max_attempts,
                delay: config.rebuild.retry_delay,
            },
        );
        let extractor = EmbeddingExtractor::new(
            backend,
            ExtractorSettings {
                blur_threshold: config.blur_threshold,
                jitters: config.jitters,
            },
        );
        let service = VotingService::new(
            extractor,
            LivenessSettings::from(&config.liveness),
            &trainer,
            ledger,
            queue,
        );

        Ok(Self {
            config,
            service,
            trainer,
            worker,
        })
    }

    /// Runs queued index rebuilds to completion before the process exits.
    pub fn drain_rebuilds(&mut self) -> AppResult<Vec<RebuildReport>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let reports = runtime.block_on(self.worker.run_until_idle());
        for report in &reports {
            info!(
                cohort = %report.cohort,
                attempts = report.attempts,
                succeeded = report.succeeded(),
                "index rebuild finished"
            );
        }
        Ok(reports)
    }
}

/// Trainer over the configured registry and index store. Persisted indexes
/// are not loaded.
pub fn open_trainer(config: &ResolvedConfig, db: Database) -> AppResult<Trainer> {
    let registry = Arc::new(SqliteRegistry::new(db));

    let mut store = FilesystemIndexStore::new(index_dir(config));
    if let Some(key_file) = &config.index_key_file {
        store = store.with_key(read_index_key(key_file)?);
    }

    Ok(Trainer::new(
        registry,
        Arc::new(store),
        CohortSettings::from(&config.voters),
        CohortSettings::from(&config.candidates),
    ))
}
