use std::any::Any;
use std::process::ExitCode;

use facevote_core::cohort::Cohort;
use facevote_core::db::Database;
use facevote_core::errors::AppResult;
use facevote_core::trainer::RebuildSummary;
use serde::Serialize;
use tracing::info;

use crate::cli::{OutputMode, RebuildArgs};
use crate::commands::CommandHandler;
use crate::context::{index_dir, load_config, open_trainer};
use crate::output::render_rebuild;

#[derive(Debug, Clone, Serialize)]
pub struct IndexRebuildOutcome {
    pub index_dir: String,
    pub rebuilt: Vec<RebuildSummary>,
}

/// Retrains the requested cohorts from the registry and persists the new
/// index artifacts. Works from stored embeddings, so no face backend is
/// loaded.
pub fn run_rebuild(args: &RebuildArgs) -> AppResult<IndexRebuildOutcome> {
    let config = load_config(&args.config)?;
    let db = Database::open(&config.database_path)?;
    let trainer = open_trainer(&config, db)?;

    let cohorts = match args.cohort {
        Some(cohort) => vec![cohort],
        None => Cohort::ALL.to_vec(),
    };
    let mut rebuilt = Vec::with_capacity(cohorts.len());
    for cohort in cohorts {
        let summary = trainer.rebuild(cohort)?;
        info!(
            cohort = %cohort,
            samples = summary.samples,
            build_id = %summary.build_id,
            "index rebuilt"
        );
        rebuilt.push(summary);
    }

    Ok(IndexRebuildOutcome {
        index_dir: index_dir(&config).display().to_string(),
        rebuilt,
    })
}

pub struct RebuildHandler {
    args: RebuildArgs,
    run: Box<dyn Fn(&RebuildArgs) -> AppResult<IndexRebuildOutcome> + Send + Sync>,
    render: Box<dyn Fn(&IndexRebuildOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl RebuildHandler {
    pub fn new(args: RebuildArgs) -> Self {
        Self::with_dependencies(args, run_rebuild, render_rebuild)
    }

    pub fn with_dependencies(
        args: RebuildArgs,
        run: impl Fn(&RebuildArgs) -> AppResult<IndexRebuildOutcome> + Send + Sync + 'static,
        render: impl Fn(&IndexRebuildOutcome, OutputMode, bool) -> AppResult<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for RebuildHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args)?;
        (self.render)(&outcome, mode, verbose)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
