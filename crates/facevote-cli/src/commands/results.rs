use std::any::Any;
use std::process::ExitCode;

use facevote_core::cohort::Cohort;
use facevote_core::db::Database;
use facevote_core::errors::AppResult;
use facevote_core::ledger::{SqliteVoteLedger, VoteLedger};
use facevote_core::registry::{IdentityRegistry, SqliteRegistry};
use serde::Serialize;

use crate::cli::{OutputMode, ResultsArgs};
use crate::commands::CommandHandler;
use crate::context::load_config;
use crate::output::render_results;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TallyRow {
    pub candidate_id: String,
    pub display_name: String,
    pub votes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultsOutcome {
    pub total_votes: u64,
    pub tally: Vec<TallyRow>,
}

/// Reads the tally straight from the ledger; no face backend is needed.
pub fn run_results(args: &ResultsArgs) -> AppResult<ResultsOutcome> {
    let config = load_config(&args.config)?;
    let db = Database::open(&config.database_path)?;
    let registry = SqliteRegistry::new(db.clone());
    let ledger = SqliteVoteLedger::new(db);

    let counts = ledger.tally()?;
    let names = registry.enrolled(Cohort::Candidates)?;
    let mut tally: Vec<TallyRow> = counts
        .into_iter()
        .map(|(candidate_id, votes)| {
            let display_name = names
                .iter()
                .find(|identity| identity.identity_id == candidate_id)
                .map(|identity| identity.display_name.clone())
                .unwrap_or_else(|| candidate_id.clone());
            TallyRow {
                candidate_id,
                display_name,
                votes,
            }
        })
        .collect();
    tally.sort_by(|a, b| {
        b.votes
            .cmp(&a.votes)
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    });

    Ok(ResultsOutcome {
        total_votes: ledger.vote_count()?,
        tally,
    })
}

pub struct ResultsHandler {
    args: ResultsArgs,
    run: Box<dyn Fn(&ResultsArgs) -> AppResult<ResultsOutcome> + Send + Sync>,
    render: Box<dyn Fn(&ResultsOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl ResultsHandler {
    pub fn new(args: ResultsArgs) -> Self {
        Self::with_dependencies(args, run_results, render_results)
    }

    pub fn with_dependencies(
        args: ResultsArgs,
        run: impl Fn(&ResultsArgs) -> AppResult<ResultsOutcome> + Send + Sync + 'static,
        render: impl Fn(&ResultsOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for ResultsHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args)?;
        (self.render)(&outcome, mode, verbose)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
