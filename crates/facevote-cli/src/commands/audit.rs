use std::any::Any;
use std::process::ExitCode;

use facevote_core::db::Database;
use facevote_core::errors::AppResult;
use facevote_core::ledger::{SqliteVoteLedger, VoteEvent, VoteLedger};
use serde::Serialize;

use crate::cli::{AuditArgs, OutputMode};
use crate::commands::CommandHandler;
use crate::context::load_config;
use crate::output::render_audit;

#[derive(Debug, Clone, Serialize)]
pub struct AuditOutcome {
    pub events: Vec<VoteEvent>,
}

/// Reads the vote audit trail; no face backend is needed.
pub fn run_audit(args: &AuditArgs) -> AppResult<AuditOutcome> {
    let config = load_config(&args.config)?;
    let ledger = SqliteVoteLedger::new(Database::open(&config.database_path)?);
    Ok(AuditOutcome {
        events: ledger.events(args.limit)?,
    })
}

pub struct AuditHandler {
    args: AuditArgs,
    run: Box<dyn Fn(&AuditArgs) -> AppResult<AuditOutcome> + Send + Sync>,
    render: Box<dyn Fn(&AuditOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl AuditHandler {
    pub fn new(args: AuditArgs) -> Self {
        Self::with_dependencies(args, run_audit, render_audit)
    }

    pub fn with_dependencies(
        args: AuditArgs,
        run: impl Fn(&AuditArgs) -> AppResult<AuditOutcome> + Send + Sync + 'static,
        render: impl Fn(&AuditOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for AuditHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args)?;
        (self.render)(&outcome, mode, verbose)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
