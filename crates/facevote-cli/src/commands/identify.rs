use std::any::Any;
use std::fs;
use std::process::ExitCode;

use facevote_core::cohort::Cohort;
use facevote_core::errors::AppResult;
use facevote_core::faces::matcher::MatchDecision;
use serde::Serialize;

use crate::cli::{IdentifyArgs, OutputMode};
use crate::commands::CommandHandler;
use crate::context::AppContext;
use crate::output::render_identify;

#[derive(Debug, Clone, Serialize)]
pub struct IdentifyOutcome {
    pub cohort: Cohort,
    pub decision: MatchDecision,
}

pub fn run_identify(args: &IdentifyArgs) -> AppResult<IdentifyOutcome> {
    let image = fs::read(&args.image)?;
    let context = AppContext::open(&args.config)?;
    let decision = match &args.claim {
        Some(claimed) => context
            .service
            .verify_identity(args.cohort, claimed, &image)?,
        None => context.service.identify(args.cohort, &image)?,
    };
    Ok(IdentifyOutcome {
        cohort: args.cohort,
        decision,
    })
}

pub struct IdentifyHandler {
    args: IdentifyArgs,
    run: Box<dyn Fn(&IdentifyArgs) -> AppResult<IdentifyOutcome> + Send + Sync>,
    render: Box<dyn Fn(&IdentifyOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl IdentifyHandler {
    pub fn new(args: IdentifyArgs) -> Self {
        Self::with_dependencies(args, run_identify, render_identify)
    }

    pub fn with_dependencies(
        args: IdentifyArgs,
        run: impl Fn(&IdentifyArgs) -> AppResult<IdentifyOutcome> + Send + Sync + 'static,
        render: impl Fn(&IdentifyOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for IdentifyHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args)?;
        (self.render)(&outcome, mode, verbose)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
