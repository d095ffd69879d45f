use std::any::Any;
use std::fs;
use std::process::ExitCode;

use facevote_core::errors::AppResult;
use facevote_core::faces::enrollment::{EnrollmentReceipt, RegistrationRequest};
use facevote_core::trainer::RebuildReport;
use serde::Serialize;

use crate::cli::{OutputMode, RegisterArgs};
use crate::commands::CommandHandler;
use crate::context::AppContext;
use crate::output::render_register;

#[derive(Debug, Clone, Serialize)]
pub struct RegisterOutcome {
    pub receipt: EnrollmentReceipt,
    pub rebuilds: Vec<RebuildReport>,
}

/// Enrolls the image, then waits for the queued index rebuild so the new
/// identity is matchable once the command returns.
pub fn run_register(args: &RegisterArgs) -> AppResult<RegisterOutcome> {
    let image = fs::read(&args.image)?;
    let mut context = AppContext::open(&args.config)?;
    let receipt = context.service.register(RegistrationRequest {
        cohort: args.cohort,
        identity_id: args.id.clone(),
        display_name: args.name.clone(),
        image,
        enrollment_image: Some(args.image.display().to_string()),
    })?;
    let rebuilds = context.drain_rebuilds()?;
    Ok(RegisterOutcome { receipt, rebuilds })
}

pub struct RegisterHandler {
    args: RegisterArgs,
    run: Box<dyn Fn(&RegisterArgs) -> AppResult<RegisterOutcome> + Send + Sync>,
    render: Box<dyn Fn(&RegisterOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl RegisterHandler {
    pub fn new(args: RegisterArgs) -> Self {
        Self::with_dependencies(args, run_register, render_register)
    }

    pub fn with_dependencies(
        args: RegisterArgs,
        run: impl Fn(&RegisterArgs) -> AppResult<RegisterOutcome> + Send + Sync + 'static,
        render: impl Fn(&RegisterOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for RegisterHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args)?;
        (self.render)(&outcome, mode, verbose)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
