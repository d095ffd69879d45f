use std::any::Any;
use std::process::ExitCode;

use facevote_core::errors::AppResult;

use crate::cli::{Commands, OutputMode};

pub trait CommandHandler: Send + Sync {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode>;
    fn as_any(&self) -> &dyn Any;
}

mod audit;
mod identify;
mod liveness;
mod rebuild;
mod register;
mod results;
mod vote;

pub use audit::{run_audit, AuditHandler, AuditOutcome};
pub use identify::{run_identify, IdentifyHandler, IdentifyOutcome};
pub use liveness::{run_liveness, LivenessHandler};
pub use rebuild::{run_rebuild, IndexRebuildOutcome, RebuildHandler};
pub use register::{run_register, RegisterHandler, RegisterOutcome};
pub use results::{run_results, ResultsHandler, ResultsOutcome, TallyRow};
pub use vote::{run_vote, VoteHandler, VoteOutcome};

impl From<Commands> for Box<dyn CommandHandler> {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Register(args) => Box::new(RegisterHandler::new(args)),
            Commands::Identify(args) => Box::new(IdentifyHandler::new(args)),
            Commands::Liveness(args) => Box::new(LivenessHandler::new(args)),
            Commands::Vote(args) => Box::new(VoteHandler::new(args)),
            Commands::Results(args) => Box::new(ResultsHandler::new(args)),
            Commands::Rebuild(args) => Box::new(RebuildHandler::new(args)),
            Commands::Audit(args) => Box::new(AuditHandler::new(args)),
        }
    }
}
