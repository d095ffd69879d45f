use std::any::Any;
use std::fs;
use std::process::ExitCode;

use facevote_core::capture::{CaptureSession, DirectoryFrames};
use facevote_core::errors::AppResult;
use facevote_core::service::CastVoteRequest;
use serde::Serialize;

use crate::cli::{OutputMode, VoteArgs};
use crate::commands::CommandHandler;
use crate::context::AppContext;
use crate::output::render_vote;

/// Confirmation of a recorded vote. The chosen candidate is left out.
#[derive(Debug, Clone, Serialize)]
pub struct VoteOutcome {
    pub voter_id: String,
    pub cast_at: String,
}

pub fn run_vote(args: &VoteArgs) -> AppResult<VoteOutcome> {
    let image = fs::read(&args.image)?;
    let context = AppContext::open(&args.config)?;
    let liveness = &context.config.liveness;
    let liveness_frames = match &args.frames {
        Some(dir) => {
            let frames = DirectoryFrames::open(dir, liveness.frame_interval)?;
            CaptureSession::new(Box::new(frames), liveness.window, liveness.frame_interval)
                .drain()?
        }
        None => Vec::new(),
    };

    let record = context.service.cast_vote(CastVoteRequest {
        voter_id: args.voter.clone(),
        candidate_id: args.candidate.clone(),
        image,
        liveness_frames,
    })?;
    Ok(VoteOutcome {
        voter_id: record.voter_id,
        cast_at: record.cast_at,
    })
}

pub struct VoteHandler {
    args: VoteArgs,
    run: Box<dyn Fn(&VoteArgs) -> AppResult<VoteOutcome> + Send + Sync>,
    render: Box<dyn Fn(&VoteOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl VoteHandler {
    pub fn new(args: VoteArgs) -> Self {
        Self::with_dependencies(args, run_vote, render_vote)
    }

    pub fn with_dependencies(
        args: VoteArgs,
        run: impl Fn(&VoteArgs) -> AppResult<VoteOutcome> + Send + Sync + 'static,
        render: impl Fn(&VoteOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for VoteHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args)?;
        (self.render)(&outcome, mode, verbose)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
