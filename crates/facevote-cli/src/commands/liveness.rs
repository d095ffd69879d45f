use std::any::Any;
use std::process::ExitCode;

use facevote_core::capture::{CaptureSession, DirectoryFrames};
use facevote_core::errors::AppResult;
use facevote_core::faces::extractor::{EmbeddingExtractor, ExtractorSettings};
use facevote_core::faces::liveness::{LivenessChecker, LivenessReport, LivenessSettings};

use crate::cli::{LivenessArgs, OutputMode};
use crate::commands::CommandHandler;
use crate::context::{face_backend, load_config};
use crate::output::render_liveness;

/// Replays the frame files through a capture session. No database access.
pub fn run_liveness(args: &LivenessArgs) -> AppResult<LivenessReport> {
    let config = load_config(&args.config)?;
    let interval = config.liveness.frame_interval;
    let frames = match &args.frames {
        Some(dir) => DirectoryFrames::open(dir, interval)?,
        None => DirectoryFrames::from_paths(args.images.clone(), interval),
    };

    let extractor = EmbeddingExtractor::new(
        face_backend(&config)?,
        ExtractorSettings {
            blur_threshold: config.blur_threshold,
            jitters: config.jitters,
        },
    );
    let checker = LivenessChecker::new(extractor, LivenessSettings::from(&config.liveness));
    let mut session = CaptureSession::new(Box::new(frames), config.liveness.window, interval);
    checker.check_session(&mut session)
}

pub struct LivenessHandler {
    args: LivenessArgs,
    run: Box<dyn Fn(&LivenessArgs) -> AppResult<LivenessReport> + Send + Sync>,
    render: Box<dyn Fn(&LivenessReport, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl LivenessHandler {
    pub fn new(args: LivenessArgs) -> Self {
        Self::with_dependencies(args, run_liveness, render_liveness)
    }

    pub fn with_dependencies(
        args: LivenessArgs,
        run: impl Fn(&LivenessArgs) -> AppResult<LivenessReport> + Send + Sync + 'static,
        render: impl Fn(&LivenessReport, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for LivenessHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let report = (self.run)(&self.args)?;
        (self.render)(&report, mode, verbose)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
