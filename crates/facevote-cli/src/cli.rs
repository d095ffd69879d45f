use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use facevote_core::cohort::Cohort;

#[derive(Debug, Parser)]
#[command(
    name = "facevote",
    about = "Operate a face-verified, vote-once election",
    version
)]
pub struct Cli {
    /// Emit structured JSON to stdout instead of human-readable output
    #[arg(long)]
    pub json: bool,

    /// Increase verbosity (may be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Enroll a voter or candidate from a face image
    Register(RegisterArgs),
    /// Identify the face in an image against an enrolled cohort
    Identify(IdentifyArgs),
    /// Run the liveness check over a sequence of frame images
    Liveness(LivenessArgs),
    /// Verify a voter by face and record their vote
    Vote(VoteArgs),
    /// Print the vote tally per candidate
    Results(ResultsArgs),
    /// Rebuild enrollment indexes offline
    Rebuild(RebuildArgs),
    /// Show the most recent vote audit events
    Audit(AuditArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Read configuration from this file instead of the default search paths
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RegisterArgs {
    /// Cohort to enroll into (voters or candidates)
    #[arg(long)]
    pub cohort: Cohort,

    /// Identifier of the person (letters, digits, '-' and '_')
    #[arg(long)]
    pub id: String,

    /// Display name shown in results and match output
    #[arg(long)]
    pub name: String,

    /// Path to the enrollment image
    pub image: PathBuf,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Debug, Args)]
pub struct IdentifyArgs {
    /// Cohort to match against (voters or candidates)
    #[arg(long)]
    pub cohort: Cohort,

    /// Require the match to be this identity
    #[arg(long)]
    pub claim: Option<String>,

    /// Path to the query image
    pub image: PathBuf,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Debug, Args)]
pub struct LivenessArgs {
    /// Directory of frame images, read in file-name order
    #[arg(long, conflicts_with = "images")]
    pub frames: Option<PathBuf>,

    /// Frame images in capture order
    #[arg(required_unless_present = "frames")]
    pub images: Vec<PathBuf>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Debug, Args)]
pub struct VoteArgs {
    /// Identifier the voter claims
    #[arg(long)]
    pub voter: String,

    /// Candidate receiving the vote
    #[arg(long)]
    pub candidate: String,

    /// Directory of liveness frames (defaults to checking the image alone)
    #[arg(long)]
    pub frames: Option<PathBuf>,

    /// Path to the verification image
    pub image: PathBuf,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Debug, Args)]
pub struct ResultsArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Debug, Args)]
pub struct RebuildArgs {
    /// Only rebuild this cohort (defaults to every cohort)
    #[arg(long)]
    pub cohort: Option<Cohort>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl From<bool> for OutputMode {
    fn from(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from(self.json)
    }
}

pub const DEFAULT_AUDIT_LIMIT: usize = 50;

#[derive(Debug, Args)]
pub struct AuditArgs {
    /// Number of most recent events to show
    #[arg(long, default_value_t = DEFAULT_AUDIT_LIMIT)]
    pub limit: usize,
    #[command(flatten)]
    pub config: ConfigArgs,
}
