use std::path::PathBuf;

use facevote_cli::cli::{
    AuditArgs, Commands, ConfigArgs, IdentifyArgs, LivenessArgs, RebuildArgs, RegisterArgs,
    ResultsArgs, VoteArgs, DEFAULT_AUDIT_LIMIT,
};
use facevote_cli::commands::{
    AuditHandler, CommandHandler, IdentifyHandler, LivenessHandler, RebuildHandler,
    RegisterHandler, ResultsHandler, VoteHandler,
};
use facevote_core::cohort::Cohort;

fn assert_dispatch<T: 'static>(command: Commands)
where
    T: CommandHandler,
{
    let handler: Box<dyn CommandHandler> = command.into();
    assert!(handler.as_any().is::<T>());
}

#[test]
fn register_command_dispatches_register_handler() {
    assert_dispatch::<RegisterHandler>(Commands::Register(RegisterArgs {
        cohort: Cohort::Voters,
        id: "V1".into(),
        name: "Voter One".into(),
        image: PathBuf::from("v1.png"),
        config: ConfigArgs::default(),
    }));
}

#[test]
fn identify_command_dispatches_identify_handler() {
    assert_dispatch::<IdentifyHandler>(Commands::Identify(IdentifyArgs {
        cohort: Cohort::Candidates,
        claim: None,
        image: PathBuf::from("face.png"),
        config: ConfigArgs::default(),
    }));
}

#[test]
fn liveness_command_dispatches_liveness_handler() {
    assert_dispatch::<LivenessHandler>(Commands::Liveness(LivenessArgs {
        frames: Some(PathBuf::from("frames")),
        images: Vec::new(),
        config: ConfigArgs::default(),
    }));
}

#[test]
fn vote_command_dispatches_vote_handler() {
    assert_dispatch::<VoteHandler>(Commands::Vote(VoteArgs {
        voter: "V1".into(),
        candidate: "C1".into(),
        frames: None,
        image: PathBuf::from("face.png"),
        config: ConfigArgs::default(),
    }));
}

#[test]
fn results_command_dispatches_results_handler() {
    assert_dispatch::<ResultsHandler>(Commands::Results(ResultsArgs {
        config: ConfigArgs::default(),
    }));
}

#[test]
fn rebuild_command_dispatches_rebuild_handler() {
    assert_dispatch::<RebuildHandler>(Commands::Rebuild(RebuildArgs {
        cohort: None,
        config: ConfigArgs::default(),
    }));
}

#[test]
fn audit_command_dispatches_audit_handler() {
    assert_dispatch::<AuditHandler>(Commands::Audit(AuditArgs {
        limit: DEFAULT_AUDIT_LIMIT,
        config: ConfigArgs::default(),
    }));
}
