use std::error::Error;
use std::io::{self, Write};

use facevote_core::errors::{AppError, AppResult};
use facevote_core::faces::liveness::LivenessReport;
use facevote_core::response::{MatchResult, VoteCastResult};
use facevote_core::trainer::RebuildOutcome;
use serde::Serialize;
use serde_json::json;

use crate::cli::OutputMode;
use crate::commands::{
    AuditOutcome, IdentifyOutcome, IndexRebuildOutcome, RegisterOutcome, ResultsOutcome,
    VoteOutcome,
};

fn write_json<T: Serialize + ?Sized>(payload: &T) -> AppResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let payload = serde_json::to_string(payload)?;
    handle.write_all(payload.as_bytes())?;
    handle.write_all(b"\n")?;
    Ok(())
}

pub fn render_register(
    outcome: &RegisterOutcome,
    mode: OutputMode,
    verbose: bool,
) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            let receipt = &outcome.receipt;
            println!(
                "Registered {} ({}) in {} [embedding: {} values, sharpness: {:.1}]",
                receipt.display_name,
                receipt.identity_id,
                receipt.cohort,
                receipt.embedding_len,
                receipt.sharpness
            );
            for report in &outcome.rebuilds {
                match &report.outcome {
                    RebuildOutcome::Rebuilt(summary) => {
                        if verbose {
                            println!(
                                "Index {} rebuilt: {} samples (build {}, attempts {})",
                                report.cohort, summary.samples, summary.build_id, report.attempts
                            );
                        } else {
                            println!("Index {} rebuilt", report.cohort);
                        }
                    }
                    RebuildOutcome::Failed { message } => {
                        println!(
                            "Index {} not rebuilt after {} attempts: {message}",
                            report.cohort, report.attempts
                        );
                    }
                }
            }
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_identify(
    outcome: &IdentifyOutcome,
    mode: OutputMode,
    verbose: bool,
) -> AppResult<()> {
    let decision = &outcome.decision;
    match mode {
        OutputMode::Human => {
            println!(
                "Matched {} ({}) in {} with confidence {:.3}",
                decision.display_name, decision.identity_id, outcome.cohort, decision.confidence
            );
            if verbose {
                println!(
                    "strategy: {}, distance: {:.4}",
                    decision.strategy.as_str(),
                    decision.raw_distance
                );
            }
        }
        OutputMode::Json => write_json(&MatchResult::from_outcome(&Ok(decision.clone())))?,
    }
    Ok(())
}

pub fn render_liveness(report: &LivenessReport, mode: OutputMode, verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!("Liveness confirmed");
            if verbose {
                println!(
                    "mode: {:?}, frames: {}, faces: {}, blink: {}, head movement: {}",
                    report.mode,
                    report.frames_observed,
                    report.faces_observed,
                    report.blink_observed,
                    report.movement_observed
                );
            }
        }
        OutputMode::Json => write_json(report)?,
    }
    Ok(())
}

pub fn render_vote(outcome: &VoteOutcome, mode: OutputMode, _verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!("Vote recorded for {} at {}", outcome.voter_id, outcome.cast_at);
        }
        OutputMode::Json => write_json(&VoteCastResult::success())?,
    }
    Ok(())
}

pub fn render_results(outcome: &ResultsOutcome, mode: OutputMode, _verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if outcome.tally.is_empty() {
                println!("No candidates enrolled");
            }
            for row in &outcome.tally {
                println!("{:>6}  {} ({})", row.votes, row.display_name, row.candidate_id);
            }
            println!("Total votes: {}", outcome.total_votes);
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_rebuild(
    outcome: &IndexRebuildOutcome,
    mode: OutputMode,
    verbose: bool,
) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for summary in &outcome.rebuilt {
                println!(
                    "Index {} rebuilt: {} samples, dimension {}",
                    summary.cohort, summary.samples, summary.dimension
                );
                if verbose {
                    println!("build id: {}", summary.build_id);
                }
            }
            println!("Indexes written to {}", outcome.index_dir);
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_audit(outcome: &AuditOutcome, mode: OutputMode, verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if outcome.events.is_empty() {
                println!("No vote events recorded");
            }
            for event in &outcome.events {
                let reason = event
                    .reason
                    .map(|kind| format!(" ({kind:?})"))
                    .unwrap_or_default();
                if verbose {
                    println!(
                        "#{} {}  {}  {}{reason}",
                        event.id,
                        event.recorded_at,
                        event.voter_digest,
                        event.kind.as_str()
                    );
                } else {
                    println!(
                        "{}  {}  {}{reason}",
                        event.recorded_at,
                        event.voter_digest,
                        event.kind.as_str()
                    );
                }
            }
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_error(err: &AppError, mode: OutputMode) {
    match mode {
        OutputMode::Human => {
            eprintln!("error: {}", err.human_message());
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "status": "error",
                "error_kind": err.kind(),
                "message": err.human_message(),
            });
            if let Ok(json) = serde_json::to_string(&payload) {
                println!("{json}");
            }
        }
    }
}
