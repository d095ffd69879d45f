use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::audit::redact;
use crate::capture::{CaptureSession, Frame};
use crate::cohort::Cohort;
use crate::errors::{AppError, AppResult};
use crate::faces::enrollment::{EnrollmentReceipt, RegistrationRequest};
use crate::faces::extractor::EmbeddingExtractor;
use crate::faces::liveness::{LivenessChecker, LivenessReport, LivenessSettings};
use crate::faces::matcher::{IdentityMatcher, MatchDecision};
use crate::ledger::{VoteEvent, VoteLedger, VoteRecord, VoterRecord};
use crate::registry::IdentityRegistry;
use crate::trainer::{RebuildQueue, Trainer};

#[derive(Debug, Clone)]
pub struct CastVoteRequest {
    pub voter_id: String,
    pub candidate_id: String,
    /// Image used for identity verification. Always passes the flat-photo
    /// check.
    pub image: Vec<u8>,
    /// Frames for the liveness gate; when empty, `image` is checked as a
    /// single still frame. Every face in these frames must match the voter.
    pub liveness_frames: Vec<Frame>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateSummary {
    pub candidate_id: String,
    pub display_name: String,
}

/// Facade over extraction, liveness, matching and the ledger. Cheap to clone
/// and safe to share across request threads.
#[derive(Clone)]
pub struct VotingService {
    extractor: EmbeddingExtractor,
    liveness: LivenessChecker,
    voters: IdentityMatcher,
    candidates: IdentityMatcher,
    registry: Arc<dyn IdentityRegistry>,
    ledger: Arc<dyn VoteLedger>,
    rebuilds: RebuildQueue,
}

fn log_failure(operation: &'static str, err: &AppError) {
    let reason = err.redacted_message();
    if err.is_operational() {
        error!(operation, error = %reason, "operation failed");
    } else {
        warn!(operation, kind = ?err.kind(), reason = %reason, "request rejected");
    }
}

impl VotingService {
    pub fn new(
        extractor: EmbeddingExtractor,
        liveness: LivenessSettings,
        trainer: &Trainer,
        ledger: Arc<dyn VoteLedger>,
        rebuilds: RebuildQueue,
    ) -> Self {
        let registry = trainer.registry();
        let matcher = |cohort| {
            IdentityMatcher::new(
                cohort,
                trainer.settings(cohort).clone(),
                trainer.handle(cohort),
                Arc::clone(&registry),
            )
        };
        Self {
            liveness: LivenessChecker::new(extractor.clone(), liveness),
            voters: matcher(Cohort::Voters),
            candidates: matcher(Cohort::Candidates),
            extractor,
            registry,
            ledger,
            rebuilds,
        }
    }

    fn matcher(&self, cohort: Cohort) -> &IdentityMatcher {
        match cohort {
            Cohort::Voters => &self.voters,
            Cohort::Candidates => &self.candidates,
        }
    }

    /// Enrolls a person and queues a rebuild of their cohort. The new
    /// identity becomes matchable once the rebuild lands, or earlier through
    /// the fallback scan.
    pub fn register(&self, request: RegistrationRequest) -> AppResult<EnrollmentReceipt> {
        self.try_register(request).map_err(|err| {
            log_failure("register", &err);
            err
        })
    }

    fn try_register(&self, request: RegistrationRequest) -> AppResult<EnrollmentReceipt> {
        request.validate()?;
        let cohort = request.cohort;
        let embedding = self.extractor.extract(&request.image)?;
        let identity = request.into_identity(&embedding);
        self.registry.enroll(cohort, &identity)?;

        let rebuild_queued = self.rebuilds.enqueue(cohort);
        info!(
            cohort = %cohort,
            identity = %redact(&identity.identity_id),
            rebuild_queued,
            "identity registered"
        );

        Ok(EnrollmentReceipt {
            cohort,
            identity_id: identity.identity_id,
            display_name: identity.display_name,
            embedding_len: identity.embedding.len(),
            sharpness: embedding.sharpness,
            enrolled_at: identity.enrolled_at,
            rebuild_queued,
        })
    }

    pub fn identify(&self, cohort: Cohort, image: &[u8]) -> AppResult<MatchDecision> {
        self.try_identify(cohort, image).map_err(|err| {
            log_failure("identify", &err);
            err
        })
    }

    fn try_identify(&self, cohort: Cohort, image: &[u8]) -> AppResult<MatchDecision> {
        let embedding = self.extractor.extract(image)?;
        let decision = self.matcher(cohort).match_embedding(&embedding.vector)?;
        if let Err(err) = self.registry.record_recognition(cohort, &decision) {
            warn!(cohort = %cohort, error = %err, "failed to record recognition");
        }
        info!(
            cohort = %cohort,
            identity = %redact(&decision.identity_id),
            confidence = decision.confidence,
            strategy = decision.strategy.as_str(),
            "identity recognized"
        );
        Ok(decision)
    }

    pub fn verify_identity(
        &self,
        cohort: Cohort,
        claimed_id: &str,
        image: &[u8],
    ) -> AppResult<MatchDecision> {
        let decision = self.identify(cohort, image)?;
        if decision.identity_id != claimed_id {
            let err = AppError::IdentityMismatch;
            log_failure("verify_identity", &err);
            return Err(err);
        }
        Ok(decision)
    }

    pub fn check_liveness(&self, frames: &[Frame]) -> AppResult<LivenessReport> {
        self.liveness.check_frames(frames).map_err(|err| {
            log_failure("check_liveness", &err);
            err
        })
    }

    pub fn check_liveness_session(
        &self,
        session: &mut CaptureSession,
    ) -> AppResult<LivenessReport> {
        self.liveness.check_session(session).map_err(|err| {
            log_failure("check_liveness", &err);
            err
        })
    }

    /// Records a vote once every gate has passed. The voter checks run again
    /// inside the ledger transaction, so concurrent casts for one voter
    /// produce exactly one vote. Rejections are appended to the audit trail.
    pub fn cast_vote(&self, request: CastVoteRequest) -> AppResult<VoteRecord> {
        self.try_cast_vote(&request).map_err(|err| {
            log_failure("cast_vote", &err);
            self.audit_rejection(&request.voter_id, &err);
            err
        })
    }

    fn audit_rejection(&self, voter_id: &str, err: &AppError) {
        if err.is_operational() {
            return;
        }
        if let Err(audit_err) = self.ledger.record_rejection(voter_id, err.kind()) {
            warn!(error = %audit_err, "failed to record vote rejection");
        }
    }

    fn try_cast_vote(&self, request: &CastVoteRequest) -> AppResult<VoteRecord> {
        let voter = redact(&request.voter_id);
        let candidate = redact(&request.candidate_id);

        if self
            .registry
            .find(Cohort::Candidates, &request.candidate_id)?
            .is_none()
        {
            return Err(AppError::CandidateNotFound {
                candidate_id: request.candidate_id.clone(),
            });
        }

        let record = self
            .ledger
            .voter(&request.voter_id)?
            .ok_or_else(|| AppError::VoterNotFound {
                voter_id: request.voter_id.clone(),
            })?;
        if record.has_voted() {
            return Err(AppError::AlreadyVoted {
                voter_id: request.voter_id.clone(),
            });
        }

        self.liveness.check_still(&request.image)?;
        let report = if request.liveness_frames.is_empty() {
            self.liveness
                .check_frames(&[Frame::still(request.image.clone())])?
        } else {
            self.liveness.check_frames(&request.liveness_frames)?
        };
        debug!(
            voter = %voter,
            frames = report.frames_observed,
            "liveness passed"
        );

        let embedding = self.extractor.extract(&request.image)?;
        let decision = self.voters.match_embedding(&embedding.vector)?;
        if decision.identity_id != request.voter_id {
            return Err(AppError::IdentityMismatch);
        }
        if !request.liveness_frames.is_empty() {
            let matched = self.frames_show_voter(&request.voter_id, &request.liveness_frames)?;
            debug!(voter = %voter, matched, "liveness frames match voter");
        }
        if let Err(err) = self.registry.record_recognition(Cohort::Voters, &decision) {
            warn!(voter = %voter, error = %err, "failed to record recognition");
        }

        let vote = self
            .ledger
            .record_vote(&request.voter_id, &request.candidate_id)?;
        info!(
            voter = %voter,
            candidate = %candidate,
            confidence = decision.confidence,
            "vote recorded"
        );
        Ok(vote)
    }

    /// Every recognizable face inside the liveness window must be the voter,
    /// and at least one must be present. Returns the number of matched frames.
    fn frames_show_voter(&self, voter_id: &str, frames: &[Frame]) -> AppResult<usize> {
        let mut matched = 0;
        for frame in frames.iter().filter(|frame| self.liveness.in_window(frame)) {
            let embedding = match self.extractor.extract(&frame.bytes) {
                Ok(embedding) => embedding,
                Err(AppError::NoFaceDetected | AppError::BlurryImage { .. }) => continue,
                Err(err) => return Err(err),
            };
            match self.voters.match_embedding(&embedding.vector) {
                Ok(decision) if decision.identity_id == voter_id => matched += 1,
                Ok(_) | Err(AppError::LowConfidenceMatch { .. }) => {
                    return Err(AppError::IdentityMismatch);
                }
                Err(err) => return Err(err),
            }
        }
        if matched == 0 {
            return Err(AppError::LivenessFailed {
                reason: "no liveness frame shows a recognizable face of the voter".into(),
            });
        }
        Ok(matched)
    }

    /// Most recent vote audit events, oldest first.
    pub fn audit_log(&self, limit: usize) -> AppResult<Vec<VoteEvent>> {
        self.ledger.events(limit)
    }

    pub fn results(&self) -> AppResult<BTreeMap<String, u64>> {
        self.ledger.tally()
    }

    pub fn voter(&self, voter_id: &str) -> AppResult<Option<VoterRecord>> {
        self.ledger.voter(voter_id)
    }

    pub fn candidates(&self) -> AppResult<Vec<CandidateSummary>> {
        Ok(self
            .registry
            .enrolled(Cohort::Candidates)?
            .into_iter()
            .map(|identity| CandidateSummary {
                candidate_id: identity.identity_id,
                display_name: identity.display_name,
            })
            .collect())
    }
}
