use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use image::ImageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::redact;
use crate::cohort::Cohort;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to decode image: {source}")]
    ImageDecode {
        #[source]
        source: ImageError,
    },

    #[error("no face detected in image")]
    NoFaceDetected,

    #[error("image too blurry for recognition (sharpness {score:.2} below {threshold:.2})")]
    BlurryImage { score: f64, threshold: f64 },

    #[error("no enrollment index trained for cohort {cohort}")]
    ModelNotTrained { cohort: Cohort },

    #[error("match confidence {confidence:.4} below threshold {threshold:.4}")]
    LowConfidenceMatch { confidence: f64, threshold: f64 },

    #[error("face does not match the claimed identity")]
    IdentityMismatch,

    #[error("liveness check failed: {reason}")]
    LivenessFailed { reason: String },

    #[error("possible spoofing detected: {reason}")]
    SpoofSuspected { reason: String },

    #[error("voter {voter_id} not found")]
    VoterNotFound { voter_id: String },

    #[error("voter {voter_id} has already voted")]
    AlreadyVoted { voter_id: String },

    #[error("candidate {candidate_id} not found")]
    CandidateNotFound { candidate_id: String },

    #[error("identity {identity_id} is already enrolled in cohort {cohort}")]
    DuplicateIdentity { cohort: Cohort, identity_id: String },

    #[error("invalid identity '{identity_id}': {message}")]
    InvalidIdentity {
        identity_id: String,
        message: String,
    },

    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("missing {kind} model; provide {flag} or set ${env}")]
    MissingModel {
        kind: &'static str,
        flag: &'static str,
        env: &'static str,
    },

    #[error("failed to load model {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    #[error("face backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("embedding length mismatch (expected {expected}, found {found})")]
    EmbeddingDimension { expected: usize, found: usize },

    #[error("embedding is invalid: {0}")]
    InvalidEmbedding(String),

    #[error("failed to read index artifact {path}: {source}")]
    IndexRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write index artifact {path}: {source}")]
    IndexWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("index artifact {path} is invalid: {message}")]
    InvalidIndex { path: PathBuf, message: String },

    #[error("index artifact {path} is encrypted and requires a key")]
    EncryptedIndexRequiresKey { path: PathBuf },

    #[error("index encryption error: {0}")]
    Encryption(String),

    #[error("index rebuild for cohort {cohort} failed: {message}")]
    Rebuild { cohort: Cohort, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Wire-level error taxonomy returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ImageDecodeError,
    NoFaceDetected,
    BlurryImage,
    ModelNotTrained,
    LowConfidenceMatch,
    IdentityMismatch,
    LivenessFailed,
    SpoofSuspected,
    VoterNotFound,
    AlreadyVoted,
    CandidateNotFound,
    DuplicateIdentity,
    InvalidIdentity,
    PersistenceError,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::ImageDecode { .. } => ErrorKind::ImageDecodeError,
            AppError::NoFaceDetected => ErrorKind::NoFaceDetected,
            AppError::BlurryImage { .. } => ErrorKind::BlurryImage,
            AppError::ModelNotTrained { .. } => ErrorKind::ModelNotTrained,
            AppError::LowConfidenceMatch { .. } => ErrorKind::LowConfidenceMatch,
            AppError::IdentityMismatch => ErrorKind::IdentityMismatch,
            AppError::LivenessFailed { .. } => ErrorKind::LivenessFailed,
            AppError::SpoofSuspected { .. } => ErrorKind::SpoofSuspected,
            AppError::VoterNotFound { .. } => ErrorKind::VoterNotFound,
            AppError::AlreadyVoted { .. } => ErrorKind::AlreadyVoted,
            AppError::CandidateNotFound { .. } => ErrorKind::CandidateNotFound,
            AppError::DuplicateIdentity { .. } => ErrorKind::DuplicateIdentity,
            AppError::InvalidIdentity { .. } => ErrorKind::InvalidIdentity,
            AppError::Storage(_)
            | AppError::StorageUnavailable(_)
            | AppError::Io(_)
            | AppError::Serialization(_)
            | AppError::IndexRead { .. }
            | AppError::IndexWrite { .. }
            | AppError::InvalidIndex { .. }
            | AppError::EncryptedIndexRequiresKey { .. }
            | AppError::Encryption(_) => ErrorKind::PersistenceError,
            AppError::MissingModel { .. }
            | AppError::ModelLoad { .. }
            | AppError::BackendUnavailable(_)
            | AppError::EmbeddingDimension { .. }
            | AppError::InvalidEmbedding(_)
            | AppError::Rebuild { .. }
            | AppError::Config(_) => ErrorKind::Internal,
        }
    }

    /// True for faults an operator should look at; everything else is an
    /// expected rejection of the request.
    pub fn is_operational(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::PersistenceError | ErrorKind::Internal
        )
    }

    pub fn exit_code(&self) -> ExitCode {
        match self.kind() {
            ErrorKind::ImageDecodeError
            | ErrorKind::NoFaceDetected
            | ErrorKind::BlurryImage
            | ErrorKind::DuplicateIdentity
            | ErrorKind::InvalidIdentity => ExitCode::from(2),
            ErrorKind::ModelNotTrained
            | ErrorKind::LowConfidenceMatch
            | ErrorKind::IdentityMismatch
            | ErrorKind::LivenessFailed
            | ErrorKind::SpoofSuspected
            | ErrorKind::AlreadyVoted => ExitCode::from(3),
            ErrorKind::VoterNotFound | ErrorKind::CandidateNotFound => ExitCode::from(4),
            ErrorKind::PersistenceError | ErrorKind::Internal => ExitCode::from(1),
        }
    }

    pub fn human_message(&self) -> String {
        self.to_string()
    }

    /// Message with voter, candidate and identity ids replaced by their
    /// `audit::redact` digest. Used wherever errors reach the logs.
    pub fn redacted_message(&self) -> String {
        match self {
            AppError::VoterNotFound { voter_id } => {
                format!("voter {} not found", redact(voter_id))
            }
            AppError::AlreadyVoted { voter_id } => {
                format!("voter {} has already voted", redact(voter_id))
            }
            AppError::CandidateNotFound { candidate_id } => {
                format!("candidate {} not found", redact(candidate_id))
            }
            AppError::DuplicateIdentity {
                cohort,
                identity_id,
            } => format!(
                "identity {} is already enrolled in cohort {cohort}",
                redact(identity_id)
            ),
            AppError::InvalidIdentity {
                identity_id,
                message,
            } => format!("invalid identity {}: {message}", redact(identity_id)),
            other => other.to_string(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
