use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::cohort::Cohort;
use crate::errors::{AppError, AppResult};
use crate::faces::extractor::FaceEmbedding;

const MAX_IDENTITY_LEN: usize = 64;

/// A registered person as stored in the registry. Index samples are derived
/// from these on every rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    pub identity_id: String,
    pub display_name: String,
    pub embedding: Vec<f64>,
    pub enrollment_image: Option<String>,
    pub enrolled_at: String,
}

#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub cohort: Cohort,
    pub identity_id: String,
    pub display_name: String,
    pub image: Vec<u8>,
    /// Where the enrollment photo came from; kept for audit only.
    pub enrollment_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentReceipt {
    pub cohort: Cohort,
    pub identity_id: String,
    pub display_name: String,
    pub embedding_len: usize,
    pub sharpness: f64,
    pub enrolled_at: String,
    pub rebuild_queued: bool,
}

impl RegistrationRequest {
    pub fn validate(&self) -> AppResult<()> {
        validate_identity_id(&self.identity_id)?;
        if self.display_name.trim().is_empty() {
            return Err(AppError::InvalidIdentity {
                identity_id: self.identity_id.clone(),
                message: "display name cannot be empty".into(),
            });
        }
        Ok(())
    }

    pub fn into_identity(self, embedding: &FaceEmbedding) -> EnrolledIdentity {
        EnrolledIdentity {
            identity_id: self.identity_id,
            display_name: self.display_name.trim().to_string(),
            embedding: embedding.vector.clone(),
            enrollment_image: self.enrollment_image,
            enrolled_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

pub fn validate_identity_id(identity_id: &str) -> AppResult<()> {
    if identity_id.is_empty() {
        return Err(AppError::InvalidIdentity {
            identity_id: identity_id.to_string(),
            message: "identity id cannot be empty".into(),
        });
    }

    if identity_id.len() > MAX_IDENTITY_LEN {
        return Err(AppError::InvalidIdentity {
            identity_id: identity_id.to_string(),
            message: format!("identity id longer than {MAX_IDENTITY_LEN} characters"),
        });
    }

    if !identity_id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Err(AppError::InvalidIdentity {
            identity_id: identity_id.to_string(),
            message: "use ASCII letters, numbers, '-' or '_' only".into(),
        });
    }

    Ok(())
}
