use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult, ErrorKind};
use crate::faces::matcher::MatchDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

/// Caller-facing outcome of an identification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MatchResult {
    pub fn from_outcome(outcome: &AppResult<MatchDecision>) -> Self {
        match outcome {
            Ok(decision) => Self {
                status: Status::Success,
                identity_id: Some(decision.identity_id.clone()),
                display_name: Some(decision.display_name.clone()),
                confidence: Some(decision.confidence),
                error_kind: None,
                message: None,
            },
            Err(err) => Self {
                status: Status::Error,
                identity_id: None,
                display_name: None,
                confidence: None,
                error_kind: Some(err.kind()),
                message: Some(err.human_message()),
            },
        }
    }
}

/// Caller-facing outcome of a vote. Carries no candidate so it cannot serve
/// as a receipt of the choice made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteCastResult {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VoteCastResult {
    pub fn from_outcome<T>(outcome: &AppResult<T>) -> Self {
        match outcome {
            Ok(_) => Self::success(),
            Err(err) => Self::failure(err),
        }
    }

    pub fn success() -> Self {
        Self {
            status: Status::Success,
            error_kind: None,
            message: None,
        }
    }

    pub fn failure(err: &AppError) -> Self {
        Self {
            status: Status::Error,
            error_kind: Some(err.kind()),
            message: Some(err.human_message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faces::matcher::MatchStrategy;
    use crate::ledger::VoteRecord;
    use serde_json::json;

    #[test]
    fn match_success_serializes_identity_and_confidence() {
        let decision = MatchDecision {
            identity_id: "v1".into(),
            display_name: "Ada".into(),
            confidence: 0.75,
            raw_distance: 0.2,
            strategy: MatchStrategy::Index,
        };
        let value = serde_json::to_value(MatchResult::from_outcome(&Ok(decision))).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "success",
                "identity_id": "v1",
                "display_name": "Ada",
                "confidence": 0.75
            })
        );
    }

    #[test]
    fn match_error_carries_kind_only() {
        let value =
            serde_json::to_value(MatchResult::from_outcome(&Err(AppError::NoFaceDetected)))
                .unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error_kind"], "NoFaceDetected");
        assert!(value.get("identity_id").is_none());
    }

    #[test]
    fn vote_success_never_echoes_candidate() {
        let record = VoteRecord {
            voter_id: "v1".into(),
            candidate_id: "c1".into(),
            cast_at: "2024-01-01T00:00:00.000Z".into(),
        };
        let value = serde_json::to_value(VoteCastResult::from_outcome(&Ok(record))).unwrap();
        assert_eq!(value, json!({ "status": "success" }));
    }
}
