use std::fmt;
use std::str::FromStr;

use facevote_config::ResolvedCohort;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::faces::index::DistanceMetric;

/// An independently trained enrollment population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cohort {
    Voters,
    Candidates,
}

impl Cohort {
    pub const ALL: [Cohort; 2] = [Cohort::Voters, Cohort::Candidates];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cohort::Voters => "voters",
            Cohort::Candidates => "candidates",
        }
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cohort {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "voters" | "voter" => Ok(Cohort::Voters),
            "candidates" | "candidate" => Ok(Cohort::Candidates),
            other => Err(AppError::Config(format!("unknown cohort '{other}'"))),
        }
    }
}

/// Per-cohort classifier tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortSettings {
    pub k: usize,
    pub confidence_threshold: f64,
    /// Absolute distance bound for the raw-embedding fallback; `None` disables it.
    pub fallback_max_distance: Option<f64>,
    pub metric: DistanceMetric,
}

impl CohortSettings {
    pub fn for_cohort(cohort: Cohort) -> Self {
        match cohort {
            Cohort::Voters => Self {
                k: 3,
                confidence_threshold: 0.6,
                fallback_max_distance: Some(0.5),
                metric: DistanceMetric::Euclidean,
            },
            Cohort::Candidates => Self {
                k: 3,
                confidence_threshold: 0.1,
                fallback_max_distance: Some(0.5),
                metric: DistanceMetric::Euclidean,
            },
        }
    }
}

impl From<&ResolvedCohort> for CohortSettings {
    fn from(resolved: &ResolvedCohort) -> Self {
        Self {
            k: resolved.k,
            confidence_threshold: resolved.confidence_threshold,
            fallback_max_distance: resolved.fallback_max_distance,
            metric: resolved.metric.into(),
        }
    }
}
