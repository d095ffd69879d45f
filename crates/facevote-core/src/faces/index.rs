use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use facevote_config::MetricSetting;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cohort::{Cohort, CohortSettings};
use crate::errors::{AppError, AppResult};
use crate::faces::enrollment::EnrolledIdentity;

/// Lower bound for a non-exact match confidence.
pub const CONFIDENCE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Manhattan,
}

impl From<MetricSetting> for DistanceMetric {
    fn from(setting: MetricSetting) -> Self {
        match setting {
            MetricSetting::Euclidean => DistanceMetric::Euclidean,
            MetricSetting::Manhattan => DistanceMetric::Manhattan,
        }
    }
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            DistanceMetric::Euclidean => euclidean_distance(a, b),
            DistanceMetric::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::Euclidean => f.write_str("euclidean"),
            DistanceMetric::Manhattan => f.write_str("manhattan"),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "manhattan" => Ok(DistanceMetric::Manhattan),
            other => Err(AppError::Config(format!("unknown distance metric '{other}'"))),
        }
    }
}

pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// `1 - nearest / spread`, clamped into `(0, 1]`. A zero spread means every
/// neighbour sits on the query, which is a perfect match.
pub fn confidence(nearest_distance: f64, max_neighbor_distance: f64) -> f64 {
    if max_neighbor_distance <= 0.0 {
        return 1.0;
    }
    (1.0 - nearest_distance / max_neighbor_distance).clamp(CONFIDENCE_EPSILON, 1.0)
}

/// Per-dimension standardization fitted on the enrolled samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Normalizer {
    pub fn fit(vectors: &[&[f64]]) -> Self {
        let dimension = vectors.first().map(|v| v.len()).unwrap_or(0);
        if vectors.is_empty() {
            return Self {
                mean: Vec::new(),
                scale: Vec::new(),
            };
        }

        let count = vectors.len() as f64;
        let mut mean = vec![0.0; dimension];
        for vector in vectors {
            for (acc, value) in mean.iter_mut().zip(vector.iter()) {
                *acc += value;
            }
        }
        mean.iter_mut().for_each(|value| *value /= count);

        let mut scale = vec![0.0; dimension];
        for vector in vectors {
            for ((acc, value), m) in scale.iter_mut().zip(vector.iter()).zip(&mean) {
                *acc += (value - m).powi(2);
            }
        }
        for value in scale.iter_mut() {
            let std = (*value / count).sqrt();
            *value = if std > 0.0 { std } else { 1.0 };
        }

        Self { mean, scale }
    }

    pub fn transform(&self, vector: &[f64]) -> Vec<f64> {
        vector
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(value, (mean, scale))| (value - mean) / scale)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSample {
    pub identity_id: String,
    pub display_name: String,
    /// Normalized feature vector.
    pub features: Vec<f64>,
}

/// Trained classifier state for one cohort. The normalizer travels with the
/// samples it was fitted on; the whole value is replaced on rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentIndex {
    pub build_id: String,
    pub cohort: Cohort,
    pub built_at: String,
    pub dimension: usize,
    pub k: usize,
    pub metric: DistanceMetric,
    pub normalizer: Normalizer,
    pub samples: Vec<IndexSample>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub identity_id: String,
    pub display_name: String,
    pub confidence: f64,
    /// Distance in normalized space to the winner's nearest sample.
    pub distance: f64,
    pub neighbors: usize,
}

struct Neighbor<'a> {
    sample: &'a IndexSample,
    distance: f64,
}

struct Tally<'a> {
    sample: &'a IndexSample,
    weight: f64,
    nearest: f64,
    rank: usize,
}

impl EnrollmentIndex {
    pub fn untrained(cohort: Cohort, settings: &CohortSettings) -> Self {
        Self {
            build_id: Uuid::new_v4().to_string(),
            cohort,
            built_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            dimension: 0,
            k: 0,
            metric: settings.metric,
            normalizer: Normalizer::fit(&[]),
            samples: Vec::new(),
        }
    }

    pub fn train(
        cohort: Cohort,
        identities: &[EnrolledIdentity],
        settings: &CohortSettings,
    ) -> AppResult<Self> {
        let Some(first) = identities.first() else {
            return Ok(Self::untrained(cohort, settings));
        };

        let dimension = first.embedding.len();
        for identity in identities {
            if identity.embedding.len() != dimension {
                return Err(AppError::EmbeddingDimension {
                    expected: dimension,
                    found: identity.embedding.len(),
                });
            }
        }

        let raw: Vec<&[f64]> = identities
            .iter()
            .map(|identity| identity.embedding.as_slice())
            .collect();
        let normalizer = Normalizer::fit(&raw);
        let samples = identities
            .iter()
            .map(|identity| IndexSample {
                identity_id: identity.identity_id.clone(),
                display_name: identity.display_name.clone(),
                features: normalizer.transform(&identity.embedding),
            })
            .collect::<Vec<_>>();

        Ok(Self {
            build_id: Uuid::new_v4().to_string(),
            cohort,
            built_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            dimension,
            k: settings.k.max(1).min(samples.len()),
            metric: settings.metric,
            normalizer,
            samples,
        })
    }

    pub fn is_trained(&self) -> bool {
        !self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Distance-weighted k-nearest-neighbour vote in normalized space.
    pub fn classify(&self, embedding: &[f64]) -> AppResult<Classification> {
        if !self.is_trained() {
            return Err(AppError::ModelNotTrained {
                cohort: self.cohort,
            });
        }
        if embedding.len() != self.dimension {
            return Err(AppError::EmbeddingDimension {
                expected: self.dimension,
                found: embedding.len(),
            });
        }

        let query = self.normalizer.transform(embedding);
        let mut neighbors: Vec<Neighbor<'_>> = self
            .samples
            .iter()
            .map(|sample| Neighbor {
                sample,
                distance: self.metric.distance(&query, &sample.features),
            })
            .collect();
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        let k = self.k.max(1).min(neighbors.len());
        neighbors.truncate(k);

        let max_distance = neighbors
            .iter()
            .map(|neighbor| neighbor.distance)
            .fold(0.0, f64::max);
        let exact = neighbors.iter().any(|neighbor| neighbor.distance <= 0.0);

        let mut tallies: HashMap<&str, Tally<'_>> = HashMap::new();
        for (rank, neighbor) in neighbors.iter().enumerate() {
            let weight = if exact {
                if neighbor.distance <= 0.0 {
                    1.0
                } else {
                    0.0
                }
            } else {
                1.0 / neighbor.distance
            };
            tallies
                .entry(neighbor.sample.identity_id.as_str())
                .and_modify(|tally| tally.weight += weight)
                .or_insert(Tally {
                    sample: neighbor.sample,
                    weight,
                    nearest: neighbor.distance,
                    rank,
                });
        }

        let winner = tallies
            .into_values()
            .max_by(|a, b| {
                a.weight
                    .total_cmp(&b.weight)
                    .then_with(|| b.rank.cmp(&a.rank))
            })
            .ok_or(AppError::ModelNotTrained {
                cohort: self.cohort,
            })?;

        Ok(Classification {
            identity_id: winner.sample.identity_id.clone(),
            display_name: winner.sample.display_name.clone(),
            confidence: confidence(winner.nearest, max_distance),
            distance: winner.nearest,
            neighbors: k,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str, embedding: Vec<f64>) -> EnrolledIdentity {
        EnrolledIdentity {
            identity_id: id.into(),
            display_name: id.to_uppercase(),
            embedding,
            enrollment_image: None,
            enrolled_at: "2024-01-01T00:00:00.000Z".into(),
        }
    }

    fn settings() -> CohortSettings {
        CohortSettings::for_cohort(Cohort::Voters)
    }

    #[test]
    fn untrained_index_refuses_classification() {
        let index = EnrollmentIndex::train(Cohort::Voters, &[], &settings()).unwrap();
        assert!(!index.is_trained());
        let err = index.classify(&[0.1, 0.2]).unwrap_err();
        assert!(matches!(
            err,
            AppError::ModelNotTrained {
                cohort: Cohort::Voters
            }
        ));
    }

    #[test]
    fn k_shrinks_to_sample_count() {
        let index = EnrollmentIndex::train(
            Cohort::Candidates,
            &[identity("c1", vec![1.0, 0.0]), identity("c2", vec![0.0, 1.0])],
            &settings(),
        )
        .unwrap();
        assert_eq!(index.k, 2);
    }

    #[test]
    fn exact_sample_matches_with_full_confidence() {
        let index = EnrollmentIndex::train(
            Cohort::Voters,
            &[
                identity("v1", vec![1.0, 0.0, 0.0]),
                identity("v2", vec![0.0, 1.0, 0.0]),
                identity("v3", vec![0.0, 0.0, 1.0]),
            ],
            &settings(),
        )
        .unwrap();
        let result = index.classify(&[0.0, 1.0, 0.0]).unwrap();
        assert_eq!(result.identity_id, "v2");
        assert_eq!(result.display_name, "V2");
        assert!((result.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn equidistant_neighbors_yield_low_confidence() {
        let index = EnrollmentIndex::train(
            Cohort::Voters,
            &[identity("v1", vec![1.0, 0.0]), identity("v2", vec![-1.0, 0.0])],
            &settings(),
        )
        .unwrap();
        let result = index.classify(&[0.0, 0.0]).unwrap();
        assert_eq!(result.confidence, CONFIDENCE_EPSILON);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let index = EnrollmentIndex::train(
            Cohort::Voters,
            &[identity("v1", vec![1.0, 0.0])],
            &settings(),
        )
        .unwrap();
        let err = index.classify(&[1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            AppError::EmbeddingDimension {
                expected: 2,
                found: 3
            }
        ));
    }

    #[test]
    fn normalizer_treats_constant_dimensions_as_unit_scale() {
        let a = [1.0, 5.0];
        let b = [3.0, 5.0];
        let normalizer = Normalizer::fit(&[&a, &b]);
        assert_eq!(normalizer.mean, vec![2.0, 5.0]);
        assert_eq!(normalizer.scale, vec![1.0, 1.0]);
        assert_eq!(normalizer.transform(&[3.0, 6.0]), vec![1.0, 1.0]);
    }

    #[test]
    fn metric_parses_case_insensitively() {
        assert_eq!(
            "Manhattan".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::Manhattan
        );
        assert_eq!(DistanceMetric::Manhattan.distance(&[0.0, 0.0], &[1.0, 2.0]), 3.0);
    }
}
