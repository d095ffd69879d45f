use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cohort::{Cohort, CohortSettings};
use crate::errors::{AppError, AppResult};
use crate::faces::index::{euclidean_distance, EnrollmentIndex, CONFIDENCE_EPSILON};
use crate::registry::IdentityRegistry;

/// Serving slot for one cohort's index. Readers take a snapshot `Arc` and
/// release the lock before classifying; rebuilds replace the whole value.
pub struct IndexHandle {
    current: RwLock<Arc<EnrollmentIndex>>,
}

impl IndexHandle {
    pub fn new(index: EnrollmentIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    pub fn untrained(cohort: Cohort, settings: &CohortSettings) -> Self {
        Self::new(EnrollmentIndex::untrained(cohort, settings))
    }

    pub fn snapshot(&self) -> Arc<EnrollmentIndex> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Installs `index` and returns the one it replaced.
    pub fn swap(&self, index: EnrollmentIndex) -> Arc<EnrollmentIndex> {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(index))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Index,
    Fallback,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::Index => "index",
            MatchStrategy::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchDecision {
    pub identity_id: String,
    pub display_name: String,
    pub confidence: f64,
    /// Distance to the matched identity: normalized space for `Index`,
    /// raw embedding space for `Fallback`.
    pub raw_distance: f64,
    pub strategy: MatchStrategy,
}

/// Cohort-scoped classifier: index vote first, then a linear scan of the raw
/// registry embeddings when the index is not confident enough.
#[derive(Clone)]
pub struct IdentityMatcher {
    cohort: Cohort,
    settings: CohortSettings,
    handle: Arc<IndexHandle>,
    registry: Arc<dyn IdentityRegistry>,
}

impl IdentityMatcher {
    pub fn new(
        cohort: Cohort,
        settings: CohortSettings,
        handle: Arc<IndexHandle>,
        registry: Arc<dyn IdentityRegistry>,
    ) -> Self {
        Self {
            cohort,
            settings,
            handle,
            registry,
        }
    }

    pub fn cohort(&self) -> Cohort {
        self.cohort
    }

    pub fn settings(&self) -> &CohortSettings {
        &self.settings
    }

    pub fn handle(&self) -> &Arc<IndexHandle> {
        &self.handle
    }

    pub fn match_embedding(&self, embedding: &[f64]) -> AppResult<MatchDecision> {
        let index = self.handle.snapshot();
        let classification = index.classify(embedding)?;
        let threshold = self.settings.confidence_threshold;
        debug!(
            cohort = %self.cohort,
            confidence = classification.confidence,
            threshold,
            neighbors = classification.neighbors,
            "index classification"
        );

        if classification.confidence >= threshold {
            return Ok(MatchDecision {
                identity_id: classification.identity_id,
                display_name: classification.display_name,
                confidence: classification.confidence,
                raw_distance: classification.distance,
                strategy: MatchStrategy::Index,
            });
        }

        let Some(bound) = self.settings.fallback_max_distance else {
            return Err(AppError::LowConfidenceMatch {
                confidence: classification.confidence,
                threshold,
            });
        };

        match self.fallback(embedding, bound)? {
            Some(decision) => Ok(decision),
            None => Err(AppError::LowConfidenceMatch {
                confidence: classification.confidence,
                threshold,
            }),
        }
    }

    /// Linear in the number of enrolled identities.
    fn fallback(&self, embedding: &[f64], bound: f64) -> AppResult<Option<MatchDecision>> {
        let identities = self.registry.enrolled(self.cohort)?;
        let mut best: Option<(f64, usize)> = None;
        for (position, identity) in identities.iter().enumerate() {
            if identity.embedding.len() != embedding.len() {
                warn!(
                    cohort = %self.cohort,
                    expected = embedding.len(),
                    found = identity.embedding.len(),
                    "skipping enrolled embedding with mismatched length"
                );
                continue;
            }
            let distance = euclidean_distance(embedding, &identity.embedding);
            if best.map_or(true, |(current, _)| distance < current) {
                best = Some((distance, position));
            }
        }

        let Some((distance, position)) = best else {
            return Ok(None);
        };
        debug!(cohort = %self.cohort, distance, bound, "fallback nearest embedding");
        if distance > bound {
            return Ok(None);
        }

        let identity = &identities[position];
        let confidence = if bound > 0.0 {
            (1.0 - distance / bound).clamp(CONFIDENCE_EPSILON, 1.0)
        } else {
            1.0
        };
        Ok(Some(MatchDecision {
            identity_id: identity.identity_id.clone(),
            display_name: identity.display_name.clone(),
            confidence,
            raw_distance: distance,
            strategy: MatchStrategy::Fallback,
        }))
    }
}
