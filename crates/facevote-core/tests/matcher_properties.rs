use proptest::prelude::*;

use facevote_core::cohort::{Cohort, CohortSettings};
use facevote_core::errors::AppError;
use facevote_core::faces::enrollment::EnrolledIdentity;
use facevote_core::faces::index::{confidence, EnrollmentIndex, CONFIDENCE_EPSILON};

fn identities(embeddings: &[Vec<f64>]) -> Vec<EnrolledIdentity> {
    embeddings
        .iter()
        .enumerate()
        .map(|(position, embedding)| EnrolledIdentity {
            identity_id: format!("id-{position}"),
            display_name: format!("Identity {position}"),
            embedding: embedding.clone(),
            enrollment_image: None,
            enrolled_at: "2024-01-01T00:00:00.000Z".into(),
        })
        .collect()
}

fn embedding_set() -> impl Strategy<Value = Vec<Vec<f64>>> {
    prop::collection::vec(prop::collection::vec(-1.0f64..1.0, 4), 1..8)
}

proptest! {
    /// An enrolled embedding classifies as its own identity with confidence 1.
    #[test]
    fn enrolled_embedding_matches_itself(embeddings in embedding_set(), pick in any::<prop::sample::Index>(), k in 1usize..6) {
        let settings = CohortSettings { k, ..CohortSettings::for_cohort(Cohort::Voters) };
        let enrolled = identities(&embeddings);
        let index = EnrollmentIndex::train(Cohort::Voters, &enrolled, &settings).unwrap();
        let target = &enrolled[pick.index(enrolled.len())];

        let result = index.classify(&target.embedding).unwrap();
        let duplicated = enrolled
            .iter()
            .filter(|identity| identity.embedding == target.embedding)
            .count();
        prop_assume!(duplicated == 1);
        prop_assert_eq!(&result.identity_id, &target.identity_id);
        prop_assert!((result.confidence - 1.0).abs() < 1e-9);
    }

    /// k never exceeds the number of enrolled samples.
    #[test]
    fn k_is_bounded_by_sample_count(embeddings in embedding_set(), k in 1usize..20) {
        let settings = CohortSettings { k, ..CohortSettings::for_cohort(Cohort::Candidates) };
        let index = EnrollmentIndex::train(Cohort::Candidates, &identities(&embeddings), &settings).unwrap();
        prop_assert!(index.k <= embeddings.len());
        prop_assert!(index.k >= 1);
    }

    /// An empty index refuses every query.
    #[test]
    fn empty_index_is_never_trained(query in prop::collection::vec(-10.0f64..10.0, 0..16)) {
        let settings = CohortSettings::for_cohort(Cohort::Voters);
        let index = EnrollmentIndex::train(Cohort::Voters, &[], &settings).unwrap();
        let is_model_not_trained = matches!(index.classify(&query), Err(AppError::ModelNotTrained { .. }));
        prop_assert!(is_model_not_trained);
    }

    /// Confidence never rises as the nearest distance grows.
    #[test]
    fn confidence_is_monotone_in_nearest_distance(spread in 0.001f64..100.0, a in 0.0f64..1.0, b in 0.0f64..1.0) {
        let (near, far) = if a <= b { (a * spread, b * spread) } else { (b * spread, a * spread) };
        let high = confidence(near, spread);
        let low = confidence(far, spread);
        prop_assert!(high >= low);
        prop_assert!(low >= CONFIDENCE_EPSILON);
        prop_assert!(high <= 1.0);
    }
}
