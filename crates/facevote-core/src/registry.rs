use chrono::{SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use crate::cohort::Cohort;
use crate::db::{is_constraint_violation, Database};
use crate::errors::{AppError, AppResult};
use crate::faces::enrollment::EnrolledIdentity;
use crate::faces::matcher::MatchDecision;

/// Source of truth for enrolled identities; indexes are rebuilt from it.
pub trait IdentityRegistry: Send + Sync {
    fn enroll(&self, cohort: Cohort, identity: &EnrolledIdentity) -> AppResult<()>;
    fn enrolled(&self, cohort: Cohort) -> AppResult<Vec<EnrolledIdentity>>;
    fn find(&self, cohort: Cohort, identity_id: &str) -> AppResult<Option<EnrolledIdentity>>;
    fn record_recognition(&self, cohort: Cohort, decision: &MatchDecision) -> AppResult<()>;
}

#[derive(Clone)]
pub struct SqliteRegistry {
    db: Database,
}

impl SqliteRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn recognition_count(&self, cohort: Cohort) -> AppResult<u64> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM recognitions WHERE cohort = ?1",
            params![cohort.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<(EnrolledIdentity, String)> {
    let embedding: String = row.get(2)?;
    Ok((
        EnrolledIdentity {
            identity_id: row.get(0)?,
            display_name: row.get(1)?,
            embedding: Vec::new(),
            enrollment_image: row.get(3)?,
            enrolled_at: row.get(4)?,
        },
        embedding,
    ))
}

fn decode_embedding(
    (mut identity, embedding): (EnrolledIdentity, String),
) -> AppResult<EnrolledIdentity> {
    identity.embedding = serde_json::from_str(&embedding)?;
    Ok(identity)
}

impl IdentityRegistry for SqliteRegistry {
    fn enroll(&self, cohort: Cohort, identity: &EnrolledIdentity) -> AppResult<()> {
        let embedding = serde_json::to_string(&identity.embedding)?;
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO identities
                (cohort, identity_id, display_name, embedding, enrollment_image, enrolled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                cohort.as_str(),
                identity.identity_id,
                identity.display_name,
                embedding,
                identity.enrollment_image,
                identity.enrolled_at,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(err) if is_constraint_violation(&err) => {
                return Err(AppError::DuplicateIdentity {
                    cohort,
                    identity_id: identity.identity_id.clone(),
                });
            }
            Err(err) => return Err(err.into()),
        }

        if cohort == Cohort::Voters {
            tx.execute(
                "INSERT INTO voters (voter_id, has_voted) VALUES (?1, 0)",
                params![identity.identity_id],
            )?;
        }

        tx.commit()?;
        debug!(cohort = %cohort, "identity enrolled");
        Ok(())
    }

    fn enrolled(&self, cohort: Cohort) -> AppResult<Vec<EnrolledIdentity>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT identity_id, display_name, embedding, enrollment_image, enrolled_at
             FROM identities WHERE cohort = ?1 ORDER BY enrolled_at, identity_id",
        )?;
        let rows = stmt.query_map(params![cohort.as_str()], identity_from_row)?;
        let mut identities = Vec::new();
        for row in rows {
            identities.push(decode_embedding(row?)?);
        }
        Ok(identities)
    }

    fn find(&self, cohort: Cohort, identity_id: &str) -> AppResult<Option<EnrolledIdentity>> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                "SELECT identity_id, display_name, embedding, enrollment_image, enrolled_at
                 FROM identities WHERE cohort = ?1 AND identity_id = ?2",
                params![cohort.as_str(), identity_id],
                identity_from_row,
            )
            .optional()?;
        row.map(decode_embedding).transpose()
    }

    fn record_recognition(&self, cohort: Cohort, decision: &MatchDecision) -> AppResult<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO recognitions (cohort, identity_id, confidence, strategy, recognized_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                cohort.as_str(),
                decision.identity_id,
                decision.confidence,
                decision.strategy.as_str(),
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faces::matcher::MatchStrategy;

    fn identity(id: &str) -> EnrolledIdentity {
        EnrolledIdentity {
            identity_id: id.into(),
            display_name: format!("Person {id}"),
            embedding: vec![0.25, -0.5, 1.0],
            enrollment_image: Some(format!("{id}.png")),
            enrolled_at: "2024-05-01T10:00:00.000Z".into(),
        }
    }

    #[test]
    fn enroll_then_find_round_trips_embedding() {
        let registry = SqliteRegistry::new(Database::open_in_memory().unwrap());
        registry.enroll(Cohort::Candidates, &identity("c1")).unwrap();

        let found = registry.find(Cohort::Candidates, "c1").unwrap().unwrap();
        assert_eq!(found, identity("c1"));
        assert!(registry.find(Cohort::Voters, "c1").unwrap().is_none());
    }

    #[test]
    fn duplicate_enrollment_is_rejected_per_cohort() {
        let registry = SqliteRegistry::new(Database::open_in_memory().unwrap());
        registry.enroll(Cohort::Voters, &identity("x")).unwrap();
        registry.enroll(Cohort::Candidates, &identity("x")).unwrap();

        let err = registry.enroll(Cohort::Voters, &identity("x")).unwrap_err();
        assert!(matches!(
            err,
            AppError::DuplicateIdentity {
                cohort: Cohort::Voters,
                ..
            }
        ));
        assert_eq!(registry.enrolled(Cohort::Voters).unwrap().len(), 1);
    }

    #[test]
    fn voter_enrollment_creates_not_voted_record() {
        let db = Database::open_in_memory().unwrap();
        let registry = SqliteRegistry::new(db.clone());
        registry.enroll(Cohort::Voters, &identity("v1")).unwrap();
        registry.enroll(Cohort::Candidates, &identity("c1")).unwrap();

        let conn = db.lock().unwrap();
        let voters: Vec<(String, i64)> = conn
            .prepare("SELECT voter_id, has_voted FROM voters")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(voters, vec![("v1".to_string(), 0)]);
    }

    #[test]
    fn recognitions_are_logged() {
        let registry = SqliteRegistry::new(Database::open_in_memory().unwrap());
        let decision = MatchDecision {
            identity_id: "c1".into(),
            display_name: "Person c1".into(),
            confidence: 0.9,
            raw_distance: 0.1,
            strategy: MatchStrategy::Index,
        };
        registry
            .record_recognition(Cohort::Candidates, &decision)
            .unwrap();
        assert_eq!(registry.recognition_count(Cohort::Candidates).unwrap(), 1);
        assert_eq!(registry.recognition_count(Cohort::Voters).unwrap(), 0);
    }
}
