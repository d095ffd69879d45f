use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::audit::redact;
use crate::cohort::Cohort;
use crate::db::{is_constraint_violation, Database};
use crate::errors::{AppError, AppResult, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VoterState {
    NotVoted,
    Voted,
}

impl VoterState {
    fn from_flag(flag: i64) -> Self {
        if flag == 0 {
            VoterState::NotVoted
        } else {
            VoterState::Voted
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoterRecord {
    pub voter_id: String,
    pub state: VoterState,
    pub enrollment_image: Option<String>,
}

impl VoterRecord {
    pub fn has_voted(&self) -> bool {
        self.state == VoterState::Voted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteRecord {
    pub voter_id: String,
    pub candidate_id: String,
    pub cast_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteEventKind {
    Accepted,
    Rejected,
}

impl VoteEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteEventKind::Accepted => "accepted",
            VoteEventKind::Rejected => "rejected",
        }
    }

    fn parse(value: &str) -> rusqlite::Result<Self> {
        match value {
            "accepted" => Ok(VoteEventKind::Accepted),
            "rejected" => Ok(VoteEventKind::Rejected),
            other => Err(rusqlite::Error::InvalidColumnType(
                2,
                format!("kind '{other}'"),
                rusqlite::types::Type::Text,
            )),
        }
    }
}

/// One row of the append-only vote audit trail. Voters appear only as
/// their redacted digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteEvent {
    pub id: i64,
    pub voter_digest: String,
    pub kind: VoteEventKind,
    pub reason: Option<ErrorKind>,
    pub recorded_at: String,
}

/// Stored under the same name the wire format uses.
fn reason_to_column(reason: ErrorKind) -> String {
    format!("{reason:?}")
}

fn reason_from_column(value: Option<String>) -> rusqlite::Result<Option<ErrorKind>> {
    value
        .map(|name| {
            serde_json::from_value(serde_json::Value::String(name.clone())).map_err(|_| {
                rusqlite::Error::InvalidColumnType(
                    3,
                    format!("reason '{name}'"),
                    rusqlite::types::Type::Text,
                )
            })
        })
        .transpose()
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Enforces one vote per voter. `record_vote` is the only writer of voter
/// state and the `votes` table; every accepted vote and every recorded
/// rejection also lands in the `vote_events` trail.
pub trait VoteLedger: Send + Sync {
    fn voter(&self, voter_id: &str) -> AppResult<Option<VoterRecord>>;
    fn record_vote(&self, voter_id: &str, candidate_id: &str) -> AppResult<VoteRecord>;
    fn record_rejection(&self, voter_id: &str, reason: ErrorKind) -> AppResult<()>;
    /// The most recent `limit` events, oldest first.
    fn events(&self, limit: usize) -> AppResult<Vec<VoteEvent>>;
    /// Vote counts keyed by candidate; enrolled candidates without votes count 0.
    fn tally(&self) -> AppResult<BTreeMap<String, u64>>;
    fn vote_count(&self) -> AppResult<u64>;
}

#[derive(Clone)]
pub struct SqliteVoteLedger {
    db: Database,
}

impl SqliteVoteLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl VoteLedger for SqliteVoteLedger {
    fn voter(&self, voter_id: &str) -> AppResult<Option<VoterRecord>> {
        let conn = self.db.lock()?;
        let record = conn
            .query_row(
                "SELECT v.voter_id, v.has_voted, i.enrollment_image
                 FROM voters v
                 LEFT JOIN identities i ON i.cohort = ?2 AND i.identity_id = v.voter_id
                 WHERE v.voter_id = ?1",
                params![voter_id, Cohort::Voters.as_str()],
                |row| {
                    Ok(VoterRecord {
                        voter_id: row.get(0)?,
                        state: VoterState::from_flag(row.get(1)?),
                        enrollment_image: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn record_vote(&self, voter_id: &str, candidate_id: &str) -> AppResult<VoteRecord> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists = tx
            .query_row(
                "SELECT has_voted FROM voters WHERE voter_id = ?1",
                params![voter_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(AppError::VoterNotFound {
                voter_id: voter_id.to_string(),
            });
        }

        let updated = tx.execute(
            "UPDATE voters SET has_voted = 1 WHERE voter_id = ?1 AND has_voted = 0",
            params![voter_id],
        )?;
        if updated == 0 {
            return Err(AppError::AlreadyVoted {
                voter_id: voter_id.to_string(),
            });
        }

        let record = VoteRecord {
            voter_id: voter_id.to_string(),
            candidate_id: candidate_id.to_string(),
            cast_at: now(),
        };
        match tx.execute(
            "INSERT INTO votes (voter_id, candidate_id, cast_at) VALUES (?1, ?2, ?3)",
            params![record.voter_id, record.candidate_id, record.cast_at],
        ) {
            Ok(_) => {}
            Err(err) if is_constraint_violation(&err) => {
                return Err(AppError::AlreadyVoted {
                    voter_id: voter_id.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        }
        tx.execute(
            "INSERT INTO vote_events (voter_digest, kind, reason, recorded_at)
             VALUES (?1, ?2, NULL, ?3)",
            params![
                redact(voter_id),
                VoteEventKind::Accepted.as_str(),
                record.cast_at
            ],
        )?;

        tx.commit()?;
        Ok(record)
    }

    fn record_rejection(&self, voter_id: &str, reason: ErrorKind) -> AppResult<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO vote_events (voter_digest, kind, reason, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                redact(voter_id),
                VoteEventKind::Rejected.as_str(),
                reason_to_column(reason),
                now()
            ],
        )?;
        Ok(())
    }

    fn events(&self, limit: usize) -> AppResult<Vec<VoteEvent>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, voter_digest, kind, reason, recorded_at FROM vote_events
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(VoteEvent {
                id: row.get(0)?,
                voter_digest: row.get(1)?,
                kind: VoteEventKind::parse(&row.get::<_, String>(2)?)?,
                reason: reason_from_column(row.get(3)?)?,
                recorded_at: row.get(4)?,
            })
        })?;
        let mut events = rows.collect::<Result<Vec<_>, _>>()?;
        events.reverse();
        Ok(events)
    }

    fn tally(&self) -> AppResult<BTreeMap<String, u64>> {
        let conn = self.db.lock()?;
        let mut results = BTreeMap::new();

        let mut candidates =
            conn.prepare("SELECT identity_id FROM identities WHERE cohort = ?1")?;
        for candidate in candidates.query_map(params![Cohort::Candidates.as_str()], |row| {
            row.get::<_, String>(0)
        })? {
            results.insert(candidate?, 0);
        }

        let mut counts = conn.prepare(
            "SELECT candidate_id, COUNT(*) FROM votes GROUP BY candidate_id ORDER BY candidate_id",
        )?;
        for row in counts.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })? {
            let (candidate_id, count) = row?;
            results.insert(candidate_id, count as u64);
        }

        Ok(results)
    }

    fn vote_count(&self) -> AppResult<u64> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM votes", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
