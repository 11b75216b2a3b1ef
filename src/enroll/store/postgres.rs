//! Postgres store backend.
//!
//! Every mutating operation is either a single guarded statement or a
//! transaction holding the session row lock, so the version/step
//! preconditions and the actual write can never tear apart.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{PgPool, Row};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::enroll::codes::{hashes_match, CodePolicy};
use crate::enroll::machine;
use crate::enroll::models::{
    AccountRecord, Channel, CollegeRecord, CollegeRef, EnrollmentSession, FinalizeResult, Flow,
    Step,
};

use super::{
    ApplyOutcome, EnrollmentStore, FinalizeOutcome, FinalizeSeed, IssueOutcome, ValidateOutcome,
};

const SESSION_COLUMNS: &str = r"
    id,
    flow,
    current_step,
    version,
    collected::text AS collected,
    finalize_result::text AS finalize_result,
    EXTRACT(EPOCH FROM created_at)::BIGINT AS created_at_unix,
    EXTRACT(EPOCH FROM expires_at)::BIGINT AS expires_at_unix,
    expires_at > NOW() AS live
";

/// [`EnrollmentStore`] backed by a Postgres pool.
#[derive(Clone, Debug)]
pub struct PgEnrollmentStore {
    pool: PgPool,
}

impl PgEnrollmentStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct SessionRow {
    session: EnrollmentSession,
    live: bool,
}

fn session_from_row(row: &sqlx::postgres::PgRow) -> Result<SessionRow> {
    let flow: String = row.get("flow");
    let flow = Flow::parse(&flow).ok_or_else(|| anyhow!("unknown flow in store: {flow}"))?;
    let current_step: String = row.get("current_step");
    let current_step = Step::parse(&current_step)
        .ok_or_else(|| anyhow!("unknown step in store: {current_step}"))?;
    let collected: String = row.get("collected");
    let collected: Map<String, Value> =
        serde_json::from_str(&collected).context("failed to parse collected data")?;
    let finalize_result: Option<String> = row.get("finalize_result");
    let finalize_result = finalize_result
        .map(|text| serde_json::from_str::<FinalizeResult>(&text))
        .transpose()
        .context("failed to parse cached finalize result")?;

    Ok(SessionRow {
        session: EnrollmentSession {
            id: row.get("id"),
            flow,
            current_step,
            version: row.get("version"),
            collected,
            created_at_unix: row.get("created_at_unix"),
            expires_at_unix: row.get("expires_at_unix"),
            finalize_result,
        },
        live: row.get("live"),
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn violated_constraint(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint().map(str::to_string),
        _ => None,
    }
}

#[async_trait]
impl EnrollmentStore for PgEnrollmentStore {
    async fn create_session(
        &self,
        flow: Flow,
        collected: Map<String, Value>,
        ttl_seconds: i64,
    ) -> Result<EnrollmentSession> {
        let id = Uuid::new_v4();
        let collected_text = serde_json::to_string(&Value::Object(collected.clone()))
            .context("failed to serialize collected data")?;
        let query = r"
            INSERT INTO enrollment_sessions (id, flow, current_step, version, collected, expires_at)
            VALUES ($1, $2, 'initiated', 0, $3::jsonb, NOW() + ($4 * INTERVAL '1 second'))
            RETURNING
                EXTRACT(EPOCH FROM created_at)::BIGINT AS created_at_unix,
                EXTRACT(EPOCH FROM expires_at)::BIGINT AS expires_at_unix
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .bind(flow.as_str())
            .bind(&collected_text)
            .bind(ttl_seconds)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert enrollment session")?;

        Ok(EnrollmentSession {
            id,
            flow,
            current_step: Step::Initiated,
            version: 0,
            collected,
            created_at_unix: row.get("created_at_unix"),
            expires_at_unix: row.get("expires_at_unix"),
            finalize_result: None,
        })
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<EnrollmentSession>> {
        let query =
            format!("SELECT {SESSION_COLUMNS} FROM enrollment_sessions WHERE id = $1 LIMIT 1");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load enrollment session")?;

        row.map(|row| session_from_row(&row).map(|parsed| parsed.session))
            .transpose()
    }

    async fn apply_step(
        &self,
        id: Uuid,
        expected_version: i64,
        expected_step: Step,
        patch: Map<String, Value>,
        next_step: Step,
    ) -> Result<ApplyOutcome> {
        let patch_text = serde_json::to_string(&Value::Object(patch))
            .context("failed to serialize step patch")?;
        // One guarded statement: all preconditions and the mutation succeed
        // or fail together, which is what makes concurrent submissions with
        // the same token yield exactly one winner.
        let query = format!(
            r"
            UPDATE enrollment_sessions
            SET collected = collected || $4::jsonb,
                current_step = $5,
                version = version + 1
            WHERE id = $1
              AND version = $2
              AND current_step = $3
              AND expires_at > NOW()
            RETURNING {SESSION_COLUMNS}
        "
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(expected_version)
            .bind(expected_step.as_str())
            .bind(&patch_text)
            .bind(next_step.as_str())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to apply enrollment step")?;

        if let Some(row) = row {
            return Ok(ApplyOutcome::Applied(session_from_row(&row)?.session));
        }

        // The guard refused; re-read once to tell the caller why.
        let Some(session) = self.get_session(id).await? else {
            return Ok(ApplyOutcome::NotFound);
        };
        if session.current_step == Step::Completed {
            return Ok(ApplyOutcome::AlreadyCompleted);
        }
        let live_query = "SELECT expires_at > NOW() AS live FROM enrollment_sessions WHERE id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = live_query
        );
        let live: bool = sqlx::query(live_query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to check session liveness")?
            .is_some_and(|row| row.get("live"));
        if !live {
            return Ok(ApplyOutcome::Expired);
        }
        if session.current_step != expected_step {
            return Ok(ApplyOutcome::StepMismatch {
                current: session.current_step,
            });
        }
        Ok(ApplyOutcome::VersionConflict)
    }

    async fn issue_code(
        &self,
        id: Uuid,
        channel: Channel,
        code_hash: Vec<u8>,
        policy: &CodePolicy,
    ) -> Result<IssueOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin issue-code transaction")?;

        // Lock the session row so concurrent issuance for the same session
        // serializes on the cooldown check.
        let query = r"
            SELECT expires_at > NOW() AS live
            FROM enrollment_sessions
            WHERE id = $1
            FOR UPDATE
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to lock session for code issue")?;
        let Some(row) = row else {
            let _ = tx.rollback().await;
            return Ok(IssueOutcome::NotFound);
        };
        let live: bool = row.get("live");
        if !live {
            let _ = tx.rollback().await;
            return Ok(IssueOutcome::Expired);
        }

        let query = r"
            SELECT EXTRACT(EPOCH FROM (NOW() - MAX(issued_at)))::BIGINT AS elapsed
            FROM verification_codes
            WHERE session_id = $1 AND channel = $2
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let elapsed: Option<i64> = sqlx::query(query)
            .bind(id)
            .bind(channel.as_str())
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .context("failed to check resend cooldown")?
            .get("elapsed");
        if let Some(elapsed) = elapsed {
            if elapsed < policy.resend_cooldown_seconds() {
                let _ = tx.rollback().await;
                return Ok(IssueOutcome::Cooldown {
                    retry_after_seconds: policy.resend_cooldown_seconds() - elapsed,
                });
            }
        }

        // A new issue invalidates whatever was active for the channel.
        let query = r"
            UPDATE verification_codes
            SET superseded = TRUE
            WHERE session_id = $1 AND channel = $2 AND consumed_at IS NULL AND NOT superseded
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(channel.as_str())
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to supersede prior code")?;

        let query = r"
            INSERT INTO verification_codes (session_id, channel, code_hash, expires_at)
            VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(channel.as_str())
            .bind(&code_hash)
            .bind(policy.ttl_seconds())
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert verification code")?;

        tx.commit()
            .await
            .context("failed to commit issue-code transaction")?;
        Ok(IssueOutcome::Issued)
    }

    async fn validate_code(
        &self,
        id: Uuid,
        channel: Channel,
        submitted_hash: Vec<u8>,
        policy: &CodePolicy,
    ) -> Result<ValidateOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin validate-code transaction")?;

        let query = r"
            SELECT expires_at > NOW() AS live
            FROM enrollment_sessions
            WHERE id = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to load session for validation")?;
        let Some(row) = row else {
            let _ = tx.rollback().await;
            return Ok(ValidateOutcome::NotFound);
        };
        let live: bool = row.get("live");
        if !live {
            let _ = tx.rollback().await;
            return Ok(ValidateOutcome::Expired);
        }

        let query = r"
            SELECT EXISTS(
                SELECT 1 FROM verification_codes
                WHERE session_id = $1 AND channel = $2 AND consumed_at IS NOT NULL
            ) AS consumed
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let consumed: bool = sqlx::query(query)
            .bind(id)
            .bind(channel.as_str())
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .context("failed to check consumed state")?
            .get("consumed");
        if consumed {
            // Replays of an already-consumed code are plain failures.
            let _ = tx.rollback().await;
            return Ok(ValidateOutcome::Invalid);
        }

        // Lock the live code row so the compare and the counter update are
        // one unit even under concurrent submissions.
        let query = r"
            SELECT id, code_hash, attempts, expires_at > NOW() AS live
            FROM verification_codes
            WHERE session_id = $1 AND channel = $2 AND consumed_at IS NULL AND NOT superseded
            ORDER BY issued_at DESC
            LIMIT 1
            FOR UPDATE
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .bind(channel.as_str())
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to lock verification code")?;
        let Some(row) = row else {
            let _ = tx.rollback().await;
            return Ok(ValidateOutcome::Expired);
        };

        let code_id: Uuid = row.get("id");
        let code_hash: Vec<u8> = row.get("code_hash");
        let attempts: i32 = row.get("attempts");
        let code_live: bool = row.get("live");
        if !code_live {
            let _ = tx.rollback().await;
            return Ok(ValidateOutcome::Expired);
        }
        if attempts >= policy.max_attempts() {
            let _ = tx.rollback().await;
            return Ok(ValidateOutcome::TooManyAttempts);
        }

        if hashes_match(&code_hash, &submitted_hash) {
            let query = "UPDATE verification_codes SET consumed_at = NOW() WHERE id = $1";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(code_id)
                .execute(&mut *tx)
                .instrument(span)
                .await
                .context("failed to consume verification code")?;
            tx.commit()
                .await
                .context("failed to commit code consumption")?;
            Ok(ValidateOutcome::Valid)
        } else {
            let query = "UPDATE verification_codes SET attempts = attempts + 1 WHERE id = $1";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(code_id)
                .execute(&mut *tx)
                .instrument(span)
                .await
                .context("failed to record failed attempt")?;
            tx.commit()
                .await
                .context("failed to commit failed attempt")?;
            Ok(ValidateOutcome::Invalid)
        }
    }

    async fn channel_consumed(&self, id: Uuid, channel: Channel) -> Result<bool> {
        let query = r"
            SELECT EXISTS(
                SELECT 1 FROM verification_codes
                WHERE session_id = $1 AND channel = $2 AND consumed_at IS NOT NULL
            ) AS consumed
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let consumed = sqlx::query(query)
            .bind(id)
            .bind(channel.as_str())
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to check channel state")?
            .get("consumed");
        Ok(consumed)
    }

    async fn get_college(&self, id: Uuid) -> Result<Option<CollegeRecord>> {
        let query = "SELECT id, name FROM colleges WHERE id = $1 LIMIT 1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load college")?;
        Ok(row.map(|row| CollegeRecord {
            id: row.get("id"),
            name: row.get("name"),
        }))
    }

    async fn finalize(
        &self,
        id: Uuid,
        expected_version: i64,
        seed: FinalizeSeed,
    ) -> Result<FinalizeOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin finalize transaction")?;

        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM enrollment_sessions WHERE id = $1 FOR UPDATE"
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to lock session for finalize")?;
        let Some(row) = row else {
            let _ = tx.rollback().await;
            return Ok(FinalizeOutcome::NotFound);
        };
        let SessionRow { session, live } = session_from_row(&row)?;

        if session.current_step == Step::Completed {
            let _ = tx.rollback().await;
            let result = session
                .finalize_result
                .ok_or_else(|| anyhow!("completed session {id} has no cached result"))?;
            return Ok(FinalizeOutcome::AlreadyCompleted(result));
        }
        if !live {
            let _ = tx.rollback().await;
            return Ok(FinalizeOutcome::Expired);
        }

        let mut missing: Vec<String> = machine::missing_for_finalize(&session.collected)
            .into_iter()
            .map(str::to_string)
            .collect();
        if session.current_step == Step::VerificationPending {
            for channel in Channel::ALL {
                let query = r"
                    SELECT EXISTS(
                        SELECT 1 FROM verification_codes
                        WHERE session_id = $1 AND channel = $2 AND consumed_at IS NOT NULL
                    ) AS consumed
                ";
                let span = info_span!(
                    "db.query",
                    db.system = "postgresql",
                    db.operation = "SELECT",
                    db.statement = query
                );
                let consumed: bool = sqlx::query(query)
                    .bind(id)
                    .bind(channel.as_str())
                    .fetch_one(&mut *tx)
                    .instrument(span)
                    .await
                    .context("failed to check channel state")?
                    .get("consumed");
                if !consumed {
                    missing.push(format!("{}_verification", channel.as_str()));
                }
            }
        } else {
            missing.push("verification".to_string());
        }
        if !missing.is_empty() {
            let _ = tx.rollback().await;
            return Ok(FinalizeOutcome::Incomplete { missing });
        }
        if session.version != expected_version {
            let _ = tx.rollback().await;
            return Ok(FinalizeOutcome::VersionConflict);
        }

        let college = match &seed.college {
            CollegeRef::Existing(college_id) => {
                let query = "SELECT id, name FROM colleges WHERE id = $1 LIMIT 1";
                let span = info_span!(
                    "db.query",
                    db.system = "postgresql",
                    db.operation = "SELECT",
                    db.statement = query
                );
                let row = sqlx::query(query)
                    .bind(college_id)
                    .fetch_optional(&mut *tx)
                    .instrument(span)
                    .await
                    .context("failed to resolve college")?;
                match row {
                    Some(row) => CollegeRecord {
                        id: row.get("id"),
                        name: row.get("name"),
                    },
                    None => {
                        let _ = tx.rollback().await;
                        return Ok(FinalizeOutcome::Incomplete {
                            missing: vec!["college".to_string()],
                        });
                    }
                }
            }
            CollegeRef::New(name) => {
                let query = "SELECT id, name FROM colleges WHERE LOWER(name) = LOWER($1) LIMIT 1";
                let span = info_span!(
                    "db.query",
                    db.system = "postgresql",
                    db.operation = "SELECT",
                    db.statement = query
                );
                let existing = sqlx::query(query)
                    .bind(name)
                    .fetch_optional(&mut *tx)
                    .instrument(span)
                    .await
                    .context("failed to look up college by name")?;
                match existing {
                    Some(row) => CollegeRecord {
                        id: row.get("id"),
                        name: row.get("name"),
                    },
                    None => {
                        let query = "INSERT INTO colleges (name) VALUES ($1) RETURNING id, name";
                        let span = info_span!(
                            "db.query",
                            db.system = "postgresql",
                            db.operation = "INSERT",
                            db.statement = query
                        );
                        let row = sqlx::query(query)
                            .bind(name)
                            .fetch_one(&mut *tx)
                            .instrument(span)
                            .await
                            .context("failed to create college")?;
                        CollegeRecord {
                            id: row.get("id"),
                            name: row.get("name"),
                        }
                    }
                }
            }
        };

        let account_id = Uuid::new_v4();
        let query = r"
            INSERT INTO accounts
                (id, email, phone, full_name, role, password_hash, college_id, session_id, access_token_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let inserted = sqlx::query(query)
            .bind(account_id)
            .bind(&seed.email)
            .bind(&seed.phone)
            .bind(&seed.full_name)
            .bind(&seed.role)
            .bind(&seed.password_hash)
            .bind(college.id)
            .bind(id)
            .bind(&seed.credential.token_hash)
            .execute(&mut *tx)
            .instrument(span)
            .await;
        if let Err(err) = inserted {
            let _ = tx.rollback().await;
            if is_unique_violation(&err) {
                // The session row is locked, so a session-key collision means
                // another worker finalized and committed before we locked; an
                // email collision is a genuine duplicate contact. Both read
                // as "this draft cannot create a second account".
                if violated_constraint(&err).as_deref() == Some("accounts_session_key") {
                    let Some(session) = self.get_session(id).await? else {
                        return Ok(FinalizeOutcome::NotFound);
                    };
                    if let Some(result) = session.finalize_result {
                        return Ok(FinalizeOutcome::AlreadyCompleted(result));
                    }
                }
                return Ok(FinalizeOutcome::DuplicateContact);
            }
            return Err(err).context("failed to insert account");
        }

        let account = AccountRecord {
            id: account_id,
            email: seed.email,
            phone: seed.phone,
            full_name: seed.full_name,
            role: seed.role,
            college,
        };
        let result = FinalizeResult {
            account,
            access_token: seed.credential.token,
        };
        let result_text =
            serde_json::to_string(&result).context("failed to serialize finalize result")?;

        let query = r"
            UPDATE enrollment_sessions
            SET current_step = 'completed',
                version = version + 1,
                finalize_result = $3::jsonb
            WHERE id = $1 AND version = $2
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let updated = sqlx::query(query)
            .bind(id)
            .bind(expected_version)
            .bind(&result_text)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to complete session")?;
        if updated.rows_affected() == 0 {
            let _ = tx.rollback().await;
            return Ok(FinalizeOutcome::VersionConflict);
        }

        tx.commit()
            .await
            .context("failed to commit finalize transaction")?;
        Ok(FinalizeOutcome::Finalized(result))
    }

    async fn sweep_expired(&self) -> Result<u64> {
        let query = "DELETE FROM enrollment_sessions WHERE expires_at <= NOW()";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to sweep expired sessions")?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
        constraint: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn constraint(&self) -> Option<&str> {
            self.constraint
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
            constraint: None,
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
            constraint: None,
        }));
        assert!(!is_unique_violation(&err));

        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
    }

    #[test]
    fn violated_constraint_extracts_name() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
            constraint: Some("accounts_email_key"),
        }));
        assert_eq!(
            violated_constraint(&err).as_deref(),
            Some("accounts_email_key")
        );
        assert_eq!(violated_constraint(&sqlx::Error::RowNotFound), None);
    }
}
