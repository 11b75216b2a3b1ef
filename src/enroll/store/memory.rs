//! In-memory store backend.
//!
//! Backs the test suite and non-durable embeddings. A single async mutex
//! around the whole state gives every trait method the same atomicity the
//! Postgres backend gets from guarded statements and transactions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::enroll::codes::{hashes_match, CodePolicy};
use crate::enroll::machine;
use crate::enroll::models::{
    merge_collected, AccountRecord, Channel, CollegeRecord, CollegeRef, EnrollmentSession,
    FinalizeResult, Flow, Step,
};

use super::{
    ApplyOutcome, EnrollmentStore, FinalizeOutcome, FinalizeSeed, IssueOutcome, ValidateOutcome,
};

#[derive(Clone, Debug, Default)]
struct ChannelState {
    active: Option<ActiveCode>,
    consumed: bool,
    last_issued_at: Option<i64>,
}

#[derive(Clone, Debug)]
struct ActiveCode {
    code_hash: Vec<u8>,
    expires_at: i64,
    attempts: i32,
}

#[derive(Clone, Debug)]
struct SessionState {
    session: EnrollmentSession,
    email: ChannelState,
    phone: ChannelState,
}

impl SessionState {
    fn channel_mut(&mut self, channel: Channel) -> &mut ChannelState {
        match channel {
            Channel::Email => &mut self.email,
            Channel::Phone => &mut self.phone,
        }
    }

    fn channel(&self, channel: Channel) -> &ChannelState {
        match channel {
            Channel::Email => &self.email,
            Channel::Phone => &self.phone,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    sessions: HashMap<Uuid, SessionState>,
    colleges: HashMap<Uuid, CollegeRecord>,
    /// Account id by normalized email, for uniqueness at commit time.
    accounts_by_email: HashMap<String, Uuid>,
    accounts: HashMap<Uuid, AccountRecord>,
}

/// Non-durable [`EnrollmentStore`] over a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryEnrollmentStore {
    state: Mutex<MemoryState>,
    /// Test hook: seconds added to the wall clock, so cooldown and expiry
    /// behavior is observable without sleeping.
    clock_offset: AtomicI64,
}

impl MemoryEnrollmentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift this store's notion of "now" forward.
    pub fn advance_clock(&self, seconds: i64) {
        self.clock_offset.fetch_add(seconds, Ordering::Relaxed);
    }

    /// Register a college so step-2 selections can resolve against it.
    pub async fn seed_college(&self, name: &str) -> CollegeRecord {
        let record = CollegeRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        let mut state = self.state.lock().await;
        state.colleges.insert(record.id, record.clone());
        record
    }

    /// Look up a finalized account by normalized email.
    pub async fn account_by_email(&self, email: &str) -> Option<AccountRecord> {
        let state = self.state.lock().await;
        let id = state.accounts_by_email.get(email)?;
        state.accounts.get(id).cloned()
    }

    fn now_unix(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        now + self.clock_offset.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EnrollmentStore for MemoryEnrollmentStore {
    async fn create_session(
        &self,
        flow: Flow,
        collected: Map<String, Value>,
        ttl_seconds: i64,
    ) -> Result<EnrollmentSession> {
        let now = self.now_unix();
        let session = EnrollmentSession {
            id: Uuid::new_v4(),
            flow,
            current_step: Step::Initiated,
            version: 0,
            collected,
            created_at_unix: now,
            expires_at_unix: now + ttl_seconds,
            finalize_result: None,
        };
        let mut state = self.state.lock().await;
        state.sessions.insert(
            session.id,
            SessionState {
                session: session.clone(),
                email: ChannelState::default(),
                phone: ChannelState::default(),
            },
        );
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<EnrollmentSession>> {
        let state = self.state.lock().await;
        Ok(state.sessions.get(&id).map(|entry| entry.session.clone()))
    }

    async fn apply_step(
        &self,
        id: Uuid,
        expected_version: i64,
        expected_step: Step,
        patch: Map<String, Value>,
        next_step: Step,
    ) -> Result<ApplyOutcome> {
        let now = self.now_unix();
        let mut state = self.state.lock().await;
        let Some(entry) = state.sessions.get_mut(&id) else {
            return Ok(ApplyOutcome::NotFound);
        };
        if entry.session.current_step == Step::Completed {
            return Ok(ApplyOutcome::AlreadyCompleted);
        }
        if entry.session.is_expired(now) {
            return Ok(ApplyOutcome::Expired);
        }
        if entry.session.current_step != expected_step {
            return Ok(ApplyOutcome::StepMismatch {
                current: entry.session.current_step,
            });
        }
        if entry.session.version != expected_version {
            return Ok(ApplyOutcome::VersionConflict);
        }
        merge_collected(&mut entry.session.collected, &patch);
        entry.session.current_step = next_step;
        entry.session.version += 1;
        Ok(ApplyOutcome::Applied(entry.session.clone()))
    }

    async fn issue_code(
        &self,
        id: Uuid,
        channel: Channel,
        code_hash: Vec<u8>,
        policy: &CodePolicy,
    ) -> Result<IssueOutcome> {
        let now = self.now_unix();
        let mut state = self.state.lock().await;
        let Some(entry) = state.sessions.get_mut(&id) else {
            return Ok(IssueOutcome::NotFound);
        };
        if entry.session.is_expired(now) {
            return Ok(IssueOutcome::Expired);
        }
        let channel_state = entry.channel_mut(channel);
        if let Some(last_issued_at) = channel_state.last_issued_at {
            let elapsed = now - last_issued_at;
            if elapsed < policy.resend_cooldown_seconds() {
                return Ok(IssueOutcome::Cooldown {
                    retry_after_seconds: policy.resend_cooldown_seconds() - elapsed,
                });
            }
        }
        // Issuing supersedes any prior active code for the channel.
        channel_state.active = Some(ActiveCode {
            code_hash,
            expires_at: now + policy.ttl_seconds(),
            attempts: 0,
        });
        channel_state.last_issued_at = Some(now);
        Ok(IssueOutcome::Issued)
    }

    async fn validate_code(
        &self,
        id: Uuid,
        channel: Channel,
        submitted_hash: Vec<u8>,
        policy: &CodePolicy,
    ) -> Result<ValidateOutcome> {
        let now = self.now_unix();
        let mut state = self.state.lock().await;
        let Some(entry) = state.sessions.get_mut(&id) else {
            return Ok(ValidateOutcome::NotFound);
        };
        if entry.session.is_expired(now) {
            return Ok(ValidateOutcome::Expired);
        }
        let channel_state = entry.channel_mut(channel);
        if channel_state.consumed {
            // A consumed code can never validate again.
            return Ok(ValidateOutcome::Invalid);
        }
        let Some(active) = channel_state.active.as_mut() else {
            return Ok(ValidateOutcome::Expired);
        };
        if active.expires_at <= now {
            return Ok(ValidateOutcome::Expired);
        }
        if active.attempts >= policy.max_attempts() {
            return Ok(ValidateOutcome::TooManyAttempts);
        }
        if hashes_match(&active.code_hash, &submitted_hash) {
            channel_state.active = None;
            channel_state.consumed = true;
            Ok(ValidateOutcome::Valid)
        } else {
            active.attempts += 1;
            Ok(ValidateOutcome::Invalid)
        }
    }

    async fn channel_consumed(&self, id: Uuid, channel: Channel) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .get(&id)
            .is_some_and(|entry| entry.channel(channel).consumed))
    }

    async fn get_college(&self, id: Uuid) -> Result<Option<CollegeRecord>> {
        let state = self.state.lock().await;
        Ok(state.colleges.get(&id).cloned())
    }

    async fn finalize(
        &self,
        id: Uuid,
        expected_version: i64,
        seed: FinalizeSeed,
    ) -> Result<FinalizeOutcome> {
        let now = self.now_unix();
        let mut state = self.state.lock().await;
        let Some(entry) = state.sessions.get(&id) else {
            return Ok(FinalizeOutcome::NotFound);
        };

        if entry.session.current_step == Step::Completed {
            let result = entry
                .session
                .finalize_result
                .clone()
                .ok_or_else(|| anyhow!("completed session {id} has no cached result"))?;
            return Ok(FinalizeOutcome::AlreadyCompleted(result));
        }
        if entry.session.is_expired(now) {
            return Ok(FinalizeOutcome::Expired);
        }

        let mut missing: Vec<String> = machine::missing_for_finalize(&entry.session.collected)
            .into_iter()
            .map(str::to_string)
            .collect();
        if entry.session.current_step != Step::VerificationPending {
            missing.push("verification".to_string());
        } else {
            if !entry.email.consumed {
                missing.push("email_verification".to_string());
            }
            if !entry.phone.consumed {
                missing.push("phone_verification".to_string());
            }
        }
        if !missing.is_empty() {
            return Ok(FinalizeOutcome::Incomplete { missing });
        }
        if entry.session.version != expected_version {
            return Ok(FinalizeOutcome::VersionConflict);
        }

        let college = match &seed.college {
            CollegeRef::Existing(college_id) => match state.colleges.get(college_id) {
                Some(record) => record.clone(),
                None => {
                    return Ok(FinalizeOutcome::Incomplete {
                        missing: vec!["college".to_string()],
                    })
                }
            },
            CollegeRef::New(name) => {
                let existing = state
                    .colleges
                    .values()
                    .find(|record| record.name.eq_ignore_ascii_case(name))
                    .cloned();
                existing.unwrap_or_else(|| {
                    let record = CollegeRecord {
                        id: Uuid::new_v4(),
                        name: name.clone(),
                    };
                    state.colleges.insert(record.id, record.clone());
                    record
                })
            }
        };

        if state.accounts_by_email.contains_key(&seed.email) {
            return Ok(FinalizeOutcome::DuplicateContact);
        }

        let account = AccountRecord {
            id: Uuid::new_v4(),
            email: seed.email.clone(),
            phone: seed.phone,
            full_name: seed.full_name,
            role: seed.role,
            college,
        };
        let result = FinalizeResult {
            account: account.clone(),
            access_token: seed.credential.token,
        };

        state.accounts_by_email.insert(seed.email, account.id);
        state.accounts.insert(account.id, account);
        let Some(entry) = state.sessions.get_mut(&id) else {
            return Ok(FinalizeOutcome::NotFound);
        };
        entry.session.current_step = Step::Completed;
        entry.session.version += 1;
        entry.session.finalize_result = Some(result.clone());
        Ok(FinalizeOutcome::Finalized(result))
    }

    async fn sweep_expired(&self) -> Result<u64> {
        let now = self.now_unix();
        let mut state = self.state.lock().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, entry| !entry.session.is_expired(now));
        Ok(u64::try_from(before - state.sessions.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enroll::codes::hash_code;

    fn base_collected() -> Map<String, Value> {
        let mut collected = Map::new();
        collected.insert("email".to_string(), Value::from("a@x.edu"));
        collected.insert("phone".to_string(), Value::from("+15550100"));
        collected.insert("full_name".to_string(), Value::from("Ada Lovelace"));
        collected.insert(
            "password_hash".to_string(),
            Value::from("$argon2id$stub"),
        );
        collected
    }

    #[tokio::test]
    async fn apply_step_enforces_version_guard() -> Result<()> {
        let store = MemoryEnrollmentStore::new();
        let session = store
            .create_session(Flow::Student, base_collected(), 600)
            .await?;

        let outcome = store
            .apply_step(
                session.id,
                0,
                Step::Initiated,
                Map::new(),
                Step::CollegeSelected,
            )
            .await?;
        assert!(matches!(outcome, ApplyOutcome::Applied(_)));

        // Same token replayed: version 0 is stale now.
        let outcome = store
            .apply_step(
                session.id,
                0,
                Step::Initiated,
                Map::new(),
                Step::CollegeSelected,
            )
            .await?;
        assert!(matches!(outcome, ApplyOutcome::StepMismatch { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn apply_step_rejects_expired_sessions() -> Result<()> {
        let store = MemoryEnrollmentStore::new();
        let session = store
            .create_session(Flow::Student, base_collected(), 60)
            .await?;
        store.advance_clock(61);
        let outcome = store
            .apply_step(
                session.id,
                0,
                Step::Initiated,
                Map::new(),
                Step::CollegeSelected,
            )
            .await?;
        assert!(matches!(outcome, ApplyOutcome::Expired));
        Ok(())
    }

    #[tokio::test]
    async fn issue_enforces_cooldown_and_supersedes() -> Result<()> {
        let store = MemoryEnrollmentStore::new();
        let session = store
            .create_session(Flow::Student, base_collected(), 600)
            .await?;
        let policy = CodePolicy::new();

        let first = store
            .issue_code(session.id, Channel::Email, hash_code("111111"), &policy)
            .await?;
        assert!(matches!(first, IssueOutcome::Issued));

        let second = store
            .issue_code(session.id, Channel::Email, hash_code("222222"), &policy)
            .await?;
        assert!(matches!(second, IssueOutcome::Cooldown { .. }));

        store.advance_clock(policy.resend_cooldown_seconds());
        let third = store
            .issue_code(session.id, Channel::Email, hash_code("333333"), &policy)
            .await?;
        assert!(matches!(third, IssueOutcome::Issued));

        // The first code is superseded and no longer validates.
        let outcome = store
            .validate_code(session.id, Channel::Email, hash_code("111111"), &policy)
            .await?;
        assert_eq!(outcome, ValidateOutcome::Invalid);
        let outcome = store
            .validate_code(session.id, Channel::Email, hash_code("333333"), &policy)
            .await?;
        assert_eq!(outcome, ValidateOutcome::Valid);
        Ok(())
    }

    #[tokio::test]
    async fn validate_burns_attempts_then_short_circuits() -> Result<()> {
        let store = MemoryEnrollmentStore::new();
        let session = store
            .create_session(Flow::Student, base_collected(), 600)
            .await?;
        let policy = CodePolicy::new().with_max_attempts(2);

        store
            .issue_code(session.id, Channel::Phone, hash_code("424242"), &policy)
            .await?;
        for _ in 0..2 {
            let outcome = store
                .validate_code(session.id, Channel::Phone, hash_code("000000"), &policy)
                .await?;
            assert_eq!(outcome, ValidateOutcome::Invalid);
        }
        // Budget exhausted: even the correct code is refused.
        let outcome = store
            .validate_code(session.id, Channel::Phone, hash_code("424242"), &policy)
            .await?;
        assert_eq!(outcome, ValidateOutcome::TooManyAttempts);
        Ok(())
    }

    #[tokio::test]
    async fn consumed_codes_never_validate_again() -> Result<()> {
        let store = MemoryEnrollmentStore::new();
        let session = store
            .create_session(Flow::Student, base_collected(), 600)
            .await?;
        let policy = CodePolicy::new();

        store
            .issue_code(session.id, Channel::Email, hash_code("987654"), &policy)
            .await?;
        let outcome = store
            .validate_code(session.id, Channel::Email, hash_code("987654"), &policy)
            .await?;
        assert_eq!(outcome, ValidateOutcome::Valid);
        assert!(store.channel_consumed(session.id, Channel::Email).await?);

        let outcome = store
            .validate_code(session.id, Channel::Email, hash_code("987654"), &policy)
            .await?;
        assert_eq!(outcome, ValidateOutcome::Invalid);
        Ok(())
    }

    #[tokio::test]
    async fn expired_codes_report_expired() -> Result<()> {
        let store = MemoryEnrollmentStore::new();
        let session = store
            .create_session(Flow::Student, base_collected(), 6000)
            .await?;
        let policy = CodePolicy::new().with_ttl_seconds(30);

        store
            .issue_code(session.id, Channel::Email, hash_code("123123"), &policy)
            .await?;
        store.advance_clock(31);
        let outcome = store
            .validate_code(session.id, Channel::Email, hash_code("123123"), &policy)
            .await?;
        assert_eq!(outcome, ValidateOutcome::Expired);
        Ok(())
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_sessions() -> Result<()> {
        let store = MemoryEnrollmentStore::new();
        let short = store
            .create_session(Flow::Student, base_collected(), 30)
            .await?;
        let long = store
            .create_session(Flow::Student, base_collected(), 3600)
            .await?;

        store.advance_clock(60);
        assert_eq!(store.sweep_expired().await?, 1);
        assert!(store.get_session(short.id).await?.is_none());
        assert!(store.get_session(long.id).await?.is_some());
        Ok(())
    }
}
