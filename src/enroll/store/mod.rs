//! Storage abstraction for sessions, codes, and finalized accounts.
//!
//! The state machine never touches storage directly; it goes through
//! [`EnrollmentStore`], whose implementations must make every mutating
//! method an atomic read-modify-write per session. Contention between
//! concurrent requests is resolved by the version guard, not by locks held
//! across calls, so any transactional backend fits behind this trait.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::codes::CodePolicy;
use super::credentials::IssuedCredential;
use super::models::{
    Channel, CollegeRecord, CollegeRef, EnrollmentSession, FinalizeResult, Flow, Step,
};

mod memory;
mod postgres;

pub use memory::MemoryEnrollmentStore;
pub use postgres::PgEnrollmentStore;

/// Result of the single mutation entry point, [`EnrollmentStore::apply_step`].
///
/// Any precondition failure mutates nothing.
#[derive(Debug)]
pub enum ApplyOutcome {
    Applied(EnrollmentSession),
    NotFound,
    Expired,
    /// The session rests at a different step than the submission expected;
    /// the client state is stale and must re-sync.
    StepMismatch { current: Step },
    /// Another request advanced the session with the same token first.
    VersionConflict,
    /// Terminal state; treated as an idempotent echo, not an error.
    AlreadyCompleted,
}

/// Result of issuing a verification code for a channel.
#[derive(Debug)]
pub enum IssueOutcome {
    /// A new code is active; any prior active code for the channel is dead.
    Issued,
    /// A code for this channel was issued too recently.
    Cooldown { retry_after_seconds: i64 },
    NotFound,
    Expired,
}

/// Result of validating a submitted code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidateOutcome {
    /// Code matched and is now consumed; it can never validate again.
    Valid,
    Invalid,
    /// No live code for the channel (never issued, superseded, or past TTL).
    Expired,
    /// Attempt budget exhausted; even the correct code is refused until a
    /// fresh one is issued.
    TooManyAttempts,
    NotFound,
}

/// Result of the atomic finalize transaction.
#[derive(Debug)]
pub enum FinalizeOutcome {
    Finalized(FinalizeResult),
    /// The session already finalized; carries the original result verbatim.
    AlreadyCompleted(FinalizeResult),
    /// Preconditions unmet; lists what is still missing.
    Incomplete { missing: Vec<String> },
    VersionConflict,
    /// The identifying contact already belongs to another account. Only
    /// surfaced here, never during the draft phase.
    DuplicateContact,
    NotFound,
    Expired,
}

/// Account-creation inputs assembled from the session's collected data.
#[derive(Debug)]
pub struct FinalizeSeed {
    pub email: String,
    pub phone: String,
    pub full_name: String,
    pub password_hash: String,
    pub role: String,
    pub college: CollegeRef,
    pub credential: IssuedCredential,
}

/// Keyed store for registration sessions, verification codes, and accounts.
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Allocate a session at [`Step::Initiated`], version 0, with an absolute
    /// expiry `ttl_seconds` from now.
    async fn create_session(
        &self,
        flow: Flow,
        collected: Map<String, Value>,
        ttl_seconds: i64,
    ) -> Result<EnrollmentSession>;

    async fn get_session(&self, id: Uuid) -> Result<Option<EnrollmentSession>>;

    /// The only way session state mutates before finalization.
    ///
    /// Atomically verifies liveness, the step precondition, and the version
    /// guard, merges `patch` additively, advances to `next_step`, and bumps
    /// the version. Exactly one of N concurrent calls with the same
    /// `(id, expected_version)` wins. Callers are responsible for supplying
    /// a `next_step` the state machine allows for the session's flow.
    async fn apply_step(
        &self,
        id: Uuid,
        expected_version: i64,
        expected_step: Step,
        patch: Map<String, Value>,
        next_step: Step,
    ) -> Result<ApplyOutcome>;

    /// Issue a code for `(session, channel)`, superseding any prior active
    /// code, subject to the policy's resend cooldown.
    async fn issue_code(
        &self,
        id: Uuid,
        channel: Channel,
        code_hash: Vec<u8>,
        policy: &CodePolicy,
    ) -> Result<IssueOutcome>;

    /// Validate a submitted code. Failed attempts count against the policy
    /// budget; success consumes the code permanently.
    async fn validate_code(
        &self,
        id: Uuid,
        channel: Channel,
        submitted_hash: Vec<u8>,
        policy: &CodePolicy,
    ) -> Result<ValidateOutcome>;

    /// Whether the channel has a consumed (successfully verified) code.
    async fn channel_consumed(&self, id: Uuid, channel: Channel) -> Result<bool>;

    /// Look up an existing college for step-2 resolvability checks.
    async fn get_college(&self, id: Uuid) -> Result<Option<CollegeRecord>>;

    /// Atomically convert a completed session into a durable account:
    /// resolve or create the college, create the account, mark the session
    /// [`Step::Completed`] with the result cached, all or nothing.
    async fn finalize(
        &self,
        id: Uuid,
        expected_version: i64,
        seed: FinalizeSeed,
    ) -> Result<FinalizeOutcome>;

    /// Delete sessions (and their codes) past expiry. Pure hygiene: expired
    /// sessions are already rejected on read, so correctness never depends
    /// on the sweep having run.
    async fn sweep_expired(&self) -> Result<u64>;
}
