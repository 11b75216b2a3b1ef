//! Orchestration of the registration pipeline.
//!
//! Handlers stay thin: they validate input shape, then call into
//! [`EnrollmentService`], which decodes the temp token, consults the state
//! machine, drives the store's atomic operations, and hands codes to the
//! notifier. Every outcome is a typed value; nothing here panics on bad
//! client input.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::warn;

use crate::notify::{CodeDelivery, Notifier};

use super::codes::{generate_code, hash_code};
use super::config::EnrollConfig;
use super::credentials::{CredentialIssuer, PasswordHasher};
use super::machine::{self, FieldError};
use super::models::{Channel, CollegeRef, EnrollmentSession, FinalizeResult, Flow, Step};
use super::store::{
    ApplyOutcome, EnrollmentStore, FinalizeOutcome, FinalizeSeed, IssueOutcome, ValidateOutcome,
};
use super::token::{StepClaims, StepTokenCodec, TokenError};

/// Why a step submission was refused. Each variant maps to a distinct client
/// remedy (restart, re-sync, retry, or nothing).
#[derive(Debug)]
pub enum StepRejection {
    /// Bad token structure or signature; restart from step 1.
    TokenMalformed,
    /// Token past its absolute expiry; restart from step 1.
    TokenExpired,
    NotFound,
    SessionExpired,
    /// Submission is for a different step than the session rests at.
    StepOrder { current: Step },
    /// A concurrent request won the version race; re-sync and retry.
    VersionConflict,
    /// Terminal session; not an error, the finalize result still stands.
    AlreadyCompleted,
    /// Step payload failed validation; nothing changed server-side.
    Invalid(Vec<FieldError>),
}

/// Successful step-1 outcome: the draft session and its first token.
#[derive(Debug)]
pub struct Started {
    pub token: String,
    pub session: EnrollmentSession,
}

#[derive(Debug)]
pub enum StepOutcome {
    Advanced {
        token: String,
        session: EnrollmentSession,
    },
    Rejected(StepRejection),
}

#[derive(Debug)]
pub enum ResendOutcome {
    Sent,
    /// Every channel that still needs a code is inside its cooldown window.
    Cooldown { retry_after_seconds: i64 },
    Rejected(StepRejection),
}

/// Per-channel failure reported by the verify step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeFailure {
    Missing,
    Invalid,
    Expired,
    TooManyAttempts,
}

#[derive(Debug)]
pub enum VerifyOutcome {
    Completed(FinalizeResult),
    /// At least one channel failed; attempt counters moved, nothing else.
    CodeErrors {
        email: Option<CodeFailure>,
        phone: Option<CodeFailure>,
    },
    /// The contact already belongs to an account. Only surfaced here, at
    /// commit time, so drafts never leak account existence.
    DuplicateContact,
    Rejected(StepRejection),
}

#[derive(Debug)]
pub enum StatusOutcome {
    Current {
        token: String,
        session: EnrollmentSession,
    },
    Rejected(StepRejection),
}

/// Normalized step-1 fields; handlers validate shape before building this.
#[derive(Debug)]
pub struct StartFields {
    pub flow: Flow,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
}

#[derive(Debug, Default)]
pub struct CollegeSelection {
    pub college_id: Option<String>,
    pub college_name: Option<String>,
}

#[derive(Debug)]
pub struct ProfileFields {
    pub title: String,
    pub department: Option<String>,
}

#[derive(Debug, Default)]
pub struct TokenConfigFields {
    pub skip: bool,
    pub token_name: Option<String>,
    pub token_symbol: Option<String>,
}

pub struct EnrollmentService {
    store: Arc<dyn EnrollmentStore>,
    notifier: Arc<dyn Notifier>,
    codec: StepTokenCodec,
    config: EnrollConfig,
    issuer: Arc<dyn CredentialIssuer>,
    hasher: Arc<dyn PasswordHasher>,
}

impl EnrollmentService {
    #[must_use]
    pub fn new(
        store: Arc<dyn EnrollmentStore>,
        notifier: Arc<dyn Notifier>,
        codec: StepTokenCodec,
        config: EnrollConfig,
        issuer: Arc<dyn CredentialIssuer>,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            store,
            notifier,
            codec,
            config: config.normalize(),
            issuer,
            hasher,
        }
    }

    /// Step 1: create the draft session and mint its first token.
    pub async fn start(&self, fields: StartFields) -> Result<Started> {
        let password_hash = self.hasher.hash(&fields.password)?;
        let mut collected = Map::new();
        collected.insert("email".to_string(), Value::from(fields.email));
        collected.insert("phone".to_string(), Value::from(fields.phone));
        collected.insert("full_name".to_string(), Value::from(fields.full_name));
        collected.insert("password_hash".to_string(), Value::from(password_hash));

        let session = self
            .store
            .create_session(fields.flow, collected, self.config.session_ttl_seconds())
            .await?;
        let token = self.mint(&session)?;
        Ok(Started { token, session })
    }

    /// Step 2 (both flows): record the college selection. Student sessions
    /// continue straight into verification; admin sessions rest at
    /// [`Step::CollegeSelected`] until the profile step.
    pub async fn submit_college(
        &self,
        token: &str,
        selection: CollegeSelection,
    ) -> Result<StepOutcome> {
        let claims = match self.decode(token) {
            Ok(claims) => claims,
            Err(rejection) => return Ok(StepOutcome::Rejected(rejection)),
        };
        if claims.stp != Step::Initiated {
            return Ok(StepOutcome::Rejected(StepRejection::StepOrder {
                current: claims.stp,
            }));
        }

        let mut patch = Map::new();
        if let Some(id) = selection.college_id {
            patch.insert("college_id".to_string(), Value::from(id));
        }
        if let Some(name) = selection.college_name {
            patch.insert("college_name".to_string(), Value::from(name));
        }
        let college = match machine::college_ref_from_patch(&patch) {
            Ok(college) => college,
            Err(errors) => return Ok(StepOutcome::Rejected(StepRejection::Invalid(errors))),
        };
        if let CollegeRef::Existing(id) = college {
            if self.store.get_college(id).await?.is_none() {
                return Ok(StepOutcome::Rejected(StepRejection::Invalid(vec![
                    FieldError::new("college_id", "Unknown college"),
                ])));
            }
        }

        let outcome = self
            .store
            .apply_step(
                claims.sid,
                claims.ver,
                Step::Initiated,
                patch,
                Step::CollegeSelected,
            )
            .await?;
        let session = match outcome {
            ApplyOutcome::Applied(session) => session,
            other => return Ok(StepOutcome::Rejected(rejection_from_apply(other))),
        };

        if session.flow == Flow::Student {
            return self.enter_verification(session).await;
        }
        let token = self.mint(&session)?;
        Ok(StepOutcome::Advanced { token, session })
    }

    /// Admin step 3: profile details.
    pub async fn submit_profile(&self, token: &str, fields: ProfileFields) -> Result<StepOutcome> {
        let claims = match self.decode(token) {
            Ok(claims) => claims,
            Err(rejection) => return Ok(StepOutcome::Rejected(rejection)),
        };
        if let Err(rejection) = self
            .ensure_admin_step(&claims, Step::CollegeSelected, Step::ProfileCompleted)
            .await?
        {
            return Ok(StepOutcome::Rejected(rejection));
        }

        let mut patch = Map::new();
        patch.insert("title".to_string(), Value::from(fields.title));
        if let Some(department) = fields.department {
            patch.insert("department".to_string(), Value::from(department));
        }

        let outcome = self
            .store
            .apply_step(
                claims.sid,
                claims.ver,
                Step::CollegeSelected,
                patch,
                Step::ProfileCompleted,
            )
            .await?;
        match outcome {
            ApplyOutcome::Applied(session) => {
                let token = self.mint(&session)?;
                Ok(StepOutcome::Advanced { token, session })
            }
            other => Ok(StepOutcome::Rejected(rejection_from_apply(other))),
        }
    }

    /// Admin step 4: reward-token configuration, or an explicit skip. Either
    /// way the session advances and enters verification.
    pub async fn submit_token_config(
        &self,
        token: &str,
        fields: TokenConfigFields,
    ) -> Result<StepOutcome> {
        let claims = match self.decode(token) {
            Ok(claims) => claims,
            Err(rejection) => return Ok(StepOutcome::Rejected(rejection)),
        };
        if let Err(rejection) = self
            .ensure_admin_step(&claims, Step::ProfileCompleted, Step::TokenConfigured)
            .await?
        {
            return Ok(StepOutcome::Rejected(rejection));
        }

        let mut patch = Map::new();
        if fields.skip {
            patch.insert("token_config_skipped".to_string(), Value::from(true));
        } else {
            let name = fields.token_name.as_deref().map(str::trim).unwrap_or("");
            let symbol = fields.token_symbol.as_deref().map(str::trim).unwrap_or("");
            let mut errors = Vec::new();
            if name.is_empty() {
                errors.push(FieldError::new("token_name", "Token name is required"));
            }
            if symbol.is_empty() || symbol.len() > 8 {
                errors.push(FieldError::new(
                    "token_symbol",
                    "Token symbol must be 1-8 characters",
                ));
            }
            if !errors.is_empty() {
                return Ok(StepOutcome::Rejected(StepRejection::Invalid(errors)));
            }
            patch.insert("token_name".to_string(), Value::from(name));
            patch.insert("token_symbol".to_string(), Value::from(symbol));
        }

        let outcome = self
            .store
            .apply_step(
                claims.sid,
                claims.ver,
                Step::ProfileCompleted,
                patch,
                Step::TokenConfigured,
            )
            .await?;
        match outcome {
            ApplyOutcome::Applied(session) => self.enter_verification(session).await,
            other => Ok(StepOutcome::Rejected(rejection_from_apply(other))),
        }
    }

    /// Re-issue codes for any channel not yet verified. Never advances the
    /// step, except to repair a session stranded just before verification by
    /// an earlier issuance failure (the same forward transition the step
    /// handler performs).
    pub async fn resend_codes(&self, token: &str) -> Result<ResendOutcome> {
        let claims = match self.decode(token) {
            Ok(claims) => claims,
            Err(rejection) => return Ok(ResendOutcome::Rejected(rejection)),
        };
        let session = match self.load_live(&claims).await? {
            Ok(session) => session,
            Err(rejection) => return Ok(ResendOutcome::Rejected(rejection)),
        };

        if session.current_step == machine::step_before_verification(session.flow) {
            return match self.enter_verification(session).await? {
                StepOutcome::Advanced { .. } => Ok(ResendOutcome::Sent),
                StepOutcome::Rejected(rejection) => Ok(ResendOutcome::Rejected(rejection)),
            };
        }
        if session.current_step != Step::VerificationPending {
            return Ok(ResendOutcome::Rejected(StepRejection::StepOrder {
                current: session.current_step,
            }));
        }

        let mut issued_any = false;
        let mut min_retry: Option<i64> = None;
        for channel in Channel::ALL {
            if self.store.channel_consumed(session.id, channel).await? {
                continue;
            }
            match self.issue_and_deliver(&session, channel).await? {
                IssueOutcome::Issued => issued_any = true,
                IssueOutcome::Cooldown {
                    retry_after_seconds,
                } => {
                    min_retry = Some(match min_retry {
                        Some(current) => current.min(retry_after_seconds),
                        None => retry_after_seconds,
                    });
                }
                IssueOutcome::NotFound => {
                    return Ok(ResendOutcome::Rejected(StepRejection::NotFound))
                }
                IssueOutcome::Expired => {
                    return Ok(ResendOutcome::Rejected(StepRejection::SessionExpired))
                }
            }
        }

        if issued_any {
            Ok(ResendOutcome::Sent)
        } else if let Some(retry_after_seconds) = min_retry {
            Ok(ResendOutcome::Cooldown {
                retry_after_seconds,
            })
        } else {
            // Both channels already verified; nothing left to send.
            Ok(ResendOutcome::Sent)
        }
    }

    /// Final step: validate both channel codes, then finalize atomically.
    pub async fn verify(
        &self,
        token: &str,
        email_code: Option<&str>,
        phone_code: Option<&str>,
    ) -> Result<VerifyOutcome> {
        let claims = match self.decode(token) {
            Ok(claims) => claims,
            Err(rejection) => return Ok(VerifyOutcome::Rejected(rejection)),
        };
        let Some(session) = self.store.get_session(claims.sid).await? else {
            return Ok(VerifyOutcome::Rejected(StepRejection::NotFound));
        };
        if session.current_step == Step::Completed {
            // Idempotent echo: a retried verify gets the original result.
            if let Some(result) = session.finalize_result {
                return Ok(VerifyOutcome::Completed(result));
            }
            return Ok(VerifyOutcome::Rejected(StepRejection::AlreadyCompleted));
        }
        if session.is_expired(self.now_unix()) {
            return Ok(VerifyOutcome::Rejected(StepRejection::SessionExpired));
        }
        if session.current_step != Step::VerificationPending {
            return Ok(VerifyOutcome::Rejected(StepRejection::StepOrder {
                current: session.current_step,
            }));
        }
        if claims.ver != session.version {
            return Ok(VerifyOutcome::Rejected(StepRejection::VersionConflict));
        }

        let email_failure = self
            .check_channel(&session, Channel::Email, email_code)
            .await?;
        let phone_failure = self
            .check_channel(&session, Channel::Phone, phone_code)
            .await?;
        if email_failure.is_some() || phone_failure.is_some() {
            return Ok(VerifyOutcome::CodeErrors {
                email: email_failure,
                phone: phone_failure,
            });
        }

        self.finalize(&session, claims.ver).await
    }

    /// Re-sync endpoint: any structurally valid, unexpired token for a live
    /// session yields the current step and a fresh token for it.
    ///
    /// The version check is deliberately skipped: a stale-but-authentic
    /// token only grants what a current one would, namely the right to
    /// submit the session's current step.
    pub async fn session_status(&self, token: &str) -> Result<StatusOutcome> {
        let claims = match self.decode(token) {
            Ok(claims) => claims,
            Err(rejection) => return Ok(StatusOutcome::Rejected(rejection)),
        };
        let Some(session) = self.store.get_session(claims.sid).await? else {
            return Ok(StatusOutcome::Rejected(StepRejection::NotFound));
        };
        if session.current_step != Step::Completed && session.is_expired(self.now_unix()) {
            return Ok(StatusOutcome::Rejected(StepRejection::SessionExpired));
        }
        let token = self.mint(&session)?;
        Ok(StatusOutcome::Current { token, session })
    }

    /// Run the expiry sweep once; used by the background sweeper.
    pub async fn sweep_expired(&self) -> Result<u64> {
        self.store.sweep_expired().await
    }

    fn decode(&self, token: &str) -> std::result::Result<StepClaims, StepRejection> {
        self.codec
            .decode(token, self.now_unix())
            .map_err(|err| match err {
                TokenError::Malformed => StepRejection::TokenMalformed,
                TokenError::Expired => StepRejection::TokenExpired,
            })
    }

    fn mint(&self, session: &EnrollmentSession) -> Result<String> {
        self.codec
            .mint(
                session.id,
                session.current_step,
                session.version,
                self.now_unix(),
                session.expires_at_unix,
            )
            .context("failed to mint step token")
    }

    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }

    /// Load the session behind a token and enforce liveness plus the version
    /// guard shared by resend and other non-advancing operations.
    async fn load_live(
        &self,
        claims: &StepClaims,
    ) -> Result<std::result::Result<EnrollmentSession, StepRejection>> {
        let Some(session) = self.store.get_session(claims.sid).await? else {
            return Ok(Err(StepRejection::NotFound));
        };
        if session.current_step == Step::Completed {
            return Ok(Err(StepRejection::AlreadyCompleted));
        }
        if session.is_expired(self.now_unix()) {
            return Ok(Err(StepRejection::SessionExpired));
        }
        if claims.ver != session.version {
            return Ok(Err(StepRejection::VersionConflict));
        }
        Ok(Ok(session))
    }

    /// Pre-flight for admin-only steps: the session must exist, be live, run
    /// the admin flow, and rest where the endpoint expects.
    async fn ensure_admin_step(
        &self,
        claims: &StepClaims,
        expected: Step,
        next: Step,
    ) -> Result<std::result::Result<(), StepRejection>> {
        if claims.stp != expected {
            return Ok(Err(StepRejection::StepOrder {
                current: claims.stp,
            }));
        }
        let session = match self.load_live(claims).await? {
            Ok(session) => session,
            Err(rejection) => return Ok(Err(rejection)),
        };
        if !machine::is_legal_transition(session.flow, expected, next) {
            return Ok(Err(StepRejection::StepOrder {
                current: session.current_step,
            }));
        }
        Ok(Ok(()))
    }

    /// The forward transition into verification plus initial code issuance.
    async fn enter_verification(&self, session: EnrollmentSession) -> Result<StepOutcome> {
        let from = machine::step_before_verification(session.flow);
        let outcome = self
            .store
            .apply_step(
                session.id,
                session.version,
                from,
                Map::new(),
                Step::VerificationPending,
            )
            .await?;
        let session = match outcome {
            ApplyOutcome::Applied(session) => session,
            other => return Ok(StepOutcome::Rejected(rejection_from_apply(other))),
        };

        for channel in Channel::ALL {
            // First issuance for the channel; cooldown cannot apply yet, and
            // a delivery failure is repaired by resend rather than failing
            // the step that already committed.
            match self.issue_and_deliver(&session, channel).await {
                Ok(IssueOutcome::Issued) => {}
                Ok(other) => {
                    warn!(
                        session_id = %session.id,
                        channel = channel.as_str(),
                        outcome = ?other,
                        "initial code issuance refused"
                    );
                }
                Err(err) => {
                    warn!(
                        session_id = %session.id,
                        channel = channel.as_str(),
                        "initial code delivery failed: {err}"
                    );
                }
            }
        }

        let token = self.mint(&session)?;
        Ok(StepOutcome::Advanced { token, session })
    }

    async fn issue_and_deliver(
        &self,
        session: &EnrollmentSession,
        channel: Channel,
    ) -> Result<IssueOutcome> {
        let policy = self.config.codes();
        let code = generate_code(policy.length())?;
        let outcome = self
            .store
            .issue_code(session.id, channel, hash_code(&code), policy)
            .await?;
        if matches!(outcome, IssueOutcome::Issued) {
            let recipient = match channel {
                Channel::Email => session.collected_str("email"),
                Channel::Phone => session.collected_str("phone"),
            }
            .unwrap_or_default()
            .to_string();
            self.notifier
                .deliver(&CodeDelivery {
                    channel,
                    recipient,
                    code,
                    expires_at_unix: self.now_unix() + policy.ttl_seconds(),
                })
                .await
                .context("code delivery failed")?;
        }
        Ok(outcome)
    }

    /// Validate one channel, treating an already-verified channel as
    /// satisfied so a partial retry only has to supply the missing code.
    async fn check_channel(
        &self,
        session: &EnrollmentSession,
        channel: Channel,
        submitted: Option<&str>,
    ) -> Result<Option<CodeFailure>> {
        if self.store.channel_consumed(session.id, channel).await? {
            return Ok(None);
        }
        let Some(code) = submitted.map(str::trim).filter(|code| !code.is_empty()) else {
            return Ok(Some(CodeFailure::Missing));
        };
        let outcome = self
            .store
            .validate_code(session.id, channel, hash_code(code), self.config.codes())
            .await?;
        Ok(match outcome {
            ValidateOutcome::Valid => None,
            ValidateOutcome::Invalid => Some(CodeFailure::Invalid),
            ValidateOutcome::Expired | ValidateOutcome::NotFound => Some(CodeFailure::Expired),
            ValidateOutcome::TooManyAttempts => Some(CodeFailure::TooManyAttempts),
        })
    }

    async fn finalize(
        &self,
        session: &EnrollmentSession,
        expected_version: i64,
    ) -> Result<VerifyOutcome> {
        let college = match machine::college_ref_from_patch(&session.collected) {
            Ok(college) => college,
            Err(errors) => return Ok(VerifyOutcome::Rejected(StepRejection::Invalid(errors))),
        };
        let seed = FinalizeSeed {
            email: session.collected_str("email").unwrap_or_default().to_string(),
            phone: session.collected_str("phone").unwrap_or_default().to_string(),
            full_name: session
                .collected_str("full_name")
                .unwrap_or_default()
                .to_string(),
            password_hash: session
                .collected_str("password_hash")
                .unwrap_or_default()
                .to_string(),
            role: session.flow.as_str().to_string(),
            college,
            credential: self.issuer.issue()?,
        };

        match self.store.finalize(session.id, expected_version, seed).await? {
            FinalizeOutcome::Finalized(result) | FinalizeOutcome::AlreadyCompleted(result) => {
                Ok(VerifyOutcome::Completed(result))
            }
            FinalizeOutcome::VersionConflict => {
                // The race loser re-reads: if the winner completed the
                // session, echo its result instead of surfacing the conflict.
                if let Some(session) = self.store.get_session(session.id).await? {
                    if let Some(result) = session.finalize_result {
                        return Ok(VerifyOutcome::Completed(result));
                    }
                }
                Ok(VerifyOutcome::Rejected(StepRejection::VersionConflict))
            }
            FinalizeOutcome::Incomplete { missing } => Ok(VerifyOutcome::Rejected(
                StepRejection::Invalid(
                    missing
                        .into_iter()
                        .map(|field| FieldError::new("verification", field))
                        .collect(),
                ),
            )),
            FinalizeOutcome::DuplicateContact => Ok(VerifyOutcome::DuplicateContact),
            FinalizeOutcome::NotFound => Ok(VerifyOutcome::Rejected(StepRejection::NotFound)),
            FinalizeOutcome::Expired => {
                Ok(VerifyOutcome::Rejected(StepRejection::SessionExpired))
            }
        }
    }
}

fn rejection_from_apply(outcome: ApplyOutcome) -> StepRejection {
    match outcome {
        ApplyOutcome::Applied(_) => {
            // Callers only reach here for non-applied outcomes.
            StepRejection::VersionConflict
        }
        ApplyOutcome::NotFound => StepRejection::NotFound,
        ApplyOutcome::Expired => StepRejection::SessionExpired,
        ApplyOutcome::StepMismatch { current } => StepRejection::StepOrder { current },
        ApplyOutcome::VersionConflict => StepRejection::VersionConflict,
        ApplyOutcome::AlreadyCompleted => StepRejection::AlreadyCompleted,
    }
}
