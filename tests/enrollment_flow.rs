//! End-to-end pipeline tests over the in-memory store.
//!
//! These drive the real service (token codec, state machine, code issuance,
//! finalize) with a capturing notifier standing in for email/SMS delivery.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::Mutex;

use matricula::enroll::codes::CodePolicy;
use matricula::enroll::credentials::{ArgonPasswordHasher, LocalCredentialIssuer};
use matricula::enroll::service::{
    CodeFailure, CollegeSelection, ProfileFields, ResendOutcome, StepOutcome, StepRejection,
    TokenConfigFields, VerifyOutcome,
};
use matricula::enroll::store::{EnrollmentStore, MemoryEnrollmentStore};
use matricula::enroll::token::StepTokenCodec;
use matricula::enroll::{Channel, EnrollConfig, EnrollmentService, Flow, Step};
use matricula::notify::{CodeDelivery, Notifier};

/// Captures deliveries so tests can read the codes a real user would receive.
#[derive(Default)]
struct CapturingNotifier {
    deliveries: Mutex<Vec<CodeDelivery>>,
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn deliver(&self, delivery: &CodeDelivery) -> Result<()> {
        self.deliveries.lock().await.push(delivery.clone());
        Ok(())
    }
}

impl CapturingNotifier {
    async fn latest_code(&self, channel: Channel) -> Option<String> {
        self.deliveries
            .lock()
            .await
            .iter()
            .rev()
            .find(|delivery| delivery.channel == channel)
            .map(|delivery| delivery.code.clone())
    }

    async fn delivery_count(&self) -> usize {
        self.deliveries.lock().await.len()
    }
}

struct Harness {
    service: Arc<EnrollmentService>,
    store: Arc<MemoryEnrollmentStore>,
    notifier: Arc<CapturingNotifier>,
}

fn harness(config: EnrollConfig) -> Harness {
    let store = Arc::new(MemoryEnrollmentStore::new());
    let notifier = Arc::new(CapturingNotifier::default());
    let codec = StepTokenCodec::new(&SecretString::from(
        "integration-test-signing-key-32b!".to_string(),
    ))
    .expect("codec");
    let service = Arc::new(EnrollmentService::new(
        store.clone(),
        notifier.clone(),
        codec,
        config,
        Arc::new(LocalCredentialIssuer),
        Arc::new(ArgonPasswordHasher),
    ));
    Harness {
        service,
        store,
        notifier,
    }
}

fn student_fields(email: &str) -> matricula::enroll::service::StartFields {
    matricula::enroll::service::StartFields {
        flow: Flow::Student,
        full_name: "Ada Lovelace".to_string(),
        email: email.to_string(),
        phone: "+15550100123".to_string(),
        password: "correct horse battery staple".to_string(),
    }
}

/// Walk a student session up to the verification step and return its token.
async fn student_at_verification(h: &Harness, email: &str, college_id: &str) -> Result<String> {
    let started = h.service.start(student_fields(email)).await?;
    let outcome = h
        .service
        .submit_college(
            &started.token,
            CollegeSelection {
                college_id: Some(college_id.to_string()),
                college_name: None,
            },
        )
        .await?;
    match outcome {
        StepOutcome::Advanced { token, session } => {
            assert_eq!(session.current_step, Step::VerificationPending);
            Ok(token)
        }
        other => panic!("expected advance into verification, got {other:?}"),
    }
}

#[tokio::test]
async fn full_student_scenario() -> Result<()> {
    // The canonical walkthrough: correct email code plus a wrong phone code
    // leaves the session pending with the email consumed; resubmitting just
    // the right phone code then finalizes exactly one account.
    let h = harness(EnrollConfig::new());
    let college = h.store.seed_college("Miskatonic").await;

    let token = student_at_verification(&h, "a@x.edu", &college.id.to_string()).await?;
    assert_eq!(h.notifier.delivery_count().await, 2);

    let email_code = h.notifier.latest_code(Channel::Email).await.expect("email code");
    let phone_code = h.notifier.latest_code(Channel::Phone).await.expect("phone code");
    assert_eq!(email_code.len(), 6);
    assert!(phone_code.chars().all(|c| c.is_ascii_digit()));

    let outcome = h
        .service
        .verify(&token, Some(&email_code), Some("000000"))
        .await?;
    match outcome {
        VerifyOutcome::CodeErrors { email, phone } => {
            assert_eq!(email, None);
            assert_eq!(phone, Some(CodeFailure::Invalid));
        }
        other => panic!("expected code errors, got {other:?}"),
    }

    // Session has not moved, and the email channel is now consumed.
    let account = h.store.account_by_email("a@x.edu").await;
    assert!(account.is_none(), "no account before both channels verify");

    // The consumed email code cannot be replayed, but the channel stays
    // satisfied, so only the phone code is needed now.
    let outcome = h
        .service
        .verify(&token, Some(&email_code), Some(&phone_code))
        .await?;
    let result = match outcome {
        VerifyOutcome::Completed(result) => result,
        other => panic!("expected completion, got {other:?}"),
    };
    assert_eq!(result.account.email, "a@x.edu");
    assert_eq!(result.account.role, "student");
    assert_eq!(result.account.college.id, college.id);
    assert!(!result.access_token.is_empty());

    let account = h.store.account_by_email("a@x.edu").await.expect("account");
    assert_eq!(account.id, result.account.id);
    Ok(())
}

#[tokio::test]
async fn finalize_is_idempotent() -> Result<()> {
    let h = harness(EnrollConfig::new());
    let college = h.store.seed_college("Miskatonic").await;
    let token = student_at_verification(&h, "b@x.edu", &college.id.to_string()).await?;

    let email_code = h.notifier.latest_code(Channel::Email).await.expect("email code");
    let phone_code = h.notifier.latest_code(Channel::Phone).await.expect("phone code");

    let first = h
        .service
        .verify(&token, Some(&email_code), Some(&phone_code))
        .await?;
    let VerifyOutcome::Completed(first) = first else {
        panic!("expected completion");
    };

    // Retried verify (client timeout, double click) echoes the identical
    // result and never creates a second account.
    let second = h
        .service
        .verify(&token, Some(&email_code), Some(&phone_code))
        .await?;
    let VerifyOutcome::Completed(second) = second else {
        panic!("expected idempotent echo");
    };
    assert_eq!(first.account.id, second.account.id);
    assert_eq!(first.access_token, second.access_token);
    Ok(())
}

#[tokio::test]
async fn concurrent_college_submissions_have_one_winner() -> Result<()> {
    let h = harness(EnrollConfig::new());
    let college = h.store.seed_college("Miskatonic").await;
    let started = h.service.start(student_fields("c@x.edu")).await?;

    let selection = || CollegeSelection {
        college_id: Some(college.id.to_string()),
        college_name: None,
    };
    let (left, right) = tokio::join!(
        h.service.submit_college(&started.token, selection()),
        h.service.submit_college(&started.token, selection()),
    );
    let outcomes = [left?, right?];

    let winners = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, StepOutcome::Advanced { .. }))
        .count();
    assert_eq!(winners, 1, "exactly one concurrent submission may win");
    for outcome in &outcomes {
        if let StepOutcome::Rejected(rejection) = outcome {
            assert!(
                matches!(
                    rejection,
                    StepRejection::VersionConflict | StepRejection::StepOrder { .. }
                ),
                "loser must see a stale-state rejection, got {rejection:?}"
            );
        }
    }
    Ok(())
}

#[tokio::test]
async fn skipping_a_step_is_rejected() -> Result<()> {
    let h = harness(EnrollConfig::new());
    let started = h.service.start(student_fields("d@x.edu")).await?;

    // Step 3 payload while the session still rests at step 1.
    let outcome = h
        .service
        .verify(&started.token, Some("123456"), Some("123456"))
        .await?;
    assert!(matches!(
        outcome,
        VerifyOutcome::Rejected(StepRejection::StepOrder {
            current: Step::Initiated
        })
    ));
    Ok(())
}

#[tokio::test]
async fn resend_honors_cooldown_then_reissues() -> Result<()> {
    let h = harness(EnrollConfig::new());
    let college = h.store.seed_college("Miskatonic").await;
    let token = student_at_verification(&h, "e@x.edu", &college.id.to_string()).await?;
    let first_email_code = h.notifier.latest_code(Channel::Email).await.expect("code");

    // Straight after entry both channels are inside the cooldown window.
    let outcome = h.service.resend_codes(&token).await?;
    match outcome {
        ResendOutcome::Cooldown {
            retry_after_seconds,
        } => assert!(retry_after_seconds > 0 && retry_after_seconds <= 60),
        other => panic!("expected cooldown, got {other:?}"),
    }

    h.store.advance_clock(60);
    let outcome = h.service.resend_codes(&token).await?;
    assert!(matches!(outcome, ResendOutcome::Sent));

    // The superseded first code no longer validates; the fresh one does.
    let fresh_email_code = h.notifier.latest_code(Channel::Email).await.expect("code");
    assert_ne!(
        h.notifier.delivery_count().await,
        2,
        "resend must deliver new codes"
    );
    let outcome = h
        .service
        .verify(&token, Some(&first_email_code), None)
        .await?;
    match outcome {
        VerifyOutcome::CodeErrors { email, phone } => {
            assert_eq!(email, Some(CodeFailure::Invalid));
            assert_eq!(phone, Some(CodeFailure::Missing));
        }
        other => panic!("expected code errors, got {other:?}"),
    }
    let outcome = h
        .service
        .verify(&token, Some(&fresh_email_code), None)
        .await?;
    match outcome {
        VerifyOutcome::CodeErrors { email, phone } => {
            assert_eq!(email, None, "fresh code must validate");
            assert_eq!(phone, Some(CodeFailure::Missing));
        }
        other => panic!("expected phone still missing, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn too_many_attempts_burns_the_code() -> Result<()> {
    let config =
        EnrollConfig::new().with_code_policy(CodePolicy::new().with_max_attempts(3));
    let h = harness(config);
    let college = h.store.seed_college("Miskatonic").await;
    let token = student_at_verification(&h, "f@x.edu", &college.id.to_string()).await?;
    let email_code = h.notifier.latest_code(Channel::Email).await.expect("code");

    for _ in 0..3 {
        let outcome = h.service.verify(&token, Some("999999"), None).await?;
        let VerifyOutcome::CodeErrors { email, .. } = outcome else {
            panic!("expected code errors");
        };
        assert_eq!(email, Some(CodeFailure::Invalid));
    }

    // Budget exhausted: even the correct code is refused until a resend.
    let outcome = h.service.verify(&token, Some(&email_code), None).await?;
    let VerifyOutcome::CodeErrors { email, .. } = outcome else {
        panic!("expected code errors");
    };
    assert_eq!(email, Some(CodeFailure::TooManyAttempts));
    Ok(())
}

#[tokio::test]
async fn duplicate_contact_surfaces_only_at_finalize() -> Result<()> {
    let h = harness(EnrollConfig::new());
    let college = h.store.seed_college("Miskatonic").await;

    // First registration completes.
    let token = student_at_verification(&h, "g@x.edu", &college.id.to_string()).await?;
    let email_code = h.notifier.latest_code(Channel::Email).await.expect("code");
    let phone_code = h.notifier.latest_code(Channel::Phone).await.expect("code");
    let outcome = h
        .service
        .verify(&token, Some(&email_code), Some(&phone_code))
        .await?;
    assert!(matches!(outcome, VerifyOutcome::Completed(_)));

    // A second draft with the same email sails through every step (no
    // existence leak) and only collides at commit time.
    h.store.advance_clock(120);
    let token = student_at_verification(&h, "g@x.edu", &college.id.to_string()).await?;
    let email_code = h.notifier.latest_code(Channel::Email).await.expect("code");
    let phone_code = h.notifier.latest_code(Channel::Phone).await.expect("code");
    let outcome = h
        .service
        .verify(&token, Some(&email_code), Some(&phone_code))
        .await?;
    assert!(matches!(outcome, VerifyOutcome::DuplicateContact));
    Ok(())
}

#[tokio::test]
async fn admin_flow_runs_the_longer_step_list() -> Result<()> {
    let h = harness(EnrollConfig::new());

    let started = h
        .service
        .start(matricula::enroll::service::StartFields {
            flow: Flow::CollegeAdmin,
            full_name: "Charles Dexter Ward".to_string(),
            email: "dean@miskatonic.edu".to_string(),
            phone: "+15550109999".to_string(),
            password: "essential saltes 1928".to_string(),
        })
        .await?;

    // College step rests at CollegeSelected for admins; no codes yet.
    let outcome = h
        .service
        .submit_college(
            &started.token,
            CollegeSelection {
                college_id: None,
                college_name: Some("Miskatonic University".to_string()),
            },
        )
        .await?;
    let StepOutcome::Advanced { token, session } = outcome else {
        panic!("expected advance");
    };
    assert_eq!(session.current_step, Step::CollegeSelected);
    assert_eq!(h.notifier.delivery_count().await, 0);

    let outcome = h
        .service
        .submit_profile(
            &token,
            ProfileFields {
                title: "Dean of Admissions".to_string(),
                department: Some("Registrar".to_string()),
            },
        )
        .await?;
    let StepOutcome::Advanced { token, session } = outcome else {
        panic!("expected advance");
    };
    assert_eq!(session.current_step, Step::ProfileCompleted);

    // Token configuration is skippable; skipping still enters verification.
    let outcome = h
        .service
        .submit_token_config(
            &token,
            TokenConfigFields {
                skip: true,
                token_name: None,
                token_symbol: None,
            },
        )
        .await?;
    let StepOutcome::Advanced { token, session } = outcome else {
        panic!("expected advance");
    };
    assert_eq!(session.current_step, Step::VerificationPending);
    assert_eq!(h.notifier.delivery_count().await, 2);

    let email_code = h.notifier.latest_code(Channel::Email).await.expect("code");
    let phone_code = h.notifier.latest_code(Channel::Phone).await.expect("code");
    let outcome = h
        .service
        .verify(&token, Some(&email_code), Some(&phone_code))
        .await?;
    let VerifyOutcome::Completed(result) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(result.account.role, "college_admin");
    assert_eq!(result.account.college.name, "Miskatonic University");
    Ok(())
}

#[tokio::test]
async fn expired_session_rejects_resend() -> Result<()> {
    let config = EnrollConfig::new().with_session_ttl_seconds(120);
    let h = harness(config);
    let college = h.store.seed_college("Miskatonic").await;
    let token = student_at_verification(&h, "h@x.edu", &college.id.to_string()).await?;

    h.store.advance_clock(121);
    let outcome = h.service.resend_codes(&token).await?;
    assert!(matches!(
        outcome,
        ResendOutcome::Rejected(StepRejection::SessionExpired)
    ));

    // After the sweep the session is gone entirely.
    h.store.sweep_expired().await?;
    let outcome = h.service.resend_codes(&token).await?;
    assert!(matches!(
        outcome,
        ResendOutcome::Rejected(StepRejection::NotFound)
    ));
    Ok(())
}
