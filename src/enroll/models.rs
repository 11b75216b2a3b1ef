//! Core data model for enrollment sessions, steps, and verification channels.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

/// Which registration pipeline a session runs through.
///
/// Both flows share the same state machine contract; the admin flow simply
/// has a longer step list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    Student,
    CollegeAdmin,
}

impl Flow {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::CollegeAdmin => "college_admin",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "student" => Some(Self::Student),
            "college_admin" => Some(Self::CollegeAdmin),
            _ => None,
        }
    }
}

/// Session progress marker. Steps only ever advance forward, in the order
/// defined by the session's [`Flow`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Initiated,
    CollegeSelected,
    ProfileCompleted,
    TokenConfigured,
    VerificationPending,
    Completed,
}

impl Step {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::CollegeSelected => "college_selected",
            Self::ProfileCompleted => "profile_completed",
            Self::TokenConfigured => "token_configured",
            Self::VerificationPending => "verification_pending",
            Self::Completed => "completed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "initiated" => Some(Self::Initiated),
            "college_selected" => Some(Self::CollegeSelected),
            "profile_completed" => Some(Self::ProfileCompleted),
            "token_configured" => Some(Self::TokenConfigured),
            "verification_pending" => Some(Self::VerificationPending),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Verification medium. Each channel requires its own one-time code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Phone,
}

impl Channel {
    pub const ALL: [Self; 2] = [Self::Email, Self::Phone];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email" => Some(Self::Email),
            "phone" => Some(Self::Phone),
            _ => None,
        }
    }
}

/// A draft registration in progress.
///
/// `collected` accumulates the step payloads; keys are only ever added or
/// refreshed, never removed. `version` increments on every successful step
/// transition and is embedded in the temp token to detect stale submissions.
#[derive(Clone, Debug)]
pub struct EnrollmentSession {
    pub id: Uuid,
    pub flow: Flow,
    pub current_step: Step,
    pub version: i64,
    pub collected: Map<String, Value>,
    pub created_at_unix: i64,
    pub expires_at_unix: i64,
    /// Cached finalize result so retries of a completed session echo the
    /// original response instead of redoing work.
    pub finalize_result: Option<FinalizeResult>,
}

impl EnrollmentSession {
    /// Fetch a collected field as a string, if present.
    #[must_use]
    pub fn collected_str(&self, key: &str) -> Option<&str> {
        self.collected.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.expires_at_unix <= now_unix
    }
}

/// Merge `patch` into `collected` without deleting prior keys.
///
/// Same-key refresh is allowed (idempotent retries of a step resubmit the
/// same payload); removal is not.
pub fn merge_collected(collected: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        collected.insert(key.clone(), value.clone());
    }
}

/// College reference carried by the college-selection step: either an
/// existing record or a name to create at finalization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollegeRef {
    Existing(Uuid),
    New(String),
}

/// A college row, existing or created during finalization.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CollegeRecord {
    pub id: Uuid,
    pub name: String,
}

/// The durable account produced by finalization.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AccountRecord {
    pub id: Uuid,
    pub email: String,
    pub phone: String,
    pub full_name: String,
    pub role: String,
    pub college: CollegeRecord,
}

/// Everything finalize produces; stored on the session row verbatim so a
/// retried finalize returns the identical result.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FinalizeResult {
    pub account: AccountRecord,
    pub access_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_round_trips_through_strings() {
        for step in [
            Step::Initiated,
            Step::CollegeSelected,
            Step::ProfileCompleted,
            Step::TokenConfigured,
            Step::VerificationPending,
            Step::Completed,
        ] {
            assert_eq!(Step::parse(step.as_str()), Some(step));
        }
        assert_eq!(Step::parse("bogus"), None);
    }

    #[test]
    fn flow_and_channel_round_trip() {
        assert_eq!(Flow::parse("student"), Some(Flow::Student));
        assert_eq!(Flow::parse("college_admin"), Some(Flow::CollegeAdmin));
        assert_eq!(Flow::parse("professor"), None);
        assert_eq!(Channel::parse("email"), Some(Channel::Email));
        assert_eq!(Channel::parse("phone"), Some(Channel::Phone));
        assert_eq!(Channel::parse("fax"), None);
    }

    #[test]
    fn merge_collected_is_additive() {
        let mut collected = Map::new();
        collected.insert("email".to_string(), json!("a@x.edu"));
        collected.insert("full_name".to_string(), json!("Ada"));

        let mut patch = Map::new();
        patch.insert("college_id".to_string(), json!("42"));
        merge_collected(&mut collected, &patch);

        assert_eq!(collected.get("email"), Some(&json!("a@x.edu")));
        assert_eq!(collected.get("full_name"), Some(&json!("Ada")));
        assert_eq!(collected.get("college_id"), Some(&json!("42")));
    }

    #[test]
    fn merge_collected_refreshes_same_key() {
        let mut collected = Map::new();
        collected.insert("college_id".to_string(), json!("41"));

        let mut patch = Map::new();
        patch.insert("college_id".to_string(), json!("42"));
        merge_collected(&mut collected, &patch);

        assert_eq!(collected.get("college_id"), Some(&json!("42")));
        assert_eq!(collected.len(), 1);
    }

    #[test]
    fn session_expiry_check() {
        let session = EnrollmentSession {
            id: Uuid::new_v4(),
            flow: Flow::Student,
            current_step: Step::Initiated,
            version: 0,
            collected: Map::new(),
            created_at_unix: 1_700_000_000,
            expires_at_unix: 1_700_002_700,
            finalize_result: None,
        };
        assert!(!session.is_expired(1_700_000_000));
        assert!(session.is_expired(1_700_002_700));
        assert!(session.is_expired(1_700_003_000));
    }
}
