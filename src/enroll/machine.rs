//! Step ordering rules for the enrollment pipeline.
//!
//! The machine is pure: it decides which transitions are legal for a flow and
//! what a step's patch must contain. Atomicity of the actual mutation lives
//! in the store; the machine only answers "may this happen at all".

use serde_json::{Map, Value};

use super::models::{CollegeRef, Flow, Step};

/// A field-level validation failure, surfaced to clients as a 400 body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    #[must_use]
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

const STUDENT_STEPS: &[Step] = &[
    Step::Initiated,
    Step::CollegeSelected,
    Step::VerificationPending,
    Step::Completed,
];

const COLLEGE_ADMIN_STEPS: &[Step] = &[
    Step::Initiated,
    Step::CollegeSelected,
    Step::ProfileCompleted,
    Step::TokenConfigured,
    Step::VerificationPending,
    Step::Completed,
];

/// Ordered step list for a flow.
#[must_use]
pub const fn steps(flow: Flow) -> &'static [Step] {
    match flow {
        Flow::Student => STUDENT_STEPS,
        Flow::CollegeAdmin => COLLEGE_ADMIN_STEPS,
    }
}

/// The step that follows `current` in this flow, or `None` for terminal or
/// foreign steps.
#[must_use]
pub fn next_step(flow: Flow, current: Step) -> Option<Step> {
    let order = steps(flow);
    let position = order.iter().position(|step| *step == current)?;
    order.get(position + 1).copied()
}

/// Whether `step` belongs to this flow at all.
#[must_use]
pub fn belongs_to_flow(flow: Flow, step: Step) -> bool {
    steps(flow).contains(&step)
}

/// The resting step from which a session enters verification.
#[must_use]
pub const fn step_before_verification(flow: Flow) -> Step {
    match flow {
        Flow::Student => Step::CollegeSelected,
        Flow::CollegeAdmin => Step::TokenConfigured,
    }
}

/// Whether `from -> to` is a legal single forward transition for the flow.
#[must_use]
pub fn is_legal_transition(flow: Flow, from: Step, to: Step) -> bool {
    next_step(flow, from) == Some(to)
}

/// Extract and validate the college reference from a college-step patch.
///
/// The step requires exactly one of `college_id` (existing record) or
/// `college_name` (record created at finalization).
pub fn college_ref_from_patch(patch: &Map<String, Value>) -> Result<CollegeRef, Vec<FieldError>> {
    let id = patch
        .get("college_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let name = patch
        .get("college_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match (id, name) {
        (Some(_), Some(_)) => Err(vec![FieldError::new(
            "college_id",
            "Provide either college_id or college_name, not both",
        )]),
        (Some(id), None) => match uuid::Uuid::parse_str(id) {
            Ok(id) => Ok(CollegeRef::Existing(id)),
            Err(_) => Err(vec![FieldError::new("college_id", "Invalid college id")]),
        },
        (None, Some(name)) => Ok(CollegeRef::New(name.to_string())),
        (None, None) => Err(vec![FieldError::new(
            "college_id",
            "A college selection is required",
        )]),
    }
}

/// Collected fields a session must carry before it can finalize.
///
/// Returns the missing field names; empty means eligible (verification
/// channel status is checked separately against the code store).
#[must_use]
pub fn missing_for_finalize(collected: &Map<String, Value>) -> Vec<&'static str> {
    let mut missing = Vec::new();
    for field in ["email", "phone", "full_name", "password_hash"] {
        let present = collected
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|value| !value.trim().is_empty());
        if !present {
            missing.push(field);
        }
    }
    if college_ref_from_patch(collected).is_err() {
        missing.push("college_id");
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn student_flow_order() {
        assert_eq!(
            next_step(Flow::Student, Step::Initiated),
            Some(Step::CollegeSelected)
        );
        assert_eq!(
            next_step(Flow::Student, Step::CollegeSelected),
            Some(Step::VerificationPending)
        );
        assert_eq!(
            next_step(Flow::Student, Step::VerificationPending),
            Some(Step::Completed)
        );
        assert_eq!(next_step(Flow::Student, Step::Completed), None);
    }

    #[test]
    fn admin_flow_inserts_profile_and_token_steps() {
        assert_eq!(
            next_step(Flow::CollegeAdmin, Step::CollegeSelected),
            Some(Step::ProfileCompleted)
        );
        assert_eq!(
            next_step(Flow::CollegeAdmin, Step::ProfileCompleted),
            Some(Step::TokenConfigured)
        );
        assert_eq!(
            next_step(Flow::CollegeAdmin, Step::TokenConfigured),
            Some(Step::VerificationPending)
        );
    }

    #[test]
    fn student_flow_has_no_admin_steps() {
        assert_eq!(next_step(Flow::Student, Step::ProfileCompleted), None);
        assert!(!belongs_to_flow(Flow::Student, Step::ProfileCompleted));
        assert!(!belongs_to_flow(Flow::Student, Step::TokenConfigured));
        assert!(belongs_to_flow(Flow::CollegeAdmin, Step::TokenConfigured));
    }

    #[test]
    fn transitions_cannot_skip_steps() {
        assert!(is_legal_transition(
            Flow::Student,
            Step::Initiated,
            Step::CollegeSelected
        ));
        assert!(!is_legal_transition(
            Flow::Student,
            Step::Initiated,
            Step::VerificationPending
        ));
        assert!(!is_legal_transition(
            Flow::Student,
            Step::CollegeSelected,
            Step::Initiated
        ));
        assert!(!is_legal_transition(
            Flow::CollegeAdmin,
            Step::CollegeSelected,
            Step::VerificationPending
        ));
    }

    #[test]
    fn verification_entry_point_per_flow() {
        assert_eq!(
            step_before_verification(Flow::Student),
            Step::CollegeSelected
        );
        assert_eq!(
            step_before_verification(Flow::CollegeAdmin),
            Step::TokenConfigured
        );
    }

    #[test]
    fn college_ref_requires_exactly_one_field() {
        let mut patch = Map::new();
        assert!(college_ref_from_patch(&patch).is_err());

        patch.insert("college_name".to_string(), json!("Miskatonic"));
        assert_eq!(
            college_ref_from_patch(&patch),
            Ok(CollegeRef::New("Miskatonic".to_string()))
        );

        let id = uuid::Uuid::new_v4();
        patch.insert("college_id".to_string(), json!(id.to_string()));
        assert!(college_ref_from_patch(&patch).is_err());

        patch.remove("college_name");
        assert_eq!(
            college_ref_from_patch(&patch),
            Ok(CollegeRef::Existing(id))
        );
    }

    #[test]
    fn college_ref_rejects_malformed_id() {
        let mut patch = Map::new();
        patch.insert("college_id".to_string(), json!("not-a-uuid"));
        let errors = college_ref_from_patch(&patch).unwrap_err();
        assert_eq!(errors[0].field, "college_id");
    }

    #[test]
    fn finalize_requires_identity_fields_and_college() {
        let mut collected = Map::new();
        let missing = missing_for_finalize(&collected);
        assert!(missing.contains(&"email"));
        assert!(missing.contains(&"college_id"));

        collected.insert("email".to_string(), json!("a@x.edu"));
        collected.insert("phone".to_string(), json!("+15550100"));
        collected.insert("full_name".to_string(), json!("Ada"));
        collected.insert("password_hash".to_string(), json!("$argon2id$..."));
        collected.insert("college_name".to_string(), json!("Miskatonic"));
        assert!(missing_for_finalize(&collected).is_empty());
    }
}
