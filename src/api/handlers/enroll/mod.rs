//! Enrollment endpoints: step submissions, code resend, and verification.

pub mod rate_limit;
pub mod state;
pub mod steps;
pub mod types;
pub mod utils;
pub mod verification;

pub use rate_limit::{NoopRateLimiter, RateLimiter};
pub use state::EnrollState;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::enroll::machine::FieldError;
use crate::enroll::service::StepRejection;

use types::{ErrorsResponse, FieldErrorBody};

/// Map a typed rejection to its HTTP shape. Every variant is a recoverable
/// outcome with a distinct client remedy; none of them are server faults.
pub(crate) fn rejection_response(rejection: StepRejection) -> Response {
    match rejection {
        StepRejection::TokenMalformed => {
            (StatusCode::UNAUTHORIZED, "Invalid enrollment token".to_string()).into_response()
        }
        StepRejection::TokenExpired => {
            (StatusCode::GONE, "Enrollment token expired".to_string()).into_response()
        }
        StepRejection::NotFound => {
            (StatusCode::NOT_FOUND, "Unknown enrollment session".to_string()).into_response()
        }
        StepRejection::SessionExpired => {
            (StatusCode::GONE, "Enrollment session expired".to_string()).into_response()
        }
        StepRejection::StepOrder { current } => (
            StatusCode::CONFLICT,
            format!("Session is at step {}", current.as_str()),
        )
            .into_response(),
        StepRejection::VersionConflict => (
            StatusCode::CONFLICT,
            "Session was updated by another request".to_string(),
        )
            .into_response(),
        StepRejection::AlreadyCompleted => (
            StatusCode::CONFLICT,
            "Registration already completed".to_string(),
        )
            .into_response(),
        StepRejection::Invalid(errors) => errors_response(errors),
    }
}

pub(crate) fn errors_response(errors: Vec<FieldError>) -> Response {
    let body = ErrorsResponse {
        errors: errors
            .into_iter()
            .map(|error| FieldErrorBody {
                field: error.field.to_string(),
                message: error.message,
            })
            .collect(),
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}
