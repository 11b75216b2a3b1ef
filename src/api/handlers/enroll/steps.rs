//! Step submission handlers.

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use tracing::error;

use crate::enroll::machine::FieldError;
use crate::enroll::service::{
    CollegeSelection, ProfileFields, StartFields, StepOutcome, TokenConfigFields,
};
use crate::enroll::{EnrollmentSession, Flow};

use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::EnrollState;
use super::types::{
    CollegeRequest, ErrorsResponse, ProfileRequest, StartRequest, TokenConfigRequest,
    TokenResponse,
};
use super::utils::{
    extract_client_ip, extract_enroll_token, normalize_email, normalize_phone, valid_email,
    valid_password, valid_phone,
};
use super::{errors_response, rejection_response};

fn token_response(token: String, session: &EnrollmentSession) -> Json<TokenResponse> {
    Json(TokenResponse {
        token,
        step: session.current_step.as_str().to_string(),
    })
}

/// Step 1: identity and contact fields. Creates the draft session.
#[utoipa::path(
    post,
    path = "/v1/enroll/start",
    request_body = StartRequest,
    responses(
        (status = 201, description = "Draft session created", body = TokenResponse),
        (status = 400, description = "Field-level validation errors", body = ErrorsResponse),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "enroll"
)]
pub async fn start(
    headers: HeaderMap,
    state: Extension<Arc<EnrollState>>,
    payload: Option<Json<StartRequest>>,
) -> impl IntoResponse {
    let request: StartRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let mut errors = Vec::new();
    let Some(flow) = Flow::parse(request.role.trim()) else {
        return errors_response(vec![FieldError::new(
            "role",
            "Role must be student or college_admin",
        )]);
    };
    let full_name = request.full_name.trim().to_string();
    if full_name.is_empty() || full_name.len() > 120 {
        errors.push(FieldError::new("full_name", "A name is required"));
    }
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        errors.push(FieldError::new("email", "Invalid email"));
    }
    let phone = normalize_phone(&request.phone);
    if !valid_phone(&phone) {
        errors.push(FieldError::new("phone", "Invalid phone number"));
    }
    if !valid_password(&request.password) {
        errors.push(FieldError::new(
            "password",
            "Password must be 8-128 characters",
        ));
    }
    if !errors.is_empty() {
        return errors_response(errors);
    }

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Start)
        == RateLimitDecision::Limited
        || state
            .rate_limiter()
            .check_contact(&email, RateLimitAction::Start)
            == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    match state
        .service()
        .start(StartFields {
            flow,
            full_name,
            email,
            phone,
            password: request.password,
        })
        .await
    {
        Ok(started) => (
            StatusCode::CREATED,
            token_response(started.token, &started.session),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to start enrollment: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Step 2: college selection or creation. Student sessions continue straight
/// into verification and get a token for the verification step back.
#[utoipa::path(
    post,
    path = "/v1/enroll/college",
    request_body = CollegeRequest,
    params(
        ("x-enroll-token" = String, Header, description = "Temp token from the previous step")
    ),
    responses(
        (status = 200, description = "College recorded", body = TokenResponse),
        (status = 400, description = "Field-level validation errors", body = ErrorsResponse),
        (status = 401, description = "Missing or malformed token", body = String),
        (status = 409, description = "Stale step or version", body = String),
        (status = 410, description = "Session expired", body = String)
    ),
    tag = "enroll"
)]
pub async fn college(
    headers: HeaderMap,
    state: Extension<Arc<EnrollState>>,
    payload: Option<Json<CollegeRequest>>,
) -> impl IntoResponse {
    let request = payload.map(|Json(payload)| payload).unwrap_or_default();
    let Some(token) = extract_enroll_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            "Missing enrollment token".to_string(),
        )
            .into_response();
    };

    let selection = CollegeSelection {
        college_id: request.college_id,
        college_name: request.college_name,
    };
    match state.service().submit_college(&token, selection).await {
        Ok(StepOutcome::Advanced { token, session }) => {
            token_response(token, &session).into_response()
        }
        Ok(StepOutcome::Rejected(rejection)) => rejection_response(rejection),
        Err(err) => {
            error!("Failed to apply college step: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Admin step 3: profile details.
#[utoipa::path(
    post,
    path = "/v1/enroll/profile",
    request_body = ProfileRequest,
    params(
        ("x-enroll-token" = String, Header, description = "Temp token from the previous step")
    ),
    responses(
        (status = 200, description = "Profile recorded", body = TokenResponse),
        (status = 400, description = "Field-level validation errors", body = ErrorsResponse),
        (status = 401, description = "Missing or malformed token", body = String),
        (status = 409, description = "Stale step or version", body = String),
        (status = 410, description = "Session expired", body = String)
    ),
    tag = "enroll"
)]
pub async fn profile(
    headers: HeaderMap,
    state: Extension<Arc<EnrollState>>,
    payload: Option<Json<ProfileRequest>>,
) -> impl IntoResponse {
    let request: ProfileRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    let Some(token) = extract_enroll_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            "Missing enrollment token".to_string(),
        )
            .into_response();
    };

    let title = request.title.trim().to_string();
    if title.is_empty() || title.len() > 120 {
        return errors_response(vec![FieldError::new("title", "A title is required")]);
    }
    let department = request
        .department
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    match state
        .service()
        .submit_profile(&token, ProfileFields { title, department })
        .await
    {
        Ok(StepOutcome::Advanced { token, session }) => {
            token_response(token, &session).into_response()
        }
        Ok(StepOutcome::Rejected(rejection)) => rejection_response(rejection),
        Err(err) => {
            error!("Failed to apply profile step: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Admin step 4: reward-token configuration, skippable. Advances into
/// verification either way.
#[utoipa::path(
    post,
    path = "/v1/enroll/token-config",
    request_body = TokenConfigRequest,
    params(
        ("x-enroll-token" = String, Header, description = "Temp token from the previous step")
    ),
    responses(
        (status = 200, description = "Configuration recorded", body = TokenResponse),
        (status = 400, description = "Field-level validation errors", body = ErrorsResponse),
        (status = 401, description = "Missing or malformed token", body = String),
        (status = 409, description = "Stale step or version", body = String),
        (status = 410, description = "Session expired", body = String)
    ),
    tag = "enroll"
)]
pub async fn token_config(
    headers: HeaderMap,
    state: Extension<Arc<EnrollState>>,
    payload: Option<Json<TokenConfigRequest>>,
) -> impl IntoResponse {
    let request = payload.map(|Json(payload)| payload).unwrap_or_default();
    let Some(token) = extract_enroll_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            "Missing enrollment token".to_string(),
        )
            .into_response();
    };

    let fields = TokenConfigFields {
        skip: request.skip,
        token_name: request.token_name,
        token_symbol: request.token_symbol,
    };
    match state.service().submit_token_config(&token, fields).await {
        Ok(StepOutcome::Advanced { token, session }) => {
            token_response(token, &session).into_response()
        }
        Ok(StepOutcome::Rejected(rejection)) => rejection_response(rejection),
        Err(err) => {
            error!("Failed to apply token-config step: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response()
        }
    }
}
