//! Code resend and verification endpoints.

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use tracing::error;

use crate::enroll::service::{CodeFailure, ResendOutcome, StatusOutcome, VerifyOutcome};

use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::rejection_response;
use super::state::EnrollState;
use super::types::{
    ResendResponse, SessionStatusResponse, VerifyErrors, VerifyErrorsResponse, VerifyRequest,
    VerifyResponse,
};
use super::utils::{extract_client_ip, extract_enroll_token};

fn code_failure_message(failure: CodeFailure) -> String {
    match failure {
        CodeFailure::Missing => "A verification code is required".to_string(),
        CodeFailure::Invalid => "Invalid code".to_string(),
        CodeFailure::Expired => "Code expired, request a new one".to_string(),
        CodeFailure::TooManyAttempts => {
            "Too many attempts, request a new code".to_string()
        }
    }
}

/// Re-issue verification codes for channels not yet verified.
///
/// Never advances the step; an expired or stale token still means restart.
#[utoipa::path(
    post,
    path = "/v1/enroll/resend-codes",
    params(
        ("x-enroll-token" = String, Header, description = "Temp token for the session")
    ),
    responses(
        (status = 200, description = "Codes handed to the notifier", body = ResendResponse),
        (status = 401, description = "Missing or malformed token", body = String),
        (status = 409, description = "Stale step or version", body = String),
        (status = 410, description = "Session expired", body = String),
        (status = 429, description = "Resend cooldown active", body = String)
    ),
    tag = "enroll"
)]
pub async fn resend_codes(
    headers: HeaderMap,
    state: Extension<Arc<EnrollState>>,
) -> impl IntoResponse {
    let Some(token) = extract_enroll_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            "Missing enrollment token".to_string(),
        )
            .into_response();
    };

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::ResendCodes)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    match state.service().resend_codes(&token).await {
        Ok(ResendOutcome::Sent) => Json(ResendResponse { ok: true }).into_response(),
        Ok(ResendOutcome::Cooldown {
            retry_after_seconds,
        }) => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                format!("Resend available in {retry_after_seconds} seconds"),
            )
                .into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
            response
        }
        Ok(ResendOutcome::Rejected(rejection)) => rejection_response(rejection),
        Err(err) => {
            error!("Failed to resend verification codes: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Resend failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Final step: submit both channel codes; on success the account is created
/// atomically and the access credential returned. Retrying a completed
/// session echoes the original result.
#[utoipa::path(
    post,
    path = "/v1/enroll/verify",
    request_body = VerifyRequest,
    params(
        ("x-enroll-token" = String, Header, description = "Temp token for the session")
    ),
    responses(
        (status = 200, description = "Account created (or original result echoed)", body = VerifyResponse),
        (status = 400, description = "One or both codes failed", body = VerifyErrorsResponse),
        (status = 401, description = "Missing or malformed token", body = String),
        (status = 409, description = "Stale state or duplicate account", body = String),
        (status = 410, description = "Session expired", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "enroll"
)]
pub async fn verify(
    headers: HeaderMap,
    state: Extension<Arc<EnrollState>>,
    payload: Option<Json<VerifyRequest>>,
) -> impl IntoResponse {
    let request = payload.map(|Json(payload)| payload).unwrap_or_default();
    let Some(token) = extract_enroll_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            "Missing enrollment token".to_string(),
        )
            .into_response();
    };

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Verify)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let outcome = state
        .service()
        .verify(
            &token,
            request.email_code.as_deref(),
            request.phone_code.as_deref(),
        )
        .await;
    match outcome {
        Ok(VerifyOutcome::Completed(result)) => Json(VerifyResponse {
            access_token: result.access_token,
            account: result.account,
        })
        .into_response(),
        Ok(VerifyOutcome::CodeErrors { email, phone }) => (
            StatusCode::BAD_REQUEST,
            Json(VerifyErrorsResponse {
                errors: VerifyErrors {
                    email_code: email.map(code_failure_message),
                    phone_code: phone.map(code_failure_message),
                },
            }),
        )
            .into_response(),
        Ok(VerifyOutcome::DuplicateContact) => (
            StatusCode::CONFLICT,
            "An account with this email already exists".to_string(),
        )
            .into_response(),
        Ok(VerifyOutcome::Rejected(rejection)) => rejection_response(rejection),
        Err(err) => {
            error!("Failed to verify enrollment: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Re-sync endpoint: exchange any authentic, unexpired token for the
/// session's current step and a fresh token.
#[utoipa::path(
    get,
    path = "/v1/enroll/session",
    params(
        ("x-enroll-token" = String, Header, description = "Temp token for the session")
    ),
    responses(
        (status = 200, description = "Current session state", body = SessionStatusResponse),
        (status = 401, description = "Missing or malformed token", body = String),
        (status = 404, description = "Unknown session", body = String),
        (status = 410, description = "Session expired", body = String)
    ),
    tag = "enroll"
)]
pub async fn session_status(
    headers: HeaderMap,
    state: Extension<Arc<EnrollState>>,
) -> impl IntoResponse {
    let Some(token) = extract_enroll_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            "Missing enrollment token".to_string(),
        )
            .into_response();
    };

    match state.service().session_status(&token).await {
        Ok(StatusOutcome::Current { token, session }) => Json(SessionStatusResponse {
            token,
            step: session.current_step.as_str().to_string(),
            flow: session.flow.as_str().to_string(),
        })
        .into_response(),
        Ok(StatusOutcome::Rejected(rejection)) => rejection_response(rejection),
        Err(err) => {
            error!("Failed to load session status: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Status lookup failed".to_string(),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::NoopRateLimiter;
    use super::*;
    use crate::enroll::credentials::{ArgonPasswordHasher, LocalCredentialIssuer};
    use crate::enroll::store::MemoryEnrollmentStore;
    use crate::enroll::token::StepTokenCodec;
    use crate::enroll::{EnrollConfig, EnrollmentService};
    use crate::notify::LogNotifier;
    use axum::http::HeaderValue;
    use secrecy::SecretString;

    fn enroll_state() -> Arc<EnrollState> {
        let codec = StepTokenCodec::new(&SecretString::from(
            "0123456789abcdef0123456789abcdef".to_string(),
        ))
        .expect("codec");
        let service = EnrollmentService::new(
            Arc::new(MemoryEnrollmentStore::new()),
            Arc::new(LogNotifier),
            codec,
            EnrollConfig::new(),
            Arc::new(LocalCredentialIssuer),
            Arc::new(ArgonPasswordHasher),
        );
        Arc::new(EnrollState::new(
            Arc::new(service),
            Arc::new(NoopRateLimiter),
        ))
    }

    fn token_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(token) {
            headers.insert(super::super::utils::ENROLL_TOKEN_HEADER, value);
        }
        headers
    }

    #[tokio::test]
    async fn resend_requires_token() {
        let response = resend_codes(HeaderMap::new(), Extension(enroll_state()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn verify_requires_token() {
        let response = verify(
            HeaderMap::new(),
            Extension(enroll_state()),
            Some(Json(VerifyRequest::default())),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn verify_rejects_garbage_token() {
        let response = verify(
            token_headers("v1.not.real"),
            Extension(enroll_state()),
            Some(Json(VerifyRequest::default())),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn session_status_rejects_garbage_token() {
        let response = session_status(token_headers("v1.not.real"), Extension(enroll_state()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn code_failure_messages_are_distinct() {
        let messages: Vec<String> = [
            CodeFailure::Missing,
            CodeFailure::Invalid,
            CodeFailure::Expired,
            CodeFailure::TooManyAttempts,
        ]
        .into_iter()
        .map(code_failure_message)
        .collect();
        for (index, message) in messages.iter().enumerate() {
            for other in &messages[index + 1..] {
                assert_ne!(message, other);
            }
        }
    }
}
