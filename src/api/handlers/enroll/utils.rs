//! Small helpers for enrollment input validation and header extraction.

use axum::http::HeaderMap;
use regex::Regex;

/// Header carrying the temp token between steps.
pub const ENROLL_TOKEN_HEADER: &str = "x-enroll-token";

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Normalize a phone number: keep digits and a leading `+`.
pub(crate) fn normalize_phone(phone: &str) -> String {
    let trimmed = phone.trim();
    let mut normalized = String::with_capacity(trimmed.len());
    for (index, c) in trimmed.chars().enumerate() {
        if c.is_ascii_digit() || (index == 0 && c == '+') {
            normalized.push(c);
        }
    }
    normalized
}

/// E.164-ish sanity check on already-normalized input.
pub(crate) fn valid_phone(phone_normalized: &str) -> bool {
    Regex::new(r"^\+?[0-9]{7,15}$").is_ok_and(|regex| regex.is_match(phone_normalized))
}

/// Password intake bounds; the hash scheme itself is a capability seam.
pub(crate) fn valid_password(password: &str) -> bool {
    (8..=128).contains(&password.len())
}

/// Pull the temp token from the enrollment header.
pub(crate) fn extract_enroll_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ENROLL_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Extract a client IP for rate limiting from common proxy headers.
pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
