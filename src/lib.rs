//! # Matricula (Student Enrollment & Verification)
//!
//! `matricula` backs the multi-step signup flow for students and college
//! administrators. Partial registration state travels between requests in a
//! signed temp token instead of server-side session pinning, so any instance
//! can serve any step.
//!
//! ## Pipeline
//!
//! - **Steps advance forward only.** Each session runs a fixed step order per
//!   flow; a submission is accepted only for the step the session rests at,
//!   and an optimistic version counter makes exactly one of any concurrent
//!   submissions win.
//! - **Two-channel verification.** Email and phone each require an
//!   independent one-time code with resend cooldown, bounded attempts, and
//!   consume-on-success semantics.
//! - **Atomic finalize.** Converting a completed draft into an account
//!   (college resolution included) is a single transaction, idempotent under
//!   client retries: a finished session echoes its original result.
//!
//! ## Collaborators
//!
//! Code delivery, password hashing, and access-credential issuance are
//! capability seams (`Notifier`, `PasswordHasher`, `CredentialIssuer`), so
//! deployments can swap providers without touching the flow logic.

pub mod api;
pub mod cli;
pub mod enroll;
pub mod notify;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
