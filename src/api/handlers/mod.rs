//! API handlers for matricula.
//!
//! Enrollment-specific handlers (step submissions, resend, verify) live in
//! [`enroll`]; [`health`] and [`root`] are operational endpoints.

pub mod enroll;
pub mod health;
pub mod root;
