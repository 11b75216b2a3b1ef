//! Enrollment pipeline configuration.

use super::codes::CodePolicy;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 45 * 60;
const MIN_SESSION_TTL_SECONDS: i64 = 60;

/// Tunables for the registration pipeline. Everything here is surfaced
/// through the CLI/environment; nothing is hard-coded into the flow logic.
#[derive(Clone, Copy, Debug)]
pub struct EnrollConfig {
    session_ttl_seconds: i64,
    codes: CodePolicy,
}

impl EnrollConfig {
    /// Default config: 45 minute session TTL and the default code policy.
    ///
    /// The TTL is absolute: a session and every code it owns die together,
    /// bounding total abandonment exposure.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            codes: CodePolicy::new(),
        }
    }

    #[must_use]
    pub const fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_code_policy(mut self, codes: CodePolicy) -> Self {
        self.codes = codes;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        Self {
            session_ttl_seconds: self.session_ttl_seconds.max(MIN_SESSION_TTL_SECONDS),
            codes: self.codes.normalize(),
        }
    }

    #[must_use]
    pub const fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub const fn codes(&self) -> &CodePolicy {
        &self.codes
    }
}

impl Default for EnrollConfig {
    fn default() -> Self {
        Self::new()
    }
}
