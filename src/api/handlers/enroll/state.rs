//! Shared state for enrollment handlers.

use std::sync::Arc;

use crate::enroll::EnrollmentService;

use super::rate_limit::RateLimiter;

pub struct EnrollState {
    service: Arc<EnrollmentService>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl EnrollState {
    #[must_use]
    pub fn new(service: Arc<EnrollmentService>, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            service,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn service(&self) -> &EnrollmentService {
        &self.service
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}
