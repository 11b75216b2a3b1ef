//! One-time verification code generation and comparison.
//!
//! Codes are short digit strings sent out-of-band per channel. Only a SHA-256
//! hash ever reaches the store, and comparisons run in constant time.

use anyhow::{Context, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const DEFAULT_CODE_LENGTH: usize = 6;
const DEFAULT_CODE_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: i64 = 60;
const DEFAULT_MAX_ATTEMPTS: i32 = 5;

const MIN_CODE_LENGTH: usize = 4;
const MAX_CODE_LENGTH: usize = 10;

/// Tunables for issuing and validating verification codes.
#[derive(Clone, Copy, Debug)]
pub struct CodePolicy {
    length: usize,
    ttl_seconds: i64,
    resend_cooldown_seconds: i64,
    max_attempts: i32,
}

impl CodePolicy {
    /// Default policy: 6 digits, 10 minute TTL, 60 s resend cooldown,
    /// 5 attempts before the code is burned.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            length: DEFAULT_CODE_LENGTH,
            ttl_seconds: DEFAULT_CODE_TTL_SECONDS,
            resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    #[must_use]
    pub const fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    #[must_use]
    pub const fn with_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.resend_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: i32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Clamp out-of-range values to safe bounds.
    #[must_use]
    pub fn normalize(self) -> Self {
        Self {
            length: self.length.clamp(MIN_CODE_LENGTH, MAX_CODE_LENGTH),
            ttl_seconds: self.ttl_seconds.max(1),
            resend_cooldown_seconds: self.resend_cooldown_seconds.max(0),
            max_attempts: self.max_attempts.max(1),
        }
    }

    #[must_use]
    pub const fn length(&self) -> usize {
        self.length
    }

    #[must_use]
    pub const fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    #[must_use]
    pub const fn resend_cooldown_seconds(&self) -> i64 {
        self.resend_cooldown_seconds
    }

    #[must_use]
    pub const fn max_attempts(&self) -> i32 {
        self.max_attempts
    }
}

impl Default for CodePolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a random digit code, leading zeros preserved.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_code(length: usize) -> Result<String> {
    let mut code = String::with_capacity(length);
    let mut buffer = [0u8; 16];
    while code.len() < length {
        OsRng
            .try_fill_bytes(&mut buffer)
            .context("failed to draw verification code digits")?;
        for byte in buffer {
            if code.len() == length {
                break;
            }
            // Rejection sampling keeps each digit uniform.
            if byte < 250 {
                code.push(char::from(b'0' + byte % 10));
            }
        }
    }
    Ok(code)
}

/// Hash a code before storage; raw codes never touch the store.
#[must_use]
pub fn hash_code(code: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hasher.finalize().to_vec()
}

/// Constant-time hash comparison for submitted codes.
#[must_use]
pub fn hashes_match(left: &[u8], right: &[u8]) -> bool {
    left.ct_eq(right).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults() {
        let policy = CodePolicy::new();
        assert_eq!(policy.length(), 6);
        assert_eq!(policy.ttl_seconds(), 600);
        assert_eq!(policy.resend_cooldown_seconds(), 60);
        assert_eq!(policy.max_attempts(), 5);
    }

    #[test]
    fn policy_builders_and_normalize() {
        let policy = CodePolicy::new()
            .with_length(2)
            .with_ttl_seconds(0)
            .with_resend_cooldown_seconds(-5)
            .with_max_attempts(0)
            .normalize();
        assert_eq!(policy.length(), MIN_CODE_LENGTH);
        assert_eq!(policy.ttl_seconds(), 1);
        assert_eq!(policy.resend_cooldown_seconds(), 0);
        assert_eq!(policy.max_attempts(), 1);

        let policy = CodePolicy::new().with_length(64).normalize();
        assert_eq!(policy.length(), MAX_CODE_LENGTH);
    }

    #[test]
    fn generated_codes_are_digits_of_requested_length() -> Result<()> {
        for _ in 0..64 {
            let code = generate_code(6)?;
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
        Ok(())
    }

    #[test]
    fn leading_zeros_survive() -> Result<()> {
        // With 256 draws of 6 digits the chance of never seeing a leading
        // zero is (9/10)^256; a miss here means the generator is wrong.
        let saw_leading_zero = (0..256)
            .map(|_| generate_code(6))
            .collect::<Result<Vec<_>>>()?
            .iter()
            .any(|code| code.starts_with('0'));
        assert!(saw_leading_zero);
        Ok(())
    }

    #[test]
    fn hash_is_stable_and_collision_free_for_distinct_codes() {
        assert_eq!(hash_code("042137"), hash_code("042137"));
        assert_ne!(hash_code("042137"), hash_code("042138"));
    }

    #[test]
    fn hashes_match_compares_correctly() {
        let a = hash_code("123456");
        let b = hash_code("123456");
        let c = hash_code("654321");
        assert!(hashes_match(&a, &b));
        assert!(!hashes_match(&a, &c));
        assert!(!hashes_match(&a, &a[..16]));
    }
}
