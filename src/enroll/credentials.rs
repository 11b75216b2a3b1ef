//! Capability seams for password hashing and access-credential issuance.
//!
//! Both are collaborators of the pipeline rather than part of it: the flow
//! only needs `hash`/`verify` and `issue` contracts, so deployments can swap
//! the scheme without touching the state machine.

use anyhow::{anyhow, Context, Result};
use argon2::password_hash::rand_core::OsRng as SaltRng;
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher as _, PasswordVerifier as _};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Hash/verify capability for step-1 password intake.
///
/// Drafts never hold plaintext: the hash is computed when step 1 is accepted
/// and rides in the session's collected data until finalization.
pub trait PasswordHasher: Send + Sync {
    /// Hash a plaintext password for storage.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    fn hash(&self, password: &str) -> Result<String>;

    /// Check a plaintext password against a stored hash.
    ///
    /// # Errors
    /// Returns an error if the stored hash cannot be parsed.
    fn verify(&self, password: &str, hash: &str) -> Result<bool>;
}

/// Argon2id-backed hasher with library defaults.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArgonPasswordHasher;

impl PasswordHasher for ArgonPasswordHasher {
    fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut SaltRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| anyhow!("failed to hash password: {err}"))?;
        Ok(hash.to_string())
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed =
            PasswordHash::new(hash).map_err(|err| anyhow!("invalid password hash: {err}"))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}

/// A freshly issued access credential. The raw token goes to the client
/// exactly once; only the hash is persisted with the account.
#[derive(Clone, Debug)]
pub struct IssuedCredential {
    pub token: String,
    pub token_hash: Vec<u8>,
}

/// Issues the access credential handed out when finalization succeeds.
pub trait CredentialIssuer: Send + Sync {
    /// Mint a credential for a new account.
    ///
    /// # Errors
    /// Returns an error if token material cannot be generated.
    fn issue(&self) -> Result<IssuedCredential>;
}

/// Local issuer: a random 32-byte URL-safe bearer token.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalCredentialIssuer;

impl CredentialIssuer for LocalCredentialIssuer {
    fn issue(&self) -> Result<IssuedCredential> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate access token")?;
        let token = URL_SAFE_NO_PAD.encode(bytes);
        let token_hash = hash_access_token(&token);
        Ok(IssuedCredential { token, token_hash })
    }
}

/// Hash an access token so raw values never touch the database.
#[must_use]
pub fn hash_access_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}
