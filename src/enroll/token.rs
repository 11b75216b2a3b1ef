//! Signed temp token carrying session identity and progress between steps.
//!
//! The token substitutes for server-side session pinning: each step response
//! mints a fresh token embedding the session id, the step the session rests
//! at, and the session version. Verification is pure (key + token bytes, no
//! I/O). Format: `v1.<claims-b64url>.<hmac-sha256-b64url>`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use super::models::Step;

const TOKEN_PREFIX: &str = "v1";
const MIN_KEY_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Bad structure, encoding, or signature. The client restarts from step 1.
    #[error("malformed token")]
    Malformed,
    /// Structurally valid but past its embedded expiry.
    #[error("token expired")]
    Expired,
}

/// Claims recovered from a valid token.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepClaims {
    /// Session id.
    pub sid: Uuid,
    /// Step the session rested at when the token was minted.
    pub stp: Step,
    /// Session version at mint time; must match the live session on use.
    pub ver: i64,
    pub iat: i64,
    /// Absolute expiry anchored at session creation, never sliding.
    pub exp: i64,
}

/// Mints and verifies step tokens with a server-held HMAC key.
pub struct StepTokenCodec {
    key: Vec<u8>,
}

impl std::fmt::Debug for StepTokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepTokenCodec").field("key", &"***").finish()
    }
}

impl StepTokenCodec {
    /// Build a codec from the configured signing key.
    ///
    /// The key is accepted as base64url or raw text and must decode to at
    /// least 32 bytes.
    ///
    /// # Errors
    /// Returns an error if the key material is too short.
    pub fn new(secret: &SecretString) -> anyhow::Result<Self> {
        let raw = secret.expose_secret();
        // Prefer the base64url reading when it yields enough material;
        // otherwise treat the value as raw key bytes.
        let key = URL_SAFE_NO_PAD
            .decode(raw.as_bytes())
            .ok()
            .filter(|bytes| bytes.len() >= MIN_KEY_BYTES)
            .unwrap_or_else(|| raw.as_bytes().to_vec());
        if key.len() < MIN_KEY_BYTES {
            anyhow::bail!("signing key must be at least {MIN_KEY_BYTES} bytes");
        }
        Ok(Self { key })
    }

    /// Mint a token for a session resting at `step` with `version`.
    ///
    /// # Errors
    /// Returns `TokenError::Malformed` only if claim serialization fails,
    /// which would indicate a bug rather than bad input.
    pub fn mint(
        &self,
        session_id: Uuid,
        step: Step,
        version: i64,
        now_unix: i64,
        expires_at_unix: i64,
    ) -> Result<String, TokenError> {
        let claims = StepClaims {
            sid: session_id,
            stp: step,
            ver: version,
            iat: now_unix,
            exp: expires_at_unix,
        };
        let payload = serde_json::to_vec(&claims).map_err(|_| TokenError::Malformed)?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload);
        let signing_input = format!("{TOKEN_PREFIX}.{payload_b64}");
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|_| TokenError::Malformed)?;
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_b64 = URL_SAFE_NO_PAD.encode(signature);
        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Verify a token and recover its claims.
    ///
    /// # Errors
    /// `Malformed` for any structural or signature defect, `Expired` when the
    /// embedded expiry has passed or the issue time lies in the future.
    pub fn decode(&self, token: &str, now_unix: i64) -> Result<StepClaims, TokenError> {
        let token = token.trim();
        let mut parts = token.split('.');
        let prefix = parts.next().ok_or(TokenError::Malformed)?;
        let payload_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let signature_b64 = parts.next().ok_or(TokenError::Malformed)?;
        if prefix != TOKEN_PREFIX || parts.next().is_some() {
            return Err(TokenError::Malformed);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64.as_bytes())
            .map_err(|_| TokenError::Malformed)?;
        let signing_input = format!("{prefix}.{payload_b64}");
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|_| TokenError::Malformed)?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::Malformed)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64.as_bytes())
            .map_err(|_| TokenError::Malformed)?;
        let claims: StepClaims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;

        if claims.iat > now_unix {
            return Err(TokenError::Malformed);
        }
        if claims.exp <= now_unix {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}
