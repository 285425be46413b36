//! PKCE (RFC 7636, S256) and anti-forgery state values.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A verifier/challenge pair plus the `state` value for one sign-in attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    /// Secret kept until the code exchange.
    pub verifier: String,
    /// `BASE64URL(SHA256(verifier))`, sent with the authorization request.
    pub challenge: String,
    /// Opaque value the provider must echo back in its callback.
    pub state: String,
}

impl PkcePair {
    /// Generate a fresh pair from 32 random bytes.
    pub fn generate() -> Self {
        let mut random = [0u8; 32];
        random[..16].copy_from_slice(Uuid::new_v4().as_bytes());
        random[16..].copy_from_slice(Uuid::new_v4().as_bytes());
        let verifier = URL_SAFE_NO_PAD.encode(random);
        Self {
            challenge: challenge_for(&verifier),
            verifier,
            state: Uuid::new_v4().simple().to_string(),
        }
    }
}

/// S256 challenge for `verifier`.
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
