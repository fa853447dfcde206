//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! A fresh verifier/challenge pair is generated for every login attempt. The
//! challenge goes into the authorization URL; the verifier stays in memory and
//! is sent with the token exchange, then dropped (and zeroized).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::constants::CODE_CHALLENGE_METHOD;

/// Random bytes behind a verifier. 96 bytes encode to exactly 128 base64url
/// characters, the RFC 7636 maximum.
const VERIFIER_BYTES: usize = 96;

/// Random bytes behind a state token.
const STATE_BYTES: usize = 32;

/// Verifier and derived S256 challenge for one login attempt.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    verifier: Secret<String>,
    challenge: String,
}

impl PkceChallenge {
    /// Generate a new pair from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; VERIFIER_BYTES];
        rand::rng().fill(&mut bytes);
        Self::from_verifier(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Build a pair around an existing verifier.
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = compute_challenge(&verifier);
        Self {
            verifier: Secret::new(verifier),
            challenge,
        }
    }

    pub fn verifier(&self) -> &str {
        self.verifier.expose()
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    pub fn method(&self) -> &'static str {
        CODE_CHALLENGE_METHOD
    }
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate an unguessable `state` value binding a redirect to its request.
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
