use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    rand::RngCore,
    sha2::{Digest, Sha256},
};

use crate::types::PkceChallenge;

/// Number of random bytes behind a PKCE verifier.
pub const VERIFIER_BYTES: usize = 32;

/// Generate a PKCE verifier (32 random bytes, base64url without padding) and
/// its S256 challenge.
pub fn generate_pkce() -> PkceChallenge {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = challenge_for(&verifier);
    PkceChallenge {
        verifier,
        challenge,
    }
}

/// S256 challenge for an existing verifier.
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Opaque anti-CSRF state value.
pub fn generate_state() -> String {
    uuid::Uuid::new_v4().to_string()
}
