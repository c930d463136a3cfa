//! Adaptive one-way password hashing.
//!
//! Passwords are Argon2id-hashed with a fresh salt per call; the output is a
//! PHC string carrying algorithm, salt, and cost, so verification needs no
//! side channel. Verification is constant-time and never raises on malformed
//! hashes.

use anyhow::anyhow;
use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use rand::rngs::OsRng;

use crate::error::AuthError;

/// Placeholder input for [`dummy_hash`]. Only ever verified against, never
/// accepted as a credential.
const DUMMY_PASSWORD: &str = "sentinela-dummy-credential";

/// Hash a plaintext password with Argon2id and a fresh salt.
///
/// # Errors
/// `ValidationError` when the plaintext is shorter than `min_length`;
/// `Dependency` when the hasher itself fails.
pub fn hash_password(plaintext: &str, min_length: usize) -> Result<String, AuthError> {
    if plaintext.chars().count() < min_length {
        return Err(AuthError::validation(format!(
            "password must be at least {min_length} characters"
        )));
    }
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map_err(|_| AuthError::Dependency(anyhow!("failed to hash password")))?
        .to_string();
    Ok(hash)
}

/// Verify a plaintext against a stored PHC hash.
///
/// Returns `false` for malformed hashes or mismatched input of any length.
#[must_use]
pub fn verify_password(plaintext: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .is_ok()
}

/// Check character-class requirements before hashing at registration and
/// password change: one uppercase, one lowercase, one digit.
pub fn validate_complexity(plaintext: &str) -> Result<(), AuthError> {
    let has_upper = plaintext.chars().any(|ch| ch.is_ascii_uppercase());
    let has_lower = plaintext.chars().any(|ch| ch.is_ascii_lowercase());
    let has_digit = plaintext.chars().any(|ch| ch.is_ascii_digit());
    if has_upper && has_lower && has_digit {
        Ok(())
    } else {
        Err(AuthError::validation(
            "password must contain an uppercase letter, a lowercase letter, and a digit",
        ))
    }
}

/// A real hash of a fixed placeholder, verified against when a login names an
/// unknown email so response timing stays uniform with the found-user path.
pub fn dummy_hash() -> Result<String, AuthError> {
    hash_password(DUMMY_PASSWORD, 1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{dummy_hash, hash_password, validate_complexity, verify_password};
    use crate::error::AuthError;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("Str0ngPass!23", 8).unwrap();
        assert!(verify_password("Str0ngPass!23", &hash));
        assert!(!verify_password("WrongPass!23", &hash));
    }

    #[test]
    fn hash_embeds_fresh_salt_per_call() {
        let first = hash_password("Str0ngPass!23", 8).unwrap();
        let second = hash_password("Str0ngPass!23", 8).unwrap();
        assert_ne!(first, second);
        assert!(verify_password("Str0ngPass!23", &first));
        assert!(verify_password("Str0ngPass!23", &second));
    }

    #[test]
    fn hash_never_equals_plaintext() {
        let hash = hash_password("Str0ngPass!23", 8).unwrap();
        assert_ne!(hash, "Str0ngPass!23");
        assert!(hash.starts_with("$argon2id$"));
    }

    #[test]
    fn short_password_rejected_before_hashing() {
        let result = hash_password("Ab1", 8);
        assert!(matches!(result, Err(AuthError::Validation(_))));
    }

    #[test]
    fn verify_returns_false_on_malformed_hash() {
        assert!(!verify_password("anything", "not-a-phc-string"));
        assert!(!verify_password("anything", ""));
    }

    #[test]
    fn complexity_requires_three_classes() {
        assert!(validate_complexity("Str0ngPass").is_ok());
        assert!(validate_complexity("alllowercase1").is_err());
        assert!(validate_complexity("ALLUPPERCASE1").is_err());
        assert!(validate_complexity("NoDigitsHere").is_err());
    }

    #[test]
    fn dummy_hash_verifies_like_a_real_one() {
        let hash = dummy_hash().unwrap();
        assert!(!verify_password("anything-else", &hash));
    }
}
