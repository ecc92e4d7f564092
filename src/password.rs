//! Local credential material for remotely authenticated identities.
//! Synced users get an argon2 hash of a discarded random secret, so the
//! record can never authenticate through a local password check.

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use base64::Engine;
use password_hash::{PasswordHash, SaltString};

use crate::error::StoreError;

/// 512-bit random secret, base64url without padding.
pub fn random_secret() -> Result<String, StoreError> {
    let mut buf = [0u8; 64];
    getrandom::getrandom(&mut buf).map_err(|e| StoreError::Password(e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

pub fn hash_password(password: &str) -> Result<String, StoreError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| StoreError::Password(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| StoreError::Password(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| StoreError::Password(e.to_string()))?
        .to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else {
        false
    }
}

/// A hash no presented credential can match: the secret is generated, hashed
/// and immediately dropped.
pub fn unusable_password() -> Result<String, StoreError> {
    hash_password(&random_secret()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let phc = hash_password("s3cr3t!").unwrap();
        assert!(phc.starts_with("$argon2"));
        assert!(verify_password(&phc, "s3cr3t!"));
        assert!(!verify_password(&phc, "wrong"));
    }

    #[test]
    fn unusable_password_rejects_guesses() {
        let phc = unusable_password().unwrap();
        assert!(!verify_password(&phc, ""));
        assert!(!verify_password(&phc, "password"));
        // Fresh secret and salt every call
        assert_ne!(phc, unusable_password().unwrap());
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("not-a-phc-string", "anything"));
    }
}
