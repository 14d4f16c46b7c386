//! Credential hashing and verification.
//!
//! Two independent credential kinds:
//! - password: bcrypt hash stored in `users.password_hash`
//! - morse code: a short dot/dash pattern compared for exact equality

use anyhow::Result;

/// bcrypt work factor for newly hashed passwords.
const BCRYPT_COST: u32 = 12;

/// Hash a plaintext password. The salt is generated per call and embedded
/// in the returned string, so equal inputs produce different hashes.
pub fn hash_password(plaintext: &str) -> Result<String> {
    Ok(bcrypt::hash(plaintext, BCRYPT_COST)?)
}

/// Verify a plaintext password against a stored bcrypt hash. Malformed
/// hashes count as a mismatch, never an error.
pub fn verify_password(plaintext: &str, stored_hash: &str) -> bool {
    bcrypt::verify(plaintext, stored_hash).unwrap_or(false)
}

/// Verify the alternate morse-code credential: both sides must be present,
/// non-empty, and exactly equal.
pub fn verify_morse(candidate: Option<&str>, stored: Option<&str>) -> bool {
    match (candidate, stored) {
        (Some(candidate), Some(stored)) => {
            !candidate.is_empty() && !stored.is_empty() && candidate == stored
        }
        _ => false,
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let hash = hash_password("hunter2!").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("hunter2!", &hash));
        assert!(!verify_password("hunter3!", &hash));
    }

    #[test]
    fn same_password_hashes_differently() {
        let h1 = hash_password("same-input").unwrap();
        let h2 = hash_password("same-input").unwrap();
        assert_ne!(h1, h2);
        assert!(verify_password("same-input", &h1));
        assert!(verify_password("same-input", &h2));
    }

    #[test]
    fn malformed_hash_is_a_mismatch() {
        assert!(!verify_password("anything", "not-a-bcrypt-hash"));
        assert!(!verify_password("anything", ""));
    }

    #[test]
    fn morse_requires_both_sides_non_empty() {
        assert!(verify_morse(Some(".-.-"), Some(".-.-")));
        assert!(!verify_morse(Some(".-.-"), Some("....")));
        assert!(!verify_morse(Some(""), Some("")));
        assert!(!verify_morse(Some(".-.-"), Some("")));
        assert!(!verify_morse(Some(".-.-"), None));
        assert!(!verify_morse(None, Some(".-.-")));
        assert!(!verify_morse(None, None));
    }
}
