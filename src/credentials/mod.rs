//! Credential lifecycle: encryption at rest and legacy-plaintext migration.
//!
//! OAuth tokens are stored as opaque strings on the connection record. New
//! writes are always encrypted (`hex(nonce):hex(ciphertext‖tag)`), but rows
//! written before encryption was introduced hold the raw provider token. The
//! shape is resolved exactly once, at the storage-read boundary, into a
//! [`Secret`] so downstream code never re-inspects string structure.
//!
//! # Security
//! - AES-256-GCM with a unique nonce per encryption
//! - Master key is 32 bytes, validated at startup, held in memory only
//! - Authenticated encryption: tampering fails decryption, never returns
//!   corrupted plaintext

mod cipher;

pub use cipher::{is_encrypted, CipherError, TokenCipher};

/// A stored secret, resolved from its on-disk shape.
///
/// `Plaintext` exists only for the migration window; every write path
/// re-encrypts, so plaintext values age out as connections refresh.
#[derive(Clone, Debug, PartialEq)]
pub enum Secret {
    /// Legacy unencrypted value
    Plaintext(String),
    /// `hex(nonce):hex(ciphertext‖tag)` produced by [`TokenCipher::encrypt`]
    Encrypted(String),
}

impl Secret {
    /// Classifies a raw stored value by structural shape.
    pub fn parse(raw: &str) -> Self {
        if is_encrypted(raw) {
            Secret::Encrypted(raw.to_string())
        } else {
            Secret::Plaintext(raw.to_string())
        }
    }

    /// Returns the plaintext value, decrypting if necessary.
    pub fn reveal(&self, cipher: &TokenCipher) -> Result<String, CipherError> {
        match self {
            Secret::Plaintext(value) => Ok(value.clone()),
            Secret::Encrypted(value) => cipher.decrypt(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str =
        "0101010101010101010101010101010101010101010101010101010101010101";

    #[test]
    fn test_parse_resolves_shape_once() {
        let cipher = TokenCipher::new(TEST_KEY).unwrap();
        let encrypted = cipher.encrypt("token-value").unwrap();

        assert_eq!(Secret::parse(&encrypted), Secret::Encrypted(encrypted));
        assert_eq!(
            Secret::parse("ya29.legacy-token"),
            Secret::Plaintext("ya29.legacy-token".to_string())
        );
    }

    #[test]
    fn test_reveal_plaintext_passthrough() {
        let cipher = TokenCipher::new(TEST_KEY).unwrap();
        let secret = Secret::parse("legacy-plaintext-token");
        assert_eq!(secret.reveal(&cipher).unwrap(), "legacy-plaintext-token");
    }

    #[test]
    fn test_reveal_decrypts() {
        let cipher = TokenCipher::new(TEST_KEY).unwrap();
        let encrypted = cipher.encrypt("fresh-token").unwrap();
        let secret = Secret::parse(&encrypted);
        assert_eq!(secret.reveal(&cipher).unwrap(), "fresh-token");
    }

    #[test]
    fn test_reveal_surfaces_authentication_failure() {
        let cipher = TokenCipher::new(TEST_KEY).unwrap();
        let other = TokenCipher::new(
            "0202020202020202020202020202020202020202020202020202020202020202",
        )
        .unwrap();

        let encrypted = other.encrypt("token").unwrap();
        let secret = Secret::parse(&encrypted);
        assert_eq!(secret.reveal(&cipher), Err(CipherError::Authentication));
    }
}
