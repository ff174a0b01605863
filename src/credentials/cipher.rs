//! AES-256-GCM cipher for OAuth tokens at rest.
//!
//! Every secret is encrypted with a fresh random nonce. The stored form is
//! `hex(nonce) + ":" + hex(ciphertext‖tag)`, which keeps the column a plain
//! ASCII string while remaining structurally distinguishable from legacy
//! plaintext tokens.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Minimum hex length of the ciphertext segment (16-byte GCM tag alone)
const MIN_CIPHERTEXT_HEX: usize = 32;

/// Errors produced when reading a stored secret back.
#[derive(Debug, PartialEq, Clone)]
pub enum CipherError {
    /// Value does not have the `nonce:ciphertext` two-segment hex shape
    InvalidFormat(String),
    /// AEAD tag verification failed (tampered data or wrong key)
    Authentication,
}

impl std::fmt::Display for CipherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CipherError::InvalidFormat(detail) => {
                write!(f, "Malformed encrypted secret: {}", detail)
            }
            CipherError::Authentication => {
                write!(f, "Secret failed authentication (tampered data or wrong key)")
            }
        }
    }
}

impl std::error::Error for CipherError {}

/// Symmetric cipher for secrets at rest, keyed once at startup.
///
/// The key is process-wide configuration. Constructing the cipher validates
/// the key length so a misconfigured deployment fails before any token is
/// accepted, rather than on the first encrypt call.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Creates a cipher from a 64-hex-character key (32 bytes decoded).
    ///
    /// # Errors
    /// Any other key shape is a fatal configuration error, not a runtime one.
    pub fn new(key_hex: &str) -> Result<Self> {
        let key_bytes = hex::decode(key_hex.trim())
            .context("Encryption key is not valid hex")?;

        if key_bytes.len() != KEY_SIZE {
            return Err(anyhow!(
                "Encryption key must be {} bytes ({} hex chars), got {} bytes",
                KEY_SIZE,
                KEY_SIZE * 2,
                key_bytes.len()
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| anyhow!("Failed to initialize cipher: {}", e))?;

        Ok(Self { cipher })
    }

    /// Encrypts a secret, producing the `hex(nonce):hex(ciphertext‖tag)` form.
    ///
    /// A new random nonce is generated on every call; re-encrypting the same
    /// plaintext never yields the same output.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok(format!("{}:{}", hex::encode(nonce), hex::encode(ciphertext)))
    }

    /// Decrypts a stored secret.
    ///
    /// # Errors
    /// * `CipherError::InvalidFormat` - value is not two hex segments
    /// * `CipherError::Authentication` - tag mismatch; the secret is unusable
    ///   and the owning connection must be re-authenticated
    pub fn decrypt(&self, value: &str) -> Result<String, CipherError> {
        let parts: Vec<&str> = value.split(':').collect();
        if parts.len() != 2 {
            return Err(CipherError::InvalidFormat(format!(
                "expected 2 colon-separated segments, got {}",
                parts.len()
            )));
        }

        let nonce_bytes = hex::decode(parts[0])
            .map_err(|_| CipherError::InvalidFormat("nonce segment is not hex".to_string()))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CipherError::InvalidFormat(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            )));
        }

        let ciphertext = hex::decode(parts[1])
            .map_err(|_| CipherError::InvalidFormat("ciphertext segment is not hex".to_string()))?;

        let nonce = Nonce::from_slice(&nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| CipherError::Authentication)?;

        String::from_utf8(plaintext)
            .map_err(|_| CipherError::InvalidFormat("decrypted bytes are not UTF-8".to_string()))
    }
}

/// Structural check for the encrypted-secret shape.
///
/// Returns true only for `<24-hex-nonce>:<hex-ciphertext>` with the ciphertext
/// segment at least 32 hex chars. Exists solely to bridge a migration window
/// where some stored secrets are legacy plaintext; it verifies shape, never
/// authenticity, and must not be used as a security boundary.
pub fn is_encrypted(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }

    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != 2 {
        return false;
    }

    let is_hex = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit());

    parts[0].len() == NONCE_SIZE * 2
        && is_hex(parts[0])
        && parts[1].len() >= MIN_CIPHERTEXT_HEX
        && is_hex(parts[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str =
        "0000000000000000000000000000000000000000000000000000000000000000";

    fn test_cipher() -> TokenCipher {
        TokenCipher::new(TEST_KEY).expect("test key should be valid")
    }

    #[test]
    fn test_key_validation() {
        // Valid 64-hex-char key
        assert!(TokenCipher::new(TEST_KEY).is_ok());

        // Too short (16 bytes)
        assert!(TokenCipher::new(&"ab".repeat(16)).is_err());

        // Too long (64 bytes)
        assert!(TokenCipher::new(&"ab".repeat(64)).is_err());

        // Not hex at all
        assert!(TokenCipher::new("not-a-hex-key!@#$").is_err());

        // Empty
        assert!(TokenCipher::new("").is_err());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher();
        let plaintext = "ya29.a0AfH6SMBx-access-token";

        let encrypted = cipher.encrypt(plaintext).expect("Encryption failed");
        assert_ne!(encrypted, plaintext);

        let decrypted = cipher.decrypt(&encrypted).expect("Decryption failed");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_output_shape() {
        let cipher = test_cipher();
        let encrypted = cipher.encrypt("secret").unwrap();

        let parts: Vec<&str> = encrypted.split(':').collect();
        assert_eq!(parts.len(), 2);
        // 12-byte nonce = 24 hex chars
        assert_eq!(parts[0].len(), 24);
        // ciphertext carries at least the 16-byte tag
        assert!(parts[1].len() >= 32);
        assert!(is_encrypted(&encrypted));
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let cipher = test_cipher();
        let plaintext = "same-plaintext";

        let first = cipher.encrypt(plaintext).unwrap();
        let second = cipher.encrypt(plaintext).unwrap();

        // Random nonces make the whole output differ
        assert_ne!(first, second);

        assert_eq!(cipher.decrypt(&first).unwrap(), plaintext);
        assert_eq!(cipher.decrypt(&second).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let cipher = test_cipher();
        let other = TokenCipher::new(
            "1111111111111111111111111111111111111111111111111111111111111111",
        )
        .unwrap();

        let encrypted = cipher.encrypt("secret").unwrap();
        assert_eq!(other.decrypt(&encrypted), Err(CipherError::Authentication));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = test_cipher();
        let encrypted = cipher.encrypt("secret").unwrap();

        let (nonce_hex, ct_hex) = encrypted.split_once(':').unwrap();

        // Flip one nibble of the ciphertext segment
        let mut chars: Vec<char> = ct_hex.chars().collect();
        chars[0] = if chars[0] == '0' { '1' } else { '0' };
        let tampered: String = chars.into_iter().collect();

        let result = cipher.decrypt(&format!("{}:{}", nonce_hex, tampered));
        assert_eq!(result, Err(CipherError::Authentication));
    }

    #[test]
    fn test_tampered_nonce_fails() {
        let cipher = test_cipher();
        let encrypted = cipher.encrypt("secret").unwrap();

        let (nonce_hex, ct_hex) = encrypted.split_once(':').unwrap();
        let mut chars: Vec<char> = nonce_hex.chars().collect();
        chars[0] = if chars[0] == '0' { '1' } else { '0' };
        let tampered: String = chars.into_iter().collect();

        let result = cipher.decrypt(&format!("{}:{}", tampered, ct_hex));
        assert_eq!(result, Err(CipherError::Authentication));
    }

    #[test]
    fn test_malformed_value_is_format_error() {
        let cipher = test_cipher();

        // No colon
        assert!(matches!(
            cipher.decrypt("deadbeef"),
            Err(CipherError::InvalidFormat(_))
        ));

        // Too many segments
        assert!(matches!(
            cipher.decrypt("aa:bb:cc"),
            Err(CipherError::InvalidFormat(_))
        ));

        // Non-hex segments
        assert!(matches!(
            cipher.decrypt("zzzz:yyyy"),
            Err(CipherError::InvalidFormat(_))
        ));

        // Wrong nonce length
        assert!(matches!(
            cipher.decrypt(&format!("{}:{}", "ab".repeat(4), "cd".repeat(20))),
            Err(CipherError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_is_encrypted_predicate() {
        let cipher = test_cipher();

        // Real encrypted output matches
        assert!(is_encrypted(&cipher.encrypt("token").unwrap()));

        // Legacy plaintext tokens do not
        assert!(!is_encrypted("ya29.a0AfH6SMBx1234567890abcdef"));
        assert!(!is_encrypted("plain-text-token"));
        assert!(!is_encrypted(""));

        // Colon but wrong segment shapes
        assert!(!is_encrypted("abc:def"));
        assert!(!is_encrypted(&format!("{}:{}", "a".repeat(24), "b".repeat(10))));
        assert!(!is_encrypted(&format!("{}:{}", "g".repeat(24), "b".repeat(40))));
        assert!(!is_encrypted(&format!("{}:{}", "a".repeat(23), "b".repeat(40))));

        // Two colons
        assert!(!is_encrypted(&format!(
            "{}:{}:{}",
            "a".repeat(24),
            "b".repeat(40),
            "c"
        )));

        // Exact minimum shape matches
        assert!(is_encrypted(&format!("{}:{}", "a".repeat(24), "b".repeat(32))));
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let cipher = test_cipher();
        let encrypted = cipher.encrypt("").unwrap();
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "");
    }
}
