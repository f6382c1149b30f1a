//! Credential vault: symmetric encryption of stored account passwords.
//!
//! AES-256-GCM keyed by Argon2id over an operator passphrase. Tokens are
//! base64 of `nonce || ciphertext`, so every encryption of the same password
//! yields a different token.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE as BASE64;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::error::VaultError;

/// Environment variable holding the vault passphrase.
pub const KEY_ENV: &str = "MAIL_BRIDGE_KEY";

/// Passphrase used when `MAIL_BRIDGE_KEY` is unset.
const FALLBACK_PASSPHRASE: &str = "mail-bridge-default-key";

/// Fixed application salt; the passphrase is the only secret input.
const APP_SALT: &[u8] = b"mail-bridge.vault.salt.v1";

/// AES-GCM nonce size (96 bits).
const NONCE_SIZE: usize = 12;

/// Encrypts and decrypts account passwords.
///
/// The key is derived once at construction; build one vault per process and
/// share it.
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    /// Derive the key from `passphrase`.
    pub fn new(passphrase: &SecretString) -> Result<Self, VaultError> {
        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(passphrase.expose_secret().as_bytes(), APP_SALT, &mut key)
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
        let cipher = Aes256Gcm::new(&key.into());
        debug!("Credential vault initialized");
        Ok(Self { cipher })
    }

    /// Passphrase from `MAIL_BRIDGE_KEY`, or the built-in fallback.
    pub fn from_env() -> Result<Self, VaultError> {
        let passphrase = match std::env::var(KEY_ENV) {
            Ok(key) if !key.is_empty() => SecretString::from(key),
            _ => {
                tracing::warn!("{KEY_ENV} not set, using the built-in vault passphrase");
                SecretString::from(FALLBACK_PASSPHRASE)
            }
        };
        Self::new(&passphrase)
    }

    /// Encrypt a password into an opaque token.
    pub fn encrypt(&self, plaintext: &SecretString) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.expose_secret().as_bytes())
            .map_err(|_| VaultError::Encryption)?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(&combined))
    }

    /// Decrypt a token produced by [`Vault::encrypt`].
    pub fn decrypt(&self, token: &str) -> Result<SecretString, VaultError> {
        let combined = BASE64
            .decode(token.trim())
            .map_err(|e| VaultError::InvalidFormat(format!("invalid base64: {e}")))?;

        if combined.len() <= NONCE_SIZE {
            return Err(VaultError::InvalidFormat(format!(
                "token too short: {} bytes",
                combined.len()
            )));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| VaultError::Decryption)?;

        String::from_utf8(plaintext)
            .map(SecretString::from)
            .map_err(|_| VaultError::Decryption)
    }

    /// Decrypt, treating any failure as "no credential".
    pub fn decrypt_or_empty(&self, token: &str, account: &str) -> Option<SecretString> {
        match self.decrypt(token) {
            Ok(secret) => Some(secret),
            Err(e) => {
                tracing::error!(account = %account, "Failed to decrypt password: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault(passphrase: &str) -> Vault {
        Vault::new(&SecretString::from(passphrase)).unwrap()
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let v = vault("test-key");
        let token = v.encrypt(&SecretString::from("my-secret-password")).unwrap();
        assert_ne!(token, "my-secret-password");
        assert_eq!(v.decrypt(&token).unwrap().expose_secret(), "my-secret-password");
    }

    #[test]
    fn same_plaintext_yields_different_tokens() {
        let v = vault("test-key");
        let a = v.encrypt(&SecretString::from("same")).unwrap();
        let b = v.encrypt(&SecretString::from("same")).unwrap();
        assert_ne!(a, b);
        assert_eq!(v.decrypt(&a).unwrap().expose_secret(), "same");
        assert_eq!(v.decrypt(&b).unwrap().expose_secret(), "same");
    }

    #[test]
    fn special_characters_survive() {
        let v = vault("test-key");
        let original = "pässwörd!@#$%^&*()_+-=[]{}|;:',.<>?/~`";
        let token = v.encrypt(&SecretString::from(original)).unwrap();
        assert_eq!(v.decrypt(&token).unwrap().expose_secret(), original);
    }

    #[test]
    fn wrong_passphrase_fails_to_decrypt() {
        let token = vault("key-one").encrypt(&SecretString::from("pw")).unwrap();
        let err = vault("key-two").decrypt(&token).unwrap_err();
        assert!(matches!(err, VaultError::Decryption));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let v = vault("test-key");
        assert!(matches!(v.decrypt("not base64!@#"), Err(VaultError::InvalidFormat(_))));
        assert!(matches!(
            v.decrypt(&BASE64.encode(b"short")),
            Err(VaultError::InvalidFormat(_))
        ));
        assert!(matches!(
            v.decrypt(&BASE64.encode([0u8; 32])),
            Err(VaultError::Decryption)
        ));
    }

    #[test]
    fn decrypt_or_empty_swallows_failures() {
        let v = vault("test-key");
        assert!(v.decrypt_or_empty("garbage", "work").is_none());
    }
}
