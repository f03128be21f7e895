// SPDX-License-Identifier: MIT OR Apache-2.0
//! Encryption and blind-index primitives for the secret tree.
//!
//! Two encryption schemes coexist behind one seam:
//! - Legacy per-field AES-256-GCM under the project key
//! - Envelope encryption with a per-record data key wrapped by the project key
//!
//! Secret names are never stored in plaintext; equality lookups go through a
//! deterministic keyed blind index derived from the name and a per-project
//! salt.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

mod blind_index;
mod envelope;
mod key;
mod legacy;

use serde::{Deserialize, Serialize};

pub use blind_index::BlindIndexer;
pub use envelope::EnvelopeCipher;
pub use key::{ProjectKey, KEY_SIZE, SALT_SIZE};
pub use legacy::LegacyCipher;

/// 12-byte nonce for AES-GCM (96 bits is the standard).
pub const NONCE_SIZE: usize = 12;

/// Error types for cipher operations.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("malformed ciphertext: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, CipherError>;

/// Ciphertext container stored on secret rows and version rows.
///
/// `wrapped_key` is empty for the legacy scheme; the envelope scheme stores
/// the encrypted per-record data key there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
    pub wrapped_key: Vec<u8>,
}

/// Which encryption scheme a project uses.
///
/// Recorded on the project row; selects the `SecretCipher` implementation
/// once at the engine boundary so call sites never branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherScheme {
    /// Per-field symmetric encryption directly under the project key.
    V1Legacy,
    /// Envelope encryption: per-record data key wrapped by the project key.
    V2Envelope,
}

/// Seam over the two encryption schemes.
pub trait SecretCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob>;
    fn decrypt(&self, blob: &EncryptedBlob) -> Result<Vec<u8>>;
}

/// Build the cipher for a project's recorded scheme.
pub fn cipher_for_scheme(scheme: CipherScheme, key: &ProjectKey) -> Box<dyn SecretCipher> {
    match scheme {
        CipherScheme::V1Legacy => Box::new(LegacyCipher::new(key)),
        CipherScheme::V2Envelope => Box::new(EnvelopeCipher::new(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_selects_implementation() {
        let key = ProjectKey::from_bytes([7u8; KEY_SIZE]);

        for scheme in [CipherScheme::V1Legacy, CipherScheme::V2Envelope] {
            let cipher = cipher_for_scheme(scheme, &key);
            let blob = cipher.encrypt(b"DATABASE_URL").unwrap();
            assert_eq!(cipher.decrypt(&blob).unwrap(), b"DATABASE_URL");
        }
    }

    #[test]
    fn test_schemes_are_not_interchangeable() {
        let key = ProjectKey::from_bytes([7u8; KEY_SIZE]);
        let legacy = cipher_for_scheme(CipherScheme::V1Legacy, &key);
        let envelope = cipher_for_scheme(CipherScheme::V2Envelope, &key);

        let blob = envelope.encrypt(b"value").unwrap();
        assert!(legacy.decrypt(&blob).is_err());
    }
}
