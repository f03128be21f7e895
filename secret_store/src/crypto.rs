// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-project crypto context.
//!
//! Bundles the scheme-selected cipher with the blind indexer derived from
//! the project's decrypted salt. Built once per request scope; engines never
//! branch on the cipher scheme themselves.

use secret_cipher::{
    cipher_for_scheme, BlindIndexer, EncryptedBlob, ProjectKey, SecretCipher, SALT_SIZE,
};

use crate::db::SecretDb;
use crate::{Result, StoreError};

pub struct ProjectCrypto {
    pub project_id: String,
    cipher: Box<dyn SecretCipher>,
    indexer: BlindIndexer,
}

impl ProjectCrypto {
    /// Load the crypto context for a project.
    ///
    /// Fails fast with [`StoreError::MissingBlindIndexSalt`] when the salt
    /// record is absent: every name-dependent operation refuses to run
    /// rather than fall back to scanning plaintext.
    pub fn load(db: &SecretDb, project_id: &str, key: &ProjectKey) -> Result<Self> {
        let (scheme, salt_blob) = db.read(|t| {
            t.project(project_id)
                .map(|p| (p.scheme, p.blind_index_salt.clone()))
        })?;

        let cipher = cipher_for_scheme(scheme, key);
        let salt_blob =
            salt_blob.ok_or_else(|| StoreError::MissingBlindIndexSalt(project_id.to_string()))?;

        let salt_bytes = cipher.decrypt(&salt_blob)?;
        if salt_bytes.len() != SALT_SIZE {
            return Err(StoreError::Validation(format!(
                "blind-index salt has {} bytes (expected {SALT_SIZE})",
                salt_bytes.len()
            )));
        }
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&salt_bytes);

        Ok(Self {
            project_id: project_id.to_string(),
            cipher,
            indexer: BlindIndexer::new(salt),
        })
    }

    /// Blind index for a secret name.
    pub fn index(&self, name: &str) -> String {
        self.indexer.index(name)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob> {
        Ok(self.cipher.encrypt(plaintext)?)
    }

    pub fn encrypt_str(&self, plaintext: &str) -> Result<EncryptedBlob> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_str(&self, blob: &EncryptedBlob) -> Result<String> {
        let bytes = self.cipher.decrypt(blob)?;
        String::from_utf8(bytes).map_err(|e| StoreError::Validation(format!("invalid utf-8: {e}")))
    }
}
