// SPDX-License-Identifier: MIT OR Apache-2.0
//! Envelope encryption: per-record data keys wrapped by the project key.
//!
//! Each record is encrypted under a fresh random data key; only the wrapped
//! data key is stored with the ciphertext. Rotating the project key then
//! means re-wrapping data keys, not re-encrypting every record.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{
    key::{ProjectKey, KEY_SIZE},
    CipherError, EncryptedBlob, Result, SecretCipher, NONCE_SIZE,
};

/// Wire layout of `wrapped_key`: wrap nonce || wrapped data key.
const WRAPPED_LEN: usize = NONCE_SIZE + KEY_SIZE + TAG_SIZE;
/// AES-GCM authentication tag size.
const TAG_SIZE: usize = 16;

pub struct EnvelopeCipher {
    kek: Zeroizing<[u8; KEY_SIZE]>,
}

impl EnvelopeCipher {
    pub fn new(project_key: &ProjectKey) -> Self {
        Self {
            kek: Zeroizing::new(*project_key.as_bytes()),
        }
    }

    fn wrap(&self, data_key: &[u8; KEY_SIZE]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&*self.kek)
            .map_err(|e| CipherError::Encrypt(format!("invalid key: {e}")))?;

        let mut wrap_nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut wrap_nonce);

        let wrapped = cipher
            .encrypt(Nonce::from_slice(&wrap_nonce), data_key.as_slice())
            .map_err(|e| CipherError::Encrypt(format!("key wrap failed: {e}")))?;

        let mut out = Vec::with_capacity(WRAPPED_LEN);
        out.extend_from_slice(&wrap_nonce);
        out.extend(wrapped);
        Ok(out)
    }

    fn unwrap(&self, wrapped: &[u8]) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        if wrapped.len() != WRAPPED_LEN {
            return Err(CipherError::Malformed(format!(
                "wrapped key length {} (expected {WRAPPED_LEN})",
                wrapped.len()
            )));
        }

        let (wrap_nonce, wrapped_key) = wrapped.split_at(NONCE_SIZE);
        let cipher = Aes256Gcm::new_from_slice(&*self.kek)
            .map_err(|e| CipherError::Decrypt(format!("invalid key: {e}")))?;

        let data_key = cipher
            .decrypt(Nonce::from_slice(wrap_nonce), wrapped_key)
            .map_err(|e| CipherError::Decrypt(format!("key unwrap failed: {e}")))?;

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(&data_key);
        Ok(key)
    }
}

impl SecretCipher for EnvelopeCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob> {
        let mut data_key = Zeroizing::new([0u8; KEY_SIZE]);
        rand::thread_rng().fill_bytes(&mut *data_key);

        let cipher = Aes256Gcm::new_from_slice(&*data_key)
            .map_err(|e| CipherError::Encrypt(format!("invalid data key: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| CipherError::Encrypt(e.to_string()))?;

        Ok(EncryptedBlob {
            ciphertext,
            nonce: nonce_bytes,
            wrapped_key: self.wrap(&data_key)?,
        })
    }

    fn decrypt(&self, blob: &EncryptedBlob) -> Result<Vec<u8>> {
        let data_key = self.unwrap(&blob.wrapped_key)?;

        let cipher = Aes256Gcm::new_from_slice(&*data_key)
            .map_err(|e| CipherError::Decrypt(format!("invalid data key: {e}")))?;

        cipher
            .decrypt(Nonce::from_slice(&blob.nonce), blob.ciphertext.as_slice())
            .map_err(|e| CipherError::Decrypt(e.to_string()))
    }
}
