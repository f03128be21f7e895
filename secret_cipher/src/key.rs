// SPDX-License-Identifier: MIT OR Apache-2.0
//! Project key derivation using Argon2id.

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CipherError, Result};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Blind-index salt size in bytes.
pub const SALT_SIZE: usize = 16;

/// Argon2id memory cost in KiB.
const ARGON2_MEMORY_COST: u32 = 65536;
/// Argon2id iteration count.
const ARGON2_TIME_COST: u32 = 3;
/// Argon2id lane count.
const ARGON2_PARALLELISM: u32 = 4;

/// Derived per-project encryption key (zeroized on drop).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ProjectKey {
    bytes: [u8; KEY_SIZE],
}

impl ProjectKey {
    /// Derive a project key from raw input material using Argon2id.
    pub fn derive(input: &[u8], salt: &[u8; SALT_SIZE]) -> Result<Self> {
        let params = Params::new(
            ARGON2_MEMORY_COST,
            ARGON2_TIME_COST,
            ARGON2_PARALLELISM,
            Some(KEY_SIZE),
        )
        .map_err(|e| CipherError::KeyDerivation(format!("invalid Argon2 params: {e}")))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(input, salt, &mut key)
            .map_err(|e| CipherError::KeyDerivation(format!("Argon2 failed: {e}")))?;

        Ok(Self { bytes: key })
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}
