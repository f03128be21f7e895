// SPDX-License-Identifier: MIT OR Apache-2.0
//! Blind indexes for equality lookup over encrypted secret names.
//!
//! A blind index is a deterministic keyed digest of the plaintext name and a
//! per-project salt: the store can answer "does a secret named X exist in
//! folder F" by ciphertext equality without decrypting sibling names. The
//! construction is HMAC over BLAKE2b-256 with domain separation, so indexes
//! from different projects never collide by construction.

use blake2::{digest::consts::U32, Blake2b, Digest};

use crate::key::SALT_SIZE;

/// Domain tag mixed into every index.
const DOMAIN: &[u8] = b"secret_name_index_v1";

/// Derives blind indexes for one project's salt.
pub struct BlindIndexer {
    salt: [u8; SALT_SIZE],
}

impl BlindIndexer {
    pub fn new(salt: [u8; SALT_SIZE]) -> Self {
        Self { salt }
    }

    /// Derive the blind index for a secret name.
    ///
    /// Deterministic: same (name, salt) always yields the same index.
    pub fn index(&self, name: &str) -> String {
        let hash = self.hmac_hash(name.as_bytes());
        hex::encode(&hash[..16])
    }

    /// HMAC construction using BLAKE2b-256.
    fn hmac_hash(&self, data: &[u8]) -> [u8; 32] {
        let mut inner_key = [0u8; SALT_SIZE];
        for (i, byte) in inner_key.iter_mut().enumerate() {
            *byte = self.salt[i] ^ 0x36; // ipad
        }

        let mut inner = Blake2b::<U32>::new();
        inner.update(inner_key);
        inner.update(DOMAIN);
        inner.update(data);
        let inner_hash = inner.finalize();

        let mut outer_key = [0u8; SALT_SIZE];
        for (i, byte) in outer_key.iter_mut().enumerate() {
            *byte = self.salt[i] ^ 0x5c; // opad
        }

        let mut outer = Blake2b::<U32>::new();
        outer.update(outer_key);
        outer.update(inner_hash);
        outer.finalize().into()
    }
}

mod hex {
    pub fn encode(data: &[u8]) -> String {
        data.iter().map(|b| format!("{b:02x}")).collect()
    }
}
