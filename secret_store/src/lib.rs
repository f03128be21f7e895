// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transactional versioned secret/folder store.
//!
//! Storage substrate for the secret tree:
//! - Hierarchical folders per environment, one root each
//! - Encrypted key/value secrets addressed by blind index
//! - Append-only version rows on every mutation
//! - Copy-swap transactions behind a single lock
//!
//! The change-request and snapshot engines build on the table types and
//! queries exposed here; nothing in this crate enforces review policy.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

mod crypto;
mod db;
mod folders;
mod model;
mod projects;
mod secrets;
mod tree;

pub use crypto::ProjectCrypto;
pub use db::{new_id, now_epoch_secs, SecretDb, Tables};
pub use model::{
    CommitOp, CommitRow, Conflict, EnforcementLevel, EnvironmentRow, FolderRow, FolderVersionRow,
    PolicyRow, ProjectRow, RequestRow, RequestState, ReviewRow, ReviewStatus, SecretKind,
    SecretRow, SecretVersionRow, SnapshotFolderRow, SnapshotRow, SnapshotSecretRow,
};
pub use projects::ProjectConfig;
pub use secrets::{insert_secret, SecretDraft, SecretPatch, SecretView};
pub use tree::{FolderNode, FolderTree};

use secret_cipher::CipherError;

/// Error types for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("blind-index salt record missing for project {0}")]
    MissingBlindIndexSalt(String),

    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
