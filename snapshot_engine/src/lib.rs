// SPDX-License-Identifier: MIT OR Apache-2.0
//! Snapshot and rollback engine for the secret tree.
//!
//! Snapshots are intentionally shallow: one folder level per capture, one
//! junction row per live secret/child-folder version. Eager whole-subtree
//! capture would cost O(depth x fanout) on every edit; shallow capture keeps
//! edits O(1) relative to tree size and defers the recursive work to
//! rollback, which is rare.
//!
//! Rollback reconstructs a subtree from nested snapshots and applies it as a
//! new forward-moving mutation; history is never rewritten.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

mod capture;
mod retention;
mod rollback;

pub use capture::{
    capture, list_snapshots, perform_snapshot, perform_snapshot_in, snapshot_contents,
    snapshot_count, SnapshotContents, SnapshotFolder, SnapshotSecret,
};
pub use retention::{RetentionManager, RetentionStats};
pub use rollback::rollback;

use secret_store::StoreError;

/// Error types for snapshot operations.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SnapshotError>;
