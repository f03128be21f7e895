// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persisted row types for the secret tree.
//!
//! Version rows are append-only: one row per mutation, never updated,
//! removed only by retention pruning.

use secret_cipher::{CipherScheme, EncryptedBlob};
use serde::{Deserialize, Serialize};

/// A project owns environments, the cipher scheme, and the encrypted
/// blind-index salt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub scheme: CipherScheme,
    /// Per-project blind-index salt, encrypted at rest. A missing record
    /// fails every name-dependent operation fast; there is no
    /// plaintext-scan fallback.
    pub blind_index_salt: Option<EncryptedBlob>,
    /// Snapshots retained per folder before the retention job prunes.
    pub snapshot_retention: usize,
    /// Version rows retained per secret/folder id before pruning.
    pub version_retention: usize,
}

/// One environment per deployment stage; owns exactly one root folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentRow {
    pub id: String,
    pub project_id: String,
    pub slug: String,
    pub root_folder_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderRow {
    pub id: String,
    pub env_id: String,
    /// `None` only for the environment's single root folder.
    pub parent_id: Option<String>,
    pub name: String,
    pub version: u64,
}

/// Shared secrets are visible project-wide; a Personal secret shadows a
/// Shared one with the same blind index for its owner only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretKind {
    Shared,
    Personal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRow {
    pub id: String,
    pub folder_id: String,
    pub blind_index: String,
    pub key: EncryptedBlob,
    pub value: EncryptedBlob,
    pub comment: Option<EncryptedBlob>,
    pub kind: SecretKind,
    /// Owner of a Personal secret; `None` for Shared.
    pub user_id: Option<String>,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretVersionRow {
    pub id: String,
    pub secret_id: String,
    pub folder_id: String,
    pub blind_index: String,
    pub key: EncryptedBlob,
    pub value: EncryptedBlob,
    pub comment: Option<EncryptedBlob>,
    pub kind: SecretKind,
    pub user_id: Option<String>,
    pub version: u64,
    pub created_at: u64,
    /// Monotonic insertion order, used where timestamps can tie.
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderVersionRow {
    pub id: String,
    pub folder_id: String,
    pub env_id: String,
    pub name: String,
    pub version: u64,
    pub created_at: u64,
    pub seq: u64,
}

/// Shallow point-in-time reference to a folder's direct contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub id: String,
    pub folder_id: String,
    pub parent_folder_id: Option<String>,
    pub env_id: String,
    pub created_at: u64,
    pub seq: u64,
}

/// Junction row: one secret version live in the folder at capture time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSecretRow {
    pub snapshot_id: String,
    pub secret_version_id: String,
}

/// Junction row: one child-folder version live in the folder at capture time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFolderRow {
    pub snapshot_id: String,
    pub folder_version_id: String,
}

/// Hard policies block a merge below the approval threshold; Soft policies
/// allow it with a recorded bypass reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnforcementLevel {
    Hard,
    Soft,
}

/// Review policy scoped to (environment, secret-path pattern).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRow {
    pub id: String,
    pub env_id: String,
    /// Glob pattern over folder paths, e.g. `/prod/*`.
    pub secret_path: String,
    pub approvers: Vec<String>,
    /// Minimum count of distinct Approved votes from `approvers`.
    pub approvals: usize,
    pub enforcement: EnforcementLevel,
    /// Whether the committer may review their own request.
    pub allow_self_review: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitOp {
    Create,
    Update,
    Delete,
}

/// One proposed operation inside a change request.
///
/// Create/Update carry encrypted fields; Delete carries only the blind
/// index. Update/Delete capture the target's id and live version pointer at
/// request creation, anchoring conflict detection at merge time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRow {
    pub id: String,
    pub op: CommitOp,
    pub blind_index: String,
    pub key: Option<EncryptedBlob>,
    pub value: Option<EncryptedBlob>,
    pub comment: Option<EncryptedBlob>,
    pub secret_id: Option<String>,
    pub pre_version: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

/// One reviewer's current vote; resubmission updates in place, leaving no
/// history trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRow {
    pub reviewer_id: String,
    pub status: ReviewStatus,
    pub comment: Option<String>,
}

/// A proposed operation found inconsistent with live state at merge time.
/// Recorded on the request, never raised as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub op: CommitOp,
    /// Id of the conflicted commit row.
    pub secret_id: String,
}

/// A reviewable, policy-gated batch of proposed secret mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRow {
    pub id: String,
    pub folder_id: String,
    pub policy_id: String,
    pub committer_id: String,
    pub status: RequestState,
    pub has_merged: bool,
    pub commits: Vec<CommitRow>,
    pub reviews: Vec<ReviewRow>,
    pub conflicts: Vec<Conflict>,
    pub bypass_reason: Option<String>,
    pub status_changed_by: Option<String>,
    pub created_at: u64,
}

impl RequestRow {
    /// Current vote for a reviewer, if any.
    pub fn review_of(&self, reviewer_id: &str) -> Option<&ReviewRow> {
        self.reviews.iter().find(|r| r.reviewer_id == reviewer_id)
    }
}
