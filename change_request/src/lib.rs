// SPDX-License-Identifier: MIT OR Apache-2.0
//! Review-gated change requests over the secret tree.
//!
//! A change request proposes a batch of create/update/delete operations
//! against one folder under a policy, collects reviewer votes, and merges
//! once approved. Merging re-validates the batch against live state inside
//! the merge transaction; proposals that lost a race are recorded as
//! conflicts on the request, never raised as errors.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

mod engine;
mod hooks;
mod merge;
mod policy;

pub use engine::{ChangeSet, ProposedOp, RequestEngine};
pub use hooks::{Notification, NotificationSink, NoopNotifier, NoopSync, SyncTrigger};
pub use merge::MergeOutcome;
pub use policy::{create_policy, resolve_policy, PolicyDraft};

use secret_cipher::CipherError;
use secret_store::StoreError;

/// Explicit capability value passed into engine entry points; replaces
/// ambient feature-flag/license state.
#[derive(Debug, Clone, Copy)]
pub struct ProjectCapabilities {
    pub change_requests: bool,
}

impl Default for ProjectCapabilities {
    fn default() -> Self {
        Self {
            change_requests: true,
        }
    }
}

impl ProjectCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_change_requests(mut self, enabled: bool) -> Self {
        self.change_requests = enabled;
        self
    }
}

/// The acting user, as resolved by the caller's permission evaluator.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub is_admin: bool,
}

impl Actor {
    pub fn user(id: &str) -> Self {
        Self {
            id: id.to_string(),
            is_admin: false,
        }
    }

    pub fn admin(id: &str) -> Self {
        Self {
            id: id.to_string(),
            is_admin: true,
        }
    }
}

/// Error types for change-request operations.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("change request is closed")]
    RequestClosed,

    #[error("approval threshold not met: {approved} of {required} required approvals")]
    ApprovalsUnmet { approved: usize, required: usize },

    #[error("change requests are disabled for this project")]
    CapabilityDisabled,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),
}

pub type Result<T> = std::result::Result<T, RequestError>;
