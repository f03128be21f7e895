// SPDX-License-Identifier: MIT OR Apache-2.0
//! Merge processor: re-validate an approved batch against live state and
//! apply the survivors in one transaction.
//!
//! Conflict detection re-reads the folder's current blind-index state inside
//! the merge transaction, never the state captured at request creation. Two
//! racing merges creating the same name therefore resolve with one applied
//! and one recorded conflict, not a store error.
//!
//! Partition order is Create, then Update, then Delete; within a partition
//! commits apply in commit order. A same-batch delete+create of one name
//! resolves deterministically: the create supersedes the live row, and the
//! delete finds its target gone and is recorded conflicted.

use secret_store::{
    insert_secret, CommitOp, Conflict, EnforcementLevel, RequestRow, RequestState, SecretDb,
    SecretKind, Tables,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::{approved_votes, guard_participant, RequestEngine};
use crate::hooks::{dispatch, trigger_sync, Notification};
use crate::{Actor, ProjectCapabilities, RequestError, Result};

/// Result of a merge: the closed request plus what was applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub request: RequestRow,
    pub conflicts: Vec<Conflict>,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl RequestEngine {
    /// Merge an open request once its policy threshold is satisfied.
    ///
    /// Under Soft enforcement an unmet threshold still merges given a
    /// bypass reason, which is recorded and dispatched as a notification.
    /// An empty surviving commit set still merges successfully.
    pub fn merge(
        &self,
        db: &SecretDb,
        caps: ProjectCapabilities,
        actor: &Actor,
        request_id: &str,
        bypass_reason: Option<&str>,
    ) -> Result<MergeOutcome> {
        if !caps.change_requests {
            return Err(RequestError::CapabilityDisabled);
        }

        let mut bypassed = false;
        let outcome = db.transaction(|t| {
            let request = t.request(request_id).map_err(RequestError::Store)?.clone();
            if request.status == RequestState::Closed {
                return Err(RequestError::RequestClosed);
            }
            let policy = t.policy(&request.policy_id).map_err(RequestError::Store)?.clone();
            guard_participant(actor, &request, &policy.approvers)?;

            let approved = approved_votes(&request, &policy.approvers);
            if approved < policy.approvals {
                match (policy.enforcement, bypass_reason) {
                    (EnforcementLevel::Soft, Some(reason)) if !reason.trim().is_empty() => {
                        bypassed = true;
                        let row = t.request_mut(request_id).map_err(RequestError::Store)?;
                        row.bypass_reason = Some(reason.to_string());
                    },
                    _ => {
                        return Err(RequestError::ApprovalsUnmet {
                            approved,
                            required: policy.approvals,
                        });
                    },
                }
            }

            let (conflicts, created, updated, deleted) = apply_commits(t, &request);

            let row = t.request_mut(request_id).map_err(RequestError::Store)?;
            row.status = RequestState::Closed;
            row.has_merged = true;
            row.conflicts = conflicts.clone();
            row.status_changed_by = Some(actor.id.clone());

            Ok(MergeOutcome {
                request: row.clone(),
                conflicts,
                created,
                updated,
                deleted,
            })
        })?;

        info!(
            request_id,
            created = outcome.created,
            updated = outcome.updated,
            deleted = outcome.deleted,
            conflicts = outcome.conflicts.len(),
            "change request merged"
        );

        // Post-commit work is best-effort: losing a snapshot or a
        // notification must never undo the merge.
        snapshot_engine::capture(db, &outcome.request.folder_id);
        trigger_sync(self.sync.as_ref(), &outcome.request.folder_id);
        if bypassed {
            dispatch(
                self.notifier.as_ref(),
                &Notification::SoftBypassMerge {
                    request_id: outcome.request.id.clone(),
                    merged_by: actor.id.clone(),
                    reason: outcome
                        .request
                        .bypass_reason
                        .clone()
                        .unwrap_or_default(),
                },
            );
        }

        Ok(outcome)
    }
}

/// Apply a request's commits against live state, recording conflicts.
/// Returns (conflicts, created, updated, deleted).
fn apply_commits(
    tables: &mut Tables,
    request: &RequestRow,
) -> (Vec<Conflict>, usize, usize, usize) {
    let folder_id = request.folder_id.as_str();
    let mut live = tables.live_shared_index_map(folder_id);
    let mut conflicts = Vec::new();
    let (mut created, mut updated, mut deleted) = (0usize, 0usize, 0usize);

    // Create partition. A create over a live index survives only when a
    // sibling delete in this batch targets that live row; it then replaces
    // the row outright.
    for commit in request.commits.iter().filter(|c| c.op == CommitOp::Create) {
        if let Some(existing_id) = live.get(&commit.blind_index).cloned() {
            let superseded_delete = request.commits.iter().any(|c| {
                c.op == CommitOp::Delete && c.secret_id.as_deref() == Some(existing_id.as_str())
            });
            if !superseded_delete {
                conflicts.push(Conflict {
                    op: CommitOp::Create,
                    secret_id: commit.id.clone(),
                });
                continue;
            }
            tables.secrets.remove(&existing_id);
            live.remove(&commit.blind_index);
        }

        let (Some(key), Some(value)) = (commit.key.clone(), commit.value.clone()) else {
            conflicts.push(Conflict {
                op: CommitOp::Create,
                secret_id: commit.id.clone(),
            });
            continue;
        };
        let row = insert_secret(
            tables,
            folder_id,
            commit.blind_index.clone(),
            key,
            value,
            commit.comment.clone(),
            SecretKind::Shared,
            None,
        );
        live.insert(commit.blind_index.clone(), row.id);
        created += 1;
    }

    // Update partition: target must still exist under its captured blind
    // index, otherwise the commit lost the race.
    for commit in request.commits.iter().filter(|c| c.op == CommitOp::Update) {
        let target = commit
            .secret_id
            .as_ref()
            .and_then(|id| tables.secrets.get(id))
            .filter(|row| row.blind_index == commit.blind_index)
            .map(|row| row.id.clone());

        let Some(target_id) = target else {
            conflicts.push(Conflict {
                op: CommitOp::Update,
                secret_id: commit.id.clone(),
            });
            continue;
        };

        // Bump past the id's whole history, not just the live version; a
        // rollback-revived row can sit below its history's maximum.
        let next_version = tables
            .max_version_for_id(&target_id)
            .unwrap_or(0)
            .max(
                tables
                    .secrets
                    .get(&target_id)
                    .map(|r| r.version)
                    .unwrap_or(0),
            )
            + 1;
        if let Some(row) = tables.secrets.get_mut(&target_id) {
            if let Some(value) = commit.value.clone() {
                row.value = value;
            }
            if commit.comment.is_some() {
                row.comment = commit.comment.clone();
            }
            row.version = next_version;
            let snapshot = row.clone();
            tables.push_secret_version(&snapshot);
            updated += 1;
        }
    }

    // Delete partition.
    for commit in request.commits.iter().filter(|c| c.op == CommitOp::Delete) {
        let target = commit
            .secret_id
            .as_ref()
            .and_then(|id| tables.secrets.get(id))
            .filter(|row| row.blind_index == commit.blind_index)
            .map(|row| row.id.clone());

        let Some(target_id) = target else {
            conflicts.push(Conflict {
                op: CommitOp::Delete,
                secret_id: commit.id.clone(),
            });
            continue;
        };

        tables.secrets.remove(&target_id);
        live.remove(&commit.blind_index);
        deleted += 1;
    }

    (conflicts, created, updated, deleted)
}
