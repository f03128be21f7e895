// SPDX-License-Identifier: MIT OR Apache-2.0
//! Change-request lifecycle: open, review, close.
//!
//! State machine: `Open --review--> Open` (votes accumulate),
//! `Open --close--> Closed`, `Open --merge--> Closed + has_merged`.
//! No transition leaves Closed.

use std::sync::Arc;

use secret_store::{
    new_id, now_epoch_secs, CommitOp, CommitRow, ProjectCrypto, RequestRow, RequestState,
    ReviewRow, ReviewStatus, SecretDb,
};

use crate::hooks::{dispatch, Notification, NoopNotifier, NoopSync, NotificationSink, SyncTrigger};
use crate::policy::resolve_policy;
use crate::{Actor, ProjectCapabilities, RequestError, Result};

/// One proposed operation in a batch, named in plaintext at the boundary;
/// the engine derives the blind index and encrypts before anything is
/// persisted.
#[derive(Debug, Clone)]
pub enum ProposedOp {
    Create {
        name: String,
        value: String,
        comment: Option<String>,
    },
    Update {
        name: String,
        value: Option<String>,
        comment: Option<String>,
    },
    Delete {
        name: String,
    },
}

/// A batch of proposed operations against one folder.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub folder_id: String,
    pub operations: Vec<ProposedOp>,
}

pub struct RequestEngine {
    pub(crate) notifier: Arc<dyn NotificationSink>,
    pub(crate) sync: Arc<dyn SyncTrigger>,
}

impl Default for RequestEngine {
    fn default() -> Self {
        Self {
            notifier: Arc::new(NoopNotifier),
            sync: Arc::new(NoopSync),
        }
    }
}

impl RequestEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_sync(mut self, sync: Arc<dyn SyncTrigger>) -> Self {
        self.sync = sync;
        self
    }

    /// Open a change request for a batch of operations.
    ///
    /// Every Create is validated against current blind indexes (must not
    /// exist), every Update/Delete against current indexes (must exist),
    /// capturing the target's id and live version pointer. That captured
    /// pointer anchors conflict detection at merge time.
    pub fn open_request(
        &self,
        db: &SecretDb,
        crypto: &ProjectCrypto,
        caps: ProjectCapabilities,
        committer: &Actor,
        change: &ChangeSet,
    ) -> Result<RequestRow> {
        if !caps.change_requests {
            return Err(RequestError::CapabilityDisabled);
        }
        if change.operations.is_empty() {
            return Err(RequestError::Validation("empty commit set".into()));
        }

        // Derive indexes and encrypt outside the transaction; nothing here
        // touches table state.
        let mut prepared: Vec<CommitRow> = Vec::with_capacity(change.operations.len());
        for op in &change.operations {
            prepared.push(match op {
                ProposedOp::Create {
                    name,
                    value,
                    comment,
                } => CommitRow {
                    id: new_id(),
                    op: CommitOp::Create,
                    blind_index: crypto.index(name),
                    key: Some(crypto.encrypt_str(name)?),
                    value: Some(crypto.encrypt_str(value)?),
                    comment: comment.as_deref().map(|c| crypto.encrypt_str(c)).transpose()?,
                    secret_id: None,
                    pre_version: None,
                },
                ProposedOp::Update {
                    name,
                    value,
                    comment,
                } => CommitRow {
                    id: new_id(),
                    op: CommitOp::Update,
                    blind_index: crypto.index(name),
                    key: Some(crypto.encrypt_str(name)?),
                    value: value.as_deref().map(|v| crypto.encrypt_str(v)).transpose()?,
                    comment: comment.as_deref().map(|c| crypto.encrypt_str(c)).transpose()?,
                    secret_id: None,
                    pre_version: None,
                },
                ProposedOp::Delete { name } => CommitRow {
                    id: new_id(),
                    op: CommitOp::Delete,
                    blind_index: crypto.index(name),
                    key: None,
                    value: None,
                    comment: None,
                    secret_id: None,
                    pre_version: None,
                },
            });
        }

        let request = db.transaction(|t| {
            let folder = t.folder(&change.folder_id).map_err(RequestError::Store)?;
            let env_id = folder.env_id.clone();

            let tree = secret_store::FolderTree::build(t, &env_id).map_err(RequestError::Store)?;
            let path = tree.path_of(&change.folder_id).ok_or_else(|| {
                RequestError::NotFound(format!("folder {}", change.folder_id))
            })?;
            let policy = resolve_policy(t, &env_id, &path).ok_or_else(|| {
                RequestError::Validation(format!("no change-request policy covers {path}"))
            })?;

            let live = t.live_shared_index_map(&change.folder_id);
            let batch_deletes: std::collections::HashSet<&str> = prepared
                .iter()
                .filter(|c| c.op == CommitOp::Delete)
                .map(|c| c.blind_index.as_str())
                .collect();

            let mut commits = prepared.clone();
            for commit in &mut commits {
                match commit.op {
                    CommitOp::Create => {
                        // A create over a live name is valid only when the
                        // same batch deletes that row (a replace); the merge
                        // processor resolves the pair deterministically.
                        if live.contains_key(&commit.blind_index)
                            && !batch_deletes.contains(commit.blind_index.as_str())
                        {
                            return Err(RequestError::Validation(
                                "proposed secret already exists in folder".into(),
                            ));
                        }
                    },
                    CommitOp::Update | CommitOp::Delete => {
                        let target = live.get(&commit.blind_index).ok_or_else(|| {
                            RequestError::Validation(
                                "proposed target does not exist in folder".into(),
                            )
                        })?;
                        let version = t
                            .secrets
                            .get(target)
                            .map(|s| s.version)
                            .unwrap_or_default();
                        commit.secret_id = Some(target.clone());
                        commit.pre_version = Some(version);
                    },
                }
            }

            let row = RequestRow {
                id: new_id(),
                folder_id: change.folder_id.clone(),
                policy_id: policy.id,
                committer_id: committer.id.clone(),
                status: RequestState::Open,
                has_merged: false,
                commits,
                reviews: Vec::new(),
                conflicts: Vec::new(),
                bypass_reason: None,
                status_changed_by: None,
                created_at: now_epoch_secs(),
            };
            t.requests.insert(row.id.clone(), row.clone());
            Ok(row)
        })?;

        dispatch(
            self.notifier.as_ref(),
            &Notification::RequestOpened {
                request_id: request.id.clone(),
                folder_id: request.folder_id.clone(),
                committer_id: request.committer_id.clone(),
            },
        );
        Ok(request)
    }

    /// Cast or change a vote. First vote per (request, reviewer) inserts;
    /// later calls update the same row in place.
    pub fn review(
        &self,
        db: &SecretDb,
        caps: ProjectCapabilities,
        actor: &Actor,
        request_id: &str,
        status: ReviewStatus,
        comment: Option<&str>,
    ) -> Result<RequestRow> {
        if !caps.change_requests {
            return Err(RequestError::CapabilityDisabled);
        }

        db.transaction(|t| {
            let request = t.request(request_id).map_err(RequestError::Store)?.clone();
            if request.status == RequestState::Closed {
                return Err(RequestError::RequestClosed);
            }
            let policy = t.policy(&request.policy_id).map_err(RequestError::Store)?.clone();
            guard_participant(actor, &request, &policy.approvers)?;
            if !policy.allow_self_review && actor.id == request.committer_id {
                return Err(RequestError::Unauthorized(
                    "committers may not review their own request".into(),
                ));
            }

            let row = t.request_mut(request_id).map_err(RequestError::Store)?;
            match row.reviews.iter_mut().find(|r| r.reviewer_id == actor.id) {
                Some(existing) => {
                    existing.status = status;
                    existing.comment = comment.map(String::from);
                },
                None => row.reviews.push(ReviewRow {
                    reviewer_id: actor.id.clone(),
                    status,
                    comment: comment.map(String::from),
                }),
            }
            Ok(row.clone())
        })
    }

    /// Close an open request without merging. Terminal.
    pub fn close(
        &self,
        db: &SecretDb,
        caps: ProjectCapabilities,
        actor: &Actor,
        request_id: &str,
    ) -> Result<RequestRow> {
        if !caps.change_requests {
            return Err(RequestError::CapabilityDisabled);
        }

        db.transaction(|t| {
            let request = t.request(request_id).map_err(RequestError::Store)?.clone();
            if request.status == RequestState::Closed {
                return Err(RequestError::RequestClosed);
            }
            let policy = t.policy(&request.policy_id).map_err(RequestError::Store)?.clone();
            guard_participant(actor, &request, &policy.approvers)?;

            let row = t.request_mut(request_id).map_err(RequestError::Store)?;
            row.status = RequestState::Closed;
            row.status_changed_by = Some(actor.id.clone());
            Ok(row.clone())
        })
    }

    /// Fetch one request.
    pub fn get_request(&self, db: &SecretDb, request_id: &str) -> Result<RequestRow> {
        db.read(|t| t.request(request_id).cloned().map_err(RequestError::Store))
    }

    /// List requests, optionally filtered by folder and state, newest first.
    pub fn list_requests(
        &self,
        db: &SecretDb,
        folder_id: Option<&str>,
        status: Option<RequestState>,
    ) -> Vec<RequestRow> {
        db.read(|t| {
            let mut rows: Vec<RequestRow> = t
                .requests
                .values()
                .filter(|r| folder_id.map_or(true, |f| r.folder_id == f))
                .filter(|r| status.map_or(true, |s| r.status == s))
                .cloned()
                .collect();
            rows.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
            rows
        })
    }
}

/// Only the committer, a project admin, or a listed approver may vote,
/// close, or merge.
pub(crate) fn guard_participant(
    actor: &Actor,
    request: &RequestRow,
    approvers: &[String],
) -> Result<()> {
    if actor.is_admin
        || actor.id == request.committer_id
        || approvers.iter().any(|a| a == &actor.id)
    {
        Ok(())
    } else {
        Err(RequestError::Unauthorized(format!(
            "{} is neither committer, admin, nor approver",
            actor.id
        )))
    }
}

/// Count distinct Approved votes whose voter belongs to the approver set.
pub(crate) fn approved_votes(request: &RequestRow, approvers: &[String]) -> usize {
    request
        .reviews
        .iter()
        .filter(|r| r.status == ReviewStatus::Approved)
        .filter(|r| approvers.iter().any(|a| a == &r.reviewer_id))
        .count()
}

#[cfg(test)]
mod tests {
    use secret_cipher::{CipherScheme, ProjectKey, KEY_SIZE};
    use secret_store::{EnforcementLevel, ProjectConfig, SecretDraft, SecretKind};

    use super::*;
    use crate::policy::{create_policy, PolicyDraft};

    fn setup() -> (SecretDb, ProjectCrypto, String, String) {
        let db = SecretDb::new();
        let key = ProjectKey::from_bytes([11u8; KEY_SIZE]);
        let project = db
            .create_project(
                "demo",
                CipherScheme::V2Envelope,
                &key,
                ProjectConfig::default(),
            )
            .unwrap();
        let env = db.create_environment(&project.id, "prod").unwrap();
        let crypto = ProjectCrypto::load(&db, &project.id, &key).unwrap();
        (db, crypto, env.id, env.root_folder_id)
    }

    fn standard_policy(db: &SecretDb, env: &str) {
        create_policy(
            db,
            env,
            PolicyDraft::new("*", vec!["bob".into(), "carol".into()], 1)
                .with_enforcement(EnforcementLevel::Hard),
        )
        .unwrap();
    }

    fn create_op(name: &str, value: &str) -> ProposedOp {
        ProposedOp::Create {
            name: name.into(),
            value: value.into(),
            comment: None,
        }
    }

    #[test]
    fn test_open_request_captures_version_pointers() {
        let (db, crypto, env, root) = setup();
        standard_policy(&db, &env);

        db.create_secret(
            &crypto,
            &root,
            SecretKind::Shared,
            None,
            &SecretDraft {
                name: "X".into(),
                value: "1".into(),
                comment: None,
            },
        )
        .unwrap();

        let engine = RequestEngine::new();
        let request = engine
            .open_request(
                &db,
                &crypto,
                ProjectCapabilities::default(),
                &Actor::user("alice"),
                &ChangeSet {
                    folder_id: root.clone(),
                    operations: vec![
                        ProposedOp::Update {
                            name: "X".into(),
                            value: Some("2".into()),
                            comment: None,
                        },
                        ProposedOp::Delete { name: "X".into() },
                    ],
                },
            )
            .unwrap();

        for commit in &request.commits {
            assert!(commit.secret_id.is_some());
            assert_eq!(commit.pre_version, Some(1));
        }
    }

    #[test]
    fn test_open_request_rejects_create_of_existing_name() {
        let (db, crypto, env, root) = setup();
        standard_policy(&db, &env);

        db.create_secret(
            &crypto,
            &root,
            SecretKind::Shared,
            None,
            &SecretDraft {
                name: "X".into(),
                value: "1".into(),
                comment: None,
            },
        )
        .unwrap();

        let engine = RequestEngine::new();
        let result = engine.open_request(
            &db,
            &crypto,
            ProjectCapabilities::default(),
            &Actor::user("alice"),
            &ChangeSet {
                folder_id: root,
                operations: vec![create_op("X", "dup")],
            },
        );
        assert!(matches!(result, Err(RequestError::Validation(_))));
    }

    #[test]
    fn test_open_request_rejects_update_of_missing_name() {
        let (db, crypto, env, root) = setup();
        standard_policy(&db, &env);

        let engine = RequestEngine::new();
        let result = engine.open_request(
            &db,
            &crypto,
            ProjectCapabilities::default(),
            &Actor::user("alice"),
            &ChangeSet {
                folder_id: root,
                operations: vec![ProposedOp::Delete { name: "GHOST".into() }],
            },
        );
        assert!(matches!(result, Err(RequestError::Validation(_))));
    }

    #[test]
    fn test_empty_batch_rejected() {
        let (db, crypto, env, root) = setup();
        standard_policy(&db, &env);

        let engine = RequestEngine::new();
        let result = engine.open_request(
            &db,
            &crypto,
            ProjectCapabilities::default(),
            &Actor::user("alice"),
            &ChangeSet {
                folder_id: root,
                operations: vec![],
            },
        );
        assert!(matches!(result, Err(RequestError::Validation(_))));
    }

    #[test]
    fn test_no_policy_rejected() {
        let (db, crypto, _env, root) = setup();

        let engine = RequestEngine::new();
        let result = engine.open_request(
            &db,
            &crypto,
            ProjectCapabilities::default(),
            &Actor::user("alice"),
            &ChangeSet {
                folder_id: root,
                operations: vec![create_op("X", "1")],
            },
        );
        assert!(matches!(result, Err(RequestError::Validation(_))));
    }

    #[test]
    fn test_capability_gate() {
        let (db, crypto, env, root) = setup();
        standard_policy(&db, &env);

        let engine = RequestEngine::new();
        let result = engine.open_request(
            &db,
            &crypto,
            ProjectCapabilities::default().with_change_requests(false),
            &Actor::user("alice"),
            &ChangeSet {
                folder_id: root,
                operations: vec![create_op("X", "1")],
            },
        );
        assert!(matches!(result, Err(RequestError::CapabilityDisabled)));
    }

    #[test]
    fn test_vote_upsert_is_idempotent() {
        let (db, crypto, env, root) = setup();
        standard_policy(&db, &env);

        let engine = RequestEngine::new();
        let request = engine
            .open_request(
                &db,
                &crypto,
                ProjectCapabilities::default(),
                &Actor::user("alice"),
                &ChangeSet {
                    folder_id: root,
                    operations: vec![create_op("X", "1")],
                },
            )
            .unwrap();

        let caps = ProjectCapabilities::default();
        engine
            .review(&db, caps, &Actor::user("bob"), &request.id, ReviewStatus::Approved, None)
            .unwrap();
        engine
            .review(&db, caps, &Actor::user("bob"), &request.id, ReviewStatus::Approved, None)
            .unwrap();
        let after = engine
            .review(
                &db,
                caps,
                &Actor::user("bob"),
                &request.id,
                ReviewStatus::Rejected,
                Some("second thoughts"),
            )
            .unwrap();

        assert_eq!(after.reviews.len(), 1);
        assert_eq!(after.reviews[0].status, ReviewStatus::Rejected);
        assert_eq!(after.reviews[0].comment.as_deref(), Some("second thoughts"));
    }

    #[test]
    fn test_outsider_cannot_vote() {
        let (db, crypto, env, root) = setup();
        standard_policy(&db, &env);

        let engine = RequestEngine::new();
        let request = engine
            .open_request(
                &db,
                &crypto,
                ProjectCapabilities::default(),
                &Actor::user("alice"),
                &ChangeSet {
                    folder_id: root,
                    operations: vec![create_op("X", "1")],
                },
            )
            .unwrap();

        let result = engine.review(
            &db,
            ProjectCapabilities::default(),
            &Actor::user("mallory"),
            &request.id,
            ReviewStatus::Approved,
            None,
        );
        assert!(matches!(result, Err(RequestError::Unauthorized(_))));

        // Admins pass the participant guard.
        engine
            .review(
                &db,
                ProjectCapabilities::default(),
                &Actor::admin("root"),
                &request.id,
                ReviewStatus::Approved,
                None,
            )
            .unwrap();
    }

    #[test]
    fn test_self_review_blocked_by_policy() {
        let (db, crypto, env, root) = setup();
        standard_policy(&db, &env);

        let engine = RequestEngine::new();
        let request = engine
            .open_request(
                &db,
                &crypto,
                ProjectCapabilities::default(),
                &Actor::user("alice"),
                &ChangeSet {
                    folder_id: root,
                    operations: vec![create_op("X", "1")],
                },
            )
            .unwrap();

        let result = engine.review(
            &db,
            ProjectCapabilities::default(),
            &Actor::user("alice"),
            &request.id,
            ReviewStatus::Approved,
            None,
        );
        assert!(matches!(result, Err(RequestError::Unauthorized(_))));
    }

    #[test]
    fn test_close_is_terminal() {
        let (db, crypto, env, root) = setup();
        standard_policy(&db, &env);

        let engine = RequestEngine::new();
        let request = engine
            .open_request(
                &db,
                &crypto,
                ProjectCapabilities::default(),
                &Actor::user("alice"),
                &ChangeSet {
                    folder_id: root,
                    operations: vec![create_op("X", "1")],
                },
            )
            .unwrap();

        let caps = ProjectCapabilities::default();
        let closed = engine
            .close(&db, caps, &Actor::user("alice"), &request.id)
            .unwrap();
        assert_eq!(closed.status, RequestState::Closed);
        assert!(!closed.has_merged);

        assert!(matches!(
            engine.close(&db, caps, &Actor::user("alice"), &request.id),
            Err(RequestError::RequestClosed)
        ));
        assert!(matches!(
            engine.review(
                &db,
                caps,
                &Actor::user("bob"),
                &request.id,
                ReviewStatus::Approved,
                None
            ),
            Err(RequestError::RequestClosed)
        ));
    }

    #[test]
    fn test_list_filters() {
        let (db, crypto, env, root) = setup();
        standard_policy(&db, &env);

        let engine = RequestEngine::new();
        let request = engine
            .open_request(
                &db,
                &crypto,
                ProjectCapabilities::default(),
                &Actor::user("alice"),
                &ChangeSet {
                    folder_id: root.clone(),
                    operations: vec![create_op("X", "1")],
                },
            )
            .unwrap();

        assert_eq!(engine.list_requests(&db, Some(&root), None).len(), 1);
        assert_eq!(
            engine
                .list_requests(&db, Some(&root), Some(RequestState::Closed))
                .len(),
            0
        );
        assert_eq!(engine.list_requests(&db, Some("other"), None).len(), 0);
        assert_eq!(
            engine.get_request(&db, &request.id).unwrap().id,
            request.id
        );
    }
}
