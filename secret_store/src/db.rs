// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transactional table store.
//!
//! All tables live behind a single `RwLock`; a transaction takes the write
//! lock, runs against a working copy, and swaps the copy in only on `Ok`.
//! Any `Err` leaves prior state untouched. The lock is the sole
//! mutual-exclusion mechanism: concurrent mutators serialize here, and each
//! re-reads live state inside its own transaction.

use std::{
    collections::HashMap,
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::RwLock;

use crate::model::{
    EnvironmentRow, FolderRow, FolderVersionRow, PolicyRow, ProjectRow, RequestRow, SecretKind,
    SecretRow, SecretVersionRow, SnapshotFolderRow, SnapshotRow, SnapshotSecretRow,
};
use crate::{Result, StoreError};

/// Epoch seconds.
pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Generate a fresh row id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The full relational state. Cloned per transaction.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub projects: HashMap<String, ProjectRow>,
    pub environments: HashMap<String, EnvironmentRow>,
    pub folders: HashMap<String, FolderRow>,
    pub secrets: HashMap<String, SecretRow>,
    pub secret_versions: Vec<SecretVersionRow>,
    pub folder_versions: Vec<FolderVersionRow>,
    pub snapshots: HashMap<String, SnapshotRow>,
    pub snapshot_secrets: Vec<SnapshotSecretRow>,
    pub snapshot_folders: Vec<SnapshotFolderRow>,
    pub policies: HashMap<String, PolicyRow>,
    pub requests: HashMap<String, RequestRow>,
    seq: u64,
}

impl Tables {
    /// Next value of the monotonic insertion counter.
    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    pub fn project(&self, id: &str) -> Result<&ProjectRow> {
        self.projects
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("project {id}")))
    }

    pub fn environment(&self, id: &str) -> Result<&EnvironmentRow> {
        self.environments
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("environment {id}")))
    }

    pub fn folder(&self, id: &str) -> Result<&FolderRow> {
        self.folders
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("folder {id}")))
    }

    pub fn policy(&self, id: &str) -> Result<&PolicyRow> {
        self.policies
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("policy {id}")))
    }

    pub fn request(&self, id: &str) -> Result<&RequestRow> {
        self.requests
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("change request {id}")))
    }

    pub fn request_mut(&mut self, id: &str) -> Result<&mut RequestRow> {
        self.requests
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("change request {id}")))
    }

    pub fn snapshot(&self, id: &str) -> Result<&SnapshotRow> {
        self.snapshots
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("snapshot {id}")))
    }

    /// Environment owning the project's root folders, by project + slug.
    pub fn environment_by_slug(&self, project_id: &str, slug: &str) -> Result<&EnvironmentRow> {
        self.environments
            .values()
            .find(|e| e.project_id == project_id && e.slug == slug)
            .ok_or_else(|| StoreError::NotFound(format!("environment {slug}")))
    }

    /// All live secrets directly inside a folder.
    pub fn live_secrets_in(&self, folder_id: &str) -> Vec<&SecretRow> {
        let mut rows: Vec<&SecretRow> = self
            .secrets
            .values()
            .filter(|s| s.folder_id == folder_id)
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    /// Live Shared blind indexes in a folder, mapped to the owning row id.
    ///
    /// This is the state conflict detection re-reads inside the merge
    /// transaction.
    pub fn live_shared_index_map(&self, folder_id: &str) -> HashMap<String, String> {
        self.secrets
            .values()
            .filter(|s| s.folder_id == folder_id && s.kind == SecretKind::Shared)
            .map(|s| (s.blind_index.clone(), s.id.clone()))
            .collect()
    }

    /// Live secret matching (folder, blind index, kind), and owner for
    /// Personal rows.
    pub fn find_live_secret(
        &self,
        folder_id: &str,
        blind_index: &str,
        kind: SecretKind,
        user_id: Option<&str>,
    ) -> Option<&SecretRow> {
        self.secrets.values().find(|s| {
            s.folder_id == folder_id
                && s.blind_index == blind_index
                && s.kind == kind
                && (kind == SecretKind::Shared || s.user_id.as_deref() == user_id)
        })
    }

    /// Direct child folders, name-sorted for deterministic iteration.
    pub fn child_folders(&self, folder_id: &str) -> Vec<&FolderRow> {
        let mut rows: Vec<&FolderRow> = self
            .folders
            .values()
            .filter(|f| f.parent_id.as_deref() == Some(folder_id))
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Latest version row for a secret id, across live and tombstoned history.
    pub fn latest_secret_version(&self, secret_id: &str) -> Option<&SecretVersionRow> {
        self.secret_versions
            .iter()
            .filter(|v| v.secret_id == secret_id)
            .max_by_key(|v| (v.version, v.seq))
    }

    /// Highest version number ever recorded for a secret id.
    pub fn max_version_for_id(&self, secret_id: &str) -> Option<u64> {
        self.secret_versions
            .iter()
            .filter(|v| v.secret_id == secret_id)
            .map(|v| v.version)
            .max()
    }

    /// Highest version number in history under (folder, blind index),
    /// regardless of secret id. Drives the tombstone rule: a create over a
    /// previously-deleted name continues that history's numbering.
    pub fn max_version_for_index(&self, folder_id: &str, blind_index: &str) -> Option<u64> {
        self.secret_versions
            .iter()
            .filter(|v| v.folder_id == folder_id && v.blind_index == blind_index)
            .map(|v| v.version)
            .max()
    }

    /// Latest version row for a folder id.
    pub fn latest_folder_version(&self, folder_id: &str) -> Option<&FolderVersionRow> {
        self.folder_versions
            .iter()
            .filter(|v| v.folder_id == folder_id)
            .max_by_key(|v| (v.version, v.seq))
    }

    pub fn max_version_for_folder(&self, folder_id: &str) -> Option<u64> {
        self.folder_versions
            .iter()
            .filter(|v| v.folder_id == folder_id)
            .map(|v| v.version)
            .max()
    }

    /// Append a version row mirroring the live secret row.
    pub fn push_secret_version(&mut self, row: &SecretRow) -> String {
        let id = new_id();
        let seq = self.next_seq();
        self.secret_versions.push(SecretVersionRow {
            id: id.clone(),
            secret_id: row.id.clone(),
            folder_id: row.folder_id.clone(),
            blind_index: row.blind_index.clone(),
            key: row.key.clone(),
            value: row.value.clone(),
            comment: row.comment.clone(),
            kind: row.kind,
            user_id: row.user_id.clone(),
            version: row.version,
            created_at: now_epoch_secs(),
            seq,
        });
        id
    }

    /// Append a version row mirroring the live folder row.
    pub fn push_folder_version(&mut self, row: &FolderRow) -> String {
        let id = new_id();
        let seq = self.next_seq();
        self.folder_versions.push(FolderVersionRow {
            id: id.clone(),
            folder_id: row.id.clone(),
            env_id: row.env_id.clone(),
            name: row.name.clone(),
            version: row.version,
            created_at: now_epoch_secs(),
            seq,
        });
        id
    }

    /// Most recent snapshot of a folder, if any.
    pub fn latest_snapshot_for_folder(&self, folder_id: &str) -> Option<&SnapshotRow> {
        self.snapshots
            .values()
            .filter(|s| s.folder_id == folder_id)
            .max_by_key(|s| s.seq)
    }

    /// Secret version rows referenced by a snapshot's junction rows.
    pub fn snapshot_secret_versions(&self, snapshot_id: &str) -> Vec<&SecretVersionRow> {
        self.snapshot_secrets
            .iter()
            .filter(|j| j.snapshot_id == snapshot_id)
            .filter_map(|j| self.secret_versions.iter().find(|v| v.id == j.secret_version_id))
            .collect()
    }

    /// Folder version rows referenced by a snapshot's junction rows.
    pub fn snapshot_folder_versions(&self, snapshot_id: &str) -> Vec<&FolderVersionRow> {
        self.snapshot_folders
            .iter()
            .filter(|j| j.snapshot_id == snapshot_id)
            .filter_map(|j| self.folder_versions.iter().find(|v| v.id == j.folder_version_id))
            .collect()
    }
}

/// Handle to the shared store.
#[derive(Debug, Default)]
pub struct SecretDb {
    tables: RwLock<Tables>,
}

impl SecretDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` inside a transaction. The working copy replaces live state
    /// only when `f` returns `Ok`; any `Err` discards every write.
    pub fn transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Tables) -> std::result::Result<T, E>,
    {
        let mut guard = self.tables.write();
        let mut working = guard.clone();
        match f(&mut working) {
            Ok(value) => {
                *guard = working;
                Ok(value)
            },
            Err(e) => Err(e),
        }
    }

    /// Run a read-only closure under the read lock.
    pub fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&Tables) -> T,
    {
        f(&self.tables.read())
    }
}
