// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shallow snapshot capture.

use secret_store::{
    new_id, now_epoch_secs, SecretDb, SnapshotFolderRow, SnapshotRow, SnapshotSecretRow, Tables,
};
use tracing::warn;

use crate::Result;

/// Capture a folder's direct contents inside an existing transaction.
///
/// Records the latest version row of every live secret and child folder,
/// then one junction row per reference.
pub fn perform_snapshot_in(tables: &mut Tables, folder_id: &str) -> Result<SnapshotRow> {
    let folder = tables.folder(folder_id)?.clone();

    let secret_version_ids: Vec<String> = tables
        .live_secrets_in(folder_id)
        .iter()
        .filter_map(|s| tables.latest_secret_version(&s.id).map(|v| v.id.clone()))
        .collect();

    let folder_version_ids: Vec<String> = tables
        .child_folders(folder_id)
        .iter()
        .filter_map(|f| tables.latest_folder_version(&f.id).map(|v| v.id.clone()))
        .collect();

    let snapshot = SnapshotRow {
        id: new_id(),
        folder_id: folder.id.clone(),
        parent_folder_id: folder.parent_id.clone(),
        env_id: folder.env_id.clone(),
        created_at: now_epoch_secs(),
        seq: tables.next_seq(),
    };

    for secret_version_id in secret_version_ids {
        tables.snapshot_secrets.push(SnapshotSecretRow {
            snapshot_id: snapshot.id.clone(),
            secret_version_id,
        });
    }
    for folder_version_id in folder_version_ids {
        tables.snapshot_folders.push(SnapshotFolderRow {
            snapshot_id: snapshot.id.clone(),
            folder_version_id,
        });
    }

    tables.snapshots.insert(snapshot.id.clone(), snapshot.clone());
    Ok(snapshot)
}

/// Capture a folder's direct contents in its own transaction.
pub fn perform_snapshot(db: &SecretDb, folder_id: &str) -> Result<SnapshotRow> {
    db.transaction(|t| perform_snapshot_in(t, folder_id))
}

/// Best-effort capture for the normal edit path.
///
/// A lost snapshot must never block or revert an otherwise successful
/// mutation, so failures are logged and swallowed.
pub fn capture(db: &SecretDb, folder_id: &str) -> Option<SnapshotRow> {
    match perform_snapshot(db, folder_id) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!(folder_id, error = %e, "snapshot capture failed");
            None
        },
    }
}

/// Snapshots of a folder, most recent first.
pub fn list_snapshots(db: &SecretDb, folder_id: &str, limit: Option<usize>) -> Vec<SnapshotRow> {
    db.read(|t| {
        let mut rows: Vec<SnapshotRow> = t
            .snapshots
            .values()
            .filter(|s| s.folder_id == folder_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.seq.cmp(&a.seq));
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        rows
    })
}

/// Number of snapshots recorded for a folder.
pub fn snapshot_count(db: &SecretDb, folder_id: &str) -> usize {
    db.read(|t| t.snapshots.values().filter(|s| s.folder_id == folder_id).count())
}

/// A decrypted secret as it was at capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSecret {
    pub secret_id: String,
    pub name: String,
    pub value: String,
    pub comment: Option<String>,
    pub version: u64,
}

/// A child folder as it was at capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFolder {
    pub folder_id: String,
    pub name: String,
    pub version: u64,
}

/// One snapshot's direct contents, decrypted for display.
#[derive(Debug, Clone)]
pub struct SnapshotContents {
    pub snapshot: SnapshotRow,
    pub secrets: Vec<SnapshotSecret>,
    pub folders: Vec<SnapshotFolder>,
}

/// Load and decrypt a snapshot's direct contents.
pub fn snapshot_contents(
    db: &SecretDb,
    crypto: &secret_store::ProjectCrypto,
    snapshot_id: &str,
) -> Result<SnapshotContents> {
    db.read(|t| {
        let snapshot = t
            .snapshot(snapshot_id)
            .map_err(|_| crate::SnapshotError::NotFound(snapshot_id.to_string()))?
            .clone();

        let mut secrets = Vec::new();
        for v in t.snapshot_secret_versions(&snapshot.id) {
            secrets.push(SnapshotSecret {
                secret_id: v.secret_id.clone(),
                name: crypto.decrypt_str(&v.key).map_err(crate::SnapshotError::Store)?,
                value: crypto.decrypt_str(&v.value).map_err(crate::SnapshotError::Store)?,
                comment: v
                    .comment
                    .as_ref()
                    .map(|c| crypto.decrypt_str(c))
                    .transpose()
                    .map_err(crate::SnapshotError::Store)?,
                version: v.version,
            });
        }
        secrets.sort_by(|a, b| a.name.cmp(&b.name));

        let mut folders: Vec<SnapshotFolder> = t
            .snapshot_folder_versions(&snapshot.id)
            .into_iter()
            .map(|v| SnapshotFolder {
                folder_id: v.folder_id.clone(),
                name: v.name.clone(),
                version: v.version,
            })
            .collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(SnapshotContents {
            snapshot,
            secrets,
            folders,
        })
    })
}
