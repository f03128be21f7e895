// SPDX-License-Identifier: MIT OR Apache-2.0
//! Recursive subtree rollback from nested shallow snapshots.
//!
//! The target folder is restored from the exact snapshot given; every
//! descendant folder is restored from its own most recent snapshot as of
//! now. The whole rollback is one transaction: delete the live subtree
//! contents, reinsert the materialized set, then re-snapshot the target so
//! the rollback itself becomes a new forward point in history.

use std::collections::HashSet;

use secret_store::{
    FolderRow, FolderTree, SecretDb, SecretRow, SecretVersionRow, SnapshotRow, Tables,
};

use crate::capture::perform_snapshot_in;
use crate::{Result, SnapshotError};

/// One folder's reconstructed contents. `folder` is `None` for the rollback
/// target (its live row is kept in place), `Some` for descendants that must
/// be reinserted.
struct MaterializedFolder {
    folder: Option<MaterializedFolderRow>,
    secrets: Vec<SecretVersionRow>,
}

struct MaterializedFolderRow {
    folder_id: String,
    parent_id: String,
    env_id: String,
    name: String,
    recorded_version: u64,
}

/// Resolve the materialized subtree, ascending by depth.
///
/// Exact snapshot for the target; "latest as of now" for each descendant. A
/// descendant folder that was never snapshotted is reinserted empty.
fn materialize(tables: &Tables, target: &SnapshotRow) -> Vec<MaterializedFolder> {
    let mut out = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(target.folder_id.clone());

    out.push(MaterializedFolder {
        folder: None,
        secrets: tables
            .snapshot_secret_versions(&target.id)
            .into_iter()
            .cloned()
            .collect(),
    });

    // (parent folder id, folder version row) pairs still to expand,
    // breadth-first so output is ascending by depth.
    let mut queue: Vec<(String, String)> = tables
        .snapshot_folder_versions(&target.id)
        .into_iter()
        .map(|v| (target.folder_id.clone(), v.id.clone()))
        .collect();

    let mut cursor = 0;
    while cursor < queue.len() {
        let (parent_id, folder_version_id) = queue[cursor].clone();
        cursor += 1;

        let Some(version) = tables
            .folder_versions
            .iter()
            .find(|v| v.id == folder_version_id)
        else {
            continue;
        };
        if !visited.insert(version.folder_id.clone()) {
            continue;
        }

        let child_snapshot = tables.latest_snapshot_for_folder(&version.folder_id);
        let secrets = child_snapshot
            .map(|s| {
                tables
                    .snapshot_secret_versions(&s.id)
                    .into_iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        out.push(MaterializedFolder {
            folder: Some(MaterializedFolderRow {
                folder_id: version.folder_id.clone(),
                parent_id,
                env_id: version.env_id.clone(),
                name: version.name.clone(),
                recorded_version: version.version,
            }),
            secrets,
        });

        if let Some(s) = child_snapshot {
            for grandchild in tables.snapshot_folder_versions(&s.id) {
                queue.push((version.folder_id.clone(), grandchild.id.clone()));
            }
        }
    }

    out
}

/// Roll a folder subtree back to the given snapshot.
///
/// Version numbers bump (to max-history + 1, never reusing a number) only
/// for an id that existed both before and after the delete phase; an id
/// reintroduced after being absent goes live at its recorded snapshot
/// version with no bump and no duplicate history row. Returns the fresh
/// snapshot taken of the restored folder.
pub fn rollback(db: &SecretDb, snapshot_id: &str) -> Result<SnapshotRow> {
    db.transaction(|t| {
        let target = t
            .snapshot(snapshot_id)
            .map_err(|_| SnapshotError::NotFound(snapshot_id.to_string()))?
            .clone();
        t.folder(&target.folder_id).map_err(SnapshotError::Store)?;

        let materialized = materialize(t, &target);

        // Delete phase: every live secret in the subtree and every
        // descendant folder row. The target folder row stays.
        let tree =
            FolderTree::build_rooted(t, &target.folder_id).map_err(SnapshotError::Store)?;
        let subtree_ids = tree
            .subtree_ids(&target.folder_id)
            .map_err(SnapshotError::Store)?;

        let deleted_secret_ids: HashSet<String> = t
            .secrets
            .values()
            .filter(|s| subtree_ids.contains(&s.folder_id))
            .map(|s| s.id.clone())
            .collect();
        for id in &deleted_secret_ids {
            t.secrets.remove(id);
        }

        let deleted_folder_ids: HashSet<String> =
            subtree_ids.iter().skip(1).cloned().collect();
        for id in &deleted_folder_ids {
            t.folders.remove(id);
        }

        // Reinsert phase, ascending by depth so parents exist first.
        for entry in &materialized {
            if let Some(folder) = &entry.folder {
                let bump = deleted_folder_ids.contains(&folder.folder_id);
                let version = if bump {
                    t.max_version_for_folder(&folder.folder_id)
                        .map_or(folder.recorded_version, |max| max + 1)
                } else {
                    folder.recorded_version
                };
                let row = FolderRow {
                    id: folder.folder_id.clone(),
                    env_id: folder.env_id.clone(),
                    parent_id: Some(folder.parent_id.clone()),
                    name: folder.name.clone(),
                    version,
                };
                if bump {
                    t.push_folder_version(&row);
                }
                t.folders.insert(row.id.clone(), row);
            }

            let into_folder = entry
                .folder
                .as_ref()
                .map_or(target.folder_id.as_str(), |f| f.folder_id.as_str());

            for v in &entry.secrets {
                let bump = deleted_secret_ids.contains(&v.secret_id);
                let version = if bump {
                    t.max_version_for_id(&v.secret_id)
                        .map_or(v.version, |max| max + 1)
                } else {
                    v.version
                };
                let row = SecretRow {
                    id: v.secret_id.clone(),
                    folder_id: into_folder.to_string(),
                    blind_index: v.blind_index.clone(),
                    key: v.key.clone(),
                    value: v.value.clone(),
                    comment: v.comment.clone(),
                    kind: v.kind,
                    user_id: v.user_id.clone(),
                    version,
                };
                if bump {
                    t.push_secret_version(&row);
                }
                t.secrets.insert(row.id.clone(), row);
            }
        }

        // Rollback is itself a new forward point in history.
        perform_snapshot_in(t, &target.folder_id)
    })
}
