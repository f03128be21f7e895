// SPDX-License-Identifier: MIT OR Apache-2.0
//! Count-based retention pruning.
//!
//! Runs as a batch job outside the request path. Only snapshots beyond the
//! per-project retention count and unreferenced version rows beyond the
//! version retention count are removed, never live rows, so interleaving
//! with mutations is safe.

use std::collections::{HashMap, HashSet};

use secret_store::{SecretDb, StoreError};
use tracing::info;

use crate::Result;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetentionStats {
    pub snapshots_removed: usize,
    pub secret_versions_removed: usize,
    pub folder_versions_removed: usize,
}

pub struct RetentionManager;

impl RetentionManager {
    /// Prune a project's snapshots and version history down to its
    /// configured retention counts.
    pub fn enforce(db: &SecretDb, project_id: &str) -> Result<RetentionStats> {
        let stats = db.transaction::<_, StoreError, _>(|t| {
            let project = t.project(project_id)?.clone();
            let env_ids: HashSet<String> = t
                .environments
                .values()
                .filter(|e| e.project_id == project.id)
                .map(|e| e.id.clone())
                .collect();

            let mut stats = RetentionStats::default();

            // Oldest snapshots beyond the per-folder limit.
            let mut by_folder: HashMap<String, Vec<(u64, String)>> = HashMap::new();
            for s in t.snapshots.values().filter(|s| env_ids.contains(&s.env_id)) {
                by_folder
                    .entry(s.folder_id.clone())
                    .or_default()
                    .push((s.seq, s.id.clone()));
            }
            let mut doomed: Vec<String> = Vec::new();
            for (_, mut snaps) in by_folder {
                snaps.sort_by(|a, b| b.0.cmp(&a.0));
                doomed.extend(snaps.into_iter().skip(project.snapshot_retention).map(|(_, id)| id));
            }
            for id in &doomed {
                t.snapshots.remove(id);
                t.snapshot_secrets.retain(|j| &j.snapshot_id != id);
                t.snapshot_folders.retain(|j| &j.snapshot_id != id);
            }
            stats.snapshots_removed = doomed.len();

            // Version rows beyond the retention count, oldest first, unless
            // still referenced by a surviving snapshot.
            let referenced_secret_versions: HashSet<String> = t
                .snapshot_secrets
                .iter()
                .map(|j| j.secret_version_id.clone())
                .collect();
            let referenced_folder_versions: HashSet<String> = t
                .snapshot_folders
                .iter()
                .map(|j| j.folder_version_id.clone())
                .collect();

            let mut secret_history: HashMap<String, Vec<(u64, u64, String)>> = HashMap::new();
            for v in &t.secret_versions {
                let in_project = match t.folders.get(&v.folder_id) {
                    Some(f) => env_ids.contains(&f.env_id),
                    // Folder gone (cascade delete): orphaned history is
                    // still subject to pruning.
                    None => true,
                };
                if in_project {
                    secret_history
                        .entry(v.secret_id.clone())
                        .or_default()
                        .push((v.version, v.seq, v.id.clone()));
                }
            }
            let mut doomed_versions: HashSet<String> = HashSet::new();
            for (_, mut rows) in secret_history {
                rows.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
                doomed_versions.extend(
                    rows.into_iter()
                        .skip(project.version_retention)
                        .map(|(_, _, id)| id)
                        .filter(|id| !referenced_secret_versions.contains(id)),
                );
            }
            let before = t.secret_versions.len();
            t.secret_versions.retain(|v| !doomed_versions.contains(&v.id));
            stats.secret_versions_removed = before - t.secret_versions.len();

            let mut folder_history: HashMap<String, Vec<(u64, u64, String)>> = HashMap::new();
            for v in t.folder_versions.iter().filter(|v| env_ids.contains(&v.env_id)) {
                folder_history
                    .entry(v.folder_id.clone())
                    .or_default()
                    .push((v.version, v.seq, v.id.clone()));
            }
            let mut doomed_folder_versions: HashSet<String> = HashSet::new();
            for (_, mut rows) in folder_history {
                rows.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
                doomed_folder_versions.extend(
                    rows.into_iter()
                        .skip(project.version_retention)
                        .map(|(_, _, id)| id)
                        .filter(|id| !referenced_folder_versions.contains(id)),
                );
            }
            let before = t.folder_versions.len();
            t.folder_versions
                .retain(|v| !doomed_folder_versions.contains(&v.id));
            stats.folder_versions_removed = before - t.folder_versions.len();

            Ok(stats)
        })?;

        info!(
            project_id,
            snapshots = stats.snapshots_removed,
            secret_versions = stats.secret_versions_removed,
            folder_versions = stats.folder_versions_removed,
            "retention pruning complete"
        );
        Ok(stats)
    }
}
