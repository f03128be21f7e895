// SPDX-License-Identifier: MIT OR Apache-2.0
//! Folder operations: create, rename, delete (cascading), path lookup.
//!
//! Folder names are plaintext; only secret names are blind-indexed. Every
//! folder mutation bumps the version and appends a folder version row.

use crate::db::{new_id, SecretDb, Tables};
use crate::model::FolderRow;
use crate::tree::FolderTree;
use crate::{Result, StoreError};

fn validate_folder_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(StoreError::Validation("folder name is empty".into()));
    }
    if name.contains('/') {
        return Err(StoreError::Validation(
            "folder name must not contain '/'".into(),
        ));
    }
    Ok(())
}

fn sibling_name_taken(tables: &Tables, parent_id: &str, name: &str, skip: Option<&str>) -> bool {
    tables
        .child_folders(parent_id)
        .iter()
        .any(|f| f.name == name && Some(f.id.as_str()) != skip)
}

/// Remove a subtree's folders and their live secrets from the tables.
/// Returns the removed folder rows, target first, ascending by depth.
/// Version history rows are untouched.
fn delete_subtree(tables: &mut Tables, folder_id: &str) -> Result<Vec<FolderRow>> {
    let tree = FolderTree::build_rooted(tables, folder_id)?;
    let ids = tree.subtree_ids(folder_id)?;

    let doomed_secrets: Vec<String> = tables
        .secrets
        .values()
        .filter(|s| ids.contains(&s.folder_id))
        .map(|s| s.id.clone())
        .collect();
    for id in doomed_secrets {
        tables.secrets.remove(&id);
    }

    let mut removed = Vec::with_capacity(ids.len());
    for id in &ids {
        if let Some(row) = tables.folders.remove(id) {
            removed.push(row);
        }
    }
    Ok(removed)
}

impl SecretDb {
    /// Create a folder under a parent in the same environment.
    pub fn create_folder(&self, env_id: &str, parent_id: &str, name: &str) -> Result<FolderRow> {
        validate_folder_name(name)?;

        self.transaction(|t| {
            let parent = t.folder(parent_id)?;
            if parent.env_id != env_id {
                return Err(StoreError::Validation(
                    "parent folder belongs to another environment".into(),
                ));
            }
            if sibling_name_taken(t, parent_id, name, None) {
                return Err(StoreError::Validation(format!(
                    "folder {name} already exists here"
                )));
            }

            let row = FolderRow {
                id: new_id(),
                env_id: env_id.to_string(),
                parent_id: Some(parent_id.to_string()),
                name: name.to_string(),
                version: 1,
            };
            t.push_folder_version(&row);
            t.folders.insert(row.id.clone(), row.clone());
            Ok(row)
        })
    }

    /// Rename a folder, bumping its version.
    pub fn rename_folder(&self, folder_id: &str, new_name: &str) -> Result<FolderRow> {
        validate_folder_name(new_name)?;

        self.transaction(|t| {
            let folder = t.folder(folder_id)?;
            let parent_id = folder
                .parent_id
                .clone()
                .ok_or_else(|| StoreError::Validation("cannot rename the root folder".into()))?;

            if sibling_name_taken(t, &parent_id, new_name, Some(folder_id)) {
                return Err(StoreError::Validation(format!(
                    "folder {new_name} already exists here"
                )));
            }

            // Bump past the folder's whole history; a rollback-revived
            // folder can sit below its history's maximum.
            let next_version = t
                .max_version_for_folder(folder_id)
                .unwrap_or(0)
                .max(t.folders.get(folder_id).map(|f| f.version).unwrap_or(0))
                + 1;
            let row = t
                .folders
                .get_mut(folder_id)
                .ok_or_else(|| StoreError::NotFound(format!("folder {folder_id}")))?;
            row.name = new_name.to_string();
            row.version = next_version;
            let updated = row.clone();
            t.push_folder_version(&updated);
            Ok(updated)
        })
    }

    /// Delete a folder and every descendant folder and secret.
    pub fn delete_folder(&self, folder_id: &str) -> Result<Vec<FolderRow>> {
        self.transaction(|t| {
            let folder = t.folder(folder_id)?;
            if folder.parent_id.is_none() {
                return Err(StoreError::Validation(
                    "cannot delete the root folder".into(),
                ));
            }
            delete_subtree(t, folder_id)
        })
    }

    /// Resolve a `/`-separated path from the environment root.
    pub fn folder_by_path(&self, env_id: &str, path: &str) -> Result<FolderRow> {
        self.read(|t| {
            let tree = FolderTree::build(t, env_id)?;
            let id = tree
                .resolve_path(path)
                .ok_or_else(|| StoreError::NotFound(format!("folder path {path}")))?;
            t.folder(id).cloned()
        })
    }

    /// Reconstruct a folder's path from the environment root.
    pub fn path_of_folder(&self, env_id: &str, folder_id: &str) -> Result<String> {
        self.read(|t| {
            let tree = FolderTree::build(t, env_id)?;
            tree.path_of(folder_id)
                .ok_or_else(|| StoreError::NotFound(format!("folder {folder_id}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use secret_cipher::{CipherScheme, ProjectKey, KEY_SIZE};

    use super::*;
    use crate::crypto::ProjectCrypto;
    use crate::model::SecretKind;
    use crate::projects::ProjectConfig;
    use crate::secrets::SecretDraft;

    fn setup() -> (SecretDb, ProjectCrypto, String, String) {
        let db = SecretDb::new();
        let key = ProjectKey::from_bytes([3u8; KEY_SIZE]);
        let project = db
            .create_project(
                "demo",
                CipherScheme::V1Legacy,
                &key,
                ProjectConfig::default(),
            )
            .unwrap();
        let env = db.create_environment(&project.id, "dev").unwrap();
        let crypto = ProjectCrypto::load(&db, &project.id, &key).unwrap();
        (db, crypto, env.id, env.root_folder_id)
    }

    #[test]
    fn test_create_and_resolve_by_path() {
        let (db, _crypto, env, root) = setup();

        let app = db.create_folder(&env, &root, "app").unwrap();
        let workers = db.create_folder(&env, &app.id, "workers").unwrap();

        assert_eq!(db.folder_by_path(&env, "/app/workers").unwrap().id, workers.id);
        assert_eq!(
            db.path_of_folder(&env, &workers.id).unwrap(),
            "/app/workers"
        );
    }

    #[test]
    fn test_duplicate_sibling_rejected() {
        let (db, _crypto, env, root) = setup();

        db.create_folder(&env, &root, "app").unwrap();
        assert!(matches!(
            db.create_folder(&env, &root, "app"),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_rename_bumps_version() {
        let (db, _crypto, env, root) = setup();

        let app = db.create_folder(&env, &root, "app").unwrap();
        let renamed = db.rename_folder(&app.id, "service").unwrap();

        assert_eq!(renamed.version, 2);
        assert_eq!(renamed.name, "service");
        let history = db.read(|t| {
            t.folder_versions
                .iter()
                .filter(|v| v.folder_id == app.id)
                .count()
        });
        assert_eq!(history, 2);
    }

    #[test]
    fn test_delete_cascades_to_descendants() {
        let (db, crypto, env, root) = setup();

        let app = db.create_folder(&env, &root, "app").unwrap();
        let workers = db.create_folder(&env, &app.id, "workers").unwrap();
        db.create_secret(
            &crypto,
            &workers.id,
            SecretKind::Shared,
            None,
            &SecretDraft {
                name: "TOKEN".into(),
                value: "t".into(),
                comment: None,
            },
        )
        .unwrap();

        let removed = db.delete_folder(&app.id).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(db.read(|t| t.folder(&workers.id).is_err()));
        assert!(db.read(|t| t.live_secrets_in(&workers.id).is_empty()));
    }

    #[test]
    fn test_root_is_protected() {
        let (db, _crypto, _env, root) = setup();

        assert!(matches!(
            db.delete_folder(&root),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            db.rename_folder(&root, "x"),
            Err(StoreError::Validation(_))
        ));
    }
}
