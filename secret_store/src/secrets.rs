// SPDX-License-Identifier: MIT OR Apache-2.0
//! Direct secret operations: create, update, delete, read.
//!
//! Name uniqueness is blind-index based and scoped to (folder, index, kind):
//! a Personal secret may shadow a Shared one with the same index. Every
//! mutation appends an immutable version row; deletes remove only the live
//! row, history stays until retention pruning.

use secret_cipher::EncryptedBlob;

use crate::crypto::ProjectCrypto;
use crate::db::{new_id, SecretDb, Tables};
use crate::model::{SecretKind, SecretRow};
use crate::{Result, StoreError};

/// Draft of a new secret.
#[derive(Debug, Clone)]
pub struct SecretDraft {
    pub name: String,
    pub value: String,
    pub comment: Option<String>,
}

/// Requested changes to an existing secret; `None` fields keep the current
/// value, `rename` moves the row to a new blind index.
#[derive(Debug, Clone, Default)]
pub struct SecretPatch {
    pub rename: Option<String>,
    pub value: Option<String>,
    pub comment: Option<Option<String>>,
}

/// Decrypted read-model of a secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretView {
    pub id: String,
    pub name: String,
    pub value: String,
    pub comment: Option<String>,
    pub kind: SecretKind,
    pub version: u64,
}

fn decrypt_view(crypto: &ProjectCrypto, row: &SecretRow) -> Result<SecretView> {
    Ok(SecretView {
        id: row.id.clone(),
        name: crypto.decrypt_str(&row.key)?,
        value: crypto.decrypt_str(&row.value)?,
        comment: row
            .comment
            .as_ref()
            .map(|c| crypto.decrypt_str(c))
            .transpose()?,
        kind: row.kind,
        version: row.version,
    })
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(StoreError::Validation("secret name is empty".into()));
    }
    Ok(())
}

/// Starting version for a fresh insert under (folder, index): 1, or max+1
/// when history holds a same-index tombstone so numbering never restarts.
fn initial_version(tables: &Tables, folder_id: &str, blind_index: &str) -> u64 {
    tables
        .max_version_for_index(folder_id, blind_index)
        .map_or(1, |max| max + 1)
}

/// Build and insert a live secret row plus its version row. Shared between
/// the direct path and the merge processor; callers have already checked
/// index uniqueness.
pub fn insert_secret(
    tables: &mut Tables,
    folder_id: &str,
    blind_index: String,
    key: EncryptedBlob,
    value: EncryptedBlob,
    comment: Option<EncryptedBlob>,
    kind: SecretKind,
    user_id: Option<String>,
) -> SecretRow {
    let version = initial_version(tables, folder_id, &blind_index);
    let row = SecretRow {
        id: new_id(),
        folder_id: folder_id.to_string(),
        blind_index,
        key,
        value,
        comment,
        kind,
        user_id,
        version,
    };
    tables.push_secret_version(&row);
    tables.secrets.insert(row.id.clone(), row.clone());
    row
}

impl SecretDb {
    /// Create a secret in a folder.
    pub fn create_secret(
        &self,
        crypto: &ProjectCrypto,
        folder_id: &str,
        kind: SecretKind,
        user_id: Option<&str>,
        draft: &SecretDraft,
    ) -> Result<SecretRow> {
        validate_name(&draft.name)?;
        if kind == SecretKind::Personal && user_id.is_none() {
            return Err(StoreError::Validation(
                "personal secret requires an owner".into(),
            ));
        }

        let blind_index = crypto.index(&draft.name);
        let key = crypto.encrypt_str(&draft.name)?;
        let value = crypto.encrypt_str(&draft.value)?;
        let comment = draft
            .comment
            .as_deref()
            .map(|c| crypto.encrypt_str(c))
            .transpose()?;

        self.transaction(|t| {
            t.folder(folder_id)?;
            if t.find_live_secret(folder_id, &blind_index, kind, user_id)
                .is_some()
            {
                return Err(StoreError::Validation(format!(
                    "secret {} already exists in folder",
                    draft.name
                )));
            }

            Ok(insert_secret(
                t,
                folder_id,
                blind_index.clone(),
                key.clone(),
                value.clone(),
                comment.clone(),
                kind,
                user_id.map(String::from),
            ))
        })
    }

    /// Update a secret resolved by name, bumping its version.
    pub fn update_secret(
        &self,
        crypto: &ProjectCrypto,
        folder_id: &str,
        name: &str,
        kind: SecretKind,
        user_id: Option<&str>,
        patch: &SecretPatch,
    ) -> Result<SecretRow> {
        let blind_index = crypto.index(name);
        let renamed = patch
            .rename
            .as_deref()
            .map(|n| {
                validate_name(n)?;
                Ok::<_, StoreError>((crypto.index(n), crypto.encrypt_str(n)?))
            })
            .transpose()?;
        let value = patch
            .value
            .as_deref()
            .map(|v| crypto.encrypt_str(v))
            .transpose()?;
        let comment = match &patch.comment {
            Some(Some(c)) => Some(Some(crypto.encrypt_str(c)?)),
            Some(None) => Some(None),
            None => None,
        };

        self.transaction(|t| {
            let live = t
                .find_live_secret(folder_id, &blind_index, kind, user_id)
                .ok_or_else(|| StoreError::NotFound(format!("secret {name}")))?;
            let id = live.id.clone();

            if let Some((new_index, _)) = &renamed {
                if *new_index != blind_index
                    && t.find_live_secret(folder_id, new_index, kind, user_id)
                        .is_some()
                {
                    return Err(StoreError::Validation(format!(
                        "secret {} already exists in folder",
                        patch.rename.as_deref().unwrap_or_default()
                    )));
                }
            }

            // Bump past the whole history for this id, not just the live
            // version: a row revived by rollback can sit below its own
            // history's maximum.
            let next_version = t.max_version_for_id(&id).unwrap_or(0).max(
                t.secrets.get(&id).map(|r| r.version).unwrap_or(0),
            ) + 1;

            let row = t.secrets.get_mut(&id).ok_or_else(|| {
                StoreError::NotFound(format!("secret {id}"))
            })?;
            if let Some((new_index, new_key)) = renamed.clone() {
                row.blind_index = new_index;
                row.key = new_key;
            }
            if let Some(v) = value.clone() {
                row.value = v;
            }
            if let Some(c) = comment.clone() {
                row.comment = c;
            }
            row.version = next_version;

            let updated = row.clone();
            t.push_secret_version(&updated);
            Ok(updated)
        })
    }

    /// Delete the live row; version history is retained.
    pub fn delete_secret(
        &self,
        crypto: &ProjectCrypto,
        folder_id: &str,
        name: &str,
        kind: SecretKind,
        user_id: Option<&str>,
    ) -> Result<SecretRow> {
        let blind_index = crypto.index(name);

        self.transaction(|t| {
            let id = t
                .find_live_secret(folder_id, &blind_index, kind, user_id)
                .map(|s| s.id.clone())
                .ok_or_else(|| StoreError::NotFound(format!("secret {name}")))?;
            t.secrets
                .remove(&id)
                .ok_or_else(|| StoreError::NotFound(format!("secret {name}")))
        })
    }

    /// Read a secret by name. A Personal secret owned by the caller shadows
    /// a Shared one with the same index.
    pub fn get_secret(
        &self,
        crypto: &ProjectCrypto,
        folder_id: &str,
        name: &str,
        user_id: Option<&str>,
    ) -> Result<SecretView> {
        let blind_index = crypto.index(name);

        self.read(|t| {
            let row = user_id
                .and_then(|u| {
                    t.find_live_secret(folder_id, &blind_index, SecretKind::Personal, Some(u))
                })
                .or_else(|| t.find_live_secret(folder_id, &blind_index, SecretKind::Shared, None))
                .ok_or_else(|| StoreError::NotFound(format!("secret {name}")))?;
            decrypt_view(crypto, row)
        })
    }

    /// List a folder's secrets for a caller: every Shared row not shadowed
    /// by one of the caller's Personal rows, plus those Personal rows.
    pub fn list_secrets(
        &self,
        crypto: &ProjectCrypto,
        folder_id: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<SecretView>> {
        self.read(|t| {
            let rows = t.live_secrets_in(folder_id);
            let personal: Vec<&SecretRow> = rows
                .iter()
                .copied()
                .filter(|s| {
                    s.kind == SecretKind::Personal && s.user_id.as_deref() == user_id
                })
                .collect();

            let mut views = Vec::new();
            for row in &rows {
                match row.kind {
                    SecretKind::Shared => {
                        let shadowed =
                            personal.iter().any(|p| p.blind_index == row.blind_index);
                        if !shadowed {
                            views.push(decrypt_view(crypto, row)?);
                        }
                    },
                    SecretKind::Personal => {
                        if row.user_id.as_deref() == user_id {
                            views.push(decrypt_view(crypto, row)?);
                        }
                    },
                }
            }
            views.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(views)
        })
    }
}

#[cfg(test)]
mod tests {
    use secret_cipher::{CipherScheme, ProjectKey, KEY_SIZE};

    use super::*;
    use crate::projects::ProjectConfig;

    fn setup() -> (SecretDb, ProjectCrypto, String) {
        let db = SecretDb::new();
        let key = ProjectKey::from_bytes([2u8; KEY_SIZE]);
        let project = db
            .create_project(
                "demo",
                CipherScheme::V2Envelope,
                &key,
                ProjectConfig::default(),
            )
            .unwrap();
        let env = db.create_environment(&project.id, "dev").unwrap();
        let crypto = ProjectCrypto::load(&db, &project.id, &key).unwrap();
        (db, crypto, env.root_folder_id)
    }

    fn draft(name: &str, value: &str) -> SecretDraft {
        SecretDraft {
            name: name.into(),
            value: value.into(),
            comment: None,
        }
    }

    #[test]
    fn test_create_and_get_roundtrip() {
        let (db, crypto, folder) = setup();

        db.create_secret(
            &crypto,
            &folder,
            SecretKind::Shared,
            None,
            &draft("DATABASE_URL", "postgres://"),
        )
        .unwrap();

        let view = db.get_secret(&crypto, &folder, "DATABASE_URL", None).unwrap();
        assert_eq!(view.name, "DATABASE_URL");
        assert_eq!(view.value, "postgres://");
        assert_eq!(view.version, 1);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (db, crypto, folder) = setup();

        db.create_secret(&crypto, &folder, SecretKind::Shared, None, &draft("A", "1"))
            .unwrap();
        assert!(matches!(
            db.create_secret(&crypto, &folder, SecretKind::Shared, None, &draft("A", "2")),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_personal_shadows_shared() {
        let (db, crypto, folder) = setup();

        db.create_secret(&crypto, &folder, SecretKind::Shared, None, &draft("A", "team"))
            .unwrap();
        db.create_secret(
            &crypto,
            &folder,
            SecretKind::Personal,
            Some("alice"),
            &draft("A", "mine"),
        )
        .unwrap();

        let alice = db.get_secret(&crypto, &folder, "A", Some("alice")).unwrap();
        assert_eq!(alice.value, "mine");

        let bob = db.get_secret(&crypto, &folder, "A", Some("bob")).unwrap();
        assert_eq!(bob.value, "team");

        let listed = db.list_secrets(&crypto, &folder, Some("alice")).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].value, "mine");
    }

    #[test]
    fn test_update_bumps_version_and_appends_history() {
        let (db, crypto, folder) = setup();

        db.create_secret(&crypto, &folder, SecretKind::Shared, None, &draft("A", "1"))
            .unwrap();
        let updated = db
            .update_secret(
                &crypto,
                &folder,
                "A",
                SecretKind::Shared,
                None,
                &SecretPatch {
                    value: Some("2".into()),
                    ..SecretPatch::default()
                },
            )
            .unwrap();

        assert_eq!(updated.version, 2);
        let history = db.read(|t| {
            t.secret_versions
                .iter()
                .filter(|v| v.secret_id == updated.id)
                .count()
        });
        assert_eq!(history, 2);
    }

    #[test]
    fn test_rename_moves_blind_index() {
        let (db, crypto, folder) = setup();

        db.create_secret(&crypto, &folder, SecretKind::Shared, None, &draft("OLD", "v"))
            .unwrap();
        db.update_secret(
            &crypto,
            &folder,
            "OLD",
            SecretKind::Shared,
            None,
            &SecretPatch {
                rename: Some("NEW".into()),
                ..SecretPatch::default()
            },
        )
        .unwrap();

        assert!(db.get_secret(&crypto, &folder, "OLD", None).is_err());
        assert_eq!(
            db.get_secret(&crypto, &folder, "NEW", None).unwrap().value,
            "v"
        );
    }

    #[test]
    fn test_rename_onto_live_name_rejected() {
        let (db, crypto, folder) = setup();

        db.create_secret(&crypto, &folder, SecretKind::Shared, None, &draft("A", "1"))
            .unwrap();
        db.create_secret(&crypto, &folder, SecretKind::Shared, None, &draft("B", "2"))
            .unwrap();

        assert!(matches!(
            db.update_secret(
                &crypto,
                &folder,
                "A",
                SecretKind::Shared,
                None,
                &SecretPatch {
                    rename: Some("B".into()),
                    ..SecretPatch::default()
                },
            ),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_delete_retains_history() {
        let (db, crypto, folder) = setup();

        let row = db
            .create_secret(&crypto, &folder, SecretKind::Shared, None, &draft("A", "1"))
            .unwrap();
        db.delete_secret(&crypto, &folder, "A", SecretKind::Shared, None)
            .unwrap();

        assert!(db.get_secret(&crypto, &folder, "A", None).is_err());
        let history = db.read(|t| {
            t.secret_versions
                .iter()
                .filter(|v| v.secret_id == row.id)
                .count()
        });
        assert_eq!(history, 1);
    }

    #[test]
    fn test_recreate_after_delete_continues_numbering() {
        let (db, crypto, folder) = setup();

        db.create_secret(&crypto, &folder, SecretKind::Shared, None, &draft("A", "1"))
            .unwrap();
        db.update_secret(
            &crypto,
            &folder,
            "A",
            SecretKind::Shared,
            None,
            &SecretPatch {
                value: Some("2".into()),
                ..SecretPatch::default()
            },
        )
        .unwrap();
        db.delete_secret(&crypto, &folder, "A", SecretKind::Shared, None)
            .unwrap();

        let revived = db
            .create_secret(&crypto, &folder, SecretKind::Shared, None, &draft("A", "3"))
            .unwrap();
        assert_eq!(revived.version, 3);
    }

    #[test]
    fn test_personal_requires_owner() {
        let (db, crypto, folder) = setup();
        assert!(matches!(
            db.create_secret(&crypto, &folder, SecretKind::Personal, None, &draft("A", "1")),
            Err(StoreError::Validation(_))
        ));
    }
}
