// SPDX-License-Identifier: MIT OR Apache-2.0
//! Project and environment provisioning.

use rand::RngCore;
use secret_cipher::{cipher_for_scheme, CipherScheme, ProjectKey, SALT_SIZE};

use crate::db::{new_id, SecretDb};
use crate::model::{EnvironmentRow, FolderRow, ProjectRow};
use crate::{Result, StoreError};

/// Retention knobs recorded on the project row.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub snapshot_retention: usize,
    pub version_retention: usize,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            snapshot_retention: 50,
            version_retention: 100,
        }
    }
}

impl ProjectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot_retention(mut self, count: usize) -> Self {
        self.snapshot_retention = count;
        self
    }

    pub fn with_version_retention(mut self, count: usize) -> Self {
        self.version_retention = count;
        self
    }
}

impl SecretDb {
    /// Create a project with a freshly generated blind-index salt,
    /// encrypted at rest under the project key.
    pub fn create_project(
        &self,
        name: &str,
        scheme: CipherScheme,
        key: &ProjectKey,
        config: ProjectConfig,
    ) -> Result<ProjectRow> {
        if name.trim().is_empty() {
            return Err(StoreError::Validation("project name is empty".into()));
        }

        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        let cipher = cipher_for_scheme(scheme, key);
        let salt_blob = cipher.encrypt(&salt)?;

        let row = ProjectRow {
            id: new_id(),
            name: name.to_string(),
            scheme,
            blind_index_salt: Some(salt_blob),
            snapshot_retention: config.snapshot_retention.max(1),
            version_retention: config.version_retention.max(1),
        };

        self.transaction::<_, StoreError, _>(|t| {
            t.projects.insert(row.id.clone(), row.clone());
            Ok(row.clone())
        })
    }

    /// Create an environment and its single root folder.
    pub fn create_environment(&self, project_id: &str, slug: &str) -> Result<EnvironmentRow> {
        if slug.trim().is_empty() {
            return Err(StoreError::Validation("environment slug is empty".into()));
        }

        self.transaction(|t| {
            t.project(project_id)?;
            if t.environments
                .values()
                .any(|e| e.project_id == project_id && e.slug == slug)
            {
                return Err(StoreError::Validation(format!(
                    "environment {slug} already exists"
                )));
            }

            let env_id = new_id();
            let root = FolderRow {
                id: new_id(),
                env_id: env_id.clone(),
                parent_id: None,
                name: "root".to_string(),
                version: 1,
            };
            let env = EnvironmentRow {
                id: env_id,
                project_id: project_id.to_string(),
                slug: slug.to_string(),
                root_folder_id: root.id.clone(),
            };

            t.push_folder_version(&root);
            t.folders.insert(root.id.clone(), root);
            t.environments.insert(env.id.clone(), env.clone());
            Ok(env)
        })
    }
}
