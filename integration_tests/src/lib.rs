// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared helpers for cross-crate scenario tests.

use std::sync::Arc;

use change_request::{Notification, NotificationSink};
use parking_lot::Mutex;
use secret_cipher::{CipherScheme, ProjectKey, KEY_SIZE};
use secret_store::{ProjectConfig, ProjectCrypto, SecretDb, SecretDraft};

/// A provisioned project with one environment and its crypto context.
pub struct TestProject {
    pub db: SecretDb,
    pub crypto: ProjectCrypto,
    pub project_id: String,
    pub env_id: String,
    pub root_folder_id: String,
}

/// Create a project, one `prod` environment, and the crypto context.
pub fn setup_project() -> TestProject {
    setup_project_with(ProjectConfig::default())
}

pub fn setup_project_with(config: ProjectConfig) -> TestProject {
    let db = SecretDb::new();
    let key = ProjectKey::from_bytes([42u8; KEY_SIZE]);
    let project = db
        .create_project("orchard", CipherScheme::V2Envelope, &key, config)
        .expect("project setup");
    let env = db
        .create_environment(&project.id, "prod")
        .expect("environment setup");
    let crypto = ProjectCrypto::load(&db, &project.id, &key).expect("crypto context");

    TestProject {
        db,
        crypto,
        project_id: project.id,
        env_id: env.id,
        root_folder_id: env.root_folder_id,
    }
}

pub fn draft(name: &str, value: &str) -> SecretDraft {
    SecretDraft {
        name: name.to_string(),
        value: value.to_string(),
        comment: None,
    }
}

/// Notification sink that records every event for assertions.
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().clone()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, event: &Notification) -> Result<(), String> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
